//! CXL.cache frames: device↔host coherency traffic.
//!
//! Frame shape: envelope, 2-byte class header (`port_index`, `msg_class`),
//! then one of six bit-packed typed headers; the data-carrying variants
//! append a 64-byte cache line. Addresses are cache-line aligned and carried
//! as `addr >> 6`.

use crate::bits;
use crate::envelope::{Envelope, PayloadType, ENVELOPE_LEN};
use crate::{PacketError, CACHE_LINE_SIZE};

const CLASS_LEN: usize = 2;
const BASE_LEN: usize = ENVELOPE_LEN + CLASS_LEN;

const D2H_REQ_LEN: usize = 9;
const D2H_RSP_LEN: usize = 3;
const D2H_DATA_LEN: usize = 3;
const H2D_REQ_LEN: usize = 9;
const H2D_RSP_LEN: usize = 5;
const H2D_DATA_LEN: usize = 3;

const MSG_D2H_REQ: u8 = 1;
const MSG_D2H_RSP: u8 = 2;
const MSG_D2H_DATA: u8 = 3;
const MSG_H2D_REQ: u8 = 4;
const MSG_H2D_RSP: u8 = 5;
const MSG_H2D_DATA: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum D2hReqOpcode {
    RdCurr = 0b00001,
    RdOwn = 0b00010,
    RdShared = 0b00011,
    RdAny = 0b00100,
    RdOwnNoData = 0b00101,
    ItoMWr = 0b00110,
    WrCur = 0b00111,
    ClFlush = 0b01000,
    CleanEvict = 0b01001,
    DirtyEvict = 0b01010,
    CleanEvictNoData = 0b01011,
    WoWrInv = 0b01100,
    WoWrInvF = 0b01101,
    WrInv = 0b01110,
    CacheFlushed = 0b10000,
}

impl TryFrom<u8> for D2hReqOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        use D2hReqOpcode::*;
        Ok(match value {
            0b00001 => RdCurr,
            0b00010 => RdOwn,
            0b00011 => RdShared,
            0b00100 => RdAny,
            0b00101 => RdOwnNoData,
            0b00110 => ItoMWr,
            0b00111 => WrCur,
            0b01000 => ClFlush,
            0b01001 => CleanEvict,
            0b01010 => DirtyEvict,
            0b01011 => CleanEvictNoData,
            0b01100 => WoWrInv,
            0b01101 => WoWrInvF,
            0b01110 => WrInv,
            0b10000 => CacheFlushed,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.cache d2h req",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum D2hRspOpcode {
    RspIHitI = 0b00100,
    RspVHitV = 0b00110,
    RspIHitSE = 0b00101,
    RspSHitSE = 0b00001,
    RspSFwdM = 0b00111,
    RspIFwdM = 0b01111,
    RspVFwdV = 0b10110,
}

impl TryFrom<u8> for D2hRspOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        use D2hRspOpcode::*;
        Ok(match value {
            0b00100 => RspIHitI,
            0b00110 => RspVHitV,
            0b00101 => RspIHitSE,
            0b00001 => RspSHitSE,
            0b00111 => RspSFwdM,
            0b01111 => RspIFwdM,
            0b10110 => RspVFwdV,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.cache d2h rsp",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum H2dReqOpcode {
    SnpData = 0b001,
    SnpInv = 0b010,
    SnpCur = 0b011,
}

impl TryFrom<u8> for H2dReqOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        Ok(match value {
            0b001 => H2dReqOpcode::SnpData,
            0b010 => H2dReqOpcode::SnpInv,
            0b011 => H2dReqOpcode::SnpCur,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.cache h2d req",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum H2dRspOpcode {
    WritePull = 0b0001,
    Go = 0b0100,
    GoWritePull = 0b0101,
    ExtCmp = 0b0110,
    GoWritePullDrop = 0b1000,
    FastGoWritePull = 0b1101,
    GoErrWritePull = 0b1111,
}

impl TryFrom<u8> for H2dRspOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        use H2dRspOpcode::*;
        Ok(match value {
            0b0001 => WritePull,
            0b0100 => Go,
            0b0101 => GoWritePull,
            0b0110 => ExtCmp,
            0b1000 => GoWritePullDrop,
            0b1101 => FastGoWritePull,
            0b1111 => GoErrWritePull,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.cache h2d rsp",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheD2hReq {
    pub opcode: D2hReqOpcode,
    pub cqid: u16,
    pub nt: u8,
    pub cache_id: u8,
    addr: u64,
}

impl CacheD2hReq {
    pub fn address(&self) -> u64 {
        self.addr << 6
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheD2hRsp {
    pub opcode: D2hRspOpcode,
    pub uqid: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheD2hData {
    pub uqid: u16,
    pub bogus: u8,
    pub poison: u8,
    pub bep: u8,
    pub data: [u8; CACHE_LINE_SIZE],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheH2dReq {
    pub opcode: H2dReqOpcode,
    pub uqid: u16,
    pub cache_id: u8,
    addr: u64,
}

impl CacheH2dReq {
    pub fn address(&self) -> u64 {
        self.addr << 6
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheH2dRsp {
    pub opcode: H2dRspOpcode,
    pub rsp_data: u16,
    pub rsp_pre: u8,
    pub cqid: u16,
    pub cache_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheH2dData {
    pub cqid: u16,
    pub poison: u8,
    pub go_err: u8,
    pub cache_id: u8,
    pub data: [u8; CACHE_LINE_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBody {
    D2hReq(CacheD2hReq),
    D2hRsp(CacheD2hRsp),
    D2hData(CacheD2hData),
    H2dReq(CacheH2dReq),
    H2dRsp(CacheH2dRsp),
    H2dData(CacheH2dData),
}

/// A complete CXL.cache frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CxlCachePacket {
    pub port_index: u8,
    pub body: CacheBody,
}

impl CxlCachePacket {
    pub fn d2h_req(
        addr: u64,
        cache_id: u8,
        opcode: D2hReqOpcode,
        cqid: u16,
    ) -> Result<Self, PacketError> {
        if addr % 0x40 != 0 {
            return Err(PacketError::MisalignedAddress(addr));
        }
        Ok(CxlCachePacket {
            port_index: 0,
            body: CacheBody::D2hReq(CacheD2hReq {
                opcode,
                cqid,
                nt: 0,
                cache_id,
                addr: addr >> 6,
            }),
        })
    }

    pub fn d2h_rsp(uqid: u16, opcode: D2hRspOpcode) -> Self {
        CxlCachePacket {
            port_index: 0,
            body: CacheBody::D2hRsp(CacheD2hRsp { opcode, uqid }),
        }
    }

    pub fn d2h_data(uqid: u16, data: [u8; CACHE_LINE_SIZE]) -> Self {
        CxlCachePacket {
            port_index: 0,
            body: CacheBody::D2hData(CacheD2hData {
                uqid,
                bogus: 0,
                poison: 0,
                bep: 0,
                data,
            }),
        }
    }

    pub fn h2d_req(addr: u64, cache_id: u8, opcode: H2dReqOpcode) -> Result<Self, PacketError> {
        if addr % 0x40 != 0 {
            return Err(PacketError::MisalignedAddress(addr));
        }
        Ok(CxlCachePacket {
            port_index: 0,
            body: CacheBody::H2dReq(CacheH2dReq {
                opcode,
                uqid: 0,
                cache_id,
                addr: addr >> 6,
            }),
        })
    }

    pub fn h2d_rsp(cache_id: u8, opcode: H2dRspOpcode, rsp_data: u16, cqid: u16) -> Self {
        CxlCachePacket {
            port_index: 0,
            body: CacheBody::H2dRsp(CacheH2dRsp {
                opcode,
                rsp_data,
                rsp_pre: 0,
                cqid,
                cache_id,
            }),
        }
    }

    pub fn h2d_data(cache_id: u8, data: [u8; CACHE_LINE_SIZE], cqid: u16) -> Self {
        CxlCachePacket {
            port_index: 0,
            body: CacheBody::H2dData(CacheH2dData {
                cqid,
                poison: 0,
                go_err: 0,
                cache_id,
                data,
            }),
        }
    }

    /// The cache id used for host→device routing, when the variant carries
    /// one.
    pub fn host_to_device_cache_id(&self) -> Option<u8> {
        match &self.body {
            CacheBody::H2dReq(req) => Some(req.cache_id),
            CacheBody::H2dRsp(rsp) => Some(rsp.cache_id),
            CacheBody::H2dData(data) => Some(data.cache_id),
            _ => None,
        }
    }

    /// Stamps the cache id on a device→host request.
    pub fn set_d2h_req_cache_id(&mut self, cache_id: u8) {
        if let CacheBody::D2hReq(req) = &mut self.body {
            req.cache_id = cache_id;
        }
    }

    pub(crate) fn frame_len(&self) -> usize {
        BASE_LEN
            + match &self.body {
                CacheBody::D2hReq(_) => D2H_REQ_LEN,
                CacheBody::D2hRsp(_) => D2H_RSP_LEN,
                CacheBody::D2hData(_) => D2H_DATA_LEN + CACHE_LINE_SIZE,
                CacheBody::H2dReq(_) => H2D_REQ_LEN,
                CacheBody::H2dRsp(_) => H2D_RSP_LEN,
                CacheBody::H2dData(_) => H2D_DATA_LEN + CACHE_LINE_SIZE,
            }
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        Envelope::new(PayloadType::CxlCache, self.frame_len()).write(out);
        out.push(self.port_index);
        match &self.body {
            CacheBody::D2hReq(req) => {
                out.push(MSG_D2H_REQ);
                let mut buf = [0u8; D2H_REQ_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 5, req.opcode as u64);
                bits::set(&mut buf, 6, 17, req.cqid as u64);
                bits::set(&mut buf, 18, 18, req.nt as u64);
                bits::set(&mut buf, 19, 22, req.cache_id as u64);
                bits::set(&mut buf, 23, 68, req.addr);
                out.extend_from_slice(&buf);
            }
            CacheBody::D2hRsp(rsp) => {
                out.push(MSG_D2H_RSP);
                let mut buf = [0u8; D2H_RSP_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 5, rsp.opcode as u64);
                bits::set(&mut buf, 6, 17, rsp.uqid as u64);
                out.extend_from_slice(&buf);
            }
            CacheBody::D2hData(data) => {
                out.push(MSG_D2H_DATA);
                let mut buf = [0u8; D2H_DATA_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 12, data.uqid as u64);
                bits::set(&mut buf, 13, 13, data.bogus as u64);
                bits::set(&mut buf, 14, 14, data.poison as u64);
                bits::set(&mut buf, 15, 15, data.bep as u64);
                out.extend_from_slice(&buf);
                out.extend_from_slice(&data.data);
            }
            CacheBody::H2dReq(req) => {
                out.push(MSG_H2D_REQ);
                let mut buf = [0u8; H2D_REQ_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 3, req.opcode as u64);
                bits::set(&mut buf, 4, 49, req.addr);
                bits::set(&mut buf, 50, 61, req.uqid as u64);
                bits::set(&mut buf, 62, 65, req.cache_id as u64);
                out.extend_from_slice(&buf);
            }
            CacheBody::H2dRsp(rsp) => {
                out.push(MSG_H2D_RSP);
                let mut buf = [0u8; H2D_RSP_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 4, rsp.opcode as u64);
                bits::set(&mut buf, 5, 16, rsp.rsp_data as u64);
                bits::set(&mut buf, 17, 18, rsp.rsp_pre as u64);
                bits::set(&mut buf, 19, 30, rsp.cqid as u64);
                bits::set(&mut buf, 31, 34, rsp.cache_id as u64);
                out.extend_from_slice(&buf);
            }
            CacheBody::H2dData(data) => {
                out.push(MSG_H2D_DATA);
                let mut buf = [0u8; H2D_DATA_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 12, data.cqid as u64);
                bits::set(&mut buf, 13, 13, data.poison as u64);
                bits::set(&mut buf, 14, 14, data.go_err as u64);
                bits::set(&mut buf, 15, 18, data.cache_id as u64);
                out.extend_from_slice(&buf);
                out.extend_from_slice(&data.data);
            }
        }
    }

    /// Decodes the bytes following the envelope.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self, PacketError> {
        if body.len() < CLASS_LEN {
            return Err(PacketError::Truncated {
                needed: CLASS_LEN,
                have: body.len(),
            });
        }
        let port_index = body[0];
        let msg_class = body[1];
        let rest = &body[CLASS_LEN..];

        let need = |n: usize| -> Result<(), PacketError> {
            if rest.len() < n {
                Err(PacketError::Truncated {
                    needed: CLASS_LEN + n,
                    have: body.len(),
                })
            } else {
                Ok(())
            }
        };
        let check_valid = |buf: &[u8], what: &'static str| -> Result<(), PacketError> {
            if bits::get(buf, 0, 0) != 1 {
                Err(PacketError::HeaderNotValid(what))
            } else {
                Ok(())
            }
        };

        let cache_body = match msg_class {
            MSG_D2H_REQ => {
                need(D2H_REQ_LEN)?;
                check_valid(rest, "cxl.cache d2h req")?;
                CacheBody::D2hReq(CacheD2hReq {
                    opcode: D2hReqOpcode::try_from(bits::get(rest, 1, 5) as u8)?,
                    cqid: bits::get(rest, 6, 17) as u16,
                    nt: bits::get(rest, 18, 18) as u8,
                    cache_id: bits::get(rest, 19, 22) as u8,
                    addr: bits::get(rest, 23, 68),
                })
            }
            MSG_D2H_RSP => {
                need(D2H_RSP_LEN)?;
                check_valid(rest, "cxl.cache d2h rsp")?;
                CacheBody::D2hRsp(CacheD2hRsp {
                    opcode: D2hRspOpcode::try_from(bits::get(rest, 1, 5) as u8)?,
                    uqid: bits::get(rest, 6, 17) as u16,
                })
            }
            MSG_D2H_DATA => {
                need(D2H_DATA_LEN + CACHE_LINE_SIZE)?;
                check_valid(rest, "cxl.cache d2h data")?;
                CacheBody::D2hData(CacheD2hData {
                    uqid: bits::get(rest, 1, 12) as u16,
                    bogus: bits::get(rest, 13, 13) as u8,
                    poison: bits::get(rest, 14, 14) as u8,
                    bep: bits::get(rest, 15, 15) as u8,
                    data: rest[D2H_DATA_LEN..D2H_DATA_LEN + CACHE_LINE_SIZE]
                        .try_into()
                        .expect("cache line"),
                })
            }
            MSG_H2D_REQ => {
                need(H2D_REQ_LEN)?;
                check_valid(rest, "cxl.cache h2d req")?;
                CacheBody::H2dReq(CacheH2dReq {
                    opcode: H2dReqOpcode::try_from(bits::get(rest, 1, 3) as u8)?,
                    addr: bits::get(rest, 4, 49),
                    uqid: bits::get(rest, 50, 61) as u16,
                    cache_id: bits::get(rest, 62, 65) as u8,
                })
            }
            MSG_H2D_RSP => {
                need(H2D_RSP_LEN)?;
                check_valid(rest, "cxl.cache h2d rsp")?;
                CacheBody::H2dRsp(CacheH2dRsp {
                    opcode: H2dRspOpcode::try_from(bits::get(rest, 1, 4) as u8)?,
                    rsp_data: bits::get(rest, 5, 16) as u16,
                    rsp_pre: bits::get(rest, 17, 18) as u8,
                    cqid: bits::get(rest, 19, 30) as u16,
                    cache_id: bits::get(rest, 31, 34) as u8,
                })
            }
            MSG_H2D_DATA => {
                need(H2D_DATA_LEN + CACHE_LINE_SIZE)?;
                check_valid(rest, "cxl.cache h2d data")?;
                CacheBody::H2dData(CacheH2dData {
                    cqid: bits::get(rest, 1, 12) as u16,
                    poison: bits::get(rest, 13, 13) as u8,
                    go_err: bits::get(rest, 14, 14) as u8,
                    cache_id: bits::get(rest, 15, 18) as u8,
                    data: rest[H2D_DATA_LEN..H2D_DATA_LEN + CACHE_LINE_SIZE]
                        .try_into()
                        .expect("cache line"),
                })
            }
            other => {
                return Err(PacketError::UnknownMsgClass {
                    family: "cxl.cache",
                    value: other,
                })
            }
        };

        Ok(CxlCachePacket {
            port_index,
            body: cache_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Packet;

    #[test]
    fn variants_round_trip() {
        let line = [0x5Au8; CACHE_LINE_SIZE];
        let packets = [
            CxlCachePacket::d2h_req(0x1000, 3, D2hReqOpcode::RdShared, 0x12).unwrap(),
            CxlCachePacket::d2h_rsp(0x234, D2hRspOpcode::RspIHitI),
            CxlCachePacket::d2h_data(0x234, line),
            CxlCachePacket::h2d_req(0x2000, 1, H2dReqOpcode::SnpInv).unwrap(),
            CxlCachePacket::h2d_rsp(1, H2dRspOpcode::Go, 0b0010, 0x12),
            CxlCachePacket::h2d_data(1, line, 0x12),
        ];
        for packet in packets {
            let encoded = Packet::Cache(packet.clone()).encode();
            assert_eq!(encoded.len(), packet.frame_len());
            assert_eq!(Packet::decode(&encoded).unwrap(), Packet::Cache(packet));
        }
    }

    #[test]
    fn misaligned_address_is_rejected() {
        assert_eq!(
            CxlCachePacket::d2h_req(0x1004, 0, D2hReqOpcode::RdAny, 0),
            Err(PacketError::MisalignedAddress(0x1004))
        );
    }

    #[test]
    fn cleared_valid_bit_fails_decode() {
        let mut encoded = Packet::Cache(CxlCachePacket::d2h_rsp(0, D2hRspOpcode::RspIHitI)).encode();
        encoded[5] &= !1;
        assert!(matches!(
            Packet::decode(&encoded),
            Err(PacketError::HeaderNotValid(_))
        ));
    }
}
