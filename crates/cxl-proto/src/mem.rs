//! CXL.mem frames: host↔memory traffic including the Back-Invalidation
//! flows.
//!
//! Frame shape mirrors CXL.cache: envelope, 2-byte class header, typed
//! header, optional 64-byte line (RwD and DRS). Request addresses are
//! cache-line aligned and carried as `addr >> 6`.

use crate::bits;
use crate::envelope::{Envelope, PayloadType, ENVELOPE_LEN};
use crate::{PacketError, CACHE_LINE_SIZE};

const CLASS_LEN: usize = 2;
const BASE_LEN: usize = ENVELOPE_LEN + CLASS_LEN;

const M2S_REQ_LEN: usize = 13;
const M2S_RWD_LEN: usize = 13;
const M2S_BIRSP_LEN: usize = 5;
const S2M_BISNP_LEN: usize = 10;
const S2M_NDR_LEN: usize = 5;
const S2M_DRS_LEN: usize = 5;

const MSG_M2S_REQ: u8 = 1;
const MSG_M2S_RWD: u8 = 2;
const MSG_M2S_BIRSP: u8 = 3;
const MSG_S2M_BISNP: u8 = 4;
const MSG_S2M_NDR: u8 = 5;
const MSG_S2M_DRS: u8 = 6;

/// MetaField encoding: no-op (no metadata update).
pub const META_FIELD_NO_OP: u8 = 0b11;
/// MetaValue encoding: any.
pub const META_VALUE_ANY: u8 = 0b10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum M2sReqOpcode {
    MemInv = 0b0000,
    MemRd = 0b0001,
    MemRdData = 0b0010,
    MemRdFwd = 0b0011,
    MemWrFwd = 0b0100,
    MemSpecRd = 0b1000,
    MemInvNt = 0b1001,
    MemClnEvct = 0b1010,
}

impl TryFrom<u8> for M2sReqOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        use M2sReqOpcode::*;
        Ok(match value {
            0b0000 => MemInv,
            0b0001 => MemRd,
            0b0010 => MemRdData,
            0b0011 => MemRdFwd,
            0b0100 => MemWrFwd,
            0b1000 => MemSpecRd,
            0b1001 => MemInvNt,
            0b1010 => MemClnEvct,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.mem m2s req",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum M2sRwdOpcode {
    MemWr = 0b0001,
    MemWrPtl = 0b0010,
    BiConflict = 0b0100,
}

impl TryFrom<u8> for M2sRwdOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        Ok(match value {
            0b0001 => M2sRwdOpcode::MemWr,
            0b0010 => M2sRwdOpcode::MemWrPtl,
            0b0100 => M2sRwdOpcode::BiConflict,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.mem m2s rwd",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BirspOpcode {
    BirspI = 0b0000,
    BirspS = 0b0001,
    BirspE = 0b0010,
    BirspIBlk = 0b0100,
    BirspSBlk = 0b0101,
    BirspEBlk = 0b0110,
}

impl TryFrom<u8> for BirspOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        use BirspOpcode::*;
        Ok(match value {
            0b0000 => BirspI,
            0b0001 => BirspS,
            0b0010 => BirspE,
            0b0100 => BirspIBlk,
            0b0101 => BirspSBlk,
            0b0110 => BirspEBlk,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.mem m2s birsp",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BisnpOpcode {
    BisnpCur = 0b0000,
    BisnpData = 0b0001,
    BisnpInv = 0b0010,
    BisnpCurBlk = 0b0100,
    BisnpDataBlk = 0b0101,
    BisnpInvBlk = 0b0110,
}

impl TryFrom<u8> for BisnpOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        use BisnpOpcode::*;
        Ok(match value {
            0b0000 => BisnpCur,
            0b0001 => BisnpData,
            0b0010 => BisnpInv,
            0b0100 => BisnpCurBlk,
            0b0101 => BisnpDataBlk,
            0b0110 => BisnpInvBlk,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.mem s2m bisnp",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NdrOpcode {
    Cmp = 0b000,
    CmpS = 0b001,
    CmpE = 0b010,
    CmpM = 0b011,
    BiConflictAck = 0b100,
}

impl TryFrom<u8> for NdrOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        use NdrOpcode::*;
        Ok(match value {
            0b000 => Cmp,
            0b001 => CmpS,
            0b010 => CmpE,
            0b011 => CmpM,
            0b100 => BiConflictAck,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.mem s2m ndr",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrsOpcode {
    MemData = 0b000,
    MemDataNxm = 0b001,
}

impl TryFrom<u8> for DrsOpcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        Ok(match value {
            0b000 => DrsOpcode::MemData,
            0b001 => DrsOpcode::MemDataNxm,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.mem s2m drs",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemM2sReq {
    pub opcode: M2sReqOpcode,
    pub snp_type: u8,
    pub meta_field: u8,
    pub meta_value: u8,
    pub tag: u16,
    pub ld_id: u8,
    pub tc: u8,
    addr: u64,
}

impl MemM2sReq {
    pub fn address(&self) -> u64 {
        self.addr << 6
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemM2sRwd {
    pub opcode: M2sRwdOpcode,
    pub snp_type: u8,
    pub meta_field: u8,
    pub meta_value: u8,
    pub tag: u16,
    pub poison: u8,
    pub bep: u8,
    pub ld_id: u8,
    pub tc: u8,
    addr: u64,
    pub data: [u8; CACHE_LINE_SIZE],
}

impl MemM2sRwd {
    pub fn address(&self) -> u64 {
        self.addr << 6
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemM2sBirsp {
    pub opcode: BirspOpcode,
    pub bi_id: u16,
    pub bi_tag: u16,
    pub low_addr: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemS2mBisnp {
    pub opcode: BisnpOpcode,
    pub bi_id: u16,
    pub bi_tag: u16,
    addr: u64,
}

impl MemS2mBisnp {
    pub fn address(&self) -> u64 {
        self.addr << 6
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemS2mNdr {
    pub opcode: NdrOpcode,
    pub meta_field: u8,
    pub meta_value: u8,
    pub tag: u16,
    pub ld_id: u8,
    pub dev_load: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemS2mDrs {
    pub opcode: DrsOpcode,
    pub meta_field: u8,
    pub meta_value: u8,
    pub tag: u16,
    pub poison: u8,
    pub ld_id: u8,
    pub dev_load: u8,
    pub data: [u8; CACHE_LINE_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemBody {
    M2sReq(MemM2sReq),
    M2sRwd(MemM2sRwd),
    M2sBirsp(MemM2sBirsp),
    S2mBisnp(MemS2mBisnp),
    S2mNdr(MemS2mNdr),
    S2mDrs(MemS2mDrs),
}

/// A complete CXL.mem frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CxlMemPacket {
    pub port_index: u8,
    pub body: MemBody,
}

impl CxlMemPacket {
    pub fn m2s_req(
        opcode: M2sReqOpcode,
        addr: u64,
        tag: u16,
        ld_id: u8,
    ) -> Result<Self, PacketError> {
        if addr % 0x40 != 0 {
            return Err(PacketError::MisalignedAddress(addr));
        }
        Ok(CxlMemPacket {
            port_index: 0,
            body: MemBody::M2sReq(MemM2sReq {
                opcode,
                snp_type: 0,
                meta_field: META_FIELD_NO_OP,
                meta_value: META_VALUE_ANY,
                tag,
                ld_id,
                tc: 0,
                addr: addr >> 6,
            }),
        })
    }

    pub fn mem_rd(addr: u64, ld_id: u8) -> Result<Self, PacketError> {
        Self::m2s_req(M2sReqOpcode::MemRd, addr, 0, ld_id)
    }

    pub fn mem_wr(addr: u64, data: [u8; CACHE_LINE_SIZE], ld_id: u8) -> Result<Self, PacketError> {
        if addr % 0x40 != 0 {
            return Err(PacketError::MisalignedAddress(addr));
        }
        Ok(CxlMemPacket {
            port_index: 0,
            body: MemBody::M2sRwd(MemM2sRwd {
                opcode: M2sRwdOpcode::MemWr,
                snp_type: 0,
                meta_field: META_FIELD_NO_OP,
                meta_value: META_VALUE_ANY,
                tag: 0,
                poison: 0,
                bep: 0,
                ld_id,
                tc: 0,
                addr: addr >> 6,
                data,
            }),
        })
    }

    pub fn birsp(opcode: BirspOpcode, bi_id: u16, bi_tag: u16) -> Self {
        CxlMemPacket {
            port_index: 0,
            body: MemBody::M2sBirsp(MemM2sBirsp {
                opcode,
                bi_id,
                bi_tag,
                low_addr: 0,
            }),
        }
    }

    pub fn bisnp(
        addr: u64,
        opcode: BisnpOpcode,
        bi_id: u16,
        bi_tag: u16,
    ) -> Result<Self, PacketError> {
        if addr % 0x40 != 0 {
            return Err(PacketError::MisalignedAddress(addr));
        }
        Ok(CxlMemPacket {
            port_index: 0,
            body: MemBody::S2mBisnp(MemS2mBisnp {
                opcode,
                bi_id,
                bi_tag,
                addr: addr >> 6,
            }),
        })
    }

    pub fn cmp(opcode: NdrOpcode, tag: u16, ld_id: u8) -> Self {
        CxlMemPacket {
            port_index: 0,
            body: MemBody::S2mNdr(MemS2mNdr {
                opcode,
                meta_field: META_FIELD_NO_OP,
                meta_value: META_VALUE_ANY,
                tag,
                ld_id,
                dev_load: 0,
            }),
        }
    }

    pub fn mem_data(data: [u8; CACHE_LINE_SIZE], tag: u16, ld_id: u8) -> Self {
        CxlMemPacket {
            port_index: 0,
            body: MemBody::S2mDrs(MemS2mDrs {
                opcode: DrsOpcode::MemData,
                meta_field: META_FIELD_NO_OP,
                meta_value: META_VALUE_ANY,
                tag,
                poison: 0,
                ld_id,
                dev_load: 0,
                data,
            }),
        }
    }

    /// Address of a host→target request, when the variant carries one.
    pub fn m2s_address(&self) -> Option<u64> {
        match &self.body {
            MemBody::M2sReq(req) => Some(req.address()),
            MemBody::M2sRwd(rwd) => Some(rwd.address()),
            _ => None,
        }
    }

    /// Rewrites the BI id of an S2M BISnp.
    pub fn set_bisnp_bi_id(&mut self, bi_id: u16) {
        if let MemBody::S2mBisnp(bisnp) = &mut self.body {
            bisnp.bi_id = bi_id;
        }
    }

    pub(crate) fn frame_len(&self) -> usize {
        BASE_LEN
            + match &self.body {
                MemBody::M2sReq(_) => M2S_REQ_LEN,
                MemBody::M2sRwd(_) => M2S_RWD_LEN + CACHE_LINE_SIZE,
                MemBody::M2sBirsp(_) => M2S_BIRSP_LEN,
                MemBody::S2mBisnp(_) => S2M_BISNP_LEN,
                MemBody::S2mNdr(_) => S2M_NDR_LEN,
                MemBody::S2mDrs(_) => S2M_DRS_LEN + CACHE_LINE_SIZE,
            }
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        Envelope::new(PayloadType::CxlMem, self.frame_len()).write(out);
        out.push(self.port_index);
        match &self.body {
            MemBody::M2sReq(req) => {
                out.push(MSG_M2S_REQ);
                let mut buf = [0u8; M2S_REQ_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 4, req.opcode as u64);
                bits::set(&mut buf, 5, 7, req.snp_type as u64);
                bits::set(&mut buf, 8, 9, req.meta_field as u64);
                bits::set(&mut buf, 10, 11, req.meta_value as u64);
                bits::set(&mut buf, 12, 27, req.tag as u64);
                bits::set(&mut buf, 28, 73, req.addr);
                bits::set(&mut buf, 74, 77, req.ld_id as u64);
                bits::set(&mut buf, 98, 99, req.tc as u64);
                out.extend_from_slice(&buf);
            }
            MemBody::M2sRwd(rwd) => {
                out.push(MSG_M2S_RWD);
                let mut buf = [0u8; M2S_RWD_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 4, rwd.opcode as u64);
                bits::set(&mut buf, 5, 7, rwd.snp_type as u64);
                bits::set(&mut buf, 8, 9, rwd.meta_field as u64);
                bits::set(&mut buf, 10, 11, rwd.meta_value as u64);
                bits::set(&mut buf, 12, 27, rwd.tag as u64);
                bits::set(&mut buf, 28, 73, rwd.addr);
                bits::set(&mut buf, 74, 74, rwd.poison as u64);
                bits::set(&mut buf, 75, 75, rwd.bep as u64);
                bits::set(&mut buf, 76, 79, rwd.ld_id as u64);
                bits::set(&mut buf, 102, 103, rwd.tc as u64);
                out.extend_from_slice(&buf);
                out.extend_from_slice(&rwd.data);
            }
            MemBody::M2sBirsp(birsp) => {
                out.push(MSG_M2S_BIRSP);
                let mut buf = [0u8; M2S_BIRSP_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 4, birsp.opcode as u64);
                bits::set(&mut buf, 5, 16, birsp.bi_id as u64);
                bits::set(&mut buf, 17, 28, birsp.bi_tag as u64);
                bits::set(&mut buf, 29, 30, birsp.low_addr as u64);
                out.extend_from_slice(&buf);
            }
            MemBody::S2mBisnp(bisnp) => {
                out.push(MSG_S2M_BISNP);
                let mut buf = [0u8; S2M_BISNP_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 4, bisnp.opcode as u64);
                bits::set(&mut buf, 5, 16, bisnp.bi_id as u64);
                bits::set(&mut buf, 17, 28, bisnp.bi_tag as u64);
                bits::set(&mut buf, 29, 74, bisnp.addr);
                out.extend_from_slice(&buf);
            }
            MemBody::S2mNdr(ndr) => {
                out.push(MSG_S2M_NDR);
                let mut buf = [0u8; S2M_NDR_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 3, ndr.opcode as u64);
                bits::set(&mut buf, 4, 5, ndr.meta_field as u64);
                bits::set(&mut buf, 6, 7, ndr.meta_value as u64);
                bits::set(&mut buf, 8, 23, ndr.tag as u64);
                bits::set(&mut buf, 24, 27, ndr.ld_id as u64);
                bits::set(&mut buf, 28, 29, ndr.dev_load as u64);
                out.extend_from_slice(&buf);
            }
            MemBody::S2mDrs(drs) => {
                out.push(MSG_S2M_DRS);
                let mut buf = [0u8; S2M_DRS_LEN];
                bits::set(&mut buf, 0, 0, 1);
                bits::set(&mut buf, 1, 3, drs.opcode as u64);
                bits::set(&mut buf, 4, 5, drs.meta_field as u64);
                bits::set(&mut buf, 6, 7, drs.meta_value as u64);
                bits::set(&mut buf, 8, 23, drs.tag as u64);
                bits::set(&mut buf, 24, 24, drs.poison as u64);
                bits::set(&mut buf, 25, 28, drs.ld_id as u64);
                bits::set(&mut buf, 29, 30, drs.dev_load as u64);
                out.extend_from_slice(&buf);
                out.extend_from_slice(&drs.data);
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

        let mem_body = match msg_class {
            MSG_M2S_REQ => {
                need(M2S_REQ_LEN)?;
                check_valid(rest, "cxl.mem m2s req")?;
                MemBody::M2sReq(MemM2sReq {
                    opcode: M2sReqOpcode::try_from(bits::get(rest, 1, 4) as u8)?,
                    snp_type: bits::get(rest, 5, 7) as u8,
                    meta_field: bits::get(rest, 8, 9) as u8,
                    meta_value: bits::get(rest, 10, 11) as u8,
                    tag: bits::get(rest, 12, 27) as u16,
                    addr: bits::get(rest, 28, 73),
                    ld_id: bits::get(rest, 74, 77) as u8,
                    tc: bits::get(rest, 98, 99) as u8,
                })
            }
            MSG_M2S_RWD => {
                need(M2S_RWD_LEN + CACHE_LINE_SIZE)?;
                check_valid(rest, "cxl.mem m2s rwd")?;
                MemBody::M2sRwd(MemM2sRwd {
                    opcode: M2sRwdOpcode::try_from(bits::get(rest, 1, 4) as u8)?,
                    snp_type: bits::get(rest, 5, 7) as u8,
                    meta_field: bits::get(rest, 8, 9) as u8,
                    meta_value: bits::get(rest, 10, 11) as u8,
                    tag: bits::get(rest, 12, 27) as u16,
                    addr: bits::get(rest, 28, 73),
                    poison: bits::get(rest, 74, 74) as u8,
                    bep: bits::get(rest, 75, 75) as u8,
                    ld_id: bits::get(rest, 76, 79) as u8,
                    tc: bits::get(rest, 102, 103) as u8,
                    data: rest[M2S_RWD_LEN..M2S_RWD_LEN + CACHE_LINE_SIZE]
                        .try_into()
                        .expect("cache line"),
                })
            }
            MSG_M2S_BIRSP => {
                need(M2S_BIRSP_LEN)?;
                check_valid(rest, "cxl.mem m2s birsp")?;
                MemBody::M2sBirsp(MemM2sBirsp {
                    opcode: BirspOpcode::try_from(bits::get(rest, 1, 4) as u8)?,
                    bi_id: bits::get(rest, 5, 16) as u16,
                    bi_tag: bits::get(rest, 17, 28) as u16,
                    low_addr: bits::get(rest, 29, 30) as u8,
                })
            }
            MSG_S2M_BISNP => {
                need(S2M_BISNP_LEN)?;
                check_valid(rest, "cxl.mem s2m bisnp")?;
                MemBody::S2mBisnp(MemS2mBisnp {
                    opcode: BisnpOpcode::try_from(bits::get(rest, 1, 4) as u8)?,
                    bi_id: bits::get(rest, 5, 16) as u16,
                    bi_tag: bits::get(rest, 17, 28) as u16,
                    addr: bits::get(rest, 29, 74),
                })
            }
            MSG_S2M_NDR => {
                need(S2M_NDR_LEN)?;
                check_valid(rest, "cxl.mem s2m ndr")?;
                MemBody::S2mNdr(MemS2mNdr {
                    opcode: NdrOpcode::try_from(bits::get(rest, 1, 3) as u8)?,
                    meta_field: bits::get(rest, 4, 5) as u8,
                    meta_value: bits::get(rest, 6, 7) as u8,
                    tag: bits::get(rest, 8, 23) as u16,
                    ld_id: bits::get(rest, 24, 27) as u8,
                    dev_load: bits::get(rest, 28, 29) as u8,
                })
            }
            MSG_S2M_DRS => {
                need(S2M_DRS_LEN + CACHE_LINE_SIZE)?;
                check_valid(rest, "cxl.mem s2m drs")?;
                MemBody::S2mDrs(MemS2mDrs {
                    opcode: DrsOpcode::try_from(bits::get(rest, 1, 3) as u8)?,
                    meta_field: bits::get(rest, 4, 5) as u8,
                    meta_value: bits::get(rest, 6, 7) as u8,
                    tag: bits::get(rest, 8, 23) as u16,
                    poison: bits::get(rest, 24, 24) as u8,
                    ld_id: bits::get(rest, 25, 28) as u8,
                    dev_load: bits::get(rest, 29, 30) as u8,
                    data: rest[S2M_DRS_LEN..S2M_DRS_LEN + CACHE_LINE_SIZE]
                        .try_into()
                        .expect("cache line"),
                })
            }
            other => {
                return Err(PacketError::UnknownMsgClass {
                    family: "cxl.mem",
                    value: other,
                })
            }
        };

        Ok(CxlMemPacket {
            port_index,
            body: mem_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Packet;

    #[test]
    fn variants_round_trip() {
        let line = [0xA5u8; CACHE_LINE_SIZE];
        let packets = [
            CxlMemPacket::mem_rd(0x4000, 2).unwrap(),
            CxlMemPacket::mem_wr(0x8040, line, 0).unwrap(),
            CxlMemPacket::birsp(BirspOpcode::BirspI, 1, 0x123),
            CxlMemPacket::bisnp(0x40, BisnpOpcode::BisnpInv, 0, 0x456).unwrap(),
            CxlMemPacket::cmp(NdrOpcode::Cmp, 0x789, 1),
            CxlMemPacket::mem_data(line, 0x789, 1),
        ];
        for packet in packets {
            let encoded = Packet::Mem(packet.clone()).encode();
            assert_eq!(encoded.len(), packet.frame_len());
            assert_eq!(Packet::decode(&encoded).unwrap(), Packet::Mem(packet));
        }
    }

    #[test]
    fn misaligned_address_is_rejected() {
        assert_eq!(
            CxlMemPacket::mem_rd(0x4020 | 0x4, 0),
            Err(PacketError::MisalignedAddress(0x4024))
        );
        assert_eq!(
            CxlMemPacket::bisnp(0x41, BisnpOpcode::BisnpCur, 0, 0),
            Err(PacketError::MisalignedAddress(0x41))
        );
    }

    #[test]
    fn request_address_survives_the_shift() {
        let packet = CxlMemPacket::mem_rd(0x1_0000_0040, 0).unwrap();
        assert_eq!(packet.m2s_address(), Some(0x1_0000_0040));
    }

    #[test]
    fn reserved_opcode_fails_decode() {
        let mut encoded = Packet::Mem(CxlMemPacket::mem_rd(0x4000, 0).unwrap()).encode();
        // Overwrite the 4-bit opcode field (bits 1..4 of the typed header)
        // with a reserved value.
        encoded[5] = (encoded[5] & !0b1_1110) | (0b1111 << 1);
        assert!(matches!(
            Packet::decode(&encoded),
            Err(PacketError::ReservedOpcode { .. })
        ));
    }
}
