//! CXL.io frames: PCIe-style configuration, MMIO, and completion TLPs.
//!
//! Frame shape: envelope, 4-byte TLP prefix, 4-byte TLP header, then the
//! typed request/completion header and (for write/CplD) a data block. The
//! 16-bit identifier fields (requester, completer, destination) are stored
//! in TLP byte order; accessors convert to host order.

use crate::bdf::{from_tlp16, to_tlp16, Bdf};
use crate::bits;
use crate::envelope::{Envelope, PayloadType, ENVELOPE_LEN};
use crate::PacketError;

const PREFIX_LEN: usize = 4;
const HEADER_LEN: usize = 4;
const MEM_REQ_LEN: usize = 12;
const CFG_REQ_LEN: usize = 8;
const CPL_LEN: usize = 8;

const BASE_LEN: usize = ENVELOPE_LEN + PREFIX_LEN + HEADER_LEN;

/// TLP `fmt_type` values understood by the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FmtType {
    MemRd32 = 0b0000_0000,
    MemRd64 = 0b0010_0000,
    MemWr32 = 0b0100_0000,
    MemWr64 = 0b0110_0000,
    CfgRd0 = 0b0000_0100,
    CfgWr0 = 0b0100_0100,
    CfgRd1 = 0b0000_0101,
    CfgWr1 = 0b0100_0101,
    Cpl = 0b0000_1010,
    CplD = 0b0100_1010,
}

impl TryFrom<u8> for FmtType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        use FmtType::*;
        Ok(match value {
            0b0000_0000 => MemRd32,
            0b0010_0000 => MemRd64,
            0b0100_0000 => MemWr32,
            0b0110_0000 => MemWr64,
            0b0000_0100 => CfgRd0,
            0b0100_0100 => CfgWr0,
            0b0000_0101 => CfgRd1,
            0b0100_0101 => CfgWr1,
            0b0000_1010 => Cpl,
            0b0100_1010 => CplD,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.io fmt_type",
                    value: other,
                })
            }
        })
    }
}

/// Completion status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CplStatus {
    SuccessfulCompletion = 0b000,
    UnsupportedRequest = 0b001,
    RequestRetryStatus = 0b010,
    CompleterAbort = 0b100,
}

impl TryFrom<u8> for CplStatus {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        Ok(match value {
            0b000 => CplStatus::SuccessfulCompletion,
            0b001 => CplStatus::UnsupportedRequest,
            0b010 => CplStatus::RequestRetryStatus,
            0b100 => CplStatus::CompleterAbort,
            other => {
                return Err(PacketError::ReservedOpcode {
                    family: "cxl.io cpl status",
                    value: other,
                })
            }
        })
    }
}

/// CXL TLP prefix carrying the logical device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlpPrefix {
    pub pcie_base_spec_defined: u8,
    pub ld_id: u16,
}

impl TlpPrefix {
    fn encode_into(&self, out: &mut Vec<u8>) {
        let ld = self.ld_id.to_le_bytes();
        out.extend_from_slice(&[self.pcie_base_spec_defined, ld[0], ld[1], 0]);
    }

    fn decode(buf: &[u8]) -> Self {
        TlpPrefix {
            pcie_base_spec_defined: buf[0],
            ld_id: u16::from_le_bytes([buf[1], buf[2]]),
        }
    }
}

/// The common 4-byte TLP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoHeader {
    pub fmt_type: FmtType,
    pub th: u8,
    pub attr_b2: u8,
    pub t8: u8,
    pub tc: u8,
    pub t9: u8,
    pub at: u8,
    pub attr: u8,
    pub ep: u8,
    pub td: u8,
    /// Payload length in dwords (10 bits on the wire, split upper/lower).
    pub length: u16,
}

impl IoHeader {
    fn new(fmt_type: FmtType, length_dwords: u16) -> Self {
        IoHeader {
            fmt_type,
            th: 0,
            attr_b2: 0,
            t8: 0,
            tc: 0,
            t9: 0,
            at: 0,
            attr: 0,
            ep: 0,
            td: 0,
            length: length_dwords & 0x3FF,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; HEADER_LEN];
        bits::set(&mut buf, 0, 7, self.fmt_type as u64);
        bits::set(&mut buf, 8, 8, self.th as u64);
        bits::set(&mut buf, 10, 10, self.attr_b2 as u64);
        bits::set(&mut buf, 11, 11, self.t8 as u64);
        bits::set(&mut buf, 12, 14, self.tc as u64);
        bits::set(&mut buf, 15, 15, self.t9 as u64);
        bits::set(&mut buf, 16, 17, (self.length >> 8) as u64);
        bits::set(&mut buf, 18, 19, self.at as u64);
        bits::set(&mut buf, 20, 21, self.attr as u64);
        bits::set(&mut buf, 22, 22, self.ep as u64);
        bits::set(&mut buf, 23, 23, self.td as u64);
        bits::set(&mut buf, 24, 31, (self.length & 0xFF) as u64);
        out.extend_from_slice(&buf);
    }

    fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let fmt_type = FmtType::try_from(bits::get(buf, 0, 7) as u8)?;
        let length_upper = bits::get(buf, 16, 17) as u16;
        let length_lower = bits::get(buf, 24, 31) as u16;
        Ok(IoHeader {
            fmt_type,
            th: bits::get(buf, 8, 8) as u8,
            attr_b2: bits::get(buf, 10, 10) as u8,
            t8: bits::get(buf, 11, 11) as u8,
            tc: bits::get(buf, 12, 14) as u8,
            t9: bits::get(buf, 15, 15) as u8,
            at: bits::get(buf, 18, 19) as u8,
            attr: bits::get(buf, 20, 21) as u8,
            ep: bits::get(buf, 22, 22) as u8,
            td: bits::get(buf, 23, 23) as u8,
            length: (length_upper << 8) | length_lower,
        })
    }
}

/// Memory request header (MRd/MWr, 64-bit address format).
///
/// The 64-bit address spans two fields: `addr_upper` holds the upper 56 bits
/// reinterpreted through big-endian byte order, `addr_lower` holds bits 7:2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoMemReq {
    req_id: u16,
    pub tag: u8,
    pub first_dw_be: u8,
    pub last_dw_be: u8,
    addr_upper: u64,
    addr_lower: u8,
}

impl IoMemReq {
    fn fill(addr: u64, len: usize, req_id: u16, tag: u8) -> (Self, u16) {
        debug_assert!(len > 0 && len < 64);
        let offset = (addr % 4) as usize;
        let dwords = ((offset + len + 3) / 4) as u16;

        let enabled: u64 = (1u64 << len) - 1;
        let shifted = enabled << offset;
        let first_dw_be = (shifted & 0xF) as u8;
        let last_dw_be = if dwords > 1 {
            ((shifted >> ((dwords as usize - 1) * 4)) & 0xF) as u8
        } else {
            0
        };

        let (addr_upper, addr_lower) = encode_mem_addr(addr);
        (
            IoMemReq {
                req_id: to_tlp16(req_id),
                tag,
                first_dw_be,
                last_dw_be,
                addr_upper,
                addr_lower,
            },
            dwords,
        )
    }

    pub fn req_id(&self) -> u16 {
        from_tlp16(self.req_id)
    }

    pub fn set_req_id(&mut self, req_id: u16) {
        self.req_id = to_tlp16(req_id);
    }

    /// Dword-aligned request address.
    pub fn address(&self) -> u64 {
        decode_mem_addr(self.addr_upper, self.addr_lower)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; MEM_REQ_LEN];
        bits::set(&mut buf, 0, 15, self.req_id as u64);
        bits::set(&mut buf, 16, 23, self.tag as u64);
        bits::set(&mut buf, 24, 27, self.first_dw_be as u64);
        bits::set(&mut buf, 28, 31, self.last_dw_be as u64);
        bits::set(&mut buf, 32, 87, self.addr_upper);
        bits::set(&mut buf, 90, 95, self.addr_lower as u64);
        out.extend_from_slice(&buf);
    }

    fn decode(buf: &[u8]) -> Self {
        IoMemReq {
            req_id: bits::get(buf, 0, 15) as u16,
            tag: bits::get(buf, 16, 23) as u8,
            first_dw_be: bits::get(buf, 24, 27) as u8,
            last_dw_be: bits::get(buf, 28, 31) as u8,
            addr_upper: bits::get(buf, 32, 87),
            addr_lower: bits::get(buf, 90, 95) as u8,
        }
    }
}

fn encode_mem_addr(addr: u64) -> (u64, u8) {
    let upper_be = (addr >> 8).to_be_bytes();
    let mut le = [0u8; 8];
    le[..7].copy_from_slice(&upper_be[1..8]);
    (u64::from_le_bytes(le), ((addr & 0xFF) >> 2) as u8)
}

fn decode_mem_addr(upper: u64, lower: u8) -> u64 {
    let le = upper.to_le_bytes();
    let mut be = [0u8; 8];
    be[1..8].copy_from_slice(&le[..7]);
    (u64::from_be_bytes(be) << 8) | ((lower as u64) << 2)
}

/// Configuration request header (CfgRd/CfgWr).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCfgReq {
    req_id: u16,
    pub tag: u8,
    pub first_dw_be: u8,
    pub last_dw_be: u8,
    dest_id: u16,
    pub ext_reg_num: u8,
    pub reg_num: u8,
}

impl IoCfgReq {
    fn fill(bdf: Bdf, cfg_addr: u32, size: usize, req_id: u16, tag: u8) -> Result<Self, PacketError> {
        if cfg_addr > 0xFFF {
            return Err(PacketError::InvalidConfigAddress(cfg_addr));
        }
        let offset = (cfg_addr & 0x3) as usize;
        if offset + size > 4 || size == 0 {
            return Err(PacketError::InvalidConfigAccess {
                offset: cfg_addr,
                size,
            });
        }
        let first_dw_be = (((1u8 << size) - 1) << offset) & 0xF;
        Ok(IoCfgReq {
            req_id: to_tlp16(req_id),
            tag,
            first_dw_be,
            last_dw_be: 0,
            dest_id: to_tlp16(bdf.0),
            ext_reg_num: ((cfg_addr >> 8) & 0xF) as u8,
            reg_num: ((cfg_addr >> 2) & 0x3F) as u8,
        })
    }

    pub fn req_id(&self) -> u16 {
        from_tlp16(self.req_id)
    }

    pub fn set_req_id(&mut self, req_id: u16) {
        self.req_id = to_tlp16(req_id);
    }

    pub fn bdf(&self) -> Bdf {
        Bdf(from_tlp16(self.dest_id))
    }

    /// Register offset and size for a read: full-dword granularity.
    pub fn read_info(&self) -> (u32, usize) {
        let reg = ((self.ext_reg_num as u32) << 6) | self.reg_num as u32;
        (reg << 2, 4)
    }

    /// Register offset and size recovered from the byte enables of a write.
    pub fn write_info(&self) -> (u32, usize) {
        let reg = ((self.ext_reg_num as u32) << 6) | self.reg_num as u32;
        let be = self.first_dw_be;
        let pos = be.trailing_zeros();
        ((reg << 2) + pos, be.count_ones() as usize)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; CFG_REQ_LEN];
        bits::set(&mut buf, 0, 15, self.req_id as u64);
        bits::set(&mut buf, 16, 23, self.tag as u64);
        bits::set(&mut buf, 24, 27, self.first_dw_be as u64);
        bits::set(&mut buf, 28, 31, self.last_dw_be as u64);
        bits::set(&mut buf, 32, 47, self.dest_id as u64);
        bits::set(&mut buf, 48, 51, self.ext_reg_num as u64);
        bits::set(&mut buf, 58, 63, self.reg_num as u64);
        out.extend_from_slice(&buf);
    }

    fn decode(buf: &[u8]) -> Self {
        IoCfgReq {
            req_id: bits::get(buf, 0, 15) as u16,
            tag: bits::get(buf, 16, 23) as u8,
            first_dw_be: bits::get(buf, 24, 27) as u8,
            last_dw_be: bits::get(buf, 28, 31) as u8,
            dest_id: bits::get(buf, 32, 47) as u16,
            ext_reg_num: bits::get(buf, 48, 51) as u8,
            reg_num: bits::get(buf, 58, 63) as u8,
        }
    }
}

/// Completion header (Cpl/CplD).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCompletion {
    cpl_id: u16,
    pub bcm: u8,
    pub status: CplStatus,
    byte_count: u16,
    req_id: u16,
    pub tag: u8,
    pub lower_addr: u8,
}

impl IoCompletion {
    pub fn req_id(&self) -> u16 {
        from_tlp16(self.req_id)
    }

    pub fn set_req_id(&mut self, req_id: u16) {
        self.req_id = to_tlp16(req_id);
    }

    pub fn cpl_id(&self) -> u16 {
        from_tlp16(self.cpl_id)
    }

    pub fn byte_count(&self) -> u16 {
        self.byte_count
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; CPL_LEN];
        bits::set(&mut buf, 0, 15, self.cpl_id as u64);
        bits::set(&mut buf, 16, 19, (self.byte_count >> 8) as u64);
        bits::set(&mut buf, 20, 20, self.bcm as u64);
        bits::set(&mut buf, 21, 23, self.status as u64);
        bits::set(&mut buf, 24, 31, (self.byte_count & 0xFF) as u64);
        bits::set(&mut buf, 32, 47, self.req_id as u64);
        bits::set(&mut buf, 48, 55, self.tag as u64);
        bits::set(&mut buf, 56, 62, self.lower_addr as u64);
        out.extend_from_slice(&buf);
    }

    fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let status = CplStatus::try_from(bits::get(buf, 21, 23) as u8)?;
        let byte_count_upper = bits::get(buf, 16, 19) as u16;
        let byte_count_lower = bits::get(buf, 24, 31) as u16;
        Ok(IoCompletion {
            cpl_id: bits::get(buf, 0, 15) as u16,
            bcm: bits::get(buf, 20, 20) as u8,
            status,
            byte_count: (byte_count_upper << 8) | byte_count_lower,
            req_id: bits::get(buf, 32, 47) as u16,
            tag: bits::get(buf, 48, 55) as u8,
            lower_addr: bits::get(buf, 56, 62) as u8,
        })
    }
}

/// Typed body of a CXL.io frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoBody {
    MemRd(IoMemReq),
    MemWr(IoMemReq, Vec<u8>),
    CfgRd(IoCfgReq),
    CfgWr(IoCfgReq, u32),
    Cpl(IoCompletion),
    CplD(IoCompletion, Vec<u8>),
}

/// A complete CXL.io frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CxlIoPacket {
    pub tlp_prefix: TlpPrefix,
    pub header: IoHeader,
    pub body: IoBody,
}

impl CxlIoPacket {
    pub fn mem_rd(addr: u64, len: usize, req_id: u16, tag: u8, ld_id: u16) -> Self {
        let (mreq, dwords) = IoMemReq::fill(addr, len, req_id, tag);
        CxlIoPacket {
            tlp_prefix: TlpPrefix {
                pcie_base_spec_defined: 0,
                ld_id,
            },
            header: IoHeader::new(FmtType::MemRd64, dwords),
            body: IoBody::MemRd(mreq),
        }
    }

    pub fn mem_wr(addr: u64, data: Vec<u8>, req_id: u16, tag: u8, ld_id: u16) -> Self {
        let (mreq, dwords) = IoMemReq::fill(addr, data.len(), req_id, tag);
        CxlIoPacket {
            tlp_prefix: TlpPrefix {
                pcie_base_spec_defined: 0,
                ld_id,
            },
            header: IoHeader::new(FmtType::MemWr64, dwords),
            body: IoBody::MemWr(mreq, data),
        }
    }

    pub fn cfg_rd(
        bdf: Bdf,
        cfg_addr: u32,
        size: usize,
        type0: bool,
        req_id: u16,
        tag: u8,
        ld_id: u16,
    ) -> Result<Self, PacketError> {
        let cfg = IoCfgReq::fill(bdf, cfg_addr, size, req_id, tag)?;
        let fmt_type = if type0 { FmtType::CfgRd0 } else { FmtType::CfgRd1 };
        Ok(CxlIoPacket {
            tlp_prefix: TlpPrefix {
                pcie_base_spec_defined: 0,
                ld_id,
            },
            header: IoHeader::new(fmt_type, 1),
            body: IoBody::CfgRd(cfg),
        })
    }

    pub fn cfg_wr(
        bdf: Bdf,
        cfg_addr: u32,
        size: usize,
        value: u32,
        type0: bool,
        req_id: u16,
        tag: u8,
        ld_id: u16,
    ) -> Result<Self, PacketError> {
        let cfg = IoCfgReq::fill(bdf, cfg_addr, size, req_id, tag)?;
        let fmt_type = if type0 { FmtType::CfgWr0 } else { FmtType::CfgWr1 };
        let offset = cfg_addr % 4;
        Ok(CxlIoPacket {
            tlp_prefix: TlpPrefix {
                pcie_base_spec_defined: 0,
                ld_id,
            },
            header: IoHeader::new(fmt_type, 1),
            body: IoBody::CfgWr(cfg, value << (8 * offset)),
        })
    }

    pub fn completion(req_id: u16, tag: u8, status: CplStatus, ld_id: u16) -> Self {
        CxlIoPacket {
            tlp_prefix: TlpPrefix {
                pcie_base_spec_defined: 0,
                ld_id,
            },
            header: IoHeader::new(FmtType::Cpl, 0),
            body: IoBody::Cpl(IoCompletion {
                cpl_id: 0,
                bcm: 0,
                status,
                byte_count: 4,
                req_id: to_tlp16(req_id),
                tag,
                lower_addr: 0,
            }),
        }
    }

    pub fn completion_with_data(
        req_id: u16,
        tag: u8,
        data: Vec<u8>,
        status: CplStatus,
        ld_id: u16,
    ) -> Self {
        let byte_count = data.len() as u16;
        CxlIoPacket {
            tlp_prefix: TlpPrefix {
                pcie_base_spec_defined: 0,
                ld_id,
            },
            header: IoHeader::new(FmtType::CplD, byte_count / 4),
            body: IoBody::CplD(
                IoCompletion {
                    cpl_id: 0,
                    bcm: 0,
                    status,
                    byte_count,
                    req_id: to_tlp16(req_id),
                    tag,
                    lower_addr: 0,
                },
                data,
            ),
        }
    }

    pub fn is_cfg(&self) -> bool {
        matches!(self.body, IoBody::CfgRd(_) | IoBody::CfgWr(..))
    }

    pub fn is_mmio(&self) -> bool {
        matches!(self.body, IoBody::MemRd(_) | IoBody::MemWr(..))
    }

    pub fn is_completion(&self) -> bool {
        matches!(self.body, IoBody::Cpl(_) | IoBody::CplD(..))
    }

    pub fn is_cfg_type0(&self) -> bool {
        matches!(self.header.fmt_type, FmtType::CfgRd0 | FmtType::CfgWr0)
    }

    /// Data transfer size in bytes, from the dword count in the TLP header.
    pub fn data_size(&self) -> usize {
        self.header.length as usize * 4
    }

    pub(crate) fn frame_len(&self) -> usize {
        match &self.body {
            IoBody::MemRd(_) => BASE_LEN + MEM_REQ_LEN,
            IoBody::MemWr(_, data) => BASE_LEN + MEM_REQ_LEN + data.len(),
            IoBody::CfgRd(_) => BASE_LEN + CFG_REQ_LEN,
            IoBody::CfgWr(..) => BASE_LEN + CFG_REQ_LEN + 4,
            IoBody::Cpl(_) => BASE_LEN + CPL_LEN,
            IoBody::CplD(_, data) => BASE_LEN + CPL_LEN + data.len(),
        }
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        Envelope::new(PayloadType::CxlIo, self.frame_len()).write(out);
        self.tlp_prefix.encode_into(out);
        self.header.encode_into(out);
        match &self.body {
            IoBody::MemRd(mreq) => mreq.encode_into(out),
            IoBody::MemWr(mreq, data) => {
                mreq.encode_into(out);
                out.extend_from_slice(data);
            }
            IoBody::CfgRd(cfg) => cfg.encode_into(out),
            IoBody::CfgWr(cfg, value) => {
                cfg.encode_into(out);
                out.extend_from_slice(&value.to_le_bytes());
            }
            IoBody::Cpl(cpl) => cpl.encode_into(out),
            IoBody::CplD(cpl, data) => {
                cpl.encode_into(out);
                out.extend_from_slice(data);
            }
        }
    }

    /// Decodes the bytes following the envelope.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self, PacketError> {
        let fixed = PREFIX_LEN + HEADER_LEN;
        if body.len() < fixed {
            return Err(PacketError::Truncated {
                needed: fixed,
                have: body.len(),
            });
        }
        let tlp_prefix = TlpPrefix::decode(&body[..PREFIX_LEN]);
        let header = IoHeader::decode(&body[PREFIX_LEN..fixed])?;
        let rest = &body[fixed..];

        let need = |n: usize| -> Result<(), PacketError> {
            if rest.len() < n {
                Err(PacketError::Truncated {
                    needed: fixed + n,
                    have: body.len(),
                })
            } else {
                Ok(())
            }
        };

        let io_body = match header.fmt_type {
            FmtType::MemRd32 | FmtType::MemRd64 => {
                need(MEM_REQ_LEN)?;
                IoBody::MemRd(IoMemReq::decode(rest))
            }
            FmtType::MemWr32 | FmtType::MemWr64 => {
                need(MEM_REQ_LEN)?;
                IoBody::MemWr(IoMemReq::decode(rest), rest[MEM_REQ_LEN..].to_vec())
            }
            FmtType::CfgRd0 | FmtType::CfgRd1 => {
                need(CFG_REQ_LEN)?;
                IoBody::CfgRd(IoCfgReq::decode(rest))
            }
            FmtType::CfgWr0 | FmtType::CfgWr1 => {
                need(CFG_REQ_LEN + 4)?;
                let value = u32::from_le_bytes(
                    rest[CFG_REQ_LEN..CFG_REQ_LEN + 4].try_into().expect("4 bytes"),
                );
                IoBody::CfgWr(IoCfgReq::decode(rest), value)
            }
            FmtType::Cpl => {
                need(CPL_LEN)?;
                IoBody::Cpl(IoCompletion::decode(rest)?)
            }
            FmtType::CplD => {
                need(CPL_LEN)?;
                IoBody::CplD(IoCompletion::decode(rest)?, rest[CPL_LEN..].to_vec())
            }
        };

        Ok(CxlIoPacket {
            tlp_prefix,
            header,
            body: io_body,
        })
    }
}

/// Recovers the written value from a CfgWr body, honouring the byte enables.
pub fn cfg_wr_value(cfg: &IoCfgReq, raw: u32) -> u32 {
    let (addr, size) = cfg.write_info();
    let shift = (addr % 4) * 8;
    let mask = if size == 4 { u32::MAX } else { (1u32 << (size * 8)) - 1 };
    (raw >> shift) & mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Packet;

    #[test]
    fn mem_req_address_round_trips() {
        for (addr, len) in [(0x1234_5678u64, 4usize), (0xDEAD_BEEF, 8), (0xCAFE_BABE, 12)] {
            let packet = CxlIoPacket::mem_rd(addr, len, 0, 0x10, 0);
            let IoBody::MemRd(mreq) = &packet.body else {
                panic!("expected MemRd");
            };
            assert_eq!(mreq.address(), (addr / 4) * 4);
        }
    }

    #[test]
    fn cfg_wr_round_trips_value() {
        let packet =
            CxlIoPacket::cfg_wr(Bdf::new(1, 0, 0), 0x10, 4, 0xDEAD_BEEF, true, 0, 0x5, 0).unwrap();
        let IoBody::CfgWr(cfg, raw) = &packet.body else {
            panic!("expected CfgWr");
        };
        assert_eq!(cfg.bdf(), Bdf::new(1, 0, 0));
        assert_eq!(cfg.write_info(), (0x10, 4));
        assert_eq!(cfg_wr_value(cfg, *raw), 0xDEAD_BEEF);
        assert_eq!(cfg.tag, 0x5);
    }

    #[test]
    fn sub_dword_cfg_wr_places_byte_enables() {
        let packet =
            CxlIoPacket::cfg_wr(Bdf::new(0, 0, 0), 0x11, 2, 0xABCD, true, 0, 0, 0).unwrap();
        let IoBody::CfgWr(cfg, raw) = &packet.body else {
            panic!("expected CfgWr");
        };
        assert_eq!(cfg.first_dw_be, 0b0110);
        assert_eq!(cfg.write_info(), (0x11, 2));
        assert_eq!(cfg_wr_value(cfg, *raw), 0xABCD);
    }

    #[test]
    fn cfg_access_must_not_cross_dword() {
        assert!(matches!(
            CxlIoPacket::cfg_rd(Bdf::new(0, 0, 0), 0x13, 2, true, 0, 0, 0),
            Err(PacketError::InvalidConfigAccess { .. })
        ));
        assert!(matches!(
            CxlIoPacket::cfg_rd(Bdf::new(0, 0, 0), 0x1000, 4, true, 0, 0, 0),
            Err(PacketError::InvalidConfigAddress(_))
        ));
    }

    #[test]
    fn io_variants_round_trip() {
        let packets = [
            CxlIoPacket::mem_rd(0xBAAD_0000, 4, 0x100, 0x7, 0),
            CxlIoPacket::mem_wr(0x8000_0000, vec![0xAA; 8], 0x100, 0x8, 1),
            CxlIoPacket::cfg_rd(Bdf::new(1, 2, 3), 0x44, 4, false, 0, 0x9, 0).unwrap(),
            CxlIoPacket::cfg_wr(Bdf::new(1, 0, 0), 0x10, 4, 0xDEAD_BEEF, true, 0, 0x5, 0).unwrap(),
            CxlIoPacket::completion(0x100, 0x5, CplStatus::UnsupportedRequest, 0),
            CxlIoPacket::completion_with_data(
                0x100,
                0x6,
                vec![0, 0, 0, 0],
                CplStatus::SuccessfulCompletion,
                0,
            ),
        ];
        for packet in packets {
            let encoded = Packet::Io(packet.clone()).encode();
            assert_eq!(encoded.len(), packet.frame_len());
            assert_eq!(Packet::decode(&encoded).unwrap(), Packet::Io(packet));
        }
    }

    #[test]
    fn completion_echoes_request_identity() {
        let packet = CxlIoPacket::completion(0x42, 0x5, CplStatus::UnsupportedRequest, 0);
        let IoBody::Cpl(cpl) = &packet.body else {
            panic!("expected Cpl");
        };
        assert_eq!(cpl.req_id(), 0x42);
        assert_eq!(cpl.tag, 0x5);
        assert_eq!(cpl.status, CplStatus::UnsupportedRequest);
    }
}
