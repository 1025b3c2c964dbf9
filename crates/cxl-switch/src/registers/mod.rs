//! Register images owned by ports and vPPBs.
//!
//! Hosts program these through configuration transactions; routers read them
//! when resolving a target. Decoder commits are the only transactional
//! operation: writing the commit bit validates the staged programming and
//! flips exactly one of `committed` / `error_not_committed`.

pub mod bi;
pub mod cache_id;
pub mod hdm;
pub mod pci;

use bi::{BiDecoder, BiRouteTable};
use cache_id::{CacheIdDecoder, CacheRouteTable};
use hdm::HdmDecoderSet;
use pci::BridgeRegisters;

/// Dword offsets of the CXL capability block in extended config space.
mod layout {
    pub const HDM_CAPS: u32 = 0x100;
    pub const HDM_ENTRY_BASE: u32 = 0x110;
    pub const HDM_ENTRY_STRIDE: u32 = 0x20;
    pub const BI_CONTROL: u32 = 0x200;
    pub const BI_STATUS: u32 = 0x204;
    pub const CACHE_ID_CONTROL: u32 = 0x210;
    pub const CACHE_ID_STATUS: u32 = 0x214;
    pub const CACHE_ROUTE_BASE: u32 = 0x220;
    pub const BI_ROUTE_BASE: u32 = 0x260;
}

/// Registers of one downstream vPPB.
#[derive(Debug)]
pub struct VppbRegisters {
    pub bridge: BridgeRegisters,
    pub hdm: HdmDecoderSet,
    pub bi_decoder: BiDecoder,
    pub cache_id: CacheIdDecoder,
}

impl VppbRegisters {
    pub fn new() -> Self {
        VppbRegisters {
            bridge: BridgeRegisters::new(),
            hdm: HdmDecoderSet::new(false),
            bi_decoder: BiDecoder::default(),
            cache_id: CacheIdDecoder::default(),
        }
    }

    pub fn cfg_read(&self, offset: u32) -> u32 {
        match offset {
            0..=0xFF => self.bridge.read32(offset),
            _ => read_capability_block(
                offset,
                &self.hdm,
                Some(&self.bi_decoder),
                Some(&self.cache_id),
                None,
            ),
        }
    }

    pub fn cfg_write(&mut self, offset: u32, size: usize, value: u32) {
        match offset {
            0..=0xFF => self.bridge.write(offset, size, value),
            _ => write_capability_block(
                offset,
                value,
                &mut self.hdm,
                Some(&mut self.bi_decoder),
                Some(&mut self.cache_id),
                None,
            ),
        }
    }
}

impl Default for VppbRegisters {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers of the VCS upstream side (the USP bridge image plus the
/// switch-level route tables).
#[derive(Debug)]
pub struct UpstreamRegisters {
    pub bridge: BridgeRegisters,
    pub hdm: HdmDecoderSet,
    pub bi_route_table: BiRouteTable,
    pub cache_route_table: CacheRouteTable,
}

impl UpstreamRegisters {
    pub fn new() -> Self {
        UpstreamRegisters {
            bridge: BridgeRegisters::new(),
            // The switch upstream decoder is BI-capable.
            hdm: HdmDecoderSet::new(true),
            bi_route_table: BiRouteTable::default(),
            cache_route_table: CacheRouteTable::default(),
        }
    }

    pub fn cfg_read(&self, offset: u32) -> u32 {
        use layout::BI_ROUTE_BASE;
        match offset {
            0..=0xFF => self.bridge.read32(offset),
            o if o >= BI_ROUTE_BASE => self
                .bi_route_table
                .entry_read(((o - BI_ROUTE_BASE) / 4) as usize),
            _ => read_capability_block(offset, &self.hdm, None, None, Some(&self.cache_route_table)),
        }
    }

    pub fn cfg_write(&mut self, offset: u32, size: usize, value: u32) {
        use layout::BI_ROUTE_BASE;
        match offset {
            0..=0xFF => self.bridge.write(offset, size, value),
            o if o >= BI_ROUTE_BASE => self
                .bi_route_table
                .entry_write(((o - BI_ROUTE_BASE) / 4) as usize, value),
            _ => write_capability_block(
                offset,
                value,
                &mut self.hdm,
                None,
                None,
                Some(&mut self.cache_route_table),
            ),
        }
    }
}

impl Default for UpstreamRegisters {
    fn default() -> Self {
        Self::new()
    }
}

fn read_capability_block(
    offset: u32,
    hdm: &HdmDecoderSet,
    bi: Option<&BiDecoder>,
    cache_id: Option<&CacheIdDecoder>,
    cache_route: Option<&CacheRouteTable>,
) -> u32 {
    use layout::*;
    match offset {
        HDM_CAPS => hdm.caps_register(),
        o if (HDM_ENTRY_BASE..BI_CONTROL).contains(&o) => {
            let index = ((o - HDM_ENTRY_BASE) / HDM_ENTRY_STRIDE) as usize;
            let word = (o - HDM_ENTRY_BASE) % HDM_ENTRY_STRIDE;
            hdm.entry_read(index, word)
        }
        BI_CONTROL => bi.map_or(0, |b| b.control_register()),
        BI_STATUS => bi.map_or(0, |b| b.status_register()),
        CACHE_ID_CONTROL => cache_id.map_or(0, |c| c.control_register()),
        CACHE_ID_STATUS => cache_id.map_or(0, |c| c.status_register()),
        o if o >= CACHE_ROUTE_BASE => {
            let index = ((o - CACHE_ROUTE_BASE) / 4) as usize;
            cache_route.map_or(0, |t| t.entry_read(index))
        }
        _ => 0,
    }
}

fn write_capability_block(
    offset: u32,
    value: u32,
    hdm: &mut HdmDecoderSet,
    bi: Option<&mut BiDecoder>,
    cache_id: Option<&mut CacheIdDecoder>,
    cache_route: Option<&mut CacheRouteTable>,
) {
    use layout::*;
    match offset {
        o if (HDM_ENTRY_BASE..BI_CONTROL).contains(&o) => {
            let index = ((o - HDM_ENTRY_BASE) / HDM_ENTRY_STRIDE) as usize;
            let word = (o - HDM_ENTRY_BASE) % HDM_ENTRY_STRIDE;
            hdm.entry_write(index, word, value);
        }
        BI_CONTROL => {
            if let Some(bi) = bi {
                bi.control_write(value);
            }
        }
        CACHE_ID_CONTROL => {
            if let Some(cache_id) = cache_id {
                cache_id.control_write(value);
            }
        }
        o if o >= CACHE_ROUTE_BASE => {
            if let Some(table) = cache_route {
                table.entry_write(((o - CACHE_ROUTE_BASE) / 4) as usize, value);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdm_entry_programs_through_config_space() {
        let mut regs = VppbRegisters::new();
        let base = layout::HDM_ENTRY_BASE;
        regs.cfg_write(base, 4, 0x0000_0000); // base lo
        regs.cfg_write(base + 4, 4, 0x1); // base hi
        regs.cfg_write(base + 8, 4, 0x1000_0000); // size lo
        regs.cfg_write(base + 0xC, 4, 0);
        regs.cfg_write(base + 0x10, 4, 0x0000_0102); // target 2, commit
        assert_ne!(regs.cfg_read(base + 0x10) & hdm::CONTROL_COMMITTED, 0);
        assert_eq!(regs.hdm.target(0x1_0000_0040), Some(2));
    }

    #[test]
    fn bi_control_round_trips() {
        let mut regs = VppbRegisters::new();
        regs.cfg_write(layout::BI_CONTROL, 4, bi::CONTROL_BI_ENABLE);
        assert!(regs.bi_decoder.bi_enable);
        assert!(!regs.bi_decoder.bi_forward);
    }

    #[test]
    fn upstream_route_tables_program_through_config_space() {
        let mut regs = UpstreamRegisters::new();

        regs.cfg_write(layout::CACHE_ROUTE_BASE + 8, 4, 0x8000_0003);
        assert_eq!(regs.cache_route_table.target(2), Some(3));
        assert_eq!(regs.cfg_read(layout::CACHE_ROUTE_BASE + 8), 0x8000_0003);

        regs.cfg_write(layout::BI_ROUTE_BASE + 4, 4, 0x8000_0002);
        assert_eq!(regs.bi_route_table.target(1), Some(2));
        assert_eq!(regs.cfg_read(layout::BI_ROUTE_BASE + 4), 0x8000_0002);
        // An invalidated entry reads back empty.
        regs.cfg_write(layout::BI_ROUTE_BASE + 4, 4, 0);
        assert_eq!(regs.bi_route_table.target(1), None);
    }
}
