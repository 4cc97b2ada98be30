//! Guest physical address space.
//!
//! Every address has its top three segment bits masked off, so kuseg, kseg0 and
//! kseg1 all land on the same backing store. The result falls in exactly one
//! window, or in the unmapped sink which logs and reads as zero.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use common::util::ByteMask4;

mod dirty;
mod hwregs;

pub use dirty::{DirtyMap, BUCKET_SHIFT, BUCKET_SIZE};
pub use hwregs::{HardwareRegisters, ReadHook, WriteHook, HARDWARE_BASE, HARDWARE_SIZE};

pub const SEGMENT_MASK: u32 = 0x1fff_ffff;

pub const RAM_SIZE: u32 = 0x20_0000;
pub const PARALLEL_BASE: u32 = 0x1f00_0000;
pub const PARALLEL_SIZE: u32 = 0x1_0000;
pub const SCRATCHPAD_BASE: u32 = 0x1f80_0000;
pub const SCRATCHPAD_SIZE: u32 = 0x400;
pub const BIOS_BASE: u32 = 0x1fc0_0000;
pub const BIOS_SIZE: u32 = 0x8_0000;
/// Cache control register, 0xfffe0130 in kseg2
pub const CACHE_CONTROL: u32 = 0x1ffe_0130;

/// Backing store an address resolves to
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Region {
    Ram,
    Scratchpad,
    ParallelPort,
    Hardware,
    Bios,
    CacheControl,
    Unmapped,
}

impl Region {
    /// Regions whose contents can change under compiled code
    pub fn is_writable_code(self) -> bool {
        matches!(self, Region::Ram | Region::Scratchpad)
    }
}

/// Resolves a guest address to its region and the offset into that region
#[inline]
pub fn translate(address: u32) -> (Region, u32) {
    let physical = address & SEGMENT_MASK;
    match physical {
        p if p < RAM_SIZE => (Region::Ram, p),
        p if p.wrapping_sub(PARALLEL_BASE) < PARALLEL_SIZE => (Region::ParallelPort, p - PARALLEL_BASE),
        p if p.wrapping_sub(SCRATCHPAD_BASE) < SCRATCHPAD_SIZE => (Region::Scratchpad, p - SCRATCHPAD_BASE),
        p if p.wrapping_sub(HARDWARE_BASE) < HARDWARE_SIZE => (Region::Hardware, p - HARDWARE_BASE),
        p if p.wrapping_sub(BIOS_BASE) < BIOS_SIZE => (Region::Bios, p - BIOS_BASE),
        p if p & !3 == CACHE_CONTROL => (Region::CacheControl, p & 3),
        p => (Region::Unmapped, p),
    }
}

/// A compile-time resolved location that can be accessed without dispatching on region
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Direct {
    region: Region,
    offset: u32,
}

/// Data cache model used while SR.IsC is set.
///
/// Writes land here instead of on the bus, reads see whatever was last written.
#[derive(Default)]
struct IsolatedCache {
    lines: HashMap<u32, u32>,
}

impl IsolatedCache {
    fn read(&self, address: u32, width: u32) -> u32 {
        let mask = ByteMask4::for_access(width, address);
        let word = self.lines.get(&(address & SEGMENT_MASK & !3)).copied().unwrap_or(0);
        mask.apply(word) >> mask.shift()
    }

    fn write(&mut self, address: u32, width: u32, value: u32) {
        let mask = ByteMask4::for_access(width, address);
        let line = self.lines.entry(address & SEGMENT_MASK & !3).or_insert(0);
        mask.masked_insert(line, value << mask.shift());
    }
}

pub struct MemoryMap {
    ram: Box<[u8]>,
    scratchpad: Box<[u8]>,
    bios: Box<[u8]>,
    hardware: HardwareRegisters,
    cache_control: u32,
    isolated: bool,
    cache: IsolatedCache,
    /// RAM buckets followed by scratchpad buckets
    dirty: DirtyMap,
    reported: HashSet<u32>,
}

impl MemoryMap {
    pub fn new() -> MemoryMap {
        MemoryMap {
            ram: vec![0; RAM_SIZE as usize].into_boxed_slice(),
            scratchpad: vec![0; SCRATCHPAD_SIZE as usize].into_boxed_slice(),
            bios: vec![0; BIOS_SIZE as usize].into_boxed_slice(),
            hardware: HardwareRegisters::new(),
            cache_control: 0,
            isolated: false,
            cache: IsolatedCache::default(),
            dirty: DirtyMap::new(RAM_SIZE + SCRATCHPAD_SIZE),
            reported: HashSet::new(),
        }
    }

    /// Clears RAM, scratchpad, register storage and the isolated cache.
    /// The BIOS image and registered hooks are kept.
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.scratchpad.fill(0);
        self.hardware.reset();
        self.cache_control = 0;
        self.isolated = false;
        self.cache = IsolatedCache::default();
        self.dirty.reset();
        self.reported.clear();
    }

    /// Copies a BIOS image into the read-only window, returns the number of bytes used
    pub fn load_bios(&mut self, image: &[u8]) -> usize {
        let len = image.len().min(self.bios.len());
        self.bios[..len].copy_from_slice(&image[..len]);
        len
    }

    pub fn register(&mut self, address: u32, read: ReadHook, write: WriteHook) {
        self.hardware.register(address, read, write);
    }

    pub fn hardware(&mut self) -> &mut HardwareRegisters {
        &mut self.hardware
    }

    #[inline(always)]
    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn set_isolated(&mut self, isolated: bool) {
        if isolated != self.isolated {
            tracing::debug!("cache {}", if isolated { "isolated" } else { "attached" });
        }
        self.isolated = isolated;
    }

    pub fn dirty(&self) -> &DirtyMap {
        &self.dirty
    }

    pub fn dirty_mut(&mut self) -> &mut DirtyMap {
        &mut self.dirty
    }

    /// Maps a guest range onto dirty map offsets, if it covers writable code memory
    fn dirty_offsets(range: &Range<u32>) -> Option<Range<u32>> {
        let (region, offset) = translate(range.start);
        let len = range.end.wrapping_sub(range.start);
        // Ranges running off the end of their window stop at it
        match region {
            Region::Ram => Some(offset..offset.saturating_add(len).min(RAM_SIZE)),
            Region::Scratchpad => {
                let end = offset.saturating_add(len).min(SCRATCHPAD_SIZE);
                Some(RAM_SIZE + offset..RAM_SIZE + end)
            }
            _ => None,
        }
    }

    /// True if guest memory in `range` changed after `stamp` was handed out
    pub fn written_since(&self, range: &Range<u32>, stamp: u64) -> bool {
        Self::dirty_offsets(range).map_or(false, |offsets| self.dirty.written_since(offsets, stamp))
    }

    /// Marks `length` bytes at `start` as modified without touching their contents
    pub fn invalidate_range(&mut self, start: u32, length: u32) {
        if let Some(offsets) = Self::dirty_offsets(&(start..start.wrapping_add(length))) {
            self.dirty.touch_range(offsets);
        }
    }

    /// Instruction fetch for the recompiler. Ignores cache isolation and hooks.
    pub fn fetch(&self, address: u32) -> Option<u32> {
        let (region, offset) = translate(address);
        let store = match region {
            Region::Ram => &self.ram,
            Region::Scratchpad => &self.scratchpad,
            Region::Bios => &self.bios,
            _ => return None,
        };
        Some(load(store, offset, 4))
    }

    /// Resolves `address` for inlined accesses, only plain memory qualifies
    pub fn direct(&self, address: u32, store: bool) -> Option<Direct> {
        match translate(address) {
            (region @ (Region::Ram | Region::Scratchpad), offset) => Some(Direct { region, offset }),
            (Region::Bios, offset) if !store => Some(Direct { region: Region::Bios, offset }),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn read_direct(&self, direct: Direct, width: u32) -> u32 {
        match direct.region {
            Region::Ram => load(&self.ram, direct.offset, width),
            Region::Scratchpad => load(&self.scratchpad, direct.offset, width),
            _ => load(&self.bios, direct.offset, width),
        }
    }

    #[inline(always)]
    pub fn write_direct(&mut self, direct: Direct, width: u32, value: u32) {
        match direct.region {
            Region::Ram => {
                store(&mut self.ram, direct.offset, width, value);
                self.dirty.touch(direct.offset);
            }
            _ => {
                store(&mut self.scratchpad, direct.offset, width, value);
                self.dirty.touch(RAM_SIZE + direct.offset);
            }
        }
    }

    /// Reads `width` (1, 2 or 4) bytes, zero extended. Misaligned addresses are forced to alignment.
    pub fn read(&mut self, address: u32, width: u32) -> u32 {
        let (region, offset) = translate(address);
        if self.isolated && region != Region::CacheControl {
            return self.cache.read(address, width);
        }

        match region {
            Region::Ram => load(&self.ram, offset, width),
            Region::Scratchpad => load(&self.scratchpad, offset, width),
            Region::Bios => load(&self.bios, offset, width),
            Region::Hardware => self.hardware.read(offset, width),
            Region::ParallelPort => {
                // Nothing plugged into the expansion port
                if offset < 0x100 { 0 } else { ByteMask4::new(width, 0u32).value() }
            }
            Region::CacheControl => {
                let mask = ByteMask4::for_access(width, offset);
                mask.apply(self.cache_control) >> mask.shift()
            }
            Region::Unmapped => {
                self.report(address, "reading from");
                0
            }
        }
    }

    /// Writes the low `width` bytes of `value`
    pub fn write(&mut self, address: u32, width: u32, value: u32) {
        let (region, offset) = translate(address);
        if self.isolated && region != Region::CacheControl {
            self.cache.write(address, width, value);
            return;
        }

        match region {
            Region::Ram => {
                store(&mut self.ram, offset, width, value);
                self.dirty.touch(offset);
            }
            Region::Scratchpad => {
                store(&mut self.scratchpad, offset, width, value);
                self.dirty.touch(RAM_SIZE + offset);
            }
            Region::Hardware => self.hardware.write(offset, width, value),
            Region::CacheControl => {
                let mask = ByteMask4::for_access(width, offset);
                mask.masked_insert(&mut self.cache_control, value << mask.shift());
            }
            Region::Bios => self.report(address, "writing to read-only"),
            Region::ParallelPort => self.report(address, "writing to parallel port"),
            Region::Unmapped => self.report(address, "writing to"),
        }
    }

    #[inline]
    pub fn read8(&mut self, address: u32) -> u8 {
        self.read(address, 1) as u8
    }

    #[inline]
    pub fn read16(&mut self, address: u32) -> u16 {
        self.read(address, 2) as u16
    }

    #[inline]
    pub fn read32(&mut self, address: u32) -> u32 {
        self.read(address, 4)
    }

    #[inline]
    pub fn write8(&mut self, address: u32, value: u8) {
        self.write(address, 1, value as u32)
    }

    #[inline]
    pub fn write16(&mut self, address: u32, value: u16) {
        self.write(address, 2, value as u32)
    }

    #[inline]
    pub fn write32(&mut self, address: u32, value: u32) {
        self.write(address, 4, value)
    }

    /// Bulk copy out of guest memory for DMA style transfers
    pub fn read_block(&mut self, address: u32, buffer: &mut [u8]) {
        let len = buffer.len() as u32;
        let (region, offset) = translate(address);
        match region {
            Region::Ram if !self.isolated && offset + len <= RAM_SIZE => {
                buffer.copy_from_slice(&self.ram[offset as usize..(offset + len) as usize]);
            }
            _ => {
                for (i, byte) in buffer.iter_mut().enumerate() {
                    *byte = self.read8(address.wrapping_add(i as u32));
                }
            }
        }
    }

    /// Bulk copy into guest memory for DMA style transfers
    pub fn write_block(&mut self, address: u32, buffer: &[u8]) {
        let len = buffer.len() as u32;
        let (region, offset) = translate(address);
        match region {
            Region::Ram if !self.isolated && offset + len <= RAM_SIZE => {
                self.ram[offset as usize..(offset + len) as usize].copy_from_slice(buffer);
                self.dirty.touch_range(offset..offset + len);
            }
            _ => {
                for (i, &byte) in buffer.iter().enumerate() {
                    self.write8(address.wrapping_add(i as u32), byte);
                }
            }
        }
    }

    fn report(&mut self, address: u32, what: &str) {
        if self.reported.insert(address & SEGMENT_MASK) {
            tracing::warn!("{} invalid memory address {:08x}", what, address);
        }
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

#[inline(always)]
fn load(store: &[u8], offset: u32, width: u32) -> u32 {
    let offset = (offset & !(width - 1)) as usize;
    match width {
        1 => store[offset] as u32,
        2 => u16::from_le_bytes([store[offset], store[offset + 1]]) as u32,
        _ => u32::from_le_bytes([store[offset], store[offset + 1], store[offset + 2], store[offset + 3]]),
    }
}

#[inline(always)]
fn store(store: &mut [u8], offset: u32, width: u32, value: u32) {
    let offset = (offset & !(width - 1)) as usize;
    let bytes = value.to_le_bytes();
    store[offset..offset + width as usize].copy_from_slice(&bytes[..width as usize]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_share_backing_store() {
        let mut memory = MemoryMap::new();
        memory.write32(0x8000_1000, 0xdead_beef);
        assert_eq!(memory.read32(0x0000_1000), 0xdead_beef);
        assert_eq!(memory.read32(0xa000_1000), 0xdead_beef);
        assert_eq!(memory.read16(0xa000_1002), 0xdead);
        assert_eq!(memory.read8(0xa000_1000), 0xef);
    }

    #[test]
    fn translates_windows() {
        assert_eq!(translate(0x801f_fffc), (Region::Ram, 0x1f_fffc));
        assert_eq!(translate(0x1f00_0080), (Region::ParallelPort, 0x80));
        assert_eq!(translate(0x9f80_03fc), (Region::Scratchpad, 0x3fc));
        assert_eq!(translate(0x1f80_0400), (Region::Unmapped, 0x1f80_0400));
        assert_eq!(translate(0xbf80_1070), (Region::Hardware, 0x70));
        assert_eq!(translate(0xbfc0_0180), (Region::Bios, 0x180));
        assert_eq!(translate(0xfffe_0130), (Region::CacheControl, 0));
        assert_eq!(translate(0x0020_0000), (Region::Unmapped, 0x0020_0000));
    }

    #[test]
    fn unmapped_reads_are_zero() {
        let mut memory = MemoryMap::new();
        memory.write32(0x1000_0000, 5);
        assert_eq!(memory.read32(0x1000_0000), 0);
    }

    #[test]
    fn bios_is_read_only() {
        let mut memory = MemoryMap::new();
        memory.load_bios(&[0x78, 0x56, 0x34, 0x12]);
        memory.write32(0xbfc0_0000, 0);
        assert_eq!(memory.read32(0xbfc0_0000), 0x1234_5678);
        assert_eq!(memory.fetch(0xbfc0_0000), Some(0x1234_5678));
    }

    #[test]
    fn parallel_port_reads_open_bus() {
        let mut memory = MemoryMap::new();
        assert_eq!(memory.read32(0x1f00_0000), 0);
        assert_eq!(memory.read32(0x1f00_0100), 0xffff_ffff);
        assert_eq!(memory.read8(0x1f00_0100), 0xff);
    }

    #[test]
    fn isolation_absorbs_writes() {
        let mut memory = MemoryMap::new();
        memory.write32(0x100, 0x1111_1111);

        memory.set_isolated(true);
        memory.write32(0x100, 0x2222_2222);
        assert_eq!(memory.read32(0x100), 0x2222_2222);
        memory.write8(0x101, 0x33);
        assert_eq!(memory.read32(0x100), 0x2222_3322);
        // cache control stays on the bus
        memory.write32(0xfffe_0130, 0x804);

        memory.set_isolated(false);
        assert_eq!(memory.read32(0x100), 0x1111_1111);
        assert_eq!(memory.read32(0xfffe_0130), 0x804);
        assert_eq!(memory.fetch(0x100), Some(0x1111_1111));
    }

    #[test]
    fn writes_stamp_the_dirty_map() {
        let mut memory = MemoryMap::new();
        let stamp = memory.dirty_mut().begin_compile();
        assert!(!memory.written_since(&(0x8000_0000..0x8000_0100), stamp));

        memory.write8(0x8000_0010, 1);
        assert!(memory.written_since(&(0x8000_0000..0x8000_0100), stamp));
        assert!(!memory.written_since(&(0x8000_1000..0x8000_1100), stamp));

        memory.write32(0x1f80_0004, 1);
        assert!(memory.written_since(&(0x1f80_0000..0x1f80_0008), stamp));

        // isolated writes never reach memory, so nothing goes stale
        let stamp = memory.dirty_mut().begin_compile();
        memory.set_isolated(true);
        memory.write32(0x8000_0010, 0);
        assert!(!memory.written_since(&(0x8000_0000..0x8000_0100), stamp));
    }

    #[test]
    fn invalidation_stops_at_the_end_of_a_window() {
        let mut memory = MemoryMap::new();
        let stamp = memory.dirty_mut().begin_compile();
        memory.invalidate_range(0x8000_1000, 0xffff_f000);
        assert!(memory.written_since(&(0x801f_fff0..0x8020_0000), stamp));
        assert!(!memory.written_since(&(0x8000_0000..0x8000_1000), stamp));

        let stamp = memory.dirty_mut().begin_compile();
        memory.invalidate_range(0x1f80_0300, u32::MAX);
        assert!(memory.written_since(&(0x1f80_03fc..0x1f80_0400), stamp));
        assert!(!memory.written_since(&(0x8000_0000..0x8020_0000), stamp));
    }

    #[test]
    fn block_transfers() {
        let mut memory = MemoryMap::new();
        let stamp = memory.dirty_mut().begin_compile();
        memory.write_block(0x0000_2000, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(memory.read32(0x8000_2000), 0x0403_0201);
        assert!(memory.written_since(&(0x2004..0x2008), stamp));

        let mut buffer = [0u8; 6];
        memory.read_block(0xa000_2000, &mut buffer);
        assert_eq!(buffer, [1, 2, 3, 4, 5, 6]);
    }
}
