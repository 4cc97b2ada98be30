use std::collections::HashSet;

use common::util::ByteMask4;

pub const HARDWARE_BASE: u32 = 0x1f80_1000;
pub const HARDWARE_SIZE: u32 = 0x2000;

pub type ReadHook = Box<dyn FnMut(u32) -> u32>;
pub type WriteHook = Box<dyn FnMut(u32, u32)>;

struct Slot {
    read: ReadHook,
    write: WriteHook,
}

/// The 8 KiB hardware register window.
///
/// Peripherals register a read/write hook pair per 32-bit word. Hooks only ever
/// see whole words: narrower accesses are synthesized here by masking and
/// shifting (reads) or read-modify-write (writes). Unregistered words behave as
/// plain storage.
pub struct HardwareRegisters {
    backing: Box<[u8]>,
    handlers: Vec<Option<Slot>>,
    reported: HashSet<u32>,
}

impl HardwareRegisters {
    pub fn new() -> HardwareRegisters {
        HardwareRegisters {
            backing: vec![0; HARDWARE_SIZE as usize].into_boxed_slice(),
            handlers: (0..HARDWARE_SIZE / 4).map(|_| None).collect(),
            reported: HashSet::new(),
        }
    }

    /// `address` may be any mirror of the register
    pub fn register(&mut self, address: u32, read: ReadHook, write: WriteHook) {
        let offset = (address & 0x1fff_ffff).wrapping_sub(HARDWARE_BASE);
        assert!(offset < HARDWARE_SIZE, "{:08x} is outside the hardware register window", address);
        self.handlers[(offset >> 2) as usize] = Some(Slot { read, write });
    }

    pub fn is_registered(&self, offset: u32) -> bool {
        self.handlers[(offset >> 2) as usize].is_some()
    }

    /// Reads `width` bytes at `offset` into the window, zero extended
    pub fn read(&mut self, offset: u32, width: u32) -> u32 {
        let aligned = offset & !3;
        let mask = ByteMask4::for_access(width, offset);
        let word = match &mut self.handlers[(aligned >> 2) as usize] {
            Some(slot) => (slot.read)(HARDWARE_BASE + aligned),
            None => {
                self.report(aligned, "read from");
                self.raw(aligned)
            }
        };
        mask.apply(word) >> mask.shift()
    }

    pub fn write(&mut self, offset: u32, width: u32, value: u32) {
        let aligned = offset & !3;
        let mask = ByteMask4::for_access(width, offset);
        let value = value << mask.shift();
        match &mut self.handlers[(aligned >> 2) as usize] {
            Some(slot) => {
                let address = HARDWARE_BASE + aligned;
                let mut word = if width == 4 { value } else { (slot.read)(address) };
                mask.masked_insert(&mut word, value);
                (slot.write)(address, word);
            }
            None => {
                self.report(aligned, "write to");
                let mut word = self.raw(aligned);
                mask.masked_insert(&mut word, value);
                self.backing[aligned as usize..aligned as usize + 4].copy_from_slice(&word.to_le_bytes());
            }
        }
    }

    /// Clears plain storage, hooks stay registered
    pub fn reset(&mut self) {
        self.backing.fill(0);
        self.reported.clear();
    }

    fn raw(&self, aligned: u32) -> u32 {
        let bytes = &self.backing[aligned as usize..aligned as usize + 4];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn report(&mut self, aligned: u32, what: &str) {
        if self.reported.insert(aligned) {
            tracing::warn!("{} unimplemented hardware register {:08x}", what, HARDWARE_BASE + aligned);
        }
    }
}

impl Default for HardwareRegisters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn unregistered_words_are_storage() {
        let mut regs = HardwareRegisters::new();
        regs.write(0x74, 4, 0x1234_5678);
        assert_eq!(regs.read(0x74, 4), 0x1234_5678);
        assert_eq!(regs.read(0x76, 2), 0x1234);
        regs.write(0x75, 1, 0xab);
        assert_eq!(regs.read(0x74, 4), 0x1234_ab78);
    }

    #[test]
    fn half_word_accesses_go_through_the_word_hook() {
        let mut regs = HardwareRegisters::new();
        let value = Rc::new(Cell::new(0xaaaa_bbbbu32));
        let (r, w) = (value.clone(), value.clone());
        regs.register(0x1f80_1070,
            Box::new(move |_: u32| r.get()),
            Box::new(move |_: u32, v: u32| w.set(v)));

        assert_eq!(regs.read(0x70, 2), 0xbbbb);
        assert_eq!(regs.read(0x72, 2), 0xaaaa);

        regs.write(0x70, 2, 0x1111);
        assert_eq!(value.get(), 0xaaaa_1111);
        regs.write(0x72, 2, 0x2222);
        assert_eq!(value.get(), 0x2222_1111);
        regs.write(0x73, 1, 0x33);
        assert_eq!(value.get(), 0x3322_1111);
    }

    #[test]
    fn hooks_see_the_register_address() {
        let mut regs = HardwareRegisters::new();
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        regs.register(0xbf80_1810, Box::new(|address: u32| address), Box::new(move |address: u32, _: u32| s.set(address)));
        assert_eq!(regs.read(0x810, 4), 0x1f80_1810);
        regs.write(0x810, 4, 0);
        assert_eq!(seen.get(), 0x1f80_1810);
    }
}
