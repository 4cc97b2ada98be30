//! DMA controller.
//!
//! Only the ordering table clear on channel 6 moves data. Transfers started on
//! other channels are completed immediately without touching memory, which is
//! enough for code that waits on the busy bit.

use r3000a::memory::{MemoryMap, RAM_SIZE};

pub const DMA_BASE: u32 = 0x1f80_1080;
pub const DPCR: u32 = 0x1f80_10f0;
pub const DICR: u32 = 0x1f80_10f4;

pub const OTC_CHANNEL: usize = 6;

const CHCR_START: u32 = 1 << 24;
const CHCR_TRIGGER: u32 = 1 << 28;

const DICR_FORCE: u32 = 1 << 15;
const DICR_MASTER_ENABLE: u32 = 1 << 23;
const DICR_MASTER_FLAG: u32 = 1 << 31;
const DICR_WRITABLE: u32 = 0x00ff_803f;

#[derive(Debug, Default, Copy, Clone)]
pub struct Channel {
    pub madr: u32,
    pub bcr: u32,
    pub chcr: u32,
}

impl Channel {
    pub fn busy(&self) -> bool {
        self.chcr & CHCR_START != 0
    }

    /// Words to move for a single block transfer
    fn word_count(&self) -> u32 {
        match self.bcr & 0xffff {
            0 => 0x1_0000,
            n => n,
        }
    }
}

#[derive(Debug)]
pub struct Dma {
    channels: [Channel; 7],
    dpcr: u32,
    dicr: u32,
    /// Started channels waiting for the next clock tick
    queued: u8,
}

impl Default for Dma {
    fn default() -> Self {
        Dma {
            channels: Default::default(),
            dpcr: 0x0765_4321,
            dicr: 0,
            queued: 0,
        }
    }
}

impl Dma {
    pub fn new() -> Dma {
        Dma::default()
    }

    pub fn channel(&self, n: usize) -> &Channel {
        &self.channels[n]
    }

    pub fn has_work(&self) -> bool {
        self.queued != 0
    }

    fn enabled(&self, n: usize) -> bool {
        self.dpcr & (8 << (n * 4)) != 0
    }

    pub fn read(&self, address: u32) -> u32 {
        match address {
            DPCR => self.dpcr,
            DICR => self.dicr,
            _ => {
                let (n, register) = Self::locate(address);
                let channel = &self.channels[n];
                match register {
                    0 => channel.madr,
                    1 => channel.bcr,
                    _ => channel.chcr,
                }
            }
        }
    }

    pub fn write(&mut self, address: u32, value: u32) {
        match address {
            DPCR => self.dpcr = value,
            DICR => {
                // Flags are acknowledged by writing 1
                let flags = self.dicr & 0x7f00_0000 & !value;
                self.dicr = (value & DICR_WRITABLE) | flags;
                self.update_master_flag();
            }
            _ => {
                let (n, register) = Self::locate(address);
                match register {
                    0 => self.channels[n].madr = value & 0x00ff_ffff,
                    1 => self.channels[n].bcr = value,
                    _ => {
                        self.channels[n].chcr = value;
                        if value & CHCR_START != 0 && self.enabled(n) {
                            self.queued |= 1 << n;
                        }
                    }
                }
            }
        }
    }

    fn locate(address: u32) -> (usize, u32) {
        let offset = address - DMA_BASE;
        (((offset >> 4) as usize).min(6), (offset >> 2) & 3)
    }

    /// Performs queued transfers. Returns true if the DMA interrupt should be raised.
    pub fn run(&mut self, memory: &mut MemoryMap) -> bool {
        let mut irq = false;
        for n in 0..self.channels.len() {
            if self.queued & (1 << n) == 0 {
                continue;
            }
            self.queued &= !(1 << n);
            match n {
                OTC_CHANNEL => self.clear_ordering_table(memory),
                _ => tracing::debug!("dma channel {} transfer not emulated, completing", n),
            }
            irq |= self.complete(n);
        }
        irq
    }

    /// Builds an empty linked list running backwards from MADR, each entry
    /// pointing at the one below it and the last one holding the end marker
    fn clear_ordering_table(&mut self, memory: &mut MemoryMap) {
        let channel = self.channels[OTC_CHANNEL];
        let count = channel.word_count();
        let top = channel.madr & (RAM_SIZE - 1) & !3;
        let bottom = top.wrapping_sub((count - 1) * 4) & (RAM_SIZE - 1);
        tracing::debug!("dma ordering table clear {:06x}..={:06x}", bottom, top);

        let mut table = Vec::with_capacity(count as usize * 4);
        for i in 0..count {
            let address = bottom.wrapping_add(i * 4);
            let entry = if i == 0 { 0x00ff_ffff } else { address.wrapping_sub(4) & 0x001f_ffff };
            table.extend_from_slice(&entry.to_le_bytes());
        }
        if bottom <= top {
            memory.write_block(bottom, &table);
        } else {
            // Wrapped around the bottom of RAM
            for (i, word) in table.chunks_exact(4).enumerate() {
                let address = bottom.wrapping_add(i as u32 * 4) & (RAM_SIZE - 1);
                memory.write_block(address, word);
            }
        }
    }

    fn complete(&mut self, n: usize) -> bool {
        self.channels[n].chcr &= !(CHCR_START | CHCR_TRIGGER);
        if self.dicr & (1 << (16 + n)) == 0 {
            return false;
        }
        let was_set = self.dicr & DICR_MASTER_FLAG != 0;
        self.dicr |= 1 << (24 + n);
        self.update_master_flag();
        !was_set && self.dicr & DICR_MASTER_FLAG != 0
    }

    fn update_master_flag(&mut self) {
        let enables = (self.dicr >> 16) & 0x7f;
        let flags = (self.dicr >> 24) & 0x7f;
        let master = self.dicr & DICR_FORCE != 0 || (self.dicr & DICR_MASTER_ENABLE != 0 && enables & flags != 0);
        if master {
            self.dicr |= DICR_MASTER_FLAG;
        } else {
            self.dicr &= !DICR_MASTER_FLAG;
        }
    }

    pub fn reset(&mut self) {
        *self = Dma::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MADR6: u32 = DMA_BASE + 0x60;
    const BCR6: u32 = DMA_BASE + 0x64;
    const CHCR6: u32 = DMA_BASE + 0x68;

    #[test]
    fn ordering_table_clear() {
        let mut memory = MemoryMap::new();
        let mut dma = Dma::new();
        dma.write(DPCR, 0x0800_0000);
        dma.write(MADR6, 0x8000_1000);
        dma.write(BCR6, 4);
        dma.write(CHCR6, 0x1100_0002);
        assert!(dma.channel(6).busy());
        assert!(dma.has_work());

        assert!(!dma.run(&mut memory));
        assert!(!dma.channel(6).busy());
        assert_eq!(memory.read32(0x8000_1000), 0x0000_0ffc);
        assert_eq!(memory.read32(0x8000_0ffc), 0x0000_0ff8);
        assert_eq!(memory.read32(0x8000_0ff8), 0x0000_0ff4);
        assert_eq!(memory.read32(0x8000_0ff4), 0x00ff_ffff);
        assert_eq!(memory.read32(0x8000_0ff0), 0);
    }

    #[test]
    fn disabled_channels_never_start() {
        let mut dma = Dma::new();
        dma.write(DPCR, 0);
        dma.write(CHCR6, 0x1100_0002);
        assert!(!dma.has_work());
    }

    #[test]
    fn completion_raises_the_master_flag() {
        let mut memory = MemoryMap::new();
        let mut dma = Dma::new();
        dma.write(DPCR, 0x0800_0000);
        dma.write(DICR, DICR_MASTER_ENABLE | (1 << 22));
        dma.write(BCR6, 1);
        dma.write(CHCR6, 0x1100_0002);
        assert!(dma.run(&mut memory));
        assert_eq!(dma.read(DICR) & 0xff00_0000, 0xc000_0000);

        // acknowledge
        dma.write(DICR, DICR_MASTER_ENABLE | (1 << 22) | (1 << 30));
        assert_eq!(dma.read(DICR) & 0xff00_0000, 0);
    }
}
