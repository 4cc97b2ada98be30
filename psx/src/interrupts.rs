//! Interrupt controller. Its output is the CPU's hardware interrupt line, which
//! the core samples from `I_STAT & I_MASK` between blocks.

pub use r3000a::{I_MASK, I_STAT};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Irq {
    VBlank = 0,
    Gpu = 1,
    Cdrom = 2,
    Dma = 3,
    Timer0 = 4,
    Timer1 = 5,
    Timer2 = 6,
    Controller = 7,
    Sio = 8,
    Spu = 9,
    Lightpen = 10,
}

impl Irq {
    pub fn timer(n: usize) -> Irq {
        match n {
            0 => Irq::Timer0,
            1 => Irq::Timer1,
            _ => Irq::Timer2,
        }
    }
}

const IRQ_BITS: u32 = 0x7ff;

#[derive(Debug, Default)]
pub struct InterruptController {
    stat: u32,
    mask: u32,
}

impl InterruptController {
    pub fn new() -> InterruptController {
        InterruptController::default()
    }

    /// Latches `irq`. Returns true if the line is now asserted because of it.
    pub fn raise(&mut self, irq: Irq) -> bool {
        let bit = 1 << irq as u32;
        let new = self.stat & bit == 0;
        self.stat |= bit;
        new && self.mask & bit != 0
    }

    pub fn pending(&self) -> bool {
        self.stat & self.mask != 0
    }

    pub fn stat(&self) -> u32 {
        self.stat
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn read(&self, address: u32) -> u32 {
        match address {
            I_STAT => self.stat,
            _ => self.mask,
        }
    }

    pub fn write(&mut self, address: u32, value: u32) {
        match address {
            // Writing 0 to a bit acknowledges it, 1 leaves it alone
            I_STAT => self.stat &= value,
            _ => self.mask = value & IRQ_BITS,
        }
    }

    pub fn reset(&mut self) {
        *self = InterruptController::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_clears_written_zeros() {
        let mut ic = InterruptController::new();
        ic.raise(Irq::VBlank);
        ic.raise(Irq::Dma);
        assert_eq!(ic.read(I_STAT), 0b1001);

        ic.write(I_STAT, !1);
        assert_eq!(ic.stat(), 0b1000);
    }

    #[test]
    fn only_masked_sources_assert_the_line() {
        let mut ic = InterruptController::new();
        assert!(!ic.raise(Irq::Timer1));
        assert!(!ic.pending());

        ic.write(I_MASK, 0xffff_ffff);
        assert_eq!(ic.read(I_MASK), 0x7ff);
        assert!(ic.pending());
        assert!(!ic.raise(Irq::Timer1), "already latched");
        assert!(ic.raise(Irq::Gpu));
    }
}
