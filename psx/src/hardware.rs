//! Peripheral state shared between the register hooks installed in the CPU's
//! memory map and the clock listener that advances it.

use std::cell::RefCell;
use std::rc::Rc;

use r3000a::memory::MemoryMap;
use r3000a::{ClockListener, Tick};

use crate::dma::{Dma, DICR, DMA_BASE, DPCR};
use crate::interrupts::{InterruptController, Irq, I_MASK, I_STAT};
use crate::timers::{Timers, TIMERS_BASE};

pub const GP0: u32 = 0x1f80_1810;
pub const GPUSTAT: u32 = 0x1f80_1814;
/// Ready to receive commands, VRAM transfers and DMA blocks
pub const GPUSTAT_READY: u32 = 0x1c00_0000;

pub struct Hardware {
    pub interrupts: InterruptController,
    pub timers: Timers,
    pub dma: Dma,
    cycles_per_frame: u64,
    frame_cycles: u64,
    frames: u64,
}

impl Hardware {
    pub fn new(cycles_per_frame: u32) -> Hardware {
        Hardware {
            interrupts: InterruptController::new(),
            timers: Timers::new(),
            dma: Dma::new(),
            cycles_per_frame: cycles_per_frame.max(1) as u64,
            frame_cycles: 0,
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn reset(&mut self) {
        self.interrupts.reset();
        self.timers.reset();
        self.dma.reset();
        self.frame_cycles = 0;
        self.frames = 0;
    }

    /// Advances peripherals by `cycles` CPU cycles
    fn tick(&mut self, cycles: u32, memory: &mut MemoryMap) -> Tick {
        let mut asserted = false;

        let timers = self.timers.advance(cycles);
        for n in 0..3 {
            if timers & (1 << n) != 0 {
                asserted |= self.interrupts.raise(Irq::timer(n));
            }
        }

        if self.dma.has_work() && self.dma.run(memory) {
            asserted |= self.interrupts.raise(Irq::Dma);
        }

        self.frame_cycles += cycles as u64;
        if self.frame_cycles >= self.cycles_per_frame {
            self.frame_cycles -= self.cycles_per_frame;
            self.frames += 1;
            self.interrupts.raise(Irq::VBlank);
            tracing::trace!("vblank {}", self.frames);
            return Tick::Yield;
        }

        if asserted { Tick::Interrupt } else { Tick::Continue }
    }
}

/// Installs register hooks for every emulated peripheral
pub fn register(memory: &mut MemoryMap, hardware: &Rc<RefCell<Hardware>>) {
    for address in [I_STAT, I_MASK] {
        let (r, w) = (hardware.clone(), hardware.clone());
        memory.register(address,
            Box::new(move |address: u32| r.borrow().interrupts.read(address)),
            Box::new(move |address: u32, value: u32| w.borrow_mut().interrupts.write(address, value)));
    }

    for n in 0..3 {
        for register in 0..3 {
            let (r, w) = (hardware.clone(), hardware.clone());
            memory.register(TIMERS_BASE + n * 0x10 + register * 4,
                Box::new(move |address: u32| r.borrow_mut().timers.read(address)),
                Box::new(move |address: u32, value: u32| w.borrow_mut().timers.write(address, value)));
        }
    }

    let channels = (0..7).flat_map(|n| (0..3).map(move |register| DMA_BASE + n * 0x10 + register * 4));
    for address in channels.chain([DPCR, DICR]) {
        let (r, w) = (hardware.clone(), hardware.clone());
        memory.register(address,
            Box::new(move |address: u32| r.borrow().dma.read(address)),
            Box::new(move |address: u32, value: u32| w.borrow_mut().dma.write(address, value)));
    }

    // GPU: commands are swallowed, status always reports ready
    memory.register(GP0,
        Box::new(|_: u32| 0u32),
        Box::new(|_: u32, value: u32| tracing::trace!("gp0 {:08x}", value)));
    memory.register(GPUSTAT,
        Box::new(|_: u32| GPUSTAT_READY),
        Box::new(|_: u32, value: u32| tracing::trace!("gp1 {:08x}", value)));
}

/// Feeds CPU time to the peripherals
pub struct SystemClock {
    hardware: Rc<RefCell<Hardware>>,
}

impl SystemClock {
    pub fn new(hardware: Rc<RefCell<Hardware>>) -> SystemClock {
        SystemClock { hardware }
    }
}

impl ClockListener for SystemClock {
    fn tick(&mut self, cycles: u32, memory: &mut MemoryMap) -> Tick {
        self.hardware.borrow_mut().tick(cycles, memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(cycles_per_frame: u32) -> (MemoryMap, Rc<RefCell<Hardware>>, SystemClock) {
        let mut memory = MemoryMap::new();
        let hardware = Rc::new(RefCell::new(Hardware::new(cycles_per_frame)));
        register(&mut memory, &hardware);
        let clock = SystemClock::new(hardware.clone());
        (memory, hardware, clock)
    }

    #[test]
    fn vblank_yields_and_latches_irq0() {
        let (mut memory, hardware, mut clock) = setup(100);
        assert_eq!(clock.tick(60, &mut memory), Tick::Continue);
        assert_eq!(clock.tick(60, &mut memory), Tick::Yield);
        assert_eq!(memory.read32(I_STAT), 1);
        assert_eq!(hardware.borrow().frames(), 1);

        memory.write32(I_STAT, 0);
        assert_eq!(memory.read32(I_STAT), 0);
    }

    #[test]
    fn timer_irq_asserts_the_line() {
        let (mut memory, _, mut clock) = setup(1_000_000);
        memory.write32(I_MASK, 1 << 4);
        memory.write32(TIMERS_BASE + 8, 50);
        memory.write16(TIMERS_BASE + 4, 0x18);
        assert_eq!(clock.tick(49, &mut memory), Tick::Continue);
        assert_eq!(clock.tick(1, &mut memory), Tick::Interrupt);
        assert_eq!(memory.read32(I_STAT), 1 << 4);
    }

    #[test]
    fn dma_runs_on_the_next_tick() {
        let (mut memory, _, mut clock) = setup(1_000_000);
        memory.write32(DPCR, 0x0800_0000);
        memory.write32(DMA_BASE + 0x60, 0x100);
        memory.write32(DMA_BASE + 0x64, 2);
        memory.write32(DMA_BASE + 0x68, 0x1100_0002);
        assert_eq!(memory.read32(0x100), 0);

        clock.tick(1, &mut memory);
        assert_eq!(memory.read32(0x100), 0xfc);
        assert_eq!(memory.read32(0xfc), 0x00ff_ffff);
        assert_eq!(memory.read32(DMA_BASE + 0x68) & (1 << 24), 0);
    }

    #[test]
    fn gpu_reports_ready() {
        let (mut memory, _, _) = setup(100);
        assert_eq!(memory.read32(0xbf80_1814), GPUSTAT_READY);
        memory.write32(GP0, 0xe100_0000);
    }
}
