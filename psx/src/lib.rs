//! PlayStation system glue: the R3000A core, its BIOS and the peripherals the
//! BIOS needs to get through a frame.

use std::any::Any;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use anyhow::Context;
use thiserror::Error;

use common::{Instance, Status};
use r3000a::memory::BIOS_SIZE;
use r3000a::{Core, CoreConfig, Stop};

pub use r3000a;

pub mod dma;
pub mod hardware;
pub mod interrupts;
pub mod timers;

use hardware::{Hardware, SystemClock};

/// 33.8688 MHz CPU clock
pub const CPU_CLOCK: u32 = 33_868_800;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PsxConfig {
    /// CPU cycles between vblank interrupts
    pub cycles_per_frame: u32,
    pub core: CoreConfig,
}

impl Default for PsxConfig {
    fn default() -> Self {
        PsxConfig {
            cycles_per_frame: CPU_CLOCK / 60,
            core: CoreConfig::default(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BiosError {
    #[error("BIOS image is {actual} bytes, expected {expected}")]
    WrongSize { expected: usize, actual: usize },
}

pub struct Psx {
    core: Core,
    hardware: Rc<RefCell<Hardware>>,
    pc: u32,
}

impl Psx {
    pub fn new(config: PsxConfig) -> Psx {
        let mut core = Core::new(config.core);
        let hardware = Rc::new(RefCell::new(Hardware::new(config.cycles_per_frame)));
        hardware::register(&mut core.memory, &hardware);
        core.set_clock_listener(Box::new(SystemClock::new(hardware.clone())));
        let pc = core.reset();

        Psx { core, hardware, pc }
    }

    pub fn load_bios(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let image = std::fs::read(path)
            .with_context(|| format!("reading BIOS image {}", path.display()))?;
        self.load_bios_bytes(&image)
            .with_context(|| format!("loading BIOS image {}", path.display()))
    }

    pub fn load_bios_bytes(&mut self, image: &[u8]) -> Result<(), BiosError> {
        if image.len() != BIOS_SIZE as usize {
            return Err(BiosError::WrongSize { expected: BIOS_SIZE as usize, actual: image.len() });
        }
        self.core.memory.load_bios(image);
        self.core.invalidate_range(r3000a::coprocessor0::BOOT_VECTOR, BIOS_SIZE);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.hardware.borrow_mut().reset();
        self.pc = self.core.reset();
    }

    /// Runs until the next vblank, or a breakpoint. Returns the pc execution stopped at.
    pub fn run_frame(&mut self) -> anyhow::Result<u32> {
        self.advance()?;
        Ok(self.pc)
    }

    fn advance(&mut self) -> anyhow::Result<Stop> {
        let stop = self.core.run(self.pc)
            .with_context(|| format!("frame {}", self.frames()))?;
        self.pc = stop.pc();
        Ok(stop)
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    pub fn frames(&self) -> u64 {
        self.hardware.borrow().frames()
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }
}

impl Default for Psx {
    fn default() -> Self {
        Psx::new(PsxConfig::default())
    }
}

impl Instance for Psx {
    fn name(&self) -> &'static str {
        "PlayStation"
    }

    fn run(&mut self) -> Result<Status, anyhow::Error> {
        match self.advance()? {
            Stop::Breakpoint(pc) => Ok(Status::Breakpoint(pc)),
            Stop::Yield(_) | Stop::Reached(_) => Ok(Status::Vsync),
        }
    }

    fn reset(&mut self) -> Result<(), anyhow::Error> {
        Psx::reset(self);
        Ok(())
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r3000a::asm::assemble_program;
    use r3000a::regfile::RegisterFile;
    use crate::interrupts::I_STAT;

    fn bios(program: &[&str]) -> Vec<u8> {
        let mut image = vec![0; BIOS_SIZE as usize];
        let words = assemble_program(program.iter().copied()).unwrap();
        for (chunk, word) in image.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        image
    }

    fn small_frames() -> Psx {
        Psx::new(PsxConfig { cycles_per_frame: 1000, ..PsxConfig::default() })
    }

    #[test]
    fn frames_end_at_vblank() {
        let mut psx = small_frames();
        psx.load_bios_bytes(&bios(&[
            "addiu v0, v0, 1",
            "j bfc00000",
            "nop",
        ])).unwrap();

        let pc = psx.run_frame().unwrap();
        assert_eq!(pc, 0xbfc0_0000);
        assert_eq!(psx.frames(), 1);
        let spins = psx.core().gpr(2);
        assert!(spins >= 333, "{}", spins);
        assert_eq!(psx.core_mut().memory.read32(I_STAT) & 1, 1);

        psx.run_frame().unwrap();
        assert_eq!(psx.frames(), 2);
        assert!(psx.core().gpr(2) > spins);
    }

    #[test]
    fn vblank_interrupt_reaches_the_handler() {
        let mut psx = small_frames();
        psx.load_bios_bytes(&bios(&[
            "lui t0, 1f80",
            "ori t1, r0, 1",
            "sw t1, t0+1074",    // I_MASK = vblank
            "ori t1, r0, 401",
            "mtc0 t1, SR",       // IEc, IM2, RAM vectors
            "beq r0, r0, fffffffc",
            "nop",
        ])).unwrap();
        // handler counts interrupts, acknowledges and returns
        psx.core_mut().load(0x8000_0080, &assemble_program([
            "addiu s0, s0, 1",
            "lui k0, 1f80",
            "sw r0, k0+1070",
            "mfc0 k1, EPC",
            "jr k1",
            "rfe",
        ]).unwrap());

        for _ in 0..3 {
            psx.run_frame().unwrap();
        }
        let taken = psx.core().gpr(16);
        assert!((2..=3).contains(&taken), "{}", taken);
    }

    #[test]
    fn wrong_sized_bios_is_rejected() {
        let mut psx = Psx::default();
        assert_eq!(psx.load_bios_bytes(&[0; 16]),
            Err(BiosError::WrongSize { expected: 0x8_0000, actual: 16 }));
        assert!(psx.load_bios("/nonexistent/bios.bin").is_err());
    }

    #[test]
    fn instance_reset_returns_to_the_boot_vector() {
        let mut psx = small_frames();
        psx.load_bios_bytes(&bios(&["j bfc00000", "nop"])).unwrap();
        let instance: &mut dyn Instance = &mut psx;
        assert_eq!(instance.run().unwrap(), Status::Vsync);
        instance.reset().unwrap();
        assert!(instance.as_any().downcast_mut::<Psx>().is_some());
        assert_eq!(psx.frames(), 0);
        assert_eq!(psx.pc(), 0xbfc0_0000);
    }
}
