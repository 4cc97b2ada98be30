use core::fmt;

use super::coprocessor0::{COP0_REG_NAMES, PRID, RESET_PRID, RESET_SR, SR};
use super::instructions::MIPS_REG_NAMES;

/// Architectural register state.
///
/// Compiled code touches these fields directly; everything else should go
/// through [`RegisterFile`].
#[derive(Clone, PartialEq, Eq)]
pub struct Registers {
    pub(crate) gpr: [u32; 32],
    pub hi: u32,
    pub lo: u32,
    pub cop0: [u32; 32],
    /// GTE data registers, moved in and out but never computed on
    pub cop2_data: [u32; 32],
    pub cop2_ctl: [u32; 32],
}

impl Registers {
    pub fn new() -> Registers {
        let mut regs = Registers {
            gpr: [0; 32],
            hi: 0,
            lo: 0,
            cop0: [0; 32],
            cop2_data: [0; 32],
            cop2_ctl: [0; 32],
        };
        regs.reset();
        regs
    }

    pub fn reset(&mut self) {
        self.gpr = [0; 32];
        self.hi = 0;
        self.lo = 0;
        self.cop0 = [0; 32];
        self.cop2_data = [0; 32];
        self.cop2_ctl = [0; 32];
        // values taken from real hardware at reset
        self.cop0[SR] = RESET_SR;
        self.cop0[PRID] = RESET_PRID;
    }

    #[inline(always)]
    pub fn read(&self, reg: u8) -> u32 {
        self.gpr[reg as usize]
    }

    #[inline(always)]
    pub fn write(&mut self, reg: u8, val: u32) {
        if reg != 0 {
            self.gpr[reg as usize] = val;
        }
    }

    pub fn gprs(&self) -> &[u32; 32] {
        &self.gpr
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, regs) in self.gpr.chunks(4).enumerate() {
            for (col, value) in regs.iter().enumerate() {
                write!(f, "{:>2}: {:08x}  ", MIPS_REG_NAMES[row * 4 + col], value)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "hi: {:08x}  lo: {:08x}  SR: {:08x}  Cause: {:08x}  EPC: {:08x}",
            self.hi, self.lo, self.cop0[12], self.cop0[13], self.cop0[14])
    }
}

/// Names a single architectural register
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Register {
    Gpr(u8),
    Hi,
    Lo,
    Cop0(u8),
}

impl Register {
    /// Accepts the disassembler's names: `sp`, `hi`, `SR`...
    pub fn parse(name: &str) -> Option<Register> {
        match name {
            "hi" => Some(Register::Hi),
            "lo" => Some(Register::Lo),
            _ => MIPS_REG_NAMES.iter().position(|n| *n == name).map(|i| Register::Gpr(i as u8))
                .or_else(|| COP0_REG_NAMES.iter().position(|n| *n == name).map(|i| Register::Cop0(i as u8))),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Register::Gpr(reg) => f.write_str(MIPS_REG_NAMES[reg as usize & 31]),
            Register::Hi => f.write_str("hi"),
            Register::Lo => f.write_str("lo"),
            Register::Cop0(reg) => f.write_str(COP0_REG_NAMES[reg as usize & 31]),
        }
    }
}

/// Read/write access to architectural registers for debuggers and embedders
pub trait RegisterFile {
    fn read_register(&self, register: Register) -> u32;
    fn write_register(&mut self, register: Register, value: u32);

    fn gpr(&self, reg: u8) -> u32 {
        self.read_register(Register::Gpr(reg))
    }

    fn set_gpr(&mut self, reg: u8, value: u32) {
        self.write_register(Register::Gpr(reg), value)
    }
}

impl<R: RegisterFile + ?Sized> RegisterFile for &mut R {
    fn read_register(&self, register: Register) -> u32 {
        (**self).read_register(register)
    }

    fn write_register(&mut self, register: Register, value: u32) {
        (**self).write_register(register, value)
    }
}

impl RegisterFile for Registers {
    fn read_register(&self, register: Register) -> u32 {
        match register {
            Register::Gpr(reg) => self.gpr[reg as usize & 31],
            Register::Hi => self.hi,
            Register::Lo => self.lo,
            Register::Cop0(reg) => self.cop0[reg as usize & 31],
        }
    }

    fn write_register(&mut self, register: Register, value: u32) {
        match register {
            Register::Gpr(reg) => self.write(reg & 31, value),
            Register::Hi => self.hi = value,
            Register::Lo => self.lo = value,
            Register::Cop0(reg) => self.cop0[reg as usize & 31] = value,
        }
    }
}
