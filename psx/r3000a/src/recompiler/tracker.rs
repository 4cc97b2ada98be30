use crate::regfile::Registers;

/// Where an instruction input comes from once compiled
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operand {
    Const(u32),
    Reg(u8),
}

impl Operand {
    #[inline(always)]
    pub fn get(self, regs: &Registers) -> u32 {
        match self {
            Operand::Const(value) => value,
            Operand::Reg(reg) => regs.read(reg),
        }
    }

    pub fn constant(self) -> Option<u32> {
        match self {
            Operand::Const(value) => Some(value),
            Operand::Reg(_) => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Known {
    Unknown,
    /// Value known and already in the live register file
    Clean(u32),
    /// Value known but not yet written back
    Dirty(u32),
}

/// Compile-time view of which registers hold known constants.
///
/// Owned by a single code generation pass. Only valid along one straight-line
/// path: it must be flushed before control can leave or enter that path.
#[derive(Debug, Clone)]
pub struct RegisterTracker {
    regs: [Known; 32],
}

impl RegisterTracker {
    pub fn new() -> RegisterTracker {
        let mut regs = [Known::Unknown; 32];
        regs[0] = Known::Clean(0);
        RegisterTracker { regs }
    }

    pub fn operand(&self, reg: u8) -> Operand {
        match self.regs[reg as usize] {
            Known::Clean(value) | Known::Dirty(value) => Operand::Const(value),
            Known::Unknown => Operand::Reg(reg),
        }
    }

    pub fn known(&self, reg: u8) -> Option<u32> {
        self.operand(reg).constant()
    }

    /// Records a value computed at compile time
    pub fn set(&mut self, reg: u8, value: u32) {
        if reg != 0 {
            self.regs[reg as usize] = Known::Dirty(value);
        }
    }

    /// The live register is about to be written by emitted code
    pub fn clobber(&mut self, reg: u8) {
        if reg != 0 {
            self.regs[reg as usize] = Known::Unknown;
        }
    }

    /// Values that still need writing back. They are considered written afterwards.
    pub fn take_dirty(&mut self) -> Vec<(u8, u32)> {
        let mut writes = Vec::new();
        for (reg, known) in self.regs.iter_mut().enumerate() {
            if let Known::Dirty(value) = *known {
                writes.push((reg as u8, value));
                *known = Known::Clean(value);
            }
        }
        writes
    }

    pub fn is_flushed(&self) -> bool {
        !self.regs.iter().any(|k| matches!(k, Known::Dirty(_)))
    }

    /// Drops all knowledge, as at a label where other paths join
    pub fn forget(&mut self) {
        debug_assert!(self.is_flushed(), "forgetting unflushed registers");
        *self = RegisterTracker::new();
    }
}

impl Default for RegisterTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r0_is_always_known() {
        let mut tracker = RegisterTracker::new();
        tracker.set(0, 5);
        tracker.clobber(0);
        assert_eq!(tracker.operand(0), Operand::Const(0));
        assert!(tracker.take_dirty().is_empty());
    }

    #[test]
    fn flushing_keeps_values_known() {
        let mut tracker = RegisterTracker::new();
        tracker.set(8, 0x1f80_0000);
        tracker.set(9, 4);
        tracker.clobber(9);
        assert_eq!(tracker.operand(9), Operand::Reg(9));
        assert_eq!(tracker.take_dirty(), vec![(8, 0x1f80_0000)]);
        assert!(tracker.is_flushed());
        assert_eq!(tracker.known(8), Some(0x1f80_0000));
        assert!(tracker.take_dirty().is_empty());

        tracker.forget();
        assert_eq!(tracker.operand(8), Operand::Reg(8));
    }
}
