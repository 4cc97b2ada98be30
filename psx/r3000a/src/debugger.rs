//! Introspection for debugger front ends: single stepping, breakpoints, register
//! access and disassembly.

use std::collections::{BTreeSet, VecDeque};

use crate::instructions::{decode, Kind};
use crate::regfile::{Register, RegisterFile};
use crate::{Core, ExecutionError, Stop, StepOutcome};

/// One observed register write
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegisterWrite {
    pub register: Register,
    pub old: u32,
    pub new: u32,
}

/// Wraps a register file and records every write made through it
pub struct WatchedRegisters<R> {
    inner: R,
    writes: Vec<RegisterWrite>,
}

impl<R: RegisterFile> WatchedRegisters<R> {
    pub fn new(inner: R) -> WatchedRegisters<R> {
        WatchedRegisters { inner, writes: Vec::new() }
    }

    pub fn writes(&self) -> &[RegisterWrite] {
        &self.writes
    }

    pub fn take_writes(&mut self) -> Vec<RegisterWrite> {
        std::mem::take(&mut self.writes)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: RegisterFile> RegisterFile for WatchedRegisters<R> {
    fn read_register(&self, register: Register) -> u32 {
        self.inner.read_register(register)
    }

    fn write_register(&mut self, register: Register, value: u32) {
        let old = self.inner.read_register(register);
        self.inner.write_register(register, value);
        // Read back, r0 and read-only bits can refuse the write
        let new = self.inner.read_register(register);
        self.writes.push(RegisterWrite { register, old, new });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub pc: u32,
    pub text: String,
}

const TRACE_LENGTH: usize = 1024;

/// Drives a [`Core`] on behalf of a debugger UI.
///
/// Keeps its own pc between calls, a bounded trace of stepped instructions and a
/// call stack inferred from calls and `jr ra` while single stepping.
pub struct Debugger {
    pc: u32,
    trace: VecDeque<TraceEntry>,
    stack: Vec<u32>,
}

impl Debugger {
    pub fn new(pc: u32) -> Debugger {
        Debugger { pc, trace: VecDeque::new(), stack: Vec::new() }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    pub fn trace(&self) -> &VecDeque<TraceEntry> {
        &self.trace
    }

    /// Return addresses, innermost last
    pub fn stack(&self) -> &[u32] {
        &self.stack
    }

    /// Executes one instruction (and its delay slot)
    pub fn step(&mut self, core: &mut Core) -> StepOutcome {
        let pc = self.pc;
        let op = core.memory.fetch(pc).and_then(decode);
        let outcome = core.step(pc);

        if let StepOutcome::Continue(next) | StepOutcome::Yield(next) = outcome {
            if let Some(op) = op {
                let kind = op.kind();
                let ret = pc.wrapping_add(8);
                if kind.is_call() && next != ret {
                    self.stack.push(ret);
                } else if kind == Kind::Jr && op.s() == 31 && self.stack.last() == Some(&next) {
                    self.stack.pop();
                }
            }
            self.pc = next;
        } else if let StepOutcome::Breakpoint(at) = outcome {
            self.pc = at;
        }

        if self.trace.len() == TRACE_LENGTH {
            self.trace.pop_front();
        }
        let text = op.map_or_else(|| "???".to_owned(), |op| op.render());
        self.trace.push_back(TraceEntry { pc, text });
        outcome
    }

    pub fn run(&mut self, core: &mut Core) -> Result<Stop, ExecutionError> {
        let stop = core.run(self.pc)?;
        self.pc = stop.pc();
        Ok(stop)
    }

    /// Runs compiled code until `stop` is reached at a block boundary
    pub fn run_until(&mut self, core: &mut Core, stop: u32) -> Result<Stop, ExecutionError> {
        let result = core.run_until(self.pc, stop)?;
        self.pc = result.pc();
        Ok(result)
    }

    pub fn set_breakpoint(&mut self, core: &mut Core, address: u32) -> bool {
        core.set_breakpoint(address)
    }

    pub fn clear_breakpoint(&mut self, core: &mut Core, address: u32) -> bool {
        core.clear_breakpoint(address)
    }

    pub fn breakpoints<'a>(&self, core: &'a Core) -> &'a BTreeSet<u32> {
        core.breakpoints()
    }

    /// Reads a register by its disassembler name
    pub fn register(&self, core: &Core, name: &str) -> Option<u32> {
        Register::parse(name).map(|register| core.read_register(register))
    }

    pub fn set_register(&self, core: &mut Core, name: &str, value: u32) -> bool {
        match Register::parse(name) {
            Some(register) => {
                core.write_register(register, value);
                true
            }
            None => false,
        }
    }

    /// `count` lines of `address: word  text`
    pub fn disassemble(&self, core: &Core, address: u32, count: usize) -> Vec<String> {
        (0..count as u32)
            .map(|i| address.wrapping_add(i * 4))
            .map(|address| match core.memory.fetch(address) {
                Some(word) => {
                    let text = decode(word).map_or_else(|| "???".to_owned(), |op| op.render());
                    let marker = if core.breakpoints().contains(&address) { '*' } else { ' ' };
                    format!("{}{:08x}: {:08x}  {}", marker, address, word, text)
                }
                None => format!(" {:08x}: ????????", address),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble_program;

    const BASE: u32 = 0x8000_2000;

    fn core_with(program: &[&str]) -> Core {
        let mut core = Core::default();
        core.load(BASE, &assemble_program(program.iter().copied()).unwrap());
        core
    }

    #[test]
    fn watched_registers_record_writes() {
        let mut core = Core::default();
        let mut watched = WatchedRegisters::new(&mut core);
        watched.set_gpr(8, 0x1234);
        watched.set_gpr(0, 0x1234);
        watched.write_register(Register::Cop0(13), 0xffff_ffff);

        assert_eq!(watched.writes(), &[
            RegisterWrite { register: Register::Gpr(8), old: 0, new: 0x1234 },
            RegisterWrite { register: Register::Gpr(0), old: 0, new: 0 },
            RegisterWrite { register: Register::Cop0(13), old: 0, new: 0x300 },
        ]);
        drop(watched);
        assert_eq!(core.gpr(8), 0x1234);
    }

    #[test]
    fn stepping_tracks_calls() {
        let mut core = core_with(&[
            "jal 80002010",     // 2000
            "addiu a0, r0, 3",
            "jr ra",            // 2008
            "nop",
            "addiu v0, a0, 1",  // 2010
            "jr ra",
            "nop",
        ]);
        let mut debugger = Debugger::new(BASE);

        assert_eq!(debugger.step(&mut core), StepOutcome::Continue(BASE + 0x10));
        assert_eq!(core.gpr(4), 3);
        assert_eq!(core.gpr(31), BASE + 8);
        assert_eq!(debugger.stack(), &[BASE + 8]);

        debugger.step(&mut core);
        assert_eq!(core.gpr(2), 4);
        assert_eq!(debugger.step(&mut core), StepOutcome::Continue(BASE + 8));
        assert!(debugger.stack().is_empty());

        let trace: Vec<&str> = debugger.trace().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(trace, ["jal 2010", "addiu v0, a0, 1", "jr ra"]);
    }

    #[test]
    fn breakpoints_stop_and_resume() {
        let mut core = core_with(&[
            "addiu v0, r0, 1",
            "addiu v0, v0, 1",  // 2004
            "addiu v0, v0, 1",
            "jr ra",
            "nop",
        ]);
        core.set_gpr(31, 0x8000_0000);
        let mut debugger = Debugger::new(BASE);
        assert!(debugger.set_breakpoint(&mut core, BASE + 4));

        assert_eq!(debugger.run_until(&mut core, 0x8000_0000), Ok(Stop::Breakpoint(BASE + 4)));
        assert_eq!(core.gpr(2), 1);
        assert_eq!(debugger.pc(), BASE + 4);
        assert!(debugger.disassemble(&core, BASE + 4, 1)[0].starts_with('*'));

        assert_eq!(debugger.run_until(&mut core, 0x8000_0000), Ok(Stop::Reached(0x8000_0000)));
        assert_eq!(core.gpr(2), 3);

        assert!(debugger.clear_breakpoint(&mut core, BASE + 4));
        assert!(debugger.breakpoints(&core).is_empty());
    }

    #[test]
    fn disassembles_memory() {
        let core = core_with(&["lui t0, 1f80", "nop"]);
        let debugger = Debugger::new(BASE);
        assert_eq!(debugger.disassemble(&core, BASE, 2), vec![
            " 80002000: 3c081f80  lui t0, 1f80".to_owned(),
            " 80002004: 00000000  nop".to_owned(),
        ]);
        assert_eq!(debugger.disassemble(&core, 0x1f80_1000, 1), vec![" 1f801000: ????????".to_owned()]);
        assert_eq!(debugger.register(&core, "t0"), Some(0));
    }
}
