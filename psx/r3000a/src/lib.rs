//! The R3000A is the PlayStation's main CPU, a MIPS I core with a system control
//! coprocessor and the GTE hanging off coprocessor 2.
//!
//! Guest code is never interpreted. Functions are recompiled on first use into
//! blocks of closures and cached until the memory they came from is overwritten.

use std::collections::{BTreeSet, HashSet};

use coprocessor0::{Cause, Exception, Status, BOOT_EXCEPTION_VECTOR, CAUSE, EPC, EXCEPTION_VECTOR, HARDWARE_INTERRUPT, SR};
use compiled::FunctionCache;
use memory::{MemoryMap, HARDWARE_BASE};
use recompiler::TranslationContext;
use regfile::{Register, RegisterFile, Registers};

pub use error::{AsmError, ExecutionError, RecompileError};

pub mod asm;
pub mod compiled;
pub mod coprocessor0;
pub mod debugger;
pub mod error;
pub mod instructions;
pub mod memory;
pub mod recompiler;
pub mod regfile;

/// Interrupt controller status and mask, consulted between blocks
pub const I_STAT: u32 = 0x1f80_1070;
pub const I_MASK: u32 = 0x1f80_1074;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// No new labels are added to a function past this many instructions
    pub max_function_instructions: usize,
    /// Calls nested deeper than this return to the outer dispatch loop instead of recursing
    pub max_call_depth: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            max_function_instructions: 4096,
            max_call_depth: 64,
        }
    }
}

/// Result of running compiled code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Continue(u32),
    Yield(u32),
    Breakpoint(u32),
    Fault(ExecutionError),
}

/// Why [`Core::run`] handed control back
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stop {
    Yield(u32),
    Breakpoint(u32),
    /// The stop address given to [`Core::run_until`]
    Reached(u32),
}

impl Stop {
    pub fn pc(self) -> u32 {
        match self {
            Stop::Yield(pc) | Stop::Breakpoint(pc) | Stop::Reached(pc) => pc,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Yielded,
    Faulted,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tick {
    Continue,
    /// Something changed interrupt state, check before running further
    Interrupt,
    /// Return to the embedder at the next block boundary
    Yield,
}

/// Peripherals that advance with the CPU clock
pub trait ClockListener {
    fn tick(&mut self, cycles: u32, memory: &mut MemoryMap) -> Tick;
}

pub struct Core {
    pub(crate) regs: Registers,
    pub memory: MemoryMap,
    cache: FunctionCache,
    config: CoreConfig,
    state: CpuState,
    ticks: u64,
    depth: u32,
    stop: Option<u32>,
    yield_requested: bool,
    /// Compiled loops leave at their next backwards branch when set
    pub(crate) exit_requested: bool,
    listener: Option<Box<dyn ClockListener>>,
    breakpoints: BTreeSet<u32>,
    /// Breakpoint to run through once when resuming from it
    pub(crate) resume_breakpoint: Option<u32>,
    skipped_gte: u64,
    /// GTE command addresses already reported
    gte_reported: HashSet<u32>,
}

impl Core {
    pub fn new(config: CoreConfig) -> Core {
        Core {
            regs: Registers::new(),
            memory: MemoryMap::new(),
            cache: FunctionCache::new(),
            config,
            state: CpuState::Yielded,
            ticks: 0,
            depth: 0,
            stop: None,
            yield_requested: false,
            exit_requested: false,
            listener: None,
            breakpoints: BTreeSet::new(),
            resume_breakpoint: None,
            skipped_gte: 0,
            gte_reported: HashSet::new(),
        }
    }

    /// Back to power-on state. BIOS, hooks, listener and breakpoints survive.
    pub fn reset(&mut self) -> u32 {
        self.regs.reset();
        self.memory.reset();
        self.cache.reset();
        self.state = CpuState::Yielded;
        self.ticks = 0;
        self.depth = 0;
        self.yield_requested = false;
        self.exit_requested = false;
        self.resume_breakpoint = None;
        self.skipped_gte = 0;
        self.gte_reported.clear();
        coprocessor0::BOOT_VECTOR
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub fn cache(&self) -> &FunctionCache {
        &self.cache
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    /// Cycles executed since reset
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn set_clock_listener(&mut self, listener: Box<dyn ClockListener>) {
        self.listener = Some(listener);
    }

    /// Makes `run` return at the next block boundary
    pub fn request_yield(&mut self) {
        self.yield_requested = true;
        self.exit_requested = true;
    }

    /// Runs until a yield, a breakpoint or a fault
    pub fn run(&mut self, pc: u32) -> Result<Stop, ExecutionError> {
        self.run_inner(pc, None)
    }

    /// Like [`Core::run`], also stopping once the pc reaches `stop` at a block boundary
    pub fn run_until(&mut self, pc: u32, stop: u32) -> Result<Stop, ExecutionError> {
        self.run_inner(pc, Some(stop))
    }

    fn run_inner(&mut self, pc: u32, stop: Option<u32>) -> Result<Stop, ExecutionError> {
        if self.breakpoints.contains(&pc) {
            self.resume_breakpoint = Some(pc);
        }
        self.state = CpuState::Running;
        self.depth = 0;
        self.stop = stop;

        let outcome = self.dispatch(pc, None);
        self.stop = None;
        self.state = CpuState::Yielded;
        match outcome {
            StepOutcome::Continue(pc) => Ok(Stop::Reached(pc)),
            StepOutcome::Yield(pc) => Ok(Stop::Yield(pc)),
            StepOutcome::Breakpoint(pc) => Ok(Stop::Breakpoint(pc)),
            StepOutcome::Fault(err) => {
                tracing::error!("cpu faulted: {}", err);
                self.state = CpuState::Faulted;
                Err(err)
            }
        }
    }

    /// Block dispatch loop. Returns `Continue(until)` once the pc reaches `until`.
    fn dispatch(&mut self, mut pc: u32, until: Option<u32>) -> StepOutcome {
        loop {
            if until == Some(pc) || self.stop == Some(pc) {
                return StepOutcome::Continue(pc);
            }
            if self.yield_requested {
                self.yield_requested = false;
                self.exit_requested = false;
                return StepOutcome::Yield(pc);
            }
            match self.step_block(pc) {
                StepOutcome::Continue(next) => pc = next,
                outcome => return outcome,
            }
        }
    }

    /// Services interrupts, then runs the compiled function for `pc` until it leaves
    pub fn step_block(&mut self, pc: u32) -> StepOutcome {
        self.exit_requested = self.yield_requested;
        if let Some(vector) = self.check_interrupts(pc) {
            return StepOutcome::Continue(vector);
        }

        let function = match self.cache.get_or_compile(&mut self.memory, pc, &self.config, &self.breakpoints) {
            Ok(function) => function,
            Err(source) => return StepOutcome::Fault(ExecutionError::Recompile { address: pc, source }),
        };
        tracing::trace!("dispatch {:08x} in {:08x}", pc, function.entry());
        function.invoke(self, pc)
    }

    /// Executes the single instruction at `pc` (with its delay slot for branches)
    /// without touching the function cache
    pub fn step(&mut self, pc: u32) -> StepOutcome {
        let function = match TranslationContext::new(&self.memory, &self.config, &self.breakpoints).compile_one(pc) {
            Ok(function) => function,
            Err(source) => return StepOutcome::Fault(ExecutionError::Recompile { address: pc, source }),
        };
        self.resume_breakpoint = None;
        function.invoke(self, pc)
    }

    /// Runs a guest subroutine to completion from compiled code
    pub(crate) fn call(&mut self, target: u32, ret: u32) -> StepOutcome {
        if self.depth >= self.config.max_call_depth {
            return StepOutcome::Continue(target);
        }
        self.depth += 1;
        let outcome = self.dispatch(target, Some(ret));
        self.depth -= 1;
        outcome
    }

    /// Updates Cause.IP2 from the interrupt controller and takes the interrupt if
    /// enabled. Returns the exception vector when one was raised.
    fn check_interrupts(&mut self, pc: u32) -> Option<u32> {
        let hardware = self.memory.hardware();
        let pending = hardware.read(I_STAT - HARDWARE_BASE, 4) & hardware.read(I_MASK - HARDWARE_BASE, 4) != 0;

        let mut cause = Cause::from(self.regs.cop0[CAUSE]);
        let ip = if pending { cause.ip() | HARDWARE_INTERRUPT } else { cause.ip() & !HARDWARE_INTERRUPT };
        cause.set_ip(ip);
        self.regs.cop0[CAUSE] = cause.into();

        let sr = Status::from(self.regs.cop0[SR]);
        if sr.iec() && sr.im() & ip != 0 {
            tracing::trace!("interrupt at {:08x}", pc);
            return Some(self.raise_exception(Exception::Interrupt, pc, false));
        }
        None
    }

    /// Enters the exception handler, returns the vector to continue at.
    ///
    /// `address` is the faulting instruction. Delay slot faults report the branch.
    pub fn raise_exception(&mut self, exception: Exception, address: u32, in_delay_slot: bool) -> u32 {
        let cause = Cause::from(self.regs.cop0[CAUSE])
            .with_excode(exception as u8)
            .with_bd(in_delay_slot);
        self.regs.cop0[CAUSE] = cause.into();
        self.regs.cop0[EPC] = if in_delay_slot { address.wrapping_sub(4) } else { address };

        let sr = self.regs.cop0[SR];
        self.regs.cop0[SR] = coprocessor0::push_mode(sr);
        if Status::from(sr).bev() { BOOT_EXCEPTION_VECTOR } else { EXCEPTION_VECTOR }
    }

    pub fn read_cop0(&self, reg: usize) -> u32 {
        self.regs.cop0[reg & 31]
    }

    /// mtc0, including side effects
    pub fn write_cop0(&mut self, reg: usize, value: u32) {
        let reg = reg & 31;
        tracing::debug!("{} = {:08x}", coprocessor0::COP0_REG_NAMES[reg], value);
        match reg {
            SR => {
                self.regs.cop0[SR] = value;
                self.memory.set_isolated(Status::from(value).isc());
                self.exit_requested = true;
            }
            CAUSE => {
                // Only the software interrupt bits are writable
                self.regs.cop0[CAUSE] = (self.regs.cop0[CAUSE] & !0x300) | (value & 0x300);
                self.exit_requested = true;
            }
            coprocessor0::PRID => {}
            _ => self.regs.cop0[reg] = value,
        }
    }

    pub(crate) fn rfe(&mut self) {
        self.regs.cop0[SR] = coprocessor0::pop_mode(self.regs.cop0[SR]);
        self.exit_requested = true;
    }

    /// Advances time, called from compiled code once per straight-line run
    pub(crate) fn clock(&mut self, cycles: u32) {
        self.ticks += cycles as u64;
        if let Some(listener) = self.listener.as_mut() {
            match listener.tick(cycles, &mut self.memory) {
                Tick::Continue => {}
                Tick::Interrupt => self.exit_requested = true,
                Tick::Yield => self.request_yield(),
            }
        }
    }

    pub fn breakpoints(&self) -> &BTreeSet<u32> {
        &self.breakpoints
    }

    /// Returns false if one was already set there
    pub fn set_breakpoint(&mut self, address: u32) -> bool {
        let added = self.breakpoints.insert(address);
        if added {
            self.cache.invalidate(&mut self.memory, address);
        }
        added
    }

    pub fn clear_breakpoint(&mut self, address: u32) -> bool {
        let removed = self.breakpoints.remove(&address);
        if removed {
            self.cache.invalidate(&mut self.memory, address);
        }
        removed
    }

    /// GTE commands executed as no-ops since reset
    pub fn skipped_gte_commands(&self) -> u64 {
        self.skipped_gte
    }

    pub(crate) fn skip_gte_command(&mut self, address: u32, command: u32) {
        self.skipped_gte += 1;
        if self.gte_reported.insert(address) {
            tracing::warn!("GTE command {:07x} at {:08x} is not emulated, skipping", command, address);
        }
    }

    /// Drops compiled code built from the given guest range
    pub fn invalidate_range(&mut self, start: u32, length: u32) {
        self.cache.invalidate_range(&mut self.memory, start, length);
    }

    /// Copies a program into guest memory, for tests and loaders
    pub fn load(&mut self, address: u32, words: &[u32]) {
        for (i, &word) in words.iter().enumerate() {
            self.memory.write32(address.wrapping_add(i as u32 * 4), word);
        }
    }
}

impl Default for Core {
    fn default() -> Self {
        Core::new(CoreConfig::default())
    }
}

impl RegisterFile for Core {
    fn read_register(&self, register: Register) -> u32 {
        self.regs.read_register(register)
    }

    fn write_register(&mut self, register: Register, value: u32) {
        match register {
            Register::Cop0(reg) => self.write_cop0(reg as usize, value),
            other => self.regs.write_register(other, value),
        }
    }
}
