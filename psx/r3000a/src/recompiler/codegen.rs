//! Second pass: turns analysed instructions into blocks of closures.
//!
//! Registers holding values known at compile time are tracked and folded into
//! the closures as constants. They are written back whenever something could
//! observe the register file: before anything that can raise an exception,
//! before leaving the block, and at the end of every block.

use std::collections::BTreeSet;

use crate::coprocessor0::Exception;
use crate::compiled::{Block, Flow, Op};
use crate::error::ExecutionError;
use crate::instructions::{DecodedOpcode, Kind};
use crate::memory::MemoryMap;
use crate::{Core, StepOutcome};

use super::analysis::{Analysis, Slot};
use super::tracker::{Operand, RegisterTracker};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// A whole function for the cache
    Function,
    /// One instruction for single stepping: no traps, every transfer leaves
    Single,
}

/// Where a static control transfer ends up
#[derive(Debug, Copy, Clone)]
enum Jump {
    Label(usize),
    Exit(u32),
}

impl Jump {
    #[inline(always)]
    fn flow(self) -> Flow {
        match self {
            Jump::Label(index) => Flow::Goto(index),
            Jump::Exit(target) => Flow::Exit(StepOutcome::Continue(target)),
        }
    }
}

#[derive(Debug, Copy, Clone)]
enum Target {
    Static(u32),
    Dynamic(Operand),
}

#[derive(Debug, Copy, Clone)]
enum Condition {
    Always,
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    Lez(Operand),
    Gtz(Operand),
    Ltz(Operand),
    Gez(Operand),
}

impl Condition {
    fn fold(self) -> Option<bool> {
        use Condition::*;
        match self {
            Always => Some(true),
            Eq(a, b) => Some(a.constant()? == b.constant()?),
            Ne(a, b) => Some(a.constant()? != b.constant()?),
            Lez(a) => Some(a.constant()? as i32 <= 0),
            Gtz(a) => Some(a.constant()? as i32 > 0),
            Ltz(a) => Some((a.constant()? as i32) < 0),
            Gez(a) => Some(a.constant()? as i32 >= 0),
        }
    }

    #[inline(always)]
    fn eval(self, core: &Core) -> bool {
        use Condition::*;
        let regs = &core.regs;
        match self {
            Always => true,
            Eq(a, b) => a.get(regs) == b.get(regs),
            Ne(a, b) => a.get(regs) != b.get(regs),
            Lez(a) => a.get(regs) as i32 <= 0,
            Gtz(a) => a.get(regs) as i32 > 0,
            Ltz(a) => (a.get(regs) as i32) < 0,
            Gez(a) => a.get(regs) as i32 >= 0,
        }
    }
}

pub struct Emitter<'a> {
    memory: &'a MemoryMap,
    breakpoints: &'a BTreeSet<u32>,
    mode: Mode,
    labels: Vec<u32>,
    tracker: RegisterTracker,
    pending_cycles: u32,
    ops: Vec<Op>,
    in_delay_slot: bool,
    /// Control can't reach the rest of the block
    terminated: bool,
}

impl<'a> Emitter<'a> {
    pub fn new(memory: &'a MemoryMap, breakpoints: &'a BTreeSet<u32>, mode: Mode) -> Emitter<'a> {
        Emitter {
            memory,
            breakpoints,
            mode,
            labels: Vec::new(),
            tracker: RegisterTracker::new(),
            pending_cycles: 0,
            ops: Vec::new(),
            in_delay_slot: false,
            terminated: false,
        }
    }

    pub fn emit_all(mut self, analysis: &Analysis) -> Vec<Block> {
        // A label without code would just bounce off the dispatcher
        self.labels = analysis.labels.iter().copied()
            .filter(|label| matches!(analysis.instructions.get(label), Some(Slot::Op { .. } | Slot::Invalid(_))))
            .collect();

        let mut blocks = Vec::with_capacity(self.labels.len());
        let mut current: Option<(u32, u32)> = None;

        for (&address, slot) in &analysis.instructions {
            if self.labels.binary_search(&address).is_ok() {
                if let Some((start, end)) = current.take() {
                    blocks.push(self.finish_block(start, end));
                }
                self.tracker = RegisterTracker::new();
                self.pending_cycles = 0;
                self.terminated = false;
                current = Some((address, address));
            }

            let Some((_, end)) = current.as_mut() else {
                continue;
            };
            *end = address.wrapping_add(match slot {
                Slot::Op { delay: Some(_), .. } => 8,
                _ => 4,
            });

            if !self.terminated {
                self.emit_slot(address, slot);
            }
        }

        if let Some((start, end)) = current.take() {
            blocks.push(self.finish_block(start, end));
        }
        blocks
    }

    fn finish_block(&mut self, start: u32, end: u32) -> Block {
        if !self.terminated {
            self.sync();
        }
        Block { start, end, ops: std::mem::take(&mut self.ops) }
    }

    fn emit_slot(&mut self, address: u32, slot: &Slot) {
        match *slot {
            Slot::Op { op, delay: None } => {
                self.breakpoint(address);
                self.emit(address, &op);
            }
            Slot::Op { op, delay: Some(delay) } => {
                self.breakpoint(address);
                self.emit_branch(address, &op, delay);
            }
            Slot::Invalid(word) => {
                self.breakpoint(address);
                self.decode_fault(address, word);
            }
            Slot::Exit => {
                self.sync();
                self.push(move |_| Flow::Exit(StepOutcome::Continue(address)));
                self.terminated = true;
            }
        }
    }

    #[inline]
    fn push(&mut self, op: impl Fn(&mut Core) -> Flow + 'static) {
        self.ops.push(Box::new(op));
    }

    fn flush_cycles(&mut self) {
        let cycles = std::mem::take(&mut self.pending_cycles);
        if cycles != 0 {
            self.push(move |core| {
                core.clock(cycles);
                Flow::Next
            });
        }
    }

    fn flush_registers(&mut self) {
        let writes = self.tracker.take_dirty();
        if !writes.is_empty() {
            self.push(move |core| {
                for &(reg, value) in &writes {
                    core.regs.write(reg, value);
                }
                Flow::Next
            });
        }
    }

    /// Makes the live core state match what has been compiled so far
    fn sync(&mut self) {
        self.flush_cycles();
        self.flush_registers();
    }

    fn jump(&self, target: u32) -> Jump {
        match self.mode {
            Mode::Function => match self.labels.binary_search(&target) {
                Ok(index) => Jump::Label(index),
                Err(_) => Jump::Exit(target),
            },
            Mode::Single => Jump::Exit(target),
        }
    }

    fn breakpoint(&mut self, address: u32) {
        if self.mode == Mode::Single || !self.breakpoints.contains(&address) {
            return;
        }
        self.sync();
        self.push(move |core| {
            if core.resume_breakpoint == Some(address) {
                core.resume_breakpoint = None;
                Flow::Next
            } else {
                Flow::Exit(StepOutcome::Breakpoint(address))
            }
        });
    }

    fn decode_fault(&mut self, address: u32, word: u32) {
        self.sync();
        self.push(move |_| Flow::Exit(StepOutcome::Fault(ExecutionError::Decode { address, word })));
        self.terminated = true;
    }

    fn exception(&mut self, address: u32, exception: Exception) {
        self.sync();
        let in_delay_slot = self.in_delay_slot;
        self.push(move |core| Flow::Exit(StepOutcome::Continue(core.raise_exception(exception, address, in_delay_slot))));
        self.terminated = true;
    }

    fn alu(&mut self, d: u8, a: Operand, b: Operand, f: fn(u32, u32) -> u32) {
        if d == 0 {
            return;
        }
        match (a, b) {
            (Operand::Const(a), Operand::Const(b)) => self.tracker.set(d, f(a, b)),
            _ => {
                self.tracker.clobber(d);
                self.push(move |core| {
                    let value = f(a.get(&core.regs), b.get(&core.regs));
                    core.regs.write(d, value);
                    Flow::Next
                });
            }
        }
    }

    /// Signed arithmetic that raises Overflow instead of wrapping
    fn alu_trap(&mut self, address: u32, d: u8, a: Operand, b: Operand, f: fn(i64, i64) -> i64) {
        let compute = move |a: u32, b: u32| {
            let wide = f(a as i32 as i64, b as i32 as i64);
            (wide == wide as i32 as i64).then_some(wide as u32)
        };

        if let (Some(a), Some(b)) = (a.constant(), b.constant()) {
            match compute(a, b) {
                Some(value) => self.tracker.set(d, value),
                None => self.exception(address, Exception::Overflow),
            }
            return;
        }

        self.sync();
        self.tracker.clobber(d);
        let in_delay_slot = self.in_delay_slot;
        self.push(move |core| match compute(a.get(&core.regs), b.get(&core.regs)) {
            Some(value) => {
                core.regs.write(d, value);
                Flow::Next
            }
            None => Flow::Exit(StepOutcome::Continue(core.raise_exception(Exception::Overflow, address, in_delay_slot))),
        });
    }

    fn load(&mut self, t: u8, base: Operand, offset: u32, width: u32, extend: fn(u32) -> u32) {
        self.tracker.clobber(t);
        match base {
            Operand::Const(base) => {
                let address = base.wrapping_add(offset);
                match self.memory.direct(address, false) {
                    Some(direct) => self.push(move |core| {
                        let value = if core.memory.is_isolated() {
                            core.memory.read(address, width)
                        } else {
                            core.memory.read_direct(direct, width)
                        };
                        core.regs.write(t, extend(value));
                        Flow::Next
                    }),
                    None => self.push(move |core| {
                        let value = core.memory.read(address, width);
                        core.regs.write(t, extend(value));
                        Flow::Next
                    }),
                }
            }
            Operand::Reg(base) => self.push(move |core| {
                let address = core.regs.read(base).wrapping_add(offset);
                let value = core.memory.read(address, width);
                core.regs.write(t, extend(value));
                Flow::Next
            }),
        }
    }

    fn store(&mut self, value: Operand, base: Operand, offset: u32, width: u32) {
        match base {
            Operand::Const(base) => {
                let address = base.wrapping_add(offset);
                match self.memory.direct(address, true) {
                    Some(direct) => self.push(move |core| {
                        let value = value.get(&core.regs);
                        if core.memory.is_isolated() {
                            core.memory.write(address, width, value);
                        } else {
                            core.memory.write_direct(direct, width, value);
                        }
                        Flow::Next
                    }),
                    None => self.push(move |core| {
                        let value = value.get(&core.regs);
                        core.memory.write(address, width, value);
                        Flow::Next
                    }),
                }
            }
            Operand::Reg(base) => self.push(move |core| {
                let address = core.regs.read(base).wrapping_add(offset);
                let value = value.get(&core.regs);
                core.memory.write(address, width, value);
                Flow::Next
            }),
        }
    }

    fn load_unaligned(&mut self, t: u8, base: Operand, offset: u32, merge: fn(u32, u32, u32) -> u32) {
        let old = self.tracker.operand(t);
        self.tracker.clobber(t);
        self.push(move |core| {
            let address = base.get(&core.regs).wrapping_add(offset);
            let word = core.memory.read(address & !3, 4);
            let value = merge(old.get(&core.regs), word, address & 3);
            core.regs.write(t, value);
            Flow::Next
        });
    }

    fn store_unaligned(&mut self, t: u8, base: Operand, offset: u32, merge: fn(u32, u32, u32) -> u32) {
        let value = self.tracker.operand(t);
        self.push(move |core| {
            let address = base.get(&core.regs).wrapping_add(offset);
            let word = core.memory.read(address & !3, 4);
            let merged = merge(word, value.get(&core.regs), address & 3);
            core.memory.write(address & !3, 4, merged);
            Flow::Next
        });
    }

    fn hilo(&mut self, s: Operand, t: Operand, f: fn(u32, u32) -> (u32, u32)) {
        if let (Some(s), Some(t)) = (s.constant(), t.constant()) {
            let (hi, lo) = f(s, t);
            self.push(move |core| {
                core.regs.hi = hi;
                core.regs.lo = lo;
                Flow::Next
            });
            return;
        }
        self.push(move |core| {
            let (hi, lo) = f(s.get(&core.regs), t.get(&core.regs));
            core.regs.hi = hi;
            core.regs.lo = lo;
            Flow::Next
        });
    }

    /// Emits everything except instructions with a delay slot
    pub fn emit(&mut self, address: u32, op: &DecodedOpcode) {
        use Kind::*;

        self.pending_cycles += op.info.cycles;

        let tracker = &self.tracker;
        let (s, t) = (tracker.operand(op.s()), tracker.operand(op.t()));
        let (rs, rt, rd) = (op.s(), op.t(), op.d());
        let imm = Operand::Const(op.imm());
        let simm = Operand::Const(op.simm());
        let sa = Operand::Const(op.imm() & 31);

        match op.kind() {
            Add => self.alu_trap(address, rd, s, t, |a, b| a + b),
            Addi => self.alu_trap(address, rt, s, simm, |a, b| a + b),
            Sub => self.alu_trap(address, rd, s, t, |a, b| a - b),
            Addu => self.alu(rd, s, t, u32::wrapping_add),
            Addiu => self.alu(rt, s, simm, u32::wrapping_add),
            Subu => self.alu(rd, s, t, u32::wrapping_sub),
            And => self.alu(rd, s, t, |a, b| a & b),
            Andi => self.alu(rt, s, imm, |a, b| a & b),
            Or => self.alu(rd, s, t, |a, b| a | b),
            Ori => self.alu(rt, s, imm, |a, b| a | b),
            Xor => self.alu(rd, s, t, |a, b| a ^ b),
            Xori => self.alu(rt, s, imm, |a, b| a ^ b),
            Nor => self.alu(rd, s, t, |a, b| !(a | b)),
            Slt => self.alu(rd, s, t, |a, b| ((a as i32) < (b as i32)) as u32),
            Slti => self.alu(rt, s, simm, |a, b| ((a as i32) < (b as i32)) as u32),
            Sltu => self.alu(rd, s, t, |a, b| (a < b) as u32),
            Sltiu => self.alu(rt, s, simm, |a, b| (a < b) as u32),
            Sll => self.alu(rd, t, sa, |a, b| a << b),
            Srl => self.alu(rd, t, sa, |a, b| a >> b),
            Sra => self.alu(rd, t, sa, |a, b| ((a as i32) >> b) as u32),
            Sllv => self.alu(rd, t, s, |a, b| a << (b & 31)),
            Srlv => self.alu(rd, t, s, |a, b| a >> (b & 31)),
            Srav => self.alu(rd, t, s, |a, b| ((a as i32) >> (b & 31)) as u32),
            Lui => self.tracker.set(rt, op.imm() << 16),

            Mult => self.hilo(s, t, multiply_signed),
            Multu => self.hilo(s, t, multiply_unsigned),
            Div => self.hilo(s, t, divide_signed),
            Divu => self.hilo(s, t, divide_unsigned),
            Mfhi => {
                self.tracker.clobber(rd);
                self.push(move |core| {
                    core.regs.write(rd, core.regs.hi);
                    Flow::Next
                });
            }
            Mflo => {
                self.tracker.clobber(rd);
                self.push(move |core| {
                    core.regs.write(rd, core.regs.lo);
                    Flow::Next
                });
            }
            Mthi => self.push(move |core| {
                core.regs.hi = s.get(&core.regs);
                Flow::Next
            }),
            Mtlo => self.push(move |core| {
                core.regs.lo = s.get(&core.regs);
                Flow::Next
            }),

            Lb => self.load(rt, s, op.simm(), 1, |v| v as u8 as i8 as u32),
            Lbu => self.load(rt, s, op.simm(), 1, |v| v),
            Lh => self.load(rt, s, op.simm(), 2, |v| v as u16 as i16 as u32),
            Lhu => self.load(rt, s, op.simm(), 2, |v| v),
            Lw => self.load(rt, s, op.simm(), 4, |v| v),
            Lwl => self.load_unaligned(rt, s, op.simm(), merge_load_left),
            Lwr => self.load_unaligned(rt, s, op.simm(), merge_load_right),
            Sb => self.store(t, s, op.simm(), 1),
            Sh => self.store(t, s, op.simm(), 2),
            Sw => self.store(t, s, op.simm(), 4),
            Swl => self.store_unaligned(rt, s, op.simm(), merge_store_left),
            Swr => self.store_unaligned(rt, s, op.simm(), merge_store_right),

            Mfc0 => {
                let reg = op.l() as usize;
                self.tracker.clobber(rt);
                self.push(move |core| {
                    core.regs.write(rt, core.regs.cop0[reg]);
                    Flow::Next
                });
            }
            Mtc0 => {
                let reg = op.l() as usize;
                self.push(move |core| {
                    let value = t.get(&core.regs);
                    core.write_cop0(reg, value);
                    Flow::Next
                });
            }
            Rfe => self.push(|core| {
                core.rfe();
                Flow::Next
            }),

            Mfc2 | Cfc2 => {
                let reg = op.r() as usize;
                let control = op.kind() == Cfc2;
                self.tracker.clobber(rt);
                self.push(move |core| {
                    let value = if control { core.regs.cop2_ctl[reg] } else { core.regs.cop2_data[reg] };
                    core.regs.write(rt, value);
                    Flow::Next
                });
            }
            Mtc2 | Ctc2 => {
                let reg = op.r() as usize;
                let control = op.kind() == Ctc2;
                self.push(move |core| {
                    let value = t.get(&core.regs);
                    if control { core.regs.cop2_ctl[reg] = value } else { core.regs.cop2_data[reg] = value }
                    Flow::Next
                });
            }
            Lwc2 => {
                let (reg, offset) = (op.r() as usize, op.simm());
                self.push(move |core| {
                    let address = s.get(&core.regs).wrapping_add(offset);
                    core.regs.cop2_data[reg] = core.memory.read(address, 4);
                    Flow::Next
                });
            }
            Swc2 => {
                let (reg, offset) = (op.r() as usize, op.simm());
                self.push(move |core| {
                    let address = s.get(&core.regs).wrapping_add(offset);
                    let value = core.regs.cop2_data[reg];
                    core.memory.write(address, 4, value);
                    Flow::Next
                });
            }
            Cop2 => {
                let command = op.imm();
                self.push(move |core| {
                    core.skip_gte_command(address, command);
                    Flow::Next
                });
            }

            Syscall => self.exception(address, Exception::Syscall),
            Break => self.exception(address, Exception::Breakpoint),

            Beq | Beql | Bgez | Bgezal | Bgtz | Blez | Bltz | Bltzal | Bne | J | Jal | Jalr | Jr => {
                unreachable!("{:?} emitted without its delay slot", op.kind())
            }
        }
    }

    fn emit_branch(&mut self, address: u32, op: &DecodedOpcode, delay: Result<DecodedOpcode, u32>) {
        use Kind::*;

        let kind = op.kind();
        let s = self.tracker.operand(op.s());
        let t = self.tracker.operand(op.t());

        let condition = match kind {
            Beq | Beql => Condition::Eq(s, t),
            Bne => Condition::Ne(s, t),
            Blez => Condition::Lez(s),
            Bgtz => Condition::Gtz(s),
            Bltz | Bltzal => Condition::Ltz(s),
            Bgez | Bgezal => Condition::Gez(s),
            _ => Condition::Always,
        };
        let target = match kind {
            J | Jal => Target::Static(op.jump_target(address)),
            Jr | Jalr => Target::Dynamic(s),
            _ => Target::Static(op.branch_target(address)),
        };
        let folded = condition.fold();
        let likely = kind == Beql;

        self.pending_cycles += op.info.cycles;

        if likely && folded == Some(false) {
            // Delay slot is nullified, nothing left to do
            return;
        }

        let ret = address.wrapping_add(8);
        match kind {
            Jal | Bgezal | Bltzal => self.tracker.set(31, ret),
            Jalr => self.tracker.set(op.d(), ret),
            _ => {}
        }

        // Not-taken state for branch-likely, the taken path sees the delay slot
        let nullified = likely && folded.is_none();
        let skipped = nullified.then(|| (self.tracker.clone(), self.pending_cycles));

        let outer = std::mem::take(&mut self.ops);
        let outer_terminated = std::mem::replace(&mut self.terminated, false);
        self.in_delay_slot = true;
        let slot = address.wrapping_add(4);
        match delay {
            Ok(op) => self.emit(slot, &op),
            Err(word) => self.decode_fault(slot, word),
        }
        self.in_delay_slot = false;
        self.sync();
        let delay_terminated = std::mem::replace(&mut self.terminated, outer_terminated);
        let delay_ops = std::mem::replace(&mut self.ops, outer);

        if let Some((tracker, cycles)) = skipped {
            self.tracker = tracker;
            self.pending_cycles = cycles;
        }

        if delay_terminated {
            // Delay slot always faults, the branch never completes
            if nullified {
                // unless a not-taken branch-likely skips it
                self.push(move |core| {
                    if !condition.eval(core) {
                        return Flow::Next;
                    }
                    run_ops(&delay_ops, core).unwrap_or(Flow::Next)
                });
                return;
            }
            self.ops.extend(delay_ops);
            self.terminated = true;
            return;
        }

        if kind.is_call() {
            self.emit_call(condition, target, ret, delay_ops);
            return;
        }

        let jump = match target {
            Target::Static(target) => Some(self.jump(target)),
            Target::Dynamic(_) => None,
        };

        match folded {
            Some(false) => self.ops.extend(delay_ops),
            Some(true) => {
                match (jump, target) {
                    (Some(jump), _) => {
                        self.ops.extend(delay_ops);
                        self.push(move |_| jump.flow());
                    }
                    (None, Target::Dynamic(Operand::Const(dest))) => {
                        self.ops.extend(delay_ops);
                        self.push(move |_| Flow::Exit(StepOutcome::Continue(dest)));
                    }
                    (None, Target::Dynamic(Operand::Reg(reg))) => self.push(move |core| {
                        // Target is read before the delay slot can change it
                        let dest = core.regs.read(reg);
                        if let Some(flow) = run_ops(&delay_ops, core) {
                            return flow;
                        }
                        Flow::Exit(StepOutcome::Continue(dest))
                    }),
                    (None, Target::Static(_)) => unreachable!(),
                }
                self.terminated = true;
            }
            None => {
                let Some(jump) = jump else {
                    unreachable!("{:?} with a dynamic target is unconditional", kind);
                };
                self.push(move |core| {
                    let taken = condition.eval(core);
                    if likely && !taken {
                        return Flow::Next;
                    }
                    if let Some(flow) = run_ops(&delay_ops, core) {
                        return flow;
                    }
                    if taken { jump.flow() } else { Flow::Next }
                });
            }
        }
    }

    fn emit_call(&mut self, condition: Condition, target: Target, ret: u32, delay_ops: Vec<Op>) {
        let folded = condition.fold();
        if folded == Some(false) {
            // bltzal/bgezal that never branches still links
            self.ops.extend(delay_ops);
            return;
        }

        let resume = self.jump(ret);
        let single = self.mode == Mode::Single;
        self.push(move |core| {
            let taken = condition.eval(core);
            let dest = match target {
                Target::Static(dest) => dest,
                Target::Dynamic(operand) => operand.get(&core.regs),
            };
            if let Some(flow) = run_ops(&delay_ops, core) {
                return flow;
            }
            if !taken {
                return Flow::Next;
            }
            if single {
                return Flow::Exit(StepOutcome::Continue(dest));
            }
            match core.call(dest, ret) {
                StepOutcome::Continue(pc) if pc == ret => resume.flow(),
                outcome => Flow::Exit(outcome),
            }
        });

        // Control only comes back through the return label
        if folded == Some(true) {
            self.terminated = true;
        }
    }
}

/// Runs a delay slot's ops, returns early if one of them leaves
#[inline(always)]
fn run_ops(ops: &[Op], core: &mut Core) -> Option<Flow> {
    for op in ops {
        match op(core) {
            Flow::Next => {}
            flow => return Some(flow),
        }
    }
    None
}

pub fn multiply_signed(a: u32, b: u32) -> (u32, u32) {
    let result = (a as i32 as i64) * (b as i32 as i64);
    ((result >> 32) as u32, result as u32)
}

pub fn multiply_unsigned(a: u32, b: u32) -> (u32, u32) {
    let result = (a as u64) * (b as u64);
    ((result >> 32) as u32, result as u32)
}

/// Returns (hi, lo). Division by zero and overflow give the hardware's fixed results.
pub fn divide_signed(n: u32, d: u32) -> (u32, u32) {
    let (n, d) = (n as i32, d as i32);
    match (n, d) {
        (n, 0) => (n as u32, if n >= 0 { 0xffff_ffff } else { 1 }),
        (i32::MIN, -1) => (0, 0x8000_0000),
        (n, d) => ((n % d) as u32, (n / d) as u32),
    }
}

pub fn divide_unsigned(n: u32, d: u32) -> (u32, u32) {
    match d {
        0 => (n, 0xffff_ffff),
        d => (n % d, n / d),
    }
}

/// lwl: `shift` is the low two address bits
pub fn merge_load_left(reg: u32, word: u32, shift: u32) -> u32 {
    let shift = shift * 8;
    (reg & (0x00ff_ffff >> shift)) | (word << (24 - shift))
}

pub fn merge_load_right(reg: u32, word: u32, shift: u32) -> u32 {
    let shift = shift * 8;
    (reg & (0xffff_ff00 << (24 - shift))) | (word >> shift)
}

pub fn merge_store_left(word: u32, reg: u32, shift: u32) -> u32 {
    let shift = shift * 8;
    (word & (0xffff_ff00u32 << shift)) | (reg >> (24 - shift))
}

pub fn merge_store_right(word: u32, reg: u32, shift: u32) -> u32 {
    let shift = shift * 8;
    (word & (0x00ff_ffff >> (24 - shift))) | (reg << shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_division_edge_cases() {
        assert_eq!(divide_signed(7, 2), (1, 3));
        assert_eq!(divide_signed(-7i32 as u32, 2), (-1i32 as u32, -3i32 as u32));
        assert_eq!(divide_signed(5, 0), (5, 0xffff_ffff));
        assert_eq!(divide_signed(-5i32 as u32, 0), (-5i32 as u32, 1));
        assert_eq!(divide_signed(0x8000_0000, 0xffff_ffff), (0, 0x8000_0000));
    }

    #[test]
    fn unsigned_division_by_zero() {
        assert_eq!(divide_unsigned(9, 0), (9, 0xffff_ffff));
        assert_eq!(divide_unsigned(0xffff_ffff, 0x10), (0xf, 0x0fff_ffff));
    }

    #[test]
    fn multiplication_fills_hi() {
        assert_eq!(multiply_signed(-2i32 as u32, 3), (0xffff_ffff, -6i32 as u32));
        assert_eq!(multiply_unsigned(0xffff_ffff, 2), (1, 0xffff_fffe));
    }

    #[test]
    fn unaligned_merges() {
        let word = 0x4433_2211;
        let reg = 0xaabb_ccdd;
        assert_eq!(merge_load_left(reg, word, 0), 0x11bb_ccdd);
        assert_eq!(merge_load_left(reg, word, 3), 0x4433_2211);
        assert_eq!(merge_load_right(reg, word, 0), 0x4433_2211);
        assert_eq!(merge_load_right(reg, word, 1), 0xaa44_3322);
        assert_eq!(merge_load_right(reg, word, 3), 0xaabb_cc44);

        assert_eq!(merge_store_left(word, reg, 0), 0x4433_22aa);
        assert_eq!(merge_store_left(word, reg, 3), 0xaabb_ccdd);
        assert_eq!(merge_store_right(word, reg, 0), 0xaabb_ccdd);
        assert_eq!(merge_store_right(word, reg, 3), 0xdd33_2211);
    }

    #[test]
    fn conditions_fold_only_when_known() {
        let known = Operand::Const(0xffff_fff0);
        assert_eq!(Condition::Ltz(known).fold(), Some(true));
        assert_eq!(Condition::Gtz(known).fold(), Some(false));
        assert_eq!(Condition::Eq(known, Operand::Reg(4)).fold(), None);
        assert_eq!(Condition::Always.fold(), Some(true));
    }
}
