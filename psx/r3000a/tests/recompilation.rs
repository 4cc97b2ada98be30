mod support;

use r3000a::asm::assemble as assemble_line;
use r3000a::coprocessor0::{CAUSE, EPC, EXCEPTION_VECTOR, SR};
use r3000a::memory::MemoryMap;
use r3000a::regfile::RegisterFile;
use r3000a::{ClockListener, Stop, Tick, I_MASK, I_STAT};

use support::{assemble, core_with, run, BASE, DONE};

#[test]
fn host_writes_force_recompilation() {
    let mut core = core_with("addiu v0, r0, 1\njr ra\nnop");
    run(&mut core);
    assert_eq!(core.gpr(2), 1);

    run(&mut core);
    assert_eq!(core.cache().stats().compilations, 1);

    core.memory.write32(BASE, assemble_line("addiu v0, r0, 2").unwrap());
    run(&mut core);
    assert_eq!(core.gpr(2), 2);
    assert_eq!(core.cache().stats().compilations, 2);
}

#[test]
fn guest_stores_into_code_are_seen() {
    let mut core = core_with("
        addu s0, ra, r0
        jal 80010100
        nop
        addu s1, v0, r0
        sw t0, t1+0
        jal 80010100
        nop
        addu ra, s0, r0
        jr ra
        nop
    ");
    core.load(BASE + 0x100, &assemble("addiu v0, r0, 1\njr ra\nnop"));
    core.set_gpr(8, assemble_line("addiu v0, r0, 2").unwrap());
    core.set_gpr(9, BASE + 0x100);
    run(&mut core);
    assert_eq!(core.gpr(17), 1);
    assert_eq!(core.gpr(2), 2);
}

#[test]
fn invalidate_range_without_writing() {
    let mut core = core_with("jr ra\nnop");
    run(&mut core);
    core.invalidate_range(BASE, 8);
    run(&mut core);
    assert_eq!(core.cache().stats().compilations, 2);
}

#[test]
fn isolated_cache_keeps_stores_off_the_bus() {
    let mut core = core_with("
        lui t1, 8002
        ori t2, r0, 1234
        sw t2, t1+0
        lui t0, 1
        mtc0 t0, SR
        ori t3, r0, 5678
        sw t3, t1+0
        lw s0, t1+0
        mtc0 r0, SR
        lw s1, t1+0
        jr ra
        nop
    ");
    run(&mut core);
    assert_eq!(core.gpr(16), 0x5678);
    assert_eq!(core.gpr(17), 0x1234);
    assert_eq!(core.memory.read32(0x8002_0000), 0x1234);
    assert!(!core.memory.is_isolated());
}

#[test]
fn isolation_applies_to_computed_addresses() {
    let mut core = core_with("
        lui t0, 1
        mtc0 t0, SR
        sw a1, a0+0
        mtc0 r0, SR
        jr ra
        nop
    ");
    core.set_gpr(4, 0x8002_0000);
    core.set_gpr(5, 0xdead_beef);
    run(&mut core);
    assert_eq!(core.memory.read32(0x8002_0000), 0);
}

#[test]
fn overflow_in_a_delay_slot_reports_the_branch() {
    let mut core = core_with("
        bne t0, r0, 8
        addi t2, t1, 1
        addiu v1, r0, 1
        jr ra
        nop
    ");
    // handler clears the operand and restarts the branch
    core.load(EXCEPTION_VECTOR, &assemble("
        addiu s0, s0, 1
        addu t1, r0, r0
        mfc0 k0, EPC
        jr k0
        rfe
    "));
    core.set_gpr(8, 1);
    core.set_gpr(9, 0x7fff_ffff);
    core.registers_mut().cop0[SR] = 0x0000_0001;

    run(&mut core);
    assert_eq!(core.gpr(16), 1);
    assert_eq!(core.read_cop0(EPC), BASE);
    let cause = core.read_cop0(CAUSE);
    assert_ne!(cause & 0x8000_0000, 0, "BD");
    assert_eq!((cause >> 2) & 0x1f, 12);
    assert_eq!(core.read_cop0(SR) & 0x3f, 0x01);
    assert_eq!((core.gpr(10), core.gpr(3)), (1, 0));
}

/// Raises the hardware interrupt line once after `after` cycles, then yields
/// after `stop` more
struct Irq {
    after: u64,
    stop: u64,
    elapsed: u64,
    raised: bool,
}

impl Irq {
    fn new(after: u64, stop: u64) -> Box<Irq> {
        Box::new(Irq { after, stop, elapsed: 0, raised: false })
    }
}

impl ClockListener for Irq {
    fn tick(&mut self, cycles: u32, memory: &mut MemoryMap) -> Tick {
        self.elapsed += cycles as u64;
        if !self.raised && self.elapsed >= self.after {
            self.raised = true;
            memory.write32(I_STAT, 1);
            memory.write32(I_MASK, 1);
            return Tick::Interrupt;
        }
        if self.elapsed >= self.after + self.stop {
            return Tick::Yield;
        }
        Tick::Continue
    }
}

const SPIN: &str = "
    addiu v0, v0, 1
    beq r0, r0, fffffff8
    nop
";

#[test]
fn interrupts_break_out_of_loops() {
    let mut core = core_with(SPIN);
    core.load(EXCEPTION_VECTOR, &assemble("mfc0 s0, EPC\njr ra\nnop"));
    core.registers_mut().cop0[SR] = 0x0000_0401;
    core.set_clock_listener(Irq::new(20, 1000));

    run(&mut core);
    assert_eq!(core.gpr(16), BASE);
    assert!(core.gpr(2) >= 6);
    let cause = core.read_cop0(CAUSE);
    assert_eq!((cause >> 2) & 0x1f, 0);
    assert_ne!(cause & 0x400, 0);
    assert_eq!(core.read_cop0(SR) & 0x3f, 0x04);
    assert_eq!(core.read_cop0(EPC), BASE);
}

#[test]
fn masked_interrupts_stay_pending() {
    let mut core = core_with(SPIN);
    core.registers_mut().cop0[SR] = 0x0000_0400;
    core.set_clock_listener(Irq::new(20, 100));

    assert_eq!(core.run(BASE), Ok(Stop::Yield(BASE)));
    assert_ne!(core.read_cop0(CAUSE) & 0x400, 0);
    assert_eq!(core.read_cop0(EPC), 0);
}

#[test]
fn breakpoints_inside_loops() {
    let mut core = core_with("
        addu v0, r0, r0
        addiu v0, v0, 1
        bne v0, a0, fffffff8
        nop
        jr ra
        nop
    ");
    core.set_gpr(4, 3);
    let bp = BASE + 4;
    assert!(core.set_breakpoint(bp));
    assert!(!core.set_breakpoint(bp));

    for expected in 0..3 {
        let from = if expected == 0 { BASE } else { bp };
        assert_eq!(core.run_until(from, DONE), Ok(Stop::Breakpoint(bp)));
        assert_eq!(core.gpr(2), expected);
    }

    assert!(core.clear_breakpoint(bp));
    assert_eq!(core.run_until(bp, DONE), Ok(Stop::Reached(DONE)));
    assert_eq!(core.gpr(2), 3);
}

#[test]
fn single_steps_do_not_touch_the_cache() {
    let mut core = core_with("
        addiu v0, r0, 1
        bne v0, r0, 8
        addiu v1, r0, 2
        nop
        jr ra
        nop
    ");
    assert_eq!(core.step(BASE), r3000a::StepOutcome::Continue(BASE + 4));
    assert_eq!(core.step(BASE + 4), r3000a::StepOutcome::Continue(BASE + 0x10));
    assert_eq!((core.gpr(2), core.gpr(3)), (1, 2));
    assert!(core.cache().is_empty());
    assert_eq!(core.ticks(), 3);
}
