#![allow(dead_code)]

use r3000a::asm::assemble_program;
use r3000a::coprocessor0::SR;
use r3000a::regfile::RegisterFile;
use r3000a::{Core, Stop};

pub const BASE: u32 = 0x8001_0000;
/// Return address handed to every test program, nothing is ever compiled here
pub const DONE: u32 = 0x8000_0ff0;
pub const STACK: u32 = 0x801f_fff0;

pub fn assemble(program: &str) -> Vec<u32> {
    assemble_program(program.lines()).unwrap()
}

/// A core with `program` at [`BASE`], exceptions going to the RAM vector
pub fn core_with(program: &str) -> Core {
    let mut core = Core::default();
    core.load(BASE, &assemble(program));
    core.registers_mut().cop0[SR] = 0;
    core.set_gpr(29, STACK);
    core.set_gpr(31, DONE);
    core
}

/// Runs from [`BASE`] until the program returns
pub fn run(core: &mut Core) {
    assert_eq!(core.run_until(BASE, DONE), Ok(Stop::Reached(DONE)));
}
