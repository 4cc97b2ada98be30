//! Guest code to compiled function translation.
//!
//! Compilation happens in two passes. [`analysis`] discovers every label a
//! function can be entered or branched to at, [`codegen`] then turns each
//! label's straight-line run of instructions into a block of operations.

use std::collections::BTreeSet;

use crate::compiled::CompiledFunction;
use crate::error::RecompileError;
use crate::memory::MemoryMap;
use crate::CoreConfig;

mod analysis;
mod codegen;
mod tracker;

use analysis::Analysis;
use codegen::{Emitter, Mode};

/// Everything a single compilation reads. Nothing here is mutated.
pub struct TranslationContext<'a> {
    memory: &'a MemoryMap,
    config: &'a CoreConfig,
    breakpoints: &'a BTreeSet<u32>,
}

impl<'a> TranslationContext<'a> {
    pub fn new(memory: &'a MemoryMap, config: &'a CoreConfig, breakpoints: &'a BTreeSet<u32>) -> TranslationContext<'a> {
        TranslationContext { memory, config, breakpoints }
    }

    /// Compiles the function entered at `entry`. `stamp` comes from the dirty map
    /// and must have been taken before any memory was read.
    pub fn compile(&self, entry: u32, stamp: u64) -> Result<CompiledFunction, RecompileError> {
        let analysis = Analysis::run(self.memory, entry, self.config.max_function_instructions)?;
        let blocks = Emitter::new(self.memory, self.breakpoints, Mode::Function).emit_all(&analysis);

        tracing::debug!("compiled {:08x}: {} instructions, {} labels", entry, analysis.count, blocks.len());
        Ok(CompiledFunction::new(entry, blocks, analysis.ranges, analysis.count, stamp))
    }

    /// Compiles just the instruction at `address`. Calls don't recurse and every
    /// exit hands the next pc back, so running it executes exactly one
    /// instruction (two with a delay slot).
    pub fn compile_one(&self, address: u32) -> Result<CompiledFunction, RecompileError> {
        let analysis = Analysis::single(self.memory, address)?;
        let blocks = Emitter::new(self.memory, self.breakpoints, Mode::Single).emit_all(&analysis);
        Ok(CompiledFunction::new(address, blocks, analysis.ranges, analysis.count, self.memory.dirty().generation()))
    }
}
