//! Compiled functions and the cache that owns them.
//!
//! A compiled function is a list of blocks, one per label, each holding a
//! sequence of operations. Operations are closures over the core; they return a
//! [`Flow`] telling the function where to go next.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::rc::Rc;

use crate::error::{ExecutionError, RecompileError};
use crate::memory::{translate, MemoryMap};
use crate::recompiler::TranslationContext;
use crate::{Core, CoreConfig, StepOutcome};

/// What compiled code does after an operation
pub enum Flow {
    Next,
    /// Jump to the block at this index of the current function
    Goto(usize),
    /// Leave the function and hand the outcome to the dispatcher
    Exit(StepOutcome),
}

pub type Op = Box<dyn Fn(&mut Core) -> Flow>;

pub struct Block {
    pub start: u32,
    /// Address execution reaches when falling off the end of the block
    pub end: u32,
    pub ops: Vec<Op>,
}

pub struct CompiledFunction {
    entry: u32,
    /// Sorted, `blocks[i]` starts at `labels[i]`
    labels: Vec<u32>,
    blocks: Vec<Block>,
    ranges: Vec<Range<u32>>,
    instruction_count: usize,
    stamp: u64,
}

impl CompiledFunction {
    pub(crate) fn new(entry: u32, blocks: Vec<Block>, ranges: Vec<Range<u32>>, instruction_count: usize, stamp: u64) -> CompiledFunction {
        debug_assert!(blocks.windows(2).all(|pair| pair[0].start < pair[1].start));
        CompiledFunction {
            entry,
            labels: blocks.iter().map(|b| b.start).collect(),
            blocks,
            ranges,
            instruction_count,
            stamp,
        }
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    /// Every address this function can be entered at
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn has_label(&self, address: u32) -> bool {
        self.labels.binary_search(&address).is_ok()
    }

    /// Guest address ranges the code was translated from
    pub fn ranges(&self) -> &[Range<u32>] {
        &self.ranges
    }

    pub fn contains(&self, address: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(&address))
    }

    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    /// Dirty map generation the function was compiled at
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// True once any memory this function was built from has been written
    pub fn is_stale(&self, memory: &MemoryMap) -> bool {
        self.ranges.iter().any(|range| memory.written_since(range, self.stamp))
    }

    /// Runs from `pc`, which must be one of the labels
    pub fn invoke(&self, core: &mut Core, pc: u32) -> StepOutcome {
        let mut index = match self.labels.binary_search(&pc) {
            Ok(index) => index,
            Err(_) => return StepOutcome::Fault(ExecutionError::UnreferencedLabel { entry: self.entry, address: pc }),
        };

        'blocks: loop {
            let block = &self.blocks[index];
            for op in &block.ops {
                match op(core) {
                    Flow::Next => {}
                    Flow::Goto(target) => {
                        index = target;
                        // Loops never pass through the dispatcher on their own
                        if core.exit_requested {
                            return StepOutcome::Continue(self.labels[index]);
                        }
                        continue 'blocks;
                    }
                    Flow::Exit(outcome) => return outcome,
                }
            }

            // Fell off the end, keep going if we own the next address
            match self.labels.binary_search(&block.end) {
                Ok(next) if !core.exit_requested => index = next,
                _ => return StepOutcome::Continue(block.end),
            }
        }
    }
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("entry", &format_args!("{:08x}", self.entry))
            .field("labels", &self.labels.len())
            .field("instructions", &self.instruction_count)
            .field("stamp", &self.stamp)
            .finish()
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub compilations: u64,
    pub evictions: u64,
}

/// Compiled functions keyed by entry address.
///
/// Every label of a cached function is indexed too, so jumping into the middle
/// of already compiled code reuses it instead of compiling a new function.
#[derive(Default)]
pub struct FunctionCache {
    functions: HashMap<u32, Rc<CompiledFunction>>,
    /// label -> entry of the function owning it
    labels: HashMap<u32, u32>,
    stats: CacheStats,
}

impl FunctionCache {
    pub fn new() -> FunctionCache {
        FunctionCache::default()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn get(&self, entry: u32) -> Option<&Rc<CompiledFunction>> {
        self.functions.get(&entry)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Rc<CompiledFunction>> {
        self.functions.values()
    }

    /// Finds fresh code that can be entered at `address`, dropping stale code on the way
    pub fn lookup(&mut self, memory: &MemoryMap, address: u32) -> Option<Rc<CompiledFunction>> {
        let entry = if self.functions.contains_key(&address) {
            address
        } else {
            *self.labels.get(&address)?
        };
        let function = self.functions.get(&entry)?;
        if function.is_stale(memory) {
            tracing::debug!("function {:08x} was overwritten, evicting", entry);
            self.evict(entry);
            return None;
        }
        Some(function.clone())
    }

    pub fn get_or_compile(
        &mut self,
        memory: &mut MemoryMap,
        address: u32,
        config: &CoreConfig,
        breakpoints: &BTreeSet<u32>,
    ) -> Result<Rc<CompiledFunction>, RecompileError> {
        if let Some(function) = self.lookup(memory, address) {
            return Ok(function);
        }

        let stamp = memory.dirty_mut().begin_compile();
        let function = TranslationContext::new(memory, config, breakpoints).compile(address, stamp)?;
        self.stats.compilations += 1;
        Ok(self.insert(function))
    }

    pub fn insert(&mut self, function: CompiledFunction) -> Rc<CompiledFunction> {
        let entry = function.entry();
        self.evict(entry);
        for &label in function.labels() {
            self.labels.insert(label, entry);
        }
        let function = Rc::new(function);
        self.functions.insert(entry, function.clone());
        function
    }

    pub fn evict(&mut self, entry: u32) -> Option<Rc<CompiledFunction>> {
        let function = self.functions.remove(&entry)?;
        for label in function.labels() {
            if self.labels.get(label) == Some(&entry) {
                self.labels.remove(label);
            }
        }
        self.stats.evictions += 1;
        Some(function)
    }

    /// Forces recompilation of any code built from `address`
    pub fn invalidate(&mut self, memory: &mut MemoryMap, address: u32) {
        self.invalidate_range(memory, address, 4)
    }

    pub fn invalidate_range(&mut self, memory: &mut MemoryMap, start: u32, length: u32) {
        if translate(start).0.is_writable_code() {
            memory.invalidate_range(start, length);
            return;
        }

        // ROM isn't covered by the dirty map, find the owners the slow way
        let end = start.saturating_add(length);
        let stale: Vec<u32> = self.functions.values()
            .filter(|f| f.ranges().iter().any(|r| r.start < end && start < r.end))
            .map(|f| f.entry())
            .collect();
        for entry in stale {
            self.evict(entry);
        }
    }

    pub fn reset(&mut self) {
        self.functions.clear();
        self.labels.clear();
        self.stats = CacheStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble_program;

    fn load(memory: &mut MemoryMap, address: u32, program: &[&str]) {
        for (i, word) in assemble_program(program.iter().copied()).unwrap().into_iter().enumerate() {
            memory.write32(address + i as u32 * 4, word);
        }
    }

    #[test]
    fn labels_are_indexed() {
        let mut memory = MemoryMap::new();
        load(&mut memory, 0x8000_1000, &[
            "addiu v0, r0, 1",
            "bne v0, r0, c",
            "nop",
            "jr ra",
            "nop",
            "jr ra",
            "nop",
        ]);
        let mut cache = FunctionCache::new();
        let config = CoreConfig::default();
        let function = cache.get_or_compile(&mut memory, 0x8000_1000, &config, &BTreeSet::new()).unwrap();
        assert!(function.has_label(0x8000_1014));
        assert_eq!(cache.len(), 1);

        let inner = cache.get_or_compile(&mut memory, 0x8000_1014, &config, &BTreeSet::new()).unwrap();
        assert_eq!(inner.entry(), 0x8000_1000);
        assert_eq!(cache.stats().compilations, 1);
    }

    #[test]
    fn writes_make_functions_stale() {
        let mut memory = MemoryMap::new();
        load(&mut memory, 0x0000_2000, &["jr ra", "nop"]);
        let mut cache = FunctionCache::new();
        let config = CoreConfig::default();
        cache.get_or_compile(&mut memory, 0x2000, &config, &BTreeSet::new()).unwrap();
        assert!(cache.lookup(&memory, 0x8000_2000).is_none(), "entry is keyed by the exact address");
        assert!(cache.lookup(&memory, 0x2000).is_some());

        memory.write32(0x8000_2004, 0);
        assert!(cache.lookup(&memory, 0x2000).is_none());
        assert!(cache.is_empty());

        // unrelated writes leave it alone
        cache.get_or_compile(&mut memory, 0x2000, &config, &BTreeSet::new()).unwrap();
        memory.write32(0x8000_4000, 0);
        assert!(cache.lookup(&memory, 0x2000).is_some());
        assert_eq!(cache.stats().compilations, 2);
    }

    #[test]
    fn rom_invalidation_scans() {
        let mut memory = MemoryMap::new();
        let program = assemble_program(["jr ra", "nop"]).unwrap();
        let image: Vec<u8> = program.iter().flat_map(|w| w.to_le_bytes()).collect();
        memory.load_bios(&image);

        let mut cache = FunctionCache::new();
        cache.get_or_compile(&mut memory, 0xbfc0_0000, &CoreConfig::default(), &BTreeSet::new()).unwrap();
        cache.invalidate(&mut memory, 0xbfc0_0100);
        assert_eq!(cache.len(), 1);
        cache.invalidate(&mut memory, 0xbfc0_0004);
        assert!(cache.is_empty());
    }

    #[test]
    fn reset_starts_counting_again() {
        let mut memory = MemoryMap::new();
        load(&mut memory, 0x0000_2000, &["jr ra", "nop"]);
        let mut cache = FunctionCache::new();
        cache.get_or_compile(&mut memory, 0x2000, &CoreConfig::default(), &BTreeSet::new()).unwrap();
        cache.evict(0x2000);
        assert_eq!(cache.stats(), CacheStats { compilations: 1, evictions: 1 });

        cache.reset();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn rom_invalidation_to_the_end_of_the_address_space() {
        let mut memory = MemoryMap::new();
        let program = assemble_program(["jr ra", "nop"]).unwrap();
        let image: Vec<u8> = program.iter().flat_map(|w| w.to_le_bytes()).collect();
        memory.load_bios(&image);

        let mut cache = FunctionCache::new();
        cache.get_or_compile(&mut memory, 0xbfc0_0000, &CoreConfig::default(), &BTreeSet::new()).unwrap();
        cache.invalidate_range(&mut memory, 0xbfc0_0000, u32::MAX);
        assert!(cache.is_empty());
    }

    #[test]
    fn failed_compiles_leave_the_cache_alone() {
        let mut memory = MemoryMap::new();
        let mut cache = FunctionCache::new();
        let err = cache.get_or_compile(&mut memory, 0x1000_0000, &CoreConfig::default(), &BTreeSet::new()).unwrap_err();
        assert_eq!(err, RecompileError::UnmappedCode { address: 0x1000_0000 });
        assert!(cache.is_empty());
    }
}
