//! First pass over a function: walk every reachable straight-line path from the
//! entry, decoding as we go and collecting the addresses control can arrive at.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use crate::error::RecompileError;
use crate::instructions::{decode, DecodedOpcode, Kind};
use crate::memory::MemoryMap;

/// An instruction as seen by the code generator
#[derive(Debug, Copy, Clone)]
pub enum Slot {
    Op {
        op: DecodedOpcode,
        /// Delay slot contents, `Err` holds an undecodable word
        delay: Option<Result<DecodedOpcode, u32>>,
    },
    /// Decoding failed. Only an error if execution actually gets here.
    Invalid(u32),
    /// Execution leaves through the dispatcher here: unmapped memory or the size bound
    Exit,
}

#[derive(Debug, Default)]
pub struct Analysis {
    pub instructions: BTreeMap<u32, Slot>,
    pub labels: BTreeSet<u32>,
    pub ranges: Vec<Range<u32>>,
    /// Instructions including delay slots
    pub count: usize,
}

impl Analysis {
    pub fn run(memory: &MemoryMap, entry: u32, limit: usize) -> Result<Analysis, RecompileError> {
        if memory.fetch(entry).is_none() {
            return Err(RecompileError::UnmappedCode { address: entry });
        }

        let mut analysis = Analysis::default();
        let mut queue = vec![entry];
        analysis.labels.insert(entry);

        while let Some(start) = queue.pop() {
            let end = analysis.walk(memory, start, limit, &mut queue)?;
            if end > start {
                analysis.ranges.push(start..end);
            }
        }

        analysis.label_delay_slots();
        analysis.merge_ranges();
        Ok(analysis)
    }

    /// Just the instruction at `address`, plus its delay slot
    pub fn single(memory: &MemoryMap, address: u32) -> Result<Analysis, RecompileError> {
        let mut analysis = Analysis::default();
        let word = memory.fetch(address).ok_or(RecompileError::UnmappedCode { address })?;
        analysis.labels.insert(address);
        let slot = match decode(word) {
            Some(op) if op.kind().has_delay_slot() => Slot::Op { op, delay: Some(analysis.delay_slot(memory, address)?) },
            Some(op) => Slot::Op { op, delay: None },
            None => Slot::Invalid(word),
        };
        analysis.instructions.insert(address, slot);
        analysis.count = if matches!(slot, Slot::Op { delay: Some(_), .. }) { 2 } else { 1 };
        analysis.ranges.push(address..address.wrapping_add(4 * analysis.count as u32));
        Ok(analysis)
    }

    fn label(&mut self, address: u32, limit: usize, queue: &mut Vec<u32>) {
        if self.count >= limit {
            // Anything not already a label leaves the function through the dispatcher
            return;
        }
        if self.labels.insert(address) {
            queue.push(address);
        }
    }

    fn delay_slot(&mut self, memory: &MemoryMap, address: u32) -> Result<Result<DecodedOpcode, u32>, RecompileError> {
        let slot = address.wrapping_add(4);
        let word = memory.fetch(slot).ok_or(RecompileError::UnmappedCode { address: slot })?;
        match decode(word) {
            Some(op) if op.kind().has_delay_slot() => Err(RecompileError::BranchInDelaySlot { address: slot, word }),
            Some(op) => Ok(Ok(op)),
            None => Ok(Err(word)),
        }
    }

    fn branch_target(&mut self, memory: &MemoryMap, address: u32, target: u32) -> Result<(), RecompileError> {
        if memory.fetch(target).is_none() {
            return Err(RecompileError::UnmappedTarget { address, target });
        }
        Ok(())
    }

    /// Returns the end of the walked range
    fn walk(&mut self, memory: &MemoryMap, start: u32, limit: usize, queue: &mut Vec<u32>) -> Result<u32, RecompileError> {
        let mut address = start;
        loop {
            if self.instructions.contains_key(&address) {
                return Ok(address);
            }
            if self.count >= limit && address != start {
                self.instructions.insert(address, Slot::Exit);
                return Ok(address);
            }
            let Some(word) = memory.fetch(address) else {
                self.instructions.insert(address, Slot::Exit);
                return Ok(address);
            };
            self.count += 1;

            let Some(op) = decode(word) else {
                self.instructions.insert(address, Slot::Invalid(word));
                return Ok(address + 4);
            };

            let kind = op.kind();
            if !kind.has_delay_slot() {
                self.instructions.insert(address, Slot::Op { op, delay: None });
                match kind {
                    Kind::Break => return Ok(address + 4),
                    Kind::Syscall => self.label(address + 4, limit, queue),
                    _ => {}
                }
                address += 4;
                continue;
            }

            let delay = self.delay_slot(memory, address)?;
            self.count += 1;
            self.instructions.insert(address, Slot::Op { op, delay: Some(delay) });

            match kind {
                _ if kind.is_conditional_branch() => {
                    let target = op.branch_target(address);
                    self.branch_target(memory, address, target)?;
                    self.label(target, limit, queue);
                }
                Kind::J | Kind::Jal => {
                    let target = op.jump_target(address);
                    self.branch_target(memory, address, target)?;
                    if kind == Kind::J {
                        self.label(target, limit, queue);
                    }
                }
                _ => {}
            }
            if kind.is_call() {
                self.label(address + 8, limit, queue);
            }

            if matches!(kind, Kind::J | Kind::Jr) {
                return Ok(address + 8);
            }
            address += 8;
        }
    }

    /// Code that jumps into a delay slot runs it as a plain instruction and then
    /// carries on after it. The branch in front still needs its own fallthrough.
    fn label_delay_slots(&mut self) {
        let in_delay_slots: Vec<u32> = self.labels.iter().copied()
            .filter(|&label| matches!(
                self.instructions.get(&label.wrapping_sub(4)),
                Some(Slot::Op { delay: Some(_), .. })))
            .collect();

        for label in in_delay_slots {
            tracing::warn!("{:08x} is both a delay slot and a branch target", label);
            let after = label.wrapping_add(4);
            if self.instructions.contains_key(&after) {
                self.labels.insert(after);
            }
        }
    }

    fn merge_ranges(&mut self) {
        self.ranges.sort_by_key(|r| r.start);
        let mut merged: Vec<Range<u32>> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble_program;

    fn memory_with(address: u32, program: &[&str]) -> MemoryMap {
        let mut memory = MemoryMap::new();
        for (i, word) in assemble_program(program.iter().copied()).unwrap().into_iter().enumerate() {
            memory.write32(address + i as u32 * 4, word);
        }
        memory
    }

    #[test]
    fn finds_branch_targets_and_return_points() {
        let memory = memory_with(0x8000_0100, &[
            "beq a0, r0, 10",   // 100 -> 114
            "nop",
            "jal 80000200",     // 108
            "nop",
            "addiu v0, r0, 1",  // 110
            "jr ra",            // 114
            "nop",
        ]);
        let analysis = Analysis::run(&memory, 0x8000_0100, 4096).unwrap();
        let labels: Vec<u32> = analysis.labels.iter().copied().collect();
        assert_eq!(labels, vec![0x8000_0100, 0x8000_0110, 0x8000_0114]);
        assert_eq!(analysis.ranges, vec![0x8000_0100..0x8000_011c]);
        assert_eq!(analysis.count, 7);
    }

    #[test]
    fn branch_in_delay_slot_is_rejected() {
        let memory = memory_with(0x1000, &["j 1000", "j 1000"]);
        assert_eq!(
            Analysis::run(&memory, 0x1000, 4096).unwrap_err(),
            RecompileError::BranchInDelaySlot { address: 0x1004, word: memory.fetch(0x1004).unwrap() });
    }

    #[test]
    fn unmapped_code() {
        let memory = MemoryMap::new();
        assert_eq!(Analysis::run(&memory, 0x1f80_1000, 4096).unwrap_err(), RecompileError::UnmappedCode { address: 0x1f80_1000 });

        let memory = memory_with(0x1000, &["j 1f000000", "nop"]);
        assert_eq!(Analysis::run(&memory, 0x1000, 4096).unwrap_err(),
            RecompileError::UnmappedTarget { address: 0x1000, target: 0x1f00_0000 });
    }

    #[test]
    fn undecodable_words_end_the_walk() {
        let mut memory = memory_with(0x1000, &["addiu v0, r0, 1"]);
        memory.write32(0x1004, 0xffff_ffff);
        let analysis = Analysis::run(&memory, 0x1000, 4096).unwrap();
        assert!(matches!(analysis.instructions.get(&0x1004), Some(Slot::Invalid(0xffff_ffff))));
        assert_eq!(analysis.instructions.len(), 2);
    }

    #[test]
    fn size_limit_stops_new_labels() {
        let memory = memory_with(0x1000, &[
            "addiu v0, r0, 1",
            "bne v0, r0, 8",
            "nop",
            "jr ra",
            "nop",
        ]);
        let analysis = Analysis::run(&memory, 0x1000, 1).unwrap();
        assert_eq!(analysis.labels.len(), 1);
        assert!(matches!(analysis.instructions.get(&0x1004), Some(Slot::Exit)));
        assert_eq!(analysis.instructions.len(), 2);
    }

    #[test]
    fn delay_slot_labels() {
        let memory = memory_with(0x1000, &[
            "bne a0, r0, -4",  // 1000 -> 1000
            "addiu v0, v0, 1", // 1004
            "beq r0, r0, -8",  // 1008 -> 1004
            "nop",
            "jr ra",
            "nop",
        ]);
        let analysis = Analysis::run(&memory, 0x1000, 4096).unwrap();
        assert!(analysis.labels.contains(&0x1004));
        assert!(analysis.labels.contains(&0x1008));
    }
}
