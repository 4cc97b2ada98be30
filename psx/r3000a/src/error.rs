use thiserror::Error;

/// Structurally invalid guest code, fatal to the function being compiled
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecompileError {
    #[error("accessing invalid memory address {address:08x}")]
    UnmappedCode { address: u32 },
    #[error("branch at {address:08x} targets unmapped location {target:08x}")]
    UnmappedTarget { address: u32, target: u32 },
    #[error("branch in delay slot at {address:08x} ({word:08x})")]
    BranchInDelaySlot { address: u32, word: u32 },
}

impl RecompileError {
    pub fn address(&self) -> u32 {
        match *self {
            RecompileError::UnmappedCode { address }
            | RecompileError::UnmappedTarget { address, .. }
            | RecompileError::BranchInDelaySlot { address, .. } => address,
        }
    }
}

/// Faults that stop the run loop and are handed to the embedder
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("no instruction matches {word:08x} at {address:08x}")]
    Decode { address: u32, word: u32 },
    #[error("could not recompile function at {address:08x}")]
    Recompile {
        address: u32,
        #[source]
        source: RecompileError,
    },
    #[error("function {entry:08x} has no label at {address:08x}")]
    UnreferencedLabel { entry: u32, address: u32 },
}

impl ExecutionError {
    /// Guest address the fault is attributed to
    pub fn address(&self) -> u32 {
        match *self {
            ExecutionError::Decode { address, .. }
            | ExecutionError::Recompile { address, .. }
            | ExecutionError::UnreferencedLabel { address, .. } => address,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error("'{0}' doesn't assemble to anything")]
    UnknownInstruction(String),
    #[error("bad operand '{text}' for field '{field}'")]
    BadOperand { text: String, field: char },
}
