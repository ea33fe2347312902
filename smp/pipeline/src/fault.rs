use thiserror::Error;

/// An exception raised by one instruction. It travels with the instruction to writeback,
/// where the core stops and waits for it to be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("access to {address:#x} is outside simulated memory")]
    InvalidAddress { address: u64 },
    #[error("access to {address:#x} is not word aligned")]
    MisalignedAccess { address: u64 },
    #[error("malformed instruction word {word:#018x}")]
    MalformedInstruction { word: u64 },
}

/// A fault as retired at writeback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// Index of the faulting instruction
    pub pc: usize,
    pub fault: Fault,
}
