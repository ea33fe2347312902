//! In-order five stage pipeline: fetch, decode, execute, memory, writeback.
//!
//! The pipeline owns its program and registers but not memory. Data accesses go out through a
//! [`DataPort`], which is free to answer later.

pub mod fault;
pub mod instructions;
pub mod pipeline;
pub mod regfile;

pub use fault::{Fault, FaultRecord};
pub use instructions::{AluOp, Condition, EncodeError, Instruction, Opcode, ParseError};
pub use pipeline::{CoreCycle, Pipeline, PipelineInstruction, PipelineStats, Stage, StallCause};
pub use regfile::{RegFile, REGISTER_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Completed this cycle. Carries the loaded word, or the stored one.
    Ready(u64),
    /// Not done yet. The same access will be retried next cycle.
    Pending,
}

/// Where the memory stage sends loads and stores.
pub trait DataPort {
    fn load(&mut self, address: u64) -> Result<Access, Fault>;
    fn store(&mut self, address: u64, value: u64) -> Result<Access, Fault>;
}
