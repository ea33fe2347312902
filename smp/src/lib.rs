//! A symmetric multiprocessor: in-order cores with private MESI caches on a snooping bus.

pub mod config;
pub mod error;
mod port;
pub mod report;
pub mod simulation;

pub use coherence::{CacheConfig, CacheLineSnapshot, LineState, Timing};
pub use config::SimConfig;
pub use error::SimError;
pub use pipeline::{AluOp, Condition, Fault, Instruction};
pub use report::{CoreFault, CoreStats, CycleReport, SimStats};
pub use simulation::Simulation;
