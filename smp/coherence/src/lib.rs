//! MESI snooping coherence: cache lines, cache banks, the shared bus and the memory behind it.

pub mod bank;
pub mod config;
pub mod domain;
pub mod error;
pub mod fabric;
pub mod line;
pub mod memory;

pub use bank::{AccessOutcome, BankId, BankStats, CacheBank, CacheLineSnapshot, Interconnect, RequestKind};
pub use config::{CacheConfig, Timing};
pub use domain::{Completion, CoherenceDomain, DomainStats};
pub use error::{AccessError, ConfigError, ProtocolViolation};
pub use fabric::{FabricStats, Operation, Transaction};
pub use line::{transition, BusAction, LineEvent, LineState};
pub use memory::MemoryStats;
