use thiserror::Error;

use crate::{bank::BankId, line::LineState};

/// Why a cache or memory access could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("address {address:#x} is outside the {memory_size:#x} byte memory")]
    InvalidAddress { address: u64, memory_size: u64 },
    #[error("address {address:#x} is not aligned to an 8-byte word")]
    Misaligned { address: u64 },
    #[error("cache bank {bank} does not exist")]
    NoSuchBank { bank: BankId },
    #[error("set {set}, way {way} is outside the cache geometry")]
    NoSuchWay { set: usize, way: usize },
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

/// Two banks disagree about who owns a line. Only a simulator bug can produce this.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("coherence protocol violation on line {line:#x}, holders {holders:?}")]
pub struct ProtocolViolation {
    pub line: u64,
    pub holders: Vec<(BankId, LineState)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one cache bank is required")]
    NoBanks,
    #[error("cache sets must be non-zero")]
    ZeroSets,
    #[error("cache ways must be non-zero")]
    ZeroWays,
    #[error("cache line size must be non-zero")]
    ZeroLineSize,
    #[error("memory size {memory_size:#x} is not a non-zero multiple of the {line_bytes} byte line")]
    MemorySize { memory_size: u64, line_bytes: u64 },
}
