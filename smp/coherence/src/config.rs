use common::WORD_BYTES;

use crate::error::ConfigError;

/// Geometry of every cache bank in a simulation.
///
/// `line_size` is counted in 8-byte words, so a line holds `line_size * 8` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub sets: usize,
    pub ways: usize,
    pub line_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            sets: 16,
            ways: 2,
            line_size: 4,
        }
    }
}

/// Where an address lands inside a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub set: usize,
    pub tag: u64,
    /// Byte offset inside the line
    pub offset: usize,
}

impl CacheConfig {
    #[inline(always)]
    pub fn line_bytes(&self) -> u64 {
        self.line_size as u64 * WORD_BYTES
    }

    #[inline(always)]
    pub fn locate(&self, address: u64) -> Location {
        let line_bytes = self.line_bytes();
        let line = address / line_bytes;
        Location {
            set: (line % self.sets as u64) as usize,
            tag: line / self.sets as u64,
            offset: (address % line_bytes) as usize,
        }
    }

    /// Inverse of [`CacheConfig::locate`] for the first byte of a line.
    #[inline(always)]
    pub fn line_address(&self, set: usize, tag: u64) -> u64 {
        (tag * self.sets as u64 + set as u64) * self.line_bytes()
    }

    pub fn validate(&self, memory_size: u64) -> Result<(), ConfigError> {
        if self.sets == 0 {
            return Err(ConfigError::ZeroSets);
        }
        if self.ways == 0 {
            return Err(ConfigError::ZeroWays);
        }
        if self.line_size == 0 {
            return Err(ConfigError::ZeroLineSize);
        }
        let line_bytes = self.line_bytes();
        if memory_size == 0 || memory_size % line_bytes != 0 {
            return Err(ConfigError::MemorySize { memory_size, line_bytes });
        }
        Ok(())
    }
}

/// Bus timings, in CPU cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Address broadcast; peers answer through a wired OR in the same window
    pub snoop_cycles: u32,
    pub word_transfer_cycles: u32,
    /// Backing memory supplying or accepting one line
    pub memory_cycles: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            snoop_cycles: 1,
            word_transfer_cycles: 1,
            memory_cycles: 10,
        }
    }
}

impl Timing {
    pub fn cache_to_cache(&self, line_size: usize) -> u32 {
        self.snoop_cycles + self.word_transfer_cycles * line_size as u32
    }

    pub fn memory_fill(&self) -> u32 {
        self.snoop_cycles + self.memory_cycles
    }

    pub fn flush(&self) -> u32 {
        self.memory_cycles
    }

    pub fn upgrade(&self) -> u32 {
        self.snoop_cycles
    }
}
