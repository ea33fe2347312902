use std::ops::Range;

use common::{util, WORD_BYTES};

use crate::error::AccessError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub line_reads: u64,
    pub line_writes: u64,
}

/// Backing memory behind every cache bank. Only the fabric moves whole lines in and out;
/// word accessors exist for test set-up and inspection and bypass the caches.
pub struct Memory {
    bytes: Vec<u8>,
    line_bytes: usize,
    stats: MemoryStats,
}

impl Memory {
    pub fn new(size: u64, line_bytes: u64) -> Memory {
        Memory {
            bytes: vec![0; size as usize],
            line_bytes: line_bytes as usize,
            stats: MemoryStats::default(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    /// Checks that `address` falls inside memory.
    pub fn check_range(&self, address: u64) -> Result<(), AccessError> {
        if address >= self.size() {
            return Err(AccessError::InvalidAddress {
                address,
                memory_size: self.size(),
            });
        }
        Ok(())
    }

    /// Checks that a word access at `address` is in range and aligned.
    pub fn check(&self, address: u64) -> Result<(), AccessError> {
        match address.checked_add(WORD_BYTES) {
            Some(end) if end <= self.size() => {}
            _ => {
                return Err(AccessError::InvalidAddress {
                    address,
                    memory_size: self.size(),
                })
            }
        }
        if !util::is_word_aligned(address) {
            return Err(AccessError::Misaligned { address });
        }
        Ok(())
    }

    fn line_range(&self, line_address: u64) -> Range<usize> {
        let start = line_address as usize;
        debug_assert!(start % self.line_bytes == 0, "unaligned line {:#x}", line_address);
        start..start + self.line_bytes
    }

    pub fn read_line(&mut self, line_address: u64) -> Box<[u8]> {
        self.stats.line_reads += 1;
        let range = self.line_range(line_address);
        self.bytes[range].to_vec().into_boxed_slice()
    }

    pub fn write_line(&mut self, line_address: u64, data: &[u8]) {
        debug_assert_eq!(data.len(), self.line_bytes);
        self.stats.line_writes += 1;
        let range = self.line_range(line_address);
        self.bytes[range].copy_from_slice(data);
    }

    pub fn read_word(&self, address: u64) -> Result<u64, AccessError> {
        self.check(address)?;
        Ok(util::read_word(&self.bytes, address as usize))
    }

    pub fn write_word(&mut self, address: u64, value: u64) -> Result<(), AccessError> {
        self.check(address)?;
        util::write_word(&mut self.bytes, address as usize, value);
        Ok(())
    }
}
