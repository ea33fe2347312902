use std::fmt;

use coherence::{BankStats, FabricStats, MemoryStats};
use pipeline::{Fault, PipelineStats};

/// A fault retired by one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreFault {
    pub core: usize,
    pub pc: usize,
    pub fault: Fault,
}

impl fmt::Display for CoreFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core {} pc {}: {}", self.core, self.pc, self.fault)
    }
}

/// What happened across the machine in one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub retired_instructions: u32,
    /// Cores that made no progress this cycle
    pub stalls: u32,
    pub flushed: u32,
    /// Bus transactions that completed this cycle
    pub coherence_transactions: u32,
    pub faults: Vec<CoreFault>,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {:>6}: retired {} stalled {} flushed {} bus {}",
            self.cycle, self.retired_instructions, self.stalls, self.flushed, self.coherence_transactions
        )?;
        for fault in &self.faults {
            write!(f, " [{}]", fault)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoreStats {
    pub core: usize,
    pub cache: BankStats,
    pub pipeline: PipelineStats,
}

/// Cumulative counters for the whole run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimStats {
    pub cycles: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub write_backs: u64,
    pub coherence_transactions: u64,
    pub coherence_messages: u64,
    pub memory_reads: u64,
    pub memory_writes: u64,
    pub retired: u64,
    pub stall_cycles: u64,
    pub flushed: u64,
    pub faults: u64,
    pub fabric: FabricStats,
    pub cores: Vec<CoreStats>,
}

impl SimStats {
    pub(crate) fn collect(cycles: u64, cores: Vec<CoreStats>, fabric: FabricStats, memory: MemoryStats) -> SimStats {
        let mut stats = SimStats {
            cycles,
            coherence_transactions: fabric.transactions(),
            coherence_messages: fabric.messages,
            memory_reads: memory.line_reads,
            memory_writes: memory.line_writes,
            fabric,
            ..Default::default()
        };
        for core in &cores {
            stats.hits += core.cache.hits;
            stats.misses += core.cache.misses;
            stats.evictions += core.cache.evictions;
            stats.invalidations += core.cache.invalidations;
            stats.write_backs += core.cache.write_backs;
            stats.retired += core.pipeline.retired;
            stats.stall_cycles += core.pipeline.stall_cycles;
            stats.flushed += core.pipeline.flushed;
            stats.faults += core.pipeline.faulted;
        }
        // Dirty lines handed over during a snoop are written back too
        stats.write_backs += fabric.write_backs;
        stats.cores = cores;
        stats
    }

    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            accesses => self.hits as f64 / accesses as f64,
        }
    }
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cycles:                 {}", self.cycles)?;
        writeln!(f, "retired:                {}", self.retired)?;
        writeln!(f, "flushed:                {}", self.flushed)?;
        writeln!(f, "stall cycles:           {}", self.stall_cycles)?;
        writeln!(f, "faults:                 {}", self.faults)?;
        writeln!(
            f,
            "cache hits/misses:      {}/{} ({:.1}%)",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )?;
        writeln!(f, "evictions:              {}", self.evictions)?;
        writeln!(f, "invalidations:          {}", self.invalidations)?;
        writeln!(f, "write-backs:            {}", self.write_backs)?;
        writeln!(
            f,
            "bus transactions:       {} (read {}, write {}, upgrade {})",
            self.coherence_transactions, self.fabric.read_misses, self.fabric.write_misses, self.fabric.upgrades
        )?;
        writeln!(f, "bus messages:           {}", self.coherence_messages)?;
        writeln!(f, "memory line reads:      {}", self.memory_reads)?;
        write!(f, "memory line writes:     {}", self.memory_writes)?;
        for core in &self.cores {
            write!(
                f,
                "\ncore {}: retired {} stalls {} (hazard {}, memory {}) flushed {} hits {} misses {}",
                core.core,
                core.pipeline.retired,
                core.pipeline.stall_cycles,
                core.pipeline.hazard_stalls,
                core.pipeline.memory_stalls,
                core.pipeline.flushed,
                core.cache.hits,
                core.cache.misses,
            )?;
        }
        Ok(())
    }
}
