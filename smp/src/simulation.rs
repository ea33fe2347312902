use std::fmt::Write;

use coherence::{CacheConfig, CacheLineSnapshot, CoherenceDomain, ProtocolViolation};
use log::{debug, error, info};
use pipeline::{FaultRecord, Instruction, Pipeline, Stage, REGISTER_COUNT};

use crate::{
    config::SimConfig,
    error::SimError,
    port::CorePort,
    report::{CoreFault, CoreStats, CycleReport, SimStats},
};

/// A cycle-stepped multi-core machine: one pipeline and one private cache bank per core,
/// kept coherent over a shared bus.
///
/// Each [`step`](Simulation::step) first advances the bus, then every core in ascending id
/// order. Two simulations built from the same config and programs produce identical reports.
pub struct Simulation {
    config: SimConfig,
    cores: Vec<Pipeline>,
    domain: CoherenceDomain,
    cycle: u64,
    halted: bool,
}

impl Simulation {
    pub fn new(num_cores: usize, cache: CacheConfig, memory_size: u64) -> Result<Simulation, SimError> {
        Simulation::with_config(SimConfig {
            cores: num_cores,
            cache,
            memory_size,
            ..Default::default()
        })
    }

    pub fn with_config(config: SimConfig) -> Result<Simulation, SimError> {
        let domain = CoherenceDomain::new(config.cores, config.cache, config.memory_size, config.timing)?;
        info!(
            "{} cores, {} sets x {} ways x {} words, {:#x} bytes of memory",
            config.cores, config.cache.sets, config.cache.ways, config.cache.line_size, config.memory_size
        );

        Ok(Simulation {
            config,
            cores: (0..config.cores).map(|_| Pipeline::new()).collect(),
            domain,
            cycle: 0,
            halted: false,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    /// Cycles stepped so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn core(&self, core: usize) -> Result<&Pipeline, SimError> {
        self.cores.get(core).ok_or(SimError::NoSuchCore {
            core,
            cores: self.cores.len(),
        })
    }

    fn core_mut(&mut self, core: usize) -> Result<&mut Pipeline, SimError> {
        let cores = self.cores.len();
        self.cores.get_mut(core).ok_or(SimError::NoSuchCore { core, cores })
    }

    pub fn domain(&self) -> &CoherenceDomain {
        &self.domain
    }

    pub fn load_program(&mut self, core: usize, instructions: &[Instruction]) -> Result<(), SimError> {
        let words = instructions
            .iter()
            .map(Instruction::encode)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| SimError::InvalidProgram { core, source })?;
        self.load_program_words(core, words)
    }

    /// Loads raw instruction words. Words that don't decode fault when they reach decode.
    pub fn load_program_words(&mut self, core: usize, words: Vec<u64>) -> Result<(), SimError> {
        debug!("core {}: loading {} instructions", core, words.len());
        self.core_mut(core)?.load(words);
        self.domain.take_completion(core);
        Ok(())
    }

    pub fn step(&mut self) -> Result<CycleReport, SimError> {
        if self.halted {
            return Err(SimError::Halted);
        }
        let now = self.cycle;
        let mut report = CycleReport {
            cycle: now,
            ..Default::default()
        };

        match self.domain.tick() {
            Ok(completed) => report.coherence_transactions = completed.is_some() as u32,
            Err(violation) => return Err(self.halt(violation)),
        }

        let mut violation = None;
        for (id, core) in self.cores.iter_mut().enumerate() {
            let mut port = CorePort::new(id, &mut self.domain, now);
            let cycle = core.cycle(&mut port);
            if let Some(found) = port.violation.take() {
                violation = Some(found);
                break;
            }

            report.retired_instructions += cycle.retired;
            report.flushed += cycle.flushed;
            if cycle.stalled.is_some() {
                report.stalls += 1;
            }
            if let Some(FaultRecord { pc, fault }) = cycle.fault {
                report.faults.push(CoreFault { core: id, pc, fault });
            }
        }
        if let Some(violation) = violation {
            return Err(self.halt(violation));
        }
        for (id, core) in self.cores.iter().enumerate() {
            if core.is_idle() && self.domain.take_completion(id).is_some() {
                debug!("core {}: dropping result of a flushed access", id);
            }
        }

        if self.config.verify_invariants {
            if let Err(violation) = self.domain.verify() {
                return Err(self.halt(violation));
            }
        }

        self.cycle += 1;
        Ok(report)
    }

    fn halt(&mut self, violation: ProtocolViolation) -> SimError {
        self.halted = true;
        let dump = self.state_dump();
        error!("cycle {}: {}\n{}", self.cycle, violation, dump);
        SimError::CoherenceProtocolViolation { violation, dump }
    }

    /// Steps until every core is idle, a core faults, or `max_cycles` have elapsed.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> Result<Vec<CycleReport>, SimError> {
        let mut reports = Vec::new();
        while (reports.len() as u64) < max_cycles && !self.is_idle() && !self.has_pending_fault() {
            let report = self.step()?;
            let faulted = !report.faults.is_empty();
            reports.push(report);
            if faulted {
                break;
            }
        }
        Ok(reports)
    }

    /// No core has work left and the bus is quiet.
    pub fn is_idle(&self) -> bool {
        self.cores.iter().all(Pipeline::is_idle) && self.domain.is_quiescent()
    }

    fn has_pending_fault(&self) -> bool {
        self.cores.iter().any(|core| core.fault().is_some())
    }

    pub fn fault(&self, core: usize) -> Result<Option<CoreFault>, SimError> {
        Ok(self.core(core)?.fault().map(|FaultRecord { pc, fault }| CoreFault { core, pc, fault }))
    }

    pub fn acknowledge_fault(&mut self, core: usize) -> Result<CoreFault, SimError> {
        let FaultRecord { pc, fault } = self.core_mut(core)?.acknowledge_fault().ok_or(SimError::NoFault { core })?;
        info!("core {}: fault at pc {} acknowledged", core, pc);
        Ok(CoreFault { core, pc, fault })
    }

    pub fn inspect_cache_line(&self, core: usize, address: u64) -> Result<CacheLineSnapshot, SimError> {
        self.core(core)?;
        Ok(self.domain.snapshot(core, address)?)
    }

    pub fn inspect_register(&self, core: usize, reg: usize) -> Result<u64, SimError> {
        if reg >= REGISTER_COUNT {
            return Err(SimError::NoSuchRegister { reg });
        }
        Ok(self.core(core)?.regs().read(reg as u8))
    }

    /// Evicts one way of a core's cache, writing it back when dirty.
    pub fn evict(&mut self, core: usize, set: usize, way: usize) -> Result<bool, SimError> {
        self.core(core)?;
        Ok(self.domain.evict(core, set, way)?)
    }

    /// Evicts every line of every cache, so memory holds the latest value of every word.
    pub fn flush_caches(&mut self) -> Result<(), SimError> {
        Ok(self.domain.flush()?)
    }

    /// Reads memory directly, ignoring any newer value sitting in a cache.
    pub fn read_memory(&self, address: u64) -> Result<u64, SimError> {
        Ok(self.domain.memory().read_word(address)?)
    }

    /// Writes memory directly. Cached copies of the line are not updated.
    pub fn write_memory(&mut self, address: u64, value: u64) -> Result<(), SimError> {
        Ok(self.domain.memory_mut().write_word(address, value)?)
    }

    pub fn dump_stats(&self) -> SimStats {
        let domain = self.domain.stats();
        let cores = self
            .cores
            .iter()
            .zip(domain.banks)
            .enumerate()
            .map(|(core, (pipeline, cache))| CoreStats {
                core,
                cache,
                pipeline: pipeline.stats(),
            })
            .collect();
        SimStats::collect(self.cycle, cores, domain.fabric, domain.memory)
    }

    /// Every core's pipeline and registers, then every cache and the bus.
    pub fn state_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "cycle {}", self.cycle);
        for (id, core) in self.cores.iter().enumerate() {
            let _ = write!(out, "core {}: pc {}", id, core.pc());
            if let Some(fault) = core.fault() {
                let _ = write!(out, " faulted at {}: {}", fault.pc, fault.fault);
            }
            out.push('\n');
            let stages = [Stage::Fetch, Stage::Decode, Stage::Execute, Stage::Memory];
            for (stage, latch) in stages.iter().zip(core.latches()) {
                if let Some(instr) = latch {
                    let text = match instr.decoded {
                        Some(decoded) => decoded.to_string(),
                        None => format!("{:#018x}", instr.word),
                    };
                    let _ = writeln!(out, "  {:?}: pc {} {}", stage, instr.pc, text);
                }
            }
            let regs = core.regs().values();
            let live: Vec<String> = (1..REGISTER_COUNT)
                .filter(|&reg| regs[reg] != 0)
                .map(|reg| format!("r{}={:#x}", reg, regs[reg]))
                .collect();
            if !live.is_empty() {
                let _ = writeln!(out, "  {}", live.join(" "));
            }
        }
        out.push_str(&self.domain.dump());
        out
    }
}
