use std::{collections::BTreeMap, fmt::Write};

use log::{debug, error};

use crate::{
    bank::{AccessOutcome, BankId, BankStats, CacheBank, CacheLineSnapshot, FabricResult, Interconnect, RequestKind},
    config::{CacheConfig, Timing},
    error::{AccessError, ConfigError, ProtocolViolation},
    fabric::{Fabric, FabricStats, Operation, Transaction},
    line::LineState,
    memory::{Memory, MemoryStats},
};

/// A bank's handle on the bus: the fabric, memory and every bank except itself.
pub struct FabricPort<'a> {
    requester: BankId,
    fabric: &'a mut Fabric,
    memory: &'a mut Memory,
    below: &'a mut [CacheBank],
    above: &'a mut [CacheBank],
}

impl Interconnect for FabricPort<'_> {
    fn request(&mut self, line_address: u64, kind: RequestKind) -> Result<FabricResult, ProtocolViolation> {
        let peers = self.below.iter_mut().chain(self.above.iter_mut());
        self.fabric.broadcast(self.requester, peers, self.memory, line_address, kind)
    }

    fn write_back(&mut self, line_address: u64, data: &[u8]) {
        debug!("fabric: bank {} writes back {:#x}", self.requester, line_address);
        self.memory.write_line(line_address, data);
    }
}

/// A bus transaction that finished, waiting for its core to pick up the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub transaction: Transaction,
    pub outcome: Result<AccessOutcome, AccessError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DomainStats {
    pub banks: Vec<BankStats>,
    pub fabric: FabricStats,
    pub memory: MemoryStats,
}

/// Every cache bank, the fabric between them and the memory behind it.
///
/// Banks live in one arena indexed by [`BankId`]; a bank reaches its peers only through a
/// [`FabricPort`] carved out of the arena for the duration of one access.
pub struct CoherenceDomain {
    config: CacheConfig,
    banks: Vec<CacheBank>,
    fabric: Fabric,
    memory: Memory,
    completions: Vec<Option<Completion>>,
}

impl CoherenceDomain {
    pub fn new(banks: usize, config: CacheConfig, memory_size: u64, timing: Timing) -> Result<Self, ConfigError> {
        if banks == 0 {
            return Err(ConfigError::NoBanks);
        }
        config.validate(memory_size)?;

        Ok(CoherenceDomain {
            config,
            banks: (0..banks).map(|id| CacheBank::new(id, config, memory_size)).collect(),
            fabric: Fabric::new(timing),
            memory: Memory::new(memory_size, config.line_bytes()),
            completions: vec![None; banks],
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn bank(&self, bank: BankId) -> Option<&CacheBank> {
        self.banks.get(bank)
    }

    pub fn banks(&self) -> &[CacheBank] {
        &self.banks
    }

    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    fn with_port<R>(
        &mut self,
        bank: BankId,
        f: impl FnOnce(&mut CacheBank, &mut FabricPort<'_>) -> R,
    ) -> Result<R, AccessError> {
        if bank >= self.banks.len() {
            return Err(AccessError::NoSuchBank { bank });
        }
        let (below, rest) = self.banks.split_at_mut(bank);
        let (target, above) = rest.split_first_mut().ok_or(AccessError::NoSuchBank { bank })?;
        let mut port = FabricPort {
            requester: bank,
            fabric: &mut self.fabric,
            memory: &mut self.memory,
            below,
            above,
        };
        Ok(f(target, &mut port))
    }

    /// Reads through `bank` right now, running any bus transaction instantly.
    pub fn read(&mut self, bank: BankId, address: u64) -> Result<AccessOutcome, AccessError> {
        self.with_port(bank, |cache, port| cache.read(address, port))?
    }

    pub fn write(&mut self, bank: BankId, address: u64, value: u64) -> Result<AccessOutcome, AccessError> {
        let hit = self.with_port(bank, |cache, port| cache.write(address, value, port))??;
        Ok(AccessOutcome { value, hit })
    }

    pub fn perform(&mut self, bank: BankId, operation: Operation) -> Result<AccessOutcome, AccessError> {
        match operation {
            Operation::Read { address } => self.read(bank, address),
            Operation::Write { address, value } => self.write(bank, address, value),
        }
    }

    pub fn evict(&mut self, bank: BankId, set: usize, way: usize) -> Result<bool, AccessError> {
        self.with_port(bank, |cache, port| cache.evict(set, way, port))?
    }

    /// Evicts every valid line in every bank, writing dirty ones back.
    pub fn flush(&mut self) -> Result<(), AccessError> {
        for bank in 0..self.banks.len() {
            for (set, way) in self.banks[bank].occupied_ways() {
                self.evict(bank, set, way)?;
            }
        }
        Ok(())
    }

    pub fn check_address(&self, address: u64) -> Result<(), AccessError> {
        self.memory.check(address)
    }

    pub fn needs_transaction(&self, bank: BankId, operation: &Operation) -> bool {
        self.banks
            .get(bank)
            .map_or(false, |cache| cache.needs_transaction(operation.address(), operation.is_write()))
    }

    pub fn submit(&mut self, bank: BankId, operation: Operation, now: u64) -> u64 {
        self.fabric.submit(bank, operation, now)
    }

    pub fn is_pending(&self, bank: BankId) -> bool {
        self.fabric.is_pending(bank)
    }

    pub fn take_completion(&mut self, bank: BankId) -> Option<Completion> {
        self.completions.get_mut(bank)?.take()
    }

    /// No transaction queued, on the bus, or waiting to be collected.
    pub fn is_quiescent(&self) -> bool {
        self.fabric.is_idle() && self.completions.iter().all(Option::is_none)
    }

    /// Bus cycles for `transaction`, priced from the state of the banks when it is granted.
    fn latency(&self, transaction: &Transaction) -> u32 {
        let timing = self.fabric.timing();
        let address = transaction.operation.address();
        let Some(requester) = self.banks.get(transaction.bank) else {
            return timing.snoop_cycles;
        };

        match requester.probe(address) {
            Some(LineState::Shared) if transaction.operation.is_write() => return timing.upgrade(),
            Some(_) => return timing.snoop_cycles,
            None => {}
        }

        let mut peers = self
            .banks
            .iter()
            .filter(|bank| bank.id() != transaction.bank)
            .filter_map(|bank| bank.probe(address));
        let mut cycles = timing.memory_fill();
        if transaction.operation.is_write() {
            // an invalidated dirty copy goes to memory before the fill reads it back
            if peers.any(|state| state == LineState::Modified) {
                cycles += timing.flush();
            }
        } else if peers.next().is_some() {
            cycles = timing.cache_to_cache(self.config.line_size);
        }
        if requester.miss_writes_back(address) {
            cycles += timing.flush();
        }
        cycles
    }

    /// Advances the fabric by one cycle. A transaction completing this cycle has its effects
    /// applied to every bank at once, and its result parked for the requesting core.
    pub fn tick(&mut self) -> Result<Option<Transaction>, ProtocolViolation> {
        if let Some(next) = self.fabric.next_grant() {
            let latency = self.latency(&next);
            self.fabric.grant(latency);
        }
        let Some(done) = self.fabric.advance() else {
            return Ok(None);
        };

        let outcome = match self.perform(done.bank, done.operation) {
            Err(AccessError::Protocol(violation)) => return Err(violation),
            outcome => outcome,
        };
        debug!("fabric: #{} for bank {} done: {:?}", done.ticket, done.bank, outcome);
        if let Some(slot) = self.completions.get_mut(done.bank) {
            *slot = Some(Completion {
                transaction: done,
                outcome,
            });
        }
        Ok(Some(done))
    }

    /// Checks single-writer/multi-reader across all banks.
    pub fn verify(&self) -> Result<(), ProtocolViolation> {
        let mut lines: BTreeMap<u64, Vec<(BankId, LineState)>> = BTreeMap::new();
        for bank in &self.banks {
            for (line, state) in bank.valid_lines() {
                lines.entry(line).or_default().push((bank.id(), state));
            }
        }
        for (line, holders) in lines {
            let owners = holders.iter().filter(|(_, state)| state.is_owned()).count();
            if owners > 1 || (owners == 1 && holders.len() > 1) {
                error!("line {:#x} held as {:?}", line, holders);
                return Err(ProtocolViolation { line, holders });
            }
        }
        Ok(())
    }

    /// State of the line holding `address` in `bank`. Any byte of the line will do.
    pub fn snapshot(&self, bank: BankId, address: u64) -> Result<CacheLineSnapshot, AccessError> {
        self.memory.check_range(address)?;
        let cache = self.banks.get(bank).ok_or(AccessError::NoSuchBank { bank })?;
        Ok(cache.snapshot(address))
    }

    pub fn stats(&self) -> DomainStats {
        DomainStats {
            banks: self.banks.iter().map(CacheBank::stats).collect(),
            fabric: self.fabric.stats(),
            memory: self.memory.stats(),
        }
    }

    /// Human readable dump of every valid line and the bus queue.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for bank in &self.banks {
            let _ = write!(out, "bank {}:", bank.id());
            let mut any = false;
            for (line, state) in bank.valid_lines() {
                let _ = write!(out, " {:#x}={}", line, state.letter());
                any = true;
            }
            if !any {
                out.push_str(" empty");
            }
            out.push('\n');
        }
        match self.fabric.in_flight() {
            Some(t) => {
                let _ = writeln!(
                    out,
                    "bus: #{} bank {} {:?} (queued at cycle {})",
                    t.ticket, t.bank, t.operation, t.submitted
                );
            }
            None => out.push_str("bus: idle\n"),
        }
        for t in self.fabric.queued() {
            let _ = writeln!(
                out,
                "  queued #{} bank {} {:?} at cycle {}",
                t.ticket, t.bank, t.operation, t.submitted
            );
        }
        out
    }

    /// Overwrites a line's state behind the protocol's back, for exercising the checks.
    #[cfg(any(test, feature = "fault-injection"))]
    pub fn force_state(&mut self, bank: BankId, address: u64, state: LineState) {
        if let Some(cache) = self.banks.get_mut(bank) {
            cache.force_state(address, state);
        }
    }
}
