use common::util;
use log::trace;

use crate::{
    config::{CacheConfig, Location},
    error::{AccessError, ProtocolViolation},
    line::{fill_state, transition, BusAction, CacheLine, LineEvent, LineState},
};

pub type BankId = usize;

/// Transactions a bank can put on the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// BusRd: fetch a line for reading.
    ReadMiss,
    /// BusRdX: fetch a line and invalidate every other copy.
    WriteMiss,
    /// BusUpgr: already holding the line Shared, invalidate every other copy.
    Upgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoopKind {
    Read,
    Invalidate,
}

impl SnoopKind {
    fn event(self) -> LineEvent {
        match self {
            SnoopKind::Read => LineEvent::SnoopRead,
            SnoopKind::Invalidate => LineEvent::SnoopInvalidate,
        }
    }
}

/// A peer's answer to a snoop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnoopResponse {
    pub has_line: bool,
    pub prior: LineState,
    /// Contents of the line before the snoop took effect
    pub data: Option<Box<[u8]>>,
    pub was_modified: bool,
    pub action: BusAction,
}

impl SnoopResponse {
    fn absent() -> SnoopResponse {
        SnoopResponse {
            has_line: false,
            prior: LineState::Invalid,
            data: None,
            was_modified: false,
            action: BusAction::None,
        }
    }
}

/// Outcome of a bus transaction as seen by the requesting bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricResult {
    /// Line contents. Empty for an upgrade, which moves no data.
    pub data: Box<[u8]>,
    /// Peer that supplied the line, `None` when it came from memory
    pub supplier: Option<BankId>,
    /// Some peer still holds the line after the transaction
    pub was_shared: bool,
}

/// The bank's view of the bus. Snooping the other banks is the implementor's job.
pub trait Interconnect {
    fn request(&mut self, line_address: u64, kind: RequestKind) -> Result<FabricResult, ProtocolViolation>;
    fn write_back(&mut self, line_address: u64, data: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessOutcome {
    /// Word read, or the word just written
    pub value: u64,
    pub hit: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BankStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Lines lost to a peer's invalidating snoop
    pub invalidations: u64,
    pub write_backs: u64,
    pub upgrades: u64,
}

/// Read-only view of the line an address maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLineSnapshot {
    pub state: LineState,
    pub tag: u64,
    pub valid: bool,
    pub set: usize,
    /// Way holding the line, `None` when the address isn't cached
    pub way: Option<usize>,
}

/// A set-associative, write-back, write-allocate cache kept coherent by MESI snooping.
pub struct CacheBank {
    id: BankId,
    config: CacheConfig,
    memory_size: u64,
    sets: Vec<Vec<CacheLine>>,
    mru_counter: u64,
    stats: BankStats,
}

impl CacheBank {
    pub fn new(id: BankId, config: CacheConfig, memory_size: u64) -> CacheBank {
        let line_bytes = config.line_bytes() as usize;
        let sets = (0..config.sets)
            .map(|_| (0..config.ways).map(|_| CacheLine::new(line_bytes)).collect())
            .collect();

        CacheBank {
            id,
            config,
            memory_size,
            sets,
            mru_counter: 0,
            stats: BankStats::default(),
        }
    }

    pub fn id(&self) -> BankId {
        self.id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> BankStats {
        self.stats
    }

    pub fn check_address(&self, address: u64) -> Result<(), AccessError> {
        match address.checked_add(common::WORD_BYTES) {
            Some(end) if end <= self.memory_size => {}
            _ => {
                return Err(AccessError::InvalidAddress {
                    address,
                    memory_size: self.memory_size,
                })
            }
        }
        if !util::is_word_aligned(address) {
            return Err(AccessError::Misaligned { address });
        }
        Ok(())
    }

    fn find(&self, location: &Location) -> Option<usize> {
        self.sets[location.set]
            .iter()
            .position(|line| line.holds(location.tag))
    }

    fn touch(&mut self, set: usize, way: usize) {
        self.mru_counter += 1;
        self.sets[set][way].last_used = self.mru_counter;
    }

    /// First invalid way, otherwise the least recently used one.
    fn victim(&self, set: usize) -> usize {
        let ways = &self.sets[set];
        ways.iter()
            .position(|line| !line.state.is_valid())
            .or_else(|| {
                ways.iter()
                    .enumerate()
                    .min_by_key(|(_, line)| line.last_used)
                    .map(|(way, _)| way)
            })
            .unwrap_or(0)
    }

    /// State of the line holding `address`, if any.
    pub fn probe(&self, address: u64) -> Option<LineState> {
        let location = self.config.locate(address);
        self.find(&location).map(|way| self.sets[location.set][way].state)
    }

    /// Whether a miss on `address` would have to write back a Modified victim first.
    pub fn miss_writes_back(&self, address: u64) -> bool {
        let location = self.config.locate(address);
        let way = self.victim(location.set);
        self.sets[location.set][way].state == LineState::Modified
    }

    /// Whether the access can't complete locally and has to go through the fabric.
    pub fn needs_transaction(&self, address: u64, write: bool) -> bool {
        match self.probe(address) {
            None => true,
            Some(LineState::Shared) => write,
            Some(_) => false,
        }
    }

    pub fn read<B: Interconnect + ?Sized>(
        &mut self,
        address: u64,
        bus: &mut B,
    ) -> Result<AccessOutcome, AccessError> {
        self.check_address(address)?;
        let location = self.config.locate(address);

        if let Some(way) = self.find(&location) {
            let line = &mut self.sets[location.set][way];
            let (next, _) = transition(line.state, LineEvent::LocalRead);
            line.state = next;
            let value = util::read_word(&line.data, location.offset);
            self.touch(location.set, way);
            self.stats.hits += 1;
            trace!("bank {}: read hit {:#x} = {:#x}", self.id, address, value);
            return Ok(AccessOutcome { value, hit: true });
        }

        self.stats.misses += 1;
        let line_address = self.config.line_address(location.set, location.tag);
        let way = self.make_room(location.set, bus);
        let result = bus.request(line_address, RequestKind::ReadMiss)?;
        let state = fill_state(result.was_shared);
        self.install(location, way, state, result.data);

        let value = util::read_word(&self.sets[location.set][way].data, location.offset);
        trace!("bank {}: read miss {:#x} = {:#x}, filled {}", self.id, address, value, state);
        Ok(AccessOutcome { value, hit: false })
    }

    /// Returns whether the write hit in a line that was already writable or Shared.
    pub fn write<B: Interconnect + ?Sized>(
        &mut self,
        address: u64,
        value: u64,
        bus: &mut B,
    ) -> Result<bool, AccessError> {
        self.check_address(address)?;
        let location = self.config.locate(address);
        let line_address = self.config.line_address(location.set, location.tag);

        let (way, hit) = match self.find(&location) {
            Some(way) => {
                let (next, action) = transition(self.sets[location.set][way].state, LineEvent::LocalWrite);
                if action == BusAction::BroadcastSnoopInvalidate {
                    bus.request(line_address, RequestKind::Upgrade)?;
                    self.stats.upgrades += 1;
                }
                self.sets[location.set][way].state = next;
                self.stats.hits += 1;
                (way, true)
            }
            None => {
                self.stats.misses += 1;
                let way = self.make_room(location.set, bus);
                let (next, _) = transition(LineState::Invalid, LineEvent::LocalWrite);
                let result = bus.request(line_address, RequestKind::WriteMiss)?;
                self.install(location, way, next, result.data);
                (way, false)
            }
        };

        util::write_word(&mut self.sets[location.set][way].data, location.offset, value);
        self.touch(location.set, way);
        trace!("bank {}: write {} {:#x} = {:#x}", self.id, if hit { "hit" } else { "miss" }, address, value);
        Ok(hit)
    }

    fn install(&mut self, location: Location, way: usize, state: LineState, data: Box<[u8]>) {
        debug_assert_eq!(data.len() as u64, self.config.line_bytes());
        let line = &mut self.sets[location.set][way];
        line.tag = location.tag;
        line.state = state;
        line.data = data;
        self.touch(location.set, way);
    }

    fn make_room<B: Interconnect + ?Sized>(&mut self, set: usize, bus: &mut B) -> usize {
        let way = self.victim(set);
        self.evict_way(set, way, bus);
        way
    }

    fn evict_way<B: Interconnect + ?Sized>(&mut self, set: usize, way: usize, bus: &mut B) -> bool {
        let line_address = self.config.line_address(set, self.sets[set][way].tag);
        let line = &mut self.sets[set][way];
        if !line.state.is_valid() {
            return false;
        }
        let (next, action) = transition(line.state, LineEvent::Evict);
        if action.writes_back() {
            bus.write_back(line_address, &line.data);
            self.stats.write_backs += 1;
        }
        trace!("bank {}: evicting {:#x} ({})", self.id, line_address, line.state);
        line.state = next;
        self.stats.evictions += 1;
        true
    }

    /// Evicts a specific way, writing it back when Modified. Returns whether a line was present.
    pub fn evict<B: Interconnect + ?Sized>(
        &mut self,
        set: usize,
        way: usize,
        bus: &mut B,
    ) -> Result<bool, AccessError> {
        if set >= self.config.sets || way >= self.config.ways {
            return Err(AccessError::NoSuchWay { set, way });
        }
        Ok(self.evict_way(set, way, bus))
    }

    /// Applies a peer's bus transaction to the local copy of the line.
    pub fn snoop(&mut self, line_address: u64, kind: SnoopKind) -> SnoopResponse {
        let location = self.config.locate(line_address);
        let Some(way) = self.find(&location) else {
            return SnoopResponse::absent();
        };

        let line = &mut self.sets[location.set][way];
        let prior = line.state;
        let (next, action) = transition(prior, kind.event());
        line.state = next;
        if next == LineState::Invalid {
            self.stats.invalidations += 1;
        }
        trace!("bank {}: snoop {:?} {:#x}, {} -> {}", self.id, kind, line_address, prior, next);

        SnoopResponse {
            has_line: true,
            prior,
            data: Some(line.data.clone()),
            was_modified: prior == LineState::Modified,
            action,
        }
    }

    pub fn snapshot(&self, address: u64) -> CacheLineSnapshot {
        let location = self.config.locate(address);
        match self.find(&location) {
            Some(way) => {
                let line = &self.sets[location.set][way];
                CacheLineSnapshot {
                    state: line.state,
                    tag: line.tag,
                    valid: true,
                    set: location.set,
                    way: Some(way),
                }
            }
            None => CacheLineSnapshot {
                state: LineState::Invalid,
                tag: location.tag,
                valid: false,
                set: location.set,
                way: None,
            },
        }
    }

    /// Every valid line as `(line address, state)`.
    pub fn valid_lines(&self) -> impl Iterator<Item = (u64, LineState)> + '_ {
        self.sets.iter().enumerate().flat_map(move |(set, ways)| {
            ways.iter()
                .filter(|line| line.state.is_valid())
                .map(move |line| (self.config.line_address(set, line.tag), line.state))
        })
    }

    /// `(set, way)` of every valid line.
    pub fn occupied_ways(&self) -> Vec<(usize, usize)> {
        let mut occupied = Vec::new();
        for (set, ways) in self.sets.iter().enumerate() {
            for (way, line) in ways.iter().enumerate() {
                if line.state.is_valid() {
                    occupied.push((set, way));
                }
            }
        }
        occupied
    }

    #[cfg(any(test, feature = "fault-injection"))]
    pub(crate) fn force_state(&mut self, address: u64, state: LineState) {
        let location = self.config.locate(address);
        let way = self.find(&location).unwrap_or_else(|| self.victim(location.set));
        let line = &mut self.sets[location.set][way];
        line.tag = location.tag;
        line.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A bus with no peers, backed by flat memory.
    pub struct SoloBus {
        pub memory: Vec<u8>,
        pub line_bytes: usize,
        pub requests: Vec<(u64, RequestKind)>,
        pub write_backs: Vec<u64>,
        pub shared: bool,
    }

    impl SoloBus {
        pub fn new(size: usize, line_bytes: usize) -> SoloBus {
            SoloBus {
                memory: vec![0; size],
                line_bytes,
                requests: Vec::new(),
                write_backs: Vec::new(),
                shared: false,
            }
        }
    }

    impl Interconnect for SoloBus {
        fn request(&mut self, line_address: u64, kind: RequestKind) -> Result<FabricResult, ProtocolViolation> {
            self.requests.push((line_address, kind));
            let start = line_address as usize;
            let data = match kind {
                RequestKind::Upgrade => Box::default(),
                _ => self.memory[start..start + self.line_bytes].to_vec().into_boxed_slice(),
            };
            Ok(FabricResult {
                data,
                supplier: None,
                was_shared: self.shared && kind == RequestKind::ReadMiss,
            })
        }

        fn write_back(&mut self, line_address: u64, data: &[u8]) {
            self.write_backs.push(line_address);
            let start = line_address as usize;
            self.memory[start..start + data.len()].copy_from_slice(data);
        }
    }

    fn bank(sets: usize, ways: usize) -> CacheBank {
        CacheBank::new(0, CacheConfig { sets, ways, line_size: 4 }, 1024)
    }

    #[test]
    fn read_miss_then_hit() {
        let mut bus = SoloBus::new(1024, 32);
        util::write_word(&mut bus.memory, 0x48, 99);
        let mut bank = bank(4, 2);

        assert_eq!(bank.read(0x48, &mut bus), Ok(AccessOutcome { value: 99, hit: false }));
        assert_eq!(bank.probe(0x48), Some(LineState::Exclusive));
        assert_eq!(bank.read(0x40, &mut bus), Ok(AccessOutcome { value: 0, hit: true }));
        assert_eq!(bus.requests, vec![(0x40, RequestKind::ReadMiss)]);

        let stats = bank.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn shared_fill_then_upgrade_on_write() {
        let mut bus = SoloBus::new(1024, 32);
        bus.shared = true;
        let mut bank = bank(4, 2);

        bank.read(0x20, &mut bus).unwrap();
        assert_eq!(bank.probe(0x20), Some(LineState::Shared));
        assert!(bank.needs_transaction(0x20, true));
        assert!(!bank.needs_transaction(0x20, false));

        assert_eq!(bank.write(0x28, 5, &mut bus), Ok(true));
        assert_eq!(bank.probe(0x20), Some(LineState::Modified));
        assert_eq!(bus.requests.last(), Some(&(0x20, RequestKind::Upgrade)));
        assert_eq!(bank.stats().upgrades, 1);
    }

    #[test]
    fn exclusive_write_is_silent() {
        let mut bus = SoloBus::new(1024, 32);
        let mut bank = bank(4, 2);

        bank.read(0x20, &mut bus).unwrap();
        assert!(!bank.needs_transaction(0x20, true));
        bank.write(0x20, 1, &mut bus).unwrap();
        assert_eq!(bank.probe(0x20), Some(LineState::Modified));
        assert_eq!(bus.requests.len(), 1);
    }

    #[test]
    fn least_recently_used_way_is_replaced() {
        let mut bus = SoloBus::new(1024, 32);
        let mut bank = bank(1, 2);

        bank.read(0x00, &mut bus).unwrap();
        bank.read(0x20, &mut bus).unwrap();
        bank.read(0x00, &mut bus).unwrap();
        bank.read(0x40, &mut bus).unwrap();

        assert_eq!(bank.probe(0x00), Some(LineState::Exclusive));
        assert_eq!(bank.probe(0x20), None);
        assert_eq!(bank.probe(0x40), Some(LineState::Exclusive));
        assert_eq!(bank.stats().evictions, 1);
        assert!(bus.write_backs.is_empty());
    }

    #[test]
    fn modified_victim_is_written_back() {
        let mut bus = SoloBus::new(1024, 32);
        let mut bank = bank(1, 1);

        assert_eq!(bank.write(0x08, 0xabc, &mut bus), Ok(false));
        assert!(bank.miss_writes_back(0x100));
        bank.read(0x100, &mut bus).unwrap();

        assert_eq!(bus.write_backs, vec![0x00]);
        assert_eq!(util::read_word(&bus.memory, 0x08), 0xabc);
        assert_eq!(bank.stats().write_backs, 1);
    }

    #[test]
    fn explicit_eviction() {
        let mut bus = SoloBus::new(1024, 32);
        let mut bank = bank(2, 2);

        bank.write(0x20, 7, &mut bus).unwrap();
        let snapshot = bank.snapshot(0x20);
        assert_eq!(snapshot.set, 1);
        let way = snapshot.way.unwrap();

        assert_eq!(bank.evict(1, way, &mut bus), Ok(true));
        assert_eq!(util::read_word(&bus.memory, 0x20), 7);
        assert_eq!(bank.evict(1, way, &mut bus), Ok(false));
        assert_eq!(bank.evict(2, 0, &mut bus), Err(AccessError::NoSuchWay { set: 2, way: 0 }));
    }

    #[test]
    fn snooping_a_modified_line() {
        let mut bus = SoloBus::new(1024, 32);
        let mut bank = bank(4, 2);
        bank.write(0x40, 11, &mut bus).unwrap();

        let response = bank.snoop(0x40, SnoopKind::Read);
        assert!(response.has_line && response.was_modified);
        assert_eq!(response.action, BusAction::WriteBackAndSupply);
        assert_eq!(util::read_word(response.data.as_deref().unwrap(), 0), 11);
        assert_eq!(bank.probe(0x40), Some(LineState::Shared));

        let response = bank.snoop(0x40, SnoopKind::Invalidate);
        assert_eq!(response.prior, LineState::Shared);
        assert_eq!(bank.probe(0x40), None);
        assert_eq!(bank.stats().invalidations, 1);
    }

    #[test]
    fn invalidating_a_modified_line_only_writes_back() {
        let mut bus = SoloBus::new(1024, 32);
        let mut bank = bank(4, 2);
        bank.write(0x40, 11, &mut bus).unwrap();

        let response = bank.snoop(0x40, SnoopKind::Invalidate);
        assert_eq!(response.prior, LineState::Modified);
        assert_eq!(response.action, BusAction::WriteBack);
        assert_eq!(util::read_word(response.data.as_deref().unwrap(), 0), 11);
        assert_eq!(bank.probe(0x40), None);
    }

    #[test]
    fn snooping_an_absent_line_is_a_no_op() {
        let mut bank = bank(4, 2);
        let response = bank.snoop(0x40, SnoopKind::Invalidate);
        assert!(!response.has_line);
        assert_eq!(bank.stats(), BankStats::default());
    }

    #[test]
    fn bad_addresses() {
        let mut bus = SoloBus::new(1024, 32);
        let mut bank = bank(4, 2);
        assert!(matches!(bank.read(1024, &mut bus), Err(AccessError::InvalidAddress { .. })));
        assert_eq!(bank.write(0x13, 0, &mut bus), Err(AccessError::Misaligned { address: 0x13 }));
        assert!(bus.requests.is_empty());
    }
}
