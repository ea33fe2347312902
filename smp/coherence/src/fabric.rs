use std::collections::VecDeque;

use log::debug;

use crate::{
    bank::{BankId, CacheBank, FabricResult, RequestKind, SnoopKind, SnoopResponse},
    config::Timing,
    error::ProtocolViolation,
    line::LineState,
    memory::Memory,
};

/// A core access that has to go through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read { address: u64 },
    Write { address: u64, value: u64 },
}

impl Operation {
    pub fn address(&self) -> u64 {
        match *self {
            Operation::Read { address } | Operation::Write { address, .. } => address,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Operation::Write { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub ticket: u64,
    pub bank: BankId,
    pub operation: Operation,
    /// Cycle the transaction was queued in
    pub submitted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    transaction: Transaction,
    remaining: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FabricStats {
    /// Bus transactions carried out, by kind
    pub read_misses: u64,
    pub write_misses: u64,
    pub upgrades: u64,
    /// One per peer snooped
    pub messages: u64,
    pub cache_to_cache: u64,
    pub write_backs: u64,
    /// Cycles the bus spent carrying a transaction
    pub busy_cycles: u64,
}

impl FabricStats {
    pub fn transactions(&self) -> u64 {
        self.read_misses + self.write_misses + self.upgrades
    }
}

/// The shared snooping bus.
///
/// Holds at most one transaction in flight. Everything else waits in FIFO order, which gives
/// every core a single agreed order of coherence events.
pub struct Fabric {
    timing: Timing,
    queue: VecDeque<Transaction>,
    in_flight: Option<InFlight>,
    next_ticket: u64,
    stats: FabricStats,
}

impl Fabric {
    pub fn new(timing: Timing) -> Fabric {
        Fabric {
            timing,
            queue: VecDeque::new(),
            in_flight: None,
            next_ticket: 0,
            stats: FabricStats::default(),
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn stats(&self) -> FabricStats {
        self.stats
    }

    pub fn submit(&mut self, bank: BankId, operation: Operation, now: u64) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        debug!("fabric: bank {} queued {:?} as #{}", bank, operation, ticket);
        self.queue.push_back(Transaction {
            ticket,
            bank,
            operation,
            submitted: now,
        });
        ticket
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }

    /// Whether `bank` has a transaction queued or on the bus.
    pub fn is_pending(&self, bank: BankId) -> bool {
        self.in_flight.map_or(false, |f| f.transaction.bank == bank)
            || self.queue.iter().any(|t| t.bank == bank)
    }

    pub fn in_flight(&self) -> Option<&Transaction> {
        self.in_flight.as_ref().map(|f| &f.transaction)
    }

    pub fn queued(&self) -> impl Iterator<Item = &Transaction> {
        self.queue.iter()
    }

    /// The transaction that would be granted next, if the bus is free.
    pub fn next_grant(&self) -> Option<Transaction> {
        match self.in_flight {
            Some(_) => None,
            None => self.queue.front().copied(),
        }
    }

    pub fn grant(&mut self, latency: u32) {
        if self.in_flight.is_some() {
            return;
        }
        if let Some(transaction) = self.queue.pop_front() {
            debug!(
                "fabric: granted #{} to bank {} for {} cycles",
                transaction.ticket, transaction.bank, latency
            );
            self.in_flight = Some(InFlight {
                transaction,
                remaining: latency.max(1),
            });
        }
    }

    /// Spends one bus cycle. Returns the transaction whose last cycle just elapsed.
    pub fn advance(&mut self) -> Option<Transaction> {
        let in_flight = self.in_flight.as_mut()?;
        self.stats.busy_cycles += 1;
        in_flight.remaining -= 1;
        if in_flight.remaining > 0 {
            return None;
        }
        let done = in_flight.transaction;
        self.in_flight = None;
        Some(done)
    }

    /// Broadcasts a request to `peers` (in ascending bank order) and gathers the line.
    ///
    /// Each peer's side of the transaction follows the bus action its line transition asked
    /// for. A write-back lands in memory before anything is read from it, so a line that no peer
    /// supplies still comes back current.
    pub fn broadcast<'a, I>(
        &mut self,
        requester: BankId,
        peers: I,
        memory: &mut Memory,
        line_address: u64,
        kind: RequestKind,
    ) -> Result<FabricResult, ProtocolViolation>
    where
        I: IntoIterator<Item = &'a mut CacheBank>,
    {
        let snoop = match kind {
            RequestKind::ReadMiss => SnoopKind::Read,
            RequestKind::WriteMiss | RequestKind::Upgrade => SnoopKind::Invalidate,
        };
        match kind {
            RequestKind::ReadMiss => self.stats.read_misses += 1,
            RequestKind::WriteMiss => self.stats.write_misses += 1,
            RequestKind::Upgrade => self.stats.upgrades += 1,
        }

        let mut holders: Vec<(BankId, SnoopResponse)> = Vec::new();
        for peer in peers {
            debug_assert_ne!(peer.id(), requester);
            self.stats.messages += 1;
            let response = peer.snoop(line_address, snoop);
            if response.has_line {
                holders.push((peer.id(), response));
            }
        }
        debug!(
            "fabric: bank {} {:?} {:#x}, holders {:?}",
            requester,
            kind,
            line_address,
            holders.iter().map(|(id, r)| (*id, r.prior, r.action)).collect::<Vec<_>>()
        );

        let owners = holders.iter().filter(|(_, r)| r.prior.is_owned()).count();
        if owners > 1 || (owners == 1 && (holders.len() > 1 || kind == RequestKind::Upgrade)) {
            return Err(ProtocolViolation {
                line: line_address,
                holders: holders.iter().map(|(id, r)| (*id, r.prior)).collect(),
            });
        }

        let was_shared = kind == RequestKind::ReadMiss && !holders.is_empty();
        let mut supplied = None;
        for (id, response) in holders {
            let Some(data) = response.data else {
                continue;
            };
            if response.action.writes_back() {
                memory.write_line(line_address, &data);
                self.stats.write_backs += 1;
            }
            // A clean Shared copy answers a read as well as an owner would.
            let supplies = match kind {
                RequestKind::ReadMiss => response.action.supplies() || response.prior == LineState::Shared,
                RequestKind::WriteMiss | RequestKind::Upgrade => response.action.supplies(),
            };
            if supplies && supplied.is_none() {
                supplied = Some((id, data));
            }
        }

        let (data, supplier) = match (kind, supplied) {
            (RequestKind::Upgrade, _) => (Box::default(), None),
            (_, Some((id, data))) => {
                self.stats.cache_to_cache += 1;
                (data, Some(id))
            }
            (_, None) => (memory.read_line(line_address), None),
        };

        Ok(FabricResult {
            data,
            supplier,
            was_shared,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_transaction_in_flight_fifo() {
        let mut fabric = Fabric::new(Timing::default());
        fabric.submit(1, Operation::Read { address: 0 }, 0);
        fabric.submit(0, Operation::Write { address: 8, value: 1 }, 0);
        assert!(fabric.is_pending(0) && fabric.is_pending(1));

        assert_eq!(fabric.next_grant().map(|t| t.bank), Some(1));
        fabric.grant(2);
        assert_eq!(fabric.next_grant(), None);
        assert_eq!(fabric.advance(), None);
        let done = fabric.advance().unwrap();
        assert_eq!(done.bank, 1);
        assert!(!fabric.is_pending(1));

        fabric.grant(1);
        assert_eq!(fabric.advance().map(|t| t.bank), Some(0));
        assert!(fabric.is_idle());
        assert_eq!(fabric.stats().busy_cycles, 3);
    }

    #[test]
    fn zero_latency_still_takes_a_cycle() {
        let mut fabric = Fabric::new(Timing::default());
        fabric.submit(0, Operation::Read { address: 0 }, 0);
        fabric.grant(0);
        assert!(fabric.advance().is_some());
    }
}
