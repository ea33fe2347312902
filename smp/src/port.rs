use coherence::{AccessError, AccessOutcome, BankId, CoherenceDomain, Operation, ProtocolViolation};
use log::trace;
use pipeline::{Access, DataPort, Fault};

/// Connects one core's memory stage to its cache bank.
///
/// Hits complete on the spot. Anything needing the bus is queued on the fabric and reported
/// pending until the completed transaction is waiting for this bank.
pub(crate) struct CorePort<'a> {
    bank: BankId,
    domain: &'a mut CoherenceDomain,
    now: u64,
    pub violation: Option<ProtocolViolation>,
}

impl<'a> CorePort<'a> {
    pub fn new(bank: BankId, domain: &'a mut CoherenceDomain, now: u64) -> CorePort<'a> {
        CorePort {
            bank,
            domain,
            now,
            violation: None,
        }
    }

    fn access(&mut self, operation: Operation) -> Result<Access, Fault> {
        if let Some(done) = self.domain.take_completion(self.bank) {
            if done.transaction.operation == operation {
                return self.finish(operation, done.outcome);
            }
            // Left over from an access flushed by a program reload
            trace!("core {}: dropping stale result of #{}", self.bank, done.transaction.ticket);
        }
        if self.domain.is_pending(self.bank) {
            return Ok(Access::Pending);
        }

        let address = operation.address();
        self.domain.check_address(address).map_err(|err| to_fault(address, err))?;
        if self.domain.needs_transaction(self.bank, &operation) {
            let ticket = self.domain.submit(self.bank, operation, self.now);
            trace!("core {}: {:?} waits on #{}", self.bank, operation, ticket);
            return Ok(Access::Pending);
        }
        let outcome = self.domain.perform(self.bank, operation);
        self.finish(operation, outcome)
    }

    fn finish(
        &mut self,
        operation: Operation,
        outcome: Result<AccessOutcome, AccessError>,
    ) -> Result<Access, Fault> {
        match outcome {
            Ok(outcome) => Ok(Access::Ready(outcome.value)),
            Err(AccessError::Protocol(violation)) => {
                self.violation = Some(violation);
                Ok(Access::Pending)
            }
            Err(err) => Err(to_fault(operation.address(), err)),
        }
    }
}

fn to_fault(address: u64, err: AccessError) -> Fault {
    match err {
        AccessError::Misaligned { address } => Fault::MisalignedAccess { address },
        _ => Fault::InvalidAddress { address },
    }
}

impl DataPort for CorePort<'_> {
    fn load(&mut self, address: u64) -> Result<Access, Fault> {
        self.access(Operation::Read { address })
    }

    fn store(&mut self, address: u64, value: u64) -> Result<Access, Fault> {
        self.access(Operation::Write { address, value })
    }
}
