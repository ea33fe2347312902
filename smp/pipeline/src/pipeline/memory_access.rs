use log::warn;

use crate::{instructions::Opcode, Access, DataPort};

use super::{execute::Execute, ExitReason, PipelineInstruction, Stage, StallCause};

#[derive(Debug, Default)]
pub struct MemoryAccess {
    /// MEM/WB latch
    pub output: Option<PipelineInstruction>,
}

impl MemoryAccess {
    #[inline(always)]
    pub(crate) fn cycle<P: DataPort + ?Sized>(
        &mut self,
        ex: &mut Execute,
        port: &mut P,
    ) -> Result<(), ExitReason> {
        debug_assert!(self.output.is_none());
        let Some(instr) = ex.output.as_mut() else {
            return Ok(());
        };
        instr.stage = Stage::Memory;

        let opcode = instr.decoded.map(|decoded| decoded.opcode);
        let access = match (opcode, instr.fault) {
            (Some(Opcode::Load), None) => Some(port.load(instr.address)),
            (Some(Opcode::Store), None) => Some(port.store(instr.address, instr.operands[1])),
            _ => None,
        };
        match access {
            Some(Ok(Access::Pending)) => {
                instr.stall_cycles += 1;
                return Err(ExitReason::Stalled(StallCause::Memory));
            }
            Some(Ok(Access::Ready(value))) => {
                if opcode == Some(Opcode::Load) {
                    instr.resolved_value = Some(value);
                }
            }
            Some(Err(fault)) => {
                warn!("pc {}: {}", instr.pc, fault);
                instr.fault = Some(fault);
            }
            None => {}
        }

        let faulted = instr.fault.is_some();
        self.output = ex.output.take();
        if faulted {
            return Err(ExitReason::Faulted);
        }
        Ok(())
    }
}
