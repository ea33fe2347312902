use crate::{fault::FaultRecord, regfile::RegFile};

use super::{memory_access::MemoryAccess, ExitReason, PipelineStats, Stage};

#[derive(Debug, Default)]
pub struct WriteBack;

impl WriteBack {
    #[inline(always)]
    pub(crate) fn cycle(
        &mut self,
        mem: &mut MemoryAccess,
        regs: &mut RegFile,
        stats: &mut PipelineStats,
    ) -> Result<(), ExitReason> {
        let Some(mut instr) = mem.output.take() else {
            return Ok(());
        };
        instr.stage = Stage::Writeback;
        stats.retired += 1;

        let destination = instr.destination();
        if let Some(dst) = destination {
            if let (Some(value), None) = (instr.resolved_value, instr.fault) {
                regs.write(dst, value);
            }
            regs.clear_pending(dst);
        }

        match instr.fault {
            Some(fault) => {
                stats.faulted += 1;
                Err(ExitReason::FaultRetired(FaultRecord { pc: instr.pc, fault }))
            }
            None => Ok(()),
        }
    }
}
