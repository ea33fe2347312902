use log::{trace, warn};

use crate::{instructions::Instruction, regfile::RegFile};

use super::{
    execute::Execute, instruction_fetch::InstructionFetch, memory_access::MemoryAccess, ExitReason,
    PipelineInstruction, PipelineStats, Stage, StallCause,
};

#[derive(Debug, Default)]
pub struct Decode {
    /// ID/EX latch
    pub output: Option<PipelineInstruction>,
}

enum Operand {
    Ready(u64),
    Forwarded(u64),
    Waiting,
}

impl Decode {
    #[inline(always)]
    pub(crate) fn cycle(
        &mut self,
        ic: &mut InstructionFetch,
        ex: &Execute,
        mem: &MemoryAccess,
        regs: &mut RegFile,
        stats: &mut PipelineStats,
    ) -> Result<(), ExitReason> {
        debug_assert!(self.output.is_none());
        let Some(mut instr) = ic.output.take() else {
            return Ok(());
        };
        instr.stage = Stage::Decode;

        let decoded = match Instruction::decode(instr.word) {
            Ok(decoded) => decoded,
            Err(fault) => {
                warn!("pc {}: {}", instr.pc, fault);
                instr.fault = Some(fault);
                self.output = Some(instr);
                return Err(ExitReason::Faulted);
            }
        };

        let mut operands = [0; 2];
        let mut forwarded = 0;
        for (slot, source) in decoded.sources().into_iter().enumerate() {
            let Some(reg) = source else { continue };
            match read_operand(reg, ex, mem, regs) {
                Operand::Ready(value) => operands[slot] = value,
                Operand::Forwarded(value) => {
                    operands[slot] = value;
                    forwarded += 1;
                }
                Operand::Waiting => {
                    // Producer is a load that hasn't reached memory yet
                    trace!("pc {}: waiting on r{}", instr.pc, reg);
                    instr.stall_cycles += 1;
                    ic.output = Some(instr);
                    return Err(ExitReason::Stalled(StallCause::Hazard));
                }
            }
        }
        stats.forwarded += forwarded;

        if let Some(dst) = decoded.destination() {
            regs.mark_pending(dst);
        }
        instr.decoded = Some(decoded);
        instr.operands = operands;
        self.output = Some(instr);
        Ok(())
    }
}

/// Reads `reg`, taking the value from the youngest in-flight producer when there is one.
fn read_operand(reg: u8, ex: &Execute, mem: &MemoryAccess, regs: &RegFile) -> Operand {
    if !regs.is_pending(reg) {
        return Operand::Ready(regs.read(reg));
    }
    let producers = [ex.output.as_ref(), mem.output.as_ref()];
    for producer in producers.into_iter().flatten() {
        if producer.destination() == Some(reg) {
            return match producer.resolved_value {
                Some(value) => {
                    trace!("forwarding r{} = {:#x} from pc {}", reg, value, producer.pc);
                    Operand::Forwarded(value)
                }
                None => Operand::Waiting,
            };
        }
    }
    Operand::Ready(regs.read(reg))
}
