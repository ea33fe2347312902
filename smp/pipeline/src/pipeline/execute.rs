use log::debug;

use crate::instructions::Opcode;

use super::{decode::Decode, ExitReason, PipelineInstruction, Stage};

#[derive(Debug, Default)]
pub struct Execute {
    /// EX/MEM latch
    pub output: Option<PipelineInstruction>,
}

impl Execute {
    /// Returns the branch target when a taken branch leaves the fall-through path.
    #[inline(always)]
    pub(crate) fn cycle(&mut self, id: &mut Decode) -> Result<Option<usize>, ExitReason> {
        debug_assert!(self.output.is_none());
        let Some(mut instr) = id.output.take() else {
            return Ok(None);
        };
        instr.stage = Stage::Execute;

        let (Some(decoded), None) = (instr.decoded, instr.fault) else {
            self.output = Some(instr);
            return Err(ExitReason::Faulted);
        };

        let [a, b] = instr.operands;
        let imm = decoded.immediate as i64 as u64;
        let mut redirect = None;
        match decoded.opcode {
            Opcode::Alu(op) => instr.resolved_value = Some(op.apply(a, b)),
            Opcode::AluImm(op) => instr.resolved_value = Some(op.apply(a, imm)),
            Opcode::Load | Opcode::Store => instr.address = a.wrapping_add(imm),
            Opcode::Branch(cond) => {
                redirect = decoded
                    .branch_target()
                    .filter(|&target| cond.holds(a, b) && target != instr.pc + 1);
                if let Some(target) = redirect {
                    debug!("pc {}: branch taken to {}", instr.pc, target);
                }
            }
        }

        self.output = Some(instr);
        Ok(redirect)
    }
}
