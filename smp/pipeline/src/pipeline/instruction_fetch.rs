use log::debug;

use super::{PipelineInstruction, PipelineStats};

#[derive(Debug, Default)]
pub struct InstructionFetch {
    pub pc: usize,
    /// IF/ID latch
    pub output: Option<PipelineInstruction>,
}

impl InstructionFetch {
    #[inline(always)]
    pub(crate) fn cycle(&mut self, program: &[u64], stats: &mut PipelineStats) {
        if self.output.is_some() {
            return;
        }
        // Running off the end of the program just stops fetching
        if let Some(&word) = program.get(self.pc) {
            self.output = Some(PipelineInstruction::fetched(self.pc, word));
            self.pc += 1;
            stats.issued += 1;
        }
    }

    /// Squashes the fetched instruction and the one being fetched this cycle, then continues
    /// at `target`. Returns how many instructions were thrown away.
    pub(crate) fn redirect(&mut self, target: usize, program: &[u64], stats: &mut PipelineStats) -> u32 {
        let mut flushed = 0;
        if let Some(squashed) = self.output.take() {
            debug!("flushing pc {}", squashed.pc);
            flushed += 1;
        }
        if self.pc < program.len() {
            debug!("flushing pc {}", self.pc);
            stats.issued += 1;
            flushed += 1;
        }
        stats.flushed += flushed as u64;
        self.pc = target;
        flushed
    }
}
