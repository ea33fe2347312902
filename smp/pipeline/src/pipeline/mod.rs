mod decode;
mod execute;
mod instruction_fetch;
mod memory_access;
mod writeback;

use log::warn;

use crate::{fault::FaultRecord, instructions::Instruction, regfile::RegFile, DataPort};

use self::{
    decode::Decode, execute::Execute, instruction_fetch::InstructionFetch, memory_access::MemoryAccess,
    writeback::WriteBack,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Decode,
    Execute,
    Memory,
    Writeback,
}

/// One instruction as it moves down the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineInstruction {
    pub pc: usize,
    pub word: u64,
    /// `None` until decode, and for words that fail to decode
    pub decoded: Option<Instruction>,
    pub stage: Stage,
    /// Source register values, captured at decode
    pub operands: [u64; 2],
    /// Effective address of a load or store
    pub address: u64,
    /// Value bound for the destination register, once known
    pub resolved_value: Option<u64>,
    pub stall_cycles: u32,
    pub fault: Option<crate::fault::Fault>,
}

impl PipelineInstruction {
    fn fetched(pc: usize, word: u64) -> PipelineInstruction {
        PipelineInstruction {
            pc,
            word,
            decoded: None,
            stage: Stage::Fetch,
            operands: [0; 2],
            address: 0,
            resolved_value: None,
            stall_cycles: 0,
            fault: None,
        }
    }

    pub fn destination(&self) -> Option<u8> {
        self.decoded.and_then(|decoded| decoded.destination())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StallCause {
    /// Decode needs a register a load hasn't produced yet
    Hazard,
    /// The memory stage is waiting on the bus
    Memory,
}

pub(crate) enum ExitReason {
    Stalled(StallCause),
    /// A faulting instruction moved one stage; everything behind it holds
    Faulted,
    /// A taken branch squashed the front of the pipeline
    Redirected,
    /// A faulting instruction reached writeback
    FaultRetired(FaultRecord),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles: u64,
    pub issued: u64,
    pub retired: u64,
    pub flushed: u64,
    pub faulted: u64,
    pub stall_cycles: u64,
    pub hazard_stalls: u64,
    pub memory_stalls: u64,
    pub forwarded: u64,
    pub taken_branches: u64,
}

/// What one core did in one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoreCycle {
    pub retired: u32,
    pub flushed: u32,
    pub stalled: Option<StallCause>,
    pub fault: Option<FaultRecord>,
}

pub struct Pipeline {
    program: Vec<u64>,
    ic: InstructionFetch,
    id: Decode,
    ex: Execute,
    mem: MemoryAccess,
    wb: WriteBack,
    regs: RegFile,
    stats: PipelineStats,
    fault: Option<FaultRecord>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new()
    }
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline {
            program: Vec::new(),
            ic: Default::default(),
            id: Default::default(),
            ex: Default::default(),
            mem: Default::default(),
            wb: Default::default(),
            regs: RegFile::new(),
            stats: Default::default(),
            fault: None,
        }
    }

    /// Replaces the program, clears the registers and restarts fetching at index 0.
    /// Anything still in flight is flushed.
    pub fn load(&mut self, program: Vec<u64>) {
        self.stats.flushed += self.in_flight() as u64;

        self.program = program;
        self.ic = Default::default();
        self.id = Default::default();
        self.ex = Default::default();
        self.mem = Default::default();
        self.regs = RegFile::new();
        self.fault = None;
    }

    pub fn program(&self) -> &[u64] {
        &self.program
    }

    pub fn pc(&self) -> usize {
        self.ic.pc
    }

    pub fn regs(&self) -> &RegFile {
        &self.regs
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn fault(&self) -> Option<FaultRecord> {
        self.fault
    }

    /// Lets a core stopped on a fault carry on with the instructions behind it.
    pub fn acknowledge_fault(&mut self) -> Option<FaultRecord> {
        self.fault.take()
    }

    /// Contents of the IF/ID, ID/EX, EX/MEM and MEM/WB latches.
    pub fn latches(&self) -> [Option<&PipelineInstruction>; 4] {
        [
            self.ic.output.as_ref(),
            self.id.output.as_ref(),
            self.ex.output.as_ref(),
            self.mem.output.as_ref(),
        ]
    }

    pub fn in_flight(&self) -> usize {
        self.latches().iter().filter(|latch| latch.is_some()).count()
    }

    /// Nothing left to fetch, nothing in flight and no fault waiting.
    pub fn is_idle(&self) -> bool {
        self.fault.is_none() && self.ic.pc >= self.program.len() && self.in_flight() == 0
    }

    pub fn cycle<P: DataPort + ?Sized>(&mut self, port: &mut P) -> CoreCycle {
        let mut report = CoreCycle::default();
        self.stats.cycles += 1;
        if self.fault.is_some() {
            return report;
        }

        let before = self.stats;
        match self.run_stages(port) {
            Ok(()) | Err(ExitReason::Faulted) => {}
            Err(ExitReason::Redirected) => self.stats.taken_branches += 1,
            Err(ExitReason::Stalled(cause)) => {
                self.stats.stall_cycles += 1;
                match cause {
                    StallCause::Hazard => self.stats.hazard_stalls += 1,
                    StallCause::Memory => self.stats.memory_stalls += 1,
                }
                report.stalled = Some(cause);
            }
            Err(ExitReason::FaultRetired(record)) => {
                warn!("pc {} retired with fault: {}", record.pc, record.fault);
                self.fault = Some(record);
                report.fault = Some(record);
            }
        }

        report.retired = (self.stats.retired - before.retired) as u32;
        report.flushed = (self.stats.flushed - before.flushed) as u32;
        report
    }

    // Stages run back to front so each one reads its input latch before the stage ahead
    // overwrites it. A stage that can't move returns early and holds everything behind it.
    fn run_stages<P: DataPort + ?Sized>(&mut self, port: &mut P) -> Result<(), ExitReason> {
        // Stage 5: WriteBack
        self.wb.cycle(&mut self.mem, &mut self.regs, &mut self.stats)?;

        // Stage 4: Memory
        self.mem.cycle(&mut self.ex, port)?;

        // Stage 3: Execute
        if let Some(target) = self.ex.cycle(&mut self.id)? {
            self.ic.redirect(target, &self.program, &mut self.stats);
            return Err(ExitReason::Redirected);
        }

        // Stage 2: Decode and register read
        self.id.cycle(&mut self.ic, &self.ex, &self.mem, &mut self.regs, &mut self.stats)?;

        // Stage 1: Fetch
        self.ic.cycle(&self.program, &mut self.stats);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        fault::Fault,
        instructions::{AluOp, Condition},
        Access,
    };

    /// Flat memory that keeps every access pending for `latency` cycles.
    #[derive(Default)]
    struct SlowMemory {
        words: HashMap<u64, u64>,
        latency: u32,
        waited: u32,
        size: u64,
    }

    impl SlowMemory {
        fn new(latency: u32) -> SlowMemory {
            SlowMemory { latency, size: 0x1000, ..Default::default() }
        }

        fn access(&mut self, address: u64) -> Result<bool, Fault> {
            if address + 8 > self.size {
                return Err(Fault::InvalidAddress { address });
            }
            if address % 8 != 0 {
                return Err(Fault::MisalignedAccess { address });
            }
            if self.waited < self.latency {
                self.waited += 1;
                return Ok(false);
            }
            self.waited = 0;
            Ok(true)
        }
    }

    impl DataPort for SlowMemory {
        fn load(&mut self, address: u64) -> Result<Access, Fault> {
            Ok(match self.access(address)? {
                true => Access::Ready(self.words.get(&address).copied().unwrap_or(0)),
                false => Access::Pending,
            })
        }

        fn store(&mut self, address: u64, value: u64) -> Result<Access, Fault> {
            Ok(match self.access(address)? {
                true => {
                    self.words.insert(address, value);
                    Access::Ready(value)
                }
                false => Access::Pending,
            })
        }
    }

    fn pipeline(program: &[Instruction]) -> Pipeline {
        let mut pipeline = Pipeline::new();
        pipeline.load(program.iter().map(|i| i.encode().unwrap()).collect());
        pipeline
    }

    /// Runs to idle, checking instruction conservation every cycle. Returns the cycle count.
    fn run(pipeline: &mut Pipeline, memory: &mut SlowMemory) -> u64 {
        let mut cycles = 0;
        while !pipeline.is_idle() {
            pipeline.cycle(memory);
            cycles += 1;
            let stats = pipeline.stats();
            assert_eq!(stats.issued, stats.retired + stats.flushed + pipeline.in_flight() as u64);
            assert!(cycles < 1000, "pipeline never went idle");
        }
        cycles
    }

    #[test]
    fn independent_instructions_retire_one_per_cycle() {
        let mut p = pipeline(&[Instruction::li(1, 1), Instruction::li(2, 2), Instruction::li(3, 3)]);
        let cycles = run(&mut p, &mut SlowMemory::new(0));
        assert_eq!(cycles, 5 + 2);
        assert_eq!(p.regs().values()[1..4], [1, 2, 3]);
        assert_eq!(p.stats().stall_cycles, 0);
    }

    #[test]
    fn alu_results_are_forwarded() {
        let mut p = pipeline(&[
            Instruction::li(2, 5),
            Instruction::li(3, 7),
            Instruction::li(5, 2),
            Instruction::alu(AluOp::Add, 1, 2, 3),
            Instruction::alu(AluOp::Sub, 4, 1, 5),
        ]);
        run(&mut p, &mut SlowMemory::new(0));
        assert_eq!(p.regs().read(1), 12);
        assert_eq!(p.regs().read(4), 10);
        assert_eq!(p.stats().stall_cycles, 0);
        assert!(p.stats().forwarded >= 3);
    }

    #[test]
    fn load_use_stalls_once() {
        let mut memory = SlowMemory::new(0);
        memory.words.insert(0x40, 30);
        let mut p = pipeline(&[
            Instruction::load(1, 0, 0x40),
            Instruction::alu_imm(AluOp::Add, 2, 1, 12),
        ]);
        run(&mut p, &mut memory);
        assert_eq!(p.regs().read(2), 42);
        assert_eq!(p.stats().hazard_stalls, 1);
    }

    #[test]
    fn slow_memory_holds_younger_stages() {
        let mut memory = SlowMemory::new(3);
        let mut p = pipeline(&[
            Instruction::li(1, 9),
            Instruction::store(1, 0, 0x80),
            Instruction::load(2, 0, 0x80),
            Instruction::alu(AluOp::Mul, 3, 2, 2),
        ]);
        run(&mut p, &mut memory);
        assert_eq!(memory.words.get(&0x80), Some(&9));
        assert_eq!(p.regs().read(3), 81);
        assert_eq!(p.stats().memory_stalls, 6);
    }

    #[test]
    fn taken_branch_flushes_two() {
        let mut p = pipeline(&[
            Instruction::li(1, 1),
            Instruction::branch(Condition::Eq, 0, 0, 4),
            Instruction::li(2, 99),
            Instruction::li(3, 99),
            Instruction::li(4, 5),
        ]);
        run(&mut p, &mut SlowMemory::new(0));
        assert_eq!(p.stats().flushed, 2);
        assert_eq!(p.stats().taken_branches, 1);
        assert_eq!((p.regs().read(2), p.regs().read(3), p.regs().read(4)), (0, 0, 5));
    }

    #[test]
    fn untaken_branch_costs_nothing() {
        let mut p = pipeline(&[
            Instruction::li(1, 1),
            Instruction::branch(Condition::Eq, 1, 0, 0),
            Instruction::li(2, 2),
        ]);
        let cycles = run(&mut p, &mut SlowMemory::new(0));
        assert_eq!(cycles, 7);
        assert_eq!(p.stats().flushed, 0);
    }

    #[test]
    fn counted_loop() {
        let mut p = pipeline(&[
            Instruction::li(1, 3),
            Instruction::li(2, 0),
            Instruction::alu_imm(AluOp::Add, 2, 2, 10),
            Instruction::alu_imm(AluOp::Sub, 1, 1, 1),
            Instruction::branch(Condition::Ne, 1, 0, 2),
        ]);
        run(&mut p, &mut SlowMemory::new(0));
        assert_eq!(p.regs().read(1), 0);
        assert_eq!(p.regs().read(2), 30);
        assert_eq!(p.stats().taken_branches, 2);
    }

    #[test]
    fn memory_fault_stops_the_core_until_acknowledged() {
        let mut memory = SlowMemory::new(0);
        let mut p = pipeline(&[
            Instruction::li(1, 1),
            Instruction::load(2, 0, 0x4),
            Instruction::li(3, 3),
        ]);

        let mut fault = None;
        for _ in 0..10 {
            if let Some(record) = p.cycle(&mut memory).fault {
                fault = Some(record);
                break;
            }
        }
        let record = fault.unwrap();
        assert_eq!(record, FaultRecord { pc: 1, fault: Fault::MisalignedAccess { address: 4 } });
        assert_eq!(p.fault(), Some(record));
        assert_eq!(p.regs().read(3), 0);

        let frozen = p.stats().retired;
        p.cycle(&mut memory);
        assert_eq!(p.stats().retired, frozen);
        assert!(!p.is_idle());

        assert_eq!(p.acknowledge_fault(), Some(record));
        run(&mut p, &mut memory);
        assert_eq!(p.regs().read(1), 1);
        assert_eq!(p.regs().read(2), 0);
        assert_eq!(p.regs().read(3), 3);
        assert_eq!(p.stats().faulted, 1);
    }

    #[test]
    fn malformed_word_faults_at_writeback() {
        let mut p = Pipeline::new();
        p.load(vec![Instruction::li(1, 1).encode().unwrap(), 0xff, Instruction::li(2, 2).encode().unwrap()]);
        let mut memory = SlowMemory::new(0);

        let mut reports = Vec::new();
        while p.fault().is_none() {
            reports.push(p.cycle(&mut memory));
        }
        let record = reports.last().and_then(|r| r.fault).unwrap();
        assert_eq!(record, FaultRecord { pc: 1, fault: Fault::MalformedInstruction { word: 0xff } });
        assert_eq!(p.regs().read(2), 0);

        p.acknowledge_fault();
        run(&mut p, &mut memory);
        assert_eq!(p.regs().read(2), 2);
        assert_eq!(p.stats().retired, 3);
    }

    #[test]
    fn reloading_resets_registers() {
        let mut memory = SlowMemory::new(0);
        let mut p = pipeline(&[Instruction::li(1, 4), Instruction::li(2, 5), Instruction::li(3, 6)]);
        p.cycle(&mut memory);
        p.cycle(&mut memory);
        p.cycle(&mut memory);
        p.load(vec![Instruction::alu(AluOp::Add, 2, 1, 1).encode().unwrap()]);
        assert_eq!(p.stats().flushed, 3);
        run(&mut p, &mut memory);
        assert_eq!(p.regs().read(1), 0);
        assert_eq!(p.regs().read(2), 0);
        assert_eq!(p.stats().issued, 4);
    }
}
