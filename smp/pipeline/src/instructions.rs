use std::{fmt, str::FromStr};

use common::util::parse_int;
use modular_bitfield::{bitfield, specifiers::*};
use thiserror::Error;

use crate::{fault::Fault, regfile::REGISTER_COUNT};

/// Binary layout of one instruction in program memory.
#[bitfield(bits = 64)]
#[derive(Debug, Copy, Clone)]
pub struct InstructionWord {
    pub opcode: B8,
    pub dst: B5,
    pub src1: B5,
    pub src2: B5,
    #[skip]
    reserved: B9,
    pub immediate: B32,
}

impl From<u64> for InstructionWord {
    fn from(word: u64) -> Self {
        InstructionWord::from_bytes(word.to_le_bytes())
    }
}

impl From<InstructionWord> for u64 {
    fn from(word: InstructionWord) -> u64 {
        u64::from_le_bytes(word.into_bytes())
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add = 0,
    Sub,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
    ShiftRightArith,
    SetLess,
    SetLessU,
    Mul,
}

const ALU_OPS: [AluOp; 11] = [
    AluOp::Add,
    AluOp::Sub,
    AluOp::And,
    AluOp::Or,
    AluOp::Xor,
    AluOp::ShiftLeft,
    AluOp::ShiftRight,
    AluOp::ShiftRightArith,
    AluOp::SetLess,
    AluOp::SetLessU,
    AluOp::Mul,
];

impl AluOp {
    pub fn apply(self, a: u64, b: u64) -> u64 {
        let shift = (b & 63) as u32;
        match self {
            AluOp::Add => a.wrapping_add(b),
            AluOp::Sub => a.wrapping_sub(b),
            AluOp::And => a & b,
            AluOp::Or => a | b,
            AluOp::Xor => a ^ b,
            AluOp::ShiftLeft => a << shift,
            AluOp::ShiftRight => a >> shift,
            AluOp::ShiftRightArith => ((a as i64) >> shift) as u64,
            AluOp::SetLess => ((a as i64) < (b as i64)) as u64,
            AluOp::SetLessU => (a < b) as u64,
            AluOp::Mul => a.wrapping_mul(b),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Xor => "xor",
            AluOp::ShiftLeft => "shl",
            AluOp::ShiftRight => "shr",
            AluOp::ShiftRightArith => "sra",
            AluOp::SetLess => "slt",
            AluOp::SetLessU => "sltu",
            AluOp::Mul => "mul",
        }
    }

    fn from_mnemonic(text: &str) -> Option<AluOp> {
        ALU_OPS.iter().copied().find(|op| op.mnemonic() == text)
    }
}

/// Branch comparison, on the operands as signed integers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq = 0,
    Ne,
    Lt,
    Ge,
    Le,
    Gt,
    Always,
}

const CONDITIONS: [Condition; 7] = [
    Condition::Eq,
    Condition::Ne,
    Condition::Lt,
    Condition::Ge,
    Condition::Le,
    Condition::Gt,
    Condition::Always,
];

impl Condition {
    pub fn holds(self, a: u64, b: u64) -> bool {
        let (a, b) = (a as i64, b as i64);
        match self {
            Condition::Eq => a == b,
            Condition::Ne => a != b,
            Condition::Lt => a < b,
            Condition::Ge => a >= b,
            Condition::Le => a <= b,
            Condition::Gt => a > b,
            Condition::Always => true,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::Lt => "lt",
            Condition::Ge => "ge",
            Condition::Le => "le",
            Condition::Gt => "gt",
            Condition::Always => "",
        }
    }

    fn from_suffix(text: &str) -> Option<Condition> {
        CONDITIONS[..6].iter().copied().find(|cond| cond.suffix() == text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `dst = src1 op src2`
    Alu(AluOp),
    /// `dst = src1 op immediate`
    AluImm(AluOp),
    /// `dst = mem[src1 + immediate]`
    Load,
    /// `mem[src1 + immediate] = src2`
    Store,
    /// `if src1 cond src2 { pc = immediate }`
    Branch(Condition),
}

impl Opcode {
    pub fn to_bits(self) -> u8 {
        match self {
            Opcode::Alu(op) => op as u8,
            Opcode::AluImm(op) => 0x10 | op as u8,
            Opcode::Load => 0x20,
            Opcode::Store => 0x21,
            Opcode::Branch(cond) => 0x30 | cond as u8,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Opcode> {
        let low = (bits & 0xf) as usize;
        match bits >> 4 {
            0 => ALU_OPS.get(low).copied().map(Opcode::Alu),
            1 => ALU_OPS.get(low).copied().map(Opcode::AluImm),
            2 => match low {
                0 => Some(Opcode::Load),
                1 => Some(Opcode::Store),
                _ => None,
            },
            3 => CONDITIONS.get(low).copied().map(Opcode::Branch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("register r{register} does not exist")]
    RegisterOutOfRange { register: u8 },
    #[error("branch target {target} is negative")]
    NegativeTarget { target: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    #[error("`{mnemonic}` takes {expected} operands, found {found}")]
    OperandCount {
        mnemonic: String,
        expected: usize,
        found: usize,
    },
    #[error("`{0}` is not a register")]
    BadRegister(String),
    #[error("`{0}` is not a 32-bit immediate")]
    BadImmediate(String),
    #[error("`{0}` is not a memory operand like `0x100(r2)`")]
    BadMemoryOperand(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dst: u8,
    pub src1: u8,
    pub src2: u8,
    pub immediate: i32,
}

impl Instruction {
    pub fn alu(op: AluOp, dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction { opcode: Opcode::Alu(op), dst, src1, src2, immediate: 0 }
    }

    pub fn alu_imm(op: AluOp, dst: u8, src1: u8, immediate: i32) -> Instruction {
        Instruction { opcode: Opcode::AluImm(op), dst, src1, src2: 0, immediate }
    }

    pub fn li(dst: u8, immediate: i32) -> Instruction {
        Instruction::alu_imm(AluOp::Add, dst, 0, immediate)
    }

    pub fn nop() -> Instruction {
        Instruction::alu(AluOp::Add, 0, 0, 0)
    }

    pub fn load(dst: u8, base: u8, offset: i32) -> Instruction {
        Instruction { opcode: Opcode::Load, dst, src1: base, src2: 0, immediate: offset }
    }

    pub fn store(src: u8, base: u8, offset: i32) -> Instruction {
        Instruction { opcode: Opcode::Store, dst: 0, src1: base, src2: src, immediate: offset }
    }

    pub fn branch(cond: Condition, src1: u8, src2: u8, target: i32) -> Instruction {
        Instruction { opcode: Opcode::Branch(cond), dst: 0, src1, src2, immediate: target }
    }

    pub fn jump(target: i32) -> Instruction {
        Instruction::branch(Condition::Always, 0, 0, target)
    }

    /// Register this instruction writes, if any. Writes to r0 are discarded, so r0 never counts.
    pub fn destination(&self) -> Option<u8> {
        match self.opcode {
            Opcode::Alu(_) | Opcode::AluImm(_) | Opcode::Load if self.dst != 0 => Some(self.dst),
            _ => None,
        }
    }

    /// Registers read, in operand order.
    pub fn sources(&self) -> [Option<u8>; 2] {
        match self.opcode {
            Opcode::Alu(_) | Opcode::Store => [Some(self.src1), Some(self.src2)],
            Opcode::AluImm(_) | Opcode::Load => [Some(self.src1), None],
            Opcode::Branch(Condition::Always) => [None, None],
            Opcode::Branch(_) => [Some(self.src1), Some(self.src2)],
        }
    }

    pub fn branch_target(&self) -> Option<usize> {
        match self.opcode {
            Opcode::Branch(_) => Some(self.immediate as u32 as usize),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<u64, EncodeError> {
        for register in [self.dst, self.src1, self.src2] {
            if register as usize >= REGISTER_COUNT {
                return Err(EncodeError::RegisterOutOfRange { register });
            }
        }
        if matches!(self.opcode, Opcode::Branch(_)) && self.immediate < 0 {
            return Err(EncodeError::NegativeTarget { target: self.immediate });
        }

        let word = InstructionWord::new()
            .with_opcode(self.opcode.to_bits())
            .with_dst(self.dst)
            .with_src1(self.src1)
            .with_src2(self.src2)
            .with_immediate(self.immediate as u32);
        Ok(word.into())
    }

    pub fn decode(word: u64) -> Result<Instruction, Fault> {
        let fields = InstructionWord::from(word);
        let malformed = Fault::MalformedInstruction { word };
        let opcode = Opcode::from_bits(fields.opcode()).ok_or(malformed)?;
        let immediate = fields.immediate() as i32;
        if matches!(opcode, Opcode::Branch(_)) && immediate < 0 {
            return Err(malformed);
        }

        Ok(Instruction {
            opcode,
            dst: fields.dst(),
            src1: fields.src1(),
            src2: fields.src2(),
            immediate,
        })
    }
}

struct Offset(i32);

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            write!(f, "-{:#x}", self.0.unsigned_abs())
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode {
            Opcode::Alu(AluOp::Add) if self.dst == 0 && self.src1 == 0 && self.src2 == 0 => {
                write!(f, "nop")
            }
            Opcode::Alu(op) => {
                write!(f, "{} r{}, r{}, r{}", op.mnemonic(), self.dst, self.src1, self.src2)
            }
            Opcode::AluImm(AluOp::Add) if self.src1 == 0 => {
                write!(f, "li r{}, {}", self.dst, self.immediate)
            }
            Opcode::AluImm(op) => {
                write!(f, "{}i r{}, r{}, {}", op.mnemonic(), self.dst, self.src1, self.immediate)
            }
            Opcode::Load => {
                write!(f, "load r{}, {}(r{})", self.dst, Offset(self.immediate), self.src1)
            }
            Opcode::Store => {
                write!(f, "store r{}, {}(r{})", self.src2, Offset(self.immediate), self.src1)
            }
            Opcode::Branch(Condition::Always) => write!(f, "jump {}", self.immediate),
            Opcode::Branch(cond) => {
                write!(f, "b{} r{}, r{}, {}", cond.suffix(), self.src1, self.src2, self.immediate)
            }
        }
    }
}

fn register(text: &str) -> Result<u8, ParseError> {
    let bad = || ParseError::BadRegister(text.to_string());
    let number = text.strip_prefix(['r', 'R']).ok_or_else(bad)?;
    match number.parse::<u8>() {
        Ok(reg) if (reg as usize) < REGISTER_COUNT => Ok(reg),
        _ => Err(bad()),
    }
}

fn immediate(text: &str) -> Result<i32, ParseError> {
    parse_int(text)
        .ok()
        .and_then(|value| i32::try_from(value).ok())
        .ok_or_else(|| ParseError::BadImmediate(text.to_string()))
}

/// `offset(base)`, with an empty offset meaning zero.
fn memory_operand(text: &str) -> Result<(i32, u8), ParseError> {
    let bad = || ParseError::BadMemoryOperand(text.to_string());
    let (offset, rest) = text.split_once('(').ok_or_else(bad)?;
    let base = rest.strip_suffix(')').ok_or_else(bad)?;
    let offset = match offset.trim() {
        "" => 0,
        offset => immediate(offset)?,
    };
    Ok((offset, register(base.trim())?))
}

fn expect_operands(mnemonic: &str, operands: &[&str], expected: usize) -> Result<(), ParseError> {
    if operands.len() != expected {
        return Err(ParseError::OperandCount {
            mnemonic: mnemonic.to_string(),
            expected,
            found: operands.len(),
        });
    }
    Ok(())
}

impl FromStr for Instruction {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let (mnemonic, rest) = match text.split_once(char::is_whitespace) {
            Some((mnemonic, rest)) => (mnemonic, rest.trim()),
            None => (text, ""),
        };
        let operands: Vec<&str> = match rest {
            "" => Vec::new(),
            rest => rest.split(',').map(str::trim).collect(),
        };
        let mnemonic = mnemonic.to_ascii_lowercase();
        let ops = operands.as_slice();

        match mnemonic.as_str() {
            "nop" => {
                expect_operands(&mnemonic, ops, 0)?;
                Ok(Instruction::nop())
            }
            "li" => {
                expect_operands(&mnemonic, ops, 2)?;
                Ok(Instruction::li(register(ops[0])?, immediate(ops[1])?))
            }
            "load" => {
                expect_operands(&mnemonic, ops, 2)?;
                let (offset, base) = memory_operand(ops[1])?;
                Ok(Instruction::load(register(ops[0])?, base, offset))
            }
            "store" => {
                expect_operands(&mnemonic, ops, 2)?;
                let (offset, base) = memory_operand(ops[1])?;
                Ok(Instruction::store(register(ops[0])?, base, offset))
            }
            "jump" => {
                expect_operands(&mnemonic, ops, 1)?;
                Ok(Instruction::jump(immediate(ops[0])?))
            }
            other => {
                if let Some(cond) = other.strip_prefix('b').and_then(Condition::from_suffix) {
                    expect_operands(&mnemonic, ops, 3)?;
                    return Ok(Instruction::branch(cond, register(ops[0])?, register(ops[1])?, immediate(ops[2])?));
                }
                if let Some(op) = AluOp::from_mnemonic(other) {
                    expect_operands(&mnemonic, ops, 3)?;
                    return Ok(Instruction::alu(op, register(ops[0])?, register(ops[1])?, register(ops[2])?));
                }
                if let Some(op) = other.strip_suffix('i').and_then(AluOp::from_mnemonic) {
                    expect_operands(&mnemonic, ops, 3)?;
                    return Ok(Instruction::alu_imm(op, register(ops[0])?, register(ops[1])?, immediate(ops[2])?));
                }
                Err(ParseError::UnknownMnemonic(other.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_layout() {
        let word = Instruction::load(3, 7, -8).encode().unwrap();
        assert_eq!(word & 0xff, 0x20);
        assert_eq!((word >> 8) & 0x1f, 3);
        assert_eq!((word >> 13) & 0x1f, 7);
        assert_eq!(word >> 32, (-8i32) as u32 as u64);
        assert_eq!(Instruction::decode(word), Ok(Instruction::load(3, 7, -8)));
    }

    #[test]
    fn unknown_opcodes_are_malformed() {
        for bits in [0x0b, 0x22, 0x37, 0x40, 0xff] {
            assert_eq!(
                Instruction::decode(bits),
                Err(Fault::MalformedInstruction { word: bits }),
                "opcode {:#x}",
                bits
            );
        }
    }

    #[test]
    fn only_branches_have_targets() {
        assert_eq!(Instruction::branch(Condition::Ne, 1, 2, 7).branch_target(), Some(7));
        assert_eq!(Instruction::jump(0).branch_target(), Some(0));
        assert_eq!(Instruction::li(1, 7).branch_target(), None);
    }

    #[test]
    fn negative_branch_targets() {
        assert_eq!(
            Instruction::jump(-1).encode(),
            Err(EncodeError::NegativeTarget { target: -1 })
        );
        let word = 0x36 | (0xffff_fffe_u64 << 32);
        assert!(Instruction::decode(word).is_err());
    }

    #[test]
    fn registers_are_checked_when_encoding() {
        let add = Instruction::alu(AluOp::Add, 32, 0, 0);
        assert_eq!(add.encode(), Err(EncodeError::RegisterOutOfRange { register: 32 }));
    }

    #[test]
    fn alu() {
        assert_eq!(AluOp::Sub.apply(1, 2), u64::MAX);
        assert_eq!(AluOp::ShiftRightArith.apply(-16i64 as u64, 2), -4i64 as u64);
        assert_eq!(AluOp::ShiftRight.apply(-16i64 as u64, 60), 0xf);
        assert_eq!(AluOp::SetLess.apply(-1i64 as u64, 0), 1);
        assert_eq!(AluOp::SetLessU.apply(-1i64 as u64, 0), 0);
        assert_eq!(AluOp::ShiftLeft.apply(1, 65), 2);
    }

    #[test]
    fn conditions_compare_signed() {
        assert!(Condition::Lt.holds(-1i64 as u64, 0));
        assert!(!Condition::Gt.holds(-1i64 as u64, 0));
        assert!(Condition::Ge.holds(3, 3));
        assert!(Condition::Always.holds(1, 2));
    }

    #[test]
    fn parses_assembly() {
        let parse = |text: &str| text.parse::<Instruction>().unwrap();
        assert_eq!(parse("add r1, r2, r3"), Instruction::alu(AluOp::Add, 1, 2, 3));
        assert_eq!(parse("ADDI r1, r1, -1"), Instruction::alu_imm(AluOp::Add, 1, 1, -1));
        assert_eq!(parse("sltui r4, r5, 0x10"), Instruction::alu_imm(AluOp::SetLessU, 4, 5, 16));
        assert_eq!(parse("li r2, 42"), Instruction::li(2, 42));
        assert_eq!(parse("load r1, 0x100(r2)"), Instruction::load(1, 2, 0x100));
        assert_eq!(parse("store r2, (r0)"), Instruction::store(2, 0, 0));
        assert_eq!(parse("bne r1, r0, 2"), Instruction::branch(Condition::Ne, 1, 0, 2));
        assert_eq!(parse("jump 7"), Instruction::jump(7));
        assert_eq!(parse("nop"), Instruction::nop());
    }

    #[test]
    fn rejects_bad_assembly() {
        assert_eq!(
            "frob r1".parse::<Instruction>(),
            Err(ParseError::UnknownMnemonic("frob".into()))
        );
        assert!(matches!("add r1, r2".parse::<Instruction>(), Err(ParseError::OperandCount { .. })));
        assert_eq!("li r32, 1".parse::<Instruction>(), Err(ParseError::BadRegister("r32".into())));
        assert!(matches!("li r1, 0x1_0000_0000".parse::<Instruction>(), Err(ParseError::BadImmediate(_))));
        assert!(matches!("load r1, 8[r2]".parse::<Instruction>(), Err(ParseError::BadMemoryOperand(_))));
    }

    #[test]
    fn display_matches_the_assembler() {
        let texts = [
            "add r1, r2, r3",
            "li r2, 42",
            "load r1, -0x8(r2)",
            "store r3, 0x100(r0)",
            "bge r1, r2, 9",
            "jump 3",
            "nop",
            "xori r1, r2, 5",
        ];
        for text in texts {
            let instruction: Instruction = text.parse().unwrap();
            assert_eq!(instruction.to_string(), text);
        }
    }
}
