//! Disassembly into PDP-11 MACRO syntax with octal operands

use crate::addressing::{AddressingMode, Operand, RegisterName};
use crate::bus::OpSize;
use crate::instructions::{BranchCondition, Instruction};
use crate::registers::PC;
use std::fmt::{Display, Formatter, Write};

fn branch_mnemonic(condition: BranchCondition) -> &'static str {
    match condition {
        BranchCondition::Always => "BR",
        BranchCondition::NotEqual => "BNE",
        BranchCondition::Equal => "BEQ",
        BranchCondition::GreaterOrEqual => "BGE",
        BranchCondition::LessThan => "BLT",
        BranchCondition::GreaterThan => "BGT",
        BranchCondition::LessOrEqual => "BLE",
        BranchCondition::Plus => "BPL",
        BranchCondition::Minus => "BMI",
        BranchCondition::Higher => "BHI",
        BranchCondition::LowerOrSame => "BLOS",
        BranchCondition::OverflowClear => "BVC",
        BranchCondition::OverflowSet => "BVS",
        BranchCondition::CarryClear => "BCC",
        BranchCondition::CarrySet => "BCS",
    }
}

fn sized(mnemonic: &str, size: OpSize) -> String {
    match size {
        OpSize::Byte => format!("{mnemonic}B"),
        OpSize::Word => mnemonic.into(),
    }
}

fn condition_code_mnemonic(set: bool, mask: u8) -> String {
    match (set, mask) {
        (_, 0) => "NOP".into(),
        (false, 0o17) => "CCC".into(),
        (true, 0o17) => "SCC".into(),
        _ => {
            let prefix = if set { "SE" } else { "CL" };
            let mnemonics: Vec<_> = [(8, 'N'), (4, 'Z'), (2, 'V'), (1, 'C')]
                .into_iter()
                .filter(|&(bit, _)| mask & bit != 0)
                .map(|(_, flag)| format!("{prefix}{flag}"))
                .collect();
            mnemonics.join("!")
        }
    }
}

fn mnemonic(instruction: Instruction) -> String {
    use Instruction::*;

    match instruction {
        Halt => "HALT".into(),
        Wait => "WAIT".into(),
        ReturnFromInterrupt => "RTI".into(),
        Breakpoint => "BPT".into(),
        IoTrap => "IOT".into(),
        Reset => "RESET".into(),
        ReturnFromTrap => "RTT".into(),
        Jump(_) => "JMP".into(),
        ReturnFromSubroutine(_) => "RTS".into(),
        ConditionCodes { set, mask } => condition_code_mnemonic(set, mask),
        SwapBytes(_) => "SWAB".into(),
        Branch(condition, _) => branch_mnemonic(condition).into(),
        JumpToSubroutine(..) => "JSR".into(),
        Clear(size, _) => sized("CLR", size),
        Complement(size, _) => sized("COM", size),
        Increment(size, _) => sized("INC", size),
        Decrement(size, _) => sized("DEC", size),
        Negate(size, _) => sized("NEG", size),
        AddCarry(size, _) => sized("ADC", size),
        SubtractCarry(size, _) => sized("SBC", size),
        Test(size, _) => sized("TST", size),
        RotateRight(size, _) => sized("ROR", size),
        RotateLeft(size, _) => sized("ROL", size),
        ArithmeticShiftRight(size, _) => sized("ASR", size),
        ArithmeticShiftLeft(size, _) => sized("ASL", size),
        Mark(_) => "MARK".into(),
        SignExtend(_) => "SXT".into(),
        MoveToPsw(_) => "MTPS".into(),
        MoveFromPsw(_) => "MFPS".into(),
        Emulator(_) => "EMT".into(),
        Trap(_) => "TRAP".into(),
        Move { size, .. } => sized("MOV", size),
        Compare { size, .. } => sized("CMP", size),
        BitTest { size, .. } => sized("BIT", size),
        BitClear { size, .. } => sized("BIC", size),
        BitSet { size, .. } => sized("BIS", size),
        Add { .. } => "ADD".into(),
        Subtract { .. } => "SUB".into(),
        ExclusiveOr(..) => "XOR".into(),
        SubtractOneAndBranch(..) => "SOB".into(),
    }
}

enum Operands {
    None,
    Number(u8),
    Register(u8),
    One(Operand),
    RegisterAnd(u8, Operand),
    Two(Operand, Operand),
    BranchOffset(i8),
    SobOffset(u8, u8),
}

fn operands(instruction: Instruction) -> Operands {
    use Instruction::*;

    match instruction {
        Halt
        | Wait
        | ReturnFromInterrupt
        | Breakpoint
        | IoTrap
        | Reset
        | ReturnFromTrap
        | ConditionCodes { .. } => Operands::None,
        ReturnFromSubroutine(r) => Operands::Register(r),
        Mark(n) | Emulator(n) | Trap(n) => Operands::Number(n),
        Jump(operand)
        | SwapBytes(operand)
        | Clear(_, operand)
        | Complement(_, operand)
        | Increment(_, operand)
        | Decrement(_, operand)
        | Negate(_, operand)
        | AddCarry(_, operand)
        | SubtractCarry(_, operand)
        | Test(_, operand)
        | RotateRight(_, operand)
        | RotateLeft(_, operand)
        | ArithmeticShiftRight(_, operand)
        | ArithmeticShiftLeft(_, operand)
        | SignExtend(operand)
        | MoveToPsw(operand)
        | MoveFromPsw(operand) => Operands::One(operand),
        JumpToSubroutine(r, operand) | ExclusiveOr(r, operand) => {
            Operands::RegisterAnd(r, operand)
        }
        Move { source, dest, .. }
        | Compare { source, dest, .. }
        | BitTest { source, dest, .. }
        | BitClear { source, dest, .. }
        | BitSet { source, dest, .. }
        | Add { source, dest }
        | Subtract { source, dest } => Operands::Two(source, dest),
        Branch(_, displacement) => Operands::BranchOffset(displacement),
        SubtractOneAndBranch(r, offset) => Operands::SobOffset(r, offset),
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mnemonic = mnemonic(*self);
        match operands(*self) {
            Operands::None => write!(f, "{mnemonic}"),
            Operands::Number(n) => write!(f, "{mnemonic} {n:o}"),
            Operands::Register(r) => write!(f, "{mnemonic} {}", RegisterName(r)),
            Operands::One(operand) => write!(f, "{mnemonic} {operand}"),
            Operands::RegisterAnd(r, operand) => {
                write!(f, "{mnemonic} {}, {operand}", RegisterName(r))
            }
            Operands::Two(source, dest) => write!(f, "{mnemonic} {source}, {dest}"),
            Operands::BranchOffset(displacement) => {
                let offset = 2 + 2 * i32::from(displacement);
                if offset < 0 {
                    write!(f, "{mnemonic} .-{:o}", -offset)
                } else {
                    write!(f, "{mnemonic} .+{offset:o}")
                }
            }
            Operands::SobOffset(r, offset) => {
                let offset = 2 - 2 * i32::from(offset);
                if offset < 0 {
                    write!(f, "{mnemonic} {}, .-{:o}", RegisterName(r), -offset)
                } else {
                    write!(f, "{mnemonic} {}, .+{offset:o}", RegisterName(r))
                }
            }
        }
    }
}

// Renders an operand, consuming an extension word from `words` if the mode needs one. `pc` tracks
// the address of the next unconsumed word.
fn render_operand(
    out: &mut String,
    operand: Operand,
    words: &mut impl Iterator<Item = u16>,
    pc: &mut u16,
) {
    let is_pc = usize::from(operand.register) == PC;
    let r = RegisterName(operand.register);

    let word = if operand.extension_words() != 0 {
        *pc = pc.wrapping_add(2);
        words.next()
    } else {
        None
    };

    let _ = match (operand.mode, is_pc, word) {
        (_, _, None) => write!(out, "{operand}"),
        (AddressingMode::Autoincrement, true, Some(value)) => write!(out, "#{value:o}"),
        (AddressingMode::AutoincrementDeferred, true, Some(value)) => write!(out, "@#{value:o}"),
        (mode, _, Some(index)) => {
            let deferred = if mode == AddressingMode::IndexDeferred { "@" } else { "" };
            if is_pc {
                write!(out, "{deferred}{:o}", pc.wrapping_add(index))
            } else {
                write!(out, "{deferred}{index:o}({r})")
            }
        }
    };
}

/// Disassemble an instruction located at `address`, resolving immediate, absolute, and relative
/// operands and branch targets using the words that follow the opcode.
#[must_use]
pub fn disassemble(address: u16, instruction: Instruction, extension: &[u16]) -> String {
    let mnemonic = mnemonic(instruction);
    let mut words = extension.iter().copied();
    let mut pc = address.wrapping_add(2);

    let mut out = mnemonic;
    match operands(instruction) {
        Operands::One(operand) => {
            out.push(' ');
            render_operand(&mut out, operand, &mut words, &mut pc);
        }
        Operands::RegisterAnd(r, operand) => {
            let _ = write!(out, " {}, ", RegisterName(r));
            render_operand(&mut out, operand, &mut words, &mut pc);
        }
        Operands::Two(source, dest) => {
            out.push(' ');
            render_operand(&mut out, source, &mut words, &mut pc);
            out.push_str(", ");
            render_operand(&mut out, dest, &mut words, &mut pc);
        }
        Operands::BranchOffset(displacement) => {
            let target = pc.wrapping_add((i16::from(displacement) << 1) as u16);
            let _ = write!(out, " {target:06o}");
        }
        Operands::SobOffset(r, offset) => {
            let target = pc.wrapping_sub(2 * u16::from(offset));
            let _ = write!(out, " {}, {target:06o}", RegisterName(r));
        }
        Operands::None | Operands::Number(_) | Operands::Register(_) => {
            return instruction.to_string();
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::decode;

    fn disassemble_words(address: u16, words: &[u16]) -> String {
        let instruction = decode(words[0]).unwrap();
        disassemble(address, instruction, &words[1..])
    }

    #[test]
    fn generic_display() {
        assert_eq!(decode(0o010102).unwrap().to_string(), "MOV R1, R2");
        assert_eq!(decode(0o112021).unwrap().to_string(), "MOVB (R0)+, (R1)+");
        assert_eq!(decode(0o005046).unwrap().to_string(), "CLR -(SP)");
        assert_eq!(decode(0o000207).unwrap().to_string(), "RTS PC");
        assert_eq!(decode(0o000257).unwrap().to_string(), "CCC");
        assert_eq!(decode(0o000261).unwrap().to_string(), "SEC");
        assert_eq!(decode(0o000242).unwrap().to_string(), "CLV");
        assert_eq!(decode(0o000240).unwrap().to_string(), "NOP");
        assert_eq!(decode(0o000777).unwrap().to_string(), "BR .+0");
        assert_eq!(decode(0o104021).unwrap().to_string(), "EMT 21");
    }

    #[test]
    fn pc_operands() {
        assert_eq!(disassemble_words(0o1000, &[0o012700, 0o177716]), "MOV #177716, R0");
        assert_eq!(disassemble_words(0o1000, &[0o005037, 0o177660]), "CLR @#177660");
        assert_eq!(disassemble_words(0o1000, &[0o005767, 0o10]), "TST 1014");
        assert_eq!(disassemble_words(0o1000, &[0o016162, 0o4, 0o6]), "MOV 4(R1), 6(R2)");
        assert_eq!(disassemble_words(0o1000, &[0o004767, 0o100]), "JSR PC, 1104");
    }

    #[test]
    fn branch_targets() {
        assert_eq!(disassemble_words(0o1000, &[0o001003]), "BNE 001010");
        assert_eq!(disassemble_words(0o1000, &[0o000777]), "BR 001000");
        assert_eq!(disassemble_words(0o1010, &[0o077103]), "SOB R1, 001004");
    }
}
