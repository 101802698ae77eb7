//! Opcode decode table
//!
//! All 65536 opcodes are decoded once up front. Slots left empty are reserved instructions on the
//! 1801VM1 (EIS/FIS, MFPI/MTPI, SPL, MFPT, JMP/JSR with a register destination, and so on).

use crate::addressing::{AddressingMode, Operand};
use crate::bus::OpSize;
use crate::instructions::{BranchCondition, Instruction};
use std::sync::LazyLock;

type DecodeTable = Box<[Option<Instruction>]>;

static DECODE_TABLE: LazyLock<DecodeTable> = LazyLock::new(build_table);

/// Decode an opcode, returning `None` if it is reserved.
#[inline]
#[must_use]
pub fn decode(opcode: u16) -> Option<Instruction> {
    DECODE_TABLE[usize::from(opcode)]
}

pub(crate) fn force_init() {
    LazyLock::force(&DECODE_TABLE);
}

fn build_table() -> DecodeTable {
    let mut table: DecodeTable = vec![None; 1 << 16].into_boxed_slice();

    populate_control(&mut table);
    populate_branches(&mut table);
    populate_single_operand(&mut table);
    populate_register_operand(&mut table);
    populate_double_operand(&mut table);
    populate_traps(&mut table);

    log::debug!(
        "Built 1801VM1 decode table with {} valid opcodes",
        table.iter().filter(|slot| slot.is_some()).count()
    );

    table
}

fn register(table: &mut [Option<Instruction>], opcode: u16, instruction: Instruction) {
    let slot = &mut table[usize::from(opcode)];
    if let Some(existing) = slot {
        panic!(
            "Conflicting registration for opcode {opcode:06o}: {existing:?} and {instruction:?}"
        );
    }

    *slot = Some(instruction);
}

fn operands() -> impl Iterator<Item = Operand> {
    (0..0o100).map(Operand::from_bits)
}

fn populate_control(table: &mut [Option<Instruction>]) {
    for (opcode, instruction) in [
        (0o000000, Instruction::Halt),
        (0o000001, Instruction::Wait),
        (0o000002, Instruction::ReturnFromInterrupt),
        (0o000003, Instruction::Breakpoint),
        (0o000004, Instruction::IoTrap),
        (0o000005, Instruction::Reset),
        (0o000006, Instruction::ReturnFromTrap),
    ] {
        register(table, opcode, instruction);
    }

    for r in 0..8 {
        register(table, 0o000200 | r, Instruction::ReturnFromSubroutine(r as u8));
    }

    // 000240-000257 clear and 000260-000277 set the selected NZVC bits
    for opcode in 0o000240..=0o000277 {
        let set = opcode & 0o20 != 0;
        let mask = (opcode & 0o17) as u8;
        register(table, opcode, Instruction::ConditionCodes { set, mask });
    }
}

fn populate_branches(table: &mut [Option<Instruction>]) {
    for condition in BranchCondition::ALL {
        for displacement in 0..=0xFF {
            let opcode = condition.base_opcode() | displacement;
            register(table, opcode, Instruction::Branch(condition, displacement as u8 as i8));
        }
    }
}

fn populate_single_operand(table: &mut [Option<Instruction>]) {
    for dest in operands() {
        let dd = dest.to_bits();

        // JMP and JSR have no meaning with a register destination
        if dest.mode != AddressingMode::Register {
            register(table, 0o000100 | dd, Instruction::Jump(dest));
        }

        register(table, 0o000300 | dd, Instruction::SwapBytes(dest));
        register(table, 0o006700 | dd, Instruction::SignExtend(dest));
        register(table, 0o106400 | dd, Instruction::MoveToPsw(dest));
        register(table, 0o106700 | dd, Instruction::MoveFromPsw(dest));

        for (size, byte_bit) in [(OpSize::Word, 0), (OpSize::Byte, 0o100000)] {
            let ops: [(u16, fn(OpSize, Operand) -> Instruction); 12] = [
                (0o005000, Instruction::Clear),
                (0o005100, Instruction::Complement),
                (0o005200, Instruction::Increment),
                (0o005300, Instruction::Decrement),
                (0o005400, Instruction::Negate),
                (0o005500, Instruction::AddCarry),
                (0o005600, Instruction::SubtractCarry),
                (0o005700, Instruction::Test),
                (0o006000, Instruction::RotateRight),
                (0o006100, Instruction::RotateLeft),
                (0o006200, Instruction::ArithmeticShiftRight),
                (0o006300, Instruction::ArithmeticShiftLeft),
            ];

            for (base, constructor) in ops {
                register(table, byte_bit | base | dd, constructor(size, dest));
            }
        }
    }

    for count in 0..0o100 {
        register(table, 0o006400 | count, Instruction::Mark(count as u8));
    }
}

fn populate_register_operand(table: &mut [Option<Instruction>]) {
    for r in 0..8_u16 {
        let rr = r << 6;

        for dest in operands() {
            let dd = dest.to_bits();

            if dest.mode != AddressingMode::Register {
                register(table, 0o004000 | rr | dd, Instruction::JumpToSubroutine(r as u8, dest));
            }

            register(table, 0o074000 | rr | dd, Instruction::ExclusiveOr(r as u8, dest));
        }

        for offset in 0..0o100 {
            register(
                table,
                0o077000 | rr | offset,
                Instruction::SubtractOneAndBranch(r as u8, offset as u8),
            );
        }
    }
}

fn populate_double_operand(table: &mut [Option<Instruction>]) {
    for source in operands() {
        for dest in operands() {
            let ssdd = (source.to_bits() << 6) | dest.to_bits();

            for (size, byte_bit) in [(OpSize::Word, 0), (OpSize::Byte, 0o100000)] {
                for (base, instruction) in [
                    (0o010000, Instruction::Move { size, source, dest }),
                    (0o020000, Instruction::Compare { size, source, dest }),
                    (0o030000, Instruction::BitTest { size, source, dest }),
                    (0o040000, Instruction::BitClear { size, source, dest }),
                    (0o050000, Instruction::BitSet { size, source, dest }),
                ] {
                    register(table, byte_bit | base | ssdd, instruction);
                }
            }

            register(table, 0o060000 | ssdd, Instruction::Add { source, dest });
            register(table, 0o160000 | ssdd, Instruction::Subtract { source, dest });
        }
    }
}

fn populate_traps(table: &mut [Option<Instruction>]) {
    for code in 0..=0o377 {
        register(table, 0o104000 | code, Instruction::Emulator(code as u8));
        register(table, 0o104400 | code, Instruction::Trap(code as u8));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_opcodes() {
        for opcode in [
            0o000007, // MFPT
            0o000010,
            0o000100, // JMP R0
            0o000210,
            0o000230, // SPL
            0o004700, // JSR PC, R0
            0o006500, // MFPI
            0o006600, // MTPI
            0o070000, // MUL
            0o071000, // DIV
            0o072000, // ASH
            0o073000, // ASHC
            0o075000,
            0o076000,
            0o106500, // MFPD
            0o106600, // MTPD
            0o170000, // FPP
            0o177777,
        ] {
            assert_eq!(decode(opcode), None, "opcode {opcode:06o}");
        }
    }

    #[test]
    fn decodes_representative_opcodes() {
        let r0 = Operand::from_bits(0);
        let r1 = Operand::from_bits(1);
        let immediate = Operand::from_bits(0o27);

        assert_eq!(decode(0o000000), Some(Instruction::Halt));
        assert_eq!(decode(0o000240), Some(Instruction::ConditionCodes { set: false, mask: 0 }));
        assert_eq!(decode(0o000277), Some(Instruction::ConditionCodes { set: true, mask: 0o17 }));
        assert_eq!(decode(0o000207), Some(Instruction::ReturnFromSubroutine(7)));
        assert_eq!(
            decode(0o010001),
            Some(Instruction::Move { size: OpSize::Word, source: r0, dest: r1 })
        );
        assert_eq!(
            decode(0o112700),
            Some(Instruction::Move { size: OpSize::Byte, source: immediate, dest: r0 })
        );
        assert_eq!(decode(0o160001), Some(Instruction::Subtract { source: r0, dest: r1 }));
        assert_eq!(decode(0o105001), Some(Instruction::Clear(OpSize::Byte, r1)));
        assert_eq!(decode(0o077103), Some(Instruction::SubtractOneAndBranch(1, 3)));
        assert_eq!(decode(0o001377), Some(Instruction::Branch(BranchCondition::NotEqual, -1)));
        assert_eq!(decode(0o103401), Some(Instruction::Branch(BranchCondition::CarrySet, 1)));
        assert_eq!(decode(0o104377), Some(Instruction::Emulator(0o377)));
        assert_eq!(decode(0o104400), Some(Instruction::Trap(0)));
        assert_eq!(decode(0o106700), Some(Instruction::MoveFromPsw(r0)));
    }

    #[test]
    fn valid_opcode_count() {
        let valid = (0..=u16::MAX).filter(|&opcode| decode(opcode).is_some()).count();

        // Double operand: MOV(B), CMP(B), BIT(B), BIC(B), BIS(B), ADD, SUB
        let double = 12 * 4096;
        // Single operand: 24 sized ops + SWAB/SXT/MTPS/MFPS at 64 each, JMP at 56, MARK at 64
        let single = 28 * 64 + 56 + 64;
        // JSR (56 per register), XOR and SOB (64 per register)
        let register_ops = 8 * (56 + 64 + 64);
        let branches = 15 * 256;
        let traps = 512;
        let control = 7 + 8 + 32;

        assert_eq!(valid, double + single + register_ops + branches + traps + control);
    }
}
