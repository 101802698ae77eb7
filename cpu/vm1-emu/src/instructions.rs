mod arithmetic;
mod bits;
mod controlflow;
mod load;
mod table;


use crate::Vm1;
use crate::addressing::Operand;
use crate::bus::{BusInterface, BusResult, OpSize};
use crate::registers::ProcessorStatus;

pub(crate) use table::force_init;
pub use table::decode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCondition {
    Always,
    NotEqual,
    Equal,
    GreaterOrEqual,
    LessThan,
    GreaterThan,
    LessOrEqual,
    Plus,
    Minus,
    Higher,
    LowerOrSame,
    OverflowClear,
    OverflowSet,
    CarryClear,
    CarrySet,
}

impl BranchCondition {
    pub const ALL: [Self; 15] = [
        Self::Always,
        Self::NotEqual,
        Self::Equal,
        Self::GreaterOrEqual,
        Self::LessThan,
        Self::GreaterThan,
        Self::LessOrEqual,
        Self::Plus,
        Self::Minus,
        Self::Higher,
        Self::LowerOrSame,
        Self::OverflowClear,
        Self::OverflowSet,
        Self::CarryClear,
        Self::CarrySet,
    ];

    #[must_use]
    pub fn check(self, psw: ProcessorStatus) -> bool {
        match self {
            Self::Always => true,
            Self::NotEqual => !psw.zero,
            Self::Equal => psw.zero,
            Self::GreaterOrEqual => psw.negative == psw.overflow,
            Self::LessThan => psw.negative != psw.overflow,
            Self::GreaterThan => !psw.zero && psw.negative == psw.overflow,
            Self::LessOrEqual => psw.zero || psw.negative != psw.overflow,
            Self::Plus => !psw.negative,
            Self::Minus => psw.negative,
            Self::Higher => !psw.carry && !psw.zero,
            Self::LowerOrSame => psw.carry || psw.zero,
            Self::OverflowClear => !psw.overflow,
            Self::OverflowSet => psw.overflow,
            Self::CarryClear => !psw.carry,
            Self::CarrySet => psw.carry,
        }
    }

    /// Opcode with a zero displacement
    #[must_use]
    pub fn base_opcode(self) -> u16 {
        match self {
            Self::Always => 0o000400,
            Self::NotEqual => 0o001000,
            Self::Equal => 0o001400,
            Self::GreaterOrEqual => 0o002000,
            Self::LessThan => 0o002400,
            Self::GreaterThan => 0o003000,
            Self::LessOrEqual => 0o003400,
            Self::Plus => 0o100000,
            Self::Minus => 0o100400,
            Self::Higher => 0o101000,
            Self::LowerOrSame => 0o101400,
            Self::OverflowClear => 0o102000,
            Self::OverflowSet => 0o102400,
            Self::CarryClear => 0o103000,
            Self::CarrySet => 0o103400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Halt,
    Wait,
    ReturnFromInterrupt,
    Breakpoint,
    IoTrap,
    Reset,
    ReturnFromTrap,
    Jump(Operand),
    ReturnFromSubroutine(u8),
    ConditionCodes { set: bool, mask: u8 },
    SwapBytes(Operand),
    Branch(BranchCondition, i8),
    JumpToSubroutine(u8, Operand),
    Clear(OpSize, Operand),
    Complement(OpSize, Operand),
    Increment(OpSize, Operand),
    Decrement(OpSize, Operand),
    Negate(OpSize, Operand),
    AddCarry(OpSize, Operand),
    SubtractCarry(OpSize, Operand),
    Test(OpSize, Operand),
    RotateRight(OpSize, Operand),
    RotateLeft(OpSize, Operand),
    ArithmeticShiftRight(OpSize, Operand),
    ArithmeticShiftLeft(OpSize, Operand),
    Mark(u8),
    SignExtend(Operand),
    MoveToPsw(Operand),
    MoveFromPsw(Operand),
    Emulator(u8),
    Trap(u8),
    Move { size: OpSize, source: Operand, dest: Operand },
    Compare { size: OpSize, source: Operand, dest: Operand },
    BitTest { size: OpSize, source: Operand, dest: Operand },
    BitClear { size: OpSize, source: Operand, dest: Operand },
    BitSet { size: OpSize, source: Operand, dest: Operand },
    Add { source: Operand, dest: Operand },
    Subtract { source: Operand, dest: Operand },
    ExclusiveOr(u8, Operand),
    SubtractOneAndBranch(u8, u8),
}

// Extra ticks for reading a source operand, indexed by addressing mode
const SOURCE_MODE_TICKS: [u32; 8] = [0, 12, 12, 20, 12, 20, 20, 28];

// Extra ticks for a read-modify-write destination, indexed by addressing mode
const DEST_MODE_TICKS: [u32; 8] = [0, 20, 20, 32, 20, 32, 32, 40];

// Extra ticks for computing a jump target, indexed by addressing mode
const JUMP_MODE_TICKS: [u32; 8] = [0, 4, 8, 16, 8, 16, 16, 24];

const BASE_TICKS: u32 = 12;
const BRANCH_TICKS: u32 = 16;
const TRAP_TICKS: u32 = 68;
const RETURN_TICKS: u32 = 40;
const RESET_TICKS: u32 = 1140;

fn source_ticks(operand: Operand) -> u32 {
    SOURCE_MODE_TICKS[usize::from(operand.mode.code())]
}

fn dest_ticks(operand: Operand) -> u32 {
    DEST_MODE_TICKS[usize::from(operand.mode.code())]
}

impl Instruction {
    /// Total execution time in CPU ticks, excluding any trap that the instruction causes
    #[must_use]
    pub fn execution_time(self) -> u32 {
        use Instruction::*;

        match self {
            Halt | Breakpoint | IoTrap | Emulator(_) | Trap(_) => TRAP_TICKS,
            Wait | ConditionCodes { .. } => BASE_TICKS,
            ReturnFromInterrupt | ReturnFromTrap => RETURN_TICKS,
            Reset => RESET_TICKS,
            Jump(dest) => BASE_TICKS + JUMP_MODE_TICKS[usize::from(dest.mode.code())],
            JumpToSubroutine(_, dest) => {
                BASE_TICKS + 16 + JUMP_MODE_TICKS[usize::from(dest.mode.code())]
            }
            ReturnFromSubroutine(_) => 2 * BASE_TICKS,
            Branch(..) => BRANCH_TICKS,
            SubtractOneAndBranch(..) => BRANCH_TICKS + 4,
            Mark(_) => 28,
            SwapBytes(dest)
            | Clear(_, dest)
            | Complement(_, dest)
            | Increment(_, dest)
            | Decrement(_, dest)
            | Negate(_, dest)
            | AddCarry(_, dest)
            | SubtractCarry(_, dest)
            | RotateRight(_, dest)
            | RotateLeft(_, dest)
            | ArithmeticShiftRight(_, dest)
            | ArithmeticShiftLeft(_, dest)
            | SignExtend(dest)
            | MoveFromPsw(dest)
            | ExclusiveOr(_, dest) => BASE_TICKS + dest_ticks(dest),
            Test(_, source) => BASE_TICKS + source_ticks(source),
            MoveToPsw(source) => 2 * BASE_TICKS + source_ticks(source),
            Move { source, dest, .. }
            | BitClear { source, dest, .. }
            | BitSet { source, dest, .. }
            | Add { source, dest }
            | Subtract { source, dest } => BASE_TICKS + source_ticks(source) + dest_ticks(dest),
            Compare { source, dest, .. } | BitTest { source, dest, .. } => {
                BASE_TICKS + source_ticks(source) + source_ticks(dest)
            }
        }
    }

    /// Number of words following the opcode in the instruction stream
    #[must_use]
    pub fn extension_words(self) -> u16 {
        use Instruction::*;

        match self {
            Jump(operand)
            | JumpToSubroutine(_, operand)
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
            | MoveFromPsw(operand)
            | ExclusiveOr(_, operand) => operand.extension_words(),
            Move { source, dest, .. }
            | Compare { source, dest, .. }
            | BitTest { source, dest, .. }
            | BitClear { source, dest, .. }
            | BitSet { source, dest, .. }
            | Add { source, dest }
            | Subtract { source, dest } => source.extension_words() + dest.extension_words(),
            Halt
            | Wait
            | ReturnFromInterrupt
            | Breakpoint
            | IoTrap
            | Reset
            | ReturnFromTrap
            | ReturnFromSubroutine(_)
            | ConditionCodes { .. }
            | Branch(..)
            | Mark(_)
            | Emulator(_)
            | Trap(_)
            | SubtractOneAndBranch(..) => 0,
        }
    }

    /// Whether the instruction can change PC other than by stepping past its own words
    #[must_use]
    pub fn is_control_transfer(self) -> bool {
        use Instruction::*;

        match self {
            Halt
            | ReturnFromInterrupt
            | Breakpoint
            | IoTrap
            | ReturnFromTrap
            | Jump(_)
            | ReturnFromSubroutine(_)
            | Branch(..)
            | JumpToSubroutine(..)
            | Mark(_)
            | Emulator(_)
            | Trap(_)
            | SubtractOneAndBranch(..) => true,
            // Any instruction that writes R7 is also a control transfer
            Clear(_, operand)
            | Complement(_, operand)
            | Increment(_, operand)
            | Decrement(_, operand)
            | Negate(_, operand)
            | AddCarry(_, operand)
            | SubtractCarry(_, operand)
            | RotateRight(_, operand)
            | RotateLeft(_, operand)
            | ArithmeticShiftRight(_, operand)
            | ArithmeticShiftLeft(_, operand)
            | SwapBytes(operand)
            | SignExtend(operand)
            | MoveFromPsw(operand)
            | ExclusiveOr(_, operand) => writes_pc(operand),
            Move { dest, .. }
            | BitClear { dest, .. }
            | BitSet { dest, .. }
            | Add { dest, .. }
            | Subtract { dest, .. } => writes_pc(dest),
            Wait
            | Reset
            | ConditionCodes { .. }
            | Test(..)
            | MoveToPsw(_)
            | Compare { .. }
            | BitTest { .. } => false,
        }
    }
}

fn writes_pc(operand: Operand) -> bool {
    operand.is_register() && usize::from(operand.register) == crate::registers::PC
}

impl Vm1 {
    pub(crate) fn execute<B: BusInterface>(
        &mut self,
        bus: &mut B,
        instruction: Instruction,
    ) -> BusResult<()> {
        use Instruction::*;

        match instruction {
            Halt => self.halt(bus),
            Wait => {
                self.wait();
                Ok(())
            }
            ReturnFromInterrupt => self.rti(bus),
            Breakpoint => self.trap(bus, controlflow::BREAKPOINT_VECTOR),
            IoTrap => self.trap(bus, controlflow::IOT_VECTOR),
            Reset => {
                self.reset_instruction(bus);
                Ok(())
            }
            ReturnFromTrap => self.rtt(bus),
            Jump(dest) => self.jmp(bus, dest),
            ReturnFromSubroutine(register) => self.rts(bus, register),
            ConditionCodes { set, mask } => {
                self.condition_codes(set, mask);
                Ok(())
            }
            SwapBytes(dest) => self.swab(bus, dest),
            Branch(condition, displacement) => {
                self.branch(condition, displacement);
                Ok(())
            }
            JumpToSubroutine(register, dest) => self.jsr(bus, register, dest),
            Clear(size, dest) => self.clr(bus, size, dest),
            Complement(size, dest) => self.com(bus, size, dest),
            Increment(size, dest) => self.inc(bus, size, dest),
            Decrement(size, dest) => self.dec(bus, size, dest),
            Negate(size, dest) => self.neg(bus, size, dest),
            AddCarry(size, dest) => self.adc(bus, size, dest),
            SubtractCarry(size, dest) => self.sbc(bus, size, dest),
            Test(size, dest) => self.tst(bus, size, dest),
            RotateRight(size, dest) => self.ror(bus, size, dest),
            RotateLeft(size, dest) => self.rol(bus, size, dest),
            ArithmeticShiftRight(size, dest) => self.asr(bus, size, dest),
            ArithmeticShiftLeft(size, dest) => self.asl(bus, size, dest),
            Mark(count) => self.mark(bus, count),
            SignExtend(dest) => self.sxt(bus, dest),
            MoveToPsw(source) => self.mtps(bus, source),
            MoveFromPsw(dest) => self.mfps(bus, dest),
            Emulator(_) => self.trap(bus, controlflow::EMT_VECTOR),
            Trap(_) => self.trap(bus, controlflow::TRAP_VECTOR),
            Move { size, source, dest } => self.mov(bus, size, source, dest),
            Compare { size, source, dest } => self.cmp(bus, size, source, dest),
            BitTest { size, source, dest } => self.bit(bus, size, source, dest),
            BitClear { size, source, dest } => self.bic(bus, size, source, dest),
            BitSet { size, source, dest } => self.bis(bus, size, source, dest),
            Add { source, dest } => self.add(bus, source, dest),
            Subtract { source, dest } => self.sub(bus, source, dest),
            ExclusiveOr(register, dest) => self.xor(bus, register, dest),
            SubtractOneAndBranch(register, offset) => {
                self.sob(register, offset);
                Ok(())
            }
        }
    }
}
