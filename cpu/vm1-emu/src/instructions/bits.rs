//! Logical, shift, and rotate instructions

use crate::Vm1;
use crate::addressing::Operand;
use crate::bus::{BusInterface, BusResult, OpSize};
use crate::num::WordExt;

impl Vm1 {
    fn set_logic_flags(&mut self, size: OpSize, result: u16) {
        self.registers.psw.set_nz(size, result);
        self.registers.psw.overflow = false;
    }

    // Shifts and rotates set V to N XOR C after the operation
    fn set_shift_flags(&mut self, size: OpSize, result: u16, carry: bool) {
        self.registers.psw.set_nz(size, result);
        self.registers.psw.carry = carry;
        self.registers.psw.overflow = self.registers.psw.negative != carry;
    }

    // COM(B) dst
    pub(super) fn com<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let result = !value & size.mask();
            cpu.set_logic_flags(size, result);
            cpu.registers.psw.carry = true;
            Some(result)
        })
    }

    // BIT(B) src, dst
    pub(super) fn bit<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        source: Operand,
        dest: Operand,
    ) -> BusResult<()> {
        let source = self.read_operand(bus, source, size)?;
        let dest = self.read_operand(bus, dest, size)?;
        self.set_logic_flags(size, source & dest);

        Ok(())
    }

    // BIC(B) src, dst
    pub(super) fn bic<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        source: Operand,
        dest: Operand,
    ) -> BusResult<()> {
        let source = self.read_operand(bus, source, size)?;
        self.modify_operand(bus, dest, size, |cpu, value| {
            let result = value & !source;
            cpu.set_logic_flags(size, result);
            Some(result)
        })
    }

    // BIS(B) src, dst
    pub(super) fn bis<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        source: Operand,
        dest: Operand,
    ) -> BusResult<()> {
        let source = self.read_operand(bus, source, size)?;
        self.modify_operand(bus, dest, size, |cpu, value| {
            let result = value | source;
            cpu.set_logic_flags(size, result);
            Some(result)
        })
    }

    // XOR R, dst
    pub(super) fn xor<B: BusInterface>(
        &mut self,
        bus: &mut B,
        register: u8,
        dest: Operand,
    ) -> BusResult<()> {
        let source = self.registers.gpr[usize::from(register)];
        self.modify_operand(bus, dest, OpSize::Word, |cpu, value| {
            let result = value ^ source;
            cpu.set_logic_flags(OpSize::Word, result);
            Some(result)
        })
    }

    // ROR(B) dst
    pub(super) fn ror<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let carry_in = if cpu.registers.psw.carry { size.sign_mask() } else { 0 };
            let result = ((value & size.mask()) >> 1) | carry_in;
            cpu.set_shift_flags(size, result, value & 1 != 0);
            Some(result)
        })
    }

    // ROL(B) dst
    pub(super) fn rol<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let result = ((value << 1) | u16::from(cpu.registers.psw.carry)) & size.mask();
            cpu.set_shift_flags(size, result, size.sign_bit(value));
            Some(result)
        })
    }

    // ASR(B) dst
    pub(super) fn asr<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let value = value & size.mask();
            let result = (value >> 1) | (value & size.sign_mask());
            cpu.set_shift_flags(size, result, value & 1 != 0);
            Some(result)
        })
    }

    // ASL(B) dst
    pub(super) fn asl<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let result = (value << 1) & size.mask();
            cpu.set_shift_flags(size, result, size.sign_bit(value));
            Some(result)
        })
    }

    // SWAB dst
    // Flags are set from the new low byte
    pub(super) fn swab<B: BusInterface>(&mut self, bus: &mut B, dest: Operand) -> BusResult<()> {
        self.modify_operand(bus, dest, OpSize::Word, |cpu, value| {
            let result = value.swap_bytes();
            cpu.set_logic_flags(OpSize::Byte, result.lsb().into());
            cpu.registers.psw.carry = false;
            Some(result)
        })
    }

    // SXT dst
    // Does not read the destination
    pub(super) fn sxt<B: BusInterface>(&mut self, bus: &mut B, dest: Operand) -> BusResult<()> {
        let negative = self.registers.psw.negative;
        self.write_operand(bus, dest, OpSize::Word, if negative { 0xFFFF } else { 0 })?;

        self.registers.psw.zero = !negative;
        self.registers.psw.overflow = false;

        Ok(())
    }
}
