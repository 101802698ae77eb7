//! Arithmetic instructions

use crate::Vm1;
use crate::addressing::Operand;
use crate::bus::{BusInterface, BusResult, OpSize};

pub(super) struct Flags {
    pub(super) overflow: bool,
    pub(super) carry: bool,
}

pub(super) fn add(size: OpSize, source: u16, dest: u16) -> (u16, Flags) {
    let mask = size.mask();
    let sum = u32::from(source & mask) + u32::from(dest & mask);
    let result = (sum as u16) & mask;

    let overflow = size.sign_bit((!source ^ dest) & (source ^ result));
    let carry = sum > u32::from(mask);

    (result, Flags { overflow, carry })
}

pub(super) fn subtract(size: OpSize, minuend: u16, subtrahend: u16) -> (u16, Flags) {
    let mask = size.mask();
    let (minuend, subtrahend) = (minuend & mask, subtrahend & mask);
    let result = minuend.wrapping_sub(subtrahend) & mask;

    let overflow = size.sign_bit((minuend ^ subtrahend) & (!subtrahend ^ result));
    let carry = subtrahend > minuend;

    (result, Flags { overflow, carry })
}

impl Vm1 {
    fn apply_flags(&mut self, size: OpSize, result: u16, flags: Flags) {
        self.registers.psw.set_nz(size, result);
        self.registers.psw.overflow = flags.overflow;
        self.registers.psw.carry = flags.carry;
    }

    // ADD src, dst
    pub(super) fn add<B: BusInterface>(
        &mut self,
        bus: &mut B,
        source: Operand,
        dest: Operand,
    ) -> BusResult<()> {
        let source = self.read_operand(bus, source, OpSize::Word)?;
        self.modify_operand(bus, dest, OpSize::Word, |cpu, dest| {
            let (result, flags) = add(OpSize::Word, source, dest);
            cpu.apply_flags(OpSize::Word, result, flags);
            Some(result)
        })
    }

    // SUB src, dst
    // dst <- dst - src
    pub(super) fn sub<B: BusInterface>(
        &mut self,
        bus: &mut B,
        source: Operand,
        dest: Operand,
    ) -> BusResult<()> {
        let source = self.read_operand(bus, source, OpSize::Word)?;
        self.modify_operand(bus, dest, OpSize::Word, |cpu, dest| {
            let (result, flags) = subtract(OpSize::Word, dest, source);
            cpu.apply_flags(OpSize::Word, result, flags);
            Some(result)
        })
    }

    // CMP(B) src, dst
    // Computes src - dst, which is the reverse of SUB
    pub(super) fn cmp<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        source: Operand,
        dest: Operand,
    ) -> BusResult<()> {
        let source = self.read_operand(bus, source, size)?;
        let dest = self.read_operand(bus, dest, size)?;

        let (result, flags) = subtract(size, source, dest);
        self.apply_flags(size, result, flags);

        Ok(())
    }

    // INC(B) dst
    pub(super) fn inc<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let result = value.wrapping_add(1) & size.mask();
            cpu.registers.psw.set_nz(size, result);
            cpu.registers.psw.overflow = result == size.sign_mask();
            Some(result)
        })
    }

    // DEC(B) dst
    pub(super) fn dec<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let result = value.wrapping_sub(1) & size.mask();
            cpu.registers.psw.set_nz(size, result);
            cpu.registers.psw.overflow = value == size.sign_mask();
            Some(result)
        })
    }

    // NEG(B) dst
    pub(super) fn neg<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let result = 0_u16.wrapping_sub(value) & size.mask();
            cpu.registers.psw.set_nz(size, result);
            cpu.registers.psw.overflow = result == size.sign_mask();
            cpu.registers.psw.carry = result != 0;
            Some(result)
        })
    }

    // ADC(B) dst
    pub(super) fn adc<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let carry_in = cpu.registers.psw.carry;
            let result = value.wrapping_add(carry_in.into()) & size.mask();
            cpu.registers.psw.set_nz(size, result);
            cpu.registers.psw.overflow = carry_in && value == size.max_positive();
            cpu.registers.psw.carry = carry_in && value == size.mask();
            Some(result)
        })
    }

    // SBC(B) dst
    pub(super) fn sbc<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.modify_operand(bus, dest, size, |cpu, value| {
            let carry_in = cpu.registers.psw.carry;
            let result = value.wrapping_sub(carry_in.into()) & size.mask();
            cpu.registers.psw.set_nz(size, result);
            cpu.registers.psw.overflow = value == size.sign_mask();
            cpu.registers.psw.carry = carry_in && value == 0;
            Some(result)
        })
    }

    // TST(B) dst
    pub(super) fn tst<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        let value = self.read_operand(bus, dest, size)?;
        self.registers.psw.set_nz(size, value);
        self.registers.psw.overflow = false;
        self.registers.psw.carry = false;

        Ok(())
    }
}
