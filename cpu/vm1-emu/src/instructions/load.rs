//! Move and PSW instructions

use crate::Vm1;
use crate::addressing::Operand;
use crate::bus::{BusInterface, BusResult, OpSize};
use crate::registers::ProcessorStatus;

impl Vm1 {
    // MOV(B) src, dst
    // MOVB to a register sign extends into the high byte
    pub(super) fn mov<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        source: Operand,
        dest: Operand,
    ) -> BusResult<()> {
        let value = self.read_operand(bus, source, size)?;

        self.registers.psw.set_nz(size, value);
        self.registers.psw.overflow = false;

        self.write_operand_sign_extended(bus, dest, size, value)
    }

    // CLR(B) dst
    pub(super) fn clr<B: BusInterface>(
        &mut self,
        bus: &mut B,
        size: OpSize,
        dest: Operand,
    ) -> BusResult<()> {
        self.write_operand(bus, dest, size, 0)?;

        let psw = &mut self.registers.psw;
        psw.negative = false;
        psw.zero = true;
        psw.overflow = false;
        psw.carry = false;

        Ok(())
    }

    // MTPS src
    // Loads PSW bits 0-7 except for T
    pub(super) fn mtps<B: BusInterface>(&mut self, bus: &mut B, source: Operand) -> BusResult<()> {
        let value = self.read_operand(bus, source, OpSize::Byte)? as u8;

        let trace = self.registers.psw.trace;
        self.registers.psw.set_low_byte(value);
        self.registers.psw.trace = trace;

        Ok(())
    }

    // MFPS dst
    // Does not read the destination; a register destination is sign extended
    pub(super) fn mfps<B: BusInterface>(&mut self, bus: &mut B, dest: Operand) -> BusResult<()> {
        let value = u16::from(self.registers.psw.low_byte());
        self.write_operand_sign_extended(bus, dest, OpSize::Byte, value)?;

        self.registers.psw.set_nz(OpSize::Byte, value);
        self.registers.psw.overflow = false;

        Ok(())
    }

    // CLx / SEx / CCC / SCC / NOP
    pub(super) fn condition_codes(&mut self, set: bool, mask: u8) {
        let psw = u16::from(self.registers.psw);
        let mask = u16::from(mask);
        let psw = if set { psw | mask } else { psw & !mask };
        self.registers.psw = ProcessorStatus::from(psw);
    }
}
