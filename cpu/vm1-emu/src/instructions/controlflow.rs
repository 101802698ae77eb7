//! Branch, jump, subroutine, and trap instructions

use crate::Vm1;
use crate::addressing::Operand;
use crate::bus::{BusInterface, BusResult};
use crate::instructions::BranchCondition;
use crate::registers::{PC, SP};

pub(crate) const BREAKPOINT_VECTOR: u16 = 0o14;
pub(crate) const IOT_VECTOR: u16 = 0o20;
pub(crate) const EMT_VECTOR: u16 = 0o30;
pub(crate) const TRAP_VECTOR: u16 = 0o34;

impl Vm1 {
    // HALT
    pub(super) fn halt<B: BusInterface>(&mut self, bus: &mut B) -> BusResult<()> {
        log::trace!("HALT instruction at {:06o}", self.registers.pc().wrapping_sub(2));
        self.enter_halt_mode(bus, true)
    }

    // WAIT
    pub(super) fn wait(&mut self) {
        log::trace!("Entering WAIT mode");
        self.latches.wait = true;
    }

    // RESET
    // Reinitializes external devices; CPU state is not affected
    pub(super) fn reset_instruction<B: BusInterface>(&mut self, bus: &mut B) {
        log::trace!("RESET instruction, reinitializing devices");
        bus.reset_devices();
    }

    fn return_from_interrupt<B: BusInterface>(&mut self, bus: &mut B) -> BusResult<()> {
        let pc = self.pop(bus)?;
        self.registers.gpr[PC] = pc;

        let psw = self.pop(bus)?;
        self.registers.psw.set_low_byte(psw as u8);

        if self.latches.halt_mode {
            log::trace!("Leaving HALT mode, returning to {pc:06o}");
            self.latches.halt_mode = false;
        }

        Ok(())
    }

    // RTI
    pub(super) fn rti<B: BusInterface>(&mut self, bus: &mut B) -> BusResult<()> {
        self.return_from_interrupt(bus)
    }

    // RTT
    // Same as RTI except that a trace trap is deferred until after the next instruction
    pub(super) fn rtt<B: BusInterface>(&mut self, bus: &mut B) -> BusResult<()> {
        self.return_from_interrupt(bus)?;
        self.latches.deferred_trace_trap = true;

        Ok(())
    }

    // Bxx offset
    pub(super) fn branch(&mut self, condition: BranchCondition, displacement: i8) {
        if condition.check(self.registers.psw) {
            let offset = i16::from(displacement) << 1;
            self.registers.gpr[PC] = self.registers.gpr[PC].wrapping_add(offset as u16);
        }
    }

    // JMP dst
    pub(super) fn jmp<B: BusInterface>(&mut self, bus: &mut B, dest: Operand) -> BusResult<()> {
        let address = self.jump_address(bus, dest)?;
        self.registers.gpr[PC] = address;

        Ok(())
    }

    // JSR R, dst
    // Push R, R <- PC, PC <- dst
    pub(super) fn jsr<B: BusInterface>(
        &mut self,
        bus: &mut B,
        register: u8,
        dest: Operand,
    ) -> BusResult<()> {
        let address = self.jump_address(bus, dest)?;

        let r = usize::from(register);
        self.push(bus, self.registers.gpr[r])?;
        self.registers.gpr[r] = self.registers.gpr[PC];
        self.registers.gpr[PC] = address;

        Ok(())
    }

    // RTS R
    // PC <- R, R <- pop
    pub(super) fn rts<B: BusInterface>(&mut self, bus: &mut B, register: u8) -> BusResult<()> {
        let r = usize::from(register);
        self.registers.gpr[PC] = self.registers.gpr[r];
        self.registers.gpr[r] = self.pop(bus)?;

        Ok(())
    }

    // MARK NN
    // SP <- PC + 2*NN, PC <- R5, R5 <- pop
    pub(super) fn mark<B: BusInterface>(&mut self, bus: &mut B, count: u8) -> BusResult<()> {
        self.registers.gpr[SP] = self.registers.gpr[PC].wrapping_add(2 * u16::from(count));
        self.registers.gpr[PC] = self.registers.gpr[5];
        self.registers.gpr[5] = self.pop(bus)?;

        Ok(())
    }

    // SOB R, NN
    // Decrement R and branch backwards if the result is non-zero; flags are not affected
    pub(super) fn sob(&mut self, register: u8, offset: u8) {
        let r = usize::from(register);
        self.registers.gpr[r] = self.registers.gpr[r].wrapping_sub(1);
        if self.registers.gpr[r] != 0 {
            self.registers.gpr[PC] = self.registers.gpr[PC].wrapping_sub(2 * u16::from(offset));
        }
    }
}
