//! 1801VM1 CPU emulation core
//!
//! The 1801VM1 is the PDP-11 compatible microprocessor used in the BK-0010 and BK-0011M. This crate
//! covers the register file, addressing modes, instruction decode and execution, and trap/interrupt
//! arbitration including the machine-specific HALT and WAIT modes. Memory and devices are reached
//! through [`BusInterface`](bus::BusInterface).

pub mod addressing;
pub mod bus;
mod disassemble;
pub mod instructions;
pub mod interrupts;
mod num;
pub mod registers;


use crate::bus::{BusInterface, BusResult};
use crate::instructions::Instruction;
use crate::interrupts::{
    CONTROL_REGISTER_ADDRESS, IDLE_TICKS, InterruptLines, SAVED_PC_ADDRESS, SAVED_PSW_ADDRESS,
};
use crate::num::{GetBit, WordExt};
use crate::registers::{PC, ProcessorStatus, RESET_PSW, Registers};
use bincode::{Decode, Encode};
use std::fmt::Debug;
use std::sync::Arc;

pub use disassemble::disassemble;

/// Used when the start address cannot be read from the control register
pub const DEFAULT_START_ADDRESS: u16 = 0o100000;

/// Fired after every successfully vectored trap, interrupt, or HALT mode entry.
pub trait TrapListener: Send {
    fn on_trap(&mut self, vector: u16);
}

impl<F: FnMut(u16) + Send> TrapListener for F {
    fn on_trap(&mut self, vector: u16) {
        self(vector);
    }
}

/// Notified after every executed instruction. For debugging and instrumentation only; cannot
/// alter execution.
pub trait InstructionObserver: Send {
    fn instruction_executed(
        &mut self,
        address: u16,
        instruction: Instruction,
        registers: &Registers,
    );
}

impl<F: FnMut(u16, Instruction, &Registers) + Send> InstructionObserver for F {
    fn instruction_executed(
        &mut self,
        address: u16,
        instruction: Instruction,
        registers: &Registers,
    ) {
        self(address, instruction, registers);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct Latches {
    pub bus_error: bool,
    pub reserved_opcode: bool,
    pub deferred_trace_trap: bool,
    pub halt_mode: bool,
    pub wait: bool,
    // Set when HALT mode entry fails after a double bus fault; cleared only by reset
    pub frozen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct HaltRegisters {
    pub pc: u16,
    pub psw: u16,
}

/// Flat CPU snapshot: registers, PSW, latches, interrupt requests, and the tick counter
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Vm1State {
    pub registers: Registers,
    pub latches: Latches,
    pub halt_registers: HaltRegisters,
    pub irq1: bool,
    pub irq2: bool,
    pub irq3: bool,
    pub virq: u64,
    pub ticks: u64,
}

pub struct Vm1 {
    registers: Registers,
    latches: Latches,
    halt_registers: HaltRegisters,
    lines: Arc<InterruptLines>,
    ticks: u64,
    trap_listener: Option<Box<dyn TrapListener>>,
    observer: Option<Box<dyn InstructionObserver>>,
}

impl Debug for Vm1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm1")
            .field("registers", &self.registers)
            .field("latches", &self.latches)
            .field("halt_registers", &self.halt_registers)
            .field("lines", &self.lines)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl Default for Vm1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm1 {
    #[must_use]
    pub fn new() -> Self {
        instructions::force_init();

        Self {
            registers: Registers { gpr: [0; 8], psw: ProcessorStatus::from(RESET_PSW) },
            latches: Latches::default(),
            halt_registers: HaltRegisters::default(),
            lines: Arc::new(InterruptLines::new()),
            ticks: 0,
            trap_listener: None,
            observer: None,
        }
    }

    /// Reset the CPU. PSW is set to 0340 and PC is loaded from the high byte of the control
    /// register, falling back to [`DEFAULT_START_ADDRESS`] if that read faults.
    pub fn reset<B: BusInterface>(&mut self, bus: &mut B) {
        self.latches = Latches::default();
        self.lines.clear_all();
        self.registers.psw = ProcessorStatus::from(RESET_PSW);

        self.registers.gpr[PC] = match bus.read_word(CONTROL_REGISTER_ADDRESS) {
            Ok(control) => control & 0o177400,
            Err(err) => {
                log::warn!("Unable to read start address at reset ({err}); using default");
                DEFAULT_START_ADDRESS
            }
        };

        log::trace!("Reset 1801VM1; PC is {:06o}", self.registers.gpr[PC]);
    }

    /// Fetch, decode, and execute a single instruction, ignoring WAIT mode and pending conditions.
    /// Faults and reserved opcodes are latched for the next resolution pass. Returns ticks consumed.
    pub fn execute_instruction<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        let pc = self.registers.pc();
        let opcode = match self.fetch_word(bus) {
            Ok(opcode) => opcode,
            Err(err) => {
                log::warn!("Instruction fetch failed: {err}");
                self.latches.bus_error = true;
                return 0;
            }
        };

        let Some(instruction) = instructions::decode(opcode) else {
            log::warn!("Reserved opcode {opcode:06o} at {pc:06o}");
            self.latches.reserved_opcode = true;
            return 0;
        };

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Executing opcode {opcode:06o} at PC {pc:06o}: {instruction}");
            log::trace!("  Registers: {}", self.registers);
        }

        if let Err(err) = self.execute(bus, instruction) {
            log::warn!("{err} while executing {instruction} at {pc:06o}");
            self.latches.bus_error = true;
        }

        let ticks = instruction.execution_time();
        self.ticks += u64::from(ticks);

        if self.registers.psw.trace && instruction != Instruction::ReturnFromTrap {
            self.latches.deferred_trace_trap = false;
        }

        if let Some(observer) = &mut self.observer {
            observer.instruction_executed(pc, instruction, &self.registers);
        }

        ticks
    }

    /// One full pass: an instruction step (skipped in WAIT mode or with a bus error pending)
    /// followed by servicing at most one pending condition. Returns ticks consumed.
    pub fn execute_pass<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        if self.latches.frozen {
            self.ticks += u64::from(IDLE_TICKS);
            return IDLE_TICKS;
        }

        let mut ticks = if self.latches.wait {
            self.ticks += u64::from(IDLE_TICKS);
            IDLE_TICKS
        } else if self.latches.bus_error {
            0
        } else {
            self.execute_instruction(bus)
        };

        let resolve_ticks = self.resolve_pending(bus);
        self.ticks += u64::from(resolve_ticks);
        ticks += resolve_ticks;

        ticks
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Register numbers wrap modulo 8, as in instruction encodings.
    #[must_use]
    pub fn register(&self, register: usize) -> u16 {
        self.registers.gpr[register & 7]
    }

    pub fn set_register(&mut self, register: usize, value: u16) {
        self.registers.gpr[register & 7] = value;
    }

    #[must_use]
    pub fn pc(&self) -> u16 {
        self.registers.pc()
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.registers.gpr[PC] = pc;
    }

    #[must_use]
    pub fn psw(&self) -> u16 {
        self.registers.psw.into()
    }

    pub fn set_psw(&mut self, psw: u16) {
        self.registers.psw = ProcessorStatus::from(psw);
    }

    #[must_use]
    pub fn latches(&self) -> Latches {
        self.latches
    }

    #[must_use]
    pub fn halt_registers(&self) -> HaltRegisters {
        self.halt_registers
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub fn in_halt_mode(&self) -> bool {
        self.latches.halt_mode
    }

    #[must_use]
    pub fn in_wait_mode(&self) -> bool {
        self.latches.wait
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.latches.frozen
    }

    /// Shared handle to the interrupt request lines, for use from device or host threads
    #[must_use]
    pub fn interrupt_lines(&self) -> Arc<InterruptLines> {
        Arc::clone(&self.lines)
    }

    pub fn request_irq1(&self) {
        self.lines.request_irq1();
    }

    pub fn clear_irq1(&self) {
        self.lines.clear_irq1();
    }

    pub fn request_irq2(&self) {
        self.lines.request_irq2();
    }

    pub fn clear_irq2(&self) {
        self.lines.clear_irq2();
    }

    pub fn request_irq3(&self) {
        self.lines.request_irq3();
    }

    pub fn clear_irq3(&self) {
        self.lines.clear_irq3();
    }

    pub fn request_virq(&self, vector: u16) -> bool {
        self.lines.request_virq(vector)
    }

    pub fn clear_virq(&self, vector: u16) {
        self.lines.clear_virq(vector);
    }

    pub fn set_trap_listener(&mut self, listener: Option<Box<dyn TrapListener>>) {
        self.trap_listener = listener;
    }

    pub fn set_instruction_observer(&mut self, observer: Option<Box<dyn InstructionObserver>>) {
        self.observer = observer;
    }

    #[must_use]
    pub fn snapshot(&self) -> Vm1State {
        Vm1State {
            registers: self.registers.clone(),
            latches: self.latches,
            halt_registers: self.halt_registers,
            irq1: self.lines.irq1(),
            irq2: self.lines.irq2(),
            irq3: self.lines.irq3(),
            virq: self.lines.virq_mask(),
            ticks: self.ticks,
        }
    }

    pub fn restore(&mut self, state: &Vm1State) {
        self.registers = state.registers.clone();
        self.latches = state.latches;
        self.halt_registers = state.halt_registers;
        self.lines.restore(state.irq1, state.irq2, state.irq3, state.virq);
        self.ticks = state.ticks;
    }

    fn fetch_word<B: BusInterface>(&mut self, bus: &mut B) -> BusResult<u16> {
        let pc = self.registers.pc();
        self.registers.gpr[PC] = pc.wrapping_add(2);
        self.read_word(bus, pc)
    }

    fn read_word<B: BusInterface>(&mut self, bus: &mut B, address: u16) -> BusResult<u16> {
        match address & !1 {
            SAVED_PC_ADDRESS => Ok(self.halt_registers.pc),
            SAVED_PSW_ADDRESS => Ok(self.halt_registers.psw),
            address => bus.read_word(address),
        }
    }

    fn read_byte<B: BusInterface>(&mut self, bus: &mut B, address: u16) -> BusResult<u8> {
        let word = self.read_word(bus, address)?;
        Ok(if address.bit(0) { word.msb() } else { word.lsb() })
    }

    fn write_word<B: BusInterface>(
        &mut self,
        bus: &mut B,
        address: u16,
        value: u16,
    ) -> BusResult<()> {
        match address & !1 {
            SAVED_PC_ADDRESS => self.halt_registers.pc = value,
            SAVED_PSW_ADDRESS => self.halt_registers.psw = value,
            address => return bus.write_word(address, value),
        }

        Ok(())
    }

    fn write_byte<B: BusInterface>(
        &mut self,
        bus: &mut B,
        address: u16,
        value: u8,
    ) -> BusResult<()> {
        let register = match address & !1 {
            SAVED_PC_ADDRESS => &mut self.halt_registers.pc,
            SAVED_PSW_ADDRESS => &mut self.halt_registers.psw,
            _ => return bus.write_byte(address, value),
        };

        *register = if address.bit(0) { register.with_msb(value) } else { register.with_lsb(value) };

        Ok(())
    }
}
