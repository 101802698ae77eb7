//! Trap sequencing, HALT mode entry, and the per-pass interrupt arbiter

use crate::Vm1;
use crate::bus::{BusInterface, BusResult};
use crate::registers::PC;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const BUS_ERROR_VECTOR: u16 = 0o4;
pub const RESERVED_OPCODE_VECTOR: u16 = 0o10;
pub const TRACE_VECTOR: u16 = 0o14;
pub const IRQ2_VECTOR: u16 = 0o100;
pub const IRQ3_VECTOR: u16 = 0o270;

pub const MAX_VIRQ_VECTOR: u16 = 0o374;

/// System control register; its high byte holds the start address and HALT vector base
pub const CONTROL_REGISTER_ADDRESS: u16 = 0o177716;
pub const HALT_FLAG: u16 = 0o10;
pub const HALT_ERROR_FLAG: u16 = 0o4;

/// CPU-internal registers exposing PC and PSW as they were on HALT mode entry
pub const SAVED_PC_ADDRESS: u16 = 0o177674;
pub const SAVED_PSW_ADDRESS: u16 = 0o177676;

pub const BUS_ERROR_TIMEOUT_TICKS: u32 = 64;
pub const RESERVED_OPCODE_TICKS: u32 = 144;
pub const INTERRUPT_SERVICE_TICKS: u32 = 68;
pub const IDLE_TICKS: u32 = 16;

/// Interrupt request lines. Requests may be raised and withdrawn from any thread; the CPU consumes
/// a request when it services it.
#[derive(Debug, Default)]
pub struct InterruptLines {
    irq1: AtomicBool,
    irq2: AtomicBool,
    irq3: AtomicBool,
    // Bit N is set if vector 4*N is requested
    virq: AtomicU64,
}

macro_rules! impl_irq_line {
    ($field:ident, $request:ident, $clear:ident) => {
        pub fn $request(&self) {
            self.$field.store(true, Ordering::Release);
        }

        pub fn $clear(&self) {
            self.$field.store(false, Ordering::Release);
        }
    };
}

impl InterruptLines {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    impl_irq_line!(irq1, request_irq1, clear_irq1);
    impl_irq_line!(irq2, request_irq2, clear_irq2);
    impl_irq_line!(irq3, request_irq3, clear_irq3);

    /// Request a vectored interrupt. Returns false if `vector` is not a multiple of 4 within
    /// 0-0374.
    pub fn request_virq(&self, vector: u16) -> bool {
        let Some(bit) = virq_bit(vector) else {
            log::warn!("Ignoring VIRQ request with invalid vector {vector:o}");
            return false;
        };

        self.virq.fetch_or(bit, Ordering::AcqRel);
        true
    }

    pub fn clear_virq(&self, vector: u16) {
        if let Some(bit) = virq_bit(vector) {
            self.virq.fetch_and(!bit, Ordering::AcqRel);
        }
    }

    #[must_use]
    pub fn irq1(&self) -> bool {
        self.irq1.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn irq2(&self) -> bool {
        self.irq2.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn irq3(&self) -> bool {
        self.irq3.load(Ordering::Acquire)
    }

    /// Lowest pending vectored interrupt, if any
    #[must_use]
    pub fn pending_virq(&self) -> Option<u16> {
        let mask = self.virq.load(Ordering::Acquire);
        (mask != 0).then(|| 4 * mask.trailing_zeros() as u16)
    }

    pub(crate) fn virq_mask(&self) -> u64 {
        self.virq.load(Ordering::Acquire)
    }

    pub(crate) fn restore(&self, irq1: bool, irq2: bool, irq3: bool, virq: u64) {
        self.irq1.store(irq1, Ordering::Release);
        self.irq2.store(irq2, Ordering::Release);
        self.irq3.store(irq3, Ordering::Release);
        self.virq.store(virq, Ordering::Release);
    }

    pub(crate) fn clear_all(&self) {
        self.restore(false, false, false, 0);
    }
}

fn virq_bit(vector: u16) -> Option<u64> {
    (vector <= MAX_VIRQ_VECTOR && vector % 4 == 0).then(|| 1 << (vector / 4))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HardwareInterrupt {
    Irq1,
    Irq2,
    Irq3,
    Vectored(u16),
}

impl Vm1 {
    pub(crate) fn push<B: BusInterface>(&mut self, bus: &mut B, value: u16) -> BusResult<()> {
        let sp = self.registers.sp().wrapping_sub(2);
        self.registers.gpr[crate::registers::SP] = sp;
        self.write_word(bus, sp, value)
    }

    pub(crate) fn pop<B: BusInterface>(&mut self, bus: &mut B) -> BusResult<u16> {
        let sp = self.registers.sp();
        let value = self.read_word(bus, sp)?;
        self.registers.gpr[crate::registers::SP] = sp.wrapping_add(2);
        Ok(value)
    }

    /// Push PSW and PC, then load PC and the PSW low byte from `vector`. A fault leaves the
    /// sequence partially applied.
    pub(crate) fn trap<B: BusInterface>(&mut self, bus: &mut B, vector: u16) -> BusResult<()> {
        let old_psw = u16::from(self.registers.psw);
        let old_pc = self.registers.pc();

        self.push(bus, old_psw)?;
        self.push(bus, old_pc)?;

        let pc = self.read_word(bus, vector)?;
        self.registers.gpr[PC] = pc;

        let psw = self.read_word(bus, vector.wrapping_add(2))?;
        self.registers.psw.set_low_byte(psw as u8);

        log::trace!(
            "Trap to vector {vector:03o}: PC {old_pc:06o} -> {pc:06o}, PSW {old_psw:06o} -> {:06o}",
            u16::from(self.registers.psw)
        );

        self.notify_trap(vector);

        Ok(())
    }

    /// HALT mode entry. Sets the halted bit (and optionally the error bit) in the control register,
    /// saves PC/PSW to the read-back registers, and loads PC/PSW from the HALT vector. Halt mode is
    /// only latched if every step succeeds.
    pub(crate) fn enter_halt_mode<B: BusInterface>(
        &mut self,
        bus: &mut B,
        error: bool,
    ) -> BusResult<()> {
        let control = bus.read_word(CONTROL_REGISTER_ADDRESS)?;
        let flags = if error { HALT_FLAG | HALT_ERROR_FLAG } else { HALT_FLAG };
        bus.write_word(CONTROL_REGISTER_ADDRESS, control | flags)?;

        self.halt_registers.pc = self.registers.pc();
        self.halt_registers.psw = self.registers.psw.into();

        let vector = (control & 0o177400).wrapping_add(2);
        let pc = self.read_word(bus, vector)?;
        self.registers.gpr[PC] = pc;

        let psw = self.read_word(bus, vector.wrapping_add(2))?;
        self.registers.psw.set_low_byte(psw as u8);

        self.latches.halt_mode = true;
        self.latches.wait = false;

        log::trace!(
            "Entered HALT mode (error={error}) from PC {:06o}; vector {vector:06o}, new PC {pc:06o}",
            self.halt_registers.pc
        );

        self.notify_trap(vector);

        Ok(())
    }

    fn notify_trap(&mut self, vector: u16) {
        if let Some(listener) = &mut self.trap_listener {
            listener.on_trap(vector);
        }
    }

    /// Service at most one pending condition, in priority order. Returns ticks consumed.
    pub(crate) fn resolve_pending<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        if self.latches.bus_error {
            self.handle_bus_error(bus);
            return BUS_ERROR_TIMEOUT_TICKS;
        }

        if self.latches.reserved_opcode {
            self.latches.reserved_opcode = false;
            self.trap_or_latch(bus, RESERVED_OPCODE_VECTOR);
            return RESERVED_OPCODE_TICKS;
        }

        if self.registers.psw.trace && !self.latches.wait && !self.latches.deferred_trace_trap {
            self.trap_or_latch(bus, TRACE_VECTOR);
            return INTERRUPT_SERVICE_TICKS;
        }

        let Some(interrupt) = self.pending_hardware_interrupt() else { return 0 };
        self.service_hardware_interrupt(bus, interrupt);
        INTERRUPT_SERVICE_TICKS
    }

    fn handle_bus_error<B: BusInterface>(&mut self, bus: &mut B) {
        if self.trap(bus, BUS_ERROR_VECTOR).is_ok() {
            self.latches.bus_error = false;
            return;
        }

        log::error!("Bus error while servicing bus error trap; attempting HALT mode entry");
        match self.enter_halt_mode(bus, true) {
            Ok(()) => self.latches.bus_error = false,
            Err(err) => {
                log::error!("HALT mode entry failed after double bus fault ({err}); CPU frozen");
                self.latches.frozen = true;
            }
        }
    }

    fn trap_or_latch<B: BusInterface>(&mut self, bus: &mut B, vector: u16) {
        if let Err(err) = self.trap(bus, vector) {
            log::warn!("Trap to vector {vector:03o} aborted: {err}");
            self.latches.bus_error = true;
        }
    }

    fn pending_hardware_interrupt(&self) -> Option<HardwareInterrupt> {
        if self.latches.halt_mode || self.registers.psw.halt {
            return None;
        }

        if self.lines.irq1() && !self.registers.psw.irq1_mask {
            return Some(HardwareInterrupt::Irq1);
        }

        if self.registers.psw.priority {
            return None;
        }

        if self.lines.irq2() {
            Some(HardwareInterrupt::Irq2)
        } else if self.lines.irq3() {
            Some(HardwareInterrupt::Irq3)
        } else {
            self.lines.pending_virq().map(HardwareInterrupt::Vectored)
        }
    }

    fn service_hardware_interrupt<B: BusInterface>(
        &mut self,
        bus: &mut B,
        interrupt: HardwareInterrupt,
    ) {
        log::trace!("Servicing {interrupt:?}");

        let result = match interrupt {
            HardwareInterrupt::Irq1 => self.enter_halt_mode(bus, false),
            HardwareInterrupt::Irq2 => self.trap(bus, IRQ2_VECTOR),
            HardwareInterrupt::Irq3 => self.trap(bus, IRQ3_VECTOR),
            HardwareInterrupt::Vectored(vector) => self.trap(bus, vector),
        };

        if let Err(err) = result {
            log::warn!("{interrupt:?} service aborted: {err}");
            self.latches.bus_error = true;
            return;
        }

        match interrupt {
            HardwareInterrupt::Irq1 => self.lines.clear_irq1(),
            HardwareInterrupt::Irq2 => self.lines.clear_irq2(),
            HardwareInterrupt::Irq3 => self.lines.clear_irq3(),
            HardwareInterrupt::Vectored(vector) => self.lines.clear_virq(vector),
        }
        self.latches.wait = false;
    }
}
