//! PDP-11 addressing modes
//!
//! Every operand is a 3-bit mode plus a 3-bit register. Resolving an operand happens in four stages
//! so that register side effects land at the right time relative to bus accesses:
//!
//! 1. [`Vm1::pre_action`] applies predecrement
//! 2. [`Vm1::operand_address`] computes the effective address, reading an index word or an
//!    indirection pointer if the mode needs one
//! 3. the instruction reads and/or writes the resolved location
//! 4. [`Vm1::post_action`] applies postincrement once the access has completed
//!
//! A bus fault at any stage short-circuits the rest.

use crate::Vm1;
use crate::bus::{BusInterface, BusResult, OpSize};
use crate::num::WordExt;
use crate::registers::{PC, SP};
use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum AddressingMode {
    Register,
    RegisterDeferred,
    Autoincrement,
    AutoincrementDeferred,
    Autodecrement,
    AutodecrementDeferred,
    Index,
    IndexDeferred,
}

impl AddressingMode {
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        match bits & 7 {
            0 => Self::Register,
            1 => Self::RegisterDeferred,
            2 => Self::Autoincrement,
            3 => Self::AutoincrementDeferred,
            4 => Self::Autodecrement,
            5 => Self::AutodecrementDeferred,
            6 => Self::Index,
            7 => Self::IndexDeferred,
            _ => unreachable!("value & 7 is always <= 7"),
        }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn is_deferred(self) -> bool {
        matches!(
            self,
            Self::RegisterDeferred
                | Self::AutoincrementDeferred
                | Self::AutodecrementDeferred
                | Self::IndexDeferred
        )
    }

    /// Whether the mode reads an index word from the instruction stream
    #[must_use]
    pub fn is_indexed(self) -> bool {
        matches!(self, Self::Index | Self::IndexDeferred)
    }
}

/// Mode + register pair taken from a 6-bit opcode field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Operand {
    pub mode: AddressingMode,
    pub register: u8,
}

impl Operand {
    /// Parse from the low 6 bits of `bits`.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        Self { mode: AddressingMode::from_bits(bits >> 3), register: (bits & 7) as u8 }
    }

    #[must_use]
    pub fn to_bits(self) -> u16 {
        (u16::from(self.mode.code()) << 3) | u16::from(self.register)
    }

    #[must_use]
    pub fn is_register(self) -> bool {
        self.mode == AddressingMode::Register
    }

    /// Number of extra instruction words this operand consumes
    #[must_use]
    pub fn extension_words(self) -> u16 {
        match (self.mode, usize::from(self.register)) {
            (AddressingMode::Index | AddressingMode::IndexDeferred, _)
            | (AddressingMode::Autoincrement | AddressingMode::AutoincrementDeferred, PC) => 1,
            _ => 0,
        }
    }

    fn step(self, size: OpSize) -> u16 {
        if self.mode.is_deferred() || matches!(usize::from(self.register), SP | PC) {
            return 2;
        }

        match size {
            OpSize::Byte => 1,
            OpSize::Word => 2,
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let r = RegisterName(self.register);
        match self.mode {
            AddressingMode::Register => write!(f, "{r}"),
            AddressingMode::RegisterDeferred => write!(f, "({r})"),
            AddressingMode::Autoincrement => write!(f, "({r})+"),
            AddressingMode::AutoincrementDeferred => write!(f, "@({r})+"),
            AddressingMode::Autodecrement => write!(f, "-({r})"),
            AddressingMode::AutodecrementDeferred => write!(f, "@-({r})"),
            AddressingMode::Index => write!(f, "X({r})"),
            AddressingMode::IndexDeferred => write!(f, "@X({r})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegisterName(pub u8);

impl Display for RegisterName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match usize::from(self.0) {
            SP => write!(f, "SP"),
            PC => write!(f, "PC"),
            r => write!(f, "R{r}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedAddress {
    Register(u8),
    Memory(u16),
}

impl Vm1 {
    pub(crate) fn pre_action(&mut self, operand: Operand, size: OpSize) {
        if matches!(
            operand.mode,
            AddressingMode::Autodecrement | AddressingMode::AutodecrementDeferred
        ) {
            let r = usize::from(operand.register);
            self.registers.gpr[r] = self.registers.gpr[r].wrapping_sub(operand.step(size));
        }
    }

    pub(crate) fn operand_address<B: BusInterface>(
        &mut self,
        bus: &mut B,
        operand: Operand,
    ) -> BusResult<ResolvedAddress> {
        let r = usize::from(operand.register);
        let address = match operand.mode {
            AddressingMode::Register => return Ok(ResolvedAddress::Register(operand.register)),
            AddressingMode::RegisterDeferred
            | AddressingMode::Autoincrement
            | AddressingMode::Autodecrement => self.registers.gpr[r],
            AddressingMode::AutoincrementDeferred | AddressingMode::AutodecrementDeferred => {
                self.read_word(bus, self.registers.gpr[r])?
            }
            AddressingMode::Index => {
                let index = self.fetch_word(bus)?;
                self.registers.gpr[r].wrapping_add(index)
            }
            AddressingMode::IndexDeferred => {
                let index = self.fetch_word(bus)?;
                self.read_word(bus, self.registers.gpr[r].wrapping_add(index))?
            }
        };

        Ok(ResolvedAddress::Memory(address))
    }

    pub(crate) fn post_action(&mut self, operand: Operand, size: OpSize) {
        if matches!(
            operand.mode,
            AddressingMode::Autoincrement | AddressingMode::AutoincrementDeferred
        ) {
            let r = usize::from(operand.register);
            self.registers.gpr[r] = self.registers.gpr[r].wrapping_add(operand.step(size));
        }
    }

    pub(crate) fn read_resolved<B: BusInterface>(
        &mut self,
        bus: &mut B,
        address: ResolvedAddress,
        size: OpSize,
    ) -> BusResult<u16> {
        match (address, size) {
            (ResolvedAddress::Register(r), _) => Ok(self.registers.gpr[usize::from(r)] & size.mask()),
            (ResolvedAddress::Memory(address), OpSize::Byte) => {
                self.read_byte(bus, address).map(u16::from)
            }
            (ResolvedAddress::Memory(address), OpSize::Word) => self.read_word(bus, address),
        }
    }

    pub(crate) fn write_resolved<B: BusInterface>(
        &mut self,
        bus: &mut B,
        address: ResolvedAddress,
        size: OpSize,
        value: u16,
    ) -> BusResult<()> {
        match (address, size) {
            (ResolvedAddress::Register(r), _) => {
                self.registers.write(r, size, value);
                Ok(())
            }
            (ResolvedAddress::Memory(address), OpSize::Byte) => {
                self.write_byte(bus, address, value.lsb())
            }
            (ResolvedAddress::Memory(address), OpSize::Word) => {
                self.write_word(bus, address, value)
            }
        }
    }

    /// Pre-action and address computation.
    pub(crate) fn resolve_operand<B: BusInterface>(
        &mut self,
        bus: &mut B,
        operand: Operand,
        size: OpSize,
    ) -> BusResult<ResolvedAddress> {
        self.pre_action(operand, size);
        self.operand_address(bus, operand)
    }

    pub(crate) fn read_operand<B: BusInterface>(
        &mut self,
        bus: &mut B,
        operand: Operand,
        size: OpSize,
    ) -> BusResult<u16> {
        let address = self.resolve_operand(bus, operand, size)?;
        let value = self.read_resolved(bus, address, size)?;
        self.post_action(operand, size);
        Ok(value)
    }

    /// Write-only destination access; the old value is never read.
    pub(crate) fn write_operand<B: BusInterface>(
        &mut self,
        bus: &mut B,
        operand: Operand,
        size: OpSize,
        value: u16,
    ) -> BusResult<()> {
        let address = self.resolve_operand(bus, operand, size)?;
        self.write_resolved(bus, address, size, value)?;
        self.post_action(operand, size);
        Ok(())
    }

    /// Like [`Self::write_operand`], except that byte writes to a register sign extend into the
    /// full word.
    pub(crate) fn write_operand_sign_extended<B: BusInterface>(
        &mut self,
        bus: &mut B,
        operand: Operand,
        size: OpSize,
        value: u16,
    ) -> BusResult<()> {
        if operand.is_register() && size == OpSize::Byte {
            self.registers.gpr[usize::from(operand.register)] = value as u8 as i8 as u16;
            return Ok(());
        }

        self.write_operand(bus, operand, size, value)
    }

    /// Read a destination, compute a new value from it, and write the result back. `op` returns
    /// `None` when nothing should be written.
    pub(crate) fn modify_operand<B: BusInterface>(
        &mut self,
        bus: &mut B,
        operand: Operand,
        size: OpSize,
        op: impl FnOnce(&mut Self, u16) -> Option<u16>,
    ) -> BusResult<()> {
        let address = self.resolve_operand(bus, operand, size)?;
        let value = self.read_resolved(bus, address, size)?;
        if let Some(result) = op(self, value) {
            self.write_resolved(bus, address, size, result & size.mask())?;
        }
        self.post_action(operand, size);
        Ok(())
    }

    /// Effective address of a JMP/JSR destination, including side effects. Register mode has no
    /// address and is rejected when the decode table is built.
    pub(crate) fn jump_address<B: BusInterface>(
        &mut self,
        bus: &mut B,
        operand: Operand,
    ) -> BusResult<u16> {
        let address = self.resolve_operand(bus, operand, OpSize::Word)?;
        self.post_action(operand, OpSize::Word);
        match address {
            ResolvedAddress::Memory(address) => Ok(address),
            ResolvedAddress::Register(r) => Ok(self.registers.gpr[usize::from(r)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use test_log::test;

    fn operand(mode: u16, register: u16) -> Operand {
        Operand::from_bits((mode << 3) | register)
    }

    #[test]
    fn autoincrement_then_autodecrement_restores_register() {
        let mut bus = InMemoryBus::new();
        for register in 0..8 {
            for size in [OpSize::Byte, OpSize::Word] {
                for (inc, dec) in [(2, 4), (3, 5)] {
                    let mut cpu = Vm1::new();
                    cpu.registers.gpr[register as usize] = 0o1000;
                    let r = register as u16;

                    cpu.read_operand(&mut bus, operand(inc, r), size).unwrap();
                    assert_ne!(cpu.registers.gpr[register as usize], 0o1000);
                    cpu.read_operand(&mut bus, operand(dec, r), size).unwrap();
                    assert_eq!(
                        cpu.registers.gpr[register as usize],
                        0o1000,
                        "R{register} modes {inc}/{dec} {size:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn byte_steps() {
        let mut bus = InMemoryBus::new();
        let mut cpu = Vm1::new();
        cpu.registers.gpr[0] = 0o1000;
        cpu.registers.gpr[SP] = 0o1000;

        cpu.read_operand(&mut bus, operand(2, 0), OpSize::Byte).unwrap();
        assert_eq!(cpu.registers.gpr[0], 0o1001);

        cpu.read_operand(&mut bus, operand(2, SP as u16), OpSize::Byte).unwrap();
        assert_eq!(cpu.registers.gpr[SP], 0o1002);

        // Deferred modes always step by a word
        cpu.read_operand(&mut bus, operand(3, 0), OpSize::Byte).unwrap();
        assert_eq!(cpu.registers.gpr[0], 0o1003);
    }

    #[test]
    fn odd_byte_address_selects_high_byte() {
        let mut bus = InMemoryBus::new();
        bus.load(0o2000, &[0o123456]);

        let mut cpu = Vm1::new();
        cpu.registers.gpr[1] = 0o2001;
        let value = cpu.read_operand(&mut bus, operand(1, 1), OpSize::Byte).unwrap();
        assert_eq!(value, 0o123456 >> 8);

        cpu.write_operand(&mut bus, operand(1, 1), OpSize::Byte, 0o377).unwrap();
        assert_eq!(bus.peek(0o2000), 0o177456);
    }

    #[test]
    fn pc_modes() {
        let mut bus = InMemoryBus::new();
        // Immediate value, absolute address, relative offset
        bus.load(0o1000, &[0o1234, 0o3000, 0o100]);
        bus.load(0o3000, &[0o4321]);

        let mut cpu = Vm1::new();
        cpu.registers.gpr[PC] = 0o1000;

        let immediate = cpu.read_operand(&mut bus, operand(2, 7), OpSize::Word).unwrap();
        assert_eq!(immediate, 0o1234);
        assert_eq!(cpu.registers.gpr[PC], 0o1002);

        let absolute = cpu.read_operand(&mut bus, operand(3, 7), OpSize::Word).unwrap();
        assert_eq!(absolute, 0o4321);
        assert_eq!(cpu.registers.gpr[PC], 0o1004);

        let relative = cpu.resolve_operand(&mut bus, operand(6, 7), OpSize::Word).unwrap();
        assert_eq!(relative, ResolvedAddress::Memory(0o1006 + 0o100));
        assert_eq!(cpu.registers.gpr[PC], 0o1006);
    }

    #[test]
    fn fault_skips_post_increment() {
        let mut bus = InMemoryBus::new();
        bus.unmapped.push(0o160000..=0o160000);

        let mut cpu = Vm1::new();
        cpu.registers.gpr[2] = 0o160000;
        assert!(cpu.read_operand(&mut bus, operand(2, 2), OpSize::Word).is_err());
        assert_eq!(cpu.registers.gpr[2], 0o160000);
    }
}
