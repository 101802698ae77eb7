//! Host-facing BK computer: the 1801VM1 core wired to a configured bus

use crate::bus::{Bus, BusState};
use crate::serialize::{BINCODE_CONFIG, SaveStateError};
use bk_config::BkConfig;
use std::io;
use std::io::{BufReader, BufWriter};
use std::sync::Arc;
use std::time::Duration;
use vm1_emu::interrupts::InterruptLines;
use vm1_emu::{Vm1, Vm1State};

#[derive(Debug)]
pub struct Computer {
    cpu: Vm1,
    bus: Bus,
    config: BkConfig,
}

impl Computer {
    /// Create a computer and perform a power-on reset.
    #[must_use]
    pub fn new(config: BkConfig, bus: Bus) -> Self {
        let mut computer = Self { cpu: Vm1::new(), bus, config };
        computer.reset();

        log::info!(
            "Created {} at {} Hz starting from PC {:06o}",
            config.model,
            config.clock_frequency_hz,
            computer.cpu.pc()
        );

        computer
    }

    /// Reset the CPU and reinitialize every device.
    pub fn reset(&mut self) {
        self.bus.set_tick(self.cpu.ticks());
        self.bus.init_devices();
        self.cpu.reset(&mut self.bus);
    }

    /// Execute a single instruction without servicing pending conditions. Returns ticks consumed.
    pub fn step(&mut self) -> u32 {
        self.bus.set_tick(self.cpu.ticks());
        self.cpu.execute_instruction(&mut self.bus)
    }

    /// Execute one instruction/resolution pass. Returns ticks consumed.
    pub fn pass(&mut self) -> u32 {
        self.bus.set_tick(self.cpu.ticks());
        self.cpu.execute_pass(&mut self.bus)
    }

    /// Run passes until at least `ticks` ticks have elapsed. Returns the ticks actually consumed.
    pub fn run_for(&mut self, ticks: u64) -> u64 {
        let start = self.cpu.ticks();
        while self.cpu.ticks() - start < ticks {
            self.pass();
        }

        self.cpu.ticks() - start
    }

    #[must_use]
    pub fn cpu(&self) -> &Vm1 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Vm1 {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    #[must_use]
    pub fn config(&self) -> BkConfig {
        self.config
    }

    pub fn reload_config(&mut self, config: BkConfig) {
        self.config = config;
    }

    #[must_use]
    pub fn interrupt_lines(&self) -> Arc<InterruptLines> {
        self.cpu.interrupt_lines()
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.cpu.ticks()
    }

    /// Emulated time since power-on
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.config.ticks_to_duration(self.cpu.ticks())
    }

    /// Write the CPU snapshot followed by memory and device states.
    ///
    /// # Errors
    ///
    /// Returns an error if any component fails to encode or the writer fails.
    pub fn save_state<W: io::Write>(&self, writer: W) -> Result<(), SaveStateError> {
        let mut writer = BufWriter::new(writer);

        let bus_state = self.bus.save_state()?;
        bincode::encode_into_std_write(self.cpu.snapshot(), &mut writer, BINCODE_CONFIG)?;
        bincode::encode_into_std_write(bus_state, &mut writer, BINCODE_CONFIG)?;

        Ok(())
    }

    /// Restore state written by [`Self::save_state`]. The bus must be configured with the same
    /// memories and devices as when the state was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be decoded or does not match the bus configuration.
    /// The computer is left unchanged on error except for components that already loaded.
    pub fn load_state<R: io::Read>(&mut self, reader: R) -> Result<(), SaveStateError> {
        let mut reader = BufReader::new(reader);

        let cpu_state: Vm1State = bincode::decode_from_std_read(&mut reader, BINCODE_CONFIG)?;
        let bus_state: BusState = bincode::decode_from_std_read(&mut reader, BINCODE_CONFIG)?;

        self.bus.load_state(&bus_state)?;
        self.cpu.restore(&cpu_state);
        self.bus.set_tick(self.cpu.ticks());

        log::info!("Loaded state at tick {}", self.cpu.ticks());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusBuilder;
    use crate::bus::tests::TestRegister;
    use crate::memory::{Ram, Rom};
    use bk_config::BkModel;
    use test_log::test;
    use vm1_emu::bus::BusInterface;
    use vm1_emu::interrupts::{CONTROL_REGISTER_ADDRESS, HALT_ERROR_FLAG, HALT_FLAG};

    const ROM_START: u16 = 0o100000;

    fn computer_with_rom(rom: &[u16], control_value: u16) -> Computer {
        let mut builder = BusBuilder::new();
        builder.add_mapped_memory(Box::new(Ram::new(0o100000)), 0).unwrap();
        builder.add_mapped_memory(Box::new(Rom::from_words(rom)), ROM_START).unwrap();
        let (control, _) = TestRegister::new(CONTROL_REGISTER_ADDRESS, control_value);
        builder.add_device(Box::new(control));

        Computer::new(BkConfig::default(), builder.build())
    }

    #[test]
    fn power_on_starts_from_control_register() {
        let computer = computer_with_rom(&[0o240], 0o100000);
        assert_eq!(computer.cpu().pc(), ROM_START);
        assert_eq!(computer.cpu().psw(), 0o340);
    }

    #[test]
    fn halt_in_rom() {
        let mut computer = computer_with_rom(&[0o000000, 0o100010, 0o377], 0o100000);

        computer.step();

        let cpu = computer.cpu();
        assert_eq!(cpu.pc(), 0o100010);
        assert_eq!(cpu.psw(), 0o377);
        assert!(cpu.in_halt_mode());
        assert_eq!(cpu.halt_registers().pc, 0o100002);
        assert_eq!(cpu.halt_registers().psw, 0o340);

        let control = computer.bus_mut().read_word(CONTROL_REGISTER_ADDRESS).unwrap();
        assert_eq!(control & (HALT_FLAG | HALT_ERROR_FLAG), HALT_FLAG | HALT_ERROR_FLAG);
    }

    #[test]
    fn reset_instruction_reaches_devices() {
        // RESET; BR .
        let mut builder = BusBuilder::new();
        builder.add_mapped_memory(Box::new(Rom::from_words(&[0o000005, 0o000777])), 0).unwrap();
        let (control, log) = TestRegister::new(CONTROL_REGISTER_ADDRESS, 0);
        builder.add_device(Box::new(control));
        let mut computer = Computer::new(BkConfig::default(), builder.build());

        assert_eq!(log.lock().unwrap().inits, 1);
        computer.pass();
        assert_eq!(log.lock().unwrap().inits, 2);
        assert_eq!(computer.cpu().pc(), 2);
    }

    #[test]
    fn run_for_and_elapsed_time() {
        // BR .
        let mut computer = computer_with_rom(&[0o000777], 0o100000);

        let ticks = computer.run_for(3_000);
        assert!(ticks >= 3_000);
        assert_eq!(computer.ticks(), ticks);
        assert!(computer.elapsed() >= Duration::from_millis(1));
        assert_eq!(computer.cpu().pc(), ROM_START);

        let mut bk11 = computer_with_rom(&[0o000777], 0o100000);
        bk11.reload_config(BkConfig::for_model(BkModel::Bk0011M));
        bk11.run_for(3_000);
        assert!(bk11.elapsed() < computer.elapsed());
    }

    #[test]
    fn save_and_load_state() {
        // MOV #1234, @#1000; INC R1; BR .-2
        let program = [0o012737, 0o1234, 0o1000, 0o005201, 0o000776];
        let mut computer = computer_with_rom(&program, 0o100000);

        for _ in 0..5 {
            computer.pass();
        }
        computer.interrupt_lines().request_irq3();

        let mut state = Vec::new();
        computer.save_state(&mut state).unwrap();
        let saved_registers = computer.cpu().registers().clone();
        let saved_ticks = computer.ticks();

        computer.bus_mut().write_word(0o1000, 0).unwrap();
        computer.interrupt_lines().clear_irq3();
        for _ in 0..10 {
            computer.pass();
        }
        assert_ne!(computer.ticks(), saved_ticks);

        computer.load_state(state.as_slice()).unwrap();
        assert_eq!(*computer.cpu().registers(), saved_registers);
        assert_eq!(computer.ticks(), saved_ticks);
        assert!(computer.interrupt_lines().irq3());
        assert_eq!(computer.bus_mut().read_word(0o1000), Ok(0o1234));
    }

    #[test]
    fn load_state_rejects_garbage() {
        let mut computer = computer_with_rom(&[0o240], 0o100000);
        assert!(computer.load_state([1_u8, 2, 3].as_slice()).is_err());
    }
}
