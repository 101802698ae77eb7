//! Reference host loop: runs a [`Computer`] on its own thread, paced against wall-clock time

use crate::computer::Computer;
use crate::serialize::SaveStateError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, mpsc};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use vm1_emu::interrupts::InterruptLines;

// Emulated time run between command checks
const BATCH_DURATION: Duration = Duration::from_millis(1);

// Pacing falls back to real time if the emulator gets this far behind
const MAX_LAG: Duration = Duration::from_millis(100);

// Longest uninterrupted sleep; the stop flag is rechecked after each one
const MAX_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub enum RunnerCommand {
    Terminate,
    Reset,
    SaveState,
    LoadState(Vec<u8>),
}

#[derive(Debug)]
pub enum RunnerCommandResponse {
    SaveStateSucceeded(Vec<u8>),
    SaveStateFailed(SaveStateError),
    LoadStateSucceeded,
    LoadStateFailed(SaveStateError),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Lost connection to runner thread")]
    LostRunnerConnection,
    #[error("Runner thread panicked")]
    ThreadPanicked,
}

struct RunnerThreadState {
    computer: Computer,
    command_receiver: Receiver<RunnerCommand>,
    response_sender: Sender<RunnerCommandResponse>,
    paused: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    // Wall-clock instant and tick count that pacing is measured from
    pacing_origin: (Instant, u64),
}

impl RunnerThreadState {
    fn reset_pacing(&mut self) {
        self.pacing_origin = (Instant::now(), self.computer.ticks());
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Returns how far emulated time is ahead of wall-clock time.
    fn time_ahead(&mut self) -> Duration {
        let (origin_time, origin_ticks) = self.pacing_origin;
        let emulated =
            self.computer.config().ticks_to_duration(self.computer.ticks() - origin_ticks);
        let elapsed = origin_time.elapsed();

        if emulated > elapsed {
            return emulated - elapsed;
        }

        if elapsed - emulated > MAX_LAG {
            log::debug!("Runner is {:?} behind real time; resetting pacing", elapsed - emulated);
            self.reset_pacing();
        }

        Duration::ZERO
    }

    /// Run passes until `ticks` have elapsed or a stop is requested. Returns false if stopped.
    fn run_batch(&mut self, ticks: u64) -> bool {
        let start = self.computer.ticks();
        while self.computer.ticks() - start < ticks {
            if self.stop_requested() {
                return false;
            }
            self.computer.pass();
        }

        true
    }
}

/// Handle to a running [`Computer`]. Interrupt requests can be raised directly through
/// [`Self::interrupt_lines`]; everything else goes through commands.
pub struct RunnerThread {
    command_sender: Sender<RunnerCommand>,
    response_receiver: Receiver<RunnerCommandResponse>,
    paused: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    interrupt_lines: Arc<InterruptLines>,
    handle: JoinHandle<Computer>,
}

impl RunnerThread {
    #[must_use]
    pub fn spawn(computer: Computer) -> Self {
        let (command_sender, command_receiver) = mpsc::channel();
        let (response_sender, response_receiver) = mpsc::channel();

        let paused = Arc::new(AtomicBool::new(false));
        let stop_requested = Arc::new(AtomicBool::new(false));
        let interrupt_lines = computer.interrupt_lines();

        let handle = {
            let paused = Arc::clone(&paused);
            let stop_requested = Arc::clone(&stop_requested);

            thread::spawn(move || {
                let pacing_origin = (Instant::now(), computer.ticks());
                let computer = run_thread(RunnerThreadState {
                    computer,
                    command_receiver,
                    response_sender,
                    paused,
                    stop_requested,
                    pacing_origin,
                });

                log::info!("Runner thread has terminated");

                computer
            })
        };

        Self { command_sender, response_receiver, paused, stop_requested, interrupt_lines, handle }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn interrupt_lines(&self) -> &Arc<InterruptLines> {
        &self.interrupt_lines
    }

    /// # Errors
    ///
    /// Returns an error if the runner thread has exited.
    pub fn send_command(&self, command: RunnerCommand) -> Result<(), RunnerError> {
        self.command_sender.send(command).map_err(|_| RunnerError::LostRunnerConnection)
    }

    #[must_use]
    pub fn try_recv_command_response(&self) -> Option<RunnerCommandResponse> {
        self.response_receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for a command response.
    ///
    /// # Errors
    ///
    /// Returns an error if the runner thread has exited.
    pub fn recv_command_response(
        &self,
        timeout: Duration,
    ) -> Result<Option<RunnerCommandResponse>, RunnerError> {
        match self.response_receiver.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RunnerError::LostRunnerConnection),
        }
    }

    /// Ask the loop to exit without waiting for it. The loop finishes at most the pass in
    /// progress.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and hand back the computer.
    ///
    /// # Errors
    ///
    /// Returns an error if the runner thread panicked.
    pub fn stop(self) -> Result<Computer, RunnerError> {
        self.request_stop();
        // The thread may already be gone; join reports how it ended
        let _ = self.command_sender.send(RunnerCommand::Terminate);
        self.handle.join().map_err(|_| RunnerError::ThreadPanicked)
    }
}

fn run_thread(mut state: RunnerThreadState) -> Computer {
    let mut was_paused = false;

    loop {
        if state.stop_requested() {
            return state.computer;
        }

        loop {
            match state.command_receiver.try_recv() {
                Ok(command) => {
                    if handle_command(&mut state, command) == CommandEffect::Terminate {
                        return state.computer;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::error!("{}", RunnerError::LostRunnerConnection);
                    return state.computer;
                }
            }
        }

        let paused = state.paused.load(Ordering::Relaxed);
        if paused {
            was_paused = true;

            // Don't spin loop while paused
            thread::sleep(Duration::from_millis(1));
            continue;
        }

        if was_paused {
            was_paused = false;
            state.reset_pacing();
        }

        let ahead = state.time_ahead();
        if !ahead.is_zero() {
            thread::sleep(ahead.min(MAX_SLEEP));
            continue;
        }

        let batch_ticks = state.computer.config().duration_to_ticks(BATCH_DURATION);
        if !state.run_batch(batch_ticks.max(1)) {
            return state.computer;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandEffect {
    None,
    Terminate,
}

fn handle_command(state: &mut RunnerThreadState, command: RunnerCommand) -> CommandEffect {
    let response = match command {
        RunnerCommand::Terminate => return CommandEffect::Terminate,
        RunnerCommand::Reset => {
            state.computer.reset();
            return CommandEffect::None;
        }
        RunnerCommand::SaveState => {
            let mut bytes = Vec::new();
            match state.computer.save_state(&mut bytes) {
                Ok(()) => RunnerCommandResponse::SaveStateSucceeded(bytes),
                Err(err) => RunnerCommandResponse::SaveStateFailed(err),
            }
        }
        RunnerCommand::LoadState(bytes) => match state.computer.load_state(bytes.as_slice()) {
            Ok(()) => {
                state.reset_pacing();
                RunnerCommandResponse::LoadStateSucceeded
            }
            Err(err) => {
                log::error!("Error loading state in runner thread: {err}");
                RunnerCommandResponse::LoadStateFailed(err)
            }
        },
    };

    if state.response_sender.send(response).is_err() {
        log::error!("{}", RunnerError::LostRunnerConnection);
        return CommandEffect::Terminate;
    }

    CommandEffect::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusBuilder;
    use crate::bus::tests::TestRegister;
    use crate::memory::{Memory, Ram, Rom};
    use bk_config::BkConfig;
    use test_log::test;
    use std::sync::atomic::AtomicU64;
    use vm1_emu::bus::{BusInterface, OpSize};
    use vm1_emu::instructions::Instruction;
    use vm1_emu::interrupts::CONTROL_REGISTER_ADDRESS;
    use vm1_emu::registers::{Registers, SP};

    const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

    // INC @#1000; BR .-4 at 0100000, with an interrupt handler at 0100010 that does
    // INC @#1002; RTI
    fn counting_computer() -> Computer {
        let rom = [
            0o005237, 0o1000, 0o000775, 0, // main loop
            0o005237, 0o1002, 0o000002, // IRQ2 handler
        ];

        let mut ram = Ram::new(0o100000);
        // IRQ2 vector
        ram.write(OpSize::Word, 0o100, 0o100010);
        ram.write(OpSize::Word, 0o102, 0);

        let mut builder = BusBuilder::new();
        builder.add_mapped_memory(Box::new(ram), 0).unwrap();
        builder.add_mapped_memory(Box::new(Rom::from_words(&rom)), 0o100000).unwrap();
        let (control, _) = TestRegister::new(CONTROL_REGISTER_ADDRESS, 0o100000);
        builder.add_device(Box::new(control));

        let mut computer = Computer::new(BkConfig::default(), builder.build());
        computer.cpu_mut().set_psw(0);
        computer.cpu_mut().set_register(SP, 0o700);
        computer
    }

    fn save_state(runner: &RunnerThread) -> Vec<u8> {
        runner.send_command(RunnerCommand::SaveState).unwrap();
        match runner.recv_command_response(RESPONSE_TIMEOUT).unwrap() {
            Some(RunnerCommandResponse::SaveStateSucceeded(bytes)) => bytes,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn runs_until_stopped() {
        let runner = RunnerThread::spawn(counting_computer());
        thread::sleep(Duration::from_millis(20));

        let mut computer = runner.stop().unwrap();
        assert!(computer.ticks() > 0);
        assert_ne!(computer.bus_mut().read_word(0o1000), Ok(0));
    }

    #[test]
    fn pause_stops_execution() {
        let runner = RunnerThread::spawn(counting_computer());
        thread::sleep(Duration::from_millis(5));

        runner.set_paused(true);
        assert!(runner.is_paused());
        let first = save_state(&runner);
        thread::sleep(Duration::from_millis(10));
        let second = save_state(&runner);
        assert_eq!(first, second);

        runner.set_paused(false);
        thread::sleep(Duration::from_millis(10));
        let third = save_state(&runner);
        assert_ne!(second, third);

        runner.stop().unwrap();
    }

    #[test]
    fn interrupt_from_host_thread() {
        let runner = RunnerThread::spawn(counting_computer());
        runner.interrupt_lines().request_irq2();

        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        while runner.interrupt_lines().irq2() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!runner.interrupt_lines().irq2());

        // Let the handler run
        thread::sleep(Duration::from_millis(20));

        let mut computer = runner.stop().unwrap();
        assert_eq!(computer.bus_mut().read_word(0o1002), Ok(1));
    }

    #[test]
    fn load_state_and_reset_commands() {
        let runner = RunnerThread::spawn(counting_computer());
        runner.set_paused(true);
        let state = save_state(&runner);

        runner.send_command(RunnerCommand::LoadState(vec![0xFF; 4])).unwrap();
        assert!(matches!(
            runner.recv_command_response(RESPONSE_TIMEOUT).unwrap(),
            Some(RunnerCommandResponse::LoadStateFailed(_))
        ));

        runner.send_command(RunnerCommand::LoadState(state)).unwrap();
        assert!(matches!(
            runner.recv_command_response(RESPONSE_TIMEOUT).unwrap(),
            Some(RunnerCommandResponse::LoadStateSucceeded)
        ));

        runner.send_command(RunnerCommand::Reset).unwrap();
        let computer = runner.stop().unwrap();
        assert_eq!(computer.cpu().pc(), 0o100000);
        assert_eq!(computer.cpu().psw(), 0o340);
    }

    #[test]
    fn stop_is_observed_within_one_instruction() {
        let mut computer = counting_computer();
        let executed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&executed);
        computer.cpu_mut().set_instruction_observer(Some(Box::new(
            move |_: u16, _: Instruction, _: &Registers| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )));

        let runner = RunnerThread::spawn(computer);
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        while executed.load(Ordering::SeqCst) < 1000 && Instant::now() < deadline {
            thread::yield_now();
        }

        runner.request_stop();
        let at_stop = executed.load(Ordering::SeqCst);
        assert!(at_stop >= 1000);

        runner.stop().unwrap();
        assert!(executed.load(Ordering::SeqCst) <= at_stop + 1);
    }

    #[test]
    fn stop_is_prompt_at_low_clock_rates() {
        let mut computer = counting_computer();
        // A single pass is several seconds of emulated time
        computer.reload_config(BkConfig { clock_frequency_hz: 1, ..BkConfig::default() });

        let runner = RunnerThread::spawn(computer);
        thread::sleep(Duration::from_millis(10));

        let start = Instant::now();
        runner.stop().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
