//! Run/stop handshake between the CPU thread and its controllers.
//!
//! The CPU checks the run mode once per instruction. Other threads
//! (front panel, signal handler, tests) change it with [`RunControl::start`],
//! [`RunControl::stop`] and friends; a stopped CPU thread parks in
//! [`RunControl::wait_for_run`] until it is woken.

use std::sync::{Condvar, Mutex, MutexGuard};

use log::{debug, error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Terminal state; every thread winds down.
    Shutdown,
    Stop,
    /// Running with breakpoint and instruction-limit checks.
    SemiRun,
    Run,
}

impl RunMode {
    pub fn is_running(self) -> bool {
        matches!(self, RunMode::Run | RunMode::SemiRun)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub mode: RunMode,
    /// SemiRun stops when P reaches this address, before executing it.
    pub breakpoint: Option<u16>,
    /// SemiRun stops when this reaches zero.
    pub instruction_counter: Option<u64>,
}

impl Default for RunState {
    fn default() -> Self {
        Self { mode: RunMode::Run, breakpoint: None, instruction_counter: None }
    }
}

/// Why the per-instruction check told the CPU to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Go,
    Breakpoint(u16),
    InstructionLimit,
    /// Mode is `Stop` or `Shutdown`.
    Halted,
}

#[derive(Debug, Default)]
pub struct RunControl {
    state: Mutex<RunState>,
    wake: Condvar,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Option<MutexGuard<'_, RunState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                error!("run-control lock poisoned");
                None
            }
        }
    }

    /// Current state. A poisoned lock reads as shut down.
    pub fn snapshot(&self) -> RunState {
        self.lock().map(|s| *s).unwrap_or(RunState {
            mode: RunMode::Shutdown,
            breakpoint: None,
            instruction_counter: None,
        })
    }

    pub fn mode(&self) -> RunMode {
        self.snapshot().mode
    }

    fn set_mode(&self, mode: RunMode) {
        if let Some(mut s) = self.lock() {
            if s.mode == RunMode::Shutdown {
                return;
            }
            debug!("run mode {:?} -> {:?}", s.mode, mode);
            s.mode = mode;
        }
        self.wake.notify_all();
    }

    /// Free run; clears breakpoint and limit.
    pub fn start(&self) {
        if let Some(mut s) = self.lock() {
            if s.mode == RunMode::Shutdown {
                return;
            }
            s.breakpoint = None;
            s.instruction_counter = None;
            s.mode = RunMode::Run;
        }
        self.wake.notify_all();
    }

    /// Run with an optional breakpoint and instruction limit.
    pub fn semi_run(&self, breakpoint: Option<u16>, instruction_counter: Option<u64>) {
        if let Some(mut s) = self.lock() {
            if s.mode == RunMode::Shutdown {
                return;
            }
            s.breakpoint = breakpoint;
            s.instruction_counter = instruction_counter;
            s.mode = RunMode::SemiRun;
        }
        self.wake.notify_all();
    }

    pub fn stop(&self) {
        self.set_mode(RunMode::Stop);
    }

    /// Enter the terminal state. Cannot be undone.
    pub fn shutdown(&self) {
        if let Some(mut s) = self.lock() {
            s.mode = RunMode::Shutdown;
        }
        self.wake.notify_all();
    }

    /// Once-per-instruction check, with P about to execute. In SemiRun a
    /// breakpoint hit or an exhausted counter moves the mode to `Stop`.
    /// The counter is consumed by one for every instruction let through.
    pub fn gate(&self, p: u16) -> Gate {
        let Some(mut s) = self.lock() else {
            return Gate::Halted;
        };
        match s.mode {
            RunMode::Run => Gate::Go,
            RunMode::SemiRun => {
                if s.breakpoint == Some(p) {
                    s.mode = RunMode::Stop;
                    return Gate::Breakpoint(p);
                }
                match s.instruction_counter {
                    Some(0) => {
                        s.mode = RunMode::Stop;
                        Gate::InstructionLimit
                    }
                    Some(n) => {
                        s.instruction_counter = Some(n - 1);
                        Gate::Go
                    }
                    None => Gate::Go,
                }
            }
            RunMode::Stop | RunMode::Shutdown => Gate::Halted,
        }
    }

    /// Block while stopped. Returns the mode that ended the wait, which is
    /// never `Stop`.
    pub fn wait_for_run(&self) -> RunMode {
        let Some(guard) = self.lock() else {
            return RunMode::Shutdown;
        };
        match self.wake.wait_while(guard, |s| s.mode == RunMode::Stop) {
            Ok(s) => s.mode,
            Err(_) => {
                error!("run-control lock poisoned while waiting");
                RunMode::Shutdown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_default_is_run() {
        let rc = RunControl::new();
        assert_eq!(rc.mode(), RunMode::Run);
        assert_eq!(rc.gate(0o100), Gate::Go);
    }

    #[test]
    fn test_breakpoint_stops_before_execute() {
        let rc = RunControl::new();
        rc.semi_run(Some(0o20), None);
        assert_eq!(rc.gate(0o17), Gate::Go);
        assert_eq!(rc.gate(0o20), Gate::Breakpoint(0o20));
        assert_eq!(rc.mode(), RunMode::Stop);
        assert_eq!(rc.gate(0o20), Gate::Halted);
    }

    #[test]
    fn test_instruction_counter() {
        let rc = RunControl::new();
        rc.semi_run(None, Some(2));
        assert_eq!(rc.gate(0), Gate::Go);
        assert_eq!(rc.gate(1), Gate::Go);
        assert_eq!(rc.gate(2), Gate::InstructionLimit);
        assert_eq!(rc.mode(), RunMode::Stop);
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let rc = RunControl::new();
        rc.shutdown();
        rc.start();
        rc.semi_run(None, None);
        assert_eq!(rc.mode(), RunMode::Shutdown);
        assert_eq!(rc.wait_for_run(), RunMode::Shutdown);
    }

    #[test]
    fn test_wait_for_run_wakes_on_start() {
        let rc = Arc::new(RunControl::new());
        rc.stop();
        let waiter = {
            let rc = Arc::clone(&rc);
            thread::spawn(move || rc.wait_for_run())
        };
        rc.start();
        assert_eq!(waiter.join().unwrap(), RunMode::Run);
    }
}
