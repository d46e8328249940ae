//! Run-state machine shared between a long-running loop and its controller.

use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

/// Observable run state of a capture pump or aggregator loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
    /// Stop requested before the loop got to start.
    StopRequested = 3,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::StopRequested,
            _ => Self::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::StopRequested => "stop requested",
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot start {unit}: currently {state}")]
    NotStopped {
        unit: &'static str,
        state: &'static str,
    },
}

/// Atomic state cell with checked transitions.
///
/// `Stopped -> Running` happens once per start, `Running -> Stopping` is
/// requested by the controller, and the loop itself settles back to
/// `Stopped` on exit. The loop polls [`Lifecycle::is_running`] at every
/// iteration boundary.
///
/// A stop requested while the unit is still `Stopped` is parked as
/// `StopRequested`; the next [`Lifecycle::start`] consumes it by going
/// straight to `Stopping`, so the loop body never runs.
#[derive(Debug)]
pub struct Lifecycle {
    unit: &'static str,
    state: AtomicU8,
}

impl Lifecycle {
    pub fn new(unit: &'static str) -> Self {
        Self {
            unit,
            state: AtomicU8::new(RunState::Stopped as u8),
        }
    }

    /// Moves `Stopped -> Running`, failing if the unit is already active.
    ///
    /// A parked stop request turns into `Stopping` instead, which the loop
    /// observes as "not running" on its first check.
    pub fn start(&self) -> Result<(), LifecycleError> {
        loop {
            let current = self.state();
            let next = match current {
                RunState::Stopped => RunState::Running,
                RunState::StopRequested => RunState::Stopping,
                RunState::Running | RunState::Stopping => {
                    return Err(LifecycleError::NotStopped {
                        unit: self.unit,
                        state: current.as_str(),
                    })
                }
            };
            if self.transition(current, next) {
                return Ok(());
            }
        }
    }

    /// Moves `Running -> Stopping`, or parks the request as `StopRequested`
    /// when the loop has not started yet. Returns false if a stop is already
    /// pending.
    pub fn request_stop(&self) -> bool {
        loop {
            let current = self.state();
            let next = match current {
                RunState::Running => RunState::Stopping,
                RunState::Stopped => RunState::StopRequested,
                RunState::Stopping | RunState::StopRequested => return false,
            };
            if self.transition(current, next) {
                return true;
            }
        }
    }

    /// Drops a parked stop request once no loop is going to consume it.
    pub fn withdraw_stop(&self) {
        self.transition(RunState::StopRequested, RunState::Stopped);
    }

    /// Called by the loop once it has exited.
    pub fn finish(&self) {
        self.state.store(RunState::Stopped as u8, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
