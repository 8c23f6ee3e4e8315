//! Error types for norsim-kernel

use core::fmt;

use crate::time::{Pretty, SimTime};

/// Failure of the scheduler itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The awaited task can no longer make progress: nothing is runnable,
    /// no write is pending and no timer is armed
    Starved {
        /// Simulated time at which the kernel ran dry
        now: SimTime,
    },
    /// The next timer lies beyond the configured time limit
    TimeLimit {
        /// The limit that was hit
        limit: SimTime,
    },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starved { now } => {
                write!(f, "simulation starved at {}: nothing left to run", Pretty(*now))
            }
            Self::TimeLimit { limit } => {
                write!(f, "simulated time limit of {} exceeded", Pretty(*limit))
            }
        }
    }
}

impl std::error::Error for KernelError {}

/// An awaited signal transition did not happen in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout {
    /// What was being waited for, usually a signal name
    pub awaited: String,
    /// The bound that expired
    pub after: SimTime,
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timed out after {} waiting for {}",
            Pretty(self.after),
            self.awaited
        )
    }
}

impl std::error::Error for Timeout {}
