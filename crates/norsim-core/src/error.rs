//! Error types for norsim-core
//!
//! Every error aborts the scenario it occurs in. A wrong wire sequence is a
//! [`Error::ProtocolViolation`]; a responder that never answered is a
//! [`Error::Timeout`].

use thiserror::Error;

use norsim_kernel::{KernelError, Timeout};

/// Model and bus driver errors
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-sequence signal activity
    #[error("[{bus}] protocol violation: {detail}")]
    ProtocolViolation {
        /// Bus or device that observed the violation
        bus: &'static str,
        /// What went wrong
        detail: String,
    },

    /// An expected signal transition never happened
    #[error("{0}")]
    Timeout(#[from] Timeout),

    /// Address outside the array
    #[error("address {addr:#x} out of range (size {size:#x})")]
    Range {
        /// Offending word address
        addr: u64,
        /// Array size in words
        size: u64,
    },

    /// Behaviour the model knowingly does not emulate
    #[error("unimplemented behaviour: {0}")]
    Unimplemented(&'static str),

    /// A new transaction was started while one is still open on the same master
    #[error("[{0}] transaction already in progress")]
    TransactionInProgress(&'static str),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Scheduler failure
    #[error("simulation kernel: {0}")]
    Kernel(#[from] KernelError),

    /// A background task was killed before producing a result
    #[error("task '{0}' was killed")]
    TaskKilled(&'static str),

    /// Filesystem error while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for [`Error::ProtocolViolation`]
    pub fn violation(bus: &'static str, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            bus,
            detail: detail.into(),
        }
    }

    /// Whether this is a protocol violation
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// Whether this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type for norsim-core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::violation("wb", "unexpected stb");
        assert_eq!(e.to_string(), "[wb] protocol violation: unexpected stb");
        assert!(e.is_violation());

        let e = Error::Range {
            addr: 0x100,
            size: 0x80,
        };
        assert_eq!(e.to_string(), "address 0x100 out of range (size 0x80)");

        let e: Error = Timeout {
            awaited: "ack".into(),
            after: 100_000,
        }
        .into();
        assert!(e.is_timeout());
        assert_eq!(e.to_string(), "timed out after 100 ns waiting for ack");
    }
}
