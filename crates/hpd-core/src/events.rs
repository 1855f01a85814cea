//! Events emitted by a running image process

use std::fmt;

/// Which pipe a chunk of output came from.
///
/// Only presentation cares about the difference; aggregation treats both
/// streams identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// Output and lifecycle events for one spawned process.
///
/// Delivered FIFO per process; the `Exited` event is always the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Raw bytes read from one of the pipes, carriage returns intact
    Output { stream: StreamKind, bytes: Vec<u8> },

    /// Process terminated; `None` when killed by a signal or the status was lost
    Exited { code: Option<i32> },
}

impl ProcessEvent {
    pub fn stdout(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Output {
            stream: StreamKind::Stdout,
            bytes: bytes.into(),
        }
    }

    pub fn stderr(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Output {
            stream: StreamKind::Stderr,
            bytes: bytes.into(),
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, ProcessEvent::Exited { .. })
    }
}
