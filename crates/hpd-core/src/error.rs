//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Cannot create configuration directory {path}: {reason}")]
    ConfigDir { path: PathBuf, reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown device: {id}")]
    UnknownDevice { id: String },

    #[error("Device {device} has no image named \"{image}\"")]
    UnknownImage { device: String, image: String },

    // ─────────────────────────────────────────────────────────────
    // Process/Session Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to spawn image command: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Process error: {message}")]
    Process { message: String },

    #[error("Output buffer error: {message}")]
    Buffer { message: String },

    // ─────────────────────────────────────────────────────────────
    // Collaborator Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Notification error: {message}")]
    Notification { message: String },

    #[error("Config watcher error: {message}")]
    Watcher { message: String },

    #[error("Device monitor error: {message}")]
    Monitor { message: String },

    #[error("Control socket error: {message}")]
    Control { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_dir(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ConfigDir {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unknown_device(id: impl Into<String>) -> Self {
        Self::UnknownDevice { id: id.into() }
    }

    pub fn unknown_image(device: impl Into<String>, image: impl Into<String>) -> Self {
        Self::UnknownImage {
            device: device.into(),
            image: image.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn buffer(message: impl Into<String>) -> Self {
        Self::Buffer {
            message: message.into(),
        }
    }

    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }

    pub fn watcher(message: impl Into<String>) -> Self {
        Self::Watcher {
            message: message.into(),
        }
    }

    pub fn monitor(message: impl Into<String>) -> Self {
        Self::Monitor {
            message: message.into(),
        }
    }

    pub fn control(message: impl Into<String>) -> Self {
        Self::Control {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors are reported through the log and never interrupt
    /// the event loop or other sessions.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownDevice { .. }
                | Error::UnknownImage { .. }
                | Error::ProcessSpawn { .. }
                | Error::Process { .. }
                | Error::Buffer { .. }
                | Error::Notification { .. }
                | Error::Watcher { .. }
                | Error::Monitor { .. }
                | Error::Control { .. }
        )
    }

    /// Check if this error should abort start-up
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConfigDir { .. })
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }
}
