//! Startup errors for the daemon.

use std::fmt;

/// Errors that stop the daemon from running.
#[derive(Debug)]
pub enum DaemonError {
    /// Configuration could not be loaded.
    Config { details: String },
    /// The bootstrap integrations file could not be used.
    Bootstrap { path: String, details: String },
    /// The HTTP client could not be built.
    HttpClient { details: String },
    /// The scheduler rejected its configuration.
    Scheduler { details: String },
    /// Waiting for the shutdown signal failed.
    Signal { details: String },
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "failed to load configuration: {details}"),
            Self::Bootstrap { path, details } => {
                write!(f, "failed to read integrations file '{path}': {details}")
            }
            Self::HttpClient { details } => write!(f, "failed to build HTTP client: {details}"),
            Self::Scheduler { details } => write!(f, "failed to build scheduler: {details}"),
            Self::Signal { details } => write!(f, "failed to listen for shutdown: {details}"),
        }
    }
}

impl std::error::Error for DaemonError {}
