//! Workspace error type.

use thiserror::Error;

/// Errors shared across the Nudgebot crates.
#[derive(Debug, Error)]
pub enum NudgeError {
    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// A chat channel rejected or failed a request.
    #[error("channel error: {0}")]
    Channel(String),

    /// Transport-level failure (connect, timeout). Eligible for a small
    /// number of immediate retries before it surfaces.
    #[error("transport error: {0}")]
    Transport(String),

    /// The requested platform has no configured channel.
    #[error("no channel configured for platform '{0}'")]
    ChannelUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NudgeError>;
