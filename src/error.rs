//! Error taxonomy for the player
//!
//! Transport and decode failures have to cross the `std::io::Read` boundary
//! into symphonia, so `PlayerError` can be wrapped in an `io::Error` and
//! recovered again with [`PlayerError::from_io`].

use std::io;

use thiserror::Error;

/// Errors produced while streaming, decoding or presenting a track
#[derive(Debug, Clone, Error)]
pub enum PlayerError {
    /// Connection failure or non-success HTTP status
    #[error("transport error: {0}")]
    Transport(String),

    /// Read or seek beyond the bounds of the resource
    #[error("offset {offset} is out of range (length {length})")]
    OutOfRange { offset: u64, length: u64 },

    /// Malformed or truncated compressed data
    #[error("decode error: {0}")]
    Decode(String),

    /// Unrecognized container or codec
    #[error("unsupported format: {0}")]
    FormatUnsupported(String),

    /// Audio output device could not be opened
    #[error("audio output error: {0}")]
    Output(String),

    /// Terminal could not be configured or drawn
    #[error("terminal error: {0}")]
    Terminal(String),

    /// Settings file could not be read or written
    #[error("settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

impl PlayerError {
    /// Wrap the error so it can travel through `Read`/`Seek` implementations
    pub fn into_io(self) -> io::Error {
        let kind = match self {
            PlayerError::OutOfRange { .. } => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }

    /// Recover a `PlayerError` that was wrapped by [`PlayerError::into_io`]
    ///
    /// Plain I/O errors that did not originate here are reported as
    /// transport failures.
    pub fn from_io(err: &io::Error) -> Self {
        match err.get_ref().and_then(|inner| inner.downcast_ref::<PlayerError>()) {
            Some(inner) => inner.clone(),
            None => PlayerError::Transport(err.to_string()),
        }
    }
}

impl From<io::Error> for PlayerError {
    fn from(err: io::Error) -> Self {
        PlayerError::from_io(&err)
    }
}
