use std::io;

use thiserror::Error;

/// Failures that cross the runtime boundary. Anything a binding runs into is
/// logged and swallowed instead, and unmapped keys or missing ROMs are plain
/// `None`s.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to instantiate guest: {0}")]
    Instantiate(String),

    #[error("guest export `{name}` is missing or has the wrong signature: {reason}")]
    MissingExport { name: &'static str, reason: String },

    #[error("guest trapped in `{entry}`: {reason}")]
    Trap { entry: &'static str, reason: String },

    #[error("guest layout at base 0x{base:05x} does not fit a {memory_len} byte shared region")]
    LayoutMismatch { base: u32, memory_len: usize },

    #[error("program of {len} bytes exceeds the {capacity} byte capacity")]
    ProgramTooLarge { len: usize, capacity: usize },

    #[error("program of {len} bytes would overwrite the guest image at 0x{base:05x}")]
    ProgramOverlapsLayout { len: usize, base: u32 },

    #[error("session has failed and must be torn down")]
    SessionFailed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type HostResult<T> = Result<T, HostError>;
