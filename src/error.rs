use thiserror::Error;

use crate::device::DeviceError;

/// Failure categories surfaced to callers.
///
/// Device failures are fatal for the operation that hit them and propagate
/// unchanged; everything else is a local refusal that leaves the filesystem
/// unmodified.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("no space left on device")]
    NoSpace,
    #[error("name or file too long")]
    TooLong,
    #[error("invalid file name")]
    InvalidName,
    #[error("write denied")]
    WriteDenied,
    #[error("device error: {0}")]
    Io(#[from] DeviceError),
}

pub type Result<T> = core::result::Result<T, FsError>;
