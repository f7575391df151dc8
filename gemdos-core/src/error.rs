//! Error types for the GEMDOS host drive.

use std::io;

use thiserror::Error;

/// Errors that can occur while servicing a GEMDOS call on the host.
///
/// Every variant maps onto the guest's negative result-register convention
/// through [`GemdosError::code`].
#[derive(Error, Debug)]
pub enum GemdosError {
    #[error("General error")]
    General,

    #[error("Invalid function")]
    InvalidFunction,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("No more handles")]
    NoHandles,

    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid handle: {0}")]
    InvalidHandle(u16),

    #[error("No more files")]
    NoMoreFiles,

    #[error("Range error")]
    Range,

    #[error("Invalid drive: {0}")]
    InvalidDrive(char),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// GEMDOS result codes as seen in the guest's D0 register.
pub mod code {
    pub const E_OK: i32 = 0;
    pub const ERROR: i32 = -1;
    pub const EINVFN: i32 = -32;
    pub const EFILNF: i32 = -33;
    pub const EPTHNF: i32 = -34;
    pub const ENHNDL: i32 = -35;
    pub const EACCDN: i32 = -36;
    pub const EIHNDL: i32 = -37;
    pub const EDRIVE: i32 = -46;
    pub const ENMFIL: i32 = -49;
    pub const ERANGE: i32 = -64;

    /// Symbolic name of a result code, for diagnostics.
    pub fn name(code: i32) -> &'static str {
        match code {
            E_OK => "E_OK",
            ERROR => "ERROR",
            EINVFN => "EINVFN",
            EFILNF => "EFILNF",
            EPTHNF => "EPTHNF",
            ENHNDL => "ENHNDL",
            EACCDN => "EACCDN",
            EIHNDL => "EIHNDL",
            EDRIVE => "EDRIVE",
            ENMFIL => "ENMFIL",
            ERANGE => "ERANGE",
            _ => "unknown",
        }
    }
}

impl GemdosError {
    /// Guest-visible result code for this error.
    pub fn code(&self) -> i32 {
        match self {
            GemdosError::General => code::ERROR,
            GemdosError::InvalidFunction => code::EINVFN,
            GemdosError::FileNotFound(_) => code::EFILNF,
            GemdosError::PathNotFound(_) => code::EPTHNF,
            GemdosError::NoHandles => code::ENHNDL,
            GemdosError::AccessDenied => code::EACCDN,
            GemdosError::InvalidHandle(_) => code::EIHNDL,
            GemdosError::NoMoreFiles => code::ENMFIL,
            GemdosError::Range => code::ERANGE,
            GemdosError::InvalidDrive(_) => code::EDRIVE,
            GemdosError::Io(err) => match err.kind() {
                io::ErrorKind::NotFound => code::EFILNF,
                io::ErrorKind::PermissionDenied => code::EACCDN,
                _ => code::ERROR,
            },
            GemdosError::Json(_) => code::ERROR,
        }
    }
}

/// Result type for GEMDOS operations.
pub type GemdosResult<T> = Result<T, GemdosError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(GemdosError::FileNotFound("X".into()).code(), -33);
        assert_eq!(GemdosError::PathNotFound("X".into()).code(), -34);
        assert_eq!(GemdosError::NoHandles.code(), -35);
        assert_eq!(GemdosError::AccessDenied.code(), -36);
        assert_eq!(GemdosError::InvalidHandle(70).code(), -37);
        assert_eq!(GemdosError::NoMoreFiles.code(), -49);
        assert_eq!(code::name(-49), "ENMFIL");
        assert_eq!(code::name(-2), "unknown");
    }

    #[test]
    fn test_io_error_codes() {
        let missing = GemdosError::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(missing.code(), code::EFILNF);

        let denied = GemdosError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.code(), code::EACCDN);

        let other = GemdosError::from(io::Error::from(io::ErrorKind::Interrupted));
        assert_eq!(other.code(), code::ERROR);
    }
}
