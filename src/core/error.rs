//! Error types for the credential engine and the result codes reported back
//! to callers.

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Wire value reported for a request that completed.
pub const SUCCESS_CODE: i32 = 0;

/// Why a request ended in the `Errored` state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("user not found")]
    UserNotFound,
    #[error("user already exists")]
    UserExists,
    #[error("password does not match")]
    PasswordMismatch,
    #[error("failed to create user")]
    ProvisionFailed,
    #[error("failed to remove user")]
    DeprovisionFailed,
    #[error("failed to update credential store")]
    UpdateFailed,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("invalid request")]
    InvalidRequest,
    #[error("credential store busy")]
    StoreBusy,
    #[error("fatal error")]
    Fatal,
}

impl ErrorKind {
    /// Stable numeric value for the transport.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::UserNotFound => 1,
            ErrorKind::UserExists => 2,
            ErrorKind::PasswordMismatch => 3,
            ErrorKind::ProvisionFailed => 4,
            ErrorKind::DeprovisionFailed => 5,
            ErrorKind::UpdateFailed => 6,
            ErrorKind::InvalidOperation => 7,
            ErrorKind::InvalidRequest => 8,
            ErrorKind::StoreBusy => 9,
            ErrorKind::Fatal => 10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::UserNotFound => "user_not_found",
            ErrorKind::UserExists => "user_exists",
            ErrorKind::PasswordMismatch => "password_mismatch",
            ErrorKind::ProvisionFailed => "provision_failed",
            ErrorKind::DeprovisionFailed => "deprovision_failed",
            ErrorKind::UpdateFailed => "update_failed",
            ErrorKind::InvalidOperation => "invalid_operation",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::StoreBusy => "store_busy",
            ErrorKind::Fatal => "fatal",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("credential store lock {} is held by another process", .0.display())]
    Busy(PathBuf),

    #[error("acquire lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("user '{0}' not found in credential store")]
    NotFound(String),
}

impl StoreError {
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaltError {
    #[error("salt length {0} outside allowed range [8, 16]")]
    Length(usize),
}

#[derive(Error, Debug)]
pub enum CryptError {
    #[error(transparent)]
    Salt(#[from] SaltError),

    #[error("crypt rejected parameters: {0}")]
    Hash(String),
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("run {}: {source}", .tool.display())]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exited with {status:?}: {stderr}", .tool.display())]
    Failed {
        tool: PathBuf,
        status: Option<i32>,
        stderr: String,
    },

    #[error("user '{0}' missing from credential store after creation")]
    NotVisible(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
