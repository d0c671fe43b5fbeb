//! Control-channel status codes and error types.
//!
//! P4Runtime reports write and read failures as gRPC status codes. This
//! module converts raw codes into [`StatusCode`] and wraps every failure a
//! [`DeviceSession`](crate::DeviceSession) can report in [`ChannelError`].

use fabric_types::DeviceId;
use std::fmt;
use thiserror::Error;

/// gRPC status codes as returned by a P4Runtime server.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    /// Creates a StatusCode from a raw i32 value. Unrecognised codes map
    /// to `Unknown`.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == StatusCode::Ok
    }

    /// The canonical upper-case name used by gRPC tooling.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a device session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The device answered and refused the request.
    #[error("{device}: request rejected ({code}): {message}")]
    Rejected {
        device: DeviceId,
        code: StatusCode,
        message: String,
    },

    /// The request could not be delivered or the answer was lost.
    #[error("{device}: transport error: {message}")]
    Transport { device: DeviceId, message: String },

    /// The session was closed before or during the request.
    #[error("{device}: session closed")]
    Closed { device: DeviceId },
}

impl ChannelError {
    /// Creates a remote rejection.
    pub fn rejected(device: &DeviceId, code: StatusCode, message: impl Into<String>) -> Self {
        ChannelError::Rejected {
            device: device.clone(),
            code,
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(device: &DeviceId, message: impl Into<String>) -> Self {
        ChannelError::Transport {
            device: device.clone(),
            message: message.into(),
        }
    }

    pub fn closed(device: &DeviceId) -> Self {
        ChannelError::Closed {
            device: device.clone(),
        }
    }

    pub fn device(&self) -> &DeviceId {
        match self {
            ChannelError::Rejected { device, .. }
            | ChannelError::Transport { device, .. }
            | ChannelError::Closed { device } => device,
        }
    }

    /// Returns the remote status code if the device answered.
    pub fn code(&self) -> Option<StatusCode> {
        match self {
            ChannelError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the session can no longer be used.
    ///
    /// A rejected write leaves the channel healthy; a broken transport or
    /// an `UNAVAILABLE` server does not.
    pub fn is_fatal(&self) -> bool {
        match self {
            ChannelError::Rejected { code, .. } => *code == StatusCode::Unavailable,
            ChannelError::Transport { .. } | ChannelError::Closed { .. } => true,
        }
    }
}

/// Result type for session operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
