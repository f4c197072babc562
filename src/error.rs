//! Typed errors for the component contracts.
//!
//! External collaborators (serial transport, capture provider, classifier
//! backend) report failures as `anyhow::Error`; each component folds those into
//! one of the enums below so callers can match on the failure class. None of
//! these errors is process-fatal:
//!
//! - **`DeviceError`** is surfaced synchronously to whoever issued the device
//!   command. Connection state is updated before the error is returned.
//! - **`CaptureError`** is contained by the sensing scheduler. The last good
//!   artifact stays current.
//! - **`ClassificationError`** never leaves the classifier gate; it is absorbed
//!   into the fallback verdict.
//! - **`SensingError`** covers rejected session commands.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no port selected")]
    InvalidPort,

    #[error("connection to {port} failed: {reason}")]
    Connection { port: String, reason: String },

    #[error("device not connected")]
    NotConnected,

    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("command {command:?} failed: {reason}")]
    Send { command: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture provider failed: {0}")]
    Provider(String),

    #[error("unrecognized image payload prefix: {0}")]
    UnsupportedFormat(String),

    #[error("image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("image payload declared {declared} but contains {found}")]
    FormatMismatch { declared: String, found: String },

    #[error("display surface rejected artifact: {0}")]
    Display(String),

    #[error("capture manager has been disposed")]
    Disposed,
}

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("classifier backend failed: {0}")]
    Backend(String),

    #[error("classifier returned an invalid verdict: {0}")]
    InvalidResponse(String),

    #[error("classifier verdict does not match schema: {0}")]
    Schema(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensingError {
    #[error("sensing already active")]
    AlreadyActive,

    #[error("interval {requested}ms is below the {minimum}ms floor")]
    IntervalTooShort { requested: u64, minimum: u64 },
}
