// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::coding::{DecodeError, EncodeError};

/// Errors that can occur while operating the columnar CAS engine.
#[derive(Debug)]
pub enum Error {
    /// An I/O-shaped failure reported by a collaborator (blob store or local KV store).
    Io(std::io::Error),

    /// A value could not be serialized into its on-disk representation.
    Encode(EncodeError),

    /// A value could not be deserialized from its on-disk representation.
    Decode(DecodeError),

    /// The object type, SHA, or other user-supplied input was syntactically invalid.
    InvalidInput(String),

    /// A columnar file or WAL/journal row could not be decoded.
    Corruption(String),

    /// The blob store or local KV store reported a transient failure.
    StorageUnavailable(String),

    /// An internal invariant was violated; indicates a bug in the engine.
    InvariantViolated(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::StorageUnavailable(msg) => write!(f, "storage unavailable: {msg}"),
            Self::InvariantViolated(msg) => write!(f, "invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, Error>;
