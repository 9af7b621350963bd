// SPDX-License-Identifier: MIT OR Apache-2.0

//! Binary (de)serialization primitives shared by the variant codec and the
//! columnar file container.

use std::io::{Read, Write};

/// Error during serialization.
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error.
    Io(std::io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
        }
    }
}

/// Error during deserialization.
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error.
    Io(std::io::Error),

    /// A tag byte, dictionary id, or offset width was outside its valid range.
    InvalidEncoding(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::InvalidEncoding(msg) => write!(f, "invalid encoding: {msg}"),
        }
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidEncoding(_) => None,
        }
    }
}

/// Trait to serialize a value into a writer.
pub trait Encode {
    /// Serializes into the writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes into a freshly allocated vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];
        self.encode_into(&mut v).expect("in-memory write cannot fail");
        v
    }
}

/// Trait to deserialize a value from a reader.
pub trait Decode: Sized {
    /// Deserializes from the reader.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>;
}
