// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Self-Identifying Binary Encoding
//!
//! Whole-state replication needs a wire form. A blob produced by
//! [`to_binary`] starts with a fixed header:
//!
//! ```text
//! +-----+---------+--------+------------------+
//! | tag | version | body   | MessagePack body |
//! | 1B  | 1B (=1) | marker | (maybe deflated) |
//! +-----+---------+--------+------------------+
//! ```
//!
//! The tag byte is the CRDT's [`TypeTag`](crate::TypeTag) (set = 75,
//! flag = 73, map = 101),
//! so a blob names its own kind; [`from_binary`] refuses to decode a blob
//! whose tag or version does not match what the caller asked for. The body
//! marker records whether the body was deflated, which is what lets
//! decoding stay transparent no matter which process-wide
//! [`BinaryCompression`](crate::BinaryCompression) setting produced the
//! blob.

use crate::crdts::Crdt;
use crate::{BinaryCompression, binary_compression};
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    error::Error,
    fmt,
    io::{Read, Write},
};

/// The current (and only) blob format version.
pub const BINARY_VERSION: u8 = 1;

const BODY_RAW: u8 = 0;
const BODY_DEFLATE: u8 = 1;

/// An error producing a binary blob.
#[derive(Debug)]
pub enum EncodeError {
    /// The state could not be serialized.
    Body(rmp_serde::encode::Error),
    /// The deflate stream could not be written.
    Deflate(std::io::Error),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Body(err) => write!(f, "serializing state: {err}"),
            EncodeError::Deflate(err) => write!(f, "deflating state: {err}"),
        }
    }
}

impl Error for EncodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EncodeError::Body(err) => Some(err),
            EncodeError::Deflate(err) => Some(err),
        }
    }
}

/// An error reading a binary blob. Fatal to the call; nothing is partially
/// decoded.
#[derive(Debug)]
pub enum DecodeError {
    /// The blob is shorter than the fixed header.
    Truncated,
    /// The blob's tag byte names a different kind than the one requested.
    WrongTag { expected: u8, found: u8 },
    /// The blob's version byte is not a version this library reads.
    UnsupportedVersion(u8),
    /// The blob's body marker is unknown.
    UnknownBodyMarker(u8),
    /// The body could not be inflated.
    Inflate(std::io::Error),
    /// The body could not be deserialized.
    Body(rmp_serde::decode::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "blob is shorter than the header"),
            DecodeError::WrongTag { expected, found } => {
                write!(f, "expected type tag {expected}, found {found}")
            }
            DecodeError::UnsupportedVersion(version) => {
                write!(f, "unsupported blob version {version}")
            }
            DecodeError::UnknownBodyMarker(marker) => {
                write!(f, "unknown body marker {marker}")
            }
            DecodeError::Inflate(err) => write!(f, "inflating state: {err}"),
            DecodeError::Body(err) => write!(f, "deserializing state: {err}"),
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DecodeError::Inflate(err) => Some(err),
            DecodeError::Body(err) => Some(err),
            _ => None,
        }
    }
}

/// Serializes a CRDT state into a self-identifying blob.
///
/// Honours the process-wide [`BinaryCompression`](crate::BinaryCompression)
/// setting; see [`set_binary_compression`](crate::set_binary_compression).
pub fn to_binary<T>(state: &T) -> Result<Vec<u8>, EncodeError>
where
    T: Crdt + Serialize,
{
    let body = rmp_serde::to_vec(state).map_err(EncodeError::Body)?;
    let mut blob = vec![T::TAG.byte(), BINARY_VERSION];
    match binary_compression() {
        BinaryCompression::Disabled => {
            blob.push(BODY_RAW);
            blob.extend_from_slice(&body);
        }
        mode => {
            let level = match mode {
                BinaryCompression::Level(level) => Compression::new(u32::from(level)),
                _ => Compression::default(),
            };
            blob.push(BODY_DEFLATE);
            let mut encoder = ZlibEncoder::new(blob, level);
            encoder.write_all(&body).map_err(EncodeError::Deflate)?;
            blob = encoder.finish().map_err(EncodeError::Deflate)?;
        }
    }
    Ok(blob)
}

/// Reconstructs a CRDT state from a [`to_binary`] blob.
///
/// The blob must carry `T`'s type tag and a known version; compressed and
/// uncompressed bodies are both accepted.
pub fn from_binary<T>(blob: &[u8]) -> Result<T, DecodeError>
where
    T: Crdt + DeserializeOwned,
{
    let [tag, version, marker, body @ ..] = blob else {
        return Err(DecodeError::Truncated);
    };
    if *tag != T::TAG.byte() {
        return Err(DecodeError::WrongTag {
            expected: T::TAG.byte(),
            found: *tag,
        });
    }
    if *version != BINARY_VERSION {
        return Err(DecodeError::UnsupportedVersion(*version));
    }
    match *marker {
        BODY_RAW => rmp_serde::from_slice(body).map_err(DecodeError::Body),
        BODY_DEFLATE => {
            let mut inflated = Vec::new();
            ZlibDecoder::new(body)
                .read_to_end(&mut inflated)
                .map_err(DecodeError::Inflate)?;
            rmp_serde::from_slice(&inflated).map_err(DecodeError::Body)
        }
        marker => Err(DecodeError::UnknownBodyMarker(marker)),
    }
}
