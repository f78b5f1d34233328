// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the B+-tree index.
//!
//! Provides structured error handling with enough context to act on a
//! failure without re-deriving it from a bare message string.

use std::fmt;

/// Standard result type for all index operations that can fail.
///
/// Point lookup, update, and range scan never fail (see §7 of the index
/// design) and therefore return plain values rather than this alias.
pub type BTreeResult<T> = Result<T, BTreeError>;

/// Error types for the B+-tree index.
#[derive(Debug, Clone)]
pub enum BTreeError {
    /// Tree constructed with a branching factor below the minimum of 3.
    InvalidOrder { order: u16, min: u16 },

    /// I/O failure during snapshot open/seek/read/write.
    IoError { operation: String, reason: String },

    /// A node or metadata record failed to encode.
    SerializationError { reason: String },

    /// A node or metadata record failed to decode.
    DeserializationError { reason: String },

    /// Snapshot file's `(max_keys, min_keys)` differ from the instance
    /// being deserialised into.
    IncompatibleParameters {
        file_max_keys: usize,
        file_min_keys: usize,
        expected_max_keys: usize,
        expected_min_keys: usize,
    },

    /// Snapshot metadata or a node record is structurally invalid.
    CorruptedSnapshot { reason: String },
}

impl fmt::Display for BTreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOrder { order, min } => {
                write!(f, "invalid branching factor {} (minimum {})", order, min)
            }
            Self::IoError { operation, reason } => {
                write!(f, "I/O error during '{}': {}", operation, reason)
            }
            Self::SerializationError { reason } => {
                write!(f, "serialisation error: {}", reason)
            }
            Self::DeserializationError { reason } => {
                write!(f, "deserialisation error: {}", reason)
            }
            Self::IncompatibleParameters {
                file_max_keys,
                file_min_keys,
                expected_max_keys,
                expected_min_keys,
            } => {
                write!(
                    f,
                    "snapshot parameters (max_keys={}, min_keys={}) do not match \
                     instance parameters (max_keys={}, min_keys={})",
                    file_max_keys, file_min_keys, expected_max_keys, expected_min_keys
                )
            }
            Self::CorruptedSnapshot { reason } => {
                write!(f, "corrupted snapshot: {}", reason)
            }
        }
    }
}

impl std::error::Error for BTreeError {}

// Convenience conversion from std::io::Error.
impl From<std::io::Error> for BTreeError {
    fn from(err: std::io::Error) -> Self {
        BTreeError::IoError {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}
