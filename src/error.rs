// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types
//!
//! Structural misuse (invalid handles, duplicate/missing components) is reported
//! by returning `None`/`false` at the call site rather than through this enum;
//! `EcsError` covers the failures that must propagate: allocation exhaustion and
//! persistence-boundary errors.

use std::fmt;

/// Registry error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The chunk pool (or an underlying allocation) could not satisfy a request.
    OutOfMemory,

    /// The entity index space (2^24 simultaneously live + recycled slots) is saturated.
    PoolExhausted,

    /// A save stream's format version is outside `[min_supported, current]`.
    UnsupportedVersion { found: u32, min_supported: u32, current: u32 },

    /// A component's stable hash in a save stream has no match in the receiving registry.
    UnknownComponent { stable_hash: u64 },

    /// The trailing checksum over a save stream did not match its contents.
    ChecksumMismatch,

    /// A save stream's structure could not be parsed (truncated, malformed length, etc).
    CorruptedData(String),

    /// A save stream did not begin with the expected magic bytes.
    InvalidMagic,

    /// A batch request (`create_batch`, `destroy_batch`, `create_entities`) was too
    /// large to service in one call.
    BatchTooLarge { requested: usize, max: usize },
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::OutOfMemory => write!(f, "chunk pool or allocator exhausted"),
            EcsError::PoolExhausted => write!(f, "entity index space exhausted"),
            EcsError::UnsupportedVersion { found, min_supported, current } => write!(
                f,
                "unsupported format version {found} (supported range [{min_supported}, {current}])"
            ),
            EcsError::UnknownComponent { stable_hash } => {
                write!(f, "unknown component with stable hash {stable_hash:#018x}")
            }
            EcsError::ChecksumMismatch => write!(f, "checksum mismatch"),
            EcsError::CorruptedData(msg) => write!(f, "corrupted data: {msg}"),
            EcsError::InvalidMagic => write!(f, "invalid magic bytes"),
            EcsError::BatchTooLarge { requested, max } => {
                write!(f, "batch of {requested} exceeds limit of {max}")
            }
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
