//! RearrangeError: unified error type for gridswap public APIs.
//!
//! Every fallible entry point in the library reports through this enum so
//! callers can treat any non-success result as fatal to the decomposition
//! being built or used. Partially-constructed descriptors are never safe to
//! reuse after an error; discard the whole `IoDesc`.

use thiserror::Error;

/// Unified error type for decomposition and rearrangement operations.
#[derive(Debug, Error)]
pub enum RearrangeError {
    /// Caller-supplied decomposition inputs are malformed (bad extents,
    /// rank counts, or an explicit I/O region of the wrong rank).
    #[error("invalid decomposition: {0}")]
    InvalidDecomp(String),

    /// A non-hole map entry was never claimed by any I/O rank's region.
    #[error("map entry {index} (global offset {offset}) lies outside every I/O region")]
    UnmappedElement { index: usize, offset: i64 },

    /// Two ranks claimed the same global offset; the fill grid cannot be
    /// built from an overlapping decomposition.
    #[error("global offset space is covered more than once near offset {offset}")]
    DuplicateOffset { offset: i64 },

    /// An exchange descriptor's index list is inconsistent with the
    /// computed block size.
    #[error("exchange descriptor stride error: message of {count} elements not divisible by block size {blocksize}")]
    BadStride { count: usize, blocksize: usize },

    /// A point-to-point or collective exchange with a peer failed.
    #[error("communication with rank {peer} failed: {source}")]
    CommError {
        peer: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RearrangeError {
    /// Shorthand used by the collective helpers.
    pub(crate) fn comm(peer: usize, msg: impl Into<String>) -> Self {
        RearrangeError::CommError {
            peer,
            source: msg.into().into(),
        }
    }
}
