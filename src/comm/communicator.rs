//! Thin façade over intra-process (threaded) or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking — the collective helpers
//! call `.wait()` before they trust that a buffer is ready.
//!
//! Every rearrangement collective is SPMD: each member of a communicator
//! must enter it, in the same relative order, or the exchange deadlocks.

use crate::error::RearrangeError;

/// Non-blocking communication interface (minimal by design).
///
/// `split` is the only collective in the trait itself; everything else the
/// rearranger needs (gathers, reductions, the generalized all-to-all) is
/// built on `isend`/`irecv` in [`crate::comm::collective`] and
/// [`crate::comm::swapm`].
pub trait Communicator: Send + Sync + Sized + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process in the communicator, in `0..size()`.
    fn rank(&self) -> usize;
    /// Number of processes in the communicator.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Collective split by `(color, key)`: ranks with equal `color` form a
    /// new communicator, ordered by `(key, parent rank)`.
    fn split(&self, color: usize, key: usize) -> Result<Self, RearrangeError>;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Typed tag namespace; each exchange stage owns a base tag and may use a
/// few adjacent values (e.g. a handshake-token channel next to a data
/// channel).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub fn base(self) -> u16 {
        self.0
    }
    pub fn offset(self, k: u16) -> u16 {
        self.0 + k
    }
}

/// Tags reserved by the library, one per exchange stage.
pub(crate) mod tags {
    use super::CommTag;

    pub const SPLIT: CommTag = CommTag(0x0010);
    pub const GATHER: CommTag = CommTag(0x0020);
    pub const SCATTER: CommTag = CommTag(0x0030);
    pub const BCAST: CommTag = CommTag(0x0040);
    pub const REDUCE: CommTag = CommTag(0x0050);
    /// Data + handshake channels for the decomposition-construction swapm
    /// calls and the two transpose directions.
    pub const REARR_CREATE: CommTag = CommTag(0x0100);
    pub const COMP2IO: CommTag = CommTag(0x0110);
    pub const IO2COMP: CommTag = CommTag(0x0120);
}

/// Compile-time no-op comm for pure serial unit tests and one-rank runs.
///
/// Self-exchanges never reach `isend`/`irecv` (the collective helpers copy
/// locally), so the handles can be unit.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn split(&self, _color: usize, _key: usize) -> Result<Self, RearrangeError> {
        Ok(NoComm)
    }
}
