//! MPI backend (feature = "mpi-support").
//!
//! Wraps an `mpi` (rsmpi) communicator behind the same waitable-handle
//! surface as the in-process backend. Each `isend`/`irecv` runs a blocking
//! MPI call on a helper thread, so the library's post-receives-then-send
//! discipline behaves the same here as on `LocalComm`. Requires an MPI
//! library initialized with `Threading::Multiple`.

use std::sync::Arc;
use std::thread::JoinHandle;

use mpi::topology::{Color, Communicator as _, SimpleCommunicator};
use mpi::traits::*;

use crate::comm::communicator::{Communicator, Wait};
use crate::error::RearrangeError;

pub struct MpiComm {
    comm: Arc<SimpleCommunicator>,
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Wrap an already-initialized world communicator. The caller owns the
    /// `mpi::environment::Universe` and must keep it alive.
    pub fn from_comm(comm: SimpleCommunicator) -> Self {
        let rank = comm.rank() as usize;
        let size = comm.size() as usize;
        Self {
            comm: Arc::new(comm),
            rank,
            size,
        }
    }
}

pub struct MpiHandle {
    handle: Option<JoinHandle<Option<Vec<u8>>>>,
}

impl Wait for MpiHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        self.handle.take().and_then(|h| h.join().ok()).flatten()
    }
}

impl Communicator for MpiComm {
    type SendHandle = MpiHandle;
    type RecvHandle = MpiHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
        let comm = Arc::clone(&self.comm);
        let data = buf.to_vec();
        let handle = std::thread::spawn(move || {
            comm.process_at_rank(peer as i32)
                .send_with_tag(&data[..], tag as i32);
            None
        });
        MpiHandle {
            handle: Some(handle),
        }
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
        let comm = Arc::clone(&self.comm);
        let buf_len = buf.len();
        let handle = std::thread::spawn(move || {
            let (data, _status) = comm
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            let n = buf_len.min(data.len());
            Some(data[..n].to_vec())
        });
        MpiHandle {
            handle: Some(handle),
        }
    }

    fn split(&self, color: usize, key: usize) -> Result<Self, RearrangeError> {
        let sub = self
            .comm
            .split_by_color_with_key(Color::with_value(color as i32), key as i32)
            .ok_or_else(|| RearrangeError::comm(self.rank, "MPI_Comm_split yielded no group"))?;
        Ok(MpiComm::from_comm(sub))
    }
}
