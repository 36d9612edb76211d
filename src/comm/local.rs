//! In-process multi-rank backend: threads stand in for ranks.
//!
//! Each "universe" owns a mailbox of [`Bytes`] payloads keyed by
//! `(src, dst, tag)`; queues are FIFO per channel, which is what the
//! collective helpers rely on to match messages across back-to-back
//! collectives without extra sequencing. Used by the integration tests and
//! by anyone who wants to exercise a decomposition without MPI.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::comm::collective::all_gather;
use crate::comm::communicator::{CommTag, Communicator, Wait, tags};
use crate::error::RearrangeError;

type Key = (usize, usize, u16); // (src, dst, tag)

struct Ctx {
    size: usize,
    mailbox: DashMap<Key, VecDeque<Bytes>>,
    /// Child contexts created by `split`, keyed by (split call number,
    /// color). The first rank to arrive creates the context; the rest
    /// attach to it.
    splits: DashMap<(u64, usize), Arc<Ctx>>,
}

impl Ctx {
    fn new(size: usize) -> Self {
        Self {
            size,
            mailbox: DashMap::new(),
            splits: DashMap::new(),
        }
    }

    fn push(&self, key: Key, data: Bytes) {
        self.mailbox.entry(key).or_default().push_back(data);
    }

    fn try_pop(&self, key: Key) -> Option<Bytes> {
        self.mailbox.get_mut(&key)?.pop_front()
    }
}

/// One rank's handle into an in-process universe.
pub struct LocalComm {
    ctx: Arc<Ctx>,
    rank: usize,
    /// Counts this handle's `split` calls; collective ordering guarantees
    /// the counter agrees across ranks of the same universe.
    split_seq: AtomicU64,
}

impl LocalComm {
    /// Create a universe of `size` ranks sharing one mailbox. Hand one
    /// handle to each thread.
    pub fn universe(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "universe needs at least one rank");
        let ctx = Arc::new(Ctx::new(size));
        (0..size)
            .map(|rank| LocalComm {
                ctx: Arc::clone(&ctx),
                rank,
                split_seq: AtomicU64::new(0),
            })
            .collect()
    }
}

pub struct LocalHandle {
    buf: Arc<Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let mut guard = self.buf.lock();
        guard.take()
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.ctx.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        self.ctx.push(key, Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> LocalHandle {
        let key = (peer, self.rank, tag);
        let slot = Arc::new(Mutex::new(None));
        let slot_clone = Arc::clone(&slot);
        let ctx = Arc::clone(&self.ctx);
        let buf_len = buf.len();
        let handle = std::thread::spawn(move || {
            loop {
                if let Some(bytes) = ctx.try_pop(key) {
                    let n = buf_len.min(bytes.len());
                    *slot_clone.lock() = Some(bytes[..n].to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle {
            buf: slot,
            handle: Some(handle),
        }
    }

    fn split(&self, color: usize, key: usize) -> Result<Self, RearrangeError> {
        let seq = self.split_seq.fetch_add(1, Ordering::Relaxed);

        // Everyone learns every (color, key) pair, then derives the same
        // group membership deterministically.
        let mine = [color as u64, key as u64];
        let all = all_gather(self, &mine, split_tag(seq))?;

        let mut members: Vec<(u64, usize)> = Vec::new();
        for r in 0..self.ctx.size {
            if all[2 * r] == color as u64 {
                members.push((all[2 * r + 1], r));
            }
        }
        members.sort_unstable();
        let new_rank = members
            .iter()
            .position(|&(_, r)| r == self.rank)
            .expect("splitting rank is always a member of its own color group");

        let child = self
            .ctx
            .splits
            .entry((seq, color))
            .or_insert_with(|| Arc::new(Ctx::new(members.len())))
            .clone();

        Ok(LocalComm {
            ctx: child,
            rank: new_rank,
            split_seq: AtomicU64::new(0),
        })
    }
}

/// Each split call gets its own tag so a rank that races ahead into the
/// next split cannot cross wires with a slow sibling.
fn split_tag(seq: u64) -> CommTag {
    CommTag(tags::SPLIT.base() + (seq % 8) as u16)
}
