//! Rooted and symmetric collectives built on the point-to-point trait.
//!
//! These are the exchange stages the rearrangers are made of: gathers of
//! counts and index lists to an I/O rank, scatters of corrected indices
//! back out, reductions of region counts and buffer sizes, and broadcasts
//! of hyperslab descriptors. Every function is collective over `comm`: all
//! ranks must call it, in the same relative order. Contributions are typed
//! `bytemuck::Pod` slices cast to bytes on the wire.
//!
//! Every send/receive handle is drained before returning, even when an
//! error has already been observed.

use bytemuck::Pod;

use crate::comm::communicator::{CommTag, Communicator, Wait};
use crate::error::RearrangeError;

fn recv_exact<H: Wait>(handle: H, peer: usize, expected: usize) -> Result<Vec<u8>, RearrangeError> {
    match handle.wait() {
        Some(data) if data.len() == expected => Ok(data),
        Some(data) => Err(RearrangeError::comm(
            peer,
            format!("expected {expected} bytes, got {}", data.len()),
        )),
        None => Err(RearrangeError::comm(peer, "receive returned no data")),
    }
}

/// Gather equal-length contributions from every rank to every rank.
/// Returns the concatenation in rank order; all ranks see the same result.
pub fn all_gather<C: Communicator, T: Pod>(
    comm: &C,
    mine: &[T],
    tag: CommTag,
) -> Result<Vec<T>, RearrangeError> {
    let ntasks = comm.size();
    let me = comm.rank();
    if ntasks == 1 {
        return Ok(mine.to_vec());
    }

    let bytes = bytemuck::cast_slice::<T, u8>(mine);
    let mut scratch = vec![0u8; bytes.len()];
    let mut recvs = Vec::with_capacity(ntasks - 1);
    for peer in 0..ntasks {
        if peer != me {
            recvs.push((peer, comm.irecv(peer, tag.base(), &mut scratch)));
        }
    }
    let mut sends = Vec::with_capacity(ntasks - 1);
    for peer in 0..ntasks {
        if peer != me {
            sends.push(comm.isend(peer, tag.base(), bytes));
        }
    }

    let mut out = vec![T::zeroed(); mine.len() * ntasks];
    out[me * mine.len()..(me + 1) * mine.len()].copy_from_slice(mine);
    let mut maybe_err = None;
    for (peer, handle) in recvs {
        match recv_exact(handle, peer, bytes.len()) {
            Ok(data) => {
                let dst = &mut out[peer * mine.len()..(peer + 1) * mine.len()];
                bytemuck::cast_slice_mut::<T, u8>(dst).copy_from_slice(&data);
            }
            Err(e) if maybe_err.is_none() => maybe_err = Some(e),
            Err(_) => {}
        }
    }
    for send in sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Gather variable-length contributions to `root`. On the root,
/// `recvcounts` gives the element count expected from each rank and the
/// result is the rank-ordered concatenation; elsewhere the result is
/// `None` and `recvcounts` is ignored.
pub fn gatherv<C: Communicator, T: Pod>(
    comm: &C,
    root: usize,
    mine: &[T],
    recvcounts: Option<&[usize]>,
    tag: CommTag,
) -> Result<Option<Vec<T>>, RearrangeError> {
    let ntasks = comm.size();
    let me = comm.rank();

    if me != root {
        let send = comm.isend(root, tag.base(), bytemuck::cast_slice(mine));
        let _ = send.wait();
        return Ok(None);
    }

    let counts = recvcounts.expect("gatherv root must supply receive counts");
    assert_eq!(counts.len(), ntasks, "one receive count per rank");
    assert_eq!(counts[me], mine.len(), "root contribution length mismatch");

    let elem = std::mem::size_of::<T>();
    let mut recvs = Vec::new();
    for peer in 0..ntasks {
        if peer != me && counts[peer] > 0 {
            let mut scratch = vec![0u8; counts[peer] * elem];
            recvs.push((peer, comm.irecv(peer, tag.base(), &mut scratch)));
        }
    }

    let total: usize = counts.iter().sum();
    let mut out = vec![T::zeroed(); total];
    let displs: Vec<usize> = counts
        .iter()
        .scan(0usize, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect();
    out[displs[me]..displs[me] + mine.len()].copy_from_slice(mine);

    let mut maybe_err = None;
    for (peer, handle) in recvs {
        match recv_exact(handle, peer, counts[peer] * elem) {
            Ok(data) => {
                let dst = &mut out[displs[peer]..displs[peer] + counts[peer]];
                bytemuck::cast_slice_mut::<T, u8>(dst).copy_from_slice(&data);
            }
            Err(e) if maybe_err.is_none() => maybe_err = Some(e),
            Err(_) => {}
        }
    }

    match maybe_err {
        Some(e) => Err(e),
        None => Ok(Some(out)),
    }
}

/// Fixed-length gather to `root`: every rank contributes `mine.len()`
/// elements (the same length on every rank).
pub fn gather<C: Communicator, T: Pod>(
    comm: &C,
    root: usize,
    mine: &[T],
    tag: CommTag,
) -> Result<Option<Vec<T>>, RearrangeError> {
    let counts = vec![mine.len(); comm.size()];
    let recvcounts = (comm.rank() == root).then_some(counts.as_slice());
    gatherv(comm, root, mine, recvcounts, tag)
}

/// Scatter variable-length parts from `root`. On the root, `parts` is the
/// concatenated send buffer plus per-rank element counts; elsewhere it is
/// `None`. Every rank states how many elements it expects.
pub fn scatterv<C: Communicator, T: Pod>(
    comm: &C,
    root: usize,
    parts: Option<(&[T], &[usize])>,
    my_count: usize,
    tag: CommTag,
) -> Result<Vec<T>, RearrangeError> {
    let ntasks = comm.size();
    let me = comm.rank();

    if me != root {
        let elem = std::mem::size_of::<T>();
        let mut scratch = vec![0u8; my_count * elem];
        let handle = comm.irecv(root, tag.base(), &mut scratch);
        let data = recv_exact(handle, root, my_count * elem)?;
        let mut out = vec![T::zeroed(); my_count];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&data);
        return Ok(out);
    }

    let (buf, counts) = parts.expect("scatterv root must supply parts");
    assert_eq!(counts.len(), ntasks, "one send count per rank");
    assert_eq!(counts[me], my_count, "root part length mismatch");

    let mut own = Vec::new();
    let mut sends = Vec::new();
    let mut pos = 0usize;
    for peer in 0..ntasks {
        let part = &buf[pos..pos + counts[peer]];
        if peer == me {
            own = part.to_vec();
        } else if counts[peer] > 0 {
            sends.push(comm.isend(peer, tag.base(), bytemuck::cast_slice(part)));
        }
        pos += counts[peer];
    }
    for send in sends {
        let _ = send.wait();
    }
    Ok(own)
}

/// Broadcast `buf` from `root`; every rank passes a buffer of the same
/// length and leaves with the root's contents.
pub fn broadcast<C: Communicator, T: Pod>(
    comm: &C,
    root: usize,
    buf: &mut [T],
    tag: CommTag,
) -> Result<(), RearrangeError> {
    let ntasks = comm.size();
    let me = comm.rank();
    if ntasks == 1 {
        return Ok(());
    }

    if me == root {
        let bytes = bytemuck::cast_slice::<T, u8>(buf);
        let mut sends = Vec::with_capacity(ntasks - 1);
        for peer in 0..ntasks {
            if peer != me {
                sends.push(comm.isend(peer, tag.base(), bytes));
            }
        }
        for send in sends {
            let _ = send.wait();
        }
    } else {
        let expected = std::mem::size_of_val(buf);
        let mut scratch = vec![0u8; expected];
        let handle = comm.irecv(root, tag.base(), &mut scratch);
        let data = recv_exact(handle, root, expected)?;
        bytemuck::cast_slice_mut::<T, u8>(buf).copy_from_slice(&data);
    }
    Ok(())
}

/// Reduction operator for [`all_reduce_i64`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Max,
    Sum,
}

/// All-reduce a single `i64` across the communicator.
pub fn all_reduce_i64<C: Communicator>(
    comm: &C,
    value: i64,
    op: ReduceOp,
    tag: CommTag,
) -> Result<i64, RearrangeError> {
    let all = all_gather(comm, &[value], tag)?;
    Ok(match op {
        ReduceOp::Max => all.into_iter().max().unwrap_or(value),
        ReduceOp::Sum => all.into_iter().sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{CommTag, NoComm};
    use crate::comm::local::LocalComm;

    const TAG: CommTag = CommTag(0x4000);

    fn run_ranks<F>(n: usize, f: F) -> Vec<Vec<i64>>
    where
        F: Fn(LocalComm) -> Vec<i64> + Send + Sync + Clone + 'static,
    {
        let mut out: Vec<_> = LocalComm::universe(n)
            .into_iter()
            .map(|comm| {
                let f = f.clone();
                let rank = comm.rank();
                (rank, std::thread::spawn(move || f(comm)))
            })
            .collect();
        out.sort_by_key(|(rank, _)| *rank);
        out.into_iter().map(|(_, h)| h.join().unwrap()).collect()
    }

    #[test]
    fn single_rank_shortcuts() {
        let comm = NoComm;
        assert_eq!(all_gather(&comm, &[7i64], TAG).unwrap(), vec![7]);
        assert_eq!(all_reduce_i64(&comm, 5, ReduceOp::Sum, TAG).unwrap(), 5);
        let gathered = gatherv(&comm, 0, &[1i64, 2], Some(&[2]), TAG).unwrap();
        assert_eq!(gathered, Some(vec![1, 2]));
    }

    #[test]
    fn all_gather_rank_order() {
        let results = run_ranks(3, |comm| {
            let r = comm.rank() as i64;
            all_gather(&comm, &[r, 10 * r], TAG).unwrap()
        });
        for got in results {
            assert_eq!(got, vec![0, 0, 1, 10, 2, 20]);
        }
    }

    #[test]
    fn gatherv_scatterv_roundtrip() {
        let results = run_ranks(4, |comm| {
            let r = comm.rank() as i64;
            // Rank r contributes r elements; root 1 collects, doubles, scatters.
            let mine: Vec<i64> = (0..r).collect();
            let counts = [0usize, 1, 2, 3];
            let gathered = gatherv(
                &comm,
                1,
                &mine,
                (comm.rank() == 1).then_some(&counts[..]),
                TAG,
            )
            .unwrap();
            let doubled: Vec<i64> = gathered
                .map(|g| g.iter().map(|v| v * 2).collect())
                .unwrap_or_default();
            let parts = (comm.rank() == 1).then_some((doubled.as_slice(), &counts[..]));
            scatterv(&comm, 1, parts, comm.rank(), TAG).unwrap()
        });
        assert_eq!(results[0], Vec::<i64>::new());
        assert_eq!(results[1], vec![0]);
        assert_eq!(results[2], vec![0, 2]);
        assert_eq!(results[3], vec![0, 2, 4]);
    }

    #[test]
    fn broadcast_and_reduce() {
        let results = run_ranks(3, |comm| {
            let mut buf = [0i64; 2];
            if comm.rank() == 2 {
                buf = [41, 42];
            }
            broadcast(&comm, 2, &mut buf, TAG).unwrap();
            let mx = all_reduce_i64(&comm, comm.rank() as i64, ReduceOp::Max, TAG).unwrap();
            let sm = all_reduce_i64(&comm, comm.rank() as i64, ReduceOp::Sum, TAG).unwrap();
            vec![buf[0], buf[1], mx, sm]
        });
        for got in results {
            assert_eq!(got, vec![41, 42, 2, 3]);
        }
    }
}
