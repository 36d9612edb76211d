//! Generalized all-to-all with flow control, modeled after the
//! spmd_utils exchange in the Community Atmosphere Model family of codes.
//!
//! Every peer pair may carry a different element count in each direction;
//! a zero count means no message at all. With `max_pending_reqs == 0` the
//! exchange posts everything at once; otherwise peers are visited in the
//! classic XOR-pairing order in windows of bounded size, optionally
//! preceded by a handshake token so a sender never overruns a receiver
//! that has not posted its buffer yet.
//!
//! Flow control changes message pipelining only; the element-to-slot
//! mapping carried in the payloads is fixed before the exchange starts.

use bytemuck::Pod;
use log::trace;

use crate::comm::communicator::{CommTag, Communicator, Wait};
use crate::error::RearrangeError;

/// Tuning knobs for one exchange direction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowControl {
    /// Wait for a ready token from each receiver before sending to it.
    pub handshake: bool,
    /// Let sends complete lazily at the end of each window instead of
    /// waiting for each one as it is posted.
    pub isend: bool,
    /// Bound on simultaneously outstanding peers; 0 disables throttling.
    pub max_pending_reqs: usize,
}

/// Per-decomposition flow-control settings, one per transfer direction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RearrOpts {
    pub comp2io: FlowControl,
    pub io2comp: FlowControl,
}

/// Smallest power of two >= `i`.
fn ceil2(i: usize) -> usize {
    let mut p = 1;
    while p < i {
        p *= 2;
    }
    p
}

/// XOR pairing: the peer this rank exchanges with at `step`, if valid.
fn pair(ntasks: usize, step: usize, rank: usize) -> Option<usize> {
    let q = (step + 1) ^ rank;
    (q <= ntasks - 1).then_some(q)
}

/// Exchange `sends[p]` with every peer `p`, expecting `recv_counts[p]`
/// elements back from each. Returns the received payloads in peer order;
/// peers with a zero expected count yield an empty vector.
///
/// Counts must be globally consistent: `p` expects from us exactly what we
/// send to `p`. The rearrangers guarantee this by construction.
pub fn swapm<C: Communicator, T: Pod>(
    comm: &C,
    sends: &[Vec<T>],
    recv_counts: &[usize],
    fc: &FlowControl,
    tag: CommTag,
) -> Result<Vec<Vec<T>>, RearrangeError> {
    let ntasks = comm.size();
    let me = comm.rank();
    assert_eq!(sends.len(), ntasks, "one send buffer per peer");
    assert_eq!(recv_counts.len(), ntasks, "one receive count per peer");
    trace!(
        "swapm rank {me}/{ntasks} hs={} isend={} max_pend={}",
        fc.handshake, fc.isend, fc.max_pending_reqs
    );

    let elem = std::mem::size_of::<T>();
    let mut out: Vec<Vec<T>> = (0..ntasks).map(|_| Vec::new()).collect();

    // Exchange with self is a local copy.
    if recv_counts[me] > 0 || !sends[me].is_empty() {
        assert_eq!(
            sends[me].len(),
            recv_counts[me],
            "self-exchange counts disagree"
        );
        out[me] = sends[me].clone();
    }
    if ntasks == 1 {
        return Ok(out);
    }

    if fc.max_pending_reqs == 0 {
        // Unthrottled: post every receive, then every send, then drain.
        let mut recvs = Vec::new();
        for peer in 0..ntasks {
            if peer != me && recv_counts[peer] > 0 {
                let mut scratch = vec![0u8; recv_counts[peer] * elem];
                recvs.push((peer, comm.irecv(peer, tag.base(), &mut scratch)));
            }
        }
        let mut pending = Vec::new();
        for peer in 0..ntasks {
            if peer != me && !sends[peer].is_empty() {
                pending.push(comm.isend(peer, tag.base(), bytemuck::cast_slice(&sends[peer])));
            }
        }
        let mut maybe_err = None;
        for (peer, handle) in recvs {
            match complete_recv(handle, peer, recv_counts[peer]) {
                Ok(data) => out[peer] = data,
                Err(e) if maybe_err.is_none() => maybe_err = Some(e),
                Err(_) => {}
            }
        }
        for send in pending {
            let _ = send.wait();
        }
        return match maybe_err {
            Some(e) => Err(e),
            None => Ok(out),
        };
    }

    // Throttled: visit peers in XOR-pairing order, a window at a time.
    // The pairing is symmetric per step, so mutually-communicating ranks
    // walk their windows in lockstep and handshake tokens are always
    // posted before anyone blocks on one.
    let mut swapids = Vec::new();
    for step in 0..ceil2(ntasks) - 1 {
        if let Some(p) = pair(ntasks, step, me)
            && (!sends[p].is_empty() || recv_counts[p] > 0)
        {
            swapids.push(p);
        }
    }
    let window = fc.max_pending_reqs.max(1);

    for chunk in swapids.chunks(window) {
        let mut recvs = Vec::new();
        let mut hs_tokens = Vec::new();
        for &p in chunk {
            if recv_counts[p] > 0 {
                let mut scratch = vec![0u8; recv_counts[p] * elem];
                recvs.push((p, comm.irecv(p, tag.base(), &mut scratch)));
                if fc.handshake {
                    hs_tokens.push(comm.isend(p, tag.offset(1), &[]));
                }
            }
        }
        let mut pending = Vec::new();
        for &p in chunk {
            if !sends[p].is_empty() {
                if fc.handshake {
                    let mut token = [0u8; 0];
                    let ready = comm.irecv(p, tag.offset(1), &mut token);
                    if ready.wait().is_none() {
                        return Err(RearrangeError::comm(p, "handshake token lost"));
                    }
                }
                let handle = comm.isend(p, tag.base(), bytemuck::cast_slice(&sends[p]));
                if fc.isend {
                    pending.push(handle);
                } else {
                    let _ = handle.wait();
                }
            }
        }
        for token in hs_tokens {
            let _ = token.wait();
        }
        for send in pending {
            let _ = send.wait();
        }
        for (p, handle) in recvs {
            out[p] = complete_recv(handle, p, recv_counts[p])?;
        }
    }

    Ok(out)
}

fn complete_recv<H: Wait, T: Pod>(
    handle: H,
    peer: usize,
    count: usize,
) -> Result<Vec<T>, RearrangeError> {
    let expected = count * std::mem::size_of::<T>();
    match handle.wait() {
        Some(data) if data.len() == expected => {
            let mut out = vec![T::zeroed(); count];
            bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&data);
            Ok(out)
        }
        Some(data) => Err(RearrangeError::comm(
            peer,
            format!("expected {expected} bytes, got {}", data.len()),
        )),
        None => Err(RearrangeError::comm(peer, "receive returned no data")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::CommTag;
    use crate::comm::local::LocalComm;

    const TAG: CommTag = CommTag(0x5000);

    #[test]
    fn ceil2_and_pair() {
        assert_eq!(ceil2(1), 1);
        assert_eq!(ceil2(3), 4);
        assert_eq!(ceil2(4), 4);
        assert_eq!(ceil2(5), 8);
        // 4 ranks: rank 0 meets 1, 2, 3 across the steps.
        let mut partners: Vec<_> = (0..3).filter_map(|s| pair(4, s, 0)).collect();
        partners.sort_unstable();
        assert_eq!(partners, vec![1, 2, 3]);
    }

    fn exchange_everybody(fc: FlowControl) {
        let handles: Vec<_> = LocalComm::universe(4)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let me = comm.rank() as i64;
                    // Rank r sends [r, p] to every peer p, including itself.
                    let sends: Vec<Vec<i64>> =
                        (0..4).map(|p| vec![me, p as i64]).collect();
                    let recv_counts = vec![2usize; 4];
                    let got = swapm(&comm, &sends, &recv_counts, &fc, TAG).unwrap();
                    for (p, payload) in got.iter().enumerate() {
                        assert_eq!(payload, &vec![p as i64, me]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn unthrottled_exchange() {
        exchange_everybody(FlowControl::default());
    }

    #[test]
    fn throttled_exchange_with_handshake() {
        exchange_everybody(FlowControl {
            handshake: true,
            isend: true,
            max_pending_reqs: 2,
        });
    }

    #[test]
    fn sparse_exchange() {
        // Only rank 0 receives; ranks 1..3 each send one element to 0.
        let handles: Vec<_> = LocalComm::universe(4)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let me = comm.rank();
                    let mut sends: Vec<Vec<i64>> = vec![Vec::new(); 4];
                    let mut recv_counts = vec![0usize; 4];
                    if me != 0 {
                        sends[0] = vec![me as i64 * 100];
                    } else {
                        recv_counts = vec![0, 1, 1, 1];
                    }
                    let fc = FlowControl {
                        handshake: true,
                        isend: false,
                        max_pending_reqs: 1,
                    };
                    let got = swapm(&comm, &sends, &recv_counts, &fc, TAG).unwrap();
                    if me == 0 {
                        assert_eq!(got[1], vec![100]);
                        assert_eq!(got[2], vec![200]);
                        assert_eq!(got[3], vec![300]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
