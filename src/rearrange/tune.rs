//! Flow-control tuning: time the transposes under candidate settings and
//! keep whichever the slowest rank finishes first.

use std::time::Instant;

use log::{debug, info};

use crate::comm::collective::{all_reduce_i64, ReduceOp};
use crate::comm::{tags, CommTag, Communicator, FlowControl, RearrOpts};
use crate::decomp::iodesc::IoDesc;
use crate::decomp::iosystem::IoSystem;
use crate::error::RearrangeError;
use crate::rearrange::transpose::{rearrange_comp2io, rearrange_io2comp};

/// A new setting must beat the incumbent by this factor to be adopted;
/// timing noise is not a reason to change configuration.
const IMPROVEMENT_FACTOR: f64 = 0.95;

fn candidate_settings(ntasks: usize) -> Vec<FlowControl> {
    let mut pendings = vec![0usize, ntasks.next_power_of_two().min(64)];
    pendings.dedup();
    let mut out = Vec::new();
    for &handshake in &[false, true] {
        for &isend in &[false, true] {
            for &max_pending_reqs in &pendings {
                // Throttling without a window is a no-op.
                if (handshake || isend) && max_pending_reqs == 0 {
                    continue;
                }
                out.push(FlowControl {
                    handshake,
                    isend,
                    max_pending_reqs,
                });
            }
        }
    }
    out
}

/// Time `ntrials` round trips of a dummy variable through both
/// transposes under each candidate flow-control setting, agree on the
/// slowest rank's elapsed time, and store the winner on the descriptor.
///
/// Collective over the union communicator. The 5% threshold keeps the
/// default unless a candidate wins clearly.
pub fn performance_tune<C: Communicator>(
    ios: &IoSystem<C>,
    iodesc: &mut IoDesc<C>,
    ntrials: usize,
) -> Result<RearrOpts, RearrangeError> {
    debug_assert!(ntrials > 0);
    let ntasks = ios.num_uniontasks;

    let sbuf = vec![0f64; iodesc.ndof];
    let mut rbuf = vec![0f64; iodesc.llen];
    let mut back = vec![0f64; iodesc.ndof];

    let mut best = iodesc.rearr_opts;
    let mut best_time = i64::MAX;
    for (k, fc) in candidate_settings(ntasks).into_iter().enumerate() {
        iodesc.rearr_opts = RearrOpts {
            comp2io: fc,
            io2comp: fc,
        };

        let start = Instant::now();
        for _ in 0..ntrials {
            rearrange_comp2io(ios, iodesc, &sbuf, &mut rbuf, 1)?;
            rearrange_io2comp(ios, iodesc, &rbuf, &mut back)?;
        }
        let elapsed = start.elapsed().as_nanos() as i64;

        // The schedule is only as fast as its slowest rank.
        let worst = all_reduce_i64(
            &ios.union_comm,
            elapsed,
            ReduceOp::Max,
            CommTag(tags::REDUCE.base() + 3),
        )?;
        debug!("tune candidate {k}: {fc:?} worst {worst} ns");

        if best_time == i64::MAX || (worst as f64) < best_time as f64 * IMPROVEMENT_FACTOR {
            best_time = worst;
            best = iodesc.rearr_opts;
        }
    }

    iodesc.rearr_opts = best;
    info!("tuned flow control: {best:?} ({best_time} ns for {ntrials} trials)");
    Ok(best)
}
