//! The box rearranger: every compute rank may exchange with every I/O
//! rank, and each I/O rank serves one rectangular start/count slab of the
//! global array.

use log::{debug, trace};

use crate::comm::collective::broadcast;
use crate::comm::{swapm, tags, CommTag, Communicator, FlowControl};
use crate::decomp::iodesc::IoDesc;
use crate::decomp::iosystem::IoSystem;
use crate::decomp::region::{coord_to_local_index, idx_to_coords};
use crate::error::RearrangeError;
use crate::rearrange::fill::determine_fill;

/// Exchange per-destination counts and source indices so both sides of
/// the transpose know their schedule.
///
/// On entry each compute rank knows, per local element, which I/O task
/// gets it (`dest_ioproc`, -1 for holes) and at which offset in that
/// task's buffer (`dest_ioindex`). On exit the descriptor carries the
/// send schedule (`scount`/`sindex`) on every rank and the receive
/// schedule (`nrecvs`/`rfrom`/`rcount`/`rindex`) on I/O ranks.
pub(crate) fn compute_counts<C: Communicator>(
    ios: &IoSystem<C>,
    iodesc: &mut IoDesc<C>,
    dest_ioproc: &[i32],
    dest_ioindex: &[i64],
) -> Result<(), RearrangeError> {
    let ntasks = ios.num_uniontasks;
    let niotasks = ios.num_iotasks;
    debug_assert_eq!(dest_ioproc.len(), dest_ioindex.len());

    // Count how many elements this rank sends to each I/O task.
    let mut scount = vec![0usize; niotasks];
    for &p in dest_ioproc {
        if p >= 0 {
            scount[p as usize] += 1;
        }
    }

    // Tell every I/O task its per-sender count. Each rank sends one
    // count to each I/O task; I/O tasks hear from everyone.
    let mut count_sends: Vec<Vec<i64>> = (0..ntasks).map(|_| Vec::new()).collect();
    for (i, &cnt) in scount.iter().enumerate() {
        count_sends[ios.ioranks[i]] = vec![cnt as i64];
    }
    let count_recv_counts = if ios.ioproc {
        vec![1usize; ntasks]
    } else {
        vec![0usize; ntasks]
    };
    let counts_in = swapm(
        &ios.union_comm,
        &count_sends,
        &count_recv_counts,
        &FlowControl::default(),
        tags::REARR_CREATE,
    )?;

    // Compact the nonzero senders into the receive schedule.
    let mut rfrom = Vec::new();
    let mut rcount = Vec::new();
    if ios.ioproc {
        for (sender, msg) in counts_in.iter().enumerate() {
            if msg[0] > 0 {
                rfrom.push(sender);
                rcount.push(msg[0] as usize);
            }
        }
    }
    let nrecvs = rfrom.len();
    trace!("rank {} nrecvs {} rcount {:?}", ios.union_rank, nrecvs, rcount);

    // Group local element indices by destination I/O task, mirroring the
    // order their destination offsets travel in.
    let numsend: usize = scount.iter().sum();
    let mut spos = vec![0usize; niotasks];
    for i in 1..niotasks {
        spos[i] = spos[i - 1] + scount[i - 1];
    }
    let mut sindex = vec![0i64; numsend];
    let mut s2rindex = vec![0i64; numsend];
    let mut fill = vec![0usize; niotasks];
    for (k, (&p, &lidx)) in dest_ioproc.iter().zip(dest_ioindex).enumerate() {
        if p >= 0 {
            let p = p as usize;
            sindex[spos[p] + fill[p]] = k as i64;
            s2rindex[spos[p] + fill[p]] = lidx;
            fill[p] += 1;
        }
    }

    // Ship each I/O task the destination offsets of the elements it will
    // receive; concatenated in sender order they form the receive index.
    let mut index_sends: Vec<Vec<i64>> = (0..ntasks).map(|_| Vec::new()).collect();
    for i in 0..niotasks {
        index_sends[ios.ioranks[i]] = s2rindex[spos[i]..spos[i] + scount[i]].to_vec();
    }
    let mut index_recv_counts = vec![0usize; ntasks];
    for (&sender, &cnt) in rfrom.iter().zip(&rcount) {
        index_recv_counts[sender] = cnt;
    }
    let index_in = swapm(
        &ios.union_comm,
        &index_sends,
        &index_recv_counts,
        &FlowControl::default(),
        CommTag(tags::REARR_CREATE.base() + 2),
    )?;

    let mut rindex = Vec::new();
    for &sender in &rfrom {
        rindex.extend_from_slice(&index_in[sender]);
    }

    iodesc.scount = scount;
    iodesc.sindex = sindex;
    iodesc.nrecvs = nrecvs;
    iodesc.rfrom = rfrom;
    iodesc.rcount = rcount;
    iodesc.rindex = rindex;
    Ok(())
}

/// Build the box exchange schedule.
///
/// Each I/O task's slab must already sit in `iodesc.regions` on that
/// task (empty on inactive tasks). The slabs are broadcast so every
/// compute rank can place each of its elements in the first slab that
/// contains it; an element no slab contains is an error.
pub fn box_rearrange_create<C: Communicator>(
    ios: &IoSystem<C>,
    compmap: &[i64],
    gdimlen: &[usize],
    iodesc: &mut IoDesc<C>,
) -> Result<(), RearrangeError> {
    let ndims = gdimlen.len();
    let niotasks = ios.num_iotasks;
    iodesc.ndof = compmap.len();
    debug!(
        "box create: rank {} maplen {} over {} I/O tasks",
        ios.union_rank,
        compmap.len(),
        niotasks
    );

    if ios.ioproc {
        iodesc.llen = iodesc.regions.first().map_or(0, |r| r.len());
    }

    determine_fill(ios, iodesc, gdimlen, compmap)?;

    // Every rank learns every I/O task's slab.
    let mut starts = vec![vec![0i64; ndims]; niotasks];
    let mut counts = vec![vec![0i64; ndims]; niotasks];
    for i in 0..niotasks {
        let root = ios.ioranks[i];
        let mut buf = vec![0i64; 2 * ndims];
        if ios.union_rank == root {
            if let Some(r) = iodesc.regions.first() {
                buf[..ndims].copy_from_slice(&r.start);
                buf[ndims..].copy_from_slice(&r.count);
            }
        }
        broadcast(&ios.union_comm, root, &mut buf, tags::BCAST)?;
        starts[i].copy_from_slice(&buf[..ndims]);
        counts[i].copy_from_slice(&buf[ndims..]);
    }

    // Place each mapped element in the first slab containing its global
    // coordinate.
    let mut dest_ioproc = vec![-1i32; compmap.len()];
    let mut dest_ioindex = vec![-1i64; compmap.len()];
    let mut gcoord = vec![0i64; ndims];
    let mut lcoord = vec![0i64; ndims];
    for (k, &offset) in compmap.iter().enumerate() {
        if offset <= 0 {
            continue;
        }
        idx_to_coords(gdimlen, offset - 1, &mut gcoord);
        let mut found = false;
        'tasks: for i in 0..niotasks {
            for d in 0..ndims {
                if gcoord[d] < starts[i][d] || gcoord[d] >= starts[i][d] + counts[i][d] {
                    continue 'tasks;
                }
            }
            for d in 0..ndims {
                lcoord[d] = gcoord[d] - starts[i][d];
            }
            dest_ioproc[k] = i as i32;
            dest_ioindex[k] = coord_to_local_index(&lcoord, &counts[i]);
            found = true;
            break;
        }
        if !found {
            return Err(RearrangeError::UnmappedElement { index: k, offset });
        }
    }

    compute_counts(ios, iodesc, &dest_ioproc, &dest_ioindex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, NoComm, RearrOpts};
    use crate::decomp::iodesc::Rearranger;
    use crate::decomp::region::Region;
    use std::thread;

    fn slab(start: Vec<i64>, count: Vec<i64>) -> Region {
        Region {
            start,
            count,
            loffset: 0,
        }
    }

    #[test]
    fn single_rank_identity() {
        let ios = IoSystem::init_intracomm(NoComm, 1, 1, 0, Rearranger::Box).unwrap();
        let mut iodesc = IoDesc::new(1, vec![4], Rearranger::Box, RearrOpts::default());
        iodesc.regions = vec![slab(vec![0], vec![4])];
        let compmap = vec![1i64, 2, 3, 4];
        box_rearrange_create(&ios, &compmap, &[4], &mut iodesc).unwrap();

        assert_eq!(iodesc.llen, 4);
        assert_eq!(iodesc.scount, vec![4]);
        assert_eq!(iodesc.nrecvs, 1);
        assert_eq!(iodesc.rcount, vec![4]);
        assert_eq!(iodesc.rfrom, vec![0]);
        assert_eq!(iodesc.rindex, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unmapped_element_is_an_error() {
        let ios = IoSystem::init_intracomm(NoComm, 1, 1, 0, Rearranger::Box).unwrap();
        let mut iodesc = IoDesc::new(1, vec![8], Rearranger::Box, RearrOpts::default());
        iodesc.regions = vec![slab(vec![0], vec![4])];
        // Offset 6 lies outside the only slab [0, 4).
        let err = box_rearrange_create(&ios, &[1, 6], &[8], &mut iodesc).unwrap_err();
        assert!(matches!(
            err,
            RearrangeError::UnmappedElement { index: 1, offset: 6 }
        ));
    }

    #[test]
    fn four_ranks_one_io_task() {
        // Four ranks each own one element; rank 0 is the I/O task with
        // the whole array.
        let handles: Vec<_> = LocalComm::universe(4)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank();
                    let ios = IoSystem::init_intracomm(comm, 1, 1, 0, Rearranger::Box).unwrap();
                    let mut iodesc =
                        IoDesc::new(1, vec![4], Rearranger::Box, RearrOpts::default());
                    if ios.ioproc {
                        iodesc.regions = vec![slab(vec![0], vec![4])];
                    }
                    let compmap = vec![(rank + 1) as i64];
                    box_rearrange_create(&ios, &compmap, &[4], &mut iodesc).unwrap();

                    assert_eq!(iodesc.scount, vec![1]);
                    assert_eq!(iodesc.sindex, vec![0]);
                    if rank == 0 {
                        assert_eq!(iodesc.llen, 4);
                        assert_eq!(iodesc.nrecvs, 4);
                        assert_eq!(iodesc.rfrom, vec![0, 1, 2, 3]);
                        assert_eq!(iodesc.rcount, vec![1, 1, 1, 1]);
                        assert_eq!(iodesc.rindex, vec![0, 1, 2, 3]);
                    } else {
                        assert_eq!(iodesc.nrecvs, 0);
                        assert_eq!(iodesc.llen, 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn overlapping_slabs_first_match_wins() {
        // Two I/O tasks with overlapping slabs on 4 ranks; elements in
        // the overlap all land on task 0.
        let handles: Vec<_> = LocalComm::universe(4)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank();
                    let ios = IoSystem::init_intracomm(comm, 2, 2, 0, Rearranger::Box).unwrap();
                    let mut iodesc =
                        IoDesc::new(1, vec![8], Rearranger::Box, RearrOpts::default());
                    if rank == 0 {
                        iodesc.regions = vec![slab(vec![0], vec![6])];
                    } else if rank == 2 {
                        iodesc.regions = vec![slab(vec![4], vec![4])];
                    }
                    let compmap = vec![(2 * rank + 1) as i64, (2 * rank + 2) as i64];
                    box_rearrange_create(&ios, &compmap, &[8], &mut iodesc).unwrap();

                    // Offsets 1..=6 go to task 0 (ranks 0..2 and half the
                    // overlap), 7..=8 to task 1.
                    match rank {
                        0 | 1 => assert_eq!(iodesc.scount, vec![2, 0]),
                        2 => assert_eq!(iodesc.scount, vec![2, 0]),
                        _ => assert_eq!(iodesc.scount, vec![0, 2]),
                    }
                    if rank == 0 {
                        assert_eq!(iodesc.nrecvs, 3);
                        assert_eq!(iodesc.rfrom, vec![0, 1, 2]);
                    }
                    if rank == 2 {
                        assert_eq!(iodesc.nrecvs, 1);
                        assert_eq!(iodesc.rfrom, vec![3]);
                        assert_eq!(iodesc.rindex, vec![2, 3]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
