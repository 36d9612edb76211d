//! The subset rearranger: the ranks split into groups of one I/O task
//! plus the compute tasks it serves, and each group's I/O decomposition
//! is the sorted union of its members' maps.

use log::{debug, trace};

use crate::comm::collective::{all_reduce_i64, gather, gatherv, scatterv, ReduceOp};
use crate::comm::{tags, CommTag, Communicator};
use crate::decomp::iodesc::{compute_max_io_buffer_size, IoDesc};
use crate::decomp::iosystem::IoSystem;
use crate::decomp::region::find_all_regions;
use crate::error::RearrangeError;
use crate::rearrange::fill::determine_fill;

/// One gathered map element on an I/O task, keyed for the sort into
/// global order.
#[derive(Clone, Copy, Debug)]
struct MapSort {
    /// Group rank of the sender.
    rfrom: usize,
    /// Element's position in the sender's local array.
    soffset: i64,
    /// Element's 1-based global flat offset.
    iomap: i64,
}

/// Split the union communicator into subset groups: each I/O task is
/// rank 0 of its group and the compute tasks divide evenly among groups.
fn default_subset_partition<C: Communicator>(
    ios: &IoSystem<C>,
) -> Result<C, RearrangeError> {
    let (color, key) = if let Some(io_rank) = ios.io_rank {
        (io_rank, 0)
    } else {
        let taskratio = (ios.num_comptasks / ios.num_iotasks).max(1);
        let key = (ios.comp_rank % taskratio + 1).max(1);
        let color = (ios.comp_rank / taskratio).min(ios.num_iotasks - 1);
        (color, key)
    };
    trace!("subset partition: rank {} color {color} key {key}", ios.union_rank);
    ios.union_comm.split(color, key)
}

/// Build the subset exchange schedule.
///
/// Collective over the union communicator. Each group's I/O task gathers
/// its members' maps, sorts the union into global order, and derives the
/// receive schedule from the sort; the compute tasks get their send
/// indices back reordered to match. When the union of all maps leaves
/// holes in the global array, the I/O tasks also agree on a partition of
/// the uncovered offsets so fill values can be written.
pub fn subset_rearrange_create<C: Communicator>(
    ios: &IoSystem<C>,
    compmap: &[i64],
    gdimlen: &[usize],
    iodesc: &mut IoDesc<C>,
) -> Result<(), RearrangeError> {
    let sub = default_subset_partition(ios)?;
    let rank = sub.rank();
    let ntasks = sub.size();
    debug_assert!(!ios.ioproc || rank == 0, "I/O task must lead its group");
    debug!(
        "subset create: rank {} is group rank {rank}/{ntasks}",
        ios.union_rank
    );

    iodesc.ndof = compmap.len();
    let totalgridsize: i64 = gdimlen.iter().map(|&g| g as i64).product();

    // Send side: the mapped elements, in local order.
    let scount0 = compmap.iter().filter(|&&m| m > 0).count();
    iodesc.scount = vec![scount0];
    iodesc.sindex = compmap
        .iter()
        .enumerate()
        .filter(|&(_, &m)| m > 0)
        .map(|(i, _)| i as i64)
        .collect();

    // The group's I/O task learns each member's count and total length.
    let rcount = gather(&sub, 0, &[scount0 as i64], tags::GATHER)?
        .map(|counts| counts.into_iter().map(|c| c as usize).collect::<Vec<_>>());
    if let Some(rc) = &rcount {
        iodesc.rcount = rc.clone();
        iodesc.llen = rc.iter().sum();
    }

    determine_fill(ios, iodesc, gdimlen, compmap)?;

    // Gather local source indices and the hole-free map.
    let recvcounts = rcount.as_deref();
    let srcindex = gatherv(&sub, 0, &iodesc.sindex, recvcounts, tags::GATHER)?;
    let shrtmap: Vec<i64> = compmap.iter().copied().filter(|&m| m > 0).collect();
    let gathered_map = gatherv(&sub, 0, &shrtmap, recvcounts, CommTag(tags::GATHER.base() + 1))?;

    // Sort the union of maps into global order; the sort is the
    // transpose between arrival order and I/O order.
    let mut iomap = Vec::new();
    let mut srcindex_sorted = srcindex.clone().unwrap_or_default();
    if ios.ioproc && iodesc.llen > 0 {
        let srcindex = srcindex.as_ref().ok_or_else(|| {
            RearrangeError::InvalidDecomp("subset gather missing source indices".into())
        })?;
        let gathered_map = gathered_map.as_ref().ok_or_else(|| {
            RearrangeError::InvalidDecomp("subset gather missing map".into())
        })?;
        let rcount = iodesc.rcount.clone();

        let mut map: Vec<MapSort> = Vec::with_capacity(iodesc.llen);
        let mut pos = 0;
        for (i, &cnt) in rcount.iter().enumerate() {
            for j in 0..cnt {
                map.push(MapSort {
                    rfrom: i,
                    soffset: srcindex[pos + j],
                    iomap: gathered_map[pos + j],
                });
            }
            pos += cnt;
        }
        map.sort_by_key(|m| m.iomap);

        // Receive order now equals I/O-buffer order, so the receive
        // index is the identity; each element remembers its sender and
        // the senders' indices regroup to the sorted order.
        let mut rdispls = vec![0usize; ntasks];
        for i in 1..ntasks {
            rdispls[i] = rdispls[i - 1] + rcount[i - 1];
        }
        iodesc.rfrom = Vec::with_capacity(iodesc.llen);
        iodesc.rindex = Vec::with_capacity(iodesc.llen);
        iomap = Vec::with_capacity(iodesc.llen);
        let mut cnt = rdispls;
        for (i, m) in map.iter().enumerate() {
            iodesc.rfrom.push(m.rfrom);
            iodesc.rindex.push(i as i64);
            iomap.push(m.iomap);
            srcindex_sorted[cnt[m.rfrom]] = m.soffset;
            cnt[m.rfrom] += 1;
        }
    }

    // Partition the uncovered offsets among the I/O tasks.
    if ios.ioproc && iodesc.needs_fill {
        let io_comm = ios.io_comm.as_ref().ok_or_else(|| {
            RearrangeError::InvalidDecomp("I/O rank without I/O communicator".into())
        })?;
        let niotasks = ios.num_iotasks;
        let io_rank = ios.io_rank.unwrap_or(0);

        // Carve the 1-based offset space into one contiguous range per
        // I/O task, the remainder going to the last tasks.
        let base = totalgridsize / niotasks as i64;
        let xtra = (totalgridsize - base * niotasks as i64) as usize;
        let mut gridmin = vec![0i64; niotasks];
        let mut gridmax = vec![0i64; niotasks];
        let mut next = 1i64;
        for nio in 0..niotasks {
            let mut size = base;
            if nio >= niotasks - xtra {
                size += 1;
            }
            gridmin[nio] = next;
            gridmax[nio] = next + size - 1;
            next += size;
        }

        // Every I/O task reports which offsets in each range it covers;
        // the range's owner collects them.
        let mut myusegrid = None;
        for nio in 0..niotasks {
            // iomap is sorted, so the covered entries form one run.
            let lo = iomap.partition_point(|&v| v < gridmin[nio]);
            let hi = iomap.partition_point(|&v| v <= gridmax[nio]);
            let mine = &iomap[lo..hi];

            let gcnt = gather(io_comm, nio, &[mine.len() as i64], tags::GATHER)?
                .map(|c| c.into_iter().map(|c| c as usize).collect::<Vec<_>>());
            let gathered = gatherv(
                io_comm,
                nio,
                mine,
                gcnt.as_deref(),
                CommTag(tags::GATHER.base() + 1),
            )?;
            if nio == io_rank {
                myusegrid = gathered;
            }
        }

        let gridmin = gridmin[io_rank];
        let gridsize = (gridmax[io_rank] - gridmin + 1) as usize;
        let mut grid = vec![false; gridsize];
        let mut covered = 0usize;
        for &v in myusegrid.as_deref().unwrap_or(&[]) {
            let j = (v - gridmin) as usize;
            if grid[j] {
                return Err(RearrangeError::DuplicateOffset { offset: v });
            }
            grid[j] = true;
            covered += 1;
        }

        iodesc.holegridsize = gridsize - covered;
        let myfillgrid: Vec<i64> = grid
            .iter()
            .enumerate()
            .filter(|&(_, &used)| !used)
            .map(|(i, _)| gridmin + i as i64)
            .collect();
        debug_assert_eq!(myfillgrid.len(), iodesc.holegridsize);

        let mut maxfillregions = 0;
        if !myfillgrid.is_empty() {
            (iodesc.fill_regions, maxfillregions) = find_all_regions(gdimlen, &myfillgrid);
        }
        iodesc.maxfillregions =
            all_reduce_i64(io_comm, maxfillregions as i64, ReduceOp::Max, tags::REDUCE)? as usize;
        iodesc.maxholegridsize = all_reduce_i64(
            io_comm,
            iodesc.holegridsize as i64,
            ReduceOp::Max,
            CommTag(tags::REDUCE.base() + 1),
        )? as usize;
    }

    // Hand each compute task back its send indices, reordered so packed
    // messages arrive pre-sorted.
    let parts = ios
        .ioproc
        .then(|| (srcindex_sorted.as_slice(), iodesc.rcount.as_slice()));
    iodesc.sindex = scatterv(&sub, 0, parts, scount0, tags::SCATTER)?;

    if ios.ioproc {
        let io_comm = ios.io_comm.as_ref().ok_or_else(|| {
            RearrangeError::InvalidDecomp("I/O rank without I/O communicator".into())
        })?;
        let (regions, maxregions) = find_all_regions(gdimlen, &iomap);
        iodesc.regions = regions;
        iodesc.maxregions = all_reduce_i64(
            io_comm,
            maxregions as i64,
            ReduceOp::Max,
            CommTag(tags::REDUCE.base() + 2),
        )? as usize;
        iodesc.nrecvs = ntasks;
        compute_max_io_buffer_size(io_comm, iodesc)?;
    }

    iodesc.subset_comm = Some(sub);
    Ok(())
}
