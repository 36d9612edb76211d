//! The decomposition descriptor: everything one mapping of local arrays
//! onto the global array needs to move data between compute and I/O
//! ranks.

use crate::comm::{Communicator, RearrOpts};
use crate::decomp::region::Region;
use crate::error::RearrangeError;
use crate::rearrange::datatypes::IndexedBlock;

/// Which exchange strategy a decomposition uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rearranger {
    /// Any compute rank may exchange with any I/O rank; I/O regions are
    /// rectangular boxes of the global array.
    Box,
    /// Each compute rank exchanges with exactly one I/O rank; the I/O
    /// decomposition is derived from the union of that group's maps.
    Subset,
}

/// One decomposition of a global array across the compute ranks, plus
/// the exchange schedule the rearranger built for it.
///
/// Counts and indices come in send/receive pairs: on a compute rank the
/// send side faces the I/O tasks, and on an I/O rank the receive side
/// faces the compute tasks that feed it.
pub struct IoDesc<C: Communicator> {
    pub rearranger: Rearranger,
    pub ndims: usize,
    pub gdimlen: Vec<usize>,
    /// Local array length on this compute rank (mapped or not).
    pub ndof: usize,
    /// I/O buffer length on this I/O rank; 0 on non-I/O ranks.
    pub llen: usize,
    /// Maximal hyperslabs of this rank's I/O portion.
    pub regions: Vec<Region>,
    /// Max region count over the I/O group.
    pub maxregions: usize,
    /// True when the union of all maps leaves global elements uncovered.
    pub needs_fill: bool,
    /// Hyperslabs of the uncovered elements this I/O rank owns (subset
    /// rearranger only).
    pub fill_regions: Vec<Region>,
    pub maxfillregions: usize,
    pub holegridsize: usize,
    pub maxholegridsize: usize,
    /// Max I/O buffer length over the I/O group.
    pub maxiobuflen: usize,
    /// Number of messages an I/O rank receives in a compute-to-I/O pass.
    pub nrecvs: usize,
    /// I/O tasks that actually received data in the default partition.
    pub num_aiotasks: usize,
    /// Elements this compute rank sends to each I/O task.
    pub scount: Vec<usize>,
    /// Elements received in each incoming message (compacted, I/O side).
    pub rcount: Vec<usize>,
    /// Box: the sender of each incoming message, one entry per message.
    /// Subset: the sending group rank of each element of the sorted I/O
    /// map, one entry per element.
    pub rfrom: Vec<usize>,
    /// Local source offsets, grouped by destination I/O task.
    pub sindex: Vec<i64>,
    /// Destination offsets into the I/O buffer, one run per message.
    pub rindex: Vec<i64>,
    /// Packing plans for the send side, built lazily per message.
    pub stype: Option<Vec<Option<IndexedBlock>>>,
    /// Packing plans for the receive side.
    pub rtype: Option<Vec<Option<IndexedBlock>>>,
    /// Subset rearranger only: the group of one I/O task plus its
    /// compute tasks.
    pub subset_comm: Option<C>,
    pub rearr_opts: RearrOpts,
}

impl<C: Communicator> IoDesc<C> {
    pub fn new(ndims: usize, gdimlen: Vec<usize>, rearranger: Rearranger, rearr_opts: RearrOpts) -> Self {
        debug_assert_eq!(ndims, gdimlen.len());
        Self {
            rearranger,
            ndims,
            gdimlen,
            ndof: 0,
            llen: 0,
            regions: Vec::new(),
            maxregions: 0,
            needs_fill: false,
            fill_regions: Vec::new(),
            maxfillregions: 0,
            holegridsize: 0,
            maxholegridsize: 0,
            maxiobuflen: 0,
            nrecvs: 0,
            num_aiotasks: 0,
            scount: Vec::new(),
            rcount: Vec::new(),
            rfrom: Vec::new(),
            sindex: Vec::new(),
            rindex: Vec::new(),
            stype: None,
            rtype: None,
            subset_comm: None,
            rearr_opts,
        }
    }

    /// Total global array length.
    pub fn gridsize(&self) -> usize {
        self.gdimlen.iter().product()
    }

    /// Drop any built packing plans; the next transpose rebuilds them.
    pub fn clear_exchange_types(&mut self) {
        self.stype = None;
        self.rtype = None;
    }
}

/// Max-reduce each I/O rank's buffer length over the I/O communicator so
/// that collective writes can size a shared staging buffer once.
///
/// Collective over `io_comm`; call on I/O ranks only.
pub fn compute_max_io_buffer_size<C: Communicator>(
    io_comm: &C,
    iodesc: &mut IoDesc<C>,
) -> Result<(), RearrangeError> {
    use crate::comm::collective::{all_reduce_i64, ReduceOp};
    use crate::comm::tags;

    let totiosize: i64 = iodesc
        .regions
        .iter()
        .map(|r| r.len() as i64)
        .sum();

    let maxsize = all_reduce_i64(io_comm, totiosize, ReduceOp::Max, tags::REDUCE)?;
    if maxsize <= 0 {
        return Err(RearrangeError::InvalidDecomp(
            "decomposition maps no data to any I/O task".into(),
        ));
    }
    iodesc.maxiobuflen = maxsize as usize;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::decomp::region::find_all_regions;

    #[test]
    fn new_descriptor_is_inert() {
        let iodesc: IoDesc<NoComm> =
            IoDesc::new(2, vec![4, 3], Rearranger::Box, RearrOpts::default());
        assert_eq!(iodesc.gridsize(), 12);
        assert_eq!(iodesc.llen, 0);
        assert!(iodesc.stype.is_none() && iodesc.rtype.is_none());
    }

    #[test]
    fn max_buffer_size_single_rank() {
        let mut iodesc: IoDesc<NoComm> =
            IoDesc::new(1, vec![8], Rearranger::Box, RearrOpts::default());
        let map: Vec<i64> = (1..=6).collect();
        (iodesc.regions, iodesc.maxregions) = find_all_regions(&[8], &map);
        compute_max_io_buffer_size(&NoComm, &mut iodesc).unwrap();
        assert_eq!(iodesc.maxiobuflen, 6);
    }

    #[test]
    fn max_buffer_size_rejects_empty() {
        let mut iodesc: IoDesc<NoComm> =
            IoDesc::new(1, vec![8], Rearranger::Box, RearrOpts::default());
        assert!(compute_max_io_buffer_size(&NoComm, &mut iodesc).is_err());
    }
}
