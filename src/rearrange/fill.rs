//! Fill detection: does the union of every rank's map cover the global
//! array, or must the writer supply fill values for the gaps?

use log::debug;

use crate::comm::collective::{all_reduce_i64, ReduceOp};
use crate::comm::{tags, Communicator};
use crate::decomp::iodesc::{IoDesc, Rearranger};
use crate::decomp::iosystem::IoSystem;
use crate::error::RearrangeError;

/// Decide whether the decomposition leaves global elements uncovered.
///
/// Sums the mapped-element counts across the union communicator and
/// compares against the global array size. Collective; every rank must
/// call it and every rank learns the answer.
pub fn determine_fill<C: Communicator>(
    ios: &IoSystem<C>,
    iodesc: &mut IoDesc<C>,
    gdimlen: &[usize],
    compmap: &[i64],
) -> Result<(), RearrangeError> {
    let totalgridsize: i64 = gdimlen.iter().map(|&g| g as i64).product();

    // The subset rearranger has already funneled each group's counts to
    // its I/O task, so the I/O buffer lengths alone sum to the mapped
    // total. For box, each rank counts its own map.
    let local: i64 = match iodesc.rearranger {
        Rearranger::Subset => iodesc.llen as i64,
        Rearranger::Box => compmap.iter().filter(|&&m| m > 0).count() as i64,
    };

    let total = all_reduce_i64(&ios.union_comm, local, ReduceOp::Sum, tags::REDUCE)?;
    iodesc.needs_fill = total < totalgridsize;
    debug!(
        "fill check: {total} of {totalgridsize} elements mapped, needs_fill {}",
        iodesc.needs_fill
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{NoComm, RearrOpts};

    #[test]
    fn full_coverage_needs_no_fill() {
        let ios = IoSystem::init_intracomm(NoComm, 1, 1, 0, Rearranger::Box).unwrap();
        let mut iodesc = IoDesc::new(1, vec![4], Rearranger::Box, RearrOpts::default());
        iodesc.ndof = 4;
        determine_fill(&ios, &mut iodesc, &[4], &[1, 2, 3, 4]).unwrap();
        assert!(!iodesc.needs_fill);
    }

    #[test]
    fn holes_need_fill() {
        let ios = IoSystem::init_intracomm(NoComm, 1, 1, 0, Rearranger::Box).unwrap();
        let mut iodesc = IoDesc::new(1, vec![4], Rearranger::Box, RearrOpts::default());
        iodesc.ndof = 4;
        determine_fill(&ios, &mut iodesc, &[4], &[1, 0, 3, 4]).unwrap();
        assert!(iodesc.needs_fill);
    }

    #[test]
    fn subset_counts_io_lengths() {
        let ios = IoSystem::init_intracomm(NoComm, 1, 1, 0, Rearranger::Subset).unwrap();
        let mut iodesc = IoDesc::new(1, vec![4], Rearranger::Subset, RearrOpts::default());
        iodesc.llen = 4;
        determine_fill(&ios, &mut iodesc, &[4], &[]).unwrap();
        assert!(!iodesc.needs_fill);
    }
}
