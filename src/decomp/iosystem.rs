//! The I/O system: which ranks of a communicator act as I/O tasks, and
//! the sub-communicator that groups them.

use log::info;

use crate::comm::{Communicator, RearrOpts};
use crate::decomp::iodesc::Rearranger;
use crate::error::RearrangeError;

/// State shared by every decomposition created on one communicator: the
/// union communicator, the I/O task subset and its own communicator, and
/// this process's roles within both.
///
/// In intracomm mode every rank is a compute task and a chosen subset
/// also serves I/O, so the union, compute, and I/O task sets all live on
/// the one communicator.
pub struct IoSystem<C: Communicator> {
    /// All participating ranks.
    pub union_comm: C,
    /// Communicator over the I/O tasks only; `None` on non-I/O ranks.
    pub io_comm: Option<C>,
    pub num_iotasks: usize,
    pub num_comptasks: usize,
    pub num_uniontasks: usize,
    /// Union ranks of the I/O tasks, in I/O-rank order.
    pub ioranks: Vec<usize>,
    pub union_rank: usize,
    pub comp_rank: usize,
    /// This rank's index within `ioranks`, if it is an I/O task.
    pub io_rank: Option<usize>,
    pub ioproc: bool,
    /// Union rank of I/O task 0.
    pub ioroot: usize,
    pub default_rearranger: Rearranger,
    pub rearr_opts: RearrOpts,
}

impl<C: Communicator> IoSystem<C> {
    /// Designate `num_iotasks` ranks of `union_comm` as I/O tasks,
    /// starting at `base` and spaced `stride` apart, and split off their
    /// communicator.
    ///
    /// Every rank of `union_comm` must call this; the split underneath is
    /// collective.
    pub fn init_intracomm(
        union_comm: C,
        num_iotasks: usize,
        stride: usize,
        base: usize,
        default_rearranger: Rearranger,
    ) -> Result<Self, RearrangeError> {
        let size = union_comm.size();
        let rank = union_comm.rank();

        if num_iotasks < 1 || num_iotasks > size {
            return Err(RearrangeError::InvalidDecomp(format!(
                "num_iotasks {num_iotasks} out of range for {size} ranks"
            )));
        }
        if stride < 1 || base >= size {
            return Err(RearrangeError::InvalidDecomp(format!(
                "bad I/O task layout: base {base} stride {stride} over {size} ranks"
            )));
        }
        if (num_iotasks - 1) * stride >= size {
            return Err(RearrangeError::InvalidDecomp(format!(
                "{num_iotasks} I/O tasks at stride {stride} exceed {size} ranks"
            )));
        }

        let ioranks: Vec<usize> = (0..num_iotasks)
            .map(|i| (base + i * stride) % size)
            .collect();
        let io_rank = ioranks.iter().position(|&r| r == rank);
        let ioproc = io_rank.is_some();
        let ioroot = ioranks[0];

        // Collective: every rank splits, non-I/O ranks discard theirs.
        let sub = union_comm.split(if ioproc { 0 } else { 1 }, io_rank.unwrap_or(rank))?;
        let io_comm = if ioproc { Some(sub) } else { None };

        info!(
            "iosystem: {num_iotasks} I/O tasks over {size} ranks (base {base}, stride {stride})"
        );

        Ok(Self {
            union_comm,
            io_comm,
            num_iotasks,
            num_comptasks: size,
            num_uniontasks: size,
            ioranks,
            union_rank: rank,
            comp_rank: rank,
            io_rank,
            ioproc,
            ioroot,
            default_rearranger,
            rearr_opts: RearrOpts::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, NoComm};
    use std::thread;

    #[test]
    fn single_rank_is_its_own_io_task() {
        let ios = IoSystem::init_intracomm(NoComm, 1, 1, 0, Rearranger::Box).unwrap();
        assert!(ios.ioproc);
        assert_eq!(ios.io_rank, Some(0));
        assert_eq!(ios.ioranks, vec![0]);
        assert!(ios.io_comm.is_some());
    }

    #[test]
    fn strided_io_tasks() {
        let comms = LocalComm::universe(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank();
                    let ios =
                        IoSystem::init_intracomm(comm, 2, 2, 0, Rearranger::Subset).unwrap();
                    assert_eq!(ios.ioranks, vec![0, 2]);
                    assert_eq!(ios.ioproc, rank == 0 || rank == 2);
                    if let Some(io) = &ios.io_comm {
                        assert_eq!(io.size(), 2);
                        assert_eq!(io.rank(), ios.io_rank.unwrap());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn rejects_bad_layout() {
        assert!(IoSystem::init_intracomm(NoComm, 2, 1, 0, Rearranger::Box).is_err());
        assert!(IoSystem::init_intracomm(NoComm, 1, 1, 5, Rearranger::Box).is_err());
    }
}
