//! The transposes: move variable data from compute decomposition to I/O
//! decomposition (the write path) and back (the read path).

use bytemuck::Pod;
use itertools::izip;
use log::trace;

use crate::comm::{swapm, tags, Communicator};
use crate::decomp::iodesc::{IoDesc, Rearranger};
use crate::decomp::iosystem::IoSystem;
use crate::error::RearrangeError;
use crate::rearrange::datatypes::ensure_exchange_types;

/// Union rank (box) or group rank (subset) of the peer a send message is
/// addressed to.
fn send_dest<C: Communicator>(ios: &IoSystem<C>, iodesc: &IoDesc<C>, msg: usize) -> usize {
    match iodesc.rearranger {
        Rearranger::Box => ios.ioranks[msg],
        Rearranger::Subset => 0,
    }
}

/// Peer rank the I/O side's `msg`-th receive schedule entry talks to.
fn recv_peer<C: Communicator>(iodesc: &IoDesc<C>, msg: usize) -> usize {
    match iodesc.rearranger {
        Rearranger::Box => iodesc.rfrom[msg],
        Rearranger::Subset => msg,
    }
}

/// Move `nvars` variables' worth of data from the compute decomposition
/// into the I/O buffers. `sbuf` holds `nvars` consecutive local arrays
/// of `ndof` elements; on I/O ranks `rbuf` receives `nvars` consecutive
/// buffers of `llen` elements. Collective; holes in the I/O buffer are
/// left untouched.
pub fn rearrange_comp2io<C: Communicator, T: Pod>(
    ios: &IoSystem<C>,
    iodesc: &mut IoDesc<C>,
    sbuf: &[T],
    rbuf: &mut [T],
    nvars: usize,
) -> Result<(), RearrangeError> {
    debug_assert!(nvars > 0);
    debug_assert_eq!(sbuf.len(), iodesc.ndof * nvars);
    debug_assert_eq!(rbuf.len(), iodesc.llen * nvars);
    ensure_exchange_types(ios.ioproc, ios.num_iotasks, iodesc)?;

    let comm: &C = match iodesc.rearranger {
        Rearranger::Box => &ios.union_comm,
        Rearranger::Subset => iodesc.subset_comm.as_ref().ok_or_else(|| {
            RearrangeError::InvalidDecomp("subset descriptor missing its group".into())
        })?,
    };
    let ntasks = comm.size();
    let ndof = iodesc.ndof;
    let llen = iodesc.llen;
    trace!("comp2io rank {} nvars {nvars}", comm.rank());

    // Pack one message per destination, all variables batched at a
    // stride of one local array.
    let mut sends: Vec<Vec<T>> = (0..ntasks).map(|_| Vec::new()).collect();
    if let Some(stypes) = &iodesc.stype {
        for (i, plan) in stypes.iter().enumerate() {
            if let Some(plan) = plan {
                let mut packed = Vec::with_capacity(plan.len() * nvars);
                for v in 0..nvars {
                    plan.pack(&sbuf[v * ndof..(v + 1) * ndof], &mut packed);
                }
                sends[send_dest(ios, iodesc, i)] = packed;
            }
        }
    }

    let mut recv_counts = vec![0usize; ntasks];
    if ios.ioproc {
        for (j, &cnt) in iodesc.rcount[..iodesc.nrecvs].iter().enumerate() {
            recv_counts[recv_peer(iodesc, j)] = cnt * nvars;
        }
    }

    let received = swapm(
        comm,
        &sends,
        &recv_counts,
        &iodesc.rearr_opts.comp2io,
        tags::COMP2IO,
    )?;

    // Scatter each message into the I/O buffers, variable by variable.
    if let Some(rtypes) = &iodesc.rtype {
        for (j, plan) in rtypes.iter().enumerate() {
            if let Some(plan) = plan {
                let data = &received[recv_peer(iodesc, j)];
                debug_assert_eq!(data.len(), plan.len() * nvars);
                for (chunk, var) in izip!(data.chunks_exact(plan.len()), rbuf.chunks_exact_mut(llen))
                {
                    plan.unpack(chunk, var);
                }
            }
        }
    }
    Ok(())
}

/// Move one variable's data from the I/O decomposition back to the
/// compute decomposition. The reverse of [`rearrange_comp2io`]; the read
/// path moves one variable at a time, so there is no batching.
pub fn rearrange_io2comp<C: Communicator, T: Pod>(
    ios: &IoSystem<C>,
    iodesc: &mut IoDesc<C>,
    rbuf: &[T],
    sbuf: &mut [T],
) -> Result<(), RearrangeError> {
    debug_assert_eq!(rbuf.len(), iodesc.llen);
    debug_assert_eq!(sbuf.len(), iodesc.ndof);
    ensure_exchange_types(ios.ioproc, ios.num_iotasks, iodesc)?;

    let comm: &C = match iodesc.rearranger {
        Rearranger::Box => &ios.union_comm,
        Rearranger::Subset => iodesc.subset_comm.as_ref().ok_or_else(|| {
            RearrangeError::InvalidDecomp("subset descriptor missing its group".into())
        })?,
    };
    let ntasks = comm.size();
    trace!("io2comp rank {}", comm.rank());

    // The I/O side gathers each receive plan's elements back out of its
    // buffer and returns them to the sender they came from.
    let mut sends: Vec<Vec<T>> = (0..ntasks).map(|_| Vec::new()).collect();
    if let Some(rtypes) = &iodesc.rtype {
        for (j, plan) in rtypes.iter().enumerate() {
            if let Some(plan) = plan {
                let mut packed = Vec::with_capacity(plan.len());
                plan.pack(rbuf, &mut packed);
                sends[recv_peer(iodesc, j)] = packed;
            }
        }
    }

    let mut recv_counts = vec![0usize; ntasks];
    for (i, &cnt) in iodesc.scount.iter().enumerate() {
        if cnt > 0 {
            recv_counts[send_dest(ios, iodesc, i)] = cnt;
        }
    }

    let received = swapm(
        comm,
        &sends,
        &recv_counts,
        &iodesc.rearr_opts.io2comp,
        tags::IO2COMP,
    )?;

    // Each send plan doubles as the unpack map on the way back.
    if let Some(stypes) = &iodesc.stype {
        for (i, plan) in stypes.iter().enumerate() {
            if let Some(plan) = plan {
                plan.unpack(&received[send_dest(ios, iodesc, i)], sbuf);
            }
        }
    }
    Ok(())
}
