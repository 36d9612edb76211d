//! Packing plans: fixed-block indexed gather/scatter descriptions, built
//! once per exchange schedule and cached on the descriptor.
//!
//! A plan plays the role of a derived datatype: it records where one
//! message's elements live in a local buffer, as `len` blocks of
//! `blocksize` consecutive elements each, so a transpose can gather a
//! message (or scatter one back) without per-element bookkeeping.

use bytemuck::Pod;
use log::trace;

use crate::comm::Communicator;
use crate::decomp::blocks::{gcd_array, gcd_block_size};
use crate::decomp::iodesc::{IoDesc, Rearranger};
use crate::error::RearrangeError;

/// One message's layout in a local buffer: blocks of `blocksize`
/// consecutive elements starting at each displacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedBlock {
    pub blocksize: usize,
    pub displs: Vec<i64>,
}

impl IndexedBlock {
    /// Elements this plan covers.
    pub fn len(&self) -> usize {
        self.blocksize * self.displs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gather the plan's elements out of `src`, appending to `dst`.
    pub fn pack<T: Pod>(&self, src: &[T], dst: &mut Vec<T>) {
        for &d in &self.displs {
            let d = d as usize;
            dst.extend_from_slice(&src[d..d + self.blocksize]);
        }
    }

    /// Scatter `src` (one packed message) into `dst` at the plan's
    /// displacements. `src` must hold exactly `self.len()` elements.
    pub fn unpack<T: Pod>(&self, src: &[T], dst: &mut [T]) {
        debug_assert_eq!(src.len(), self.len());
        for (chunk, &d) in src.chunks_exact(self.blocksize).zip(&self.displs) {
            let d = d as usize;
            dst[d..d + self.blocksize].copy_from_slice(chunk);
        }
    }
}

/// Build one packing plan per message from a flat index list.
///
/// `lindex` holds the local offsets of every element, grouped by message
/// when `mfrom` is `None` (message `i` owns the slice after the first
/// `mcount[..i]` entries); with `mfrom` present, element `j` belongs to
/// message `mfrom[j]` and blocks degenerate to single elements. Messages
/// with a zero count get no plan.
///
/// The shared block size is the GCD of each message's own block size, so
/// every plan tiles its message exactly.
pub fn build_block_types(
    msgcnt: usize,
    lindex: &[i64],
    mcount: &[usize],
    mfrom: Option<&[usize]>,
) -> Result<Vec<Option<IndexedBlock>>, RearrangeError> {
    debug_assert_eq!(mcount.len(), msgcnt);
    debug_assert_eq!(lindex.len(), mcount.iter().sum::<usize>());

    let blocksize = match mfrom {
        Some(_) => 1,
        None => {
            let mut per_msg = Vec::new();
            let mut pos = 0;
            for &cnt in mcount {
                if cnt > 0 {
                    per_msg.push(gcd_block_size(&lindex[pos..pos + cnt]));
                    pos += cnt;
                }
            }
            if per_msg.is_empty() {
                1
            } else {
                gcd_array(&per_msg) as usize
            }
        }
    };
    trace!("packing plans: {msgcnt} messages, blocksize {blocksize}");

    let mut types = Vec::with_capacity(msgcnt);
    let mut pos = 0;
    for (i, &cnt) in mcount.iter().enumerate() {
        if cnt == 0 {
            types.push(None);
            continue;
        }
        if cnt % blocksize != 0 {
            return Err(RearrangeError::BadStride {
                count: cnt,
                blocksize,
            });
        }
        let len = cnt / blocksize;
        let displs: Vec<i64> = match mfrom {
            Some(from) => from
                .iter()
                .zip(lindex)
                .filter(|&(&f, _)| f == i)
                .map(|(_, &l)| l)
                .collect(),
            None => (0..len).map(|j| lindex[pos + j * blocksize]).collect(),
        };
        debug_assert_eq!(displs.len(), len);
        pos += cnt;
        types.push(Some(IndexedBlock { blocksize, displs }));
    }
    Ok(types)
}

/// Build the send- and receive-side packing plans for a descriptor if
/// they do not already exist. Plans survive across transposes until
/// [`IoDesc::clear_exchange_types`] drops them.
pub fn ensure_exchange_types<C: Communicator>(
    ioproc: bool,
    num_iotasks: usize,
    iodesc: &mut IoDesc<C>,
) -> Result<(), RearrangeError> {
    // Receive side exists only on I/O ranks that expect messages.
    if ioproc && iodesc.rtype.is_none() && iodesc.nrecvs > 0 {
        let mfrom = match iodesc.rearranger {
            Rearranger::Subset => Some(iodesc.rfrom.as_slice()),
            Rearranger::Box => None,
        };
        iodesc.rtype = Some(build_block_types(
            iodesc.nrecvs,
            &iodesc.rindex,
            &iodesc.rcount[..iodesc.nrecvs],
            mfrom,
        )?);
    }

    // Every rank is a compute rank; the send side faces one I/O task for
    // the subset rearranger and all of them for box.
    if iodesc.stype.is_none() && !iodesc.scount.is_empty() {
        let ntypes = match iodesc.rearranger {
            Rearranger::Subset => 1,
            Rearranger::Box => num_iotasks,
        };
        iodesc.stype = Some(build_block_types(
            ntypes,
            &iodesc.sindex,
            &iodesc.scount[..ntypes],
            None,
        )?);
    }
    Ok(())
}
