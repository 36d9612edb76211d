//! Rearrangers: building an exchange schedule from a decomposition map
//! and executing the transposes it describes.

pub mod box_rearranger;
pub mod datatypes;
pub mod fill;
pub mod subset;
pub mod transpose;
pub mod tune;

pub use box_rearranger::box_rearrange_create;
pub use datatypes::IndexedBlock;
pub use fill::determine_fill;
pub use subset::subset_rearrange_create;
pub use transpose::{rearrange_comp2io, rearrange_io2comp};
pub use tune::performance_tune;

use log::debug;

use crate::comm::collective::broadcast;
use crate::comm::{tags, Communicator};
use crate::decomp::blocks::calc_start_count;
use crate::decomp::iodesc::{compute_max_io_buffer_size, IoDesc, Rearranger};
use crate::decomp::iosystem::IoSystem;
use crate::decomp::region::Region;
use crate::error::RearrangeError;

/// Create a decomposition descriptor: validate the map, lay out the I/O
/// decomposition, and build the exchange schedule with the chosen
/// rearranger.
///
/// `compmap` maps each local element to a 1-based global flat offset
/// (`<= 0` marks a hole). `iostart`/`iocount` optionally pin this I/O
/// task's slab for the box rearranger; omitted, a slab is computed from
/// `elem_size` and the global shape. Collective over the union
/// communicator.
pub fn init_decomp<C: Communicator>(
    ios: &IoSystem<C>,
    elem_size: usize,
    gdimlen: &[usize],
    compmap: &[i64],
    rearranger: Option<Rearranger>,
    iostart: Option<&[i64]>,
    iocount: Option<&[i64]>,
) -> Result<IoDesc<C>, RearrangeError> {
    if gdimlen.is_empty() || gdimlen.iter().any(|&g| g == 0) {
        return Err(RearrangeError::InvalidDecomp(format!(
            "bad global dimensions {gdimlen:?}"
        )));
    }
    if elem_size == 0 {
        return Err(RearrangeError::InvalidDecomp("zero element size".into()));
    }
    let gridsize: i64 = gdimlen.iter().map(|&g| g as i64).product();
    for (i, &m) in compmap.iter().enumerate() {
        if m > gridsize {
            return Err(RearrangeError::InvalidDecomp(format!(
                "map entry {i} is {m}, beyond the global array of {gridsize}"
            )));
        }
    }
    if iostart.is_some() != iocount.is_some() {
        return Err(RearrangeError::InvalidDecomp(
            "iostart and iocount must be given together".into(),
        ));
    }
    if let Some(s) = iostart
        && (s.len() != gdimlen.len() || iocount.is_some_and(|c| c.len() != gdimlen.len()))
    {
        return Err(RearrangeError::InvalidDecomp(
            "iostart/iocount rank must match the global shape".into(),
        ));
    }

    let rearranger = rearranger.unwrap_or(ios.default_rearranger);
    let mut iodesc = IoDesc::new(gdimlen.len(), gdimlen.to_vec(), rearranger, ios.rearr_opts);
    debug!(
        "init_decomp: rank {} maplen {} rearranger {rearranger:?}",
        ios.union_rank,
        compmap.len()
    );

    match rearranger {
        Rearranger::Subset => {
            iodesc.num_aiotasks = ios.num_iotasks;
            subset_rearrange_create(ios, compmap, gdimlen, &mut iodesc)?;
        }
        Rearranger::Box => {
            if ios.ioproc {
                let io_rank = ios.io_rank.unwrap_or(0);
                let (start, count) = match (iostart, iocount) {
                    (Some(s), Some(c)) => {
                        iodesc.num_aiotasks = ios.num_iotasks;
                        (s.to_vec(), c.to_vec())
                    }
                    _ => {
                        let (s, c, naiotasks) =
                            calc_start_count(elem_size, gdimlen, ios.num_iotasks, io_rank);
                        iodesc.num_aiotasks = naiotasks;
                        (s, c)
                    }
                };
                iodesc.regions = vec![Region {
                    start,
                    count,
                    loffset: 0,
                }];
                iodesc.maxregions = 1;

                let io_comm = ios.io_comm.as_ref().ok_or_else(|| {
                    RearrangeError::InvalidDecomp("I/O rank without I/O communicator".into())
                })?;
                compute_max_io_buffer_size(io_comm, &mut iodesc)?;
            }

            // The slab computation may use fewer tasks than configured;
            // everyone hears the real number from the I/O root.
            let mut naio = [iodesc.num_aiotasks as i64];
            broadcast(&ios.union_comm, ios.ioroot, &mut naio, tags::BCAST)?;
            iodesc.num_aiotasks = naio[0] as usize;

            box_rearrange_create(ios, compmap, gdimlen, &mut iodesc)?;
        }
    }
    Ok(iodesc)
}
