#![cfg_attr(docsrs, feature(doc_cfg))]
//! # gridswap
//!
//! gridswap is a data rearrangement library for parallel I/O of distributed
//! scientific arrays. A group of cooperating processes each holds an arbitrary
//! slice of a global multi-dimensional array; a subset of them performs the
//! actual storage I/O. gridswap computes the exchange schedule between the two
//! decompositions and executes the transposes, so that scattered compute-side
//! data arrives at the I/O tasks as large contiguous hyperslabs.
//!
//! ## Features
//! - Box and subset rearrangers with identical calling conventions
//! - Region finding that turns index maps into maximal hyperslabs
//! - GCD block compression of exchange indices into fixed-block packing plans
//! - Fill detection and fill-region partitioning for sparse decompositions
//! - Pluggable communication backends (serial, in-process threads, MPI) with
//!   tunable flow control for the exchange passes
//!
//! ## Usage
//! Add `gridswap` as a dependency in your `Cargo.toml` and enable features as
//! needed:
//!
//! ```toml
//! [dependencies]
//! gridswap = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```
//!
//! Create an [`IoSystem`](decomp::IoSystem) over a communicator, describe each
//! rank's slice of the global array with a 1-based offset map, and call
//! [`init_decomp`](rearrange::init_decomp); the resulting descriptor drives
//! [`rearrange_comp2io`](rearrange::rearrange_comp2io) and
//! [`rearrange_io2comp`](rearrange::rearrange_io2comp).

pub mod comm;
pub mod decomp;
pub mod error;
pub mod rearrange;

pub use error::RearrangeError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::{CommTag, Communicator, FlowControl, NoComm, RearrOpts, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::LocalComm;
    pub use crate::decomp::{IoDesc, IoSystem, Rearranger, Region};
    pub use crate::error::RearrangeError;
    pub use crate::rearrange::{
        init_decomp, performance_tune, rearrange_comp2io, rearrange_io2comp,
    };
}
