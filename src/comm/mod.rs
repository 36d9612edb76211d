//! Message-passing substrate: the communicator trait, its backends, and
//! the collective exchange helpers the rearrangers are built from.

pub mod collective;
pub mod communicator;
pub mod local;
#[cfg(feature = "mpi-support")]
pub mod mpi;
pub mod swapm;

pub use communicator::{CommTag, Communicator, NoComm, Wait};
pub(crate) use communicator::tags;
pub use local::LocalComm;
#[cfg(feature = "mpi-support")]
pub use mpi::MpiComm;
pub use swapm::{FlowControl, RearrOpts, swapm};
