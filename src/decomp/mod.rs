//! Decomposition descriptors: how local arrays map onto the global
//! array, the regions and block sizes derived from that mapping, and the
//! I/O system that hosts them.

pub mod blocks;
pub mod iodesc;
pub mod iosystem;
pub mod region;

pub use iodesc::{IoDesc, Rearranger, compute_max_io_buffer_size};
pub use iosystem::IoSystem;
pub use region::Region;
