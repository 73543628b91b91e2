//! Flash abstraction
//!
//! Uniform access to the three logical flash devices the RoT arbitrates:
//! the BMC flash, the PCH flash, and the RoT-internal key partition.

mod device;
pub mod operations;

pub use device::{Flash, FlashId, FlashSet};
