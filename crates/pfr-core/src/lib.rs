//! pfr-core - Core engine for Cerberus-profile platform firmware resiliency
//!
//! This crate implements the root-of-trust logic that sits between a host
//! system's BMC/PCH flash devices and the CPUs booting from them: signed
//! container parsing, the CSK/root-key authentication chain, key
//! cancellation and SVN anti-rollback policy in one-time-programmable
//! storage, active-region recovery, and the boot/update state machine.
//! It is designed to be `no_std` compatible for use on the RoT device
//! itself; flash drivers, reset lines and crypto primitives are supplied
//! by the integrator through traits.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`)
//! - `alloc` - Enable heap allocation (image builder, large PFM tables)
//! - `profile-dual-a3` / `profile-legacy-a2` - Provisioning profile;
//!   exactly one must be selected

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

#[cfg(all(feature = "profile-dual-a3", feature = "profile-legacy-a2"))]
compile_error!("provisioning profiles are mutually exclusive: enable either profile-dual-a3 or profile-legacy-a2, not both");

#[cfg(not(any(feature = "profile-dual-a3", feature = "profile-legacy-a2")))]
compile_error!("a provisioning profile is required: enable profile-dual-a3 or profile-legacy-a2");

pub mod auth;
pub mod container;
pub mod crypto;
pub mod error;
pub mod flash;
pub mod keys;
pub mod pfm;
pub mod provision;
pub mod recovery;
pub mod state;
pub mod ufm;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
