//! Error types for pfr-core
//!
//! This module provides a no_std compatible error type that is used
//! throughout the crate.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Flash / storage errors
    /// Flash driver I/O failed; the destination region is indeterminate
    Io,
    /// UFM write attempted a 0 -> 1 bit transition
    UfmOtpViolation,
    /// The provisioning page is blank or inconsistent
    Unprovisioned,

    // Container errors
    /// Container parse failed (magic, length or layout)
    Format,

    // Authentication errors
    /// Root public key hash does not match the provisioned hash
    RootKeyMismatch,
    /// The CSK key id has been cancelled for this content class
    KeyCancelled,
    /// The CSK was not found in any key manifest
    CskUnknown,
    /// Signature over the image contents did not verify
    SignatureInvalid,
    /// Image security version is lower than the stored version
    SvnTooLow,
    /// Key id outside the cancellation policy range
    InvalidKeyId,

    // Resource errors
    /// A bounded buffer was too small and no allocator is available
    OutOfMemory,
    /// The flash region lock is held by another operation
    Busy,
    /// A hard failure demands platform lockdown
    LockdownRequested,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "flash I/O error"),
            Self::UfmOtpViolation => write!(f, "UFM write would set a cleared bit"),
            Self::Unprovisioned => write!(f, "provisioning data missing or inconsistent"),
            Self::Format => write!(f, "container format error"),
            Self::RootKeyMismatch => write!(f, "root key hash mismatch"),
            Self::KeyCancelled => write!(f, "CSK key id is cancelled"),
            Self::CskUnknown => write!(f, "CSK not found in any key manifest"),
            Self::SignatureInvalid => write!(f, "image signature invalid"),
            Self::SvnTooLow => write!(f, "security version lower than stored version"),
            Self::InvalidKeyId => write!(f, "key id out of range"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Busy => write!(f, "flash region busy"),
            Self::LockdownRequested => write!(f, "platform lockdown requested"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
