//! UFM store
//!
//! Two persistent one-time-programmable pages on the RoT device:
//! `Provision` carries the provisioning data (root-key hash, region
//! offsets, cancellation bitmaps, SVN policy) and `UpdateStatus` carries
//! the rolling update journal. The OTP substrate only clears bits, so a
//! write may commit 1 -> 0 transitions exclusively; everything layered on
//! top of this store (cancellation, SVN counters, the journal) is designed
//! around that contract.

use crate::error::Result;

/// UFM write/read granule in bytes
pub const UFM_PAGE_SIZE: usize = 16;

/// Size of the provisioning page (UFM0)
pub const PROVISION_UFM_SIZE: usize = 512;

/// Size of the update-status page (UFM1)
pub const UPDATE_STATUS_UFM_SIZE: usize = 512;

/// The two UFM pages, addressed independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UfmPage {
    /// UFM0 - provisioning data, written once at manufacture
    Provision,
    /// UFM1 - rolling update journal
    UpdateStatus,
}

impl UfmPage {
    /// Capacity of this page in bytes
    pub fn size(self) -> usize {
        match self {
            Self::Provision => PROVISION_UFM_SIZE,
            Self::UpdateStatus => UPDATE_STATUS_UFM_SIZE,
        }
    }
}

/// Persistent OTP-like store
///
/// Write contract: only 1 -> 0 bit transitions may be committed. An
/// attempt to set a cleared bit fails with [`crate::Error::UfmOtpViolation`]
/// and commits nothing. Implementations may buffer whole 16-byte pages
/// internally but must sync to the substrate before returning.
pub trait Ufm {
    /// Read `buf.len()` bytes from `offset` within a page
    fn read(&mut self, page: UfmPage, offset: u32, buf: &mut [u8]) -> Result<()>;

    /// Write bytes at `offset` within a page, clearing bits only
    fn write(&mut self, page: UfmPage, offset: u32, data: &[u8]) -> Result<()>;
}

/// Read one little-endian u32 field from a page
pub fn read_u32<U: Ufm + ?Sized>(ufm: &mut U, page: UfmPage, offset: u32) -> Result<u32> {
    let mut buf = [0u8; 4];
    ufm.read(page, offset, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Write one little-endian u32 field to a page
pub fn write_u32<U: Ufm + ?Sized>(
    ufm: &mut U,
    page: UfmPage,
    offset: u32,
    value: u32,
) -> Result<()> {
    ufm.write(page, offset, &value.to_le_bytes())
}
