//! Cerberus image container codec
//!
//! Signed images share one layout: a 48-byte recovery header, a
//! length-prefixed platform id, zero or more sections, and a trailing RSA
//! signature over everything before it. The signing public key and its
//! key id are appended after the signed image. Key manifests and
//! cancellation capsules reuse the same framing with their own magic
//! numbers.

mod capsule;
mod header;
mod section;

#[cfg(feature = "alloc")]
mod builder;

pub use capsule::{CancellationPayload, CANCELLATION_PAYLOAD_SIZE};
pub use header::{ImageFormat, RecoveryHeader, RECOVERY_HEADER_SIZE};
pub use section::{RecoverySection, SectionIter, RECOVERY_SECTION_SIZE};

#[cfg(feature = "alloc")]
pub use builder::ImageBuilder;

use crate::error::{Error, Result};
use crate::flash::Flash;

/// Header magic for firmware and recovery images
pub const RECOVERY_HEADER_MAGIC: u32 = 0x8A14_7C29;
/// Section magic within firmware and recovery images
pub const RECOVERY_SECTION_MAGIC: u32 = 0x4B17_2F31;
/// Header magic for standalone cancellation and decommission capsules
pub const CANCELLATION_HEADER_MAGIC: u32 = 0xB6EA_FD19;
/// Header magic for key manifests in the RoT key partition
pub const KEY_MANAGEMENT_HEADER_MAGIC: u32 = 0xB759_2D57;
/// Section magic within key manifests
pub const KEY_MANAGEMENT_SECTION_MAGIC: u32 = 0xF27F_28D7;
/// Magic leading the key-manifest section payload
pub const KEY_MANIFEST_SECTION_MAGIC: u32 = 0x92FB_478E;

/// Longest accepted platform id
pub const MAX_PLATFORM_ID_LEN: usize = 255;

/// Platform id string, bounded by the one-byte length prefix
pub type PlatformId = heapless::String<256>;

/// Read the platform id that follows a recovery header
///
/// Returns the id and the number of bytes consumed (length prefix
/// included).
pub fn read_platform_id<F: Flash + ?Sized>(flash: &mut F, addr: u32) -> Result<(PlatformId, u32)> {
    let mut len = [0u8; 1];
    flash.read(addr, &mut len)?;
    let len = len[0] as usize;

    let mut buf = [0u8; MAX_PLATFORM_ID_LEN];
    flash.read(addr + 1, &mut buf[..len])?;

    let bytes = &buf[..len];
    if !bytes.iter().all(u8::is_ascii) {
        return Err(Error::Format);
    }

    let mut id = PlatformId::new();
    // ASCII checked above, so from_utf8 cannot fail
    let s = core::str::from_utf8(bytes).map_err(|_| Error::Format)?;
    id.push_str(s).map_err(|_| Error::Format)?;

    Ok((id, len as u32 + 1))
}
