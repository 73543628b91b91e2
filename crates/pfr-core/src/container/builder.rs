//! Container assembly
//!
//! Builds bit-exact signed containers for provisioning tooling and tests.
//! The signing operation is supplied as a closure so the builder stays
//! independent of any particular key-holding backend.

use alloc::string::String;
use alloc::vec::Vec;

use crate::keys::RsaPublicKey;

use super::{
    ImageFormat, RecoveryHeader, RecoverySection, CANCELLATION_HEADER_MAGIC,
    KEY_MANAGEMENT_HEADER_MAGIC, KEY_MANAGEMENT_SECTION_MAGIC, RECOVERY_HEADER_MAGIC,
    RECOVERY_SECTION_MAGIC,
};

/// Assembles a signed container image
pub struct ImageBuilder {
    format: ImageFormat,
    header_magic: u32,
    section_magic: u32,
    version_id: [u8; 32],
    platform_id: String,
    sections: Vec<(u32, u16, Vec<u8>)>,
}

impl ImageBuilder {
    /// Start a container of the given format
    ///
    /// The header and section magics follow from the format: key manifests
    /// use the key-management pair, cancellation and decommission capsules
    /// the cancellation header, everything else the recovery pair.
    pub fn new(format: ImageFormat) -> Self {
        let (header_magic, section_magic) = match format {
            ImageFormat::Keym => (KEY_MANAGEMENT_HEADER_MAGIC, KEY_MANAGEMENT_SECTION_MAGIC),
            ImageFormat::Kcc | ImageFormat::Dcc => {
                (CANCELLATION_HEADER_MAGIC, RECOVERY_SECTION_MAGIC)
            }
            _ => (RECOVERY_HEADER_MAGIC, RECOVERY_SECTION_MAGIC),
        };

        Self {
            format,
            header_magic,
            section_magic,
            version_id: [0u8; 32],
            platform_id: String::new(),
            sections: Vec::new(),
        }
    }

    /// Set the version identifier (truncated to 32 bytes)
    pub fn version_id(mut self, id: &str) -> Self {
        let bytes = id.as_bytes();
        let len = core::cmp::min(bytes.len(), 32);
        self.version_id[..len].copy_from_slice(&bytes[..len]);
        self
    }

    /// Set the platform id string
    pub fn platform_id(mut self, id: &str) -> Self {
        assert!(id.len() <= super::MAX_PLATFORM_ID_LEN);
        self.platform_id = String::from(id);
        self
    }

    /// Append a section with the given destination offset
    pub fn section(mut self, start_addr: u32, payload: &[u8]) -> Self {
        let format = self.format as u16;
        self.sections.push((start_addr, format, payload.to_vec()));
        self
    }

    /// Append a section carrying its own format tag (e.g. the PFM)
    pub fn section_with_format(
        mut self,
        start_addr: u32,
        format: ImageFormat,
        payload: &[u8],
    ) -> Self {
        self.sections.push((start_addr, format as u16, payload.to_vec()));
        self
    }

    /// Assemble and sign the container
    ///
    /// `sign` receives the signed span and must return exactly
    /// `sign_length` signature bytes. The signing public key and its key id
    /// are appended after the image.
    pub fn build<S>(self, sign_length: u32, key: &RsaPublicKey, key_id: u32, sign: S) -> Vec<u8>
    where
        S: FnOnce(&[u8]) -> Vec<u8>,
    {
        let mut body_len = super::RECOVERY_HEADER_SIZE + 1 + self.platform_id.len();
        for (_, _, payload) in &self.sections {
            body_len += super::RECOVERY_SECTION_SIZE + payload.len();
        }
        let image_length = body_len as u32 + sign_length;

        let header = RecoveryHeader {
            header_length: super::RECOVERY_HEADER_SIZE as u16,
            format: self.format as u16,
            magic_number: self.header_magic,
            version_id: self.version_id,
            image_length,
            sign_length,
        };

        let mut image = Vec::with_capacity(image_length as usize);
        image.extend_from_slice(&header.emit());
        image.push(self.platform_id.len() as u8);
        image.extend_from_slice(self.platform_id.as_bytes());

        for (start_addr, format, payload) in &self.sections {
            let section = RecoverySection {
                header_length: super::RECOVERY_SECTION_SIZE as u16,
                format: *format,
                magic_number: self.section_magic,
                start_addr: *start_addr,
                section_length: payload.len() as u32,
            };
            image.extend_from_slice(&section.emit());
            image.extend_from_slice(payload);
        }

        let signature = sign(&image);
        assert_eq!(signature.len(), sign_length as usize);
        image.extend_from_slice(&signature);

        image.extend_from_slice(&key.to_bytes());
        image.extend_from_slice(&key_id.to_le_bytes());
        image
    }
}
