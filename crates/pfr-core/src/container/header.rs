//! Recovery header parsing

use crate::error::{Error, Result};
use crate::flash::operations::read_exact;
use crate::flash::Flash;

use super::{CANCELLATION_HEADER_MAGIC, KEY_MANAGEMENT_HEADER_MAGIC, RECOVERY_HEADER_MAGIC};

/// On-flash size of the recovery header
pub const RECOVERY_HEADER_SIZE: usize = 48;

/// Image format carried in the header's format field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ImageFormat {
    /// BMC firmware image or capsule
    Bmc = 0x0000,
    /// PCH firmware image or capsule
    Pch = 0x0001,
    /// RoT (CPLD) update capsule
    Hrot = 0x0002,
    /// Platform firmware manifest section payload
    Pfm = 0x0003,
    /// Key cancellation capsule
    Kcc = 0x0004,
    /// Decommission capsule
    Dcc = 0x0005,
    /// Key manifest
    Keym = 0x0006,
}

impl ImageFormat {
    /// Decode the raw format field
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0x0000 => Some(Self::Bmc),
            0x0001 => Some(Self::Pch),
            0x0002 => Some(Self::Hrot),
            0x0003 => Some(Self::Pfm),
            0x0004 => Some(Self::Kcc),
            0x0005 => Some(Self::Dcc),
            0x0006 => Some(Self::Keym),
            _ => None,
        }
    }
}

/// The 48-byte header leading every signed container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryHeader {
    /// Header length on flash; always 48
    pub header_length: u16,
    /// Raw image format field
    pub format: u16,
    /// Container magic
    pub magic_number: u32,
    /// Build version identifier
    pub version_id: [u8; 32],
    /// Total image bytes, trailing signature included
    pub image_length: u32,
    /// Trailing signature bytes
    pub sign_length: u32,
}

impl RecoveryHeader {
    /// Parse and validate a header
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECOVERY_HEADER_SIZE {
            return Err(Error::Format);
        }

        let header_length = u16::from_le_bytes(bytes[0..2].try_into().unwrap());
        let format = u16::from_le_bytes(bytes[2..4].try_into().unwrap());
        let magic_number = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let mut version_id = [0u8; 32];
        version_id.copy_from_slice(&bytes[8..40]);
        let image_length = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
        let sign_length = u32::from_le_bytes(bytes[44..48].try_into().unwrap());

        if header_length as usize != RECOVERY_HEADER_SIZE {
            return Err(Error::Format);
        }

        if !matches!(
            magic_number,
            RECOVERY_HEADER_MAGIC | KEY_MANAGEMENT_HEADER_MAGIC | CANCELLATION_HEADER_MAGIC
        ) {
            return Err(Error::Format);
        }

        // Signature lengths for RSA-2048/3072/4096
        if !matches!(sign_length, 256 | 384 | 512) {
            return Err(Error::Format);
        }

        if image_length < header_length as u32 + sign_length + 1 {
            return Err(Error::Format);
        }

        Ok(Self {
            header_length,
            format,
            magic_number,
            version_id,
            image_length,
            sign_length,
        })
    }

    /// Emit the bit-exact on-flash form
    pub fn emit(&self) -> [u8; RECOVERY_HEADER_SIZE] {
        let mut out = [0u8; RECOVERY_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.header_length.to_le_bytes());
        out[2..4].copy_from_slice(&self.format.to_le_bytes());
        out[4..8].copy_from_slice(&self.magic_number.to_le_bytes());
        out[8..40].copy_from_slice(&self.version_id);
        out[40..44].copy_from_slice(&self.image_length.to_le_bytes());
        out[44..48].copy_from_slice(&self.sign_length.to_le_bytes());
        out
    }

    /// Read and parse a header from flash
    pub fn read_from<F: Flash + ?Sized>(flash: &mut F, addr: u32) -> Result<Self> {
        let bytes = read_exact::<F, RECOVERY_HEADER_SIZE>(flash, addr)?;
        Self::parse(&bytes)
    }

    /// Decoded image format, if known
    pub fn image_format(&self) -> Result<ImageFormat> {
        ImageFormat::from_raw(self.format).ok_or(Error::Format)
    }

    /// Length of the signed span (everything before the signature)
    pub fn signed_length(&self) -> u32 {
        self.image_length - self.sign_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes() -> [u8; RECOVERY_HEADER_SIZE] {
        let mut version_id = [0u8; 32];
        version_id[..5].copy_from_slice(b"v1.09");
        RecoveryHeader {
            header_length: 48,
            format: ImageFormat::Bmc as u16,
            magic_number: RECOVERY_HEADER_MAGIC,
            version_id,
            image_length: 0x2000,
            sign_length: 384,
        }
        .emit()
    }

    #[test]
    fn test_parse_emit_roundtrip() {
        let bytes = header_bytes();
        let header = RecoveryHeader::parse(&bytes).unwrap();
        assert_eq!(header.emit(), bytes);
        assert_eq!(header.image_format().unwrap(), ImageFormat::Bmc);
        assert_eq!(header.signed_length(), 0x2000 - 384);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = header_bytes();
        bytes[4] ^= 0x01;
        assert_eq!(RecoveryHeader::parse(&bytes), Err(Error::Format));
    }

    #[test]
    fn test_all_container_magics_accepted() {
        for magic in [
            RECOVERY_HEADER_MAGIC,
            KEY_MANAGEMENT_HEADER_MAGIC,
            CANCELLATION_HEADER_MAGIC,
        ] {
            let mut bytes = header_bytes();
            bytes[4..8].copy_from_slice(&magic.to_le_bytes());
            RecoveryHeader::parse(&bytes).unwrap();
        }
    }

    #[test]
    fn test_short_image_length_rejected() {
        let mut bytes = header_bytes();
        // image_length == header + signature leaves no room for content
        bytes[40..44].copy_from_slice(&(48u32 + 384).to_le_bytes());
        assert_eq!(RecoveryHeader::parse(&bytes), Err(Error::Format));
    }

    #[test]
    fn test_odd_signature_length_rejected() {
        let mut bytes = header_bytes();
        bytes[44..48].copy_from_slice(&100u32.to_le_bytes());
        assert_eq!(RecoveryHeader::parse(&bytes), Err(Error::Format));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let bytes = header_bytes();
        assert_eq!(RecoveryHeader::parse(&bytes[..40]), Err(Error::Format));
    }
}
