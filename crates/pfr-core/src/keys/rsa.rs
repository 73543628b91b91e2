//! RSA public key blob
//!
//! Keys travel on flash in a fixed 520-byte serialized form: the modulus
//! padded to the 4096-bit maximum, the modulus length, and the public
//! exponent. Key hashes (provisioned root-key hash, CSK hashes in key
//! manifests) are computed over this serialized form.

use core::fmt;

use crate::error::{Error, Result};
use crate::flash::operations::read_exact;
use crate::flash::Flash;

/// Largest supported modulus in bytes (RSA-4096)
pub const RSA_MAX_KEY_LENGTH: usize = 512;

/// Serialized key size: modulus + mod_length + exponent
pub const RSA_KEY_BLOB_SIZE: usize = RSA_MAX_KEY_LENGTH + 4 + 4;

/// An RSA public key in its on-flash form
#[derive(Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    /// Modulus, big-endian, left-justified and zero-padded to 512 bytes
    pub modulus: [u8; RSA_MAX_KEY_LENGTH],
    /// Used length of the modulus in bytes
    pub mod_length: u32,
    /// Public exponent
    pub exponent: u32,
}

impl RsaPublicKey {
    /// Decode the serialized form
    pub fn from_bytes(bytes: &[u8; RSA_KEY_BLOB_SIZE]) -> Result<Self> {
        let mut modulus = [0u8; RSA_MAX_KEY_LENGTH];
        modulus.copy_from_slice(&bytes[..RSA_MAX_KEY_LENGTH]);

        let mod_length = u32::from_le_bytes(bytes[512..516].try_into().unwrap());
        let exponent = u32::from_le_bytes(bytes[516..520].try_into().unwrap());

        if mod_length as usize > RSA_MAX_KEY_LENGTH {
            return Err(Error::Format);
        }

        Ok(Self {
            modulus,
            mod_length,
            exponent,
        })
    }

    /// Encode the serialized form
    pub fn to_bytes(&self) -> [u8; RSA_KEY_BLOB_SIZE] {
        let mut out = [0u8; RSA_KEY_BLOB_SIZE];
        out[..RSA_MAX_KEY_LENGTH].copy_from_slice(&self.modulus);
        out[512..516].copy_from_slice(&self.mod_length.to_le_bytes());
        out[516..520].copy_from_slice(&self.exponent.to_le_bytes());
        out
    }

    /// Read a key blob from flash
    pub fn read_from<F: Flash + ?Sized>(flash: &mut F, addr: u32) -> Result<Self> {
        let bytes = read_exact::<F, RSA_KEY_BLOB_SIZE>(flash, addr)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for RsaPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPublicKey")
            .field("mod_length", &self.mod_length)
            .field("exponent", &self.exponent)
            .finish_non_exhaustive()
    }
}
