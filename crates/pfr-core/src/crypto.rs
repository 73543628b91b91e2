//! Crypto engine interfaces
//!
//! The hash and RSA primitives are external collaborators supplied by the
//! integrator. They are passed by borrowed reference into each operation
//! that needs them; nothing in the engine stores them.

use crate::error::{Error, Result};
use crate::flash::operations::MAX_READ_SIZE;
use crate::flash::Flash;
use crate::keys::RsaPublicKey;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

/// Largest digest length handled (SHA-512)
pub const MAX_DIGEST_LEN: usize = 64;

impl HashType {
    /// Digest length in bytes
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Decode the on-flash hash-type field
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Sha256),
            1 => Some(Self::Sha384),
            2 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// The on-flash hash-type field value
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Sha256 => 0,
            Self::Sha384 => 1,
            Self::Sha512 => 2,
        }
    }
}

/// Streaming hash engine
pub trait HashEngine {
    /// Begin a new digest computation
    fn start(&mut self, ty: HashType) -> Result<()>;

    /// Feed data into the running computation
    fn update(&mut self, data: &[u8]) -> Result<()>;

    /// Finish the computation, returning the digest length
    fn finish(&mut self, out: &mut [u8]) -> Result<usize>;
}

/// RSA signature verification engine
pub trait RsaEngine {
    /// Verify `signature` over `digest` with `key`
    ///
    /// Fails with [`Error::SignatureInvalid`] on mismatch.
    fn verify_signature(
        &mut self,
        key: &RsaPublicKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()>;
}

/// Hash an in-memory buffer in one shot
pub fn hash_bytes<H: HashEngine + ?Sized>(
    hash: &mut H,
    ty: HashType,
    data: &[u8],
    out: &mut [u8; MAX_DIGEST_LEN],
) -> Result<usize> {
    hash.start(ty)?;
    hash.update(data)?;
    hash.finish(out)
}

/// Hash a flash range, streaming 4 KiB chunks
pub fn flash_hash_contents<F: Flash + ?Sized, H: HashEngine + ?Sized>(
    flash: &mut F,
    addr: u32,
    len: u32,
    hash: &mut H,
    ty: HashType,
    out: &mut [u8; MAX_DIGEST_LEN],
) -> Result<usize> {
    let mut buf = [0u8; MAX_READ_SIZE];

    hash.start(ty)?;
    let mut offset = 0u32;
    while offset < len {
        let chunk = core::cmp::min(MAX_READ_SIZE as u32, len - offset) as usize;
        let chunk_buf = &mut buf[..chunk];
        flash.read(addr + offset, chunk_buf)?;
        hash.update(chunk_buf)?;
        offset += chunk as u32;
    }
    hash.finish(out)
}

/// Verify a signature over a flash range
///
/// Streams `[addr, addr + len)` through the hash engine and checks the
/// signature against the resulting digest with `key`.
pub fn flash_verify_contents<F, H, R>(
    flash: &mut F,
    addr: u32,
    len: u32,
    hash: &mut H,
    ty: HashType,
    rsa: &mut R,
    key: &RsaPublicKey,
    signature: &[u8],
) -> Result<()>
where
    F: Flash + ?Sized,
    H: HashEngine + ?Sized,
    R: RsaEngine + ?Sized,
{
    if signature.len() != key.mod_length as usize {
        return Err(Error::SignatureInvalid);
    }

    let mut digest = [0u8; MAX_DIGEST_LEN];
    let digest_len = flash_hash_contents(flash, addr, len, hash, ty, &mut digest)?;
    rsa.verify_signature(key, &digest[..digest_len], signature)
}
