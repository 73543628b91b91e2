//! Key manifest walk and CSK lookup
//!
//! Key manifest slot `i` sits at `i * KEY_MANIFEST_SIZE` in the RoT key
//! partition. Each slot is a signed container whose single section payload
//! carries the CSK hash list; the root public key is appended after the
//! image and is identical across all manifests.

use crate::container::{
    RecoveryHeader, RecoverySection, KEY_MANAGEMENT_SECTION_MAGIC, KEY_MANIFEST_SECTION_MAGIC,
    RECOVERY_HEADER_SIZE,
};
use crate::crypto::{self, HashEngine, HashType, RsaEngine, MAX_DIGEST_LEN};
use crate::error::{Error, Result};
use crate::flash::Flash;
use crate::provision::{ROOT_KEY_HASH, ROOT_KEY_HASH_LEN, ROOT_KEY_HASH_TYPE};
use crate::ufm::{Ufm, UfmPage};

use super::rsa::RsaPublicKey;

/// Stride of key manifest slots in the key partition
pub const KEY_MANIFEST_SIZE: u32 = 0x1000;

/// Highest key manifest slot id
pub const MAX_KEY_MANIFEST_ID: u8 = 15;

/// Highest CSK id within one key manifest
pub const MAX_KEY_ID: u8 = 7;

/// Reserved size of one key-hash entry (SHA-512 sized)
pub const KEY_HASH_SIZE: usize = 64;

/// On-flash size of the key-manifest section payload
pub const KEY_MANIFEST_PAYLOAD_SIZE: usize = 8 + (MAX_KEY_ID as usize + 1) * KEY_HASH_SIZE;

/// Decoded key-manifest payload: the authorized CSK hashes
#[derive(Clone)]
pub struct KeyManifest {
    /// Algorithm the CSK hashes were computed with
    pub hash_type: HashType,
    /// CSK hash per key id; unused entries are all-0xFF
    pub key_list: [[u8; KEY_HASH_SIZE]; MAX_KEY_ID as usize + 1],
}

impl KeyManifest {
    /// Decode the section payload
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < KEY_MANIFEST_PAYLOAD_SIZE {
            return Err(Error::Format);
        }

        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != KEY_MANIFEST_SECTION_MAGIC {
            log::error!("key manifest magic does not match");
            return Err(Error::Format);
        }

        let hash_type = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let hash_type = HashType::from_raw(hash_type).ok_or(Error::Format)?;

        let mut key_list = [[0u8; KEY_HASH_SIZE]; MAX_KEY_ID as usize + 1];
        for (i, entry) in key_list.iter_mut().enumerate() {
            let off = 8 + i * KEY_HASH_SIZE;
            entry.copy_from_slice(&bytes[off..off + KEY_HASH_SIZE]);
        }

        Ok(Self {
            hash_type,
            key_list,
        })
    }

    /// Emit the on-flash payload
    pub fn emit(&self) -> [u8; KEY_MANIFEST_PAYLOAD_SIZE] {
        let mut out = [0u8; KEY_MANIFEST_PAYLOAD_SIZE];
        out[0..4].copy_from_slice(&KEY_MANIFEST_SECTION_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.hash_type.to_raw().to_le_bytes());
        for (i, entry) in self.key_list.iter().enumerate() {
            let off = 8 + i * KEY_HASH_SIZE;
            out[off..off + KEY_HASH_SIZE].copy_from_slice(entry);
        }
        out
    }
}

impl core::fmt::Debug for KeyManifest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyManifest")
            .field("hash_type", &self.hash_type)
            .finish_non_exhaustive()
    }
}

/// Slot filter applied before full verification
///
/// A slot is skipped only when both the format and the magic disagree.
/// TODO(hw owner): this skip predicate should likely be an OR; kept as
/// shipped to match deployed key partitions. A slot passing on one leg
/// only still fails full verification.
fn slot_is_candidate(raw: &[u8; RECOVERY_HEADER_SIZE]) -> bool {
    let format = u16::from_le_bytes(raw[2..4].try_into().unwrap());
    let magic = u32::from_le_bytes(raw[4..8].try_into().unwrap());
    !(format != crate::container::ImageFormat::Keym as u16
        && magic != crate::container::KEY_MANAGEMENT_HEADER_MAGIC)
}

fn slot_address<F: Flash + ?Sized>(rot: &mut F, keym_id: u8) -> Result<u32> {
    if keym_id > MAX_KEY_MANIFEST_ID {
        log::error!("invalid key manifest id: {}", keym_id);
        return Err(Error::InvalidKeyId);
    }

    let addr = keym_id as u32 * KEY_MANIFEST_SIZE;
    if addr >= rot.device_size() {
        log::error!("key partition too small for manifest {}", keym_id);
        return Err(Error::Format);
    }
    Ok(addr)
}

/// Read the root public key appended to a key manifest
///
/// The root key sits at `slot + image_length`; its modulus length must
/// match the manifest's signature length.
pub fn get_root_key<F: Flash + ?Sized>(rot: &mut F, keym_address: u32) -> Result<RsaPublicKey> {
    let header = RecoveryHeader::read_from(rot, keym_address)?;

    let root_key_address = keym_address + header.image_length;
    let key = RsaPublicKey::read_from(rot, root_key_address)?;

    if key.mod_length != header.sign_length {
        log::error!(
            "root key length {} and signature length {} mismatch",
            key.mod_length,
            header.sign_length
        );
        return Err(Error::Format);
    }

    Ok(key)
}

/// Check a root public key against the provisioned hash
pub fn verify_root_key<U, H>(ufm: &mut U, hash: &mut H, key: &RsaPublicKey) -> Result<()>
where
    U: Ufm + ?Sized,
    H: HashEngine + ?Sized,
{
    let mut digest = [0u8; MAX_DIGEST_LEN];
    let digest_len = crypto::hash_bytes(hash, ROOT_KEY_HASH_TYPE, &key.to_bytes(), &mut digest)?;

    let mut stored = [0u8; ROOT_KEY_HASH_LEN];
    ufm.read(UfmPage::Provision, ROOT_KEY_HASH, &mut stored)?;

    if digest[..digest_len] != stored[..digest_len] {
        log::error!("root key hash does not match the provisioned hash");
        return Err(Error::RootKeyMismatch);
    }

    Ok(())
}

/// Fully verify one key manifest slot
pub fn verify_key_manifest<F, U, H, R>(
    rot: &mut F,
    ufm: &mut U,
    hash: &mut H,
    rsa: &mut R,
    keym_id: u8,
) -> Result<()>
where
    F: Flash + ?Sized,
    U: Ufm + ?Sized,
    H: HashEngine + ?Sized,
    R: RsaEngine + ?Sized,
{
    let keym_address = slot_address(rot, keym_id)?;

    let header = RecoveryHeader::read_from(rot, keym_address)?;
    let root_key = get_root_key(rot, keym_address)?;
    verify_root_key(ufm, hash, &root_key)?;

    let signature_address = keym_address + header.signed_length();
    let mut signature = [0u8; 512];
    let signature = &mut signature[..header.sign_length as usize];
    rot.read(signature_address, signature)?;

    // This profile pins the outer signature hash to SHA-256
    crypto::flash_verify_contents(
        rot,
        keym_address,
        header.signed_length(),
        hash,
        HashType::Sha256,
        rsa,
        &root_key,
        signature,
    )?;

    log::debug!("KEYM({}) verified", keym_id);
    Ok(())
}

/// Verify every populated key manifest slot
///
/// Slots that cannot be read or do not pass the candidate filter are
/// treated as empty. At least one valid manifest is required; any
/// populated slot that fails verification aborts.
pub fn verify_all_key_manifests<F, U, H, R>(
    rot: &mut F,
    ufm: &mut U,
    hash: &mut H,
    rsa: &mut R,
) -> Result<()>
where
    F: Flash + ?Sized,
    U: Ufm + ?Sized,
    H: HashEngine + ?Sized,
    R: RsaEngine + ?Sized,
{
    let region_size = rot.device_size();
    let mut keym_count = 0u32;

    for keym_id in 0..=MAX_KEY_MANIFEST_ID {
        let keym_address = keym_id as u32 * KEY_MANIFEST_SIZE;
        if keym_address >= region_size {
            break;
        }

        let mut raw = [0u8; RECOVERY_HEADER_SIZE];
        if rot.read(keym_address, &mut raw).is_err() {
            continue;
        }
        if !slot_is_candidate(&raw) {
            continue;
        }

        if let Err(e) = verify_key_manifest(rot, ufm, hash, rsa, keym_id) {
            log::error!("KEYM({}) verify failed: {}", keym_id, e);
            return Err(e);
        }
        keym_count += 1;
    }

    if keym_count == 0 {
        log::error!("key manifest region is empty");
        return Err(Error::Unprovisioned);
    }

    Ok(())
}

/// Read and decode the CSK list of one key manifest slot
pub fn get_key_manifest<F: Flash + ?Sized>(rot: &mut F, keym_id: u8) -> Result<KeyManifest> {
    let keym_address = slot_address(rot, keym_id)?;

    let header = RecoveryHeader::read_from(rot, keym_address)?;
    let section_address = keym_address + header.header_length as u32;

    let section = RecoverySection::read_from(rot, section_address, KEY_MANAGEMENT_SECTION_MAGIC)?;
    if section.section_length as usize != KEY_MANIFEST_PAYLOAD_SIZE {
        return Err(Error::Format);
    }

    let payload_address = section_address + section.header_length as u32;
    let mut payload = [0u8; KEY_MANIFEST_PAYLOAD_SIZE];
    rot.read(payload_address, &mut payload)?;

    KeyManifest::parse(&payload)
}

/// Check a CSK against one key manifest's hash list
pub fn verify_csk_key<F, H>(
    rot: &mut F,
    hash: &mut H,
    key: &RsaPublicKey,
    keym_id: u8,
    key_id: u8,
) -> Result<()>
where
    F: Flash + ?Sized,
    H: HashEngine + ?Sized,
{
    if key_id > MAX_KEY_ID {
        log::error!("invalid key id: {}", key_id);
        return Err(Error::InvalidKeyId);
    }

    let manifest = get_key_manifest(rot, keym_id)?;

    let mut digest = [0u8; MAX_DIGEST_LEN];
    let digest_len = crypto::hash_bytes(hash, manifest.hash_type, &key.to_bytes(), &mut digest)?;

    if digest[..digest_len] != manifest.key_list[key_id as usize][..digest_len] {
        log::debug!("KEYM({}): CSK({}) not in this manifest", keym_id, key_id);
        return Err(Error::CskUnknown);
    }

    Ok(())
}

/// Find the key manifest that authorizes a CSK; first match wins
pub fn find_key_manifest_id<F, H>(
    rot: &mut F,
    hash: &mut H,
    key: &RsaPublicKey,
    key_id: u8,
) -> Result<u8>
where
    F: Flash + ?Sized,
    H: HashEngine + ?Sized,
{
    if key_id > MAX_KEY_ID {
        log::error!("invalid key id: {}", key_id);
        return Err(Error::InvalidKeyId);
    }

    let region_size = rot.device_size();

    for keym_id in 0..=MAX_KEY_MANIFEST_ID {
        let keym_address = keym_id as u32 * KEY_MANIFEST_SIZE;
        if keym_address >= region_size {
            break;
        }

        let mut raw = [0u8; RECOVERY_HEADER_SIZE];
        if rot.read(keym_address, &mut raw).is_err() {
            continue;
        }
        if !slot_is_candidate(&raw) {
            continue;
        }

        if verify_csk_key(rot, hash, key, keym_id, key_id).is_ok() {
            log::debug!("CSK({}) found in KEYM({})", key_id, keym_id);
            return Ok(keym_id);
        }
    }

    log::error!("CSK({}) not found in any key manifest", key_id);
    Err(Error::CskUnknown)
}
