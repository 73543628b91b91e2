//! Authentication engine
//!
//! End-to-end image verification: header integrity, the cancellation gate,
//! the CSK-to-root-key chain, the content signature, and the SVN
//! anti-rollback check. Verification has no side effects; stored SVNs
//! advance only when the state machine promotes an image.

use core::fmt;

use crate::container::{
    self, ImageFormat, PlatformId, RecoveryHeader, SectionIter, CANCELLATION_HEADER_MAGIC,
    RECOVERY_HEADER_MAGIC, RECOVERY_SECTION_MAGIC,
};
use crate::crypto::{self, HashEngine, HashType, RsaEngine};
use crate::error::{Error, Result};
use crate::flash::{Flash, FlashId, FlashSet};
use crate::keys::{self, manifest, ProtectedContent, RsaPublicKey, RSA_KEY_BLOB_SIZE};
use crate::pfm::Pfm;
use crate::provision::{self, SVN_MAX};
use crate::ufm::Ufm;

/// Pipeline stage a verification failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Header parse and magic/format checks
    Header,
    /// CSK cancellation-bitmap gate
    KeyCancellation,
    /// CSK lookup and key-manifest chain verification
    KeyManifest,
    /// Signature over the image contents
    ContentSignature,
    /// Security-version anti-rollback check
    Svn,
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Header => "header",
            Self::KeyCancellation => "key-cancellation",
            Self::KeyManifest => "key-manifest",
            Self::ContentSignature => "content-signature",
            Self::Svn => "svn",
        };
        f.write_str(name)
    }
}

/// A verification failure with the stage it occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthFailure {
    /// Stage the pipeline failed in
    pub stage: AuthStage,
    /// Underlying error kind
    pub error: Error,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stage, self.error)
    }
}

impl From<AuthFailure> for Error {
    fn from(failure: AuthFailure) -> Self {
        failure.error
    }
}

/// Verification result carrying stage information on failure
pub type AuthResult<T> = core::result::Result<T, AuthFailure>;

fn at<T>(stage: AuthStage, result: Result<T>) -> AuthResult<T> {
    result.map_err(|error| AuthFailure { stage, error })
}

/// Successful verification output
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    /// Decoded image format
    pub format: ImageFormat,
    /// Total image bytes including the trailing signature
    pub image_length: u32,
    /// Trailing signature bytes
    pub sign_length: u32,
    /// Platform id string from the container
    pub platform_id: PlatformId,
    /// Flash offset of the PFM payload, for PFM-bearing formats
    pub pfm_addr: Option<u32>,
    /// Security version from the PFM
    pub svn: Option<u8>,
    /// CSK key id the image was signed with
    pub key_id: u8,
    /// Key manifest slot that authorizes the CSK
    pub keym_id: u8,
}

/// Whether a (magic, format) pair is acceptable for a content class
fn layout_allows(pc: ProtectedContent, magic: u32, format: ImageFormat) -> bool {
    match format {
        ImageFormat::Kcc => magic == CANCELLATION_HEADER_MAGIC,
        ImageFormat::Dcc => {
            magic == CANCELLATION_HEADER_MAGIC && pc == ProtectedContent::Decommission
        }
        ImageFormat::Hrot => {
            magic == RECOVERY_HEADER_MAGIC && pc == ProtectedContent::CpldCapsule
        }
        ImageFormat::Pch => {
            magic == RECOVERY_HEADER_MAGIC
                && matches!(pc, ProtectedContent::PchPfm | ProtectedContent::PchCapsule)
        }
        ImageFormat::Bmc => {
            magic == RECOVERY_HEADER_MAGIC
                && matches!(pc, ProtectedContent::BmcPfm | ProtectedContent::BmcCapsule)
        }
        ImageFormat::Pfm | ImageFormat::Keym => false,
    }
}

/// SVN policy field guarding a content class, if any
fn svn_policy_for(pc: ProtectedContent) -> Option<u32> {
    match pc {
        ProtectedContent::CpldCapsule => Some(provision::CPLD_SVN_POLICY),
        ProtectedContent::PchPfm | ProtectedContent::PchCapsule => {
            Some(provision::PCH_SVN_POLICY)
        }
        ProtectedContent::BmcPfm | ProtectedContent::BmcCapsule => {
            Some(provision::BMC_SVN_POLICY)
        }
        ProtectedContent::Decommission => None,
    }
}

/// Locate the PFM section inside a signed container
///
/// Returns the flash offset of the PFM payload.
pub fn find_pfm_addr<F: Flash + ?Sized>(
    flash: &mut F,
    address: u32,
    header: &RecoveryHeader,
    platform_id_len: u32,
) -> Result<Option<u32>> {
    let start = address + header.header_length as u32 + platform_id_len;
    let end = address + header.signed_length();

    let mut sections = SectionIter::new(flash, start, end, RECOVERY_SECTION_MAGIC);
    while let Some((payload, section)) = sections.next_section()? {
        if section.format == ImageFormat::Pfm as u16 {
            return Ok(Some(payload));
        }
    }
    Ok(None)
}

/// Verify the signed image at `address` on device `dev`
///
/// Runs the full pipeline for the given protected-content class and
/// returns the parsed descriptor. Failures carry the pipeline stage and
/// leave no side effects.
#[allow(clippy::too_many_arguments)]
pub fn verify_image<F, U, H, R>(
    set: &mut FlashSet<F>,
    ufm: &mut U,
    hash: &mut H,
    rsa: &mut R,
    dev: FlashId,
    address: u32,
    pc: ProtectedContent,
) -> AuthResult<ImageDescriptor>
where
    F: Flash,
    U: Ufm + ?Sized,
    H: HashEngine + ?Sized,
    R: RsaEngine + ?Sized,
{
    let (flash, rot) = at(AuthStage::Header, set.device_and_rot(dev))?;

    // Stage 1: header integrity. No crypto work happens before this passes.
    let header = at(AuthStage::Header, RecoveryHeader::read_from(flash, address))?;
    let format = at(AuthStage::Header, header.image_format())?;
    if !layout_allows(pc, header.magic_number, format) {
        log::error!("image format {:?} not allowed for {:?}", format, pc);
        return Err(AuthFailure {
            stage: AuthStage::Header,
            error: Error::Format,
        });
    }

    let appended = address
        .checked_add(header.image_length)
        .and_then(|end| end.checked_add(RSA_KEY_BLOB_SIZE as u32 + 4));
    match appended {
        Some(end) if end <= flash.device_size() => {}
        _ => {
            return Err(AuthFailure {
                stage: AuthStage::Header,
                error: Error::Format,
            })
        }
    }

    let (platform_id, platform_id_len) = at(
        AuthStage::Header,
        container::read_platform_id(flash, address + header.header_length as u32),
    )?;

    // Stage 2: the signing key and key id appended after the image
    let key_addr = address + header.image_length;
    let csk = at(AuthStage::Header, RsaPublicKey::read_from(flash, key_addr))?;
    let raw_key_id = {
        let mut buf = [0u8; 4];
        at(
            AuthStage::Header,
            flash.read(key_addr + RSA_KEY_BLOB_SIZE as u32, &mut buf),
        )?;
        u32::from_le_bytes(buf)
    };
    if raw_key_id > keys::cancellation::KEY_CANCELLATION_MAX_KEY_ID as u32 {
        return Err(AuthFailure {
            stage: AuthStage::KeyCancellation,
            error: Error::InvalidKeyId,
        });
    }
    let key_id = raw_key_id as u8;

    // Stage 3: cancellation gate
    at(
        AuthStage::KeyCancellation,
        keys::verify_csk_key_id(ufm, pc, key_id),
    )?;

    // Stage 4: CSK authenticity, re-anchoring the manifest to the root key
    let keym_id = at(
        AuthStage::KeyManifest,
        manifest::find_key_manifest_id(rot, hash, &csk, key_id),
    )?;
    at(
        AuthStage::KeyManifest,
        manifest::verify_key_manifest(rot, ufm, hash, rsa, keym_id),
    )?;

    // Stage 5: signature over the image contents
    let mut signature = [0u8; 512];
    let signature = &mut signature[..header.sign_length as usize];
    at(
        AuthStage::ContentSignature,
        flash.read(address + header.signed_length(), signature),
    )?;
    at(
        AuthStage::ContentSignature,
        crypto::flash_verify_contents(
            flash,
            address,
            header.signed_length(),
            hash,
            HashType::Sha256,
            rsa,
            &csk,
            signature,
        ),
    )?;

    // Stage 6: anti-rollback for PFM-bearing formats
    let mut pfm_addr = None;
    let mut svn = None;
    if matches!(format, ImageFormat::Bmc | ImageFormat::Pch) {
        let addr = at(
            AuthStage::Svn,
            find_pfm_addr(flash, address, &header, platform_id_len),
        )?
        .ok_or(AuthFailure {
            stage: AuthStage::Svn,
            error: Error::Format,
        })?;

        let pfm = at(AuthStage::Svn, Pfm::read_from(flash, addr))?;
        if pfm.svn > SVN_MAX {
            return Err(AuthFailure {
                stage: AuthStage::Svn,
                error: Error::Format,
            });
        }
        if let Some(policy) = svn_policy_for(pc) {
            let stored = at(AuthStage::Svn, provision::read_svn(ufm, policy))?;
            if pfm.svn < stored {
                log::error!("image svn {} below stored svn {}", pfm.svn, stored);
                return Err(AuthFailure {
                    stage: AuthStage::Svn,
                    error: Error::SvnTooLow,
                });
            }
        }

        pfm_addr = Some(addr);
        svn = Some(pfm.svn);
    }

    log::debug!(
        "image at {:?}:0x{:x} verified ({:?}, key id {})",
        dev,
        address,
        format,
        key_id
    );

    Ok(ImageDescriptor {
        format,
        image_length: header.image_length,
        sign_length: header.sign_length,
        platform_id,
        pfm_addr,
        svn,
        key_id,
        keym_id,
    })
}
