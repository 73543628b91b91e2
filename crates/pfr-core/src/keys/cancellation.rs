//! CSK cancellation policy
//!
//! One 128-bit bitmap per protected-content class in the provisioning UFM.
//! A set bit means the key id is live; clearing it cancels the key. The
//! clear goes through the UFM write path, so it is a legal 1 -> 0
//! transition and can never be undone.

use crate::error::{Error, Result};
use crate::provision;
use crate::ufm::{Ufm, UfmPage};

/// Highest valid key id in a cancellation bitmap
pub const KEY_CANCELLATION_MAX_KEY_ID: u8 = 127;

/// Protected-content classes with independent cancellation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedContent {
    /// CPLD (RoT) update capsule
    CpldCapsule,
    /// PCH platform firmware manifest
    PchPfm,
    /// PCH update capsule
    PchCapsule,
    /// BMC platform firmware manifest
    BmcPfm,
    /// BMC update capsule
    BmcCapsule,
    /// Decommission capsule; shares the BMC capsule policy
    Decommission,
}

impl ProtectedContent {
    /// UFM offset of this class's cancellation bitmap
    pub fn cancellation_offset(self) -> u32 {
        match self {
            Self::CpldCapsule => provision::CPLD_CAPSULE_CANCELLATION,
            Self::PchPfm => provision::PCH_PFM_CANCELLATION,
            Self::PchCapsule => provision::PCH_CAPSULE_CANCELLATION,
            Self::BmcPfm => provision::BMC_PFM_CANCELLATION,
            Self::BmcCapsule | Self::Decommission => provision::BMC_CAPSULE_CANCELLATION,
        }
    }
}

fn policy_word(pc: ProtectedContent, key_id: u8) -> Result<(u32, u32)> {
    if key_id > KEY_CANCELLATION_MAX_KEY_ID {
        log::error!("invalid key id: {}", key_id);
        return Err(Error::InvalidKeyId);
    }

    let word_offset = pc.cancellation_offset() + (key_id as u32 / 32) * 4;
    // bit little endian
    let bit = 31 - (key_id as u32 % 32);
    Ok((word_offset, bit))
}

/// Check that a key id is still live for a content class
pub fn verify_csk_key_id<U: Ufm + ?Sized>(
    ufm: &mut U,
    pc: ProtectedContent,
    key_id: u8,
) -> Result<()> {
    let (word_offset, bit) = policy_word(pc, key_id)?;

    let mut word = [0u8; 4];
    ufm.read(UfmPage::Provision, word_offset, &mut word)?;
    let policy = u32::from_le_bytes(word);

    if policy & (1 << bit) == 0 {
        log::error!("CSK key id {} is cancelled, refusing to verify", key_id);
        return Err(Error::KeyCancelled);
    }

    Ok(())
}

/// Cancel a key id for a content class
pub fn cancel_csk_key_id<U: Ufm + ?Sized>(
    ufm: &mut U,
    pc: ProtectedContent,
    key_id: u8,
) -> Result<()> {
    let (word_offset, bit) = policy_word(pc, key_id)?;

    let mut word = [0u8; 4];
    ufm.read(UfmPage::Provision, word_offset, &mut word)?;
    let policy = u32::from_le_bytes(word) & !(1 << bit);

    ufm.write(UfmPage::Provision, word_offset, &policy.to_le_bytes())?;
    log::info!("cancelled CSK key id {} for {:?}", key_id, pc);
    Ok(())
}
