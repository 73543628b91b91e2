//! Provisioning data layout (UFM0)
//!
//! Field offsets within the provisioning page, the per-domain region maps,
//! and the unary SVN policy encoding. SVN counters are stored as the count
//! of cleared bits in an 8-byte field so that advancing the counter is
//! itself a 1 -> 0-only write, keeping every UFM byte under the OTP
//! invariant.

use crate::crypto::HashType;
use crate::error::{Error, Result};
use crate::ufm::{self, Ufm, UfmPage};

/// Root public key hash, SHA-256 or SHA-384 per provisioning profile
pub const ROOT_KEY_HASH: u32 = 0x000;
/// Reserved length of the root-key-hash field (SHA-384 sized)
pub const ROOT_KEY_HASH_LEN: usize = 48;

/// BMC active region offset (u32)
pub const BMC_ACTIVE_REGION_OFFSET: u32 = 0x030;
/// BMC recovery region offset (u32)
pub const BMC_RECOVERY_REGION_OFFSET: u32 = 0x034;
/// BMC staging region offset (u32)
pub const BMC_STAGING_REGION_OFFSET: u32 = 0x038;
/// PCH active region offset (u32)
pub const PCH_ACTIVE_REGION_OFFSET: u32 = 0x03C;
/// PCH recovery region offset (u32)
pub const PCH_RECOVERY_REGION_OFFSET: u32 = 0x040;
/// PCH staging region offset (u32)
pub const PCH_STAGING_REGION_OFFSET: u32 = 0x044;

/// CPLD-capsule SVN policy, 8-byte unary counter
pub const CPLD_SVN_POLICY: u32 = 0x048;
/// PCH SVN policy, 8-byte unary counter
pub const PCH_SVN_POLICY: u32 = 0x050;
/// BMC SVN policy, 8-byte unary counter
pub const BMC_SVN_POLICY: u32 = 0x058;
/// Length of one SVN policy field
pub const SVN_POLICY_LEN: usize = 8;

/// Key-cancellation bitmap for CPLD update capsules (128 bits)
pub const CPLD_CAPSULE_CANCELLATION: u32 = 0x060;
/// Key-cancellation bitmap for PCH PFMs
pub const PCH_PFM_CANCELLATION: u32 = 0x070;
/// Key-cancellation bitmap for PCH update capsules
pub const PCH_CAPSULE_CANCELLATION: u32 = 0x080;
/// Key-cancellation bitmap for BMC PFMs
pub const BMC_PFM_CANCELLATION: u32 = 0x090;
/// Key-cancellation bitmap for BMC update capsules and decommission
pub const BMC_CAPSULE_CANCELLATION: u32 = 0x0A0;

/// Highest representable security version
#[cfg(feature = "profile-dual-a3")]
pub const SVN_MAX: u8 = 64;
/// Highest representable security version
#[cfg(feature = "profile-legacy-a2")]
pub const SVN_MAX: u8 = 63;

/// Hash algorithm used over the root public key at provisioning time
pub const ROOT_KEY_HASH_TYPE: HashType = HashType::Sha256;

/// Size of the BMC staging region; the PCH capsule rides behind the BMC
/// capsule within it
pub const BMC_STAGING_SIZE: u32 = 0x2_0000;
/// Size of the PCH staging region
pub const PCH_STAGING_SIZE: u32 = 0x1_0000;

/// Firmware domains the RoT protects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Baseboard management controller
    Bmc,
    /// Platform controller hub
    Pch,
}

impl Domain {
    /// The flash device carrying this domain's firmware
    pub fn flash_id(self) -> crate::flash::FlashId {
        match self {
            Self::Bmc => crate::flash::FlashId::Bmc,
            Self::Pch => crate::flash::FlashId::Pch,
        }
    }

    /// UFM offset of this domain's SVN policy
    pub fn svn_policy(self) -> u32 {
        match self {
            Self::Bmc => BMC_SVN_POLICY,
            Self::Pch => PCH_SVN_POLICY,
        }
    }

    /// Content class of this domain's active image and PFM
    pub fn pfm_class(self) -> crate::keys::ProtectedContent {
        match self {
            Self::Bmc => crate::keys::ProtectedContent::BmcPfm,
            Self::Pch => crate::keys::ProtectedContent::PchPfm,
        }
    }

    /// Content class of this domain's update and recovery capsules
    pub fn capsule_class(self) -> crate::keys::ProtectedContent {
        match self {
            Self::Bmc => crate::keys::ProtectedContent::BmcCapsule,
            Self::Pch => crate::keys::ProtectedContent::PchCapsule,
        }
    }
}

/// Active/recovery/staging offsets of one domain, device relative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionMap {
    /// In-use image
    pub active: u32,
    /// Last-known-good image
    pub recovery: u32,
    /// Incoming update scratch
    pub staging: u32,
}

/// Decoded provisioning data
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionData {
    /// Provisioned root-key hash (first `hash_type` digest-length bytes)
    pub root_key_hash: [u8; ROOT_KEY_HASH_LEN],
    /// Hash algorithm the root-key hash was computed with
    pub hash_type: HashType,
    /// BMC region offsets
    pub bmc: RegionMap,
    /// PCH region offsets
    pub pch: RegionMap,
}

impl ProvisionData {
    /// Load and validate provisioning data from UFM0
    ///
    /// A blank page (all 0xFF) reports [`Error::Unprovisioned`]. Active and
    /// recovery regions of a domain must not coincide.
    pub fn load<U: Ufm + ?Sized>(ufm: &mut U) -> Result<Self> {
        let mut root_key_hash = [0u8; ROOT_KEY_HASH_LEN];
        ufm.read(UfmPage::Provision, ROOT_KEY_HASH, &mut root_key_hash)?;

        let bmc = RegionMap {
            active: ufm::read_u32(ufm, UfmPage::Provision, BMC_ACTIVE_REGION_OFFSET)?,
            recovery: ufm::read_u32(ufm, UfmPage::Provision, BMC_RECOVERY_REGION_OFFSET)?,
            staging: ufm::read_u32(ufm, UfmPage::Provision, BMC_STAGING_REGION_OFFSET)?,
        };
        let pch = RegionMap {
            active: ufm::read_u32(ufm, UfmPage::Provision, PCH_ACTIVE_REGION_OFFSET)?,
            recovery: ufm::read_u32(ufm, UfmPage::Provision, PCH_RECOVERY_REGION_OFFSET)?,
            staging: ufm::read_u32(ufm, UfmPage::Provision, PCH_STAGING_REGION_OFFSET)?,
        };

        let blank = root_key_hash.iter().all(|&b| b == 0xFF)
            && bmc.active == 0xFFFF_FFFF
            && pch.active == 0xFFFF_FFFF;
        if blank {
            return Err(Error::Unprovisioned);
        }

        if bmc.active == bmc.recovery || pch.active == pch.recovery {
            log::error!("active and recovery regions coincide");
            return Err(Error::Unprovisioned);
        }

        Ok(Self {
            root_key_hash,
            hash_type: ROOT_KEY_HASH_TYPE,
            bmc,
            pch,
        })
    }

    /// Region map for a domain
    pub fn regions(&self, domain: Domain) -> &RegionMap {
        match domain {
            Domain::Bmc => &self.bmc,
            Domain::Pch => &self.pch,
        }
    }
}

/// Provisioning input written once at manufacture
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Root-key hash (digest-length bytes used, rest left unprogrammed)
    pub root_key_hash: [u8; ROOT_KEY_HASH_LEN],
    /// BMC region offsets
    pub bmc: RegionMap,
    /// PCH region offsets
    pub pch: RegionMap,
}

/// Write provisioning data to a blank UFM0
///
/// Cancellation bitmaps and SVN policies are left at their erased value
/// (all keys live, SVN 0).
pub fn provision<U: Ufm + ?Sized>(ufm: &mut U, cfg: &ProvisionConfig) -> Result<()> {
    if cfg.bmc.active == cfg.bmc.recovery || cfg.pch.active == cfg.pch.recovery {
        return Err(Error::Unprovisioned);
    }

    ufm.write(UfmPage::Provision, ROOT_KEY_HASH, &cfg.root_key_hash)?;
    ufm::write_u32(ufm, UfmPage::Provision, BMC_ACTIVE_REGION_OFFSET, cfg.bmc.active)?;
    ufm::write_u32(ufm, UfmPage::Provision, BMC_RECOVERY_REGION_OFFSET, cfg.bmc.recovery)?;
    ufm::write_u32(ufm, UfmPage::Provision, BMC_STAGING_REGION_OFFSET, cfg.bmc.staging)?;
    ufm::write_u32(ufm, UfmPage::Provision, PCH_ACTIVE_REGION_OFFSET, cfg.pch.active)?;
    ufm::write_u32(ufm, UfmPage::Provision, PCH_RECOVERY_REGION_OFFSET, cfg.pch.recovery)?;
    ufm::write_u32(ufm, UfmPage::Provision, PCH_STAGING_REGION_OFFSET, cfg.pch.staging)?;
    Ok(())
}

/// Decode a unary SVN policy field: the SVN is the count of cleared bits
pub fn svn_from_policy(policy: &[u8; SVN_POLICY_LEN]) -> u8 {
    policy.iter().map(|b| b.count_zeros() as u8).sum()
}

/// Encode an SVN as a unary policy field, clearing bits LSB first
pub fn policy_for_svn(svn: u8) -> [u8; SVN_POLICY_LEN] {
    let mut policy = [0xFFu8; SVN_POLICY_LEN];
    let mut remaining = svn;
    for byte in policy.iter_mut() {
        let clear = core::cmp::min(remaining, 8);
        *byte = (0xFFu16 << clear) as u8;
        remaining -= clear;
        if remaining == 0 {
            break;
        }
    }
    policy
}

/// Read the stored SVN for a policy field
pub fn read_svn<U: Ufm + ?Sized>(ufm: &mut U, policy_offset: u32) -> Result<u8> {
    let mut buf = [0u8; SVN_POLICY_LEN];
    ufm.read(UfmPage::Provision, policy_offset, &mut buf)?;
    Ok(svn_from_policy(&buf))
}

/// Advance the stored SVN; never decreases
pub fn store_svn<U: Ufm + ?Sized>(ufm: &mut U, policy_offset: u32, svn: u8) -> Result<()> {
    if svn > SVN_MAX {
        return Err(Error::Format);
    }
    let stored = read_svn(ufm, policy_offset)?;
    if svn <= stored {
        return Ok(());
    }
    ufm.write(UfmPage::Provision, policy_offset, &policy_for_svn(svn))
}
