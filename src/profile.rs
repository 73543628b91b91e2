//! Provisioning profile files
//!
//! Describes a platform in TOML: flash geometry, the active/recovery/
//! staging layout per domain, and the development key seeds used by the
//! software crypto engines:
//!
//! ```toml
//! name = "dev-platform"
//!
//! [bmc]
//! size = "1 MiB"
//! active = 0x20000
//! recovery = 0x80000
//! staging = 0xA0000
//!
//! [pch]
//! size = "512 KiB"
//! active = 0x10000
//! recovery = 0x40000
//! staging = 0x70000
//!
//! [keys]
//! root_seed = 161
//! csk = [{ id = 1, seed = 1 }, { id = 2, seed = 2 }]
//! ```

use std::fs;
use std::path::Path;

use pfr_core::flash::FlashSet;
use pfr_core::keys::manifest::KEY_MANIFEST_SIZE;
use pfr_core::keys::RsaPublicKey;
use pfr_core::provision::{self, ProvisionConfig, RegionMap};
use pfr_dummy::{key_manifest_slot, provisioned_root_hash, seeded_key, DummyFlash, DummyUfm};

use crate::commands::CliError;

/// A parsed provisioning profile
#[derive(Debug, serde::Deserialize)]
pub struct Profile {
    /// Display name
    pub name: Option<String>,
    /// BMC flash layout
    pub bmc: DomainProfile,
    /// PCH flash layout
    pub pch: DomainProfile,
    /// Development key material
    pub keys: KeysProfile,
}

/// One domain's flash geometry and region layout
#[derive(Debug, serde::Deserialize)]
pub struct DomainProfile {
    /// Device size ("1 MiB", "0x100000" or bytes)
    #[serde(deserialize_with = "deserialize_size")]
    pub size: u32,
    /// Active region offset
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub active: u32,
    /// Recovery region offset
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub recovery: u32,
    /// Staging region offset
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub staging: u32,
}

/// Development signing keys, derived from seeds
#[derive(Debug, serde::Deserialize)]
pub struct KeysProfile {
    /// Root key seed
    pub root_seed: u8,
    /// Authorized CSKs
    #[serde(default)]
    pub csk: Vec<CskEntry>,
}

/// One authorized CSK
#[derive(Debug, serde::Deserialize)]
pub struct CskEntry {
    /// Key id within the key manifest
    pub id: u8,
    /// Key seed
    pub seed: u8,
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u32),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a size that can be a number, hex, or "16 MiB"-style
fn deserialize_size<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeOrInt {
        Int(u32),
        Str(String),
    }

    match SizeOrInt::deserialize(deserializer)? {
        SizeOrInt::Int(n) => Ok(n),
        SizeOrInt::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size string like "16 MiB", "0x100000" or "4096"
fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();

    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let lower = s.to_lowercase();
    let (num, multiplier) = if let Some(n) = lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    num.parse::<u32>()
        .map(|n| n * multiplier)
        .map_err(|e| format!("invalid size: {}", e))
}

impl Profile {
    /// Load and validate a profile file
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = fs::read_to_string(path)?;
        let profile: Profile =
            toml::from_str(&text).map_err(|e| CliError::Profile(e.to_string()))?;

        for (name, domain) in [("bmc", &profile.bmc), ("pch", &profile.pch)] {
            for offset in [domain.active, domain.recovery, domain.staging] {
                if offset >= domain.size {
                    return Err(CliError::Profile(format!(
                        "{}: region offset 0x{:x} outside the device",
                        name, offset
                    )));
                }
            }
        }
        Ok(profile)
    }

    /// The profile's root key
    pub fn root_key(&self) -> RsaPublicKey {
        seeded_key(self.keys.root_seed, 384)
    }

    /// Build the emulated flash set and provisioned UFM
    pub fn build_system(&self) -> Result<(FlashSet<DummyFlash>, DummyUfm), CliError> {
        let root = self.root_key();

        let csks: Vec<(u8, RsaPublicKey)> = self
            .keys
            .csk
            .iter()
            .map(|entry| (entry.id, seeded_key(entry.seed, 384)))
            .collect();
        let csk_refs: Vec<(u8, &RsaPublicKey)> =
            csks.iter().map(|(id, key)| (*id, key)).collect();

        let mut rot = DummyFlash::new(KEY_MANIFEST_SIZE as usize * 16);
        rot.program(0, &key_manifest_slot(&root, &csk_refs));

        let mut ufm = DummyUfm::new();
        provision::provision(
            &mut ufm,
            &ProvisionConfig {
                root_key_hash: provisioned_root_hash(&root),
                bmc: RegionMap {
                    active: self.bmc.active,
                    recovery: self.bmc.recovery,
                    staging: self.bmc.staging,
                },
                pch: RegionMap {
                    active: self.pch.active,
                    recovery: self.pch.recovery,
                    staging: self.pch.staging,
                },
            },
        )?;

        let bmc = DummyFlash::new(self.bmc.size as usize);
        let pch = DummyFlash::new(self.pch.size as usize);
        Ok((FlashSet::new(bmc, pch, rot), ufm))
    }
}
