//! Host-visible status record

use core::fmt;

use crate::auth::AuthStage;
use crate::error::Error;
use crate::provision::Domain;

/// Per-domain status byte values
pub mod status_code {
    /// Nothing has run yet
    pub const IDLE: u8 = 0x00;
    /// Verification in progress
    pub const VERIFYING: u8 = 0x01;
    /// Active image verified, domain released
    pub const VERIFY_OK: u8 = 0x02;
    /// Active image rebuilt from recovery, then released
    pub const RECOVERED: u8 = 0x03;
    /// Staged update applied and released
    pub const UPDATE_OK: u8 = 0x04;
    /// Hard failure, domain held in reset
    pub const LOCKDOWN: u8 = 0xFF;
}

/// Index of the CPLD entry in [`CpldStatus::region`]
pub const CPLD_REGION: usize = 0;
/// Index of the BMC entry in [`CpldStatus::region`]
pub const BMC_REGION: usize = 1;
/// Index of the PCH entry in [`CpldStatus::region`]
pub const PCH_REGION: usize = 2;

/// Boot phase an error was recorded in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// T-1 boot verification
    T1,
    /// Active-region recovery
    Recovery,
    /// Update arbitration
    Update,
    /// Runtime command handling
    Runtime,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::T1 => "T1",
            Self::Recovery => "RECOVERY",
            Self::Update => "UPDATE",
            Self::Runtime => "RUNTIME",
        };
        f.write_str(name)
    }
}

/// Last failure, reported through the mailbox as kind plus stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastError {
    /// Phase the failure occurred in
    pub phase: Phase,
    /// Affected domain, when the failure is domain-scoped
    pub domain: Option<Domain>,
    /// Verification pipeline stage, for authentication failures
    pub stage: Option<AuthStage>,
    /// Error kind
    pub error: Error,
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.phase)?;
        if let Some(domain) = self.domain {
            write!(f, "/{:?}", domain)?;
        }
        if let Some(stage) = self.stage {
            write!(f, "/{}", stage)?;
        }
        write!(f, "/{}", self.error)
    }
}

/// Active/recovery image selectors for one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdRegion {
    /// Selector of the in-use image copy
    pub active: u8,
    /// Selector of the last-known-good copy
    pub recovery: u8,
}

/// Status record mirrored to the SMBus mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpldStatus {
    /// RoT (CPLD) domain status
    pub cpld_status: u8,
    /// BMC domain status
    pub bmc_status: u8,
    /// PCH domain status
    pub pch_status: u8,
    /// Image selectors for CPLD, BMC and PCH
    pub region: [UpdRegion; 3],
    /// Set once the platform has been decommissioned
    pub decommission_flag: u8,
    /// CPLD recovery progress marker
    pub cpld_recovery: u8,
    /// BMC-to-PCH staging hand-off progress
    pub bmc_to_pch_status: u8,
    /// Set while an attestation request is pending
    #[cfg(feature = "profile-dual-a3")]
    pub attestation_flag: u8,
    /// Reserved
    #[cfg(feature = "profile-dual-a3")]
    pub reserved: [u8; 3],
    /// Reserved
    #[cfg(feature = "profile-legacy-a2")]
    pub reserved: [u8; 4],
    /// Kind and stage of the most recent failure
    pub last_error: Option<LastError>,
}

impl CpldStatus {
    /// Fresh status record, everything idle
    pub fn new() -> Self {
        Self {
            cpld_status: status_code::IDLE,
            bmc_status: status_code::IDLE,
            pch_status: status_code::IDLE,
            region: [UpdRegion::default(); 3],
            decommission_flag: 0,
            cpld_recovery: 0,
            bmc_to_pch_status: 0,
            #[cfg(feature = "profile-dual-a3")]
            attestation_flag: 0,
            #[cfg(feature = "profile-dual-a3")]
            reserved: [0; 3],
            #[cfg(feature = "profile-legacy-a2")]
            reserved: [0; 4],
            last_error: None,
        }
    }

    /// Mutable domain status byte
    pub fn domain_status_mut(&mut self, domain: Domain) -> &mut u8 {
        match domain {
            Domain::Bmc => &mut self.bmc_status,
            Domain::Pch => &mut self.pch_status,
        }
    }

    /// Selector entry for a firmware domain
    pub fn domain_region_mut(&mut self, domain: Domain) -> &mut UpdRegion {
        match domain {
            Domain::Bmc => &mut self.region[BMC_REGION],
            Domain::Pch => &mut self.region[PCH_REGION],
        }
    }
}

impl Default for CpldStatus {
    fn default() -> Self {
        Self::new()
    }
}
