//! Boot, runtime and update orchestration

use crate::auth;
use crate::container::{
    CancellationPayload, ImageFormat, RecoveryHeader, RecoverySection, CANCELLATION_PAYLOAD_SIZE,
    RECOVERY_SECTION_MAGIC,
};
use crate::crypto::{HashEngine, RsaEngine};
use crate::error::{Error, Result};
use crate::flash::{Flash, FlashId, FlashSet};
use crate::keys::{self, manifest, ProtectedContent};
use crate::provision::{self, Domain, ProvisionData, RegionMap};
use crate::recovery;
use crate::ufm::{Ufm, UfmPage, PROVISION_UFM_SIZE};

use super::journal::{self, FlowKind, StepMask};
use super::platform::{HostCommand, Mailbox, MuxOwner, ResetControl, RESET_SETTLE_US};
use super::status::{status_code, CpldStatus, LastError, Phase};

/// Top-level platform states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfrState {
    /// Power-on
    Init,
    /// Hosts held in reset, muxes owned by the RoT
    BootHold,
    /// T-1 verification of the active images
    TMinus1Verify,
    /// Active-region recovery during boot
    FirmwareRecovery,
    /// Releasing a verified domain
    Release,
    /// Hosts running, mailbox monitored
    Runtime,
    /// Staged capsule being arbitrated
    UpdateStaged,
    /// Runtime-triggered recovery
    RecoveryInProgress,
    /// Decommission in progress
    Decommission,
    /// Terminal hard-failure state
    Lockdown,
}

/// The platform state machine
///
/// Owns the flash set, the UFM store, the crypto engines and the
/// reset/mailbox collaborators. The first-boot flag and mux ownership are
/// explicit state here rather than globals.
pub struct PlatformStateMachine<F, U, H, R, P, M> {
    flash: FlashSet<F>,
    ufm: U,
    hash: H,
    rsa: R,
    platform: P,
    mailbox: M,
    state: PfrState,
    status: CpldStatus,
    provision: Option<ProvisionData>,
    first_boot: bool,
}

impl<F, U, H, R, P, M> PlatformStateMachine<F, U, H, R, P, M>
where
    F: Flash,
    U: Ufm,
    H: HashEngine,
    R: RsaEngine,
    P: ResetControl,
    M: Mailbox,
{
    /// Assemble the machine; nothing runs until [`Self::run_to_runtime`]
    pub fn new(flash: FlashSet<F>, ufm: U, hash: H, rsa: R, platform: P, mailbox: M) -> Self {
        Self {
            flash,
            ufm,
            hash,
            rsa,
            platform,
            mailbox,
            state: PfrState::Init,
            status: CpldStatus::new(),
            provision: None,
            first_boot: true,
        }
    }

    /// Current state
    pub fn state(&self) -> PfrState {
        self.state
    }

    /// Current host-visible status record
    pub fn status(&self) -> &CpldStatus {
        &self.status
    }

    /// Access the flash devices (host tooling)
    pub fn flash_mut(&mut self) -> &mut FlashSet<F> {
        &mut self.flash
    }

    /// Access the UFM store (host tooling)
    pub fn ufm_mut(&mut self) -> &mut U {
        &mut self.ufm
    }

    /// Access the reset-line collaborator (host tooling)
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Access the mailbox collaborator (host tooling)
    pub fn mailbox_mut(&mut self) -> &mut M {
        &mut self.mailbox
    }

    /// Run the boot flow: hold, verify, recover if needed, release
    ///
    /// Ends in `Runtime` or `Lockdown`.
    pub fn run_to_runtime(&mut self) -> PfrState {
        if self.state == PfrState::Lockdown {
            return self.state;
        }

        self.boot_hold();
        match self.t_minus_1() {
            Ok(()) => {
                self.state = PfrState::Runtime;
            }
            Err(e) => {
                self.enter_lockdown(Phase::T1, None, e);
            }
        }
        self.mailbox.publish(&self.status);
        self.state
    }

    /// One runtime tick: handle a pending host command, publish status
    pub fn tick(&mut self) -> PfrState {
        if self.state == PfrState::Lockdown {
            self.mailbox.publish(&self.status);
            return self.state;
        }

        if let Some(command) = self.mailbox.poll_command() {
            log::info!("host command: {:?}", command);
            match command {
                HostCommand::Update(domain) => self.handle_update(domain),
                HostCommand::Decommission => self.handle_decommission(),
                HostCommand::Reset => {
                    // The caller re-runs the boot flow from here
                    self.state = PfrState::Init;
                }
                HostCommand::Attest => {
                    #[cfg(feature = "profile-dual-a3")]
                    {
                        self.status.attestation_flag = 1;
                    }
                }
            }
        }

        self.mailbox.publish(&self.status);
        self.state
    }

    fn regions(&self, domain: Domain) -> Result<RegionMap> {
        self.provision
            .as_ref()
            .map(|p| *p.regions(domain))
            .ok_or(Error::Unprovisioned)
    }

    fn record_error(
        &mut self,
        phase: Phase,
        domain: Option<Domain>,
        stage: Option<crate::auth::AuthStage>,
        error: Error,
    ) {
        let last = LastError {
            phase,
            domain,
            stage,
            error,
        };
        log::error!("{}", last);
        self.status.last_error = Some(last);
    }

    fn enter_lockdown(&mut self, phase: Phase, domain: Option<Domain>, error: Error) {
        // A LockdownRequested escalation keeps the more specific error
        // already recorded on the way here
        if error != Error::LockdownRequested || self.status.last_error.is_none() {
            self.record_error(phase, domain, None, error);
        }
        self.status.cpld_status = status_code::LOCKDOWN;
        self.status.bmc_status = status_code::LOCKDOWN;
        self.status.pch_status = status_code::LOCKDOWN;
        self.state = PfrState::Lockdown;
        self.mailbox.publish(&self.status);
        log::error!("platform lockdown");
    }

    // ---- reset-line sequencing ----

    fn boot_hold(&mut self) {
        self.state = PfrState::BootHold;

        self.platform.bmc_extrst(true);
        self.platform.delay_us(RESET_SETTLE_US);
        // Only pulse SRST on the first boot; toggling it at runtime
        // disturbs the host VGA path
        if self.first_boot {
            self.platform.bmc_srst(true);
            self.platform.delay_us(RESET_SETTLE_US);
        }
        self.platform.spi_mux(Domain::Bmc, MuxOwner::Rot);
        log::info!("hold BMC");

        self.platform.pch_rst(true);
        self.platform.delay_us(RESET_SETTLE_US);
        self.platform.spi_mux(Domain::Pch, MuxOwner::Rot);
        log::info!("hold PCH");
    }

    fn hold_domain(&mut self, domain: Domain) {
        match domain {
            Domain::Bmc => self.platform.bmc_extrst(true),
            Domain::Pch => self.platform.pch_rst(true),
        }
        self.platform.delay_us(RESET_SETTLE_US);
        self.platform.spi_mux(domain, MuxOwner::Rot);
    }

    fn release_domain(&mut self, domain: Domain) {
        self.state = PfrState::Release;
        self.platform.spi_mux(domain, MuxOwner::Passthrough);
        match domain {
            Domain::Bmc => {
                if self.first_boot {
                    self.platform.bmc_srst(false);
                    self.platform.delay_us(RESET_SETTLE_US);
                    self.first_boot = false;
                }
                self.platform.bmc_extrst(false);
                self.platform.delay_us(RESET_SETTLE_US);
                log::info!("release BMC");
            }
            Domain::Pch => {
                self.platform.pch_rst(false);
                self.platform.delay_us(RESET_SETTLE_US);
                log::info!("release PCH");
            }
        }
    }

    // ---- boot flow ----

    fn t_minus_1(&mut self) -> Result<()> {
        self.state = PfrState::TMinus1Verify;

        self.provision = Some(ProvisionData::load(&mut self.ufm)?);

        // The whole key chain must stand before any image is trusted
        manifest::verify_all_key_manifests(
            self.flash.device(FlashId::RotInternalKey),
            &mut self.ufm,
            &mut self.hash,
            &mut self.rsa,
        )?;

        self.refresh_selectors()?;
        self.resume_open_flow()?;

        for domain in [Domain::Bmc, Domain::Pch] {
            self.verify_domain(domain)?;
        }
        Ok(())
    }

    fn verify_domain(&mut self, domain: Domain) -> Result<()> {
        *self.status.domain_status_mut(domain) = status_code::VERIFYING;
        let regions = self.regions(domain)?;

        match auth::verify_image(
            &mut self.flash,
            &mut self.ufm,
            &mut self.hash,
            &mut self.rsa,
            domain.flash_id(),
            regions.active,
            domain.pfm_class(),
        ) {
            Ok(_) => {
                *self.status.domain_status_mut(domain) = status_code::VERIFY_OK;
                self.release_domain(domain);
                Ok(())
            }
            Err(failure) => {
                // I/O errors and authentication failures both route to
                // recovery; only the recovery source decides lockdown
                self.record_error(Phase::T1, Some(domain), Some(failure.stage), failure.error);
                self.do_recovery(domain, Phase::T1)?;
                *self.status.domain_status_mut(domain) = status_code::RECOVERED;
                self.release_domain(domain);
                Ok(())
            }
        }
    }

    fn do_recovery(&mut self, domain: Domain, phase: Phase) -> Result<()> {
        self.state = match phase {
            Phase::T1 => PfrState::FirmwareRecovery,
            _ => PfrState::RecoveryInProgress,
        };
        let regions = self.regions(domain)?;

        let mut record = journal::begin(&mut self.ufm, domain, FlowKind::Recovery)?;

        // An untrusted recovery source leaves nothing to boot from
        if let Err(failure) = auth::verify_image(
            &mut self.flash,
            &mut self.ufm,
            &mut self.hash,
            &mut self.rsa,
            domain.flash_id(),
            regions.recovery,
            domain.capsule_class(),
        ) {
            self.record_error(
                Phase::Recovery,
                Some(domain),
                Some(failure.stage),
                failure.error,
            );
            let _ = journal::advance(&mut self.ufm, &mut record, StepMask::ABORTED);
            let _ = journal::complete(&mut self.ufm, &mut record);
            return Err(Error::LockdownRequested);
        }
        journal::advance(&mut self.ufm, &mut record, StepMask::SOURCE_VERIFIED)?;

        recovery::recover_active_region(&mut self.flash, &mut self.ufm, domain)?;
        journal::advance(&mut self.ufm, &mut record, StepMask::APPLIED)?;

        if let Err(failure) = auth::verify_image(
            &mut self.flash,
            &mut self.ufm,
            &mut self.hash,
            &mut self.rsa,
            domain.flash_id(),
            regions.active,
            domain.pfm_class(),
        ) {
            // Second failure on a freshly rebuilt region
            self.record_error(
                Phase::Recovery,
                Some(domain),
                Some(failure.stage),
                failure.error,
            );
            return Err(Error::LockdownRequested);
        }
        journal::advance(&mut self.ufm, &mut record, StepMask::REVERIFIED)?;
        journal::complete(&mut self.ufm, &mut record)?;
        Ok(())
    }

    /// Resume the journaled flow a power loss interrupted
    fn resume_open_flow(&mut self) -> Result<()> {
        let record = match journal::open_flow(&mut self.ufm)? {
            Some(record) => record,
            None => return Ok(()),
        };
        let mut record = record;
        let domain = record.domain;
        log::info!("resuming interrupted {:?} flow for {:?}", record.kind, domain);

        match record.kind {
            FlowKind::Recovery => {
                // Close the stale record; T-1 verification below re-enters
                // recovery if the active region is still torn
                journal::advance(&mut self.ufm, &mut record, StepMask::ABORTED)?;
                journal::complete(&mut self.ufm, &mut record)?;
            }
            FlowKind::Update => {
                if !record.steps.contains(StepMask::SOURCE_VERIFIED) {
                    // Nothing was applied; abandon the flow
                    journal::advance(&mut self.ufm, &mut record, StepMask::ABORTED)?;
                    journal::complete(&mut self.ufm, &mut record)?;
                    return Ok(());
                }
                self.resume_update(domain, &mut record)?;
            }
        }
        Ok(())
    }

    fn resume_update(
        &mut self,
        domain: Domain,
        record: &mut journal::JournalRecord,
    ) -> Result<()> {
        let regions = self.regions(domain)?;

        let desc = match auth::verify_image(
            &mut self.flash,
            &mut self.ufm,
            &mut self.hash,
            &mut self.rsa,
            domain.flash_id(),
            regions.staging,
            domain.capsule_class(),
        ) {
            Ok(desc) => desc,
            Err(failure) => {
                // The staged capsule no longer verifies; abandon and let
                // T-1 judge the active region
                self.record_error(
                    Phase::Update,
                    Some(domain),
                    Some(failure.stage),
                    failure.error,
                );
                journal::advance(&mut self.ufm, record, StepMask::ABORTED)?;
                journal::complete(&mut self.ufm, record)?;
                return Ok(());
            }
        };

        // Redo the promotion from the staged capsule; erases rerun
        // idempotently over whatever the power loss left behind
        if let Err(e) = recovery::promote_staged(&mut self.flash, &mut self.ufm, domain) {
            if e == Error::UfmOtpViolation {
                return Err(e);
            }
            self.record_error(Phase::Update, Some(domain), None, e);
            journal::advance(&mut self.ufm, record, StepMask::ABORTED)?;
            journal::complete(&mut self.ufm, record)?;
            return Ok(());
        }
        if !record.steps.contains(StepMask::APPLIED) {
            journal::advance(&mut self.ufm, record, StepMask::APPLIED)?;
        }

        if auth::verify_image(
            &mut self.flash,
            &mut self.ufm,
            &mut self.hash,
            &mut self.rsa,
            domain.flash_id(),
            regions.active,
            domain.pfm_class(),
        )
        .is_err()
        {
            journal::advance(&mut self.ufm, record, StepMask::ABORTED)?;
            journal::complete(&mut self.ufm, record)?;
            return Ok(());
        }
        if !record.steps.contains(StepMask::REVERIFIED) {
            journal::advance(&mut self.ufm, record, StepMask::REVERIFIED)?;
        }

        if let Some(svn) = desc.svn {
            provision::store_svn(&mut self.ufm, domain.svn_policy(), svn)?;
        }
        if !record.steps.contains(StepMask::SELECTOR_SWAPPED) {
            journal::advance(&mut self.ufm, record, StepMask::SELECTOR_SWAPPED)?;
        }
        journal::complete(&mut self.ufm, record)?;
        self.refresh_selectors()?;
        log::info!("resumed {:?} update completed", domain);
        Ok(())
    }

    fn refresh_selectors(&mut self) -> Result<()> {
        for domain in [Domain::Bmc, Domain::Pch] {
            let count = journal::completed_updates(&mut self.ufm, domain)?;
            let region = self.status.domain_region_mut(domain);
            region.active = (count % 2) as u8;
            region.recovery = 1 - region.active;
        }
        Ok(())
    }

    // ---- runtime flows ----

    fn handle_update(&mut self, domain: Domain) {
        self.state = PfrState::UpdateStaged;

        let regions = match self.regions(domain) {
            Ok(regions) => regions,
            Err(e) => {
                self.enter_lockdown(Phase::Update, Some(domain), e);
                return;
            }
        };

        // The PCH capsule is staged behind the BMC capsule in BMC staging
        // and hops to PCH staging first
        if domain == Domain::Pch {
            if let Err(e) = recovery::stage_to_pch_staging(
                &mut self.flash,
                &mut self.ufm,
                &mut self.hash,
                &mut self.rsa,
                false,
            ) {
                if e == Error::UfmOtpViolation {
                    self.enter_lockdown(Phase::Update, Some(domain), e);
                } else {
                    self.record_error(Phase::Update, Some(domain), None, e);
                    self.state = PfrState::Runtime;
                }
                return;
            }
            self.status.bmc_to_pch_status = 1;
        }

        let mut record = match journal::begin(&mut self.ufm, domain, FlowKind::Update) {
            Ok(record) => record,
            Err(e) => {
                self.enter_lockdown(Phase::Update, Some(domain), e);
                return;
            }
        };

        // Source verification; a rejected capsule leaves active untouched
        let desc = match auth::verify_image(
            &mut self.flash,
            &mut self.ufm,
            &mut self.hash,
            &mut self.rsa,
            domain.flash_id(),
            regions.staging,
            domain.capsule_class(),
        ) {
            Ok(desc) => desc,
            Err(failure) => {
                self.record_error(
                    Phase::Update,
                    Some(domain),
                    Some(failure.stage),
                    failure.error,
                );
                let _ = journal::advance(&mut self.ufm, &mut record, StepMask::ABORTED);
                let _ = journal::complete(&mut self.ufm, &mut record);
                self.state = PfrState::Runtime;
                return;
            }
        };

        // Standalone cancellation capsules clear a policy bit and stop
        if desc.format == ImageFormat::Kcc {
            let result = self.apply_cancellation(domain, regions.staging);
            let close = journal::advance(
                &mut self.ufm,
                &mut record,
                StepMask::SOURCE_VERIFIED | StepMask::ABORTED,
            )
            .and_then(|_| journal::complete(&mut self.ufm, &mut record));
            match result.and(close) {
                Ok(()) => self.state = PfrState::Runtime,
                Err(e) if e == Error::UfmOtpViolation => {
                    self.enter_lockdown(Phase::Update, Some(domain), e)
                }
                Err(e) => {
                    self.record_error(Phase::Update, Some(domain), None, e);
                    self.state = PfrState::Runtime;
                }
            }
            return;
        }

        if let Err(e) = journal::advance(&mut self.ufm, &mut record, StepMask::SOURCE_VERIFIED) {
            self.enter_lockdown(Phase::Update, Some(domain), e);
            return;
        }

        // Hold the host while its active region is rewritten
        self.hold_domain(domain);

        match self.promote_and_verify(domain, &mut record, desc.svn) {
            Ok(()) => {
                *self.status.domain_status_mut(domain) = status_code::UPDATE_OK;
                self.release_domain(domain);
                self.state = PfrState::Runtime;
            }
            Err(Error::UfmOtpViolation) => {
                self.enter_lockdown(Phase::Update, Some(domain), Error::UfmOtpViolation);
            }
            Err(e) => {
                // The active region may be torn; rebuild it from recovery
                self.record_error(Phase::Update, Some(domain), None, e);
                let _ = journal::advance(&mut self.ufm, &mut record, StepMask::ABORTED);
                let _ = journal::complete(&mut self.ufm, &mut record);
                match self.do_recovery(domain, Phase::Update) {
                    Ok(()) => {
                        *self.status.domain_status_mut(domain) = status_code::RECOVERED;
                        self.release_domain(domain);
                        self.state = PfrState::Runtime;
                    }
                    Err(e) => self.enter_lockdown(Phase::Recovery, Some(domain), e),
                }
            }
        }
    }

    fn promote_and_verify(
        &mut self,
        domain: Domain,
        record: &mut journal::JournalRecord,
        svn: Option<u8>,
    ) -> Result<()> {
        let regions = self.regions(domain)?;

        recovery::promote_staged(&mut self.flash, &mut self.ufm, domain)?;
        journal::advance(&mut self.ufm, record, StepMask::APPLIED)?;

        auth::verify_image(
            &mut self.flash,
            &mut self.ufm,
            &mut self.hash,
            &mut self.rsa,
            domain.flash_id(),
            regions.active,
            domain.pfm_class(),
        )
        .map_err(Error::from)?;
        journal::advance(&mut self.ufm, record, StepMask::REVERIFIED)?;

        // Promotion is the only place the stored SVN advances
        if let Some(svn) = svn {
            provision::store_svn(&mut self.ufm, domain.svn_policy(), svn)?;
        }
        journal::advance(&mut self.ufm, record, StepMask::SELECTOR_SWAPPED)?;
        journal::complete(&mut self.ufm, record)?;
        self.refresh_selectors()?;
        Ok(())
    }

    fn apply_cancellation(&mut self, domain: Domain, staging: u32) -> Result<()> {
        let payload = {
            let flash = self.flash.device(domain.flash_id());
            let header = RecoveryHeader::read_from(flash, staging)?;

            let mut platform_length = [0u8; 1];
            flash.read(staging + header.header_length as u32, &mut platform_length)?;
            let section_addr = staging + header.header_length as u32 + platform_length[0] as u32 + 1;

            let section = RecoverySection::read_from(flash, section_addr, RECOVERY_SECTION_MAGIC)?;
            if (section.section_length as usize) < CANCELLATION_PAYLOAD_SIZE {
                return Err(Error::Format);
            }

            let mut payload = [0u8; CANCELLATION_PAYLOAD_SIZE];
            flash.read(section_addr + section.header_length as u32, &mut payload)?;
            CancellationPayload::parse(&payload)?
        };

        keys::cancel_csk_key_id(&mut self.ufm, payload.pc, payload.key_id)?;
        log::info!(
            "cancellation capsule processed: {:?} key id {}",
            payload.pc,
            payload.key_id
        );
        Ok(())
    }

    fn handle_decommission(&mut self) {
        self.state = PfrState::Decommission;

        let staging = match self.regions(Domain::Bmc) {
            Ok(regions) => regions.staging,
            Err(e) => {
                self.enter_lockdown(Phase::Runtime, None, e);
                return;
            }
        };

        match auth::verify_image(
            &mut self.flash,
            &mut self.ufm,
            &mut self.hash,
            &mut self.rsa,
            FlashId::Bmc,
            staging,
            ProtectedContent::Decommission,
        ) {
            Ok(desc) if desc.format == ImageFormat::Dcc => {}
            Ok(_) => {
                self.record_error(Phase::Runtime, None, None, Error::Format);
                self.state = PfrState::Runtime;
                return;
            }
            Err(failure) => {
                self.record_error(Phase::Runtime, None, Some(failure.stage), failure.error);
                self.state = PfrState::Runtime;
                return;
            }
        }

        // Clear every provisioning bit; the platform is unusable until
        // re-manufactured
        let zeros = [0u8; 64];
        for offset in (0..PROVISION_UFM_SIZE as u32).step_by(zeros.len()) {
            if let Err(e) = self.ufm.write(UfmPage::Provision, offset, &zeros) {
                self.enter_lockdown(Phase::Runtime, None, e);
                return;
            }
        }

        self.provision = None;
        self.status.decommission_flag = 1;
        log::info!("platform decommissioned");
        self.enter_lockdown(Phase::Runtime, None, Error::LockdownRequested);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthStage;
    use crate::keys::manifest::KEY_MANIFEST_SIZE;
    use crate::testutil::{
        build_key_manifest_slot, test_csk, test_provision, test_regions, test_sign, ImageSpec,
        TestFlash, TestHash, TestRsa, TestUfm,
    };
    use std::collections::VecDeque;
    use std::vec;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        BmcExtRst(bool),
        BmcSrst(bool),
        PchRst(bool),
        Mux(Domain, MuxOwner),
        Delay,
    }

    struct TestPlatform {
        events: Vec<Event>,
    }

    impl ResetControl for TestPlatform {
        fn bmc_extrst(&mut self, assert: bool) {
            self.events.push(Event::BmcExtRst(assert));
        }

        fn bmc_srst(&mut self, assert: bool) {
            self.events.push(Event::BmcSrst(assert));
        }

        fn pch_rst(&mut self, assert: bool) {
            self.events.push(Event::PchRst(assert));
        }

        fn spi_mux(&mut self, domain: Domain, owner: MuxOwner) {
            self.events.push(Event::Mux(domain, owner));
        }

        fn delay_us(&mut self, _us: u32) {
            self.events.push(Event::Delay);
        }
    }

    struct TestMailbox {
        commands: VecDeque<HostCommand>,
        published: Vec<CpldStatus>,
    }

    impl Mailbox for TestMailbox {
        fn publish(&mut self, status: &CpldStatus) {
            self.published.push(status.clone());
        }

        fn poll_command(&mut self) -> Option<HostCommand> {
            self.commands.pop_front()
        }
    }

    type Machine =
        PlatformStateMachine<TestFlash, TestUfm, TestHash, TestRsa, TestPlatform, TestMailbox>;

    struct Fixture {
        machine: Machine,
        bmc_active: Vec<u8>,
        pch_active: Vec<u8>,
    }

    /// Provisioned system with valid active and recovery images in both
    /// domains and one key manifest authorizing CSK seeds 1 and 2
    fn fixture() -> Fixture {
        let (bmc_map, pch_map) = test_regions();

        let mut rot = TestFlash::new(KEY_MANIFEST_SIZE as usize * 16);
        rot.program(
            0,
            &build_key_manifest_slot(&[(1, &test_csk(1)), (2, &test_csk(2))]),
        );

        let mut ufm = TestUfm::new();
        test_provision(&mut ufm);

        let bmc_active = ImageSpec::new(ImageFormat::Bmc).build();
        let bmc_recovery = ImageSpec::new(ImageFormat::Bmc)
            .pfm_dest(0x6_F000)
            .sections(vec![(bmc_map.active, bmc_active.clone())])
            .build();
        let mut bmc = TestFlash::new(0x10_0000);
        bmc.program(bmc_map.active, &bmc_active);
        bmc.program(bmc_map.recovery, &bmc_recovery);

        let pch_active = ImageSpec::new(ImageFormat::Pch).build();
        let pch_recovery = ImageSpec::new(ImageFormat::Pch)
            .pfm_dest(0x3_F000)
            .sections(vec![(pch_map.active, pch_active.clone())])
            .build();
        let mut pch = TestFlash::new(0x8_0000);
        pch.program(pch_map.active, &pch_active);
        pch.program(pch_map.recovery, &pch_recovery);

        let machine = PlatformStateMachine::new(
            FlashSet::new(bmc, pch, rot),
            ufm,
            TestHash::new(),
            TestRsa::new(),
            TestPlatform { events: Vec::new() },
            TestMailbox {
                commands: VecDeque::new(),
                published: Vec::new(),
            },
        );

        Fixture {
            machine,
            bmc_active,
            pch_active,
        }
    }

    fn active_bytes(machine: &mut Machine, domain: Domain, len: usize) -> Vec<u8> {
        let (bmc_map, pch_map) = test_regions();
        let start = match domain {
            Domain::Bmc => bmc_map.active,
            Domain::Pch => pch_map.active,
        } as usize;
        machine.flash.device(domain.flash_id()).data()[start..start + len].to_vec()
    }

    fn corrupt(machine: &mut Machine, id: FlashId, addr: u32) {
        let flash = machine.flash.device(id);
        let byte = flash.data()[addr as usize];
        flash.program(addr, &[byte ^ 0x40]);
    }

    #[test]
    fn test_boot_good_releases_both_domains() {
        let mut f = fixture();
        assert_eq!(f.machine.run_to_runtime(), PfrState::Runtime);
        assert_eq!(f.machine.status().bmc_status, status_code::VERIFY_OK);
        assert_eq!(f.machine.status().pch_status, status_code::VERIFY_OK);
        assert!(f.machine.status().last_error.is_none());

        let events = &f.machine.platform.events;
        // Hold: resets asserted and muxes taken before any release
        assert_eq!(events[0], Event::BmcExtRst(true));
        assert!(events.contains(&Event::BmcSrst(true)));
        assert!(events.contains(&Event::Mux(Domain::Bmc, MuxOwner::Rot)));
        assert!(events.contains(&Event::PchRst(true)));
        // Release: muxes handed back, resets deasserted
        assert!(events.contains(&Event::Mux(Domain::Bmc, MuxOwner::Passthrough)));
        assert!(events.contains(&Event::BmcExtRst(false)));
        assert!(events.contains(&Event::PchRst(false)));

        // Every reset toggle is followed by the settle delay
        let toggles = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::BmcExtRst(_) | Event::BmcSrst(_) | Event::PchRst(_)
                )
            })
            .count();
        let delays = events.iter().filter(|e| **e == Event::Delay).count();
        assert_eq!(toggles, delays);
    }

    #[test]
    fn test_srst_pulsed_on_first_boot_only() {
        let mut f = fixture();
        f.machine.run_to_runtime();
        let first: usize = f
            .machine
            .platform
            .events
            .iter()
            .filter(|e| matches!(e, Event::BmcSrst(_)))
            .count();
        assert_eq!(first, 2); // asserted and released once

        f.machine.platform.events.clear();
        f.machine.mailbox.commands.push_back(HostCommand::Reset);
        assert_eq!(f.machine.tick(), PfrState::Init);
        assert_eq!(f.machine.run_to_runtime(), PfrState::Runtime);
        assert!(!f
            .machine
            .platform
            .events
            .iter()
            .any(|e| matches!(e, Event::BmcSrst(_))));
    }

    #[test]
    fn test_corrupted_active_is_recovered() {
        let mut f = fixture();
        let (_, pch_map) = test_regions();
        corrupt(&mut f.machine, FlashId::Pch, pch_map.active + 0x40);

        assert_eq!(f.machine.run_to_runtime(), PfrState::Runtime);
        assert_eq!(f.machine.status().pch_status, status_code::RECOVERED);
        assert_eq!(f.machine.status().bmc_status, status_code::VERIFY_OK);

        let last = f.machine.status().last_error.unwrap();
        assert_eq!(last.phase, Phase::T1);
        assert_eq!(last.domain, Some(Domain::Pch));
        assert_eq!(last.error, Error::SignatureInvalid);

        let len = f.pch_active.len();
        assert_eq!(active_bytes(&mut f.machine, Domain::Pch, len), f.pch_active);
    }

    #[test]
    fn test_empty_key_partition_locks_down() {
        let mut f = fixture();
        f.machine.flash.device(FlashId::RotInternalKey).fill(0xFF);

        assert_eq!(f.machine.run_to_runtime(), PfrState::Lockdown);
        assert_eq!(f.machine.status().bmc_status, status_code::LOCKDOWN);
        // No domain was released
        assert!(!f
            .machine
            .platform
            .events
            .iter()
            .any(|e| matches!(e, Event::Mux(_, MuxOwner::Passthrough))));
    }

    #[test]
    fn test_unverifiable_recovery_source_locks_down() {
        let mut f = fixture();
        let (_, pch_map) = test_regions();
        corrupt(&mut f.machine, FlashId::Pch, pch_map.active + 0x40);
        corrupt(&mut f.machine, FlashId::Pch, pch_map.recovery + 0x60);

        assert_eq!(f.machine.run_to_runtime(), PfrState::Lockdown);
        let last = f.machine.status().last_error.unwrap();
        assert_eq!(last.phase, Phase::Recovery);
    }

    #[test]
    fn test_unprovisioned_platform_locks_down() {
        let mut f = fixture();
        f.machine.ufm = TestUfm::new();
        assert_eq!(f.machine.run_to_runtime(), PfrState::Lockdown);
        assert_eq!(
            f.machine.status().last_error.unwrap().error,
            Error::Unprovisioned
        );
    }

    #[test]
    fn test_update_flow_promotes_and_advances_svn() {
        let mut f = fixture();
        let (bmc_map, _) = test_regions();

        let new_active = ImageSpec::new(ImageFormat::Bmc).svn(3).build();
        let capsule = ImageSpec::new(ImageFormat::Bmc)
            .svn(3)
            .pfm_dest(0x6_E000)
            .sections(vec![(bmc_map.active, new_active.clone())])
            .build();

        f.machine.run_to_runtime();
        f.machine
            .flash
            .device(FlashId::Bmc)
            .program(bmc_map.staging, &capsule);
        f.machine
            .mailbox
            .commands
            .push_back(HostCommand::Update(Domain::Bmc));

        assert_eq!(f.machine.tick(), PfrState::Runtime);
        assert_eq!(f.machine.status().bmc_status, status_code::UPDATE_OK);

        let len = new_active.len();
        assert_eq!(active_bytes(&mut f.machine, Domain::Bmc, len), new_active);
        assert_eq!(
            provision::read_svn(&mut f.machine.ufm, provision::BMC_SVN_POLICY).unwrap(),
            3
        );
        // Selector swapped once, recovery copy untouched
        assert_eq!(
            f.machine.status().region[crate::state::status::BMC_REGION].active,
            1
        );
        assert_eq!(
            journal::completed_updates(&mut f.machine.ufm, Domain::Bmc).unwrap(),
            1
        );
    }

    #[test]
    fn test_update_with_cancelled_key_is_rejected() {
        let mut f = fixture();
        let (bmc_map, _) = test_regions();

        let new_active = ImageSpec::new(ImageFormat::Bmc).svn(3).build();
        let capsule = ImageSpec::new(ImageFormat::Bmc)
            .svn(3)
            .pfm_dest(0x6_E000)
            .sections(vec![(bmc_map.active, new_active)])
            .build();

        f.machine.run_to_runtime();
        keys::cancel_csk_key_id(&mut f.machine.ufm, ProtectedContent::BmcCapsule, 1).unwrap();
        f.machine
            .flash
            .device(FlashId::Bmc)
            .program(bmc_map.staging, &capsule);
        f.machine
            .mailbox
            .commands
            .push_back(HostCommand::Update(Domain::Bmc));

        assert_eq!(f.machine.tick(), PfrState::Runtime);

        let last = f.machine.status().last_error.unwrap();
        assert_eq!(last.error, Error::KeyCancelled);
        assert_eq!(last.stage, Some(AuthStage::KeyCancellation));
        // Active unchanged, selector not swapped
        let len = f.bmc_active.len();
        assert_eq!(active_bytes(&mut f.machine, Domain::Bmc, len), f.bmc_active);
        assert_eq!(
            journal::completed_updates(&mut f.machine.ufm, Domain::Bmc).unwrap(),
            0
        );
    }

    #[test]
    fn test_svn_rollback_is_rejected_then_equal_and_higher_accepted() {
        let mut f = fixture();
        let (bmc_map, _) = test_regions();

        // Boot with the shipped image first, then raise the floor
        f.machine.run_to_runtime();
        provision::store_svn(&mut f.machine.ufm, provision::BMC_SVN_POLICY, 7).unwrap();

        let stage_capsule = |f: &mut Fixture, svn: u8| {
            let new_active = ImageSpec::new(ImageFormat::Bmc).svn(svn).build();
            let capsule = ImageSpec::new(ImageFormat::Bmc)
                .svn(svn)
                .pfm_dest(0x6_E000)
                .sections(vec![(bmc_map.active, new_active)])
                .build();
            f.machine
                .flash
                .device(FlashId::Bmc)
                .program(bmc_map.staging, &capsule);
            f.machine
                .mailbox
                .commands
                .push_back(HostCommand::Update(Domain::Bmc));
        };

        stage_capsule(&mut f, 5);
        f.machine.tick();
        assert_eq!(
            f.machine.status().last_error.unwrap().error,
            Error::SvnTooLow
        );
        assert_eq!(
            provision::read_svn(&mut f.machine.ufm, provision::BMC_SVN_POLICY).unwrap(),
            7
        );

        stage_capsule(&mut f, 7);
        f.machine.tick();
        assert_eq!(f.machine.status().bmc_status, status_code::UPDATE_OK);
        assert_eq!(
            provision::read_svn(&mut f.machine.ufm, provision::BMC_SVN_POLICY).unwrap(),
            7
        );

        stage_capsule(&mut f, 8);
        f.machine.tick();
        assert_eq!(
            provision::read_svn(&mut f.machine.ufm, provision::BMC_SVN_POLICY).unwrap(),
            8
        );
    }

    #[test]
    fn test_cancellation_capsule_clears_policy_bit() {
        let mut f = fixture();
        let (bmc_map, _) = test_regions();

        let payload = CancellationPayload {
            pc: ProtectedContent::PchCapsule,
            key_id: 5,
        };
        let csk = test_csk(2);
        let capsule = crate::container::ImageBuilder::new(ImageFormat::Kcc)
            .platform_id("pfr-test")
            .section(0, &payload.emit())
            .build(csk.mod_length, &csk, 2, test_sign(&csk));

        f.machine.run_to_runtime();
        f.machine
            .flash
            .device(FlashId::Bmc)
            .program(bmc_map.staging, &capsule);
        f.machine
            .mailbox
            .commands
            .push_back(HostCommand::Update(Domain::Bmc));

        assert_eq!(f.machine.tick(), PfrState::Runtime);
        assert_eq!(
            keys::verify_csk_key_id(&mut f.machine.ufm, ProtectedContent::PchCapsule, 5),
            Err(Error::KeyCancelled)
        );
        // A cancellation never swaps image selectors
        assert_eq!(
            journal::completed_updates(&mut f.machine.ufm, Domain::Bmc).unwrap(),
            0
        );
    }

    #[test]
    fn test_interrupted_update_resumes_after_power_loss() {
        let mut f = fixture();
        let (bmc_map, _) = test_regions();

        let new_active = ImageSpec::new(ImageFormat::Bmc).svn(2).build();
        let capsule = ImageSpec::new(ImageFormat::Bmc)
            .svn(2)
            .pfm_dest(0x6_E000)
            .sections(vec![(bmc_map.active, new_active.clone())])
            .build();
        f.machine
            .flash
            .device(FlashId::Bmc)
            .program(bmc_map.staging, &capsule);

        // Power was lost after the capsule verified and the erase step
        // ran, before the copy finished
        let mut record =
            journal::begin(&mut f.machine.ufm, Domain::Bmc, FlowKind::Update).unwrap();
        journal::advance(&mut f.machine.ufm, &mut record, StepMask::SOURCE_VERIFIED).unwrap();
        f.machine
            .flash
            .device(FlashId::Bmc)
            .erase(bmc_map.active, 0x1000)
            .unwrap();

        assert_eq!(f.machine.run_to_runtime(), PfrState::Runtime);

        let len = new_active.len();
        assert_eq!(active_bytes(&mut f.machine, Domain::Bmc, len), new_active);
        assert_eq!(journal::open_flow(&mut f.machine.ufm).unwrap(), None);
        assert_eq!(
            journal::completed_updates(&mut f.machine.ufm, Domain::Bmc).unwrap(),
            1
        );
        assert_eq!(
            provision::read_svn(&mut f.machine.ufm, provision::BMC_SVN_POLICY).unwrap(),
            2
        );
    }

    #[test]
    fn test_decommission_zeroes_provisioning() {
        let mut f = fixture();
        let (bmc_map, _) = test_regions();

        let csk = test_csk(2);
        let capsule = crate::container::ImageBuilder::new(ImageFormat::Dcc)
            .platform_id("pfr-test")
            .section(0, &[0u8; 8])
            .build(csk.mod_length, &csk, 2, test_sign(&csk));

        f.machine.run_to_runtime();
        f.machine
            .flash
            .device(FlashId::Bmc)
            .program(bmc_map.staging, &capsule);
        f.machine
            .mailbox
            .commands
            .push_back(HostCommand::Decommission);

        assert_eq!(f.machine.tick(), PfrState::Lockdown);
        assert_eq!(f.machine.status().decommission_flag, 1);

        let mut page = [0u8; PROVISION_UFM_SIZE];
        f.machine
            .ufm
            .read(UfmPage::Provision, 0, &mut page)
            .unwrap();
        assert!(page.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_attest_sets_flag() {
        let mut f = fixture();
        f.machine.run_to_runtime();
        f.machine.mailbox.commands.push_back(HostCommand::Attest);
        f.machine.tick();
        #[cfg(feature = "profile-dual-a3")]
        assert_eq!(f.machine.status().attestation_flag, 1);
    }
}
