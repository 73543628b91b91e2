//! Recovery/update engine
//!
//! Rebuilds a domain's active region from a trusted source image: the
//! recovery region after a failed boot verification, or the staging region
//! when an update is promoted. The source image's PFM decides per
//! read-write region whether to erase, restore, or preserve; everything
//! else is erased and copied section by section.
//!
//! Callers verify the source image before invoking the engine; signature
//! verification always completes before the first erase against the
//! active region.

use crate::auth::{self, find_pfm_addr};
use crate::container::{
    RecoveryHeader, RecoverySection, RECOVERY_SECTION_MAGIC, RECOVERY_SECTION_SIZE,
};
use crate::crypto::{HashEngine, RsaEngine};
use crate::error::{Error, Result};
use crate::flash::{operations, Flash, FlashId, FlashSet};
use crate::keys::ProtectedContent;
use crate::pfm::{Pfm, RwFlag};
use crate::provision::{self, Domain};
use crate::ufm::{self, Ufm, UfmPage};

fn recovery_field(domain: Domain) -> u32 {
    match domain {
        Domain::Bmc => provision::BMC_RECOVERY_REGION_OFFSET,
        Domain::Pch => provision::PCH_RECOVERY_REGION_OFFSET,
    }
}

fn staging_field(domain: Domain) -> u32 {
    match domain {
        Domain::Bmc => provision::BMC_STAGING_REGION_OFFSET,
        Domain::Pch => provision::PCH_STAGING_REGION_OFFSET,
    }
}

/// Apply the source container at `source` to its destinations on `flash`
///
/// Phase A prepares the read-write regions named by the source's PFM;
/// phase B walks the sections and erases/copies each one that is not
/// already covered by the read-write policy. Each section completes
/// before the next begins, so an interrupted run leaves at most one
/// half-written section and a rerun converges on the same result.
fn apply_image<F: Flash + ?Sized>(flash: &mut F, source: u32) -> Result<()> {
    let header = RecoveryHeader::read_from(flash, source)?;

    let mut platform_length = [0u8; 1];
    flash.read(source + header.header_length as u32, &mut platform_length)?;
    let platform_length = platform_length[0] as u32 + 1;

    let pfm_addr =
        find_pfm_addr(flash, source, &header, platform_length)?.ok_or(Error::Format)?;
    let pfm = Pfm::read_from(flash, pfm_addr)?;

    let allow_block = operations::supports_block_erase(flash);

    // Phase A: read-write region prep
    for region in pfm.rw_regions.iter() {
        match region.flag {
            RwFlag::Erase => {
                log::info!(
                    "erasing RW region 0x{:x} - 0x{:x}",
                    region.start_addr,
                    region.end_addr
                );
                operations::erase_region(flash, region.start_addr, region.size(), allow_block)?;
            }
            // Restored regions are rewritten by the section walk below when
            // the source defines a section for them
            RwFlag::Restore | RwFlag::DoNothing => {}
        }
    }

    // Phase B: section walk
    let sig_address = source + header.signed_length();
    let mut offset = source + header.header_length as u32 + platform_length;

    while offset < sig_address {
        if sig_address - offset < RECOVERY_SECTION_SIZE as u32 {
            return Err(Error::Format);
        }
        let section = RecoverySection::read_from(flash, offset, RECOVERY_SECTION_MAGIC)?;
        let payload = offset + RECOVERY_SECTION_SIZE as u32;
        let next = payload
            .checked_add(section.section_length)
            .ok_or(Error::Format)?;
        if next > sig_address {
            return Err(Error::Format);
        }
        offset = next;

        if let Some(region) = pfm.rw_region_at(section.start_addr) {
            match region.flag {
                // Already erased in phase A, or intentionally preserved
                RwFlag::Erase | RwFlag::DoNothing => continue,
                RwFlag::Restore => log::info!(
                    "restoring RW region 0x{:x} - 0x{:x}",
                    region.start_addr,
                    region.end_addr
                ),
            }
        }

        operations::erase_region(flash, section.start_addr, section.section_length, allow_block)?;
        operations::copy_within(flash, payload, section.start_addr, section.section_length)?;
    }

    Ok(())
}

/// Rebuild a domain's active region from its recovery region
///
/// The recovery-region offset comes from the provisioning UFM. Succeeds
/// only if every erase and copy succeeded; the operation is idempotent on
/// a good recovery image.
pub fn recover_active_region<F, U>(
    set: &mut FlashSet<F>,
    ufm: &mut U,
    domain: Domain,
) -> Result<()>
where
    F: Flash,
    U: Ufm + ?Sized,
{
    let source = ufm::read_u32(ufm, UfmPage::Provision, recovery_field(domain))?;

    let id = domain.flash_id();
    set.take(id)?;
    let result = apply_image(set.device(id), source);
    set.give(id);

    match &result {
        Ok(()) => log::info!("{:?} active region repair success", domain),
        Err(e) => log::error!("{:?} active region repair failed: {}", domain, e),
    }
    result
}

/// Promote a staged capsule into the active region
///
/// Same section walk as recovery with the staging region as the source.
pub fn promote_staged<F, U>(set: &mut FlashSet<F>, ufm: &mut U, domain: Domain) -> Result<()>
where
    F: Flash,
    U: Ufm + ?Sized,
{
    let source = ufm::read_u32(ufm, UfmPage::Provision, staging_field(domain))?;

    let id = domain.flash_id();
    set.take(id)?;
    let result = apply_image(set.device(id), source);
    set.give(id);

    match &result {
        Ok(()) => log::info!("{:?} staged update applied", domain),
        Err(e) => log::error!("{:?} staged update failed: {}", domain, e),
    }
    result
}

fn copy_staging<F: Flash + ?Sized>(
    bmc: &mut F,
    pch: &mut F,
    source: u32,
    target: u32,
) -> Result<()> {
    let allow_block = operations::supports_block_erase(pch);
    operations::erase_region(pch, target, provision::PCH_STAGING_SIZE, allow_block)?;
    operations::copy_between(bmc, source, pch, target, provision::PCH_STAGING_SIZE)
}

/// Hand the PCH capsule over from BMC staging to PCH staging
///
/// The PCH capsule rides behind the BMC capsule in the BMC staging
/// region. During firmware recovery the copied capsule is re-verified
/// before anything consumes it.
pub fn stage_to_pch_staging<F, U, H, R>(
    set: &mut FlashSet<F>,
    ufm: &mut U,
    hash: &mut H,
    rsa: &mut R,
    in_recovery: bool,
) -> Result<()>
where
    F: Flash,
    U: Ufm + ?Sized,
    H: HashEngine + ?Sized,
    R: RsaEngine + ?Sized,
{
    let source = ufm::read_u32(ufm, UfmPage::Provision, staging_field(Domain::Bmc))?
        + provision::BMC_STAGING_SIZE;
    let target = ufm::read_u32(ufm, UfmPage::Provision, staging_field(Domain::Pch))?;

    log::info!(
        "copying staging region from BMC 0x{:08x} to PCH 0x{:08x}",
        source,
        target
    );

    set.take(FlashId::Pch)?;
    let result = {
        let (bmc, pch) = set.bmc_and_pch();
        copy_staging(bmc, pch, source, target)
    };
    set.give(FlashId::Pch);
    result?;

    if in_recovery {
        log::info!("PCH staging region verification");
        auth::verify_image(
            set,
            ufm,
            hash,
            rsa,
            FlashId::Pch,
            target,
            ProtectedContent::PchCapsule,
        )
        .map_err(Error::from)?;
    }

    log::info!("PCH staging region update completed");
    Ok(())
}
