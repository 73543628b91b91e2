//! Shared fixtures for the end-to-end scenarios
//!
//! Builds a provisioned platform on the dummy backends: real SHA-2
//! hashing, deterministic signatures, NOR-flavored flash and OTP UFM.

#![allow(dead_code)]

use pfr_core::container::{ImageBuilder, ImageFormat};
use pfr_core::flash::FlashSet;
use pfr_core::keys::manifest::KEY_MANIFEST_SIZE;
use pfr_core::keys::RsaPublicKey;
use pfr_core::pfm::{emit_pfm, RwRegion};
use pfr_core::provision::{self, ProvisionConfig, RegionMap};
use pfr_core::state::PlatformStateMachine;
use pfr_dummy::{
    key_manifest_slot, provisioned_root_hash, seeded_key, soft_sign, DummyFlash, DummyMailbox,
    DummyPlatform, DummyUfm, SoftHash, SoftRsa,
};

pub type Machine =
    PlatformStateMachine<DummyFlash, DummyUfm, SoftHash, SoftRsa, DummyPlatform, DummyMailbox>;

pub fn root_key() -> RsaPublicKey {
    seeded_key(0xA1, 384)
}

pub fn csk(seed: u8) -> RsaPublicKey {
    seeded_key(seed, 384)
}

/// Region layout: BMC on 1 MiB, PCH on 512 KiB
pub fn regions() -> (RegionMap, RegionMap) {
    (
        RegionMap {
            active: 0x0002_0000,
            recovery: 0x0008_0000,
            staging: 0x000A_0000,
        },
        RegionMap {
            active: 0x0001_0000,
            recovery: 0x0004_0000,
            staging: 0x0007_0000,
        },
    )
}

/// Provision a blank UFM for the [`regions`] layout and [`root_key`]
pub fn provision_ufm(ufm: &mut DummyUfm) {
    let (bmc, pch) = regions();
    provision::provision(
        ufm,
        &ProvisionConfig {
            root_key_hash: provisioned_root_hash(&root_key()),
            bmc,
            pch,
        },
    )
    .unwrap();
}

/// Signed firmware container: PFM (svn + RW regions) plus content sections
pub fn firmware_image(
    format: ImageFormat,
    svn: u8,
    pfm_dest: u32,
    rw_regions: &[RwRegion],
    sections: &[(u32, Vec<u8>)],
    signer: &RsaPublicKey,
    key_id: u32,
) -> Vec<u8> {
    let pfm_payload = emit_pfm(svn, b"fw-01.02", rw_regions, &[]);

    let mut builder = ImageBuilder::new(format)
        .version_id("v01.02")
        .platform_id("dummy-platform")
        .section_with_format(pfm_dest, ImageFormat::Pfm, &pfm_payload);
    for (start_addr, payload) in sections {
        builder = builder.section(*start_addr, payload);
    }
    builder.build(signer.mod_length, signer, key_id, |span| {
        soft_sign(signer, span)
    })
}

pub struct System {
    pub machine: Machine,
    pub bmc_active: Vec<u8>,
    pub pch_active: Vec<u8>,
}

/// A fully provisioned platform ready to boot
///
/// Active images carry a content section large enough that corruption at
/// `active + 0x4000` lands inside the signed span. CSK seeds 1 and 2 are
/// authorized as key ids 1 and 2.
pub fn system() -> System {
    let (bmc_map, pch_map) = regions();

    let mut rot = DummyFlash::new(KEY_MANIFEST_SIZE as usize * 16);
    rot.program(
        0,
        &key_manifest_slot(&root_key(), &[(1, &csk(1)), (2, &csk(2))]),
    );

    let mut ufm = DummyUfm::new();
    provision_ufm(&mut ufm);

    let payload: Vec<u8> = (0..0x4800u32).map(|i| (i % 253) as u8).collect();

    let bmc_active = firmware_image(
        ImageFormat::Bmc,
        1,
        0x6_F000,
        &[],
        &[(0x3_0000, payload.clone())],
        &csk(1),
        1,
    );
    let bmc_recovery = firmware_image(
        ImageFormat::Bmc,
        1,
        0x6_F000,
        &[],
        &[(bmc_map.active, bmc_active.clone())],
        &csk(1),
        1,
    );
    let mut bmc = DummyFlash::new(0x10_0000);
    bmc.program(bmc_map.active, &bmc_active);
    bmc.program(bmc_map.recovery, &bmc_recovery);

    let pch_active = firmware_image(
        ImageFormat::Pch,
        1,
        0x3_F000,
        &[],
        &[(0x2_0000, payload)],
        &csk(1),
        1,
    );
    let pch_recovery = firmware_image(
        ImageFormat::Pch,
        1,
        0x3_F000,
        &[],
        &[(pch_map.active, pch_active.clone())],
        &csk(1),
        1,
    );
    let mut pch = DummyFlash::new(0x8_0000);
    pch.program(pch_map.active, &pch_active);
    pch.program(pch_map.recovery, &pch_recovery);

    let machine = PlatformStateMachine::new(
        FlashSet::new(bmc, pch, rot),
        ufm,
        SoftHash::new(),
        SoftRsa::new(),
        DummyPlatform::new(),
        DummyMailbox::new(),
    );

    System {
        machine,
        bmc_active,
        pch_active,
    }
}
