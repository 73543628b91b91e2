//! Simulate the T-1 boot flow over flash image files

use std::fs;
use std::path::Path;

use pfr_core::flash::FlashId;
use pfr_core::state::{PfrState, PlatformStateMachine};
use pfr_dummy::{DummyMailbox, DummyPlatform, SoftHash, SoftRsa};

use crate::profile::Profile;

use super::CliError;

pub fn run_boot(
    profile_path: &Path,
    bmc_path: &Path,
    pch_path: &Path,
    save_bmc: Option<&Path>,
    save_pch: Option<&Path>,
) -> Result<(), CliError> {
    let profile = Profile::load(profile_path)?;
    let (mut flash, ufm) = profile.build_system()?;

    let bmc_image = fs::read(bmc_path)?;
    let pch_image = fs::read(pch_path)?;
    flash.device(FlashId::Bmc).program(0, &bmc_image);
    flash.device(FlashId::Pch).program(0, &pch_image);

    let mut machine = PlatformStateMachine::new(
        flash,
        ufm,
        SoftHash::new(),
        SoftRsa::new(),
        DummyPlatform::new(),
        DummyMailbox::new(),
    );

    let state = machine.run_to_runtime();
    let status = machine.status().clone();

    println!(
        "Boot finished in {:?} ({})",
        state,
        profile.name.as_deref().unwrap_or("unnamed profile")
    );
    println!("  bmc status: 0x{:02X}", status.bmc_status);
    println!("  pch status: 0x{:02X}", status.pch_status);
    match &status.last_error {
        Some(err) => println!("  last error: {}", err),
        None => println!("  last error: none"),
    }
    for event in &machine.platform_mut().events {
        println!("  reset event: {:?}", event);
    }

    if let Some(path) = save_bmc {
        fs::write(path, machine.flash_mut().device(FlashId::Bmc).data())?;
    }
    if let Some(path) = save_pch {
        fs::write(path, machine.flash_mut().device(FlashId::Pch).data())?;
    }

    if state == PfrState::Lockdown {
        return Err(CliError::Engine(pfr_core::Error::LockdownRequested));
    }
    Ok(())
}
