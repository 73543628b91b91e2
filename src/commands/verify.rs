//! Authenticate a container image against a provisioning profile

use std::fs;
use std::path::Path;

use pfr_core::auth;
use pfr_core::flash::FlashId;
use pfr_core::keys::ProtectedContent;
use pfr_dummy::{SoftHash, SoftRsa};

use crate::cli::ContentClass;
use crate::profile::Profile;

use super::CliError;

/// Where an image of a given class naturally lives
fn placement(profile: &Profile, pc: ProtectedContent) -> (FlashId, u32) {
    match pc {
        ProtectedContent::PchPfm => (FlashId::Pch, profile.pch.active),
        ProtectedContent::PchCapsule => (FlashId::Pch, profile.pch.staging),
        ProtectedContent::BmcPfm => (FlashId::Bmc, profile.bmc.active),
        ProtectedContent::BmcCapsule
        | ProtectedContent::CpldCapsule
        | ProtectedContent::Decommission => (FlashId::Bmc, profile.bmc.staging),
    }
}

pub fn run_verify(
    image_path: &Path,
    profile_path: &Path,
    class: ContentClass,
) -> Result<(), CliError> {
    let profile = Profile::load(profile_path)?;
    let (mut flash, mut ufm) = profile.build_system()?;

    let image = fs::read(image_path)?;
    let pc: ProtectedContent = class.into();
    let (dev, addr) = placement(&profile, pc);
    flash.device(dev).program(addr, &image);

    let mut hash = SoftHash::new();
    let mut rsa = SoftRsa::new();
    match auth::verify_image(&mut flash, &mut ufm, &mut hash, &mut rsa, dev, addr, pc) {
        Ok(desc) => {
            println!("OK: {:?} image verified under {:?}", desc.format, pc);
            println!("  platform id: {}", desc.platform_id.as_str());
            println!("  key id:      {} (manifest {})", desc.key_id, desc.keym_id);
            if let Some(svn) = desc.svn {
                println!("  svn:         {}", svn);
            }
            Ok(())
        }
        Err(failure) => Err(CliError::Auth(failure)),
    }
}
