//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use pfr_core::keys::ProtectedContent;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pfr")]
#[command(author, version, about = "Platform firmware resiliency tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Protected-content class an image is verified under
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContentClass {
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
    /// Decommission capsule
    Decommission,
}

impl From<ContentClass> for ProtectedContent {
    fn from(class: ContentClass) -> Self {
        match class {
            ContentClass::CpldCapsule => ProtectedContent::CpldCapsule,
            ContentClass::PchPfm => ProtectedContent::PchPfm,
            ContentClass::PchCapsule => ProtectedContent::PchCapsule,
            ContentClass::BmcPfm => ProtectedContent::BmcPfm,
            ContentClass::BmcCapsule => ProtectedContent::BmcCapsule,
            ContentClass::Decommission => ProtectedContent::Decommission,
        }
    }
}

/// Buildable container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// BMC firmware image or capsule
    Bmc,
    /// PCH firmware image or capsule
    Pch,
    /// Key cancellation capsule
    Kcc,
    /// Decommission capsule
    Dcc,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode and print a container image
    Show {
        /// Container image file
        image: PathBuf,
    },

    /// Authenticate a container image against a provisioning profile
    Verify {
        /// Container image file
        image: PathBuf,

        /// Provisioning profile (TOML)
        #[arg(short, long)]
        profile: PathBuf,

        /// Content class to verify under
        #[arg(short, long, value_enum)]
        class: ContentClass,
    },

    /// Assemble and sign a container image
    Build {
        /// Output image file
        #[arg(short, long)]
        output: PathBuf,

        /// Container format
        #[arg(short, long, value_enum)]
        format: FormatArg,

        /// Security version carried in the PFM
        #[arg(long, default_value_t = 0)]
        svn: u8,

        /// Platform id string
        #[arg(long, default_value = "dummy-platform")]
        platform_id: String,

        /// Content sections as DEST=FILE (hex DEST), repeatable
        #[arg(long = "section", value_name = "DEST=FILE")]
        sections: Vec<String>,

        /// Destination offset of the PFM section (hex accepted)
        #[arg(long, default_value = "0x0")]
        pfm_dest: String,

        /// Development signing key seed
        #[arg(long, default_value_t = 1)]
        key_seed: u8,

        /// CSK key id the image claims
        #[arg(long, default_value_t = 1)]
        key_id: u8,

        /// For kcc: content class to cancel
        #[arg(long, value_enum)]
        cancel_class: Option<ContentClass>,

        /// For kcc: key id to cancel
        #[arg(long)]
        cancel_key_id: Option<u8>,
    },

    /// Simulate the T-1 boot flow over flash image files
    Boot {
        /// Provisioning profile (TOML)
        #[arg(short, long)]
        profile: PathBuf,

        /// BMC flash device image
        #[arg(long)]
        bmc: PathBuf,

        /// PCH flash device image
        #[arg(long)]
        pch: PathBuf,

        /// Write the post-boot BMC flash back to this file
        #[arg(long)]
        save_bmc: Option<PathBuf>,

        /// Write the post-boot PCH flash back to this file
        #[arg(long)]
        save_pch: Option<PathBuf>,
    },
}
