//! pfr - host-side tool for the platform firmware resiliency engine
//!
//! Decodes, builds and authenticates Cerberus-style signed containers and
//! simulates the RoT boot flow over flash image files using the dummy
//! backends.

mod cli;
mod commands;
mod profile;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let result = match cli.command {
        Commands::Show { image } => commands::run_show(&image),
        Commands::Verify {
            image,
            profile,
            class,
        } => commands::run_verify(&image, &profile, class),
        Commands::Build {
            output,
            format,
            svn,
            platform_id,
            sections,
            pfm_dest,
            key_seed,
            key_id,
            cancel_class,
            cancel_key_id,
        } => commands::run_build(
            &output,
            format,
            svn,
            &platform_id,
            &sections,
            &pfm_dest,
            key_seed,
            key_id,
            cancel_class,
            cancel_key_id,
        ),
        Commands::Boot {
            profile,
            bmc,
            pch,
            save_bmc,
            save_pch,
        } => commands::run_boot(
            &profile,
            &bmc,
            &pch,
            save_bmc.as_deref(),
            save_pch.as_deref(),
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
