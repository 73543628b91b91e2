//! Assemble and sign a container image

use std::fs;
use std::path::Path;

use pfr_core::container::{CancellationPayload, ImageBuilder, ImageFormat};
use pfr_core::pfm::emit_pfm;
use pfr_dummy::{seeded_key, soft_sign};

use crate::cli::{ContentClass, FormatArg};
use crate::profile::parse_number;

use super::CliError;

fn parse_section(spec: &str) -> Result<(u32, Vec<u8>), CliError> {
    let (dest, file) = spec
        .split_once('=')
        .ok_or_else(|| CliError::Usage(format!("bad section spec '{}', want DEST=FILE", spec)))?;
    let dest = parse_number(dest).map_err(CliError::Usage)?;
    let payload = fs::read(file)?;
    Ok((dest, payload))
}

#[allow(clippy::too_many_arguments)]
pub fn run_build(
    output: &Path,
    format: FormatArg,
    svn: u8,
    platform_id: &str,
    sections: &[String],
    pfm_dest: &str,
    key_seed: u8,
    key_id: u8,
    cancel_class: Option<ContentClass>,
    cancel_key_id: Option<u8>,
) -> Result<(), CliError> {
    let signer = seeded_key(key_seed, 384);

    let image = match format {
        FormatArg::Kcc => {
            let class = cancel_class
                .ok_or_else(|| CliError::Usage("kcc needs --cancel-class".into()))?;
            let target = cancel_key_id
                .ok_or_else(|| CliError::Usage("kcc needs --cancel-key-id".into()))?;
            let payload = CancellationPayload {
                pc: class.into(),
                key_id: target,
            };
            ImageBuilder::new(ImageFormat::Kcc)
                .platform_id(platform_id)
                .section(0, &payload.emit())
                .build(signer.mod_length, &signer, key_id as u32, |span| {
                    soft_sign(&signer, span)
                })
        }
        FormatArg::Dcc => ImageBuilder::new(ImageFormat::Dcc)
            .platform_id(platform_id)
            .section(0, &[0u8; 8])
            .build(signer.mod_length, &signer, key_id as u32, |span| {
                soft_sign(&signer, span)
            }),
        FormatArg::Bmc | FormatArg::Pch => {
            let format = match format {
                FormatArg::Bmc => ImageFormat::Bmc,
                _ => ImageFormat::Pch,
            };
            let pfm_dest = parse_number(pfm_dest).map_err(CliError::Usage)?;
            let pfm_payload = emit_pfm(svn, b"fw-00.00", &[], &[]);

            let mut builder = ImageBuilder::new(format)
                .platform_id(platform_id)
                .section_with_format(pfm_dest, ImageFormat::Pfm, &pfm_payload);
            for spec in sections {
                let (dest, payload) = parse_section(spec)?;
                builder = builder.section(dest, &payload);
            }
            builder.build(signer.mod_length, &signer, key_id as u32, |span| {
                soft_sign(&signer, span)
            })
        }
    };

    fs::write(output, &image)?;
    log::info!("wrote {} bytes to {}", image.len(), output.display());
    Ok(())
}
