//! Decode and print a container image

use std::fs;
use std::path::Path;

use pfr_core::container::{
    ImageFormat, RecoveryHeader, RecoverySection, CANCELLATION_HEADER_MAGIC,
    KEY_MANAGEMENT_HEADER_MAGIC, KEY_MANAGEMENT_SECTION_MAGIC, RECOVERY_HEADER_MAGIC,
    RECOVERY_HEADER_SIZE, RECOVERY_SECTION_MAGIC, RECOVERY_SECTION_SIZE,
};
use pfr_core::keys::{RsaPublicKey, RSA_KEY_BLOB_SIZE};

use super::CliError;

fn magic_name(magic: u32) -> &'static str {
    match magic {
        RECOVERY_HEADER_MAGIC => "recovery",
        KEY_MANAGEMENT_HEADER_MAGIC => "key-management",
        CANCELLATION_HEADER_MAGIC => "cancellation",
        _ => "unknown",
    }
}

pub fn run_show(image_path: &Path) -> Result<(), CliError> {
    let image = fs::read(image_path)?;

    let header = RecoveryHeader::parse(&image)?;
    println!("Header:");
    println!(
        "  magic:        0x{:08X} ({})",
        header.magic_number,
        magic_name(header.magic_number)
    );
    match header.image_format() {
        Ok(format) => println!("  format:       {:?}", format),
        Err(_) => println!("  format:       unknown (0x{:04X})", header.format),
    }
    let version = header
        .version_id
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect::<String>();
    println!("  version:      {}", version);
    println!("  image length: {} bytes", header.image_length);
    println!("  signature:    {} bytes", header.sign_length);

    let platform_len = image
        .get(RECOVERY_HEADER_SIZE)
        .copied()
        .ok_or(pfr_core::Error::Format)? as usize;
    let platform_id = image
        .get(RECOVERY_HEADER_SIZE + 1..RECOVERY_HEADER_SIZE + 1 + platform_len)
        .ok_or(pfr_core::Error::Format)?;
    println!("  platform id:  {}", String::from_utf8_lossy(platform_id));

    let section_magic = if header.magic_number == KEY_MANAGEMENT_HEADER_MAGIC {
        KEY_MANAGEMENT_SECTION_MAGIC
    } else {
        RECOVERY_SECTION_MAGIC
    };

    println!("Sections:");
    let signed_len = header.signed_length() as usize;
    let mut offset = RECOVERY_HEADER_SIZE + 1 + platform_len;
    while offset < signed_len {
        let section = RecoverySection::parse(&image[offset..], section_magic)?;
        let format = ImageFormat::from_raw(section.format)
            .map(|f| format!("{:?}", f))
            .unwrap_or_else(|| format!("0x{:04X}", section.format));
        println!(
            "  {:>10} -> 0x{:08X}  {} bytes",
            format, section.start_addr, section.section_length
        );
        offset += RECOVERY_SECTION_SIZE + section.section_length as usize;
    }

    let key_start = header.image_length as usize;
    if let Some(blob) = image.get(key_start..key_start + RSA_KEY_BLOB_SIZE) {
        let blob: [u8; RSA_KEY_BLOB_SIZE] = blob.try_into().unwrap();
        let key = RsaPublicKey::from_bytes(&blob)?;
        let key_id = image
            .get(key_start + RSA_KEY_BLOB_SIZE..key_start + RSA_KEY_BLOB_SIZE + 4)
            .map(|b| u32::from_le_bytes(b.try_into().unwrap()));
        println!("Signing key:");
        println!("  modulus:      {} bits", key.mod_length * 8);
        println!("  exponent:     {}", key.exponent);
        println!(
            "  fingerprint:  {}",
            hex::encode(&key.modulus[..8.min(key.mod_length as usize)])
        );
        if let Some(key_id) = key_id {
            println!("  key id:       {}", key_id);
        }
    }

    Ok(())
}
