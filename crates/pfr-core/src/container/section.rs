//! Recovery sections and the section walk

use crate::error::{Error, Result};
use crate::flash::operations::read_exact;
use crate::flash::Flash;

/// On-flash size of a section header
pub const RECOVERY_SECTION_SIZE: usize = 16;

/// A section header inside a signed container
///
/// The payload of `section_length` bytes follows the header; `start_addr`
/// is the destination offset on the target flash device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySection {
    /// Section header length on flash; always 16
    pub header_length: u16,
    /// Format tag, mirrors the parent image format
    pub format: u16,
    /// Section magic
    pub magic_number: u32,
    /// Destination flash offset of the payload
    pub start_addr: u32,
    /// Payload length in bytes
    pub section_length: u32,
}

impl RecoverySection {
    /// Parse and validate a section header
    pub fn parse(bytes: &[u8], expected_magic: u32) -> Result<Self> {
        if bytes.len() < RECOVERY_SECTION_SIZE {
            return Err(Error::Format);
        }

        let header_length = u16::from_le_bytes(bytes[0..2].try_into().unwrap());
        let format = u16::from_le_bytes(bytes[2..4].try_into().unwrap());
        let magic_number = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let start_addr = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let section_length = u32::from_le_bytes(bytes[12..16].try_into().unwrap());

        if magic_number != expected_magic {
            return Err(Error::Format);
        }
        if header_length as usize != RECOVERY_SECTION_SIZE {
            return Err(Error::Format);
        }

        Ok(Self {
            header_length,
            format,
            magic_number,
            start_addr,
            section_length,
        })
    }

    /// Emit the bit-exact on-flash form
    pub fn emit(&self) -> [u8; RECOVERY_SECTION_SIZE] {
        let mut out = [0u8; RECOVERY_SECTION_SIZE];
        out[0..2].copy_from_slice(&self.header_length.to_le_bytes());
        out[2..4].copy_from_slice(&self.format.to_le_bytes());
        out[4..8].copy_from_slice(&self.magic_number.to_le_bytes());
        out[8..12].copy_from_slice(&self.start_addr.to_le_bytes());
        out[12..16].copy_from_slice(&self.section_length.to_le_bytes());
        out
    }

    /// Read and parse a section header from flash
    pub fn read_from<F: Flash + ?Sized>(
        flash: &mut F,
        addr: u32,
        expected_magic: u32,
    ) -> Result<Self> {
        let bytes = read_exact::<F, RECOVERY_SECTION_SIZE>(flash, addr)?;
        Self::parse(&bytes, expected_magic)
    }
}

/// Walks the sections of a container on flash
///
/// Yields sections until the walk reaches `end` exactly. A section that
/// does not carry the expected magic, or that would run past `end`, fails
/// the walk with a format error.
pub struct SectionIter<'a, F: ?Sized> {
    flash: &'a mut F,
    offset: u32,
    end: u32,
    magic: u32,
}

impl<'a, F: Flash + ?Sized> SectionIter<'a, F> {
    /// Walk `[start, end)` expecting `magic` on every section
    pub fn new(flash: &'a mut F, start: u32, end: u32, magic: u32) -> Self {
        Self {
            flash,
            offset: start,
            end,
            magic,
        }
    }

    /// Produce the next section, or `None` at the end of the window
    ///
    /// Returns the payload offset on flash together with the parsed header.
    pub fn next_section(&mut self) -> Result<Option<(u32, RecoverySection)>> {
        if self.offset >= self.end {
            return Ok(None);
        }
        if self.end - self.offset < RECOVERY_SECTION_SIZE as u32 {
            return Err(Error::Format);
        }

        let section = RecoverySection::read_from(self.flash, self.offset, self.magic)?;
        let payload = self.offset + RECOVERY_SECTION_SIZE as u32;
        let next = payload
            .checked_add(section.section_length)
            .ok_or(Error::Format)?;
        if next > self.end {
            return Err(Error::Format);
        }

        self.offset = next;
        Ok(Some((payload, section)))
    }
}
