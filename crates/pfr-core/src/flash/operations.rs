//! High-level flash operations
//!
//! Chunked copies and granularity-aware erases on top of the [`Flash`]
//! trait. All loops bounce through a fixed 4 KiB buffer so the operations
//! work without an allocator.

use crate::error::{Error, Result};

use super::Flash;

/// Largest single read/write issued to a driver
pub const MAX_READ_SIZE: usize = 0x1000;

/// The erased value for flash memory (all bits set)
pub const ERASED_VALUE: u8 = 0xFF;

/// Whether a device must be erased with the large block granule
///
/// Some parts expose no 4 KiB sector erase; their smallest granule equals
/// the 64 KiB block size.
pub fn supports_block_erase<F: Flash + ?Sized>(flash: &F) -> bool {
    flash.sector_size() == flash.block_size()
}

/// Erase a region, rounding to erase-granule boundaries
///
/// The granule is the block size when `allow_block` is set, the sector size
/// otherwise. The erased window is the smallest granule-aligned range
/// covering `[addr, addr + len)`.
pub fn erase_region<F: Flash + ?Sized>(
    flash: &mut F,
    addr: u32,
    len: u32,
    allow_block: bool,
) -> Result<()> {
    if len == 0 {
        return Ok(());
    }

    let granule = if allow_block {
        flash.block_size()
    } else {
        flash.sector_size()
    };

    let start = addr - (addr % granule);
    let end = addr
        .checked_add(len)
        .and_then(|end| end.checked_next_multiple_of(granule))
        .ok_or(Error::Io)?;
    if end > flash.device_size() {
        return Err(Error::Io);
    }

    log::debug!("erasing 0x{:x} - 0x{:x}", start, end - 1);
    let mut current = start;
    while current < end {
        flash.erase(current, granule)?;
        current += granule;
    }

    Ok(())
}

/// Read an exact number of bytes into a fixed buffer
pub fn read_exact<F: Flash + ?Sized, const N: usize>(flash: &mut F, addr: u32) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    flash.read(addr, &mut buf)?;
    Ok(buf)
}

/// Copy a range between two offsets of the same device
///
/// The destination must already be erased. Source and destination ranges
/// must not overlap.
pub fn copy_within<F: Flash + ?Sized>(flash: &mut F, src: u32, dst: u32, len: u32) -> Result<()> {
    let mut buf = [0u8; MAX_READ_SIZE];
    let mut offset = 0u32;

    while offset < len {
        let chunk = core::cmp::min(MAX_READ_SIZE as u32, len - offset) as usize;
        let chunk_buf = &mut buf[..chunk];
        flash.read(src + offset, chunk_buf)?;
        flash.write(dst + offset, chunk_buf)?;
        offset += chunk as u32;
    }

    Ok(())
}

/// Copy a range from one device to another
///
/// The destination range must already be erased.
pub fn copy_between<S: Flash + ?Sized, D: Flash + ?Sized>(
    src_flash: &mut S,
    src: u32,
    dst_flash: &mut D,
    dst: u32,
    len: u32,
) -> Result<()> {
    let mut buf = [0u8; MAX_READ_SIZE];
    let mut offset = 0u32;

    while offset < len {
        let chunk = core::cmp::min(MAX_READ_SIZE as u32, len - offset) as usize;
        let chunk_buf = &mut buf[..chunk];
        src_flash.read(src + offset, chunk_buf)?;
        dst_flash.write(dst + offset, chunk_buf)?;
        offset += chunk as u32;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestFlash;

    #[test]
    fn test_erase_region_rounds_to_sector() {
        let mut flash = TestFlash::new(0x20000);
        flash.fill(0x00);

        // 1 byte inside a sector erases the whole covering sector
        erase_region(&mut flash, 0x1800, 1, false).unwrap();
        assert!(flash.data()[0x1000..0x2000].iter().all(|&b| b == 0xFF));
        assert!(flash.data()[0x0000..0x1000].iter().all(|&b| b == 0x00));
        assert!(flash.data()[0x2000..0x3000].iter().all(|&b| b == 0x00));
    }

    #[test]
    fn test_erase_region_spans_sectors() {
        let mut flash = TestFlash::new(0x20000);
        flash.fill(0x00);

        erase_region(&mut flash, 0x1800, 0x1000, false).unwrap();
        // Covers two sectors once rounded
        assert!(flash.data()[0x1000..0x3000].iter().all(|&b| b == 0xFF));
        assert_eq!(flash.erases.len(), 2);
    }

    #[test]
    fn test_erase_region_block_granule() {
        let mut flash = TestFlash::new(0x40000);
        flash.fill(0x00);

        erase_region(&mut flash, 0x10000, 0x1000, true).unwrap();
        // Block granule is 64 KiB
        assert!(flash.data()[0x10000..0x20000].iter().all(|&b| b == 0xFF));
        assert!(flash.data()[0x0000..0x10000].iter().all(|&b| b == 0x00));
    }

    #[test]
    fn test_erase_region_out_of_bounds() {
        let mut flash = TestFlash::new(0x10000);
        assert_eq!(
            erase_region(&mut flash, 0xF000, 0x2000, false),
            Err(Error::Io)
        );
    }

    #[test]
    fn test_supports_block_erase() {
        assert!(!supports_block_erase(&TestFlash::new(0x10000)));
        assert!(supports_block_erase(&TestFlash::new_block_only(0x10000)));
    }

    #[test]
    fn test_copy_within_chunks() {
        let mut flash = TestFlash::new(0x20000);
        let data: std::vec::Vec<u8> = (0..0x1801u32).map(|i| (i % 251) as u8).collect();
        flash.program(0x100, &data);

        copy_within(&mut flash, 0x100, 0x10000, data.len() as u32).unwrap();
        assert_eq!(&flash.data()[0x10000..0x10000 + data.len()], &data[..]);
        // Source is untouched
        assert_eq!(&flash.data()[0x100..0x100 + data.len()], &data[..]);
    }

    #[test]
    fn test_copy_between_chunks() {
        let mut src = TestFlash::new(0x10000);
        let mut dst = TestFlash::new(0x10000);
        let data: std::vec::Vec<u8> = (0..0x1801u32).map(|i| (i % 251) as u8).collect();
        src.program(0x100, &data);

        copy_between(&mut src, 0x100, &mut dst, 0x2000, data.len() as u32).unwrap();
        assert_eq!(&dst.data()[0x2000..0x2000 + data.len()], &data[..]);
    }
}
