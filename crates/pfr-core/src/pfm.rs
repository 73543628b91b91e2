//! Platform firmware manifest
//!
//! The PFM rides inside a firmware container as a section with the PFM
//! format tag. It names the image's security version and, per read-write
//! region, the policy applied during recovery: erase the region, restore
//! it from the recovery image, or leave it alone.

use crate::error::{Error, Result};
use crate::flash::operations::read_exact;
use crate::flash::Flash;

/// Magic leading the PFM section payload
pub const PFM_SECTION_MAGIC: u32 = 0x683C_9A21;

/// On-flash size of the PFM header
pub const PFM_HEADER_SIZE: usize = 16;

/// On-flash size of one read-write region record
pub const RW_REGION_SIZE: usize = 12;

/// On-flash size of one read-only region record
pub const RO_REGION_SIZE: usize = 8;

/// Read-write region tables up to this size avoid heap allocation
pub const MAX_INLINE_RW_REGIONS: usize = 32;

/// Recovery policy for a read-write region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwFlag {
    /// Leave the region untouched
    DoNothing,
    /// Restore the region from the recovery image
    Restore,
    /// Erase the region
    Erase,
}

impl RwFlag {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::DoNothing),
            1 => Some(Self::Restore),
            2 => Some(Self::Erase),
            _ => None,
        }
    }

    fn to_raw(self) -> u32 {
        match self {
            Self::DoNothing => 0,
            Self::Restore => 1,
            Self::Erase => 2,
        }
    }
}

/// One read-write region and its recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RwRegion {
    /// Recovery policy
    pub flag: RwFlag,
    /// Start address on the target device (inclusive)
    pub start_addr: u32,
    /// End address on the target device (inclusive)
    pub end_addr: u32,
}

impl RwRegion {
    /// Region size in bytes
    pub fn size(&self) -> u32 {
        self.end_addr - self.start_addr + 1
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        let flag = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let start_addr = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let end_addr = u32::from_le_bytes(bytes[8..12].try_into().unwrap());

        let flag = RwFlag::from_raw(flag).ok_or(Error::Format)?;
        if end_addr < start_addr {
            return Err(Error::Format);
        }

        Ok(Self {
            flag,
            start_addr,
            end_addr,
        })
    }

    /// Emit the on-flash record
    pub fn emit(&self) -> [u8; RW_REGION_SIZE] {
        let mut out = [0u8; RW_REGION_SIZE];
        out[0..4].copy_from_slice(&self.flag.to_raw().to_le_bytes());
        out[4..8].copy_from_slice(&self.start_addr.to_le_bytes());
        out[8..12].copy_from_slice(&self.end_addr.to_le_bytes());
        out
    }
}

/// Read-write region table, inline up to [`MAX_INLINE_RW_REGIONS`]
///
/// Larger tables spill to the heap when an allocator is available and
/// fail with out-of-memory otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum RwRegions {
    /// Bounded in-place table
    Inline(heapless::Vec<RwRegion, MAX_INLINE_RW_REGIONS>),
    /// Heap-backed table for oversized manifests
    #[cfg(feature = "alloc")]
    Heap(alloc::vec::Vec<RwRegion>),
}

impl core::ops::Deref for RwRegions {
    type Target = [RwRegion];

    fn deref(&self) -> &[RwRegion] {
        match self {
            Self::Inline(v) => v,
            #[cfg(feature = "alloc")]
            Self::Heap(v) => v,
        }
    }
}

/// A decoded platform firmware manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Pfm {
    /// Security version of the described firmware
    pub svn: u8,
    /// Firmware version identifier
    pub version_id: [u8; 8],
    /// Read-write regions in manifest order
    pub rw_regions: RwRegions,
    /// Number of read-only region records (parsed past, not policy here)
    pub ro_count: u8,
}

impl Pfm {
    /// Read a PFM from flash at the given payload offset
    pub fn read_from<F: Flash + ?Sized>(flash: &mut F, addr: u32) -> Result<Self> {
        let header = read_exact::<F, PFM_HEADER_SIZE>(flash, addr)?;

        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != PFM_SECTION_MAGIC {
            return Err(Error::Format);
        }

        let svn = header[4];
        let rw_count = header[5] as usize;
        let ro_count = header[6];
        let mut version_id = [0u8; 8];
        version_id.copy_from_slice(&header[8..16]);

        let mut record = [0u8; RW_REGION_SIZE];
        let mut offset = addr + PFM_HEADER_SIZE as u32;

        let rw_regions = if rw_count <= MAX_INLINE_RW_REGIONS {
            let mut table = heapless::Vec::new();
            for _ in 0..rw_count {
                flash.read(offset, &mut record)?;
                // Capacity checked above
                let _ = table.push(RwRegion::parse(&record)?);
                offset += RW_REGION_SIZE as u32;
            }
            RwRegions::Inline(table)
        } else {
            #[cfg(feature = "alloc")]
            {
                let mut table = alloc::vec::Vec::with_capacity(rw_count);
                for _ in 0..rw_count {
                    flash.read(offset, &mut record)?;
                    table.push(RwRegion::parse(&record)?);
                    offset += RW_REGION_SIZE as u32;
                }
                RwRegions::Heap(table)
            }
            #[cfg(not(feature = "alloc"))]
            {
                return Err(Error::OutOfMemory);
            }
        };

        Ok(Self {
            svn,
            version_id,
            rw_regions,
            ro_count,
        })
    }

    /// Look up the RW region starting exactly at `start_addr`
    pub fn rw_region_at(&self, start_addr: u32) -> Option<&RwRegion> {
        self.rw_regions.iter().find(|r| r.start_addr == start_addr)
    }
}

/// Assemble a PFM section payload
#[cfg(feature = "alloc")]
pub fn emit_pfm(
    svn: u8,
    version_id: &[u8; 8],
    rw_regions: &[RwRegion],
    ro_regions: &[(u32, u32)],
) -> alloc::vec::Vec<u8> {
    let mut out = alloc::vec::Vec::new();
    out.extend_from_slice(&PFM_SECTION_MAGIC.to_le_bytes());
    out.push(svn);
    out.push(rw_regions.len() as u8);
    out.push(ro_regions.len() as u8);
    out.push(0);
    out.extend_from_slice(version_id);
    for region in rw_regions {
        out.extend_from_slice(&region.emit());
    }
    for (start, end) in ro_regions {
        out.extend_from_slice(&start.to_le_bytes());
        out.extend_from_slice(&end.to_le_bytes());
    }
    out
}
