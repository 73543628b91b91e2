//! Flash device identity and the driver-facing trait

use crate::error::{Error, Result};

/// Logical flash devices arbitrated by the RoT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashId {
    /// BMC firmware flash
    Bmc,
    /// PCH firmware flash
    Pch,
    /// RoT-internal key-manifest partition
    RotInternalKey,
}

impl FlashId {
    fn index(self) -> usize {
        match self {
            Self::Bmc => 0,
            Self::Pch => 1,
            Self::RotInternalKey => 2,
        }
    }
}

/// Driver-facing flash device trait
///
/// Implementations wrap the low-level SPI drivers (out of scope here) and
/// expose blocking whole-operation semantics: on error the affected range
/// is indeterminate and the caller retries or escalates. Erase is sector
/// granular; `addr` and `len` must be sector aligned.
pub trait Flash {
    /// Total device size in bytes
    fn device_size(&self) -> u32;

    /// Smallest erase granule in bytes (typically 4 KiB)
    fn sector_size(&self) -> u32;

    /// Large erase granule in bytes (typically 64 KiB)
    fn block_size(&self) -> u32;

    /// Read `buf.len()` bytes starting at `addr`
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Write data at `addr` (the range must be erased first)
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Erase `len` bytes starting at `addr`, sector aligned
    fn erase(&mut self, addr: u32, len: u32) -> Result<()>;
}

/// The three flash devices plus their exclusive region locks
///
/// All dispatch is static; components borrow the devices they need for the
/// duration of one operation. Recovery and update flows take the lock for
/// their target device so concurrent writers fail with [`Error::Busy`].
#[derive(Debug)]
pub struct FlashSet<F> {
    bmc: F,
    pch: F,
    rot_key: F,
    locked: [bool; 3],
}

impl<F: Flash> FlashSet<F> {
    /// Assemble the set from the three device drivers
    pub fn new(bmc: F, pch: F, rot_key: F) -> Self {
        Self {
            bmc,
            pch,
            rot_key,
            locked: [false; 3],
        }
    }

    /// Borrow one device
    pub fn device(&mut self, id: FlashId) -> &mut F {
        match id {
            FlashId::Bmc => &mut self.bmc,
            FlashId::Pch => &mut self.pch,
            FlashId::RotInternalKey => &mut self.rot_key,
        }
    }

    /// Borrow a firmware device together with the key partition
    ///
    /// Verification walks key manifests while streaming image contents, so
    /// it needs both devices at once. `id` must not name the key partition
    /// itself.
    pub fn device_and_rot(&mut self, id: FlashId) -> Result<(&mut F, &mut F)> {
        match id {
            FlashId::Bmc => Ok((&mut self.bmc, &mut self.rot_key)),
            FlashId::Pch => Ok((&mut self.pch, &mut self.rot_key)),
            FlashId::RotInternalKey => Err(Error::Format),
        }
    }

    /// Borrow the BMC and PCH devices together (staging hand-off)
    pub fn bmc_and_pch(&mut self) -> (&mut F, &mut F) {
        (&mut self.bmc, &mut self.pch)
    }

    /// Acquire the exclusive region lock for a device
    pub fn take(&mut self, id: FlashId) -> Result<()> {
        let slot = &mut self.locked[id.index()];
        if *slot {
            return Err(Error::Busy);
        }
        *slot = true;
        Ok(())
    }

    /// Release the region lock for a device
    pub fn give(&mut self, id: FlashId) {
        self.locked[id.index()] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestFlash;

    fn set() -> FlashSet<TestFlash> {
        FlashSet::new(
            TestFlash::new(0x10000),
            TestFlash::new(0x10000),
            TestFlash::new(0x10000),
        )
    }

    #[test]
    fn test_lock_exclusion() {
        let mut s = set();
        s.take(FlashId::Bmc).unwrap();
        assert_eq!(s.take(FlashId::Bmc), Err(Error::Busy));
        // Other devices are unaffected
        s.take(FlashId::Pch).unwrap();
        s.give(FlashId::Bmc);
        s.take(FlashId::Bmc).unwrap();
    }

    #[test]
    fn test_device_and_rot_rejects_key_partition() {
        let mut s = set();
        assert!(s.device_and_rot(FlashId::RotInternalKey).is_err());
    }
}
