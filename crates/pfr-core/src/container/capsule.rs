//! Cancellation capsule payload

use crate::error::{Error, Result};
use crate::keys::ProtectedContent;

/// Payload of a key-cancellation capsule
///
/// Selects the bitmap bit to clear: the protected-content class and the
/// CSK key id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationPayload {
    /// Content class whose policy is affected
    pub pc: ProtectedContent,
    /// Key id to cancel
    pub key_id: u8,
}

/// On-flash size of the cancellation payload
pub const CANCELLATION_PAYLOAD_SIZE: usize = 8;

impl CancellationPayload {
    /// Decode the payload
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CANCELLATION_PAYLOAD_SIZE {
            return Err(Error::Format);
        }

        let pc = match u32::from_le_bytes(bytes[0..4].try_into().unwrap()) {
            0 => ProtectedContent::CpldCapsule,
            1 => ProtectedContent::PchPfm,
            2 => ProtectedContent::PchCapsule,
            3 => ProtectedContent::BmcPfm,
            4 => ProtectedContent::BmcCapsule,
            _ => return Err(Error::Format),
        };
        let key_id = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if key_id > crate::keys::cancellation::KEY_CANCELLATION_MAX_KEY_ID as u32 {
            return Err(Error::InvalidKeyId);
        }

        Ok(Self {
            pc,
            key_id: key_id as u8,
        })
    }

    /// Emit the on-flash form
    pub fn emit(&self) -> [u8; CANCELLATION_PAYLOAD_SIZE] {
        let class = match self.pc {
            ProtectedContent::CpldCapsule => 0u32,
            ProtectedContent::PchPfm => 1,
            ProtectedContent::PchCapsule => 2,
            ProtectedContent::BmcPfm => 3,
            ProtectedContent::BmcCapsule | ProtectedContent::Decommission => 4,
        };

        let mut out = [0u8; CANCELLATION_PAYLOAD_SIZE];
        out[0..4].copy_from_slice(&class.to_le_bytes());
        out[4..8].copy_from_slice(&(self.key_id as u32).to_le_bytes());
        out
    }
}
