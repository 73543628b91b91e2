//! Platform state machine
//!
//! Top-level orchestration: boot-hold, T-1 verification, release, runtime
//! command handling, update arbitration, recovery and decommission. The
//! machine owns the flash set, the UFM, the crypto engines and the
//! reset/mailbox collaborators; nothing here is global.

pub mod journal;
pub mod machine;
pub mod platform;
pub mod status;

pub use machine::{PfrState, PlatformStateMachine};
pub use platform::{HostCommand, Mailbox, MuxOwner, ResetControl};
pub use status::{CpldStatus, LastError, Phase};
