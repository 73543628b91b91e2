//! Reset-line and mailbox collaborators
//!
//! The GPIO reset lines, the SPI-monitor multiplexers and the SMBus
//! mailbox are board-level drivers supplied by the integrator. The state
//! machine is their only writer.

use crate::provision::Domain;

use super::status::CpldStatus;

/// Busy delay after every reset-line toggle
pub const RESET_SETTLE_US: u32 = 10_000;

/// Ownership of a domain's SPI-monitor multiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxOwner {
    /// RoT is the flash master; the host is cut off
    Rot,
    /// Host traffic passes through, monitored
    Passthrough,
}

/// Reset lines and SPI-monitor muxes
///
/// Assert/deassert semantics follow the lines' active states; callers
/// insert the settle delay themselves via [`ResetControl::delay_us`].
pub trait ResetControl {
    /// BMC external reset line
    fn bmc_extrst(&mut self, assert: bool);

    /// BMC SRST line; pulsed on the first boot only, toggling it at
    /// runtime disturbs the host VGA path
    fn bmc_srst(&mut self, assert: bool);

    /// PCH reset line
    fn pch_rst(&mut self, assert: bool);

    /// Switch a domain's SPI-monitor mux
    fn spi_mux(&mut self, domain: Domain, owner: MuxOwner);

    /// Busy-wait for the given number of microseconds
    fn delay_us(&mut self, us: u32);
}

/// Commands the host can post through the SMBus mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// A capsule has been staged for the given domain
    Update(Domain),
    /// Decommission the platform
    Decommission,
    /// Re-run the boot verification flow
    Reset,
    /// Request attestation
    Attest,
}

/// Host-visible status mailbox
pub trait Mailbox {
    /// Publish the current status record
    fn publish(&mut self, status: &CpldStatus);

    /// Drain one pending host command, if any
    fn poll_command(&mut self) -> Option<HostCommand>;
}
