//! Update-status journal
//!
//! Persists flow progress in the UPDATE_STATUS page so a power loss
//! resumes at the last committed step. The page is OTP: a record is
//! allocated by writing into erased (all 0xFF) space, and progress is a
//! monotone step mask whose stored complement only ever clears bits.
//! When every record slot has been consumed, new flows fail with `Busy`
//! and the operator must service the device.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::provision::Domain;
use crate::ufm::{Ufm, UfmPage, UPDATE_STATUS_UFM_SIZE};

/// Size of one journal record
pub const JOURNAL_RECORD_SIZE: u32 = 16;

/// Number of record slots in the page
pub const JOURNAL_CAPACITY: u32 = UPDATE_STATUS_UFM_SIZE as u32 / JOURNAL_RECORD_SIZE;

const TAG_FREE: u8 = 0xFF;
const TAG_ALLOCATED: u8 = 0xA5;

const DOMAIN_BMC: u8 = 0x0B;
const DOMAIN_PCH: u8 = 0x0C;

const KIND_UPDATE: u8 = 0x55;
const KIND_RECOVERY: u8 = 0x66;

bitflags! {
    /// Steps completed within one journaled flow
    ///
    /// Stored on flash as the complement, so advancing a flow only clears
    /// bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StepMask: u8 {
        /// Flow record allocated
        const BEGUN = 1 << 0;
        /// Source image authenticated
        const SOURCE_VERIFIED = 1 << 1;
        /// Erase/copy against the active region finished
        const APPLIED = 1 << 2;
        /// Active region re-verified after the apply
        const REVERIFIED = 1 << 3;
        /// Active/recovery selector swapped
        const SELECTOR_SWAPPED = 1 << 4;
        /// Flow abandoned; the active region was left unchanged
        const ABORTED = 1 << 5;
        /// Flow closed
        const COMPLETE = 1 << 7;
    }
}

/// Kind of journaled flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Staged-capsule promotion
    Update,
    /// Active-region recovery
    Recovery,
}

/// One journal record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalRecord {
    /// Slot index within the page
    pub index: u32,
    /// Domain the flow targets
    pub domain: Domain,
    /// Flow kind
    pub kind: FlowKind,
    /// Steps completed so far
    pub steps: StepMask,
}

fn record_offset(index: u32) -> u32 {
    index * JOURNAL_RECORD_SIZE
}

fn decode(index: u32, raw: &[u8; JOURNAL_RECORD_SIZE as usize]) -> Option<JournalRecord> {
    if raw[0] != TAG_ALLOCATED {
        return None;
    }
    let domain = match raw[1] {
        DOMAIN_BMC => Domain::Bmc,
        DOMAIN_PCH => Domain::Pch,
        _ => return None,
    };
    let kind = match raw[2] {
        KIND_UPDATE => FlowKind::Update,
        KIND_RECOVERY => FlowKind::Recovery,
        _ => return None,
    };
    Some(JournalRecord {
        index,
        domain,
        kind,
        steps: StepMask::from_bits_truncate(!raw[3]),
    })
}

fn read_record<U: Ufm + ?Sized>(
    ufm: &mut U,
    index: u32,
) -> Result<[u8; JOURNAL_RECORD_SIZE as usize]> {
    let mut raw = [0u8; JOURNAL_RECORD_SIZE as usize];
    ufm.read(UfmPage::UpdateStatus, record_offset(index), &mut raw)?;
    Ok(raw)
}

/// Open a new flow record in the first free slot
pub fn begin<U: Ufm + ?Sized>(ufm: &mut U, domain: Domain, kind: FlowKind) -> Result<JournalRecord> {
    for index in 0..JOURNAL_CAPACITY {
        let raw = read_record(ufm, index)?;
        if raw[0] != TAG_FREE {
            continue;
        }

        let steps = StepMask::BEGUN;
        let mut record = [0xFFu8; JOURNAL_RECORD_SIZE as usize];
        record[0] = TAG_ALLOCATED;
        record[1] = match domain {
            Domain::Bmc => DOMAIN_BMC,
            Domain::Pch => DOMAIN_PCH,
        };
        record[2] = match kind {
            FlowKind::Update => KIND_UPDATE,
            FlowKind::Recovery => KIND_RECOVERY,
        };
        record[3] = !steps.bits();
        ufm.write(UfmPage::UpdateStatus, record_offset(index), &record)?;

        log::debug!("journal[{}]: begin {:?} {:?}", index, kind, domain);
        return Ok(JournalRecord {
            index,
            domain,
            kind,
            steps,
        });
    }

    log::error!("update-status journal is full");
    Err(Error::Busy)
}

/// Commit a completed step to a flow record
pub fn advance<U: Ufm + ?Sized>(
    ufm: &mut U,
    record: &mut JournalRecord,
    step: StepMask,
) -> Result<()> {
    record.steps |= step;
    let complement = [!record.steps.bits()];
    ufm.write(UfmPage::UpdateStatus, record_offset(record.index) + 3, &complement)?;
    log::debug!("journal[{}]: {:?}", record.index, record.steps);
    Ok(())
}

/// Close a flow record
pub fn complete<U: Ufm + ?Sized>(ufm: &mut U, record: &mut JournalRecord) -> Result<()> {
    advance(ufm, record, StepMask::COMPLETE)
}

/// Find the interrupted flow, if any
///
/// Slots allocate sequentially, so scanning stops at the first free slot.
pub fn open_flow<U: Ufm + ?Sized>(ufm: &mut U) -> Result<Option<JournalRecord>> {
    for index in 0..JOURNAL_CAPACITY {
        let raw = read_record(ufm, index)?;
        if raw[0] == TAG_FREE {
            break;
        }
        if let Some(record) = decode(index, &raw) {
            if !record.steps.contains(StepMask::COMPLETE) {
                return Ok(Some(record));
            }
        }
    }
    Ok(None)
}

/// Count completed, non-aborted update flows for a domain
///
/// The parity of this count is the domain's active/recovery selector.
pub fn completed_updates<U: Ufm + ?Sized>(ufm: &mut U, domain: Domain) -> Result<u32> {
    let mut count = 0;
    for index in 0..JOURNAL_CAPACITY {
        let raw = read_record(ufm, index)?;
        if raw[0] == TAG_FREE {
            break;
        }
        if let Some(record) = decode(index, &raw) {
            if record.domain == domain
                && record.kind == FlowKind::Update
                && record.steps.contains(StepMask::COMPLETE)
                && !record.steps.contains(StepMask::ABORTED)
            {
                count += 1;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestUfm;

    #[test]
    fn test_flow_lifecycle() {
        let mut ufm = TestUfm::new();
        assert_eq!(open_flow(&mut ufm).unwrap(), None);

        let mut record = begin(&mut ufm, Domain::Pch, FlowKind::Update).unwrap();
        advance(&mut ufm, &mut record, StepMask::SOURCE_VERIFIED).unwrap();

        // The open flow is found again with its progress intact
        let reloaded = open_flow(&mut ufm).unwrap().unwrap();
        assert_eq!(reloaded.domain, Domain::Pch);
        assert_eq!(reloaded.kind, FlowKind::Update);
        assert!(reloaded.steps.contains(StepMask::SOURCE_VERIFIED));
        assert!(!reloaded.steps.contains(StepMask::APPLIED));

        let mut record = reloaded;
        advance(&mut ufm, &mut record, StepMask::APPLIED).unwrap();
        advance(&mut ufm, &mut record, StepMask::REVERIFIED).unwrap();
        advance(&mut ufm, &mut record, StepMask::SELECTOR_SWAPPED).unwrap();
        complete(&mut ufm, &mut record).unwrap();

        assert_eq!(open_flow(&mut ufm).unwrap(), None);
        assert_eq!(completed_updates(&mut ufm, Domain::Pch).unwrap(), 1);
        assert_eq!(completed_updates(&mut ufm, Domain::Bmc).unwrap(), 0);
    }

    #[test]
    fn test_aborted_flow_does_not_flip_selector() {
        let mut ufm = TestUfm::new();
        let mut record = begin(&mut ufm, Domain::Bmc, FlowKind::Update).unwrap();
        advance(&mut ufm, &mut record, StepMask::ABORTED).unwrap();
        complete(&mut ufm, &mut record).unwrap();

        assert_eq!(open_flow(&mut ufm).unwrap(), None);
        assert_eq!(completed_updates(&mut ufm, Domain::Bmc).unwrap(), 0);
    }

    #[test]
    fn test_records_allocate_sequentially() {
        let mut ufm = TestUfm::new();
        let mut first = begin(&mut ufm, Domain::Bmc, FlowKind::Recovery).unwrap();
        complete(&mut ufm, &mut first).unwrap();

        let second = begin(&mut ufm, Domain::Pch, FlowKind::Update).unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
    }

    #[test]
    fn test_full_journal_is_busy() {
        let mut ufm = TestUfm::new();
        for _ in 0..JOURNAL_CAPACITY {
            let mut record = begin(&mut ufm, Domain::Bmc, FlowKind::Update).unwrap();
            complete(&mut ufm, &mut record).unwrap();
        }
        assert_eq!(
            begin(&mut ufm, Domain::Bmc, FlowKind::Update),
            Err(Error::Busy)
        );
    }
}
