//! Component C, the single in-flight transaction record (spec §3, §4.C).

use crate::identity::{DfuType, TargetId};

/// Sentinel meaning "segments_remaining has not been set yet" (spec §4.C).
pub const SEGMENTS_UNSET: u16 = 0xFFFF;

/// The one active transfer. Exactly one of these exists at any time; it is
/// zeroed on entry to `FIND_FWID` and on every `start_req` (spec §3
/// invariants).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transaction {
    pub transaction_id: u32,
    /// 0 means "none" / "listening"; nonzero is a source's offered priority.
    pub authority: u8,
    pub ty: DfuType,
    pub target: TargetId,
    pub start_addr: u32,
    pub bank_addr: u32,
    pub length: u32,
    pub signature_length: u32,
    pub segment_count: u16,
    pub segments_remaining: u16,
    pub ready_mic: u32,
    pub segment_is_valid_after_transfer: bool,
}

impl Transaction {
    /// The zero/sentinel record for `ty`, as produced by `start_req(ty)`
    /// (spec §4.C: "resets all fields except `type`").
    #[must_use]
    pub fn start_req(ty: DfuType, target: TargetId) -> Self {
        Self {
            transaction_id: 0,
            authority: 0,
            ty,
            target,
            start_addr: 0,
            bank_addr: 0,
            length: 0,
            signature_length: 0,
            segment_count: 0,
            segments_remaining: SEGMENTS_UNSET,
            ready_mic: 0,
            segment_is_valid_after_transfer: false,
        }
    }

    /// True iff every segment has been committed exactly once.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.segments_remaining == 0
    }
}
