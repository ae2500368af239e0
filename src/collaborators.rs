//! Component G/H support and spec §6, external collaborators the core
//! consumes but does not implement: the radio transport, the flash writer,
//! ECDSA verification, the persistent info page, and the RTC. Every trait
//! here is synchronous (spec §5: no suspension points).

use crate::error::BootloaderError;
use crate::fmt::warn;
use crate::info::MemorySegment;

/// How many times a packet should be repeated on air.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Repeats {
    Count(u8),
    Infinite,
}

/// `FWID`/request-beacon/`READY` repeat forever; `DATA`/`DATA_RSP`/`DATA_REQ`
/// repeat 5 times (spec §4.D table, §6).
pub const TX_REPEATS_DEFAULT: Repeats = Repeats::Count(5);
pub const TX_REPEATS_PERSISTENT: Repeats = Repeats::Infinite;

/// Advertising interval class. Only `Regular` is used by this core (spec
/// §6), but the type exists so a transport can be reused across other
/// interval classes without a breaking change here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntervalClass {
    #[default]
    Regular,
}

/// The radio transport. Buffers are modeled as owned byte slices the caller
/// hands over by reference for the duration of the call; this crate never
/// holds a raw buffer pointer or manages a refcount itself (spec §9 "replace
/// raw pointers into flash with an address-plus-length abstraction" applies
/// equally here).
pub trait Transport {
    /// Replace whatever beacon is currently being transmitted with `packet`.
    /// Implementations must unconditionally abort the previous beacon first
    /// (spec §4.D / §5 "beacon_set unconditionally aborts the previous
    /// one").
    fn set_beacon(&mut self, packet: &[u8], repeats: Repeats, interval: IntervalClass) -> Result<(), BootloaderError>;

    /// Stop whatever beacon is currently outstanding, if any.
    fn abort_beacon(&mut self);

    /// Send a one-shot packet (a DATA relay or a DATA_RSP) without touching
    /// the beacon.
    fn send(&mut self, packet: &[u8], repeats: Repeats, interval: IntervalClass) -> Result<(), BootloaderError>;
}

/// The DFU flash writer. Its own journal/dedup behavior is assumed (spec §8
/// "the writer's own dedup is assumed"); this crate's only obligation is to
/// not double-count a segment that the writer rejected or already has.
pub trait DfuWriter {
    /// Begin a transfer: `dst` is the final destination, `bank` is the
    /// staging address, `length` is the image length in bytes, and
    /// `last_is_valid` mirrors the start frame's "last" flag.
    fn start(&mut self, dst: u32, bank: u32, length: u32, last_is_valid: bool) -> Result<(), BootloaderError>;

    /// Commit `bytes` at `addr`. A rejected segment is silently dropped by
    /// the caller (spec §7): not decremented, not relayed.
    fn data(&mut self, addr: u32, bytes: &[u8]) -> Result<(), BootloaderError>;

    /// Finalize the transfer once every segment has been committed.
    fn end(&mut self);

    /// Fill `out` with the `out.len()` bytes stored at `addr`, if the writer
    /// already has them (used to serve DATA_REQ).
    fn has_entry(&self, addr: u32, out: &mut [u8]) -> bool;

    /// SHA-256 over everything committed so far, excluding the trailing
    /// `signature_length` bytes (spec §4.G).
    fn sha256(&self) -> [u8; 32];
}

/// ECDSA verification over the curve fixed by the provisioned public key.
pub trait EcdsaVerify {
    fn verify(&self, pubkey: &[u8; 64], hash: &[u8; 32], signature: &[u8]) -> bool;
}

/// Which of the persistent info page's entries is being requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InfoEntryType {
    Flags,
    Fwid,
    SegmentApp,
    SegmentBl,
    SegmentSd,
    EcdsaPublicKey,
    Journal,
}

/// The raw persistent info page (spec §4.A, §6).
pub trait InfoPage {
    /// Returns `None` if the entry is absent.
    fn entry_get(&self, ty: InfoEntryType) -> Option<&[u8]>;
    /// Writes a new entry, returning `None` if there was no room.
    fn entry_put(&mut self, ty: InfoEntryType, bytes: &[u8]) -> Option<()>;
}

/// Filled-with-`0xFF` journal payload length written when no journal entry
/// exists yet (spec §4.A).
pub const JOURNAL_LEN: usize = 64;

/// Ensure a journal entry exists, creating one filled with `0xFF` if it was
/// absent. The journal's contents are otherwise out of scope for this crate
/// (owned by the DFU writer).
pub fn ensure_journal(page: &mut impl InfoPage) {
    if page.entry_get(InfoEntryType::Journal).is_none() {
        let buf = [0xFFu8; JOURNAL_LEN];
        if page.entry_put(InfoEntryType::Journal, &buf).is_none() {
            warn!("failed to create journal entry");
        }
    }
}

/// One-shot hardware deadline (spec §4.H). `now`/`arm` operate in the same
/// tick space; `mask` bounds the wraparound (`deadline = (now + ticks) &
/// mask`).
pub trait Rtc {
    fn now(&self) -> u32;
    fn mask(&self) -> u32;
    /// Arm the comparator to fire at `deadline` and enable its interrupt.
    fn arm(&mut self, deadline: u32);
    /// Disable the comparator's interrupt without necessarily clearing the
    /// compare value.
    fn disable(&mut self);
}

/// Hands control to the application (or the bootloader's own entry point)
/// at `address`. Real implementations do not return; test doubles may.
pub trait AppLauncher {
    fn launch(&mut self, address: u32);
}

/// Decode a [`MemorySegment`] out of its 8-byte little-endian `{start,
/// length}` info-page representation.
#[must_use]
pub fn decode_segment(bytes: &[u8]) -> Option<MemorySegment> {
    let start = u32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?);
    let length = u32::from_le_bytes(bytes.get(4..8)?.try_into().ok()?);
    Some(MemorySegment { start, length })
}

/// Encode a [`MemorySegment`] into its 8-byte little-endian representation.
pub fn encode_segment(segment: &MemorySegment, out: &mut [u8; 8]) {
    out[0..4].copy_from_slice(&segment.start.to_le_bytes());
    out[4..8].copy_from_slice(&segment.length.to_le_bytes());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn segment_roundtrip() {
        let seg = MemorySegment {
            start: 0x1234_5678,
            length: 0x1000,
        };
        let mut buf = [0u8; 8];
        encode_segment(&seg, &mut buf);
        assert_eq!(decode_segment(&buf).unwrap(), seg);
    }

    struct FakePage {
        journal: Option<[u8; JOURNAL_LEN]>,
    }

    impl InfoPage for FakePage {
        fn entry_get(&self, ty: InfoEntryType) -> Option<&[u8]> {
            match ty {
                InfoEntryType::Journal => self.journal.as_ref().map(|j| j.as_slice()),
                _ => None,
            }
        }
        fn entry_put(&mut self, ty: InfoEntryType, bytes: &[u8]) -> Option<()> {
            if ty == InfoEntryType::Journal {
                let mut buf = [0u8; JOURNAL_LEN];
                buf.copy_from_slice(bytes);
                self.journal = Some(buf);
                Some(())
            } else {
                None
            }
        }
    }

    #[test]
    fn ensure_journal_creates_missing_entry() {
        let mut page = FakePage { journal: None };
        ensure_journal(&mut page);
        assert_eq!(page.journal, Some([0xFFu8; JOURNAL_LEN]));
    }

    #[test]
    fn ensure_journal_leaves_existing_entry_alone() {
        let mut page = FakePage {
            journal: Some([0x42u8; JOURNAL_LEN]),
        };
        ensure_journal(&mut page);
        assert_eq!(page.journal, Some([0x42u8; JOURNAL_LEN]));
    }
}
