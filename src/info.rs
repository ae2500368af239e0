//! Component A, read-only projection of persistent device identity
//! (spec §4.A).

use crate::error::InvalidPersistentStorage;
use crate::identity::FwId;

/// A `(start, length)` region of flash an image of a given [`DfuType`] may
/// legally land in. Reads through this type are trusted; the state machine
/// only ever checks whether a proposed `[start, start+length)` range falls
/// inside one.
///
/// [`DfuType`]: crate::identity::DfuType
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemorySegment {
    pub start: u32,
    pub length: u32,
}

impl MemorySegment {
    #[must_use]
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.length)
    }

    /// True iff `[start, start+length)` lies entirely inside this segment.
    #[must_use]
    pub fn contains_range(&self, start: u32, length: u32) -> bool {
        let end = start.saturating_add(length);
        start >= self.start && end <= self.end()
    }
}

/// Install-health flags read from the persistent info page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Flags {
    pub sd_intact: bool,
    pub app_intact: bool,
}

/// The six persistent entries the bootloader reads at init, already
/// resolved out of the raw info page. Immutable after construction.
#[derive(Clone, Copy, Debug)]
pub struct Info {
    flags: Flags,
    fwid: FwId,
    segment_app: MemorySegment,
    segment_bl: MemorySegment,
    segment_sd: MemorySegment,
    /// Absent iff no key is provisioned, in which case the verifier accepts
    /// all images (spec §4.G).
    ecdsa_public_key: Option<[u8; 64]>,
}

impl Info {
    /// Construct the info view from the five required entries. A missing
    /// entry (any of `flags`, `fwid`, `segment_app`, `segment_bl`,
    /// `segment_sd`) is fatal. The ECDSA public key is optional.
    ///
    /// The journal entry itself has no representation here: callers create
    /// it on the fly (filled with `0xFF`) before calling this constructor,
    /// per spec §4.A; it is a write concern of the `InfoPage` collaborator,
    /// not a read concern of this view.
    pub fn load(
        flags: Option<Flags>,
        fwid: Option<FwId>,
        segment_app: Option<MemorySegment>,
        segment_bl: Option<MemorySegment>,
        segment_sd: Option<MemorySegment>,
        ecdsa_public_key: Option<[u8; 64]>,
    ) -> Result<Self, InvalidPersistentStorage> {
        Ok(Self {
            flags: flags.ok_or(InvalidPersistentStorage)?,
            fwid: fwid.ok_or(InvalidPersistentStorage)?,
            segment_app: segment_app.ok_or(InvalidPersistentStorage)?,
            segment_bl: segment_bl.ok_or(InvalidPersistentStorage)?,
            segment_sd: segment_sd.ok_or(InvalidPersistentStorage)?,
            ecdsa_public_key,
        })
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    #[must_use]
    pub fn fwid(&self) -> FwId {
        self.fwid
    }

    #[must_use]
    pub fn segment(&self, ty: crate::identity::DfuType) -> MemorySegment {
        match ty {
            crate::identity::DfuType::App => self.segment_app,
            crate::identity::DfuType::Bootloader => self.segment_bl,
            crate::identity::DfuType::Sd => self.segment_sd,
        }
    }

    #[must_use]
    pub fn ecdsa_public_key(&self) -> Option<&[u8; 64]> {
        self.ecdsa_public_key.as_ref()
    }
}
