//! Error and exit-code taxonomy (spec §6 exit codes, §7 error handling).

/// Reasons the coordinator can hand control back to either the installed
/// application or the bootloader's own entry point. Exactly one of these is
/// ever produced per boot; see [`AbortReason::launch_target`] for where
/// control goes in each case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortReason {
    /// Clean boot: the locally installed firmware is already the newest seen.
    Success,
    /// `FIND_FWID` timed out with no newer peer observed; normal boot.
    FwidValid,
    /// The flashed image's signature failed ECDSA verification.
    Unauthorized,
    /// No election/ready exchange completed before its deadline.
    NoStart,
    /// A transport buffer could not be acquired.
    NoMem,
    /// The persistent info page is missing a required entry at init.
    InvalidPersistentStorage,
}

impl AbortReason {
    /// Where control goes when this reason ends the transfer. Only
    /// [`AbortReason::Unauthorized`] jumps to the bootloader's own entry
    /// point (so an operator can retry); every other reason hands control to
    /// the installed application so the device stays usable.
    #[must_use]
    pub fn launch_target(self) -> LaunchTarget {
        match self {
            AbortReason::Unauthorized => LaunchTarget::Bootloader,
            AbortReason::Success
            | AbortReason::FwidValid
            | AbortReason::NoStart
            | AbortReason::NoMem
            | AbortReason::InvalidPersistentStorage => LaunchTarget::App,
        }
    }
}

/// Entry point control is handed to once the coordinator is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LaunchTarget {
    App,
    Bootloader,
}

/// Fatal error raised while loading the persistent info view at init. There
/// is no application to fall back to yet, so this is surfaced to the caller
/// rather than folded into [`AbortReason`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidPersistentStorage;

/// Errors a collaborator can report back into the state machine while a
/// transfer is in flight. These never panic the coordinator; each maps to a
/// specific, spec-mandated recovery (retry, drop, or abort).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum BootloaderError {
    /// The writer rejected `start()`; the coordinator re-enters `DFU_REQ`.
    WriterStartRejected,
    /// The writer rejected a `data()` call for one segment; the segment is
    /// silently dropped (not decremented, not relayed).
    WriterSegmentRejected,
    /// No transport buffer was available.
    NoMem,
}
