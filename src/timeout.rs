//! Component H, the timeout source (spec §3, §4.H).
//!
//! Every state arms exactly one deadline on entry and disarms it on exit;
//! there is never more than one outstanding deadline. Tick conversion is
//! deliberately not this module's job: `Rtc::now`/`Rtc::mask` already speak
//! in the implementation's native tick units, so the durations below are
//! expressed directly in ticks via a caller-supplied `ticks_per_second`,
//! matching the `US_TO_RTC_TICKS`-style constants of the original firmware
//! without baking a specific RTC frequency into this crate.

use crate::collaborators::Rtc;
use crate::statemachine::DfuState;

/// Per-state timeout, expressed in whole and fractional seconds so a caller
/// can scale it to its own RTC tick rate (spec §4.H table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seconds {
    pub whole: u32,
    /// Parts per 1000 of a second, i.e. milliseconds past `whole`.
    pub millis: u32,
}

impl Seconds {
    #[must_use]
    const fn new(whole: u32, millis: u32) -> Self {
        Self { whole, millis }
    }

    #[must_use]
    pub fn to_ticks(self, ticks_per_second: u32) -> u32 {
        let whole_ticks = self.whole.saturating_mul(ticks_per_second);
        let frac_ticks = (u64::from(self.millis) * u64::from(ticks_per_second) / 1000) as u32;
        whole_ticks.saturating_add(frac_ticks)
    }
}

/// Deadline for `FIND_FWID` (spec §4.H: 0.5 s).
pub const TIMEOUT_FIND_FWID: Seconds = Seconds::new(0, 500);
/// Deadline for `DFU_REQ` (spec §4.H: 1.0 s).
pub const TIMEOUT_DFU_REQ: Seconds = Seconds::new(1, 0);
/// Deadline for `DFU_READY` (spec §4.H: 3.0 s).
pub const TIMEOUT_DFU_READY: Seconds = Seconds::new(3, 0);
/// Deadline for `DFU_TARGET` (spec §4.H: 5.0 s).
pub const TIMEOUT_DFU_TARGET: Seconds = Seconds::new(5, 0);
/// Deadline for `RAMPDOWN` (spec §4.H: 1.0 s).
pub const TIMEOUT_RAMPDOWN: Seconds = Seconds::new(1, 0);

/// Look up the deadline that applies on entry to `state`.
#[must_use]
pub fn deadline_for(state: DfuState) -> Seconds {
    match state {
        DfuState::FindFwid => TIMEOUT_FIND_FWID,
        DfuState::DfuReq => TIMEOUT_DFU_REQ,
        DfuState::DfuReady => TIMEOUT_DFU_READY,
        DfuState::DfuTarget => TIMEOUT_DFU_TARGET,
        DfuState::Rampdown => TIMEOUT_RAMPDOWN,
    }
}

/// Thin wrapper over an [`Rtc`] that only ever tracks one armed deadline.
pub struct TimeoutSource {
    ticks_per_second: u32,
    armed: bool,
}

impl TimeoutSource {
    #[must_use]
    pub fn new(ticks_per_second: u32) -> Self {
        Self {
            ticks_per_second,
            armed: false,
        }
    }

    /// Arm the deadline for `state`, replacing any previously-armed one.
    pub fn arm_for(&mut self, rtc: &mut impl Rtc, state: DfuState) {
        let ticks = deadline_for(state).to_ticks(self.ticks_per_second);
        let deadline = rtc.now().wrapping_add(ticks) & rtc.mask();
        rtc.arm(deadline);
        self.armed = true;
    }

    /// Disarm, e.g. on a state transition that happens before the timeout
    /// fires.
    pub fn disarm(&mut self, rtc: &mut impl Rtc) {
        if self.armed {
            rtc.disable();
            self.armed = false;
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }
}
