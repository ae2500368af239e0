//! Firmware identity triple and DFU type (spec §3).

use binary_serde::BinarySerde;

/// Sentinel marking an application version that has never been installed
/// (all-ones, matching the erased-flash pattern the persistent info page
/// uses for an absent entry).
pub const APP_VERSION_INVALID: u16 = 0xFFFF;

/// Sentinel marking a softdevice version that has never been installed.
pub const SD_VERSION_INVALID: u16 = 0xFFFF;

/// Application identity: a company id, an application id, and a version.
/// Two `AppId`s name "the same application line" iff `company_id` and
/// `app_id` match; `app_version` then orders installs of that line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BinarySerde)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AppId {
    pub app_id: u16,
    pub app_version: u16,
    pub company_id: u32,
}

impl AppId {
    /// True iff `other` names the same application line and carries a
    /// strictly greater version.
    #[must_use]
    pub fn is_newer_than(&self, other: &AppId) -> bool {
        self.app_id == other.app_id && self.company_id == other.company_id && self.app_version > other.app_version
    }
}

/// Complete identity of an installed system: application, bootloader, and
/// softdevice (radio stack) versions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BinarySerde)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FwId {
    pub app: AppId,
    pub bootloader: u16,
    pub sd: u16,
}

impl FwId {
    /// True iff `bootloader` is strictly newer than `other.bootloader`.
    #[must_use]
    pub fn bootloader_is_newer_than(&self, other: &FwId) -> bool {
        self.bootloader > other.bootloader
    }

    /// True iff `self.app` is a newer build of the same application line
    /// installed in `other`.
    #[must_use]
    pub fn app_is_newer_than(&self, other: &FwId) -> bool {
        self.app.is_newer_than(&other.app)
    }
}

/// Which memory segment (and which fields of the identity triple) a
/// transfer targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BinarySerde)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DfuType {
    App = 0,
    Sd = 1,
    Bootloader = 2,
}

/// One of the three things a `STATE`/`FWID` packet can be naming as the
/// transfer target, keyed by [`DfuType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetId {
    App(AppId),
    Sd(u16),
    Bootloader(u16),
}

impl TargetId {
    #[must_use]
    pub fn dfu_type(&self) -> DfuType {
        match self {
            TargetId::App(_) => DfuType::App,
            TargetId::Sd(_) => DfuType::Sd,
            TargetId::Bootloader(_) => DfuType::Bootloader,
        }
    }
}
