#![no_std]
//! Mesh DFU coordinator core (spec §0 overview).
//!
//! This crate is the 50%-share center of an over-the-air firmware update
//! system for a mesh of constrained wireless devices: a beacon-driven
//! discovery protocol, multi-party election of a transfer authority,
//! segmented transfer with duplicate suppression and loss recovery, and a
//! cryptographic acceptance gate. The radio link, flash allocator, journal,
//! host-side signing, and serial command interface are out of scope here and
//! appear only as the trait contracts in [`collaborators`].
//!
//! [`statemachine::Bootloader`] is the entry point: construct one with
//! [`statemachine::Bootloader::init`] and drive it from a run loop via
//! [`statemachine::Bootloader::on_packet`] and
//! [`statemachine::Bootloader::on_timeout`].

#[cfg(test)]
extern crate std;

pub mod beacon;
pub mod cache;
pub mod collaborators;
pub mod error;
pub mod fmt;
pub mod identity;
pub mod info;
pub mod packet;
pub mod statemachine;
pub mod timeout;
pub mod transaction;
pub mod verifier;

pub use collaborators::{AppLauncher, DfuWriter, EcdsaVerify, InfoPage, Rtc, Transport};
pub use error::{AbortReason, BootloaderError, LaunchTarget};
pub use statemachine::{Bootloader, BootloaderConfig, DfuState};
