//! Component D, the beacon driver (spec §4.D).
//!
//! Owns at most one *persistent* outstanding beacon: `FWID`, a `DFU_REQ`
//! offer, or a `READY` announcement, each repeated indefinitely until
//! replaced. Setting a new beacon unconditionally aborts whatever was
//! transmitting before it (spec §5 "beacon_set unconditionally aborts the
//! previous one").
//!
//! The other two rows of the beacon table in spec §4.D, a relayed `DATA`
//! packet and a `DATA_RSP`, are five-repeat, fire-and-forget
//! transmissions, not beacons in this sense: they never replace anything
//! and the driver never tracks them. The state machine sends those directly
//! through [`Transport::send`](crate::collaborators::Transport::send).

use crate::collaborators::{IntervalClass, Repeats, Transport, TX_REPEATS_PERSISTENT};
use crate::error::BootloaderError;
use crate::identity::FwId;
use crate::packet::{DfuPacket, StateParams, StatePacket, MAX_PACKET_LEN};
use crate::transaction::Transaction;

/// Which persistent beacon is currently (or about to be) on air.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BeaconKind {
    Fwid,
    DfuReq,
    Ready,
}

/// Owns the currently-broadcast persistent beacon. Holds no buffer itself;
/// encoding happens into a caller-provided scratch buffer immediately
/// before handing bytes to the transport, so there is nothing here for the
/// controller to leak or double-free.
#[derive(Default)]
pub struct BeaconDriver {
    current: Option<BeaconKind>,
}

impl BeaconDriver {
    #[must_use]
    pub fn new() -> Self {
        Self { current: None }
    }

    #[must_use]
    pub fn current(&self) -> Option<BeaconKind> {
        self.current
    }

    /// Broadcast our own identity triple, repeated forever.
    pub fn set_fwid(&mut self, transport: &mut impl Transport, fwid: FwId) -> Result<(), BootloaderError> {
        let mut buf = [0u8; MAX_PACKET_LEN];
        let n = DfuPacket::Fwid(fwid)
            .encode(&mut buf)
            .ok_or(BootloaderError::NoMem)?;
        self.replace(transport, BeaconKind::Fwid, buf.get(..n).ok_or(BootloaderError::NoMem)?)
    }

    /// Broadcast a request for `txn.target` with `authority = 0`, repeated
    /// forever (spec §4.D "DFU_REQ" row).
    pub fn set_dfu_req(&mut self, transport: &mut impl Transport, txn: &Transaction) -> Result<(), BootloaderError> {
        let mut buf = [0u8; MAX_PACKET_LEN];
        let packet = DfuPacket::State(StatePacket {
            authority: 0,
            target: txn.target,
            params: StateParams::Request,
        });
        let n = packet.encode(&mut buf).ok_or(BootloaderError::NoMem)?;
        self.replace(transport, BeaconKind::DfuReq, buf.get(..n).ok_or(BootloaderError::NoMem)?)
    }

    /// Broadcast our current `(authority, transaction_id, MIC)` for
    /// `txn.target`, repeated forever (spec §4.D "READY" row).
    pub fn set_ready(&mut self, transport: &mut impl Transport, txn: &Transaction) -> Result<(), BootloaderError> {
        let mut buf = [0u8; MAX_PACKET_LEN];
        let packet = DfuPacket::State(StatePacket {
            authority: txn.authority,
            target: txn.target,
            params: StateParams::Ready {
                transaction_id: txn.transaction_id,
                mic: txn.ready_mic,
            },
        });
        let n = packet.encode(&mut buf).ok_or(BootloaderError::NoMem)?;
        self.replace(transport, BeaconKind::Ready, buf.get(..n).ok_or(BootloaderError::NoMem)?)
    }

    /// Abort whatever is currently beaconing, e.g. on entry to `DFU_TARGET`
    /// (spec §4.F "Abort the beacon transmitter").
    pub fn abort(&mut self, transport: &mut impl Transport) {
        if self.current.take().is_some() {
            transport.abort_beacon();
        }
    }

    fn replace(&mut self, transport: &mut impl Transport, kind: BeaconKind, packet: &[u8]) -> Result<(), BootloaderError> {
        transport.set_beacon(packet, TX_REPEATS_PERSISTENT, IntervalClass::Regular)?;
        self.current = Some(kind);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::identity::{AppId, DfuType, TargetId};
    use std::vec::Vec;

    #[derive(Default)]
    struct FakeTransport {
        beacon_sets: Vec<Vec<u8>>,
        beacon_aborts: usize,
        sends: Vec<Vec<u8>>,
    }

    impl Transport for FakeTransport {
        fn set_beacon(&mut self, packet: &[u8], _repeats: Repeats, _interval: IntervalClass) -> Result<(), BootloaderError> {
            self.beacon_sets.push(packet.to_vec());
            Ok(())
        }
        fn abort_beacon(&mut self) {
            self.beacon_aborts += 1;
        }
        fn send(&mut self, packet: &[u8], _repeats: Repeats, _interval: IntervalClass) -> Result<(), BootloaderError> {
            self.sends.push(packet.to_vec());
            Ok(())
        }
    }

    #[test]
    fn setting_a_beacon_replaces_without_aborting_when_none_outstanding() {
        let mut transport = FakeTransport::default();
        let mut driver = BeaconDriver::new();
        driver.set_fwid(&mut transport, FwId::default()).unwrap();
        assert_eq!(transport.beacon_sets.len(), 1);
        assert_eq!(transport.beacon_aborts, 0);
        assert_eq!(driver.current(), Some(BeaconKind::Fwid));
    }

    #[test]
    fn abort_stops_the_transport_beacon() {
        let mut transport = FakeTransport::default();
        let mut driver = BeaconDriver::new();
        driver.set_fwid(&mut transport, FwId::default()).unwrap();
        driver.abort(&mut transport);
        assert_eq!(transport.beacon_aborts, 1);
        assert_eq!(driver.current(), None);
    }

    #[test]
    fn abort_with_nothing_outstanding_is_a_no_op() {
        let mut transport = FakeTransport::default();
        let mut driver = BeaconDriver::new();
        driver.abort(&mut transport);
        assert_eq!(transport.beacon_aborts, 0);
    }

    #[test]
    fn req_and_ready_beacons_encode_as_state_packets() {
        let mut transport = FakeTransport::default();
        let mut driver = BeaconDriver::new();
        let txn = Transaction::start_req(DfuType::App, TargetId::App(AppId::default()));
        driver.set_dfu_req(&mut transport, &txn).unwrap();
        let decoded = DfuPacket::decode(&transport.beacon_sets[0]).unwrap();
        assert!(matches!(
            decoded,
            DfuPacket::State(StatePacket {
                params: StateParams::Request,
                ..
            })
        ));
    }
}
