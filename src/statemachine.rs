//! Component F, the DFU coordinator state machine (spec §4.F, the core).
//!
//! [`Bootloader`] is the single owning controller value: info view,
//! transaction record, caches, beacon driver and timeout source all live
//! here, touched only through `&mut self`. Collaborators (transport,
//! writer, verifier, RTC, launcher) are borrowed for the duration of a
//! single call rather than stored, since their concrete types belong to
//! whatever board-support layer wires this crate up.
//!
//! The two entry points, [`Bootloader::on_packet`] and
//! [`Bootloader::on_timeout`], must never be invoked concurrently with each
//! other for the same `Bootloader`; the caller masks one source while the
//! other runs, or serializes both through a single run loop (spec §5).

use crate::beacon::BeaconDriver;
use crate::cache::{ReqCache, TidCache};
use crate::collaborators::{AppLauncher, DfuWriter, EcdsaVerify, IntervalClass, Rtc, Transport, TX_REPEATS_DEFAULT};
use crate::error::{AbortReason, BootloaderError, LaunchTarget};
use crate::fmt::debug;
use crate::identity::{AppId, DfuType, TargetId, APP_VERSION_INVALID, SD_VERSION_INVALID};
use crate::info::Info;
use crate::packet::{
    DataBody, DataPacket, DataReqPacket, DataRspPacket, DataStart, DfuPacket, StateParams, MAX_PACKET_LEN,
    SEGMENT_LENGTH,
};
use crate::timeout::TimeoutSource;
use crate::transaction::Transaction;
use crate::verifier::{self, VerifyOutcome};

/// The five states of the coordinator (spec §4.F).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuState {
    FindFwid,
    DfuReq,
    DfuReady,
    DfuTarget,
    Rampdown,
}

/// Hardware properties the coordinator needs but does not own: the flash
/// page size (for the BOOTLOADER bank-address formula) and the RTC's tick
/// rate (for converting the per-state timeout table into ticks).
#[derive(Clone, Copy, Debug)]
pub struct BootloaderConfig {
    pub page_size: u32,
    pub ticks_per_second: u32,
}

/// The process-wide singleton: info view, active transaction, caches,
/// beacon driver, timeout source, and current state.
pub struct Bootloader {
    config: BootloaderConfig,
    info: Info,
    state: DfuState,
    txn: Transaction,
    req_cache: ReqCache,
    tid_cache: TidCache,
    beacon: BeaconDriver,
    timeout: TimeoutSource,
}

impl Bootloader {
    /// Select the initial state (spec §4.F "Initial-state selection"):
    /// repair a broken softdevice first, then a broken app, and only then
    /// listen for newer peers.
    pub fn init(
        config: BootloaderConfig,
        info: Info,
        transport: &mut impl Transport,
        rtc: &mut impl Rtc,
    ) -> Result<Self, BootloaderError> {
        let fwid = info.fwid();
        let flags = info.flags();
        let mut bl = Self {
            config,
            info,
            state: DfuState::FindFwid,
            txn: Transaction::start_req(DfuType::App, TargetId::App(AppId::default())),
            req_cache: ReqCache::new(),
            tid_cache: TidCache::new(),
            beacon: BeaconDriver::new(),
            timeout: TimeoutSource::new(config.ticks_per_second),
        };

        if !flags.sd_intact || fwid.sd == SD_VERSION_INVALID {
            bl.enter_req(DfuType::Sd, TargetId::Sd(0), transport, rtc)?;
        } else if !flags.app_intact || fwid.app.app_version == APP_VERSION_INVALID {
            bl.enter_req(DfuType::App, TargetId::App(AppId::default()), transport, rtc)?;
        } else {
            bl.enter_find_fwid(transport, rtc)?;
        }
        Ok(bl)
    }

    #[must_use]
    pub fn state(&self) -> DfuState {
        self.state
    }

    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    /// Decode and dispatch one incoming radio frame. Returns `Some(reason)`
    /// once the transfer is over (successfully or not); the caller then
    /// calls [`Bootloader::finish`] and stops driving this bootloader.
    pub fn on_packet(
        &mut self,
        bytes: &[u8],
        transport: &mut impl Transport,
        writer: &mut impl DfuWriter,
        ecdsa: &impl EcdsaVerify,
        rtc: &mut impl Rtc,
    ) -> Result<Option<AbortReason>, BootloaderError> {
        let Some(packet) = DfuPacket::decode(bytes) else {
            return Ok(None);
        };

        // Peer-assist paths apply in every state (spec §4.F "In any state").
        if let DfuPacket::DataReq(req) = &packet {
            self.handle_data_req(req, transport, writer)?;
            return Ok(None);
        }
        if let DfuPacket::DataRsp(rsp) = &packet {
            self.handle_data_rsp(rsp, writer);
            return Ok(None);
        }

        match self.state {
            DfuState::FindFwid => self.handle_find_fwid(&packet, transport, rtc),
            DfuState::DfuReq => self.handle_dfu_req(&packet, transport, rtc),
            DfuState::DfuReady => self.handle_dfu_ready(&packet, transport, writer, rtc),
            DfuState::DfuTarget => self.handle_dfu_target(&packet, transport, writer, ecdsa, rtc),
            DfuState::Rampdown => Ok(None),
        }
    }

    /// Fire the single outstanding deadline for the current state (spec
    /// §4.H dispatch table).
    pub fn on_timeout(
        &mut self,
        transport: &mut impl Transport,
        rtc: &mut impl Rtc,
    ) -> Result<Option<AbortReason>, BootloaderError> {
        match self.state {
            DfuState::FindFwid => Ok(Some(AbortReason::FwidValid)),
            DfuState::DfuReq | DfuState::DfuReady => Ok(Some(AbortReason::NoStart)),
            DfuState::DfuTarget => {
                self.enter_req(self.txn.ty, self.txn.target, transport, rtc)?;
                Ok(None)
            }
            DfuState::Rampdown => Ok(Some(AbortReason::Success)),
        }
    }

    /// Hand control to whichever entry point `reason` maps to (spec §7
    /// "only UNAUTHORIZED launches the bootloader entry point").
    pub fn finish(&self, reason: AbortReason, launcher: &mut impl AppLauncher) {
        let address = match reason.launch_target() {
            LaunchTarget::App => self.info.segment(DfuType::App).start,
            LaunchTarget::Bootloader => self.info.segment(DfuType::Bootloader).start,
        };
        launcher.launch(address);
    }

    fn enter_find_fwid(&mut self, transport: &mut impl Transport, rtc: &mut impl Rtc) -> Result<(), BootloaderError> {
        debug!("entering FIND_FWID");
        self.state = DfuState::FindFwid;
        self.beacon.set_fwid(transport, self.info.fwid())?;
        self.timeout.arm_for(rtc, DfuState::FindFwid);
        Ok(())
    }

    fn enter_req(
        &mut self,
        ty: DfuType,
        target: TargetId,
        transport: &mut impl Transport,
        rtc: &mut impl Rtc,
    ) -> Result<(), BootloaderError> {
        debug!("entering DFU_REQ");
        self.timeout.disarm(rtc);
        self.txn = Transaction::start_req(ty, target);
        self.state = DfuState::DfuReq;
        self.beacon.set_dfu_req(transport, &self.txn)?;
        self.timeout.arm_for(rtc, DfuState::DfuReq);
        Ok(())
    }

    fn start_ready(
        &mut self,
        authority: u8,
        transaction_id: u32,
        mic: u32,
        transport: &mut impl Transport,
        rtc: &mut impl Rtc,
    ) -> Result<(), BootloaderError> {
        self.txn.authority = authority;
        self.txn.transaction_id = transaction_id;
        self.txn.ready_mic = mic;
        self.enter_ready(transport, rtc)
    }

    fn enter_ready(&mut self, transport: &mut impl Transport, rtc: &mut impl Rtc) -> Result<(), BootloaderError> {
        debug!("entering DFU_READY");
        self.state = DfuState::DfuReady;
        self.beacon.set_ready(transport, &self.txn)?;
        self.timeout.arm_for(rtc, DfuState::DfuReady);
        Ok(())
    }

    fn enter_target(
        &mut self,
        writer: &mut impl DfuWriter,
        transport: &mut impl Transport,
        rtc: &mut impl Rtc,
    ) -> Result<Option<AbortReason>, BootloaderError> {
        self.beacon.abort(transport);
        match writer.start(
            self.txn.start_addr,
            self.txn.bank_addr,
            self.txn.length,
            self.txn.segment_is_valid_after_transfer,
        ) {
            Ok(()) => {
                debug!("entering DFU_TARGET");
                self.state = DfuState::DfuTarget;
                self.timeout.arm_for(rtc, DfuState::DfuTarget);
                Ok(None)
            }
            Err(_) => {
                self.enter_req(self.txn.ty, self.txn.target, transport, rtc)?;
                Ok(None)
            }
        }
    }

    fn enter_rampdown(&mut self, transport: &mut impl Transport, rtc: &mut impl Rtc) {
        debug!("entering RAMPDOWN");
        self.beacon.abort(transport);
        self.state = DfuState::Rampdown;
        self.timeout.arm_for(rtc, DfuState::Rampdown);
    }

    fn handle_find_fwid(
        &mut self,
        packet: &DfuPacket,
        transport: &mut impl Transport,
        rtc: &mut impl Rtc,
    ) -> Result<Option<AbortReason>, BootloaderError> {
        let DfuPacket::Fwid(peer) = packet else {
            return Ok(None);
        };
        let local = self.info.fwid();
        if peer.bootloader_is_newer_than(&local) {
            self.enter_req(DfuType::Bootloader, TargetId::Bootloader(peer.bootloader), transport, rtc)?;
        } else if peer.app_is_newer_than(&local) {
            if peer.sd != local.sd {
                self.enter_req(DfuType::Sd, TargetId::Sd(peer.sd), transport, rtc)?;
            } else {
                self.enter_req(DfuType::App, TargetId::App(peer.app), transport, rtc)?;
            }
        }
        Ok(None)
    }

    /// `DFU_REQ` only ever hears "ready" offers (authority + transaction id
    /// + MIC); a bare `Request`-kind STATE packet carries no transaction
    /// id and so cannot itself be adopted; it is another device also
    /// listening, not offering.
    fn handle_dfu_req(
        &mut self,
        packet: &DfuPacket,
        transport: &mut impl Transport,
        rtc: &mut impl Rtc,
    ) -> Result<Option<AbortReason>, BootloaderError> {
        let DfuPacket::State(state) = packet else {
            return Ok(None);
        };
        if state.authority == 0 {
            return Ok(None);
        }
        if state.target.dfu_type() != self.txn.ty || state.target != self.txn.target {
            return Ok(None);
        }
        let StateParams::Ready { transaction_id, mic } = state.params else {
            return Ok(None);
        };
        if self.tid_cache.contains(transaction_id) {
            return Ok(None);
        }
        self.start_ready(state.authority, transaction_id, mic, transport, rtc)?;
        Ok(None)
    }

    fn handle_dfu_ready(
        &mut self,
        packet: &DfuPacket,
        transport: &mut impl Transport,
        writer: &mut impl DfuWriter,
        rtc: &mut impl Rtc,
    ) -> Result<Option<AbortReason>, BootloaderError> {
        match packet {
            DfuPacket::State(state) => {
                if state.target.dfu_type() != self.txn.ty || state.target != self.txn.target {
                    return Ok(None);
                }
                let StateParams::Ready { transaction_id, mic } = state.params else {
                    return Ok(None);
                };
                if self.tid_cache.contains(transaction_id) {
                    return Ok(None);
                }
                let adopt = state.authority > self.txn.authority
                    || (state.authority == self.txn.authority && transaction_id > self.txn.transaction_id);
                if adopt {
                    self.txn.authority = state.authority;
                    self.txn.transaction_id = transaction_id;
                    self.txn.ready_mic = mic;
                    // Refresh immediately rather than deferring to the next
                    // natural state entry, resolving spec §9's "election
                    // correctness" open question in favor of eager
                    // convergence.
                    self.enter_ready(transport, rtc)?;
                }
                Ok(None)
            }
            DfuPacket::Data(data) if data.transaction_id == self.txn.transaction_id => match &data.body {
                DataBody::Start(start) if data.segment == 0 => self.handle_start_frame(data, start, transport, writer, rtc),
                _ => {
                    // Missed segment 0: abandon this transaction and re-elect.
                    self.tid_cache.insert(self.txn.transaction_id);
                    self.enter_req(self.txn.ty, self.txn.target, transport, rtc)?;
                    Ok(None)
                }
            },
            _ => Ok(None),
        }
    }

    fn handle_start_frame(
        &mut self,
        data: &DataPacket,
        start: &DataStart,
        transport: &mut impl Transport,
        writer: &mut impl DfuWriter,
        rtc: &mut impl Rtc,
    ) -> Result<Option<AbortReason>, BootloaderError> {
        let length_bytes = u32::from(start.length_words) * 4;
        let segment = self.info.segment(self.txn.ty);
        if !segment.contains_range(start.start_address, length_bytes) {
            return Ok(None);
        }

        self.txn.start_addr = start.start_address;
        self.txn.length = length_bytes;
        self.txn.signature_length = u32::from(start.signature_length);
        self.txn.segment_count = segment_count(u32::from(start.length_words), start.start_address);
        self.txn.segments_remaining = self.txn.segment_count;
        self.txn.segment_is_valid_after_transfer = start.last;
        self.txn.bank_addr = match self.txn.ty {
            DfuType::Bootloader => {
                let app = self.info.segment(DfuType::App);
                let rounded = round_up(self.txn.length, self.config.page_size);
                app.start
                    .saturating_add(app.length)
                    .saturating_sub(rounded)
                    .saturating_sub(self.config.page_size)
            }
            DfuType::App | DfuType::Sd => self.txn.start_addr,
        };

        let outcome = self.enter_target(writer, transport, rtc)?;
        if self.state == DfuState::DfuTarget {
            self.relay(data, transport)?;
        }
        Ok(outcome)
    }

    fn handle_dfu_target(
        &mut self,
        packet: &DfuPacket,
        transport: &mut impl Transport,
        writer: &mut impl DfuWriter,
        ecdsa: &impl EcdsaVerify,
        rtc: &mut impl Rtc,
    ) -> Result<Option<AbortReason>, BootloaderError> {
        let DfuPacket::Data(data) = packet else {
            return Ok(None);
        };
        if data.transaction_id != self.txn.transaction_id {
            return Ok(None);
        }
        if data.segment == 0 || data.segment > self.txn.segment_count {
            return Ok(None);
        }

        let payload = match &data.body {
            DataBody::Segment { payload, len } => match payload.get(..usize::from(*len)) {
                Some(p) => p,
                None => return Ok(None),
            },
            DataBody::Start(_) => return Ok(None),
        };

        let addr = addr_from_seg(data.segment, self.txn.start_addr);
        match writer.data(addr, payload) {
            Ok(()) => {
                self.txn.segments_remaining = self.txn.segments_remaining.saturating_sub(1);
                self.relay(data, transport)?;
            }
            Err(_) => return Ok(None), // dropped per spec §7: not decremented, not relayed
        }

        if self.txn.is_complete() {
            writer.end();
            return match verifier::verify(&self.info, &self.txn, writer, ecdsa) {
                VerifyOutcome::Accepted => {
                    self.enter_rampdown(transport, rtc);
                    Ok(None)
                }
                VerifyOutcome::Rejected => Ok(Some(AbortReason::Unauthorized)),
            };
        }
        Ok(None)
    }

    fn relay(&self, data: &DataPacket, transport: &mut impl Transport) -> Result<(), BootloaderError> {
        let mut buf = [0u8; MAX_PACKET_LEN];
        let n = DfuPacket::Data(*data).encode(&mut buf).ok_or(BootloaderError::NoMem)?;
        let slice = buf.get(..n).ok_or(BootloaderError::NoMem)?;
        transport.send(slice, TX_REPEATS_DEFAULT, IntervalClass::Regular)
    }

    fn handle_data_req(
        &mut self,
        req: &DataReqPacket,
        transport: &mut impl Transport,
        writer: &impl DfuWriter,
    ) -> Result<(), BootloaderError> {
        if req.transaction_id != self.txn.transaction_id {
            return Ok(());
        }
        if self.req_cache.contains(u32::from(req.segment)) {
            return Ok(());
        }
        let addr = addr_from_seg(req.segment, self.txn.start_addr);
        let mut payload = [0u8; SEGMENT_LENGTH];
        if !writer.has_entry(addr, &mut payload) {
            return Ok(());
        }
        let rsp = DataRspPacket {
            transaction_id: req.transaction_id,
            segment: req.segment,
            payload,
        };
        let mut buf = [0u8; MAX_PACKET_LEN];
        let n = DfuPacket::DataRsp(rsp).encode(&mut buf).ok_or(BootloaderError::NoMem)?;
        let slice = buf.get(..n).ok_or(BootloaderError::NoMem)?;
        transport.send(slice, TX_REPEATS_DEFAULT, IntervalClass::Regular)?;
        self.req_cache.insert(u32::from(req.segment));
        Ok(())
    }

    fn handle_data_rsp(&mut self, rsp: &DataRspPacket, writer: &mut impl DfuWriter) {
        if rsp.transaction_id != self.txn.transaction_id {
            return;
        }
        let addr = addr_from_seg(rsp.segment, self.txn.start_addr);
        let _ = writer.data(addr, &rsp.payload);
    }
}

/// `addr_from_seg` (spec §4.F): segment 1 lands exactly at `start_addr`;
/// every later segment is 16-byte aligned from there.
fn addr_from_seg(segment: u16, start_addr: u32) -> u32 {
    if segment == 1 {
        start_addr
    } else {
        (u32::from(segment.saturating_sub(1)) << 4) + (start_addr & !0x0F)
    }
}

/// `segment_count` (spec §4.F / §8 boundary behaviors): kept as the
/// original's exact formula, including its documented mismatch between
/// `length*4` and a possibly-unaligned `start_address` (spec §9 Open
/// Question); changing the formula would change wire-visible behavior,
/// which is out of scope for this core. Takes `length_words` as a plain
/// `u32` rather than the wire field's `u16`, since the formula itself (and
/// its saturation boundary) is wider than any single segment-0 frame could
/// carry.
fn segment_count(length_words: u32, start_address: u32) -> u16 {
    let len_bytes = u64::from(length_words) * 4;
    let misalign = u64::from(start_address & 0x0F);
    let numerator = len_bytes + misalign;
    if numerator == 0 {
        return 0;
    }
    let count = (numerator - 1) / 16 + 1;
    count.min(u64::from(u16::MAX)) as u16
}

fn round_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    let rem = value % align;
    if rem == 0 {
        value
    } else {
        value.saturating_add(align - rem)
    }
}
