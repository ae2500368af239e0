//! Component B, packet codec (spec §4.B, §6 wire format constants).
//!
//! Packets share a fixed advertising envelope (link-layer PDU type, mesh
//! advertising-data type, 16-bit mesh UUID) followed by one of five DFU
//! payload types. The codec owns no state; it only maps bytes to/from the
//! structured [`DfuPacket`] form. All multi-byte integers are little-endian.

use binary_serde::{BinarySerde, Endianness};

use crate::identity::{AppId, DfuType, FwId, TargetId};

/// Size in bytes of one data segment (spec §2 "Segment").
pub const SEGMENT_LENGTH: usize = 16;

/// BLE `ADV_NONCONN_IND` link-layer PDU type, fixed by the deployment.
pub const ADV_NONCONN_IND: u8 = 0x03;
/// Mesh advertising-data type, fixed by the deployment.
pub const MESH_AD_TYPE: u8 = 0x2D;
/// 16-bit mesh UUID, fixed by the deployment.
pub const MESH_UUID: u16 = 0xFEF3;

const HEADER_LEN: usize = 5; // adv_pdu_type, ad_type, uuid_lo, uuid_hi, dfu_packet_type

/// Largest encoded packet this codec ever produces (DATA_RSP: header +
/// transaction_id + segment + 16-byte payload).
pub const MAX_PACKET_LEN: usize = HEADER_LEN + 4 + 2 + SEGMENT_LENGTH;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
enum WireType {
    Fwid = 0,
    State = 1,
    Data = 2,
    DataReq = 3,
    DataRsp = 4,
}

impl WireType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Fwid),
            1 => Some(Self::State),
            2 => Some(Self::Data),
            3 => Some(Self::DataReq),
            4 => Some(Self::DataRsp),
            _ => None,
        }
    }
}

/// `STATE` payload's request/ready discriminant (spec §4.B).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateParams {
    /// A bare offer of transfer authority for a target id; authority > 0
    /// means "offering", authority == 0 means "listening".
    Request,
    /// The ready exchange: names the transaction and carries the MIC.
    Ready { transaction_id: u32, mic: u32 },
}

/// `STATE` packet: `{dfu_type, authority, params}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatePacket {
    pub authority: u8,
    pub target: TargetId,
    pub params: StateParams,
}

/// The body of segment 0 of a transfer: the "start" frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataStart {
    pub start_address: u32,
    pub length_words: u16,
    pub signature_length: u16,
    pub last: bool,
}

/// `DATA` payload body: segment 0 is a start frame, all others carry up to
/// [`SEGMENT_LENGTH`] bytes of image content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBody {
    Start(DataStart),
    Segment { payload: [u8; SEGMENT_LENGTH], len: u8 },
}

/// `DATA` packet: `{transaction_id, segment, body}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataPacket {
    pub transaction_id: u32,
    pub segment: u16,
    pub body: DataBody,
}

/// `DATA_REQ` packet: requests retransmission of one segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataReqPacket {
    pub transaction_id: u32,
    pub segment: u16,
}

/// `DATA_RSP` packet: the response to a `DATA_REQ`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataRspPacket {
    pub transaction_id: u32,
    pub segment: u16,
    pub payload: [u8; SEGMENT_LENGTH],
}

/// A decoded DFU payload, still wrapped in the advertising envelope's
/// identity (the envelope itself carries no information the state machine
/// needs beyond "this is one of ours").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuPacket {
    Fwid(FwId),
    State(StatePacket),
    Data(DataPacket),
    DataReq(DataReqPacket),
    DataRsp(DataRspPacket),
}

fn put_u16(buf: &mut [u8], at: usize, v: u16) -> Option<()> {
    let slot = buf.get_mut(at..at.checked_add(2)?)?;
    slot.copy_from_slice(&v.to_le_bytes());
    Some(())
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) -> Option<()> {
    let slot = buf.get_mut(at..at.checked_add(4)?)?;
    slot.copy_from_slice(&v.to_le_bytes());
    Some(())
}

fn get_u16(buf: &[u8], at: usize) -> Option<u16> {
    let slot = buf.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes(slot.try_into().ok()?))
}

fn get_u32(buf: &[u8], at: usize) -> Option<u32> {
    let slot = buf.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes(slot.try_into().ok()?))
}

fn write_header(buf: &mut [u8], wire_type: WireType) -> Option<usize> {
    let slot = buf.get_mut(..HEADER_LEN)?;
    slot[0] = ADV_NONCONN_IND;
    slot[1] = MESH_AD_TYPE;
    slot[2..4].copy_from_slice(&MESH_UUID.to_le_bytes());
    slot[4] = wire_type as u8;
    Some(HEADER_LEN)
}

impl DfuPacket {
    /// Encode into `buf`, returning the number of bytes written, or `None`
    /// if `buf` is too small.
    #[must_use]
    pub fn encode(&self, buf: &mut [u8]) -> Option<usize> {
        match self {
            DfuPacket::Fwid(fwid) => {
                let n = write_header(buf, WireType::Fwid)?;
                let slot = buf.get_mut(n..n.checked_add(FwId::SERIALIZED_SIZE)?)?;
                fwid.binary_serialize(slot, Endianness::Little);
                Some(n + FwId::SERIALIZED_SIZE)
            }
            DfuPacket::State(state) => encode_state(buf, state),
            DfuPacket::Data(data) => encode_data(buf, data),
            DfuPacket::DataReq(req) => {
                let mut n = write_header(buf, WireType::DataReq)?;
                put_u32(buf, n, req.transaction_id)?;
                n += 4;
                put_u16(buf, n, req.segment)?;
                n += 2;
                Some(n)
            }
            DfuPacket::DataRsp(rsp) => {
                let mut n = write_header(buf, WireType::DataRsp)?;
                put_u32(buf, n, rsp.transaction_id)?;
                n += 4;
                put_u16(buf, n, rsp.segment)?;
                n += 2;
                let slot = buf.get_mut(n..n.checked_add(SEGMENT_LENGTH)?)?;
                slot.copy_from_slice(&rsp.payload);
                n += SEGMENT_LENGTH;
                Some(n)
            }
        }
    }

    /// Decode a packet out of `bytes`. Returns `None` for malformed input or
    /// an unrecognised `packet_type`; callers must ignore both silently
    /// (spec §4.B "Unknown types are ignored silently").
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<DfuPacket> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        if *bytes.first()? != ADV_NONCONN_IND || *bytes.get(1)? != MESH_AD_TYPE {
            return None;
        }
        if get_u16(bytes, 2)? != MESH_UUID {
            return None;
        }
        let wire_type = WireType::from_u8(*bytes.get(4)?)?;
        let payload = bytes.get(HEADER_LEN..)?;
        match wire_type {
            WireType::Fwid => decode_fwid(payload),
            WireType::State => decode_state(payload),
            WireType::Data => decode_data(payload),
            WireType::DataReq => decode_data_req(payload),
            WireType::DataRsp => decode_data_rsp(payload),
        }
    }

    /// The transaction id carried by this packet, if any (`FWID` packets
    /// carry none).
    #[must_use]
    pub fn transaction_id(&self) -> Option<u32> {
        match self {
            DfuPacket::Fwid(_) => None,
            DfuPacket::State(StatePacket {
                params: StateParams::Ready { transaction_id, .. },
                ..
            }) => Some(*transaction_id),
            DfuPacket::State(_) => None,
            DfuPacket::Data(d) => Some(d.transaction_id),
            DfuPacket::DataReq(r) => Some(r.transaction_id),
            DfuPacket::DataRsp(r) => Some(r.transaction_id),
        }
    }
}

fn encode_state(buf: &mut [u8], state: &StatePacket) -> Option<usize> {
    let mut n = write_header(buf, WireType::State)?;
    let dfu_type = state.target.dfu_type();
    *buf.get_mut(n)? = dfu_type as u8;
    n += 1;
    *buf.get_mut(n)? = state.authority;
    n += 1;
    *buf.get_mut(n)? = matches!(state.params, StateParams::Ready { .. }) as u8;
    n += 1;
    n = encode_target(buf, n, &state.target)?;
    if let StateParams::Ready { transaction_id, mic } = state.params {
        put_u32(buf, n, transaction_id)?;
        n += 4;
        put_u32(buf, n, mic)?;
        n += 4;
    }
    Some(n)
}

fn encode_target(buf: &mut [u8], at: usize, target: &TargetId) -> Option<usize> {
    match target {
        TargetId::App(app) => {
            let slot = buf.get_mut(at..at.checked_add(AppId::SERIALIZED_SIZE)?)?;
            app.binary_serialize(slot, Endianness::Little);
            Some(at + AppId::SERIALIZED_SIZE)
        }
        TargetId::Sd(sd) => {
            put_u16(buf, at, *sd)?;
            Some(at + 2)
        }
        TargetId::Bootloader(bl) => {
            put_u16(buf, at, *bl)?;
            Some(at + 2)
        }
    }
}

fn decode_target(dfu_type: DfuType, payload: &[u8]) -> Option<(TargetId, usize)> {
    match dfu_type {
        DfuType::App => {
            let slot = payload.get(..AppId::SERIALIZED_SIZE)?;
            let app = AppId::binary_deserialize(slot, Endianness::Little).ok()?;
            Some((TargetId::App(app), AppId::SERIALIZED_SIZE))
        }
        DfuType::Sd => Some((TargetId::Sd(get_u16(payload, 0)?), 2)),
        DfuType::Bootloader => Some((TargetId::Bootloader(get_u16(payload, 0)?), 2)),
    }
}

fn decode_fwid(payload: &[u8]) -> Option<DfuPacket> {
    let slot = payload.get(..FwId::SERIALIZED_SIZE)?;
    let fwid = FwId::binary_deserialize(slot, Endianness::Little).ok()?;
    Some(DfuPacket::Fwid(fwid))
}

fn decode_state(payload: &[u8]) -> Option<DfuPacket> {
    let dfu_type = match *payload.first()? {
        0 => DfuType::App,
        1 => DfuType::Sd,
        2 => DfuType::Bootloader,
        _ => return None,
    };
    let authority = *payload.get(1)?;
    let is_ready = *payload.get(2)? != 0;
    let (target, target_len) = decode_target(dfu_type, payload.get(3..)?)?;
    let after_target = 3usize.checked_add(target_len)?;
    let params = if is_ready {
        let transaction_id = get_u32(payload, after_target)?;
        let mic = get_u32(payload, after_target.checked_add(4)?)?;
        StateParams::Ready { transaction_id, mic }
    } else {
        StateParams::Request
    };
    Some(DfuPacket::State(StatePacket { authority, target, params }))
}

fn encode_data(buf: &mut [u8], data: &DataPacket) -> Option<usize> {
    let mut n = write_header(buf, WireType::Data)?;
    put_u32(buf, n, data.transaction_id)?;
    n += 4;
    put_u16(buf, n, data.segment)?;
    n += 2;
    match &data.body {
        DataBody::Start(start) => {
            put_u32(buf, n, start.start_address)?;
            n += 4;
            put_u16(buf, n, start.length_words)?;
            n += 2;
            put_u16(buf, n, start.signature_length)?;
            n += 2;
            *buf.get_mut(n)? = u8::from(start.last);
            n += 1;
        }
        DataBody::Segment { payload, len } => {
            let len = usize::from(*len).min(SEGMENT_LENGTH);
            let slot = buf.get_mut(n..n.checked_add(len)?)?;
            slot.copy_from_slice(payload.get(..len)?);
            n += len;
        }
    }
    Some(n)
}

fn decode_data(payload: &[u8]) -> Option<DfuPacket> {
    let transaction_id = get_u32(payload, 0)?;
    let segment = get_u16(payload, 4)?;
    let rest = payload.get(6..)?;
    let body = if segment == 0 {
        let start_address = get_u32(rest, 0)?;
        let length_words = get_u16(rest, 4)?;
        let signature_length = get_u16(rest, 6)?;
        let last = *rest.get(8)? != 0;
        DataBody::Start(DataStart {
            start_address,
            length_words,
            signature_length,
            last,
        })
    } else {
        let mut buf = [0u8; SEGMENT_LENGTH];
        let len = rest.len().min(SEGMENT_LENGTH);
        buf.get_mut(..len)?.copy_from_slice(rest.get(..len)?);
        DataBody::Segment {
            payload: buf,
            len: len as u8,
        }
    };
    Some(DfuPacket::Data(DataPacket {
        transaction_id,
        segment,
        body,
    }))
}

fn decode_data_req(payload: &[u8]) -> Option<DfuPacket> {
    let transaction_id = get_u32(payload, 0)?;
    let segment = get_u16(payload, 4)?;
    Some(DfuPacket::DataReq(DataReqPacket { transaction_id, segment }))
}

fn decode_data_rsp(payload: &[u8]) -> Option<DfuPacket> {
    let transaction_id = get_u32(payload, 0)?;
    let segment = get_u16(payload, 4)?;
    let mut out = [0u8; SEGMENT_LENGTH];
    out.copy_from_slice(payload.get(6..6 + SEGMENT_LENGTH)?);
    Some(DfuPacket::DataRsp(DataRspPacket {
        transaction_id,
        segment,
        payload: out,
    }))
}
