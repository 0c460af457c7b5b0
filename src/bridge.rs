//! ASCII-hex bridge to the analog module.
//!
//! The analog module is the bridge master: it sends one message, this device
//! answers with exactly one reply. Fields are separated by `,` and every
//! message ends with `\n`. Hex digits are uppercase only.
//!
//! # Inbound messages
//!
//! | Type | Layout | Meaning |
//! |------|--------|---------|
//! | Poll | `P,SS` | `SS` status of the module's last transmission |
//! | Update | `U,PPPPPPPP,SSSSSSSS,LLLLLLLL,ST` | PV, SV, loop current, module status |
//! | Database load | `D,OO,CC,MM,<2*CC hex>` | chunk of the configuration mirror |
//!
//! # Replies
//!
//! | Reply | Layout |
//! |-------|--------|
//! | ACK, no request | `A,HH,00` |
//! | ACK with request | `A,HH,RR,VVVVVVVV` |
//! | NACK | `N,CC` |
//!
//! `HH` is the [`Health`] code, `RR` a [`RequestCode`]
//! and `CC` the reason code of a [`BridgeError`].
//!
//! # Example
//!
//! ```
//! use hart_slave::{Device, DeviceConfig};
//!
//! let mut device = Device::new(DeviceConfig::new(1)).unwrap();
//! let reply = device.handle_bridge_message(b"P,00\n");
//! assert_eq!(reply, b"A,00,00\n");
//!
//! let reply = device.handle_bridge_message(b"X,00\n");
//! assert_eq!(reply, b"N,02\n");
//! ```

use std::collections::VecDeque;

use log::{debug, info, trace, warn};

use crate::error::BridgeError;
use crate::mirror::{
    self, LOWER_SENSOR_LIMIT, MIRROR_LEN, SV_LOWER_SENSOR_LIMIT, SV_UPPER_SENSOR_LIMIT,
    UPPER_SENSOR_LIMIT,
};
use crate::state::{DeviceState, ErrorCounter, Health};
use crate::status::{
    DEVICE_MALFUNCTION, LOOP_CURRENT_SATURATED, NON_PV_OUT_OF_LIMITS, PV_OUT_OF_LIMITS,
    VARIABLE_BAD, VARIABLE_BAD_HIGH_LIMITED, VARIABLE_BAD_LOW_LIMITED, VARIABLE_GOOD,
};
use crate::utils::{
    format_hex, parse_hex_bytes, parse_hex_f32, parse_hex_u8, push_hex_f32, push_hex_u8,
};

/// Field separator.
pub const SEPARATOR: u8 = b',';
/// Message terminator.
pub const TERMINATOR: u8 = b'\n';
/// Number of entries the request queue holds.
pub const QUEUE_DEPTH: usize = 2;

/// Module status bit: the PV measurement is faulty.
pub const MODULE_PV_FAULT: u8 = 0x01;
/// Module status bit: the SV measurement is faulty.
pub const MODULE_SV_FAULT: u8 = 0x02;
/// Module status bit: the module detected a malfunction.
pub const MODULE_MALFUNCTION: u8 = 0x80;

const MARKER_LAST: u8 = 0x00;
const MARKER_MORE: u8 = 0x01;

/// Request carried in an ACK reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCode {
    /// Nothing requested.
    None,
    /// Park the output at the given current.
    SetLoopCurrent,
    /// Let the output track the PV again.
    LoopOperational,
    /// Apply a zero trim with the given reading.
    TrimZero,
    /// Apply a gain trim with the given reading.
    TrimGain,
    /// Store a new lower range value.
    WriteLowerRange,
    /// Store a new upper range value.
    WriteUpperRange,
    /// Reset the analog module.
    ResetModule,
}

impl RequestCode {
    /// Wire value of the request code.
    pub fn code(self) -> u8 {
        match self {
            RequestCode::None => 0x00,
            RequestCode::SetLoopCurrent => 0x01,
            RequestCode::LoopOperational => 0x02,
            RequestCode::TrimZero => 0x03,
            RequestCode::TrimGain => 0x04,
            RequestCode::WriteLowerRange => 0x05,
            RequestCode::WriteUpperRange => 0x06,
            RequestCode::ResetModule => 0x07,
        }
    }
}

/// A single request with its value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeRequest {
    /// What the module should do.
    pub code: RequestCode,
    /// Argument of the request.
    pub value: f32,
}

impl BridgeRequest {
    /// Creates a request.
    pub fn new(code: RequestCode, value: f32) -> Self {
        Self { code, value }
    }
}

/// Entry of the request queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueuedRequest {
    /// One request.
    Single(BridgeRequest),
    /// A range write, delivered as lower then upper value on consecutive replies.
    Range {
        /// Lower range value.
        lower: f32,
        /// Upper range value.
        upper: f32,
    },
}

/// FIFO of pending requests, at most [`QUEUE_DEPTH`] entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestQueue {
    entries: VecDeque<QueuedRequest>,
}

impl RequestQueue {
    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether another entry fits.
    pub fn has_room(&self) -> bool {
        self.entries.len() < QUEUE_DEPTH
    }

    /// Appends an entry. Returns `false` and drops nothing when full.
    pub fn push(&mut self, entry: QueuedRequest) -> bool {
        if !self.has_room() {
            return false;
        }
        self.entries.push_back(entry);
        true
    }

    /// Takes the next request to send.
    ///
    /// A range entry yields its lower value and leaves the upper value at the
    /// front of the queue, so nothing can be sent in between.
    pub fn pop_next(&mut self) -> Option<BridgeRequest> {
        match self.entries.pop_front()? {
            QueuedRequest::Single(request) => Some(request),
            QueuedRequest::Range { lower, upper } => {
                self.entries.push_front(QueuedRequest::Single(BridgeRequest::new(
                    RequestCode::WriteUpperRange,
                    upper,
                )));
                Some(BridgeRequest::new(RequestCode::WriteLowerRange, lower))
            }
        }
    }
}

/// Whether more database chunks follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoreData {
    /// Further chunks follow.
    More,
    /// This chunk completes the load.
    Last,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    /// Keep-alive carrying the module's last transmission status.
    Poll {
        /// 0 when the module's last transmission succeeded.
        tx_status: u8,
    },
    /// Fresh process data.
    Update {
        /// Primary variable.
        pv: f32,
        /// Secondary variable.
        sv: f32,
        /// Measured loop current in mA.
        loop_current: f32,
        /// Module status bits.
        status: u8,
    },
    /// One chunk of the configuration mirror.
    DatabaseLoad {
        /// First mirror byte written.
        offset: u8,
        /// Whether this is the final chunk.
        more: MoreData,
        /// Decoded chunk bytes.
        payload: Vec<u8>,
    },
}

impl BridgeMessage {
    /// Decodes one complete message, terminator included.
    ///
    /// # Errors
    ///
    /// Returns the first [`BridgeError`] found; nothing is partially decoded.
    ///
    /// # Example
    ///
    /// ```
    /// use hart_slave::bridge::BridgeMessage;
    ///
    /// let msg = BridgeMessage::decode(b"U,41400000,00000000,41800000,00\n").unwrap();
    /// assert_eq!(
    ///     msg,
    ///     BridgeMessage::Update { pv: 12.0, sv: 0.0, loop_current: 16.0, status: 0 }
    /// );
    /// ```
    pub fn decode(message: &[u8]) -> Result<Self, BridgeError> {
        let body = match message.split_last() {
            Some((&TERMINATOR, body)) => body,
            _ => return Err(BridgeError::MissingTerminator),
        };
        let fields: Vec<&[u8]> = body.split(|&b| b == SEPARATOR).collect();

        match fields[0] {
            b"P" => {
                expect_fields(&fields, 2)?;
                Ok(BridgeMessage::Poll {
                    tx_status: parse_hex_u8(field(&fields, 1, 2)?)?,
                })
            }
            b"U" => {
                expect_fields(&fields, 5)?;
                Ok(BridgeMessage::Update {
                    pv: parse_hex_f32(field(&fields, 1, 8)?)?,
                    sv: parse_hex_f32(field(&fields, 2, 8)?)?,
                    loop_current: parse_hex_f32(field(&fields, 3, 8)?)?,
                    status: parse_hex_u8(field(&fields, 4, 2)?)?,
                })
            }
            b"D" => {
                expect_fields(&fields, 5)?;
                let offset = parse_hex_u8(field(&fields, 1, 2)?)?;
                let count = parse_hex_u8(field(&fields, 2, 2)?)?;
                let more = match parse_hex_u8(field(&fields, 3, 2)?)? {
                    MARKER_MORE => MoreData::More,
                    MARKER_LAST => MoreData::Last,
                    other => return Err(BridgeError::InvalidMarker(other)),
                };
                let payload = parse_hex_bytes(field(&fields, 4, 2 * usize::from(count))?)?;
                if usize::from(offset) + payload.len() > MIRROR_LEN {
                    return Err(BridgeError::ChunkOutOfRange { offset, count });
                }
                Ok(BridgeMessage::DatabaseLoad {
                    offset,
                    more,
                    payload,
                })
            }
            other => Err(BridgeError::UnknownMessageType(
                other.first().copied().unwrap_or(0),
            )),
        }
    }
}

fn expect_fields(fields: &[&[u8]], expected: usize) -> Result<(), BridgeError> {
    if fields.len() != expected {
        return Err(BridgeError::FieldCount {
            expected,
            found: fields.len(),
        });
    }
    Ok(())
}

fn field<'a>(fields: &[&'a [u8]], index: usize, len: usize) -> Result<&'a [u8], BridgeError> {
    let value = fields[index];
    if value.len() != len {
        return Err(BridgeError::FieldLength {
            field: index,
            expected: len,
            found: value.len(),
        });
    }
    Ok(value)
}

/// Encodes an ACK reply.
///
/// # Example
///
/// ```
/// use hart_slave::bridge::{encode_reply, BridgeRequest, RequestCode};
/// use hart_slave::state::Health;
///
/// let request = BridgeRequest::new(RequestCode::SetLoopCurrent, 4.0);
/// let reply = encode_reply(Health::GoodActiveHost, Some(request));
/// assert_eq!(reply, b"A,02,01,40800000\n");
/// ```
pub fn encode_reply(health: Health, request: Option<BridgeRequest>) -> Vec<u8> {
    let mut out = Vec::with_capacity(17);
    out.push(b'A');
    out.push(SEPARATOR);
    push_hex_u8(&mut out, health.code());
    out.push(SEPARATOR);
    match request {
        Some(request) => {
            push_hex_u8(&mut out, request.code.code());
            out.push(SEPARATOR);
            push_hex_f32(&mut out, request.value);
        }
        None => push_hex_u8(&mut out, RequestCode::None.code()),
    }
    out.push(TERMINATOR);
    out
}

/// Encodes a NACK reply.
pub fn encode_nack(error: BridgeError) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(b'N');
    out.push(SEPARATOR);
    push_hex_u8(&mut out, error.nack_code());
    out.push(TERMINATOR);
    out
}

/// Processes one inbound message against the device state and returns the reply.
pub fn handle_message(state: &mut DeviceState, message: &[u8]) -> Vec<u8> {
    let decoded = match BridgeMessage::decode(message) {
        Ok(decoded) => decoded,
        Err(err) => return reject(state, message, err),
    };
    debug!("Bridge message {:?}", decoded);

    match decoded {
        BridgeMessage::Poll { tx_status } => on_poll(state, tx_status),
        BridgeMessage::Update {
            pv,
            sv,
            loop_current,
            status,
        } => on_update(state, pv, sv, loop_current, status),
        BridgeMessage::DatabaseLoad {
            offset,
            more,
            payload,
        } => match on_database_load(state, offset, more, &payload) {
            Ok(reply) => reply,
            Err(err) => reject(state, message, err),
        },
    }
}

fn reject(state: &mut DeviceState, message: &[u8], err: BridgeError) -> Vec<u8> {
    warn!("Bridge NACK: {} ({})", err, format_hex(message));
    let counter = match err {
        BridgeError::InvalidHexDigit(_) => ErrorCounter::BridgeHexError,
        BridgeError::ChecksumMismatch { .. } => ErrorCounter::BridgeChecksumError,
        BridgeError::UnknownMessageType(_) => ErrorCounter::BridgeUnknownMessage,
        _ => ErrorCounter::BridgeFormatError,
    };
    state.count(counter);
    if message.first() == Some(&b'D') {
        state.mirror.invalidate();
        state.refresh_diagnostics();
    }
    encode_nack(err)
}

/// Reply with the next request: queued writes first, then loop re-assertion.
fn reply(state: &mut DeviceState) -> Vec<u8> {
    let request = match state.bridge.queue.pop_next() {
        Some(request) => Some(request),
        None => {
            if state.loop_current.reminder_due() && !state.loop_current.reassert_pending() {
                state.count(ErrorCounter::LoopReminder);
            }
            state.loop_current.take_reassert(&mut state.process)
        }
    };
    if let Some(request) = request {
        trace!("Bridge request {:?}", request);
    }
    encode_reply(state.health(), request)
}

fn on_poll(state: &mut DeviceState, tx_status: u8) -> Vec<u8> {
    state.bridge.last_tx_status = tx_status;
    if tx_status != 0 {
        warn!("Analog module reported transmit status 0x{:02X}", tx_status);
        state.count(ErrorCounter::BridgeTransmitFailure);
    }
    state.bridge.polls_since_update = state.bridge.polls_since_update.saturating_add(1);
    state.host.active_polls = state.host.active_polls.saturating_sub(1);
    state.refresh_diagnostics();
    reply(state)
}

fn on_update(state: &mut DeviceState, pv: f32, sv: f32, loop_current: f32, status: u8) -> Vec<u8> {
    let operational = state.loop_current.is_operational();
    let sv_present = state.mirror.sv_present();

    let process = &mut state.process;
    process.pv = pv;
    process.sv = sv;
    process.loop_current = loop_current;
    if operational {
        process.reporting_current = loop_current;
    }
    process.module_status = status;
    process.timestamp = state.clock;

    process.pv_status = if status & MODULE_PV_FAULT != 0 || pv.is_nan() {
        VARIABLE_BAD
    } else if state.mirror.is_valid() {
        DeviceState::limit_status(
            pv,
            state.mirror.get(UPPER_SENSOR_LIMIT),
            state.mirror.get(LOWER_SENSOR_LIMIT),
        )
    } else {
        VARIABLE_GOOD
    };
    process.sv_status = if !sv_present || status & MODULE_SV_FAULT != 0 {
        VARIABLE_BAD
    } else {
        DeviceState::limit_status(
            sv,
            state.mirror.get(SV_UPPER_SENSOR_LIMIT),
            state.mirror.get(SV_LOWER_SENSOR_LIMIT),
        )
    };

    let limited = |s: u8| s == VARIABLE_BAD_HIGH_LIMITED || s == VARIABLE_BAD_LOW_LIMITED;
    let mut common = 0;
    if status & MODULE_MALFUNCTION != 0 {
        common |= DEVICE_MALFUNCTION;
    }
    if limited(process.pv_status) {
        common |= PV_OUT_OF_LIMITS;
    }
    if sv_present && limited(process.sv_status) {
        common |= NON_PV_OUT_OF_LIMITS;
    }
    if operational
        && (loop_current < state.loop_current.min() || loop_current > state.loop_current.max())
    {
        common |= LOOP_CURRENT_SATURATED;
    }
    if common != state.volatile.common_status {
        debug!(
            "Common status 0x{:02X} -> 0x{:02X}",
            state.volatile.common_status, common
        );
        state.volatile.common_status = common;
        state.raise_more_status();
    }

    state.bridge.update_received = true;
    state.bridge.polls_since_update = 0;
    state.loop_current.on_update_cycle();
    state.refresh_diagnostics();
    reply(state)
}

fn on_database_load(
    state: &mut DeviceState,
    offset: u8,
    more: MoreData,
    payload: &[u8],
) -> Result<Vec<u8>, BridgeError> {
    if !state.mirror.is_loading() {
        debug!("Configuration load started");
        state.mirror.begin_load();
    }
    state.mirror.write_chunk(offset, payload)?;
    if more == MoreData::Last {
        state.mirror.finish_load()?;
        info!(
            "Configuration mirror accepted, PV unit {}",
            state.mirror.get(mirror::PV_UNIT)
        );
    }
    state.refresh_diagnostics();
    Ok(reply(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::loop_current::LoopCurrentState;
    use crate::mirror::{SensorConfigMirror, PV_UNIT, SV_UNIT};
    use crate::status::{Master, EXT_VARIABLE_ALERT, MORE_STATUS_AVAILABLE, UNIT_NOT_USED};

    fn state() -> DeviceState {
        DeviceState::new(DeviceConfig::new(0x010203)).unwrap()
    }

    fn update(pv: f32, sv: f32, current: f32, status: u8) -> Vec<u8> {
        format!(
            "U,{},{},{},{:02X}\n",
            hex::encode_upper(pv.to_be_bytes()),
            hex::encode_upper(sv.to_be_bytes()),
            hex::encode_upper(current.to_be_bytes()),
            status
        )
        .into_bytes()
    }

    fn chunk(offset: usize, bytes: &[u8], last: bool) -> Vec<u8> {
        format!(
            "D,{:02X},{:02X},{},{}\n",
            offset,
            bytes.len(),
            if last { "00" } else { "01" },
            hex::encode_upper(bytes)
        )
        .into_bytes()
    }

    fn sensor_image() -> [u8; MIRROR_LEN] {
        let mut image = [0u8; MIRROR_LEN];
        image[PV_UNIT.offset()] = 19;
        image[SV_UNIT.offset()] = 32;
        image[18..22].copy_from_slice(&100.0f32.to_be_bytes());
        image[22..26].copy_from_slice(&0.0f32.to_be_bytes());
        image[34..38].copy_from_slice(&150.0f32.to_be_bytes());
        image[38..42].copy_from_slice(&(-40.0f32).to_be_bytes());
        image[54] = 0xA5;
        SensorConfigMirror::seal(&mut image);
        image
    }

    fn load(state: &mut DeviceState, image: &[u8; MIRROR_LEN]) -> Vec<u8> {
        handle_message(state, &chunk(0, &image[..21], false));
        handle_message(state, &chunk(21, &image[21..42], false));
        handle_message(state, &chunk(42, &image[42..], true))
    }

    #[test]
    fn test_decode_poll() {
        assert_eq!(
            BridgeMessage::decode(b"P,3C\n").unwrap(),
            BridgeMessage::Poll { tx_status: 0x3C }
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            BridgeMessage::decode(b"P,00").unwrap_err(),
            BridgeError::MissingTerminator
        );
        assert_eq!(BridgeMessage::decode(b"").unwrap_err(), BridgeError::MissingTerminator);
        assert_eq!(
            BridgeMessage::decode(b"Q,00\n").unwrap_err(),
            BridgeError::UnknownMessageType(b'Q')
        );
        assert_eq!(
            BridgeMessage::decode(b"P,00,00\n").unwrap_err(),
            BridgeError::FieldCount { expected: 2, found: 3 }
        );
        assert_eq!(
            BridgeMessage::decode(b"P,0\n").unwrap_err(),
            BridgeError::FieldLength { field: 1, expected: 2, found: 1 }
        );
        assert_eq!(
            BridgeMessage::decode(b"P,0a\n").unwrap_err(),
            BridgeError::InvalidHexDigit(b'a')
        );
        assert_eq!(
            BridgeMessage::decode(b"D,00,01,02,FF\n").unwrap_err(),
            BridgeError::InvalidMarker(2)
        );
        assert_eq!(
            BridgeMessage::decode(b"D,3C,03,00,010203\n").unwrap_err(),
            BridgeError::ChunkOutOfRange { offset: 60, count: 3 }
        );
    }

    #[test]
    fn test_decode_update_bit_exact() {
        let nan = f32::from_bits(0x7FA0_0000);
        let msg = BridgeMessage::decode(&update(-0.0, nan, 20.0, 0x81)).unwrap();
        match msg {
            BridgeMessage::Update {
                pv,
                sv,
                loop_current,
                status,
            } => {
                assert_eq!(pv.to_bits(), (-0.0f32).to_bits());
                assert_eq!(sv.to_bits(), 0x7FA0_0000);
                assert_eq!(loop_current, 20.0);
                assert_eq!(status, 0x81);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encode_nack() {
        assert_eq!(encode_nack(BridgeError::MissingTerminator), b"N,01\n");
        assert_eq!(
            encode_nack(BridgeError::ChecksumMismatch { expected: 1, computed: 2 }),
            b"N,08\n"
        );
    }

    #[test]
    fn test_queue_range_sequencing() {
        let mut queue = RequestQueue::default();
        assert!(queue.push(QueuedRequest::Range { lower: 0.0, upper: 250.0 }));
        assert!(queue.push(QueuedRequest::Single(BridgeRequest::new(
            RequestCode::ResetModule,
            0.0
        ))));
        assert!(!queue.has_room());
        assert!(!queue.push(QueuedRequest::Single(BridgeRequest::new(
            RequestCode::ResetModule,
            0.0
        ))));

        assert_eq!(
            queue.pop_next(),
            Some(BridgeRequest::new(RequestCode::WriteLowerRange, 0.0))
        );
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.pop_next(),
            Some(BridgeRequest::new(RequestCode::WriteUpperRange, 250.0))
        );
        assert_eq!(
            queue.pop_next(),
            Some(BridgeRequest::new(RequestCode::ResetModule, 0.0))
        );
        assert_eq!(queue.pop_next(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_database_load_in_three_chunks() {
        let mut state = state();
        let image = sensor_image();
        let reply = load(&mut state, &image);
        assert_eq!(reply, b"A,01,00\n");
        assert!(state.mirror.is_valid());
        assert_eq!(state.mirror.image(), &image);
        assert_eq!(state.mirror.get(PV_UNIT), 19);
    }

    #[test]
    fn test_database_load_bit_flip_invalidates() {
        let mut state = state();
        let mut image = sensor_image();
        image[30] ^= 0x10;
        let reply = load(&mut state, &image);
        assert_eq!(reply, b"N,08\n");
        assert!(!state.mirror.is_valid());
        assert!(!state.mirror.is_loading());
        assert_eq!(state.counter(ErrorCounter::BridgeChecksumError), 1);
    }

    #[test]
    fn test_database_decode_failure_invalidates() {
        let mut state = state();
        load(&mut state, &sensor_image());
        assert!(state.mirror.is_valid());

        let reply = handle_message(&mut state, b"D,00,02,01,00G0\n");
        assert_eq!(reply, b"N,05\n");
        assert!(!state.mirror.is_valid());
        assert_eq!(state.counter(ErrorCounter::BridgeHexError), 1);
    }

    #[test]
    fn test_loading_gates_process_data() {
        let mut state = state();
        handle_message(&mut state, &update(1.0, 2.0, 8.0, 0));
        assert!(!state.process_data_unavailable());
        handle_message(&mut state, &chunk(0, &[0u8; 8], false));
        assert!(state.mirror.is_loading());
        assert!(state.process_data_unavailable());
    }

    #[test]
    fn test_update_overwrites_process_variables() {
        let mut state = state();
        state.clock = 4321;
        let reply = handle_message(&mut state, &update(12.5, 3.0, 12.0, 0));
        assert_eq!(reply, b"A,00,00\n");
        assert_eq!(state.process.pv, 12.5);
        assert_eq!(state.process.sv, 3.0);
        assert_eq!(state.process.loop_current, 12.0);
        assert_eq!(state.process.reporting_current, 12.0);
        assert_eq!(state.process.timestamp, 4321);
        assert!(state.bridge.update_received);
        assert!(!state.update_delayed());
    }

    #[test]
    fn test_bad_update_leaves_values() {
        let mut state = state();
        handle_message(&mut state, &update(1.0, 2.0, 8.0, 0));
        let before = state.process;

        let reply = handle_message(&mut state, b"U,41480000,4040000Z,41400000,00\n");
        assert_eq!(reply, b"N,05\n");
        assert_eq!(state.process, before);

        let reply = handle_message(&mut state, b"U,41480000,40400000,00\n");
        assert_eq!(reply, b"N,03\n");
        assert_eq!(state.process, before);
    }

    #[test]
    fn test_update_limits_and_more_status() {
        let mut state = state();
        load(&mut state, &sensor_image());
        handle_message(&mut state, &update(50.0, 20.0, 12.0, 0));
        state.volatile.more_status = [false; 2];

        handle_message(&mut state, &update(55.0, 21.0, 12.5, 0));
        assert_eq!(state.process.pv_status, VARIABLE_GOOD);
        assert_eq!(state.volatile.more_status, [false; 2]);

        handle_message(&mut state, &update(120.0, 21.0, 20.0, 0));
        assert_eq!(state.process.pv_status, VARIABLE_BAD_HIGH_LIMITED);
        let status = state.status_byte(Master::Primary);
        assert_ne!(status & PV_OUT_OF_LIMITS, 0);
        assert_ne!(status & MORE_STATUS_AVAILABLE, 0);

        state.volatile.more_status = [false; 2];
        handle_message(&mut state, &update(130.0, 21.0, 20.0, 0));
        assert_eq!(state.volatile.more_status, [false; 2]);
    }

    #[test]
    fn test_update_faults() {
        let mut state = state();
        load(&mut state, &sensor_image());
        handle_message(&mut state, &update(-5.0, 0.0, 3.5, MODULE_SV_FAULT | MODULE_MALFUNCTION));
        assert_eq!(state.process.pv_status, VARIABLE_BAD_LOW_LIMITED);
        assert_eq!(state.process.sv_status, VARIABLE_BAD);
        let status = state.status_byte(Master::Secondary);
        assert_ne!(status & DEVICE_MALFUNCTION, 0);
        assert_ne!(status & LOOP_CURRENT_SATURATED, 0);
    }

    #[test]
    fn test_nan_measurement_is_bad() {
        let mut state = state();
        load(&mut state, &sensor_image());
        handle_message(&mut state, b"U,7FC00000,41A00000,41400000,00\n");
        assert_eq!(state.process.pv_status, VARIABLE_BAD);
        assert_eq!(state.process.sv_status, VARIABLE_GOOD);
        assert_ne!(state.volatile.extended_status & EXT_VARIABLE_ALERT, 0);

        handle_message(&mut state, b"U,42480000,7FC00000,41400000,00\n");
        assert_eq!(state.process.pv_status, VARIABLE_GOOD);
        assert_eq!(state.process.sv_status, VARIABLE_BAD);
    }

    #[test]
    fn test_nan_pv_without_mirror_is_bad() {
        let mut state = state();
        handle_message(&mut state, b"U,7FC00000,00000000,41400000,00\n");
        assert_eq!(state.process.pv_status, VARIABLE_BAD);
    }

    #[test]
    fn test_sv_absent_is_bad() {
        let mut state = state();
        let mut image = sensor_image();
        image[SV_UNIT.offset()] = UNIT_NOT_USED;
        SensorConfigMirror::seal(&mut image);
        load(&mut state, &image);
        handle_message(&mut state, &update(5.0, 5.0, 5.0, 0));
        assert_eq!(state.process.sv_status, VARIABLE_BAD);
        assert_eq!(state.process.pv_status, VARIABLE_GOOD);
    }

    #[test]
    fn test_fixed_current_keeps_reporting_value() {
        let mut state = state();
        state
            .loop_current
            .set_fixed(8.0, &mut state.process)
            .unwrap();
        let reply = handle_message(&mut state, &update(1.0, 0.0, 7.9, 0));
        assert_eq!(reply, b"A,00,01,41000000\n");
        assert_eq!(state.process.loop_current, 7.9);
        assert_eq!(state.process.reporting_current, 8.0);
    }

    #[test]
    fn test_queue_before_reassert() {
        let mut state = state();
        state
            .loop_current
            .set_fixed(4.0, &mut state.process)
            .unwrap();
        state
            .bridge
            .queue
            .push(QueuedRequest::Range { lower: 1.0, upper: 2.0 });

        assert_eq!(handle_message(&mut state, b"P,00\n"), b"A,00,05,3F800000\n");
        assert_eq!(handle_message(&mut state, b"P,00\n"), b"A,00,06,40000000\n");
        assert_eq!(handle_message(&mut state, b"P,00\n"), b"A,00,01,40800000\n");
        assert_eq!(handle_message(&mut state, b"P,00\n"), b"A,00,00\n");
    }

    #[test]
    fn test_reminder_repeats_fixed_current() {
        let mut state = state();
        state
            .loop_current
            .set_fixed(10.0, &mut state.process)
            .unwrap();
        handle_message(&mut state, b"P,00\n");

        let limit = state.config().reminder_cycles;
        for _ in 1..limit {
            assert_eq!(
                handle_message(&mut state, &update(1.0, 0.0, 10.0, 0)),
                b"A,00,00\n"
            );
        }
        assert_eq!(
            handle_message(&mut state, &update(1.0, 0.0, 10.0, 0)),
            b"A,00,01,41200000\n"
        );
        assert_eq!(state.counter(ErrorCounter::LoopReminder), 1);
        assert_eq!(state.loop_current.state(), LoopCurrentState::FixedAtValue(10.0));
    }

    #[test]
    fn test_poll_counts() {
        let mut state = state();
        handle_message(&mut state, &update(1.0, 0.0, 4.0, 0));
        handle_message(&mut state, b"P,01\n");
        assert_eq!(state.bridge.last_tx_status, 1);
        assert_eq!(state.bridge.polls_since_update, 1);
        assert_eq!(state.counter(ErrorCounter::BridgeTransmitFailure), 1);

        for _ in 0..state.config().update_timeout_polls {
            handle_message(&mut state, b"P,00\n");
        }
        assert!(state.update_delayed());
        assert_eq!(state.counter(ErrorCounter::UpdateDelayed), 1);
    }
}
