//! Command handlers.
//!
//! One function per command. A handler appends its payload to the response
//! buffer and returns `Ok(())`, or returns the response code of the error
//! frame to send instead. Preconditions are checked in a fixed order:
//!
//! 1. data byte count (`TooFewDataBytes`),
//! 2. device busy (`DeviceBusy`),
//! 3. write protection, for configuration writes (`WriteProtected`),
//! 4. command specific validation.
//!
//! The order is visible on the wire and must not change.
//!
//! Handlers never write the header; [`ResponseBuffer::finish`] does.

use crate::bridge::{BridgeRequest, QueuedRequest, RequestCode};
use crate::command::{
    CommandRequest, CMD_DEVICE_RESET, CMD_EEPROM_CONTROL, CMD_FIXED_CURRENT,
    CMD_READ_ADDITIONAL_STATUS, CMD_READ_CLASSIFICATIONS, CMD_READ_DEVICE_INFO,
    CMD_READ_DEVICE_VARIABLES, CMD_READ_DEVICE_VARIABLE_INFO, CMD_READ_DYNAMIC_VARIABLES,
    CMD_READ_ERROR_COUNTERS, CMD_READ_FINAL_ASSEMBLY, CMD_READ_ID_BY_LONG_TAG,
    CMD_READ_ID_BY_TAG, CMD_READ_LONG_TAG, CMD_READ_LOOP_CONFIGURATION, CMD_READ_LOOP_CURRENT,
    CMD_READ_MESSAGE, CMD_READ_PV, CMD_READ_TAG_DESCRIPTOR_DATE, CMD_READ_TRANSDUCER_INFO,
    CMD_READ_UNIQUE_ID, CMD_RESET_CONFIG_CHANGED, CMD_TRIM_GAIN, CMD_TRIM_ZERO,
    CMD_WRITE_DEVICE_ID, CMD_WRITE_FINAL_ASSEMBLY, CMD_WRITE_LONG_TAG, CMD_WRITE_MESSAGE,
    CMD_WRITE_POLLING_ADDRESS, CMD_WRITE_RANGE_VALUES, CMD_WRITE_TAG_DESCRIPTOR_DATE,
};
use crate::config::{DESCRIPTOR_LEN, LONG_TAG_LEN, MAX_POLLING_ADDRESS, MESSAGE_LEN, TAG_LEN};
use crate::loop_current::TrimKind;
use crate::mirror::{
    ACQUISITION_PERIOD, ALARM_SELECTION, DAMPING, LOWER_RANGE_VALUE, LOWER_SENSOR_LIMIT,
    MINIMUM_SPAN, PV_CLASSIFICATION, PV_UNIT, SV_CLASSIFICATION, SV_LOWER_SENSOR_LIMIT, SV_UNIT,
    SV_UPPER_SENSOR_LIMIT, TRANSDUCER_SERIAL, TRANSFER_FUNCTION, UPPER_RANGE_VALUE,
    UPPER_SENSOR_LIMIT, WRITE_PROTECT,
};
use crate::response::{percent_of_range, ResponseBuffer, ResponseCode};
use crate::state::{DeviceState, LoopCurrentMode, PROTOCOL_REVISION};
use crate::status::{
    UNIT_MILLIAMPERE, UNIT_NOT_USED, UNIT_PERCENT, VARIABLE_BAD_CONSTANT, VARIABLE_FIXED,
};

/// Device variable code of the primary variable.
pub const VAR_PRIMARY: u8 = 246;
/// Device variable code of the secondary variable.
pub const VAR_SECONDARY: u8 = 247;
/// Device variable code of the PV percent of range.
pub const VAR_PERCENT_RANGE: u8 = 244;
/// Device variable code of the loop current.
pub const VAR_LOOP_CURRENT: u8 = 245;
/// Device variable number of the measured PV.
pub const VAR_PV: u8 = 0;
/// Device variable number of the measured SV.
pub const VAR_SV: u8 = 1;
/// Reserved code that invalidates a whole command 9 request.
pub const VAR_INVALID: u8 = 255;
/// Most slots command 9 reports.
pub const MAX_VARIABLE_SLOTS: usize = 8;
/// Value bytes reported for a variable the device does not have.
pub const UNSUPPORTED_VALUE: [u8; 4] = [0x7F, 0xA0, 0x00, 0x00];

const EXPANSION_CODE: u8 = 254;
const DEVICE_FAMILY_NOT_USED: u8 = 250;
const EEPROM_BURN: u8 = 0;
const EEPROM_RESTORE: u8 = 1;

/// Why a handler did not produce a success frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerError {
    /// Answer with an error frame carrying this code.
    Code(ResponseCode),
    /// Send nothing at all.
    Silent,
}

impl From<ResponseCode> for HandlerError {
    fn from(code: ResponseCode) -> Self {
        HandlerError::Code(code)
    }
}

/// Result of a handler.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Signature shared by all handlers.
pub type Handler = fn(&mut DeviceState, &CommandRequest<'_>, &mut ResponseBuffer) -> HandlerResult;

/// Handlers sorted by command number.
const HANDLERS: &[(u8, Handler)] = &[
    (CMD_READ_UNIQUE_ID, read_unique_id),
    (CMD_READ_PV, read_pv),
    (CMD_READ_LOOP_CURRENT, read_loop_current),
    (CMD_READ_DYNAMIC_VARIABLES, read_dynamic_variables),
    (CMD_WRITE_POLLING_ADDRESS, write_polling_address),
    (CMD_READ_LOOP_CONFIGURATION, read_loop_configuration),
    (CMD_READ_CLASSIFICATIONS, read_classifications),
    (CMD_READ_DEVICE_VARIABLES, read_device_variables),
    (CMD_READ_ID_BY_TAG, read_id_by_tag),
    (CMD_READ_MESSAGE, read_message),
    (CMD_READ_TAG_DESCRIPTOR_DATE, read_tag_descriptor_date),
    (CMD_READ_TRANSDUCER_INFO, read_transducer_info),
    (CMD_READ_DEVICE_INFO, read_device_info),
    (CMD_READ_FINAL_ASSEMBLY, read_final_assembly),
    (CMD_WRITE_MESSAGE, write_message),
    (CMD_WRITE_TAG_DESCRIPTOR_DATE, write_tag_descriptor_date),
    (CMD_WRITE_FINAL_ASSEMBLY, write_final_assembly),
    (CMD_READ_LONG_TAG, read_long_tag),
    (CMD_READ_ID_BY_LONG_TAG, read_id_by_long_tag),
    (CMD_WRITE_LONG_TAG, write_long_tag),
    (CMD_WRITE_RANGE_VALUES, write_range_values),
    (CMD_RESET_CONFIG_CHANGED, reset_config_changed),
    (CMD_EEPROM_CONTROL, eeprom_control),
    (CMD_FIXED_CURRENT, fixed_current),
    (CMD_DEVICE_RESET, device_reset),
    (CMD_TRIM_ZERO, trim_zero),
    (CMD_TRIM_GAIN, trim_gain),
    (CMD_READ_ADDITIONAL_STATUS, read_additional_status),
    (CMD_READ_DEVICE_VARIABLE_INFO, read_device_variable_info),
    (CMD_READ_ERROR_COUNTERS, read_error_counters),
    (CMD_WRITE_DEVICE_ID, write_device_id),
];

/// Returns the handler for `command`, if the device implements it.
pub fn lookup(command: u8) -> Option<Handler> {
    HANDLERS
        .binary_search_by_key(&command, |&(id, _)| id)
        .ok()
        .map(|i| HANDLERS[i].1)
}

/// Command numbers the device implements, ascending.
pub fn implemented_commands() -> impl Iterator<Item = u8> {
    HANDLERS.iter().map(|&(id, _)| id)
}

// Precondition checks, in the order handlers apply them.

fn require_bytes(request: &CommandRequest<'_>, count: usize) -> Result<(), ResponseCode> {
    if request.byte_count() < count {
        return Err(ResponseCode::TooFewDataBytes);
    }
    Ok(())
}

fn check_busy(state: &DeviceState) -> Result<(), ResponseCode> {
    if state.persistence.is_busy() {
        return Err(ResponseCode::DeviceBusy);
    }
    Ok(())
}

fn check_write_protect(state: &DeviceState) -> Result<(), ResponseCode> {
    if state.mirror.write_protected() {
        return Err(ResponseCode::WriteProtected);
    }
    Ok(())
}

fn check_update(state: &DeviceState) -> Result<(), ResponseCode> {
    if state.process_data_unavailable() {
        return Err(ResponseCode::UpdateFailure);
    }
    Ok(())
}

fn check_loop_enabled(state: &DeviceState) -> Result<(), ResponseCode> {
    if state.persisted.loop_current_mode == LoopCurrentMode::Disabled {
        return Err(ResponseCode::LoopSignalingDisabled);
    }
    Ok(())
}

fn f32_at(data: &[u8], at: usize) -> f32 {
    f32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn copy_into<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[..N]);
    out
}

fn pv_unit(state: &DeviceState) -> u8 {
    if state.mirror.is_valid() {
        state.mirror.get(PV_UNIT)
    } else {
        UNIT_NOT_USED
    }
}

fn pv_classification(state: &DeviceState) -> u8 {
    if state.mirror.is_valid() {
        state.mirror.get(PV_CLASSIFICATION)
    } else {
        0
    }
}

fn push_identity(state: &DeviceState, buf: &mut ResponseBuffer) {
    let v = &state.volatile;
    let p = &state.persisted;
    buf.push_u8(EXPANSION_CODE);
    buf.push_u16(v.expanded_device_type);
    buf.push_u8(v.min_preambles);
    buf.push_u8(PROTOCOL_REVISION);
    buf.push_u8(v.device_revision);
    buf.push_u8(v.software_revision);
    buf.push_u8((v.hardware_revision << 3) | (v.physical_signaling & 0x07));
    buf.push_u8(v.flags);
    buf.push_bytes(&p.device_id);
    buf.push_u8(v.min_preambles);
    buf.push_u8(v.max_device_variables);
    buf.push_u16(p.config_change_counter);
    buf.push_u8(v.extended_status);
    buf.push_u16(p.manufacturer_id);
    buf.push_u16(p.distributor_id);
    buf.push_u8(v.device_profile);
}

fn read_unique_id(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    push_identity(state, buf);
    Ok(())
}

fn read_pv(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    check_update(state)?;
    buf.push_u8(pv_unit(state));
    buf.push_f32(state.process.pv);
    Ok(())
}

fn read_loop_current(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    check_update(state)?;
    let current = state.process.reporting_current;
    buf.push_f32(current);
    buf.push_f32(percent_of_range(
        current,
        state.loop_current.min(),
        state.loop_current.max(),
    ));
    Ok(())
}

fn read_dynamic_variables(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    check_update(state)?;
    let current = state.process.reporting_current;
    buf.push_f32(current);
    buf.push_u8(pv_unit(state));
    buf.push_f32(state.process.pv);
    if state.mirror.sv_present() {
        buf.push_u8(state.mirror.get(SV_UNIT));
        buf.push_f32(state.process.sv);
    }
    Ok(())
}

fn write_polling_address(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, 1)?;
    check_busy(state)?;
    check_write_protect(state)?;
    let address = request.data[0];
    if address > MAX_POLLING_ADDRESS {
        return Err(ResponseCode::InvalidSelection.into());
    }
    let mode = match request.data.get(1) {
        Some(&code) => {
            LoopCurrentMode::from_code(code).ok_or(ResponseCode::InvalidModeSelection)?
        }
        // one byte requests keep the older convention: address 0 means point to point
        None if address == 0 => LoopCurrentMode::Enabled,
        None => LoopCurrentMode::Disabled,
    };
    state.persisted.polling_address = address;
    state.persisted.loop_current_mode = mode;
    state.commit_config_change();
    buf.push_u8(address);
    buf.push_u8(mode.code());
    Ok(())
}

fn read_loop_configuration(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    buf.push_u8(state.persisted.polling_address);
    buf.push_u8(state.persisted.loop_current_mode.code());
    Ok(())
}

fn read_classifications(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    let sv = if state.mirror.sv_present() {
        state.mirror.get(SV_CLASSIFICATION)
    } else {
        0
    };
    buf.push_bytes(&[pv_classification(state), sv, 0, 0]);
    Ok(())
}

fn push_slot(buf: &mut ResponseBuffer, code: u8, class: u8, unit: u8, value: f32, status: u8) {
    buf.push_u8(code);
    buf.push_u8(class);
    buf.push_u8(unit);
    buf.push_f32(value);
    buf.push_u8(status);
}

fn push_unsupported_slot(buf: &mut ResponseBuffer, code: u8) {
    buf.push_bytes(&[code, 0, UNIT_NOT_USED]);
    buf.push_bytes(&UNSUPPORTED_VALUE);
    buf.push_u8(VARIABLE_BAD_CONSTANT);
}

fn read_device_variables(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, 1)?;
    check_busy(state)?;
    let codes = &request.data[..request.byte_count().min(MAX_VARIABLE_SLOTS)];
    if codes.contains(&VAR_INVALID) {
        return Err(ResponseCode::InvalidSelection.into());
    }
    check_update(state)?;

    let current = state.process.reporting_current;
    let pv = state.process;
    buf.push_u8(state.volatile.extended_status);
    for &code in codes {
        match code {
            VAR_PV | VAR_PRIMARY => push_slot(
                buf,
                code,
                pv_classification(state),
                pv_unit(state),
                pv.pv,
                pv.pv_status,
            ),
            VAR_SV | VAR_SECONDARY if state.mirror.sv_present() => push_slot(
                buf,
                code,
                state.mirror.get(SV_CLASSIFICATION),
                state.mirror.get(SV_UNIT),
                pv.sv,
                pv.sv_status,
            ),
            VAR_PERCENT_RANGE => push_slot(
                buf,
                code,
                0,
                UNIT_PERCENT,
                percent_of_range(
                    pv.pv,
                    state.mirror.get(LOWER_RANGE_VALUE),
                    state.mirror.get(UPPER_RANGE_VALUE),
                ),
                pv.pv_status,
            ),
            VAR_LOOP_CURRENT => {
                let status = if state.loop_current.is_operational() {
                    pv.pv_status
                } else {
                    VARIABLE_FIXED
                };
                push_slot(buf, code, 0, UNIT_MILLIAMPERE, current, status)
            }
            _ => push_unsupported_slot(buf, code),
        }
    }
    buf.push_u32(pv.timestamp);
    Ok(())
}

fn read_id_by_tag(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    if request.data.get(..TAG_LEN) != Some(&state.persisted.tag[..]) {
        return Err(HandlerError::Silent);
    }
    read_unique_id(state, request, buf)
}

fn read_id_by_long_tag(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    if request.data.get(..LONG_TAG_LEN) != Some(&state.persisted.long_tag[..]) {
        return Err(HandlerError::Silent);
    }
    read_unique_id(state, request, buf)
}

fn read_message(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    buf.push_bytes(&state.persisted.message);
    Ok(())
}

fn read_tag_descriptor_date(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    buf.push_bytes(&state.persisted.tag);
    buf.push_bytes(&state.persisted.descriptor);
    buf.push_bytes(&state.persisted.date);
    Ok(())
}

fn read_transducer_info(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    let db = &state.mirror;
    buf.push_bytes(&db.get(TRANSDUCER_SERIAL));
    buf.push_u8(pv_unit(state));
    buf.push_f32(db.get(UPPER_SENSOR_LIMIT));
    buf.push_f32(db.get(LOWER_SENSOR_LIMIT));
    buf.push_f32(db.get(MINIMUM_SPAN));
    Ok(())
}

fn read_device_info(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    let db = &state.mirror;
    buf.push_u8(db.get(ALARM_SELECTION));
    buf.push_u8(db.get(TRANSFER_FUNCTION));
    buf.push_u8(pv_unit(state));
    buf.push_f32(db.get(UPPER_RANGE_VALUE));
    buf.push_f32(db.get(LOWER_RANGE_VALUE));
    buf.push_f32(db.get(DAMPING));
    buf.push_u8(db.get(WRITE_PROTECT));
    buf.push_u8(UNIT_NOT_USED);
    buf.push_u8(0);
    Ok(())
}

fn read_final_assembly(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    buf.push_bytes(&state.persisted.final_assembly_number);
    Ok(())
}

fn write_message(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, MESSAGE_LEN)?;
    check_busy(state)?;
    check_write_protect(state)?;
    state.persisted.message = copy_into(request.data);
    state.commit_config_change();
    buf.push_bytes(&state.persisted.message);
    Ok(())
}

fn write_tag_descriptor_date(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, TAG_LEN + DESCRIPTOR_LEN + 3)?;
    check_busy(state)?;
    check_write_protect(state)?;
    let data = request.data;
    state.persisted.tag = copy_into(data);
    state.persisted.descriptor = copy_into(&data[TAG_LEN..]);
    state.persisted.date = copy_into(&data[TAG_LEN + DESCRIPTOR_LEN..]);
    state.commit_config_change();
    read_tag_descriptor_date(state, request, buf)
}

fn write_final_assembly(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, 3)?;
    check_busy(state)?;
    check_write_protect(state)?;
    state.persisted.final_assembly_number = copy_into(request.data);
    state.commit_config_change();
    buf.push_bytes(&state.persisted.final_assembly_number);
    Ok(())
}

fn read_long_tag(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    buf.push_bytes(&state.persisted.long_tag);
    Ok(())
}

fn write_long_tag(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, LONG_TAG_LEN)?;
    check_busy(state)?;
    check_write_protect(state)?;
    state.persisted.long_tag = copy_into(request.data);
    state.commit_config_change();
    buf.push_bytes(&state.persisted.long_tag);
    Ok(())
}

fn write_range_values(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, 9)?;
    if state.persistence.is_busy() || !state.bridge.queue.has_room() || !state.mirror.is_valid() {
        return Err(ResponseCode::DeviceBusy.into());
    }
    check_write_protect(state)?;

    let unit = request.data[0];
    let upper = f32_at(request.data, 1);
    let lower = f32_at(request.data, 5);
    let db = &state.mirror;
    if unit != db.get(PV_UNIT) {
        return Err(ResponseCode::InvalidRangeUnits.into());
    }
    let usl = db.get(UPPER_SENSOR_LIMIT);
    let lsl = db.get(LOWER_SENSOR_LIMIT);
    // negated comparisons so NaN counts as out of limits
    let lower_high = !(lower <= usl);
    let lower_low = lower < lsl;
    let upper_high = !(upper <= usl);
    let upper_low = upper < lsl;
    let code = match (lower_high || lower_low, upper_high || upper_low) {
        (true, true) => Some(ResponseCode::RangeValuesOutOfLimits),
        _ if lower_high => Some(ResponseCode::LowerRangeTooHigh),
        _ if lower_low => Some(ResponseCode::LowerRangeTooLow),
        _ if upper_high => Some(ResponseCode::UpperRangeTooHigh),
        _ if upper_low => Some(ResponseCode::UpperRangeTooLow),
        _ => None,
    };
    if let Some(code) = code {
        return Err(code.into());
    }
    if (upper - lower).abs() < db.get(MINIMUM_SPAN) {
        return Err(ResponseCode::InvalidSpan.into());
    }

    state.mirror.set(UPPER_RANGE_VALUE, upper);
    state.mirror.set(LOWER_RANGE_VALUE, lower);
    state
        .bridge
        .queue
        .push(QueuedRequest::Range { lower, upper });
    state.commit_config_change();
    buf.push_u8(unit);
    buf.push_f32(upper);
    buf.push_f32(lower);
    Ok(())
}

fn reset_config_changed(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    // 0 bytes: unconditional reset; 1 byte: an incomplete counter
    if request.byte_count() == 1 {
        return Err(ResponseCode::TooFewDataBytes.into());
    }
    if request.byte_count() >= 2 {
        check_busy(state)?;
    }
    let counter = state.persisted.config_change_counter;
    if request.byte_count() >= 2
        && u16::from_be_bytes([request.data[0], request.data[1]]) != counter
    {
        return Err(ResponseCode::ConfigCounterMismatch.into());
    }
    state.clear_config_changed(request.master);
    buf.push_u16(counter);
    Ok(())
}

fn eeprom_control(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, 1)?;
    check_busy(state)?;
    let control = request.data[0];
    match control {
        EEPROM_BURN => state.persistence.request_flush(),
        EEPROM_RESTORE => state.persistence.request_refresh(),
        _ => return Err(ResponseCode::InvalidSelection.into()),
    }
    buf.push_u8(control);
    Ok(())
}

fn fixed_current(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, 4)?;
    check_busy(state)?;
    check_loop_enabled(state)?;
    let value = state
        .loop_current
        .set_fixed(f32_at(request.data, 0), &mut state.process)?;
    buf.push_f32(value);
    Ok(())
}

fn device_reset(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    _: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    let reset = QueuedRequest::Single(BridgeRequest::new(RequestCode::ResetModule, 0.0));
    if !state.bridge.queue.push(reset) {
        return Err(ResponseCode::DeviceBusy.into());
    }
    state.reset_requested = true;
    Ok(())
}

fn trim(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
    kind: TrimKind,
) -> HandlerResult {
    require_bytes(request, 4)?;
    check_busy(state)?;
    check_write_protect(state)?;
    check_loop_enabled(state)?;
    let value = state
        .loop_current
        .trim(kind, f32_at(request.data, 0), &mut state.process)?;
    state.commit_config_change();
    buf.push_f32(value);
    Ok(())
}

fn trim_zero(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    trim(state, request, buf, TrimKind::Zero)
}

fn trim_gain(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    trim(state, request, buf, TrimKind::Gain)
}

fn read_additional_status(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    let supplied = request.data.get(..9);
    if request.byte_count() > 0 && supplied.is_none() {
        return Err(ResponseCode::TooFewDataBytes.into());
    }
    check_busy(state)?;
    let current = state.diagnostic_bytes();
    if supplied == Some(&current[..]) {
        state.volatile.more_status[request.master.index()] = false;
    }
    buf.push_bytes(&current);
    Ok(())
}

fn read_device_variable_info(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, 1)?;
    check_busy(state)?;
    let code = request.data[0];
    if code == VAR_INVALID {
        return Err(ResponseCode::InvalidSelection.into());
    }

    let db = &state.mirror;
    let acquisition = db.get(ACQUISITION_PERIOD);
    buf.push_u8(code);
    match code {
        VAR_PV | VAR_PRIMARY => {
            buf.push_bytes(&db.get(TRANSDUCER_SERIAL));
            buf.push_u8(pv_unit(state));
            buf.push_f32(db.get(UPPER_SENSOR_LIMIT));
            buf.push_f32(db.get(LOWER_SENSOR_LIMIT));
            buf.push_f32(db.get(DAMPING));
            buf.push_f32(db.get(MINIMUM_SPAN));
            buf.push_u8(pv_classification(state));
        }
        VAR_SV | VAR_SECONDARY if db.sv_present() => {
            buf.push_bytes(&[0; 3]);
            buf.push_u8(db.get(SV_UNIT));
            buf.push_f32(db.get(SV_UPPER_SENSOR_LIMIT));
            buf.push_f32(db.get(SV_LOWER_SENSOR_LIMIT));
            buf.push_f32(0.0);
            buf.push_f32(0.0);
            buf.push_u8(db.get(SV_CLASSIFICATION));
        }
        VAR_PERCENT_RANGE => {
            buf.push_bytes(&[0; 3]);
            buf.push_u8(UNIT_PERCENT);
            buf.push_f32(100.0);
            buf.push_f32(0.0);
            buf.push_f32(db.get(DAMPING));
            buf.push_f32(0.0);
            buf.push_u8(0);
        }
        VAR_LOOP_CURRENT => {
            buf.push_bytes(&[0; 3]);
            buf.push_u8(UNIT_MILLIAMPERE);
            buf.push_f32(state.loop_current.max());
            buf.push_f32(state.loop_current.min());
            buf.push_f32(0.0);
            buf.push_f32(0.0);
            buf.push_u8(0);
        }
        _ => {
            buf.push_bytes(&[0; 3]);
            buf.push_u8(UNIT_NOT_USED);
            for _ in 0..4 {
                buf.push_bytes(&UNSUPPORTED_VALUE);
            }
            buf.push_u8(0);
            buf.push_u8(DEVICE_FAMILY_NOT_USED);
            buf.push_u32(0);
            buf.push_u8(0);
            return Ok(());
        }
    }
    buf.push_u8(DEVICE_FAMILY_NOT_USED);
    buf.push_u32(acquisition);
    buf.push_u8(0);
    Ok(())
}

fn read_error_counters(
    state: &mut DeviceState,
    _: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    check_busy(state)?;
    for &counter in &state.volatile.error_counters {
        buf.push_u16(counter);
    }
    Ok(())
}

fn write_device_id(
    state: &mut DeviceState,
    request: &CommandRequest<'_>,
    buf: &mut ResponseBuffer,
) -> HandlerResult {
    require_bytes(request, 3)?;
    check_busy(state)?;
    check_write_protect(state)?;
    state.persisted.device_id = copy_into(request.data);
    state.commit_config_change();
    buf.push_bytes(&state.persisted.device_id);
    Ok(())
}
