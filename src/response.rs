//! Response frame encoding.
//!
//! Every command response starts with the same three bytes:
//!
//! | Byte | Content |
//! |------|---------|
//! | 0 | byte count of everything after this byte |
//! | 1 | response code (0 on success) |
//! | 2 | field device status byte of the requesting master |
//!
//! Handlers append their payload to a [`ResponseBuffer`]; the header is filled
//! in by [`ResponseBuffer::finish`] once the payload is complete, so the byte
//! count can never disagree with the bytes that follow it.
//!
//! # Example
//!
//! ```
//! use hart_slave::ResponseBuffer;
//!
//! let mut buf = ResponseBuffer::new();
//! buf.push_u8(39);
//! buf.push_f32(12.0);
//!
//! let frame = buf.finish(0x40);
//! assert_eq!(frame, vec![7, 0x00, 0x40, 39, 0x41, 0x40, 0x00, 0x00]);
//! ```

use crate::status::CommErrors;

/// Number of header bytes preceding the payload.
pub const HEADER_LEN: usize = 3;

/// Response code of an error frame or of a successful response.
///
/// Several codes share a wire value; their meaning depends on the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// Command executed.
    Success,
    /// Invalid selection.
    InvalidSelection,
    /// Passed parameter too large.
    ParameterTooLarge,
    /// Passed parameter too small.
    ParameterTooSmall,
    /// Too few data bytes received.
    TooFewDataBytes,
    /// Device is write protected.
    WriteProtected,
    /// Process data not available.
    UpdateFailure,
    /// Echoed configuration change counter does not match.
    ConfigCounterMismatch,
    /// Loop current is not at the required calibration extreme.
    IncorrectLoopMode,
    /// Lower range value too high.
    LowerRangeTooHigh,
    /// Lower range value too low.
    LowerRangeTooLow,
    /// Upper range value too high.
    UpperRangeTooHigh,
    /// Loop current signaling is disabled.
    LoopSignalingDisabled,
    /// Upper range value too low.
    UpperRangeTooLow,
    /// Invalid loop current mode selection.
    InvalidModeSelection,
    /// Both range values out of limits.
    RangeValuesOutOfLimits,
    /// Invalid units code.
    InvalidRangeUnits,
    /// Span below the minimum span.
    InvalidSpan,
    /// Device busy.
    DeviceBusy,
    /// Command not implemented.
    NotImplemented,
}

impl ResponseCode {
    /// Returns the wire value of the code.
    pub fn code(self) -> u8 {
        match self {
            ResponseCode::Success => 0,
            ResponseCode::InvalidSelection => 2,
            ResponseCode::ParameterTooLarge => 3,
            ResponseCode::ParameterTooSmall => 4,
            ResponseCode::TooFewDataBytes => 5,
            ResponseCode::WriteProtected => 7,
            ResponseCode::UpdateFailure => 8,
            ResponseCode::ConfigCounterMismatch
            | ResponseCode::IncorrectLoopMode
            | ResponseCode::LowerRangeTooHigh => 9,
            ResponseCode::LowerRangeTooLow => 10,
            ResponseCode::UpperRangeTooHigh | ResponseCode::LoopSignalingDisabled => 11,
            ResponseCode::UpperRangeTooLow | ResponseCode::InvalidModeSelection => 12,
            ResponseCode::RangeValuesOutOfLimits => 13,
            ResponseCode::InvalidRangeUnits => 28,
            ResponseCode::InvalidSpan => 29,
            ResponseCode::DeviceBusy => 32,
            ResponseCode::NotImplemented => 64,
        }
    }
}

/// Growable response frame with a reserved header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBuffer {
    bytes: Vec<u8>,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuffer {
    /// Creates an empty buffer with the header reserved.
    pub fn new() -> Self {
        let mut bytes = Vec::with_capacity(64);
        bytes.resize(HEADER_LEN, 0);
        Self { bytes }
    }

    /// Number of payload bytes appended so far.
    pub fn payload_len(&self) -> usize {
        self.bytes.len() - HEADER_LEN
    }

    /// Payload appended so far.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    /// Appends one byte and returns the new cursor.
    pub fn push_u8(&mut self, value: u8) -> usize {
        self.bytes.push(value);
        self.bytes.len()
    }

    /// Appends a big-endian `u16` and returns the new cursor.
    pub fn push_u16(&mut self, value: u16) -> usize {
        self.push_bytes(&value.to_be_bytes())
    }

    /// Appends a big-endian `u32` and returns the new cursor.
    pub fn push_u32(&mut self, value: u32) -> usize {
        self.push_bytes(&value.to_be_bytes())
    }

    /// Appends an IEEE-754 single, most significant byte first, and returns
    /// the new cursor.
    pub fn push_f32(&mut self, value: f32) -> usize {
        self.push_bytes(&value.to_be_bytes())
    }

    /// Appends raw bytes and returns the new cursor.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        self.bytes.extend_from_slice(bytes);
        self.bytes.len()
    }

    /// Completes a success frame.
    pub fn finish(mut self, status: u8) -> Vec<u8> {
        self.bytes[0] = (self.bytes.len() - 1) as u8;
        self.bytes[1] = ResponseCode::Success.code();
        self.bytes[2] = status;
        self.bytes
    }
}

/// Builds an error frame carrying no payload.
pub fn error_frame(code: ResponseCode, status: u8) -> Vec<u8> {
    vec![2, code.code(), status]
}

/// Builds the communication error frame for transport-detected errors.
pub fn comm_error_frame(errors: CommErrors) -> Vec<u8> {
    vec![2, 0x80 | errors.bits(), 0]
}

/// Percent of `value` within `[lower, upper]`.
///
/// A zero span yields 0 rather than an infinite or NaN result.
///
/// # Example
///
/// ```
/// use hart_slave::response::percent_of_range;
///
/// assert_eq!(percent_of_range(12.0, 4.0, 20.0), 50.0);
/// assert_eq!(percent_of_range(5.0, 1.0, 1.0), 0.0);
/// ```
pub fn percent_of_range(value: f32, lower: f32, upper: f32) -> f32 {
    let span = upper - lower;
    if span == 0.0 {
        return 0.0;
    }
    (value - lower) / span * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frame() {
        let frame = ResponseBuffer::new().finish(0x20);
        assert_eq!(frame, vec![2, 0, 0x20]);
    }

    #[test]
    fn test_cursor_advances() {
        let mut buf = ResponseBuffer::new();
        assert_eq!(buf.push_u8(1), 4);
        assert_eq!(buf.push_u16(0x0203), 6);
        assert_eq!(buf.push_bytes(&[0xAB, 0xCD, 0xEF]), 9);
        assert_eq!(buf.push_u32(1), 13);
        assert_eq!(buf.push_f32(0.0), 17);
        assert_eq!(buf.payload_len(), 14);
        assert_eq!(&buf.payload()[3..6], &[0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn test_byte_count_matches_payload() {
        let mut buf = ResponseBuffer::new();
        buf.push_bytes(&[0u8; 24]);
        let frame = buf.finish(0);
        assert_eq!(frame[0] as usize, frame.len() - 1);
        assert_eq!(frame[0], 26);
    }

    #[test]
    fn test_error_frames() {
        assert_eq!(error_frame(ResponseCode::DeviceBusy, 0x50), vec![2, 32, 0x50]);
        assert_eq!(
            comm_error_frame(CommErrors::PARITY | CommErrors::LRC),
            vec![2, 0xC8, 0]
        );
    }

    #[test]
    fn test_shared_code_values() {
        assert_eq!(ResponseCode::ConfigCounterMismatch.code(), 9);
        assert_eq!(ResponseCode::IncorrectLoopMode.code(), 9);
        assert_eq!(ResponseCode::LoopSignalingDisabled.code(), 11);
        assert_eq!(ResponseCode::InvalidModeSelection.code(), 12);
        assert_eq!(ResponseCode::NotImplemented.code(), 64);
    }

    #[test]
    fn test_percent_of_range() {
        assert_eq!(percent_of_range(4.0, 4.0, 20.0), 0.0);
        assert_eq!(percent_of_range(20.0, 4.0, 20.0), 100.0);
        assert_eq!(percent_of_range(-10.0, 0.0, 100.0), -10.0);
        assert_eq!(percent_of_range(1.0, 2.0, 2.0), 0.0);
    }
}
