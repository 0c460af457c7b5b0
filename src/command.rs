//! Command identifiers and the decoded request handed to the dispatcher.
//!
//! The frame receiver (outside this crate) assembles a frame from the
//! character stream, checks its address and parity and hands over a
//! [`CommandRequest`]. Everything the application layer needs to know about
//! the frame is in that value.
//!
//! # Example
//!
//! ```
//! use hart_slave::{CommandRequest, Master};
//! use hart_slave::command::CMD_WRITE_POLLING_ADDRESS;
//!
//! let request = CommandRequest::long(Master::Primary, CMD_WRITE_POLLING_ADDRESS, &[3, 0]);
//! assert_eq!(request.byte_count(), 2);
//! assert!(!request.broadcast);
//! ```

use crate::status::{CommErrors, Master};

/// Read unique identifier.
pub const CMD_READ_UNIQUE_ID: u8 = 0;
/// Read primary variable.
pub const CMD_READ_PV: u8 = 1;
/// Read loop current and percent of range.
pub const CMD_READ_LOOP_CURRENT: u8 = 2;
/// Read dynamic variables and loop current.
pub const CMD_READ_DYNAMIC_VARIABLES: u8 = 3;
/// Write polling address and loop current mode.
pub const CMD_WRITE_POLLING_ADDRESS: u8 = 6;
/// Read loop configuration.
pub const CMD_READ_LOOP_CONFIGURATION: u8 = 7;
/// Read dynamic variable classifications.
pub const CMD_READ_CLASSIFICATIONS: u8 = 8;
/// Read device variables with status.
pub const CMD_READ_DEVICE_VARIABLES: u8 = 9;
/// Read unique identifier associated with tag.
pub const CMD_READ_ID_BY_TAG: u8 = 11;
/// Read message.
pub const CMD_READ_MESSAGE: u8 = 12;
/// Read tag, descriptor and date.
pub const CMD_READ_TAG_DESCRIPTOR_DATE: u8 = 13;
/// Read primary variable transducer information.
pub const CMD_READ_TRANSDUCER_INFO: u8 = 14;
/// Read device information.
pub const CMD_READ_DEVICE_INFO: u8 = 15;
/// Read final assembly number.
pub const CMD_READ_FINAL_ASSEMBLY: u8 = 16;
/// Write message.
pub const CMD_WRITE_MESSAGE: u8 = 17;
/// Write tag, descriptor and date.
pub const CMD_WRITE_TAG_DESCRIPTOR_DATE: u8 = 18;
/// Write final assembly number.
pub const CMD_WRITE_FINAL_ASSEMBLY: u8 = 19;
/// Read long tag.
pub const CMD_READ_LONG_TAG: u8 = 20;
/// Read unique identifier associated with long tag.
pub const CMD_READ_ID_BY_LONG_TAG: u8 = 21;
/// Write long tag.
pub const CMD_WRITE_LONG_TAG: u8 = 22;
/// Write primary variable range values.
pub const CMD_WRITE_RANGE_VALUES: u8 = 35;
/// Reset configuration changed flag.
pub const CMD_RESET_CONFIG_CHANGED: u8 = 38;
/// EEPROM control.
pub const CMD_EEPROM_CONTROL: u8 = 39;
/// Enter or exit fixed current mode.
pub const CMD_FIXED_CURRENT: u8 = 40;
/// Perform device reset.
pub const CMD_DEVICE_RESET: u8 = 42;
/// Trim loop current zero.
pub const CMD_TRIM_ZERO: u8 = 45;
/// Trim loop current gain.
pub const CMD_TRIM_GAIN: u8 = 46;
/// Read additional device status.
pub const CMD_READ_ADDITIONAL_STATUS: u8 = 48;
/// Read device variable information.
pub const CMD_READ_DEVICE_VARIABLE_INFO: u8 = 54;
/// Read error counters (device specific).
pub const CMD_READ_ERROR_COUNTERS: u8 = 128;
/// Write device identifier (device specific).
pub const CMD_WRITE_DEVICE_ID: u8 = 129;

/// Address format of a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Five byte unique address.
    Long,
    /// One byte polling address.
    Short,
}

/// A received, address-checked command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest<'a> {
    /// Command number.
    pub command: u8,
    /// Master that sent the frame.
    pub master: Master,
    /// Address format used.
    pub addressing: Addressing,
    /// Whether the long address was the broadcast address.
    pub broadcast: bool,
    /// Whether the frame was addressed to this device.
    pub address_valid: bool,
    /// Transport errors detected while receiving.
    pub errors: CommErrors,
    /// Data field.
    pub data: &'a [u8],
}

impl<'a> CommandRequest<'a> {
    /// A long frame addressed to this device.
    pub fn long(master: Master, command: u8, data: &'a [u8]) -> Self {
        Self {
            command,
            master,
            addressing: Addressing::Long,
            broadcast: false,
            address_valid: true,
            errors: CommErrors::none(),
            data,
        }
    }

    /// A short frame addressed to this device.
    pub fn short(master: Master, command: u8, data: &'a [u8]) -> Self {
        Self {
            addressing: Addressing::Short,
            ..Self::long(master, command, data)
        }
    }

    /// Marks the frame as sent to the broadcast address.
    pub fn with_broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Attaches transport errors.
    pub fn with_errors(mut self, errors: CommErrors) -> Self {
        self.errors = errors;
        self
    }

    /// Sets whether the address matched this device.
    pub fn with_address_valid(mut self, valid: bool) -> Self {
        self.address_valid = valid;
        self
    }

    /// Number of data bytes received.
    pub fn byte_count(&self) -> usize {
        self.data.len()
    }
}
