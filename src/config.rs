//! Factory configuration of the device.
//!
//! [`DeviceConfig`] holds everything a freshly manufactured device needs
//! before it has ever written its identity to non-volatile memory: identity
//! codes, the initial tag and message texts, and the tuning constants of the
//! bridge and loop current logic.
//!
//! # Example
//!
//! ```
//! use hart_slave::DeviceConfig;
//!
//! let config = DeviceConfig::new(0x00_12_34)
//!     .with_tag("FT-101")
//!     .with_long_tag("Flow transmitter line 4")
//!     .with_polling_address(0);
//! assert!(config.validate().is_ok());
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{HartError, Result};
use crate::utils::{pack_ascii, pad_latin1};

/// Width of the packed tag in bytes.
pub const TAG_LEN: usize = 6;
/// Width of the packed descriptor in bytes.
pub const DESCRIPTOR_LEN: usize = 12;
/// Width of the packed message in bytes.
pub const MESSAGE_LEN: usize = 24;
/// Width of the long tag in bytes.
pub const LONG_TAG_LEN: usize = 32;
/// Highest valid polling address.
pub const MAX_POLLING_ADDRESS: u8 = 63;

/// Default lower calibration extreme of the loop current, in mA.
pub const DEFAULT_LOOP_CURRENT_MIN: f32 = 4.0;
/// Default upper calibration extreme of the loop current, in mA.
pub const DEFAULT_LOOP_CURRENT_MAX: f32 = 20.0;
/// Default number of update cycles between loop current reminders.
pub const DEFAULT_REMINDER_CYCLES: u16 = 10;
/// Default number of polls without update before values are considered stale.
pub const DEFAULT_UPDATE_TIMEOUT_POLLS: u16 = 5;
/// Default number of polls a host stays "active" after its last frame.
pub const DEFAULT_HOST_IDLE_POLLS: u16 = 50;

/// Factory configuration for creating a [`Device`](crate::Device).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct DeviceConfig {
    /// Manufacturer identification code.
    pub manufacturer_id: u16,
    /// Expanded device type code.
    pub expanded_device_type: u16,
    /// Private label distributor code.
    pub distributor_id: u16,
    /// Unique 24-bit device identifier.
    pub device_id: u32,
    /// Device revision level.
    pub device_revision: u8,
    /// Software revision level.
    pub software_revision: u8,
    /// Hardware revision level (5 bits).
    pub hardware_revision: u8,
    /// Number of preambles required from the master.
    pub min_preambles: u8,
    /// Short tag, up to 8 packed ASCII characters.
    pub tag: String,
    /// Descriptor, up to 16 packed ASCII characters.
    pub descriptor: String,
    /// Message, up to 32 packed ASCII characters.
    pub message: String,
    /// Long tag, up to 32 ISO Latin-1 characters.
    pub long_tag: String,
    /// Date as day, month, year - 1900.
    pub date: [u8; 3],
    /// Final assembly number (24 bits).
    pub final_assembly_number: u32,
    /// Polling address (0-63).
    pub polling_address: u8,
    /// Lower calibration extreme of the loop current, in mA.
    pub loop_current_min: f32,
    /// Upper calibration extreme of the loop current, in mA.
    pub loop_current_max: f32,
    /// Update cycles between re-assertions of a fixed loop current.
    pub reminder_cycles: u16,
    /// Polls without an update message before values count as stale.
    pub update_timeout_polls: u16,
    /// Polls a host is reported active after its last frame.
    pub host_idle_polls: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: 0x6000,
            expanded_device_type: 0xE1A0,
            distributor_id: 0x6000,
            device_id: 0,
            device_revision: 1,
            software_revision: 1,
            hardware_revision: 1,
            min_preambles: 5,
            tag: String::new(),
            descriptor: String::new(),
            message: String::new(),
            long_tag: String::new(),
            date: [1, 1, 124],
            final_assembly_number: 0,
            polling_address: 0,
            loop_current_min: DEFAULT_LOOP_CURRENT_MIN,
            loop_current_max: DEFAULT_LOOP_CURRENT_MAX,
            reminder_cycles: DEFAULT_REMINDER_CYCLES,
            update_timeout_polls: DEFAULT_UPDATE_TIMEOUT_POLLS,
            host_idle_polls: DEFAULT_HOST_IDLE_POLLS,
        }
    }
}

impl DeviceConfig {
    /// Creates a configuration with factory defaults and the given device id.
    ///
    /// # Example
    ///
    /// ```
    /// use hart_slave::DeviceConfig;
    ///
    /// let config = DeviceConfig::new(0x0A0B0C);
    /// assert_eq!(config.device_id, 0x0A0B0C);
    /// assert_eq!(config.loop_current_min, 4.0);
    /// ```
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            ..Self::default()
        }
    }

    /// Sets the short tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Sets the long tag.
    pub fn with_long_tag(mut self, long_tag: impl Into<String>) -> Self {
        self.long_tag = long_tag.into();
        self
    }

    /// Sets the descriptor.
    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = descriptor.into();
        self
    }

    /// Sets the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Sets the polling address.
    pub fn with_polling_address(mut self, address: u8) -> Self {
        self.polling_address = address;
        self
    }

    /// Sets manufacturer and distributor codes.
    ///
    /// # Example
    ///
    /// ```
    /// use hart_slave::DeviceConfig;
    ///
    /// let config = DeviceConfig::new(1).with_manufacturer(0x6010, 0x6011);
    /// assert_eq!(config.manufacturer_id, 0x6010);
    /// assert_eq!(config.distributor_id, 0x6011);
    /// ```
    pub fn with_manufacturer(mut self, manufacturer_id: u16, distributor_id: u16) -> Self {
        self.manufacturer_id = manufacturer_id;
        self.distributor_id = distributor_id;
        self
    }

    /// Sets the loop current calibration extremes.
    pub fn with_loop_calibration(mut self, min: f32, max: f32) -> Self {
        self.loop_current_min = min;
        self.loop_current_max = max;
        self
    }

    /// Sets the number of update cycles between loop current reminders.
    pub fn with_reminder_cycles(mut self, cycles: u16) -> Self {
        self.reminder_cycles = cycles;
        self
    }

    /// Sets the number of polls without update before values are stale.
    pub fn with_update_timeout_polls(mut self, polls: u16) -> Self {
        self.update_timeout_polls = polls;
        self
    }

    /// Checks every field against its wire representation.
    ///
    /// # Errors
    ///
    /// Returns `HartError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.device_id > 0x00FF_FFFF {
            return Err(HartError::invalid_config("device_id", "must fit in 24 bits"));
        }
        if self.final_assembly_number > 0x00FF_FFFF {
            return Err(HartError::invalid_config(
                "final_assembly_number",
                "must fit in 24 bits",
            ));
        }
        if self.polling_address > MAX_POLLING_ADDRESS {
            return Err(HartError::invalid_config(
                "polling_address",
                format!("must be 0-{}", MAX_POLLING_ADDRESS),
            ));
        }
        if self.hardware_revision > 0x1F {
            return Err(HartError::invalid_config(
                "hardware_revision",
                "must fit in 5 bits",
            ));
        }
        self.packed_tag()?;
        self.packed_descriptor()?;
        self.packed_message()?;
        self.padded_long_tag()?;
        if !(self.loop_current_min.is_finite()
            && self.loop_current_max.is_finite()
            && self.loop_current_min < self.loop_current_max)
        {
            return Err(HartError::invalid_config(
                "loop_current_min",
                "calibration extremes must be finite and ascending",
            ));
        }
        Ok(())
    }

    pub(crate) fn packed_tag(&self) -> Result<[u8; TAG_LEN]> {
        packed::<TAG_LEN>("tag", &self.tag)
    }

    pub(crate) fn packed_descriptor(&self) -> Result<[u8; DESCRIPTOR_LEN]> {
        packed::<DESCRIPTOR_LEN>("descriptor", &self.descriptor)
    }

    pub(crate) fn packed_message(&self) -> Result<[u8; MESSAGE_LEN]> {
        packed::<MESSAGE_LEN>("message", &self.message)
    }

    pub(crate) fn padded_long_tag(&self) -> Result<[u8; LONG_TAG_LEN]> {
        let bytes = pad_latin1(&self.long_tag, LONG_TAG_LEN).ok_or_else(|| {
            HartError::invalid_config("long_tag", "must be at most 32 ISO Latin-1 characters")
        })?;
        let mut out = [0u8; LONG_TAG_LEN];
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

fn packed<const N: usize>(field: &str, text: &str) -> Result<[u8; N]> {
    let bytes = pack_ascii(text, N).ok_or_else(|| {
        HartError::invalid_config(
            field,
            format!("must be at most {} packed ASCII characters", N * 4 / 3),
        )
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
