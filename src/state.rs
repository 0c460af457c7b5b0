//! Device state store.
//!
//! Everything a command or bridge message can observe lives in
//! [`DeviceState`]: the persisted identity, the volatile identity and
//! diagnostics, the process variables, the configuration mirror, the loop
//! current controller, the persistence scheduler and the link bookkeeping of
//! both protocols. The store holds no protocol logic beyond a few derived
//! getters and the status bookkeeping shared by both engines.

use log::{debug, info, trace};

use crate::bridge::RequestQueue;
use crate::config::{DeviceConfig, DESCRIPTOR_LEN, LONG_TAG_LEN, MESSAGE_LEN, TAG_LEN};
use crate::error::{HartError, Result};
use crate::loop_current::LoopCurrentController;
use crate::mirror::SensorConfigMirror;
use crate::persistence::PersistenceScheduler;
use crate::status::{
    Master, COLD_START, CONFIG_CHANGED, DIAG_DATABASE_INVALID, DIAG_UPDATE_DELAYED,
    EXT_VARIABLE_ALERT, LOOP_CURRENT_FIXED, MORE_STATUS_AVAILABLE, VARIABLE_BAD,
    VARIABLE_BAD_HIGH_LIMITED, VARIABLE_BAD_LOW_LIMITED, VARIABLE_GOOD,
};
use crate::utils::{checksum16, set_mask, trim_latin1, unpack_ascii};

/// Format version of the non-volatile identity image.
pub const IDENTITY_IMAGE_VERSION: u8 = 1;
/// Size of the non-volatile identity image in bytes.
pub const IDENTITY_IMAGE_LEN: usize = 96;
/// Number of diagnostic bytes exchanged by command 48.
pub const DIAGNOSTIC_LEN: usize = 9;
/// Protocol major revision implemented.
pub const PROTOCOL_REVISION: u8 = 7;

/// Loop current signaling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCurrentMode {
    /// The analog output is disabled (multidrop).
    Disabled,
    /// The analog output signals the primary variable.
    Enabled,
}

impl LoopCurrentMode {
    /// Wire value of the mode.
    pub fn code(self) -> u8 {
        match self {
            LoopCurrentMode::Disabled => 0,
            LoopCurrentMode::Enabled => 1,
        }
    }

    /// Parses a wire value.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(LoopCurrentMode::Disabled),
            1 => Some(LoopCurrentMode::Enabled),
            _ => None,
        }
    }
}

/// Error and event counters, reported by command 128 in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCounter {
    /// Vertical parity errors.
    Parity,
    /// Receiver overruns.
    Overrun,
    /// Framing errors.
    Framing,
    /// Longitudinal redundancy check failures.
    Lrc,
    /// Receive buffer overflows.
    BufferOverflow,
    /// Short frames carrying a command other than 0.
    ShortFrameRejected,
    /// Broadcast frames carrying a command other than 11 or 21.
    BroadcastRejected,
    /// Commands without a handler.
    NotImplemented,
    /// Commands answered with "too few data bytes".
    TooFewDataBytes,
    /// Commands answered with "device busy".
    DeviceBusy,
    /// Tag commands that stayed silent.
    TagMismatch,
    /// Bridge messages with invalid hex digits.
    BridgeHexError,
    /// Configuration loads with a bad checksum.
    BridgeChecksumError,
    /// Bridge messages of unknown type.
    BridgeUnknownMessage,
    /// Bridge messages with a bad field layout.
    BridgeFormatError,
    /// Polls reporting a failed transmission by the analog module.
    BridgeTransmitFailure,
    /// Transitions into the "update delayed" condition.
    UpdateDelayed,
    /// Loop current reminders sent to the analog module.
    LoopReminder,
    /// Failed flash writes.
    FlashWriteFailure,
}

impl ErrorCounter {
    /// Number of counters.
    pub const COUNT: usize = 19;

    /// Position of the counter in the counter array.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Identity that survives power loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentityPersisted {
    /// Unique device identifier (24 bits).
    pub device_id: [u8; 3],
    /// Manufacturer identification code.
    pub manufacturer_id: u16,
    /// Private label distributor code.
    pub distributor_id: u16,
    /// Packed ASCII short tag.
    pub tag: [u8; TAG_LEN],
    /// Packed ASCII descriptor.
    pub descriptor: [u8; DESCRIPTOR_LEN],
    /// Day, month, year - 1900.
    pub date: [u8; 3],
    /// ISO Latin-1 long tag.
    pub long_tag: [u8; LONG_TAG_LEN],
    /// Packed ASCII message.
    pub message: [u8; MESSAGE_LEN],
    /// Final assembly number (24 bits).
    pub final_assembly_number: [u8; 3],
    /// Polling address.
    pub polling_address: u8,
    /// Loop current signaling mode.
    pub loop_current_mode: LoopCurrentMode,
    /// Incremented on every accepted configuration write.
    pub config_change_counter: u16,
    /// Persisted status bits (configuration changed) per master.
    pub master_status: [u8; 2],
}

impl DeviceIdentityPersisted {
    /// Builds the factory identity.
    ///
    /// # Errors
    ///
    /// Returns `HartError::InvalidConfig` if a text field cannot be encoded.
    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        let [_, d0, d1, d2] = config.device_id.to_be_bytes();
        let [_, f0, f1, f2] = config.final_assembly_number.to_be_bytes();
        Ok(Self {
            device_id: [d0, d1, d2],
            manufacturer_id: config.manufacturer_id,
            distributor_id: config.distributor_id,
            tag: config.packed_tag()?,
            descriptor: config.packed_descriptor()?,
            date: config.date,
            long_tag: config.padded_long_tag()?,
            message: config.packed_message()?,
            final_assembly_number: [f0, f1, f2],
            polling_address: config.polling_address,
            loop_current_mode: LoopCurrentMode::Enabled,
            config_change_counter: 0,
            master_status: [0; 2],
        })
    }

    /// The short tag as text.
    pub fn tag_text(&self) -> String {
        unpack_ascii(&self.tag)
    }

    /// The long tag as text.
    pub fn long_tag_text(&self) -> String {
        trim_latin1(&self.long_tag)
    }

    /// Serializes the identity into its non-volatile image.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(IDENTITY_IMAGE_LEN);
        bytes.push(IDENTITY_IMAGE_VERSION);
        bytes.extend_from_slice(&self.device_id);
        bytes.extend_from_slice(&self.manufacturer_id.to_be_bytes());
        bytes.extend_from_slice(&self.distributor_id.to_be_bytes());
        bytes.extend_from_slice(&self.tag);
        bytes.extend_from_slice(&self.descriptor);
        bytes.extend_from_slice(&self.date);
        bytes.extend_from_slice(&self.long_tag);
        bytes.extend_from_slice(&self.message);
        bytes.extend_from_slice(&self.final_assembly_number);
        bytes.push(self.polling_address);
        bytes.push(self.loop_current_mode.code());
        bytes.extend_from_slice(&self.config_change_counter.to_be_bytes());
        bytes.extend_from_slice(&self.master_status);
        let sum = checksum16(&bytes);
        bytes.extend_from_slice(&sum.to_be_bytes());
        bytes
    }

    /// Parses a non-volatile image produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns `HartError::InvalidImage` on a wrong length, an unknown
    /// version, a bad checksum or an invalid loop current mode.
    ///
    /// # Example
    ///
    /// ```
    /// use hart_slave::DeviceConfig;
    /// use hart_slave::state::DeviceIdentityPersisted;
    ///
    /// let identity = DeviceIdentityPersisted::from_config(&DeviceConfig::new(7)).unwrap();
    /// let image = identity.to_bytes();
    /// assert_eq!(DeviceIdentityPersisted::from_bytes(&image).unwrap(), identity);
    /// ```
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != IDENTITY_IMAGE_LEN {
            return Err(HartError::invalid_image(format!(
                "expected {} bytes, got {}",
                IDENTITY_IMAGE_LEN,
                bytes.len()
            )));
        }
        if bytes[0] != IDENTITY_IMAGE_VERSION {
            return Err(HartError::invalid_image(format!(
                "unsupported version {}",
                bytes[0]
            )));
        }
        let (body, sum) = bytes.split_at(IDENTITY_IMAGE_LEN - 2);
        let stored = u16::from_be_bytes([sum[0], sum[1]]);
        let computed = checksum16(body);
        if stored != computed {
            return Err(HartError::invalid_image(format!(
                "checksum 0x{:04X} does not match 0x{:04X}",
                stored, computed
            )));
        }

        let mut reader = ImageReader { bytes: body, pos: 1 };
        let device_id = reader.array();
        let manufacturer_id = reader.u16();
        let distributor_id = reader.u16();
        let tag = reader.array();
        let descriptor = reader.array();
        let date = reader.array();
        let long_tag = reader.array();
        let message = reader.array();
        let final_assembly_number = reader.array();
        let polling_address = reader.u8();
        let mode = reader.u8();
        let loop_current_mode = LoopCurrentMode::from_code(mode)
            .ok_or_else(|| HartError::invalid_image(format!("invalid loop mode {}", mode)))?;
        let config_change_counter = reader.u16();
        let master_status = reader.array();

        Ok(Self {
            device_id,
            manufacturer_id,
            distributor_id,
            tag,
            descriptor,
            date,
            long_tag,
            message,
            final_assembly_number,
            polling_address,
            loop_current_mode,
            config_change_counter,
            master_status,
        })
    }
}

/// Sequential reader over an image whose length has been checked.
struct ImageReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl ImageReader<'_> {
    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        let [b] = self.array::<1>();
        b
    }

    fn u16(&mut self) -> u16 {
        u16::from_be_bytes(self.array())
    }
}

/// Identity and diagnostics rebuilt on every boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentityVolatile {
    /// Expanded device type code.
    pub expanded_device_type: u16,
    /// Preambles required from the master.
    pub min_preambles: u8,
    /// Device revision level.
    pub device_revision: u8,
    /// Software revision level.
    pub software_revision: u8,
    /// Hardware revision level (5 bits).
    pub hardware_revision: u8,
    /// Physical signaling code (3 bits).
    pub physical_signaling: u8,
    /// Capability flags.
    pub flags: u8,
    /// Highest device variable number.
    pub max_device_variables: u8,
    /// Device profile code.
    pub device_profile: u8,
    /// Error and event counters indexed by [`ErrorCounter`].
    pub error_counters: [u16; ErrorCounter::COUNT],
    /// Device specific status bytes.
    pub device_specific_status: [u8; 6],
    /// Extended field device status.
    pub extended_status: u8,
    /// Operating mode code.
    pub operating_mode: u8,
    /// Standardized status 0.
    pub standardized_status: u8,
    /// Common status bits reported to both masters.
    pub common_status: u8,
    /// "More status available" per master.
    pub more_status: [bool; 2],
    /// Cold start per master.
    pub cold_start: [bool; 2],
}

impl DeviceIdentityVolatile {
    /// Boot defaults for the given configuration.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            expanded_device_type: config.expanded_device_type,
            min_preambles: config.min_preambles,
            device_revision: config.device_revision,
            software_revision: config.software_revision,
            hardware_revision: config.hardware_revision,
            physical_signaling: 0,
            flags: 0,
            max_device_variables: 1,
            device_profile: 1,
            error_counters: [0; ErrorCounter::COUNT],
            device_specific_status: [0; 6],
            extended_status: 0,
            operating_mode: 0,
            standardized_status: 0,
            common_status: 0,
            more_status: [false; 2],
            cold_start: [true; 2],
        }
    }
}

/// Cached process data, written by the bridge and read by commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessVariables {
    /// Primary variable.
    pub pv: f32,
    /// Secondary variable.
    pub sv: f32,
    /// Loop current last measured by the analog module.
    pub loop_current: f32,
    /// Loop current reported to masters; follows the commanded value while
    /// the output is not operational.
    pub reporting_current: f32,
    /// Device variable status of the PV.
    pub pv_status: u8,
    /// Device variable status of the SV.
    pub sv_status: u8,
    /// Status byte of the last update message.
    pub module_status: u8,
    /// Clock value of the last update, in 1/32 ms.
    pub timestamp: u32,
}

impl Default for ProcessVariables {
    fn default() -> Self {
        Self {
            pv: 0.0,
            sv: 0.0,
            loop_current: 0.0,
            reporting_current: 0.0,
            pv_status: VARIABLE_BAD,
            sv_status: VARIABLE_BAD,
            module_status: 0,
            timestamp: 0,
        }
    }
}

/// Bookkeeping of the analog module link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeLink {
    /// Requests waiting for the next reply.
    pub queue: RequestQueue,
    /// Last transmission status reported by the module.
    pub last_tx_status: u8,
    /// Polls received since the last update message.
    pub polls_since_update: u16,
    /// Whether an update message has arrived since boot.
    pub update_received: bool,
}

/// Bookkeeping of the field bus link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostLink {
    /// Polls left before the host is considered gone.
    pub active_polls: u16,
    /// Whether the last frame carried transport errors.
    pub comm_error: bool,
}

/// Health code reported to the analog module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// The configuration mirror is not valid.
    NoDatabase,
    /// Mirror valid, no host traffic.
    GoodNoHost,
    /// Mirror valid, host active.
    GoodActiveHost,
    /// The last host frame carried transport errors.
    HostError,
}

impl Health {
    /// Wire value of the health code.
    pub fn code(self) -> u8 {
        match self {
            Health::NoDatabase => 0x00,
            Health::GoodNoHost => 0x01,
            Health::GoodActiveHost => 0x02,
            Health::HostError => 0x03,
        }
    }
}

/// Shared state of the command and bridge engines.
#[derive(Debug, Clone)]
pub struct DeviceState {
    /// Identity that survives power loss.
    pub persisted: DeviceIdentityPersisted,
    /// Identity and diagnostics rebuilt on boot.
    pub volatile: DeviceIdentityVolatile,
    /// Cached process data.
    pub process: ProcessVariables,
    /// Copy of the analog module's configuration.
    pub mirror: SensorConfigMirror,
    /// Analog output state machine.
    pub loop_current: LoopCurrentController,
    /// Pending flash work.
    pub persistence: PersistenceScheduler,
    /// Analog module link.
    pub bridge: BridgeLink,
    /// Field bus link.
    pub host: HostLink,
    /// Free running clock in 1/32 ms.
    pub clock: u32,
    pub(crate) reset_requested: bool,
    config: DeviceConfig,
}

impl DeviceState {
    /// Builds the boot state for a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `HartError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let mut state = Self {
            persisted: DeviceIdentityPersisted::from_config(&config)?,
            volatile: DeviceIdentityVolatile::from_config(&config),
            process: ProcessVariables::default(),
            mirror: SensorConfigMirror::new(),
            loop_current: LoopCurrentController::new(
                config.loop_current_min,
                config.loop_current_max,
                config.reminder_cycles,
            ),
            persistence: PersistenceScheduler::new(),
            bridge: BridgeLink::default(),
            host: HostLink::default(),
            clock: 0,
            reset_requested: false,
            config,
        };
        state.refresh_diagnostics();
        Ok(state)
    }

    /// Configuration the device was built from.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Field device status byte as reported to `master`.
    pub fn status_byte(&self, master: Master) -> u8 {
        let i = master.index();
        let mut status = self.volatile.common_status;
        status |= self.persisted.master_status[i] & CONFIG_CHANGED;
        status = set_mask(status, COLD_START, self.volatile.cold_start[i]);
        status = set_mask(status, MORE_STATUS_AVAILABLE, self.volatile.more_status[i]);
        set_mask(status, LOOP_CURRENT_FIXED, !self.loop_current.is_operational())
    }

    /// Records an accepted configuration write.
    ///
    /// Sets "configuration changed" for both masters, bumps the change
    /// counter and asks for a flush.
    pub fn commit_config_change(&mut self) {
        for status in self.persisted.master_status.iter_mut() {
            *status |= CONFIG_CHANGED;
        }
        self.persisted.config_change_counter = self.persisted.config_change_counter.wrapping_add(1);
        self.persistence.request_flush();
        debug!(
            "Configuration change {} committed",
            self.persisted.config_change_counter
        );
    }

    /// Clears "configuration changed" for one master.
    pub fn clear_config_changed(&mut self, master: Master) {
        self.persisted.master_status[master.index()] &= !CONFIG_CHANGED;
        self.persistence.mark_dirty();
    }

    /// Saturating increment of an error counter.
    pub fn count(&mut self, counter: ErrorCounter) {
        let slot = &mut self.volatile.error_counters[counter.index()];
        *slot = slot.saturating_add(1);
        trace!("{:?} counter now {}", counter, *slot);
    }

    /// Current value of an error counter.
    pub fn counter(&self, counter: ErrorCounter) -> u16 {
        self.volatile.error_counters[counter.index()]
    }

    /// Raises "more status available" for both masters.
    pub fn raise_more_status(&mut self) {
        self.volatile.more_status = [true; 2];
    }

    /// The diagnostic bytes compared and reported by command 48.
    pub fn diagnostic_bytes(&self) -> [u8; DIAGNOSTIC_LEN] {
        let v = &self.volatile;
        let mut out = [0u8; DIAGNOSTIC_LEN];
        out[..6].copy_from_slice(&v.device_specific_status);
        out[6] = v.extended_status;
        out[7] = v.operating_mode;
        out[8] = v.standardized_status;
        out
    }

    /// Whether cached process data is too old to report.
    pub fn update_delayed(&self) -> bool {
        !self.bridge.update_received
            || self.bridge.polls_since_update > self.config.update_timeout_polls
    }

    /// Whether conditional reporters must refuse to report process data.
    pub fn process_data_unavailable(&self) -> bool {
        self.mirror.is_loading() || self.update_delayed()
    }

    /// Recomputes derived diagnostic bits, raising "more status available"
    /// when any diagnostic byte changes.
    pub fn refresh_diagnostics(&mut self) {
        let before = self.diagnostic_bytes();
        let was_delayed = before[1] & DIAG_UPDATE_DELAYED != 0;
        let delayed = self.update_delayed();

        let byte = &mut self.volatile.device_specific_status[1];
        *byte = set_mask(*byte, DIAG_DATABASE_INVALID, !self.mirror.is_valid());
        *byte = set_mask(*byte, DIAG_UPDATE_DELAYED, delayed);

        let alert = self.process.pv_status != VARIABLE_GOOD
            || (self.mirror.sv_present() && self.process.sv_status != VARIABLE_GOOD);
        self.volatile.extended_status =
            set_mask(self.volatile.extended_status, EXT_VARIABLE_ALERT, alert);

        if delayed && !was_delayed && self.bridge.update_received {
            self.count(ErrorCounter::UpdateDelayed);
        }
        if self.diagnostic_bytes() != before {
            debug!("Diagnostics changed: {:02X?}", self.diagnostic_bytes());
            self.raise_more_status();
        }
    }

    /// Host health as seen by the analog module.
    pub fn health(&self) -> Health {
        if !self.mirror.is_valid() {
            Health::NoDatabase
        } else if self.host.comm_error {
            Health::HostError
        } else if self.host.active_polls > 0 {
            Health::GoodActiveHost
        } else {
            Health::GoodNoHost
        }
    }

    /// Marks the host active after a well-formed frame.
    pub fn mark_host_active(&mut self) {
        self.host.active_polls = self.config.host_idle_polls;
        self.host.comm_error = false;
    }

    /// Classifies `value` against a pair of sensor limits.
    ///
    /// NaN is bad without a limit qualifier.
    pub(crate) fn limit_status(value: f32, upper: f32, lower: f32) -> u8 {
        if value.is_nan() {
            VARIABLE_BAD
        } else if value > upper {
            VARIABLE_BAD_HIGH_LIMITED
        } else if value < lower {
            VARIABLE_BAD_LOW_LIMITED
        } else {
            VARIABLE_GOOD
        }
    }

    /// Performs a device reset: volatile state back to boot defaults, cold
    /// start for both masters, loop current operational.
    ///
    /// Error counters, the persisted identity, the mirror and the pending
    /// persistence intents survive.
    pub(crate) fn perform_reset(&mut self) {
        let counters = self.volatile.error_counters;
        self.volatile = DeviceIdentityVolatile::from_config(&self.config);
        self.volatile.error_counters = counters;
        self.loop_current.reset();
        self.process.reporting_current = self.process.loop_current;
        self.bridge.update_received = false;
        self.bridge.polls_since_update = 0;
        self.host = HostLink::default();
        self.reset_requested = false;
        self.refresh_diagnostics();
        info!("Device reset performed");
    }
}
