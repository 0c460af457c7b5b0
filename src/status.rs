//! Status bytes, master identity and wire constants.
//!
//! # Field device status byte
//!
//! | Bit | Mask | Meaning | Scope |
//! |-----|------|---------|-------|
//! | 7 | 0x80 | Device malfunction | common |
//! | 6 | 0x40 | Configuration changed | per master |
//! | 5 | 0x20 | Cold start | per master |
//! | 4 | 0x10 | More status available | per master |
//! | 3 | 0x08 | Loop current fixed | common |
//! | 2 | 0x04 | Loop current saturated | common |
//! | 1 | 0x02 | Non-primary variable out of limits | common |
//! | 0 | 0x01 | Primary variable out of limits | common |

/// Device malfunction.
pub const DEVICE_MALFUNCTION: u8 = 0x80;
/// Configuration changed since the master last reset the flag.
pub const CONFIG_CHANGED: u8 = 0x40;
/// Power up or reset since the master was last answered.
pub const COLD_START: u8 = 0x20;
/// Diagnostic bytes changed since the master last acknowledged them.
pub const MORE_STATUS_AVAILABLE: u8 = 0x10;
/// The analog output is fixed and no longer tracks the primary variable.
pub const LOOP_CURRENT_FIXED: u8 = 0x08;
/// The analog output is beyond its calibrated band.
pub const LOOP_CURRENT_SATURATED: u8 = 0x04;
/// The secondary variable is outside its limits.
pub const NON_PV_OUT_OF_LIMITS: u8 = 0x02;
/// The primary variable is outside the sensor limits.
pub const PV_OUT_OF_LIMITS: u8 = 0x01;

/// Device variable status: process data good.
pub const VARIABLE_GOOD: u8 = 0xC0;
/// Device variable status: manually fixed value.
pub const VARIABLE_FIXED: u8 = 0x80;
/// Device variable status: bad, limit undefined.
pub const VARIABLE_BAD: u8 = 0x00;
/// Device variable status: bad, limited high.
pub const VARIABLE_BAD_HIGH_LIMITED: u8 = 0x20;
/// Device variable status: bad, limited low.
pub const VARIABLE_BAD_LOW_LIMITED: u8 = 0x10;
/// Device variable status: bad, constant.
pub const VARIABLE_BAD_CONSTANT: u8 = 0x30;

/// Unit code for milliamperes.
pub const UNIT_MILLIAMPERE: u8 = 39;
/// Unit code for percent.
pub const UNIT_PERCENT: u8 = 57;
/// Unit code meaning "not used".
pub const UNIT_NOT_USED: u8 = 250;

/// Extended device status: a device variable is in alert.
pub const EXT_VARIABLE_ALERT: u8 = 0x02;

/// Device specific status byte 1: the configuration mirror is not valid.
pub const DIAG_DATABASE_INVALID: u8 = 0x01;
/// Device specific status byte 1: no timely update from the analog module.
pub const DIAG_UPDATE_DELAYED: u8 = 0x02;

/// The bus master that sent a frame.
///
/// Configuration-changed, cold start and more-status-available flags are
/// kept separately for each master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Master {
    /// Primary master, typically the control system.
    Primary,
    /// Secondary master, typically a handheld.
    Secondary,
}

impl Master {
    /// Both masters, in index order.
    pub const ALL: [Master; 2] = [Master::Primary, Master::Secondary];

    /// Index into per-master arrays.
    pub(crate) fn index(self) -> usize {
        match self {
            Master::Primary => 0,
            Master::Secondary => 1,
        }
    }
}

impl std::fmt::Display for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Master::Primary => write!(f, "primary"),
            Master::Secondary => write!(f, "secondary"),
        }
    }
}

/// Transport-detected errors reported with a received frame.
///
/// The bit values are the ones placed in the communication error response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommErrors(u8);

impl CommErrors {
    /// Vertical parity error.
    pub const PARITY: CommErrors = CommErrors(0x40);
    /// Receiver overrun.
    pub const OVERRUN: CommErrors = CommErrors(0x20);
    /// Framing error.
    pub const FRAMING: CommErrors = CommErrors(0x10);
    /// Longitudinal redundancy check mismatch.
    pub const LRC: CommErrors = CommErrors(0x08);
    /// Receive buffer overflow.
    pub const BUFFER_OVERFLOW: CommErrors = CommErrors(0x02);

    /// No error.
    pub const fn none() -> Self {
        CommErrors(0)
    }

    /// Builds a set from raw bits, discarding undefined ones.
    pub const fn from_bits(bits: u8) -> Self {
        CommErrors(bits & 0x7A)
    }

    /// Raw bit value.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether no error is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: CommErrors) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CommErrors {
    type Output = CommErrors;

    fn bitor(self, rhs: CommErrors) -> CommErrors {
        CommErrors(self.0 | rhs.0)
    }
}
