//! Loop current state machine.
//!
//! The analog output normally tracks the primary variable. A master can park
//! it at a fixed value, and while it is parked at one of the calibration
//! extremes, trim it against an external reference meter.
//!
//! ```text
//!               set_fixed(v != 0)             trim(kind, measured)
//! Operational ─────────────────▶ FixedAtValue(v) ──────────────▶ TrimPending
//!      ▲                            │      ▲                         │
//!      └──────── set_fixed(0) ──────┘      └── sent to the module ───┘
//! ```
//!
//! Every accepted transition asks the bridge to re-assert the output on its
//! next reply. While the output is not operational the bridge also repeats
//! the request every `reminder_cycles` update messages.

use log::{debug, trace};

use crate::bridge::{BridgeRequest, RequestCode};
use crate::response::ResponseCode;
use crate::state::ProcessVariables;

/// Largest accepted deviation of a trim reading from the calibration extreme, in mA.
pub const TRIM_TOLERANCE: f32 = 1.0;

/// Which calibration extreme a trim adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimKind {
    /// Zero trim, performed at the lower extreme.
    Zero,
    /// Gain trim, performed at the upper extreme.
    Gain,
}

/// State of the analog output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopCurrentState {
    /// The output tracks the primary variable.
    Operational,
    /// The output is parked at the given current.
    FixedAtValue(f32),
    /// A trim reading has been accepted and awaits delivery to the module.
    TrimPending {
        /// Which extreme is being trimmed.
        kind: TrimKind,
        /// Current measured by the master's reference meter.
        value: f32,
    },
}

/// Owns the loop current state and its re-assertion schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCurrentController {
    state: LoopCurrentState,
    min: f32,
    max: f32,
    saved_operational: f32,
    reminder: u16,
    reminder_limit: u16,
    reassert: bool,
}

impl LoopCurrentController {
    /// Creates an operational controller with the given calibration extremes.
    pub fn new(min: f32, max: f32, reminder_limit: u16) -> Self {
        Self {
            state: LoopCurrentState::Operational,
            min,
            max,
            saved_operational: min,
            reminder: 0,
            reminder_limit,
            reassert: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> LoopCurrentState {
        self.state
    }

    /// Whether the output tracks the primary variable.
    pub fn is_operational(&self) -> bool {
        self.state == LoopCurrentState::Operational
    }

    /// Lower calibration extreme.
    pub fn min(&self) -> f32 {
        self.min
    }

    /// Upper calibration extreme.
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Whether the bridge owes the module a re-assertion.
    pub fn reassert_pending(&self) -> bool {
        self.reassert
    }

    /// Whether the periodic reminder has expired.
    pub fn reminder_due(&self) -> bool {
        !self.is_operational() && self.reminder >= self.reminder_limit
    }

    fn transition(&mut self, next: LoopCurrentState) {
        debug!("Loop current {:?} -> {:?}", self.state, next);
        self.state = next;
        self.reminder = 0;
        self.reassert = true;
    }

    /// Enters fixed current mode, or leaves it when `value` is 0.
    ///
    /// Returns the value now reported as the loop current.
    ///
    /// # Errors
    ///
    /// `ParameterTooSmall` / `ParameterTooLarge` when a nonzero value lies
    /// outside the calibration extremes.
    pub fn set_fixed(
        &mut self,
        value: f32,
        process: &mut ProcessVariables,
    ) -> Result<f32, ResponseCode> {
        if value == 0.0 {
            if !self.is_operational() {
                process.reporting_current = self.saved_operational;
            }
            self.transition(LoopCurrentState::Operational);
            return Ok(0.0);
        }
        if !(value >= self.min) {
            return Err(ResponseCode::ParameterTooSmall);
        }
        if value > self.max {
            return Err(ResponseCode::ParameterTooLarge);
        }
        if self.is_operational() {
            self.saved_operational = process.reporting_current;
        }
        process.reporting_current = value;
        self.transition(LoopCurrentState::FixedAtValue(value));
        Ok(value)
    }

    /// Accepts a trim reading taken at the calibration extreme for `kind`.
    ///
    /// # Errors
    ///
    /// `IncorrectLoopMode` unless the output is fixed at exactly that
    /// extreme; `ParameterTooSmall` / `ParameterTooLarge` when the reading is
    /// further than [`TRIM_TOLERANCE`] from it.
    pub fn trim(
        &mut self,
        kind: TrimKind,
        measured: f32,
        process: &mut ProcessVariables,
    ) -> Result<f32, ResponseCode> {
        let extreme = self.extreme(kind);
        match self.state {
            LoopCurrentState::FixedAtValue(v) if v == extreme => {}
            _ => return Err(ResponseCode::IncorrectLoopMode),
        }
        if !(measured >= extreme - TRIM_TOLERANCE) {
            return Err(ResponseCode::ParameterTooSmall);
        }
        if measured > extreme + TRIM_TOLERANCE {
            return Err(ResponseCode::ParameterTooLarge);
        }
        process.reporting_current = measured;
        self.transition(LoopCurrentState::TrimPending {
            kind,
            value: measured,
        });
        Ok(measured)
    }

    fn extreme(&self, kind: TrimKind) -> f32 {
        match kind {
            TrimKind::Zero => self.min,
            TrimKind::Gain => self.max,
        }
    }

    /// The bridge request describing the commanded output.
    pub fn desired_output(&self) -> BridgeRequest {
        match self.state {
            LoopCurrentState::Operational => BridgeRequest::new(RequestCode::LoopOperational, 0.0),
            LoopCurrentState::FixedAtValue(v) => BridgeRequest::new(RequestCode::SetLoopCurrent, v),
            LoopCurrentState::TrimPending { kind, value } => {
                let code = match kind {
                    TrimKind::Zero => RequestCode::TrimZero,
                    TrimKind::Gain => RequestCode::TrimGain,
                };
                BridgeRequest::new(code, value)
            }
        }
    }

    /// Returns the output request when a re-assertion or reminder is due.
    ///
    /// A delivered trim parks the output back at its calibration extreme.
    pub fn take_reassert(&mut self, process: &mut ProcessVariables) -> Option<BridgeRequest> {
        if !self.reassert && !self.reminder_due() {
            return None;
        }
        let request = self.desired_output();
        self.reassert = false;
        self.reminder = 0;
        if let LoopCurrentState::TrimPending { kind, .. } = self.state {
            let extreme = self.extreme(kind);
            process.reporting_current = extreme;
            self.state = LoopCurrentState::FixedAtValue(extreme);
        }
        trace!("Loop current re-asserted: {:?}", request);
        Some(request)
    }

    /// Counts one update cycle towards the reminder.
    pub fn on_update_cycle(&mut self) {
        if !self.is_operational() {
            self.reminder = self.reminder.saturating_add(1);
        }
    }

    /// Returns to operational without asking for a re-assertion.
    pub fn reset(&mut self) {
        self.state = LoopCurrentState::Operational;
        self.reminder = 0;
        self.reassert = false;
    }
}
