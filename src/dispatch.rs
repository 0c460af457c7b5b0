//! Frame-level dispatch.
//!
//! [`Dispatcher::dispatch`] decides whether a received frame is answered at
//! all, runs the handler and wraps its outcome into a response frame.
//!
//! ```text
//! transport errors ─▶ comm error frame (or silence if not addressed to us)
//! foreign address  ─▶ silence
//! short frame ≠ 0  ─▶ silence
//! long broadcast ≠ 11/21 ─▶ "not implemented"
//! no handler       ─▶ "not implemented"
//! handler          ─▶ success frame │ error frame │ silence
//! ```

use log::{debug, trace};

use crate::command::{
    Addressing, CommandRequest, CMD_READ_ID_BY_LONG_TAG, CMD_READ_ID_BY_TAG, CMD_READ_UNIQUE_ID,
};
use crate::handlers::{lookup, HandlerError};
use crate::response::{comm_error_frame, error_frame, ResponseBuffer, ResponseCode};
use crate::state::{DeviceState, ErrorCounter};
use crate::status::CommErrors;

/// Why no frame is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceReason {
    /// The frame was not addressed to this device.
    AddressMismatch,
    /// A short frame carried a command other than 0.
    ShortFrame,
    /// A tag command did not match this device's tag.
    BadTag,
}

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Transmit this frame.
    Frame(Vec<u8>),
    /// Transmit nothing.
    Silent(SilenceReason),
}

impl Reply {
    /// The frame to transmit, if any.
    pub fn frame(&self) -> Option<&[u8]> {
        match self {
            Reply::Frame(bytes) => Some(bytes),
            Reply::Silent(_) => None,
        }
    }
}

const COMM_ERROR_COUNTERS: [(CommErrors, ErrorCounter); 5] = [
    (CommErrors::PARITY, ErrorCounter::Parity),
    (CommErrors::OVERRUN, ErrorCounter::Overrun),
    (CommErrors::FRAMING, ErrorCounter::Framing),
    (CommErrors::LRC, ErrorCounter::Lrc),
    (CommErrors::BUFFER_OVERFLOW, ErrorCounter::BufferOverflow),
];

/// Routes frames to handlers.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    bad_tag: bool,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last dispatched frame was a tag command that did not match.
    ///
    /// The frame receiver uses this to skip the transmit slot.
    pub fn bad_tag(&self) -> bool {
        self.bad_tag
    }

    /// Processes one frame and returns what to transmit.
    pub fn dispatch(&mut self, state: &mut DeviceState, request: &CommandRequest<'_>) -> Reply {
        self.bad_tag = false;

        if !request.errors.is_empty() {
            for (bit, counter) in COMM_ERROR_COUNTERS {
                if request.errors.contains(bit) {
                    state.count(counter);
                }
            }
            state.host.comm_error = true;
            debug!(
                "Frame from {} master with transport errors 0x{:02X}",
                request.master,
                request.errors.bits()
            );
            if !request.address_valid {
                return Reply::Silent(SilenceReason::AddressMismatch);
            }
            return Reply::Frame(comm_error_frame(request.errors));
        }

        if !request.address_valid {
            return Reply::Silent(SilenceReason::AddressMismatch);
        }
        if request.addressing == Addressing::Short && request.command != CMD_READ_UNIQUE_ID {
            state.count(ErrorCounter::ShortFrameRejected);
            trace!("Short frame with command {} ignored", request.command);
            return Reply::Silent(SilenceReason::ShortFrame);
        }

        let status = state.status_byte(request.master);
        if request.broadcast
            && request.addressing == Addressing::Long
            && request.command != CMD_READ_ID_BY_TAG
            && request.command != CMD_READ_ID_BY_LONG_TAG
        {
            state.count(ErrorCounter::BroadcastRejected);
            return Reply::Frame(error_frame(ResponseCode::NotImplemented, status));
        }

        state.mark_host_active();

        let handler = match lookup(request.command) {
            Some(handler) => handler,
            None => {
                state.count(ErrorCounter::NotImplemented);
                debug!("Command {} not implemented", request.command);
                return Reply::Frame(error_frame(ResponseCode::NotImplemented, status));
            }
        };

        let mut buf = ResponseBuffer::new();
        let outcome = handler(state, request, &mut buf);
        // status reflects the handler's effects, e.g. a config change or a fixed loop
        let status = state.status_byte(request.master);
        let reply = match outcome {
            Ok(()) => {
                debug!(
                    "Command {} from {} master: {} payload bytes",
                    request.command,
                    request.master,
                    buf.payload_len()
                );
                Reply::Frame(buf.finish(status))
            }
            Err(HandlerError::Code(code)) => {
                match code {
                    ResponseCode::TooFewDataBytes => state.count(ErrorCounter::TooFewDataBytes),
                    ResponseCode::DeviceBusy => state.count(ErrorCounter::DeviceBusy),
                    _ => {}
                }
                debug!(
                    "Command {} from {} master rejected: {:?}",
                    request.command, request.master, code
                );
                Reply::Frame(error_frame(code, status))
            }
            Err(HandlerError::Silent) => {
                self.bad_tag = true;
                state.count(ErrorCounter::TagMismatch);
                Reply::Silent(SilenceReason::BadTag)
            }
        };

        if matches!(reply, Reply::Frame(_)) {
            state.volatile.cold_start[request.master.index()] = false;
        }
        if state.reset_requested {
            state.perform_reset();
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CMD_READ_PV, CMD_WRITE_MESSAGE};
    use crate::config::DeviceConfig;
    use crate::handlers::implemented_commands;
    use crate::status::{Master, COLD_START, CONFIG_CHANGED};
    use crate::utils::pack_ascii;

    fn setup() -> (Dispatcher, DeviceState) {
        let state = DeviceState::new(DeviceConfig::new(0x00ABCD).with_tag("TT-7")).unwrap();
        (Dispatcher::new(), state)
    }

    #[test]
    fn test_comm_error_frame() {
        let (mut dispatcher, mut state) = setup();
        let errors = CommErrors::PARITY | CommErrors::FRAMING;
        let request =
            CommandRequest::long(Master::Primary, CMD_READ_UNIQUE_ID, &[]).with_errors(errors);
        let reply = dispatcher.dispatch(&mut state, &request);
        assert_eq!(reply, Reply::Frame(vec![2, 0xD0, 0]));
        assert_eq!(state.counter(ErrorCounter::Parity), 1);
        assert_eq!(state.counter(ErrorCounter::Framing), 1);
        assert_eq!(state.counter(ErrorCounter::Lrc), 0);
        assert!(state.host.comm_error);
        // cold start survives a comm error reply
        assert!(state.volatile.cold_start[0]);
    }

    #[test]
    fn test_comm_error_foreign_address_silent() {
        let (mut dispatcher, mut state) = setup();
        let request = CommandRequest::long(Master::Primary, CMD_READ_UNIQUE_ID, &[])
            .with_errors(CommErrors::LRC)
            .with_address_valid(false);
        assert_eq!(
            dispatcher.dispatch(&mut state, &request),
            Reply::Silent(SilenceReason::AddressMismatch)
        );
        assert_eq!(state.counter(ErrorCounter::Lrc), 1);
    }

    #[test]
    fn test_short_frame_rules() {
        let (mut dispatcher, mut state) = setup();
        let request = CommandRequest::short(Master::Primary, CMD_READ_PV, &[]);
        assert_eq!(
            dispatcher.dispatch(&mut state, &request),
            Reply::Silent(SilenceReason::ShortFrame)
        );
        assert_eq!(state.counter(ErrorCounter::ShortFrameRejected), 1);

        let request = CommandRequest::short(Master::Primary, CMD_READ_UNIQUE_ID, &[]);
        let frame = dispatcher.dispatch(&mut state, &request);
        assert_eq!(frame.frame().map(|f| f[0]), Some(24));
    }

    #[test]
    fn test_broadcast_only_for_tag_commands() {
        let (mut dispatcher, mut state) = setup();
        let request = CommandRequest::long(Master::Primary, CMD_READ_PV, &[]).with_broadcast();
        let reply = dispatcher.dispatch(&mut state, &request);
        assert_eq!(reply.frame().map(|f| f[1]), Some(64));
        assert_eq!(state.counter(ErrorCounter::BroadcastRejected), 1);

        let tag = pack_ascii("TT-7", 6).unwrap();
        let request =
            CommandRequest::long(Master::Primary, CMD_READ_ID_BY_TAG, &tag).with_broadcast();
        let reply = dispatcher.dispatch(&mut state, &request);
        assert_eq!(reply.frame().map(|f| f[1]), Some(0));
    }

    #[test]
    fn test_short_broadcast_identity() {
        let (mut dispatcher, mut state) = setup();
        let request =
            CommandRequest::short(Master::Primary, CMD_READ_UNIQUE_ID, &[]).with_broadcast();
        let reply = dispatcher.dispatch(&mut state, &request);
        assert_eq!(reply.frame().map(|f| (f[0], f[1])), Some((24, 0)));
        assert_eq!(state.counter(ErrorCounter::BroadcastRejected), 0);
    }

    #[test]
    fn test_unknown_command() {
        let (mut dispatcher, mut state) = setup();
        let request = CommandRequest::long(Master::Secondary, 200, &[]);
        let reply = dispatcher.dispatch(&mut state, &request);
        assert_eq!(reply.frame().map(|f| f.len()), Some(3));
        assert_eq!(reply.frame().map(|f| f[1]), Some(64));
        assert_eq!(state.counter(ErrorCounter::NotImplemented), 1);
    }

    #[test]
    fn test_byte_count_for_every_command() {
        let (mut dispatcher, mut state) = setup();
        crate::bridge::handle_message(&mut state, b"U,42480000,41A00000,41400000,00\n");
        let data = [0u8; 32];
        for command in implemented_commands() {
            for len in [0, 1, 2, 4, 9, 24, 32] {
                let request = CommandRequest::long(Master::Primary, command, &data[..len]);
                if let Reply::Frame(frame) = dispatcher.dispatch(&mut state, &request) {
                    assert_eq!(
                        frame[0] as usize,
                        frame.len() - 1,
                        "command {} with {} data bytes",
                        command,
                        len
                    );
                }
            }
        }
    }

    #[test]
    fn test_bad_tag_sets_flag() {
        let (mut dispatcher, mut state) = setup();
        let tag = pack_ascii("OTHER", 6).unwrap();
        let request = CommandRequest::long(Master::Primary, CMD_READ_ID_BY_TAG, &tag);
        assert_eq!(
            dispatcher.dispatch(&mut state, &request),
            Reply::Silent(SilenceReason::BadTag)
        );
        assert!(dispatcher.bad_tag());
        assert_eq!(state.counter(ErrorCounter::TagMismatch), 1);

        let request = CommandRequest::long(Master::Primary, CMD_READ_UNIQUE_ID, &[]);
        dispatcher.dispatch(&mut state, &request);
        assert!(!dispatcher.bad_tag());
    }

    #[test]
    fn test_cold_start_cleared_per_master() {
        let (mut dispatcher, mut state) = setup();
        let request = CommandRequest::long(Master::Primary, CMD_READ_UNIQUE_ID, &[]);
        let reply = dispatcher.dispatch(&mut state, &request);
        assert_ne!(reply.frame().map(|f| f[2] & COLD_START), Some(0));

        let reply = dispatcher.dispatch(&mut state, &request);
        assert_eq!(reply.frame().map(|f| f[2] & COLD_START), Some(0));
        assert!(state.volatile.cold_start[1]);
    }

    #[test]
    fn test_status_reflects_write() {
        let (mut dispatcher, mut state) = setup();
        let data = [0x20u8; 24];
        let request = CommandRequest::long(Master::Primary, CMD_WRITE_MESSAGE, &data);
        let reply = dispatcher.dispatch(&mut state, &request);
        let frame = reply.frame().unwrap();
        assert_eq!(frame[0], 26);
        assert_ne!(frame[2] & CONFIG_CHANGED, 0);
        assert_eq!(state.counter(ErrorCounter::TooFewDataBytes), 0);

        let request = CommandRequest::long(Master::Primary, CMD_WRITE_MESSAGE, &data[..3]);
        let reply = dispatcher.dispatch(&mut state, &request);
        assert_eq!(reply.frame().map(|f| f[1]), Some(5));
        assert_eq!(state.counter(ErrorCounter::TooFewDataBytes), 1);
    }
}
