//! # HART Field Device Application Layer
//!
//! The application layer of a HART slave: it answers command frames from up
//! to two bus masters, keeps the device identity and diagnostics, controls the
//! 4-20 mA loop current and talks to the analog module over an ASCII-hex
//! bridge.
//!
//! This is an **application-layer-only** library. Preamble detection, byte
//! timing, parity, LRC and the UART live in the surrounding firmware, which
//! hands over checked frames and transmits whatever comes back. Storage is
//! equally external: the library raises persistence intents and the flash
//! driver carries them out.
//!
//! ## Features
//!
//! - **Deterministic**: one frame in, at most one frame out
//! - **Ordered preconditions**: byte count, busy, write protect, then
//!   command validation, exactly as masters expect them on the wire
//! - **Loop current control**: fixed current mode, zero and gain trim with
//!   periodic re-assertion towards the analog module
//! - **Configuration mirror**: the analog module's configuration is loaded in
//!   checksummed chunks and gates every command that depends on it
//! - **No panics**: malformed frames and bridge messages become response
//!   codes and NACKs, never unwinds
//!
//! ## Quick Start
//!
//! ```
//! use hart_slave::{CommandRequest, Device, DeviceConfig, Master, Reply};
//!
//! fn main() -> hart_slave::Result<()> {
//!     let config = DeviceConfig::new(0x00_12_34)
//!         .with_tag("FT-101")
//!         .with_long_tag("Flow transmitter line 4");
//!     let mut device = Device::new(config)?;
//!
//!     // the analog module reports PV 12.5, SV 0, loop current 12 mA
//!     let ack = device.handle_bridge_message(b"U,41480000,00000000,41400000,00\n");
//!     assert!(ack.starts_with(b"A,"));
//!
//!     // command 1: read primary variable
//!     match device.handle_frame(&CommandRequest::long(Master::Primary, 1, &[])) {
//!         Reply::Frame(frame) => assert_eq!(&frame[4..8], &12.5f32.to_be_bytes()),
//!         Reply::Silent(reason) => panic!("no answer: {:?}", reason),
//!     }
//!
//!     // hand pending flash work to the driver
//!     while let Some(intent) = device.take_persistence_intent() {
//!         let _image = device.identity_image();
//!         device.complete_persistence(intent, true);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Response Frames
//!
//! | Frame | Bytes |
//! |-------|-------|
//! | Success | `[count, 0, status, payload...]` |
//! | Command error | `[2, code, status]` |
//! | Communication error | `[2, 0x80 \| errors, 0]` |
//!
//! `status` is the field device status byte of the master that sent the
//! frame; see [`status`] for its bits.
//!
//! ## Implemented Commands
//!
//! | Commands | Purpose |
//! |----------|---------|
//! | 0, 11, 21 | identification (by address, tag or long tag) |
//! | 1, 2, 3, 9 | process data |
//! | 6, 7 | polling address and loop current mode |
//! | 8, 14, 15, 54 | variable and transducer information |
//! | 12, 13, 16, 17, 18, 19, 20, 22 | texts and assembly number |
//! | 35 | range values |
//! | 38, 48 | configuration changed flag, additional status |
//! | 39 | flash burn and restore |
//! | 40, 45, 46 | fixed current and trim |
//! | 42 | device reset |
//! | 128, 129 | error counters, device identifier (device specific) |
//!
//! ## Error Handling
//!
//! Wire-level failures are response codes, not Rust errors. Library API
//! failures use [`HartError`]:
//!
//! ```
//! use hart_slave::{Device, DeviceConfig, HartError};
//!
//! match Device::new(DeviceConfig::new(1).with_polling_address(64)) {
//!     Err(HartError::InvalidConfig { field, reason }) => {
//!         assert_eq!(field, "polling_address");
//!         println!("rejected: {}", reason);
//!     }
//!     other => panic!("unexpected: {:?}", other.map(|_| ())),
//! }
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log) facade: `info` for
//! lifecycle events, `warn` for rejected bridge traffic and flash failures,
//! `debug` for every dispatched command and `trace` for queue and counter
//! details. Install any logger implementation to see them.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod command;
pub mod config;
mod device;
pub mod dispatch;
mod error;
pub mod handlers;
pub mod loop_current;
pub mod mirror;
pub mod persistence;
pub mod response;
pub mod state;
pub mod status;
pub mod utils;

// Public re-exports
pub use command::{Addressing, CommandRequest};
pub use config::DeviceConfig;
pub use device::{Device, SharedDevice};
pub use dispatch::{Reply, SilenceReason};
pub use error::{BridgeError, HartError, Result};
pub use persistence::PersistenceIntent;
pub use response::{ResponseBuffer, ResponseCode};
pub use state::DeviceState;
pub use status::{CommErrors, Master};
