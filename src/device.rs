//! The device facade.
//!
//! [`Device`] owns the state store and the dispatcher and is the only type
//! the surrounding firmware needs: the frame receiver calls
//! [`handle_frame`](Device::handle_frame), the analog module link calls
//! [`handle_bridge_message`](Device::handle_bridge_message) and the flash
//! driver polls [`take_persistence_intent`](Device::take_persistence_intent).
//!
//! Both engines mutate the same state. When they run on different threads,
//! wrap the device in a [`SharedDevice`], which serializes every call.
//!
//! # Example
//!
//! ```
//! use hart_slave::{CommandRequest, Device, DeviceConfig, Master, Reply};
//!
//! let mut device = Device::new(DeviceConfig::new(0x0A0B0C).with_tag("FT-101")).unwrap();
//!
//! let reply = device.handle_frame(&CommandRequest::long(Master::Primary, 0, &[]));
//! let frame = reply.frame().unwrap();
//! assert_eq!(frame[0], 24);
//! assert_eq!(&frame[12..15], &[0x0A, 0x0B, 0x0C]);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use crate::bridge;
use crate::command::CommandRequest;
use crate::config::DeviceConfig;
use crate::dispatch::{Dispatcher, Reply};
use crate::error::Result;
use crate::persistence::PersistenceIntent;
use crate::state::{DeviceIdentityPersisted, DeviceState, ErrorCounter};

/// A field device application layer.
#[derive(Debug, Clone)]
pub struct Device {
    state: DeviceState,
    dispatcher: Dispatcher,
}

impl Device {
    /// Creates a device in its power-up state.
    ///
    /// # Errors
    ///
    /// Returns `HartError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let state = DeviceState::new(config)?;
        info!(
            "Device {:02X?} '{}' created, polling address {}",
            state.persisted.device_id,
            state.persisted.tag_text(),
            state.persisted.polling_address
        );
        Ok(Self {
            state,
            dispatcher: Dispatcher::new(),
        })
    }

    /// Processes one command frame.
    pub fn handle_frame(&mut self, request: &CommandRequest<'_>) -> Reply {
        self.dispatcher.dispatch(&mut self.state, request)
    }

    /// Whether the last frame was a tag command that did not match.
    pub fn bad_tag(&self) -> bool {
        self.dispatcher.bad_tag()
    }

    /// Processes one analog module message and returns the reply to send.
    pub fn handle_bridge_message(&mut self, message: &[u8]) -> Vec<u8> {
        bridge::handle_message(&mut self.state, message)
    }

    /// Advances the free running clock by `ticks` of 1/32 ms.
    pub fn advance_clock(&mut self, ticks: u32) {
        self.state.clock = self.state.clock.wrapping_add(ticks);
    }

    /// Returns the next flash operation to perform, if any, and marks the
    /// device busy until [`complete_persistence`](Self::complete_persistence).
    pub fn take_persistence_intent(&mut self) -> Option<PersistenceIntent> {
        self.state.persistence.take_intent()
    }

    /// The identity image the flash driver writes on a flush.
    pub fn identity_image(&self) -> Vec<u8> {
        self.state.persisted.to_bytes()
    }

    /// Reports the outcome of a flash operation.
    pub fn complete_persistence(&mut self, intent: PersistenceIntent, ok: bool) {
        if intent == PersistenceIntent::Flush && !ok {
            self.state.count(ErrorCounter::FlashWriteFailure);
        }
        self.state.persistence.complete(intent, ok);
    }

    /// Replaces the persisted identity with an image read from flash.
    ///
    /// # Errors
    ///
    /// Returns `HartError::InvalidImage` if the image does not decode; the
    /// current identity is kept in that case.
    pub fn restore_identity(&mut self, image: &[u8]) -> Result<()> {
        match DeviceIdentityPersisted::from_bytes(image) {
            Ok(identity) => {
                info!(
                    "Identity restored: '{}' ({}), change counter {}",
                    identity.tag_text(),
                    identity.long_tag_text(),
                    identity.config_change_counter
                );
                self.state.persisted = identity;
                Ok(())
            }
            Err(err) => {
                warn!("Identity image rejected: {}", err);
                Err(err)
            }
        }
    }

    /// Read access to the state store.
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Write access to the state store.
    pub fn state_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }
}

/// A [`Device`] shared between the command and bridge engines.
///
/// Every method locks for the duration of one call, so a frame and a bridge
/// message are never processed concurrently. A panic inside a call does not
/// poison the device for later callers.
///
/// # Example
///
/// ```
/// use std::thread;
/// use hart_slave::{CommandRequest, DeviceConfig, Master, SharedDevice};
///
/// let device = SharedDevice::new(DeviceConfig::new(7)).unwrap();
/// let bridge_side = device.clone();
/// let handle = thread::spawn(move || bridge_side.handle_bridge_message(b"P,00\n"));
///
/// let reply = device.handle_frame(&CommandRequest::long(Master::Primary, 0, &[]));
/// assert!(reply.frame().is_some());
/// assert_eq!(handle.join().unwrap(), b"A,00,00\n");
/// ```
#[derive(Debug, Clone)]
pub struct SharedDevice {
    inner: Arc<Mutex<Device>>,
}

impl SharedDevice {
    /// Creates a shared device in its power-up state.
    ///
    /// # Errors
    ///
    /// Returns `HartError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        Ok(Self::from(Device::new(config)?))
    }

    fn lock(&self) -> MutexGuard<'_, Device> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`Device::handle_frame`].
    pub fn handle_frame(&self, request: &CommandRequest<'_>) -> Reply {
        self.lock().handle_frame(request)
    }

    /// See [`Device::handle_bridge_message`].
    pub fn handle_bridge_message(&self, message: &[u8]) -> Vec<u8> {
        self.lock().handle_bridge_message(message)
    }

    /// Runs `f` with exclusive access to the device.
    pub fn with<R>(&self, f: impl FnOnce(&mut Device) -> R) -> R {
        f(&mut self.lock())
    }
}

impl From<Device> for SharedDevice {
    fn from(device: Device) -> Self {
        Self {
            inner: Arc::new(Mutex::new(device)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{
        CMD_DEVICE_RESET, CMD_FIXED_CURRENT, CMD_READ_DEVICE_VARIABLES, CMD_READ_ID_BY_TAG,
        CMD_READ_LOOP_CURRENT, CMD_READ_UNIQUE_ID, CMD_RESET_CONFIG_CHANGED, CMD_WRITE_LONG_TAG,
        CMD_WRITE_MESSAGE,
    };
    use crate::dispatch::SilenceReason;
    use crate::error::HartError;
    use crate::status::{Master, COLD_START, CONFIG_CHANGED, LOOP_CURRENT_FIXED};
    use crate::utils::pack_ascii;

    fn device() -> Device {
        Device::new(DeviceConfig::new(0x0A0B0C).with_tag("FT-101")).unwrap()
    }

    fn send(device: &mut Device, master: Master, command: u8, data: &[u8]) -> Vec<u8> {
        device
            .handle_frame(&CommandRequest::long(master, command, data))
            .frame()
            .expect("frame")
            .to_vec()
    }

    #[test]
    fn test_identity_frame() {
        let mut device = device();
        let frame = send(&mut device, Master::Primary, CMD_READ_UNIQUE_ID, &[]);
        assert_eq!(frame[0], 24);
        assert_eq!(frame[1], 0);
        assert_eq!(frame[3], 254);
        assert_eq!(&frame[12..15], &[0x0A, 0x0B, 0x0C]);
    }

    #[test]
    fn test_tag_match_equals_identity() {
        let mut device = device();
        let tag = pack_ascii("FT-101", 6).unwrap();
        let by_tag = send(&mut device, Master::Primary, CMD_READ_ID_BY_TAG, &tag);
        let identity = send(&mut device, Master::Primary, CMD_READ_UNIQUE_ID, &[]);
        // cold start was cleared by the first frame
        assert_eq!(by_tag[3..], identity[3..]);
        assert_eq!(by_tag[2] & !COLD_START, identity[2]);

        let other = pack_ascii("XX-999", 6).unwrap();
        let reply =
            device.handle_frame(&CommandRequest::long(Master::Primary, CMD_READ_ID_BY_TAG, &other));
        assert_eq!(reply, Reply::Silent(SilenceReason::BadTag));
        assert!(device.bad_tag());
    }

    #[test]
    fn test_counter_increments_per_write() {
        let mut device = device();
        for expected in 1..=3u16 {
            send(&mut device, Master::Primary, CMD_WRITE_MESSAGE, &[0x82; 24]);
            assert_eq!(device.state().persisted.config_change_counter, expected);
        }
        let frame = send(&mut device, Master::Secondary, CMD_READ_UNIQUE_ID, &[]);
        assert_eq!(&frame[17..19], &[0x00, 0x03]);
        assert_ne!(frame[2] & CONFIG_CHANGED, 0);
    }

    #[test]
    fn test_reserved_variable_code() {
        let mut device = device();
        let frame = send(&mut device, Master::Primary, CMD_READ_DEVICE_VARIABLES, &[0, 255]);
        assert_eq!(frame[0], 2);
        assert_eq!(frame[1], 2);
    }

    #[test]
    fn test_reset_config_changed_flow() {
        let mut device = device();
        send(&mut device, Master::Primary, CMD_WRITE_LONG_TAG, &[b'A'; 32]);

        let frame = send(&mut device, Master::Primary, CMD_RESET_CONFIG_CHANGED, &[0x00, 0x07]);
        assert_eq!(frame[1], 9);
        assert_ne!(frame[2] & CONFIG_CHANGED, 0);

        let frame = send(&mut device, Master::Primary, CMD_RESET_CONFIG_CHANGED, &[0x00, 0x01]);
        assert_eq!(frame, vec![4, 0, frame[2], 0x00, 0x01]);
        assert_eq!(frame[2] & CONFIG_CHANGED, 0);

        let frame = send(&mut device, Master::Secondary, CMD_READ_UNIQUE_ID, &[]);
        assert_ne!(frame[2] & CONFIG_CHANGED, 0);
        assert!(device.state().persistence.is_dirty());
    }

    #[test]
    fn test_flush_cycle_and_busy() {
        let mut device = device();
        send(&mut device, Master::Primary, CMD_WRITE_MESSAGE, &[0x82; 24]);
        let intent = device.take_persistence_intent();
        assert_eq!(intent, Some(PersistenceIntent::Flush));

        let frame = send(&mut device, Master::Primary, CMD_READ_UNIQUE_ID, &[]);
        assert_eq!(frame[1], 32);
        assert_eq!(device.state().counter(ErrorCounter::DeviceBusy), 1);

        let image = device.identity_image();
        device.complete_persistence(PersistenceIntent::Flush, true);
        assert!(!device.state().persistence.is_dirty());

        let mut restored = self::device();
        restored.restore_identity(&image).unwrap();
        assert_eq!(restored.state().persisted, device.state().persisted);
    }

    #[test]
    fn test_failed_flush_is_retried() {
        let mut device = device();
        send(&mut device, Master::Primary, CMD_WRITE_MESSAGE, &[0x82; 24]);
        let intent = device.take_persistence_intent().unwrap();
        device.complete_persistence(intent, false);
        assert_eq!(device.state().counter(ErrorCounter::FlashWriteFailure), 1);
        assert_eq!(device.take_persistence_intent(), Some(PersistenceIntent::Flush));
    }

    #[test]
    fn test_restore_rejects_corrupt_image() {
        let mut device = device();
        let mut image = device.identity_image();
        image[20] ^= 0x55;
        assert!(matches!(
            device.restore_identity(&image),
            Err(HartError::InvalidImage { .. })
        ));
    }

    #[test]
    fn test_device_reset_restores_cold_start() {
        let mut device = device();
        device.handle_bridge_message(b"U,41200000,00000000,41400000,00\n");
        send(&mut device, Master::Primary, CMD_FIXED_CURRENT, &8.0f32.to_be_bytes());
        let frame = send(&mut device, Master::Primary, CMD_READ_LOOP_CURRENT, &[]);
        assert_ne!(frame[2] & LOOP_CURRENT_FIXED, 0);
        assert_eq!(frame[2] & COLD_START, 0);

        let frame = send(&mut device, Master::Primary, CMD_DEVICE_RESET, &[]);
        assert_eq!(frame[..2], [2, 0]);
        let state = device.state();
        assert!(state.loop_current.is_operational());
        assert_eq!(state.volatile.cold_start, [true; 2]);
        assert_eq!(state.process.reporting_current, 12.0);
        assert!(!state.bridge.queue.is_empty());
    }

    #[test]
    fn test_clock_wraps() {
        let mut device = device();
        device.advance_clock(u32::MAX);
        device.advance_clock(2);
        assert_eq!(device.state().clock, 1);
    }

    #[test]
    fn test_shared_device() {
        let shared = SharedDevice::new(DeviceConfig::new(5)).unwrap();
        let other = shared.clone();
        let reply = std::thread::spawn(move || {
            other.handle_frame(&CommandRequest::long(Master::Secondary, CMD_READ_UNIQUE_ID, &[]))
        })
        .join()
        .unwrap();
        assert!(reply.frame().is_some());
        assert!(!shared.with(|d| d.state().volatile.cold_start[1]));
        assert!(shared.with(|d| d.state().volatile.cold_start[0]));
    }
}
