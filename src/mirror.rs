//! Mirror of the analog module's sensor configuration database.
//!
//! The analog module owns the sensor configuration; this device keeps a
//! byte-exact copy that is loaded in chunks over the bridge and accepted
//! only when the trailing checksum matches. Fields are read through typed
//! [`Field`] descriptors, each pointing at a fixed offset of the image.
//!
//! # Image layout
//!
//! All multi-byte values are big-endian.
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0 | PV unit |
//! | 1 | SV unit |
//! | 2 | PV classification |
//! | 3 | SV classification |
//! | 4 | transfer function |
//! | 5 | alarm selection |
//! | 6..9 | transducer serial number |
//! | 9 | write protect |
//! | 10..14 | upper range value |
//! | 14..18 | lower range value |
//! | 18..22 | upper sensor limit |
//! | 22..26 | lower sensor limit |
//! | 26..30 | minimum span |
//! | 30..34 | damping |
//! | 34..38 | SV upper sensor limit |
//! | 38..42 | SV lower sensor limit |
//! | 42..54 | module calibration, not interpreted here |
//! | 54..58 | acquisition period |
//! | 58..60 | reserved |
//! | 60..62 | checksum over bytes 0..60 |
//!
//! # Example
//!
//! ```
//! use hart_slave::mirror::{self, SensorConfigMirror, MIRROR_LEN};
//!
//! let mut image = [0u8; MIRROR_LEN];
//! image[0] = 19; // PV unit
//! SensorConfigMirror::seal(&mut image);
//!
//! let mut db = SensorConfigMirror::new();
//! db.begin_load();
//! db.write_chunk(0, &image).unwrap();
//! db.finish_load().unwrap();
//! assert!(db.is_valid());
//! assert_eq!(db.get(mirror::PV_UNIT), 19);
//! ```

use std::marker::PhantomData;

use crate::error::BridgeError;
use crate::status::UNIT_NOT_USED;
use crate::utils::checksum16;

/// Size of the configuration image in bytes.
pub const MIRROR_LEN: usize = 62;
/// Offset of the trailing checksum.
pub const CHECKSUM_OFFSET: usize = 60;

/// A value stored in the configuration image.
pub trait FieldValue: Sized {
    /// Number of bytes the value occupies.
    const SIZE: usize;
    /// Reads the value from exactly `SIZE` bytes.
    fn read(bytes: &[u8]) -> Self;
    /// Writes the value into exactly `SIZE` bytes.
    fn write(self, bytes: &mut [u8]);
}

impl FieldValue for u8 {
    const SIZE: usize = 1;
    fn read(bytes: &[u8]) -> Self {
        bytes[0]
    }
    fn write(self, bytes: &mut [u8]) {
        bytes[0] = self;
    }
}

impl FieldValue for u16 {
    const SIZE: usize = 2;
    fn read(bytes: &[u8]) -> Self {
        u16::from_be_bytes([bytes[0], bytes[1]])
    }
    fn write(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_be_bytes());
    }
}

impl FieldValue for u32 {
    const SIZE: usize = 4;
    fn read(bytes: &[u8]) -> Self {
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    fn write(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_be_bytes());
    }
}

impl FieldValue for f32 {
    const SIZE: usize = 4;
    fn read(bytes: &[u8]) -> Self {
        f32::from_bits(u32::read(bytes))
    }
    fn write(self, bytes: &mut [u8]) {
        self.to_bits().write(bytes);
    }
}

impl FieldValue for [u8; 3] {
    const SIZE: usize = 3;
    fn read(bytes: &[u8]) -> Self {
        [bytes[0], bytes[1], bytes[2]]
    }
    fn write(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self);
    }
}

/// Typed pointer to a value in the configuration image.
///
/// Only the offset is stored, so fields are free to copy and compare.
#[derive(Debug, PartialEq, Eq)]
pub struct Field<T> {
    offset: usize,
    ty: PhantomData<T>,
}

impl<T> Field<T> {
    /// Creates a field starting at `offset`.
    pub const fn new(offset: usize) -> Self {
        Self {
            offset,
            ty: PhantomData,
        }
    }

    /// First byte of the field in the image.
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Field<T> {}

/// PV unit code.
pub const PV_UNIT: Field<u8> = Field::new(0);
/// SV unit code, [`UNIT_NOT_USED`] when the device has no SV.
pub const SV_UNIT: Field<u8> = Field::new(1);
/// PV device variable classification.
pub const PV_CLASSIFICATION: Field<u8> = Field::new(2);
/// SV device variable classification.
pub const SV_CLASSIFICATION: Field<u8> = Field::new(3);
/// Transfer function code of the analog output.
pub const TRANSFER_FUNCTION: Field<u8> = Field::new(4);
/// Alarm selection code of the analog output.
pub const ALARM_SELECTION: Field<u8> = Field::new(5);
/// Transducer serial number.
pub const TRANSDUCER_SERIAL: Field<[u8; 3]> = Field::new(6);
/// Nonzero when the device is write protected.
pub const WRITE_PROTECT: Field<u8> = Field::new(9);
/// PV upper range value.
pub const UPPER_RANGE_VALUE: Field<f32> = Field::new(10);
/// PV lower range value.
pub const LOWER_RANGE_VALUE: Field<f32> = Field::new(14);
/// PV upper sensor limit.
pub const UPPER_SENSOR_LIMIT: Field<f32> = Field::new(18);
/// PV lower sensor limit.
pub const LOWER_SENSOR_LIMIT: Field<f32> = Field::new(22);
/// PV minimum span.
pub const MINIMUM_SPAN: Field<f32> = Field::new(26);
/// PV damping in seconds.
pub const DAMPING: Field<f32> = Field::new(30);
/// SV upper sensor limit.
pub const SV_UPPER_SENSOR_LIMIT: Field<f32> = Field::new(34);
/// SV lower sensor limit.
pub const SV_LOWER_SENSOR_LIMIT: Field<f32> = Field::new(38);
/// Acquisition period in 1/32 ms.
pub const ACQUISITION_PERIOD: Field<u32> = Field::new(54);
/// Checksum over bytes `0..CHECKSUM_OFFSET`.
pub const CHECKSUM: Field<u16> = Field::new(CHECKSUM_OFFSET);

/// Local copy of the analog module's configuration database.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfigMirror {
    image: [u8; MIRROR_LEN],
    valid: bool,
    loading: bool,
}

impl Default for SensorConfigMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorConfigMirror {
    /// Creates an empty, invalid mirror.
    pub fn new() -> Self {
        let mut image = [0u8; MIRROR_LEN];
        UNIT_NOT_USED.write(&mut image[SV_UNIT.offset()..][..1]);
        Self {
            image,
            valid: false,
            loading: false,
        }
    }

    /// Writes the checksum of `image` into its trailing field.
    pub fn seal(image: &mut [u8; MIRROR_LEN]) {
        let sum = checksum16(&image[..CHECKSUM_OFFSET]);
        sum.write(&mut image[CHECKSUM_OFFSET..]);
    }

    /// Returns the field's current value.
    pub fn get<T: FieldValue>(&self, field: Field<T>) -> T {
        T::read(&self.image[field.offset()..][..T::SIZE])
    }

    /// Overwrites the field and reseals the checksum.
    pub fn set<T: FieldValue>(&mut self, field: Field<T>, value: T) {
        value.write(&mut self.image[field.offset()..][..T::SIZE]);
        Self::seal(&mut self.image);
    }

    /// Raw image bytes.
    pub fn image(&self) -> &[u8; MIRROR_LEN] {
        &self.image
    }

    /// Whether the image passed its checksum and may be relied on.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether a chunked load is in progress.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Whether the device reports a secondary variable.
    pub fn sv_present(&self) -> bool {
        self.valid && self.get(SV_UNIT) != UNIT_NOT_USED
    }

    /// Whether configuration writes are refused.
    pub fn write_protected(&self) -> bool {
        self.valid && self.get(WRITE_PROTECT) != 0
    }

    /// Starts a chunked load; the mirror is invalid until it completes.
    pub fn begin_load(&mut self) {
        self.loading = true;
        self.valid = false;
    }

    /// Copies a decoded chunk into the image.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ChunkOutOfRange` if the chunk does not fit; the
    /// image is left unchanged in that case.
    pub fn write_chunk(&mut self, offset: u8, bytes: &[u8]) -> Result<(), BridgeError> {
        let start = usize::from(offset);
        let end = start + bytes.len();
        if end > MIRROR_LEN {
            return Err(BridgeError::ChunkOutOfRange {
                offset,
                count: bytes.len().min(usize::from(u8::MAX)) as u8,
            });
        }
        self.image[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Completes a chunked load by verifying the checksum.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ChecksumMismatch` and leaves the mirror invalid
    /// if the computed and transmitted checksums differ.
    pub fn finish_load(&mut self) -> Result<(), BridgeError> {
        self.loading = false;
        let expected = self.get(CHECKSUM);
        let computed = checksum16(&self.image[..CHECKSUM_OFFSET]);
        if expected != computed {
            self.valid = false;
            return Err(BridgeError::ChecksumMismatch { expected, computed });
        }
        self.valid = true;
        Ok(())
    }

    /// Marks the whole mirror invalid and abandons any load in progress.
    pub fn invalidate(&mut self) {
        self.valid = false;
        self.loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> [u8; MIRROR_LEN] {
        let mut image = [0u8; MIRROR_LEN];
        for (i, b) in image.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(7);
        }
        image[0] = 19;
        image[1] = 32;
        image[9] = 0;
        SensorConfigMirror::seal(&mut image);
        image
    }

    #[test]
    fn test_new_is_invalid() {
        let db = SensorConfigMirror::new();
        assert!(!db.is_valid());
        assert!(!db.is_loading());
        assert!(!db.sv_present());
        assert_eq!(db.get(SV_UNIT), UNIT_NOT_USED);
    }

    #[test]
    fn test_field_layout_fits() {
        assert_eq!(ACQUISITION_PERIOD.offset() + 4, 58);
        assert_eq!(CHECKSUM.offset() + 2, MIRROR_LEN);
        assert_eq!(TRANSDUCER_SERIAL.offset() + 3, WRITE_PROTECT.offset());
    }

    #[test]
    fn test_chunked_load_valid() {
        let image = sample_image();
        let mut db = SensorConfigMirror::new();
        db.begin_load();
        assert!(db.is_loading());
        db.write_chunk(0, &image[..24]).unwrap();
        db.write_chunk(24, &image[24..48]).unwrap();
        db.write_chunk(48, &image[48..]).unwrap();
        db.finish_load().unwrap();

        assert!(db.is_valid());
        assert!(!db.is_loading());
        assert_eq!(db.image(), &image);
        assert!(db.sv_present());
    }

    #[test]
    fn test_checksum_mismatch_invalidates() {
        let mut image = sample_image();
        image[17] ^= 0x04;
        let mut db = SensorConfigMirror::new();
        db.begin_load();
        db.write_chunk(0, &image).unwrap();
        let err = db.finish_load().unwrap_err();
        assert!(matches!(err, BridgeError::ChecksumMismatch { .. }));
        assert!(!db.is_valid());
    }

    #[test]
    fn test_chunk_out_of_range() {
        let mut db = SensorConfigMirror::new();
        let before = *db.image();
        let err = db.write_chunk(60, &[1, 2, 3]).unwrap_err();
        assert_eq!(err, BridgeError::ChunkOutOfRange { offset: 60, count: 3 });
        assert_eq!(db.image(), &before);
    }

    #[test]
    fn test_set_reseals() {
        let image = sample_image();
        let mut db = SensorConfigMirror::new();
        db.begin_load();
        db.write_chunk(0, &image).unwrap();
        db.finish_load().unwrap();

        db.set(UPPER_RANGE_VALUE, 250.0);
        db.set(LOWER_RANGE_VALUE, -5.0);
        assert_eq!(db.get(UPPER_RANGE_VALUE), 250.0);
        assert_eq!(db.get(LOWER_RANGE_VALUE), -5.0);
        assert_eq!(db.get(CHECKSUM), checksum16(&db.image()[..CHECKSUM_OFFSET]));
    }

    #[test]
    fn test_write_protect() {
        let mut image = sample_image();
        image[WRITE_PROTECT.offset()] = 1;
        SensorConfigMirror::seal(&mut image);
        let mut db = SensorConfigMirror::new();
        assert!(!db.write_protected());
        db.begin_load();
        db.write_chunk(0, &image).unwrap();
        db.finish_load().unwrap();
        assert!(db.write_protected());
    }
}
