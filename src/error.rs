//! Error types for the device application layer.
//!
//! Command-level failures are not errors in the Rust sense: they are wire
//! response codes (see [`ResponseCode`](crate::ResponseCode)). The types here
//! cover failures of the library API itself and decode failures on the
//! analog module bridge.

use thiserror::Error;

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, HartError>;

/// Errors surfaced by the library API.
#[derive(Debug, Error, PartialEq)]
pub enum HartError {
    /// Invalid configuration value.
    #[error("Invalid configuration '{field}': {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: String,
        /// Description of why the value is invalid.
        reason: String,
    },

    /// A non-volatile identity image could not be decoded.
    #[error("Invalid identity image: {reason}")]
    InvalidImage {
        /// Description of the image error.
        reason: String,
    },
}

impl HartError {
    /// Creates a new `InvalidConfig` error.
    ///
    /// # Example
    ///
    /// ```
    /// use hart_slave::HartError;
    ///
    /// let err = HartError::invalid_config("polling_address", "must be 0-63");
    /// ```
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidImage` error.
    pub fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }
}

/// Decode failures of inbound analog module messages.
///
/// Every variant results in a NACK; the message that caused it leaves
/// process variables and the configuration mirror untouched.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The message does not end with the terminator character.
    #[error("missing message terminator")]
    MissingTerminator,

    /// The message type character is not known.
    #[error("unknown message type 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The message has the wrong number of fields.
    #[error("expected {expected} fields, found {found}")]
    FieldCount {
        /// Number of fields the message type requires.
        expected: usize,
        /// Number of fields received.
        found: usize,
    },

    /// A field has the wrong number of characters.
    #[error("field {field} has {found} characters, expected {expected}")]
    FieldLength {
        /// Zero-based field index.
        field: usize,
        /// Required number of characters.
        expected: usize,
        /// Received number of characters.
        found: usize,
    },

    /// A character is not an uppercase hexadecimal digit.
    #[error("invalid hex digit 0x{0:02X}")]
    InvalidHexDigit(u8),

    /// A database chunk does not fit inside the mirror.
    #[error("chunk at offset {offset} with {count} bytes exceeds the mirror")]
    ChunkOutOfRange {
        /// Chunk start offset.
        offset: u8,
        /// Chunk byte count.
        count: u8,
    },

    /// The more-data marker is neither "more" nor "last".
    #[error("invalid more-data marker 0x{0:02X}")]
    InvalidMarker(u8),

    /// The accumulated mirror checksum does not match the transmitted one.
    #[error("checksum mismatch: transmitted 0x{expected:04X}, computed 0x{computed:04X}")]
    ChecksumMismatch {
        /// Checksum carried in the mirror image.
        expected: u16,
        /// Checksum computed over the received bytes.
        computed: u16,
    },
}

impl BridgeError {
    /// Returns the reason code carried in the NACK reply.
    pub fn nack_code(self) -> u8 {
        match self {
            BridgeError::MissingTerminator => 0x01,
            BridgeError::UnknownMessageType(_) => 0x02,
            BridgeError::FieldCount { .. } => 0x03,
            BridgeError::FieldLength { .. } => 0x04,
            BridgeError::InvalidHexDigit(_) => 0x05,
            BridgeError::ChunkOutOfRange { .. } => 0x06,
            BridgeError::InvalidMarker(_) => 0x07,
            BridgeError::ChecksumMismatch { .. } => 0x08,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = HartError::invalid_config("polling_address", "must be 0-63");
        assert_eq!(
            err.to_string(),
            "Invalid configuration 'polling_address': must be 0-63"
        );
    }

    #[test]
    fn test_invalid_hex_display() {
        let err = BridgeError::InvalidHexDigit(b'g');
        assert_eq!(err.to_string(), "invalid hex digit 0x67");
        assert_eq!(err.nack_code(), 0x05);
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let err = BridgeError::ChecksumMismatch {
            expected: 0x1234,
            computed: 0x1235,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: transmitted 0x1234, computed 0x1235"
        );
    }

    #[test]
    fn test_nack_codes_distinct() {
        let errors = [
            BridgeError::MissingTerminator,
            BridgeError::UnknownMessageType(b'X'),
            BridgeError::FieldCount { expected: 2, found: 1 },
            BridgeError::FieldLength { field: 1, expected: 8, found: 7 },
            BridgeError::InvalidHexDigit(b'z'),
            BridgeError::ChunkOutOfRange { offset: 60, count: 4 },
            BridgeError::InvalidMarker(2),
            BridgeError::ChecksumMismatch { expected: 0, computed: 1 },
        ];
        let mut codes: Vec<u8> = errors.iter().map(|e| e.nack_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
