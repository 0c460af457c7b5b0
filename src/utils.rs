//! Conversion helpers shared by the command engine and the bridge.
//!
//! Three families live here:
//!
//! - status byte masking,
//! - packed ASCII, the six-bit text encoding used by tags, descriptors and
//!   messages on the field bus,
//! - uppercase hex ASCII, the field encoding of the analog module bridge.
//!
//! # Example
//!
//! ```
//! use hart_slave::utils::{pack_ascii, unpack_ascii, push_hex_f32, parse_hex_f32};
//!
//! let packed = pack_ascii("FT-101", 6).unwrap();
//! assert_eq!(unpack_ascii(&packed), "FT-101");
//!
//! let mut field = Vec::new();
//! push_hex_f32(&mut field, 20.0);
//! assert_eq!(field, b"41A00000");
//! assert_eq!(parse_hex_f32(&field).unwrap(), 20.0);
//! ```

use crate::error::BridgeError;

/// Sets or clears every bit of `mask` in `value`.
///
/// # Example
///
/// ```
/// use hart_slave::utils::set_mask;
///
/// assert_eq!(set_mask(0x00, 0x41, true), 0x41);
/// assert_eq!(set_mask(0xFF, 0x41, false), 0xBE);
/// ```
#[inline]
pub fn set_mask(value: u8, mask: u8, state: bool) -> u8 {
    if state {
        value | mask
    } else {
        value & !mask
    }
}

/// Formats bytes as space separated uppercase hex, for log output.
///
/// # Example
///
/// ```
/// use hart_slave::utils::format_hex;
///
/// assert_eq!(format_hex(&[0x02, 0x00, 0x50]), "02 00 50");
/// ```
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wrapping 16-bit sum of all bytes.
pub fn checksum16(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Packs text into `width` bytes of packed ASCII.
///
/// Lowercase letters are folded to uppercase and the result is padded
/// with spaces. Returns `None` when the text holds more than
/// `width * 4 / 3` characters or a character outside the packed ASCII set
/// (0x20..=0x5F after folding).
///
/// # Example
///
/// ```
/// use hart_slave::utils::pack_ascii;
///
/// assert_eq!(pack_ascii("ABCD", 3).unwrap(), vec![0x04, 0x20, 0xC4]);
/// assert!(pack_ascii("ABCDE", 3).is_none());
/// assert!(pack_ascii("~", 3).is_none());
/// ```
pub fn pack_ascii(text: &str, width: usize) -> Option<Vec<u8>> {
    let capacity = width * 4 / 3;
    if text.chars().count() > capacity {
        return None;
    }
    let mut sixbits = Vec::with_capacity(capacity);
    for c in text.chars() {
        let c = c.to_ascii_uppercase();
        if !(' '..='_').contains(&c) {
            return None;
        }
        sixbits.push(c as u8 & 0x3F);
    }
    sixbits.resize(capacity, b' ' & 0x3F);

    let mut packed = Vec::with_capacity(width);
    for quad in sixbits.chunks_exact(4) {
        packed.push((quad[0] << 2) | (quad[1] >> 4));
        packed.push((quad[1] << 4) | (quad[2] >> 2));
        packed.push((quad[2] << 6) | quad[3]);
    }
    Some(packed)
}

/// Unpacks packed ASCII bytes into text, dropping trailing spaces.
///
/// Trailing bytes that do not form a complete 3-byte group are ignored.
pub fn unpack_ascii(packed: &[u8]) -> String {
    let mut text = String::with_capacity(packed.len() * 4 / 3);
    for triple in packed.chunks_exact(3) {
        let sixbits = [
            triple[0] >> 2,
            ((triple[0] & 0x03) << 4) | (triple[1] >> 4),
            ((triple[1] & 0x0F) << 2) | (triple[2] >> 6),
            triple[2] & 0x3F,
        ];
        for v in sixbits {
            let c = if v < 0x20 { v | 0x40 } else { v };
            text.push(char::from(c));
        }
    }
    text.truncate(text.trim_end_matches(' ').len());
    text
}

/// Encodes text as ISO Latin-1 padded with zero bytes to `width`.
///
/// Returns `None` when the text is too long or holds a character above
/// U+00FF.
pub fn pad_latin1(text: &str, width: usize) -> Option<Vec<u8>> {
    let mut bytes = Vec::with_capacity(width);
    for c in text.chars() {
        let code = u32::from(c);
        if code > 0xFF || bytes.len() == width {
            return None;
        }
        bytes.push(code as u8);
    }
    bytes.resize(width, 0);
    Some(bytes)
}

/// Decodes zero padded ISO Latin-1 bytes into text.
pub fn trim_latin1(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    bytes[..end].iter().map(|&b| char::from(b)).collect()
}

/// Returns the uppercase hex ASCII digit for the low nibble of `nibble`.
#[inline]
fn hex_digit(nibble: u8) -> u8 {
    b"0123456789ABCDEF"[usize::from(nibble & 0x0F)]
}

/// Returns the value of one uppercase hex ASCII digit.
#[inline]
fn hex_value(digit: u8) -> Result<u8, BridgeError> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(BridgeError::InvalidHexDigit(digit)),
    }
}

/// Appends one byte as two uppercase hex ASCII characters.
pub fn push_hex_u8(out: &mut Vec<u8>, value: u8) {
    out.push(hex_digit(value >> 4));
    out.push(hex_digit(value));
}

/// Appends bytes as uppercase hex ASCII, two characters per byte.
pub fn push_hex_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        push_hex_u8(out, b);
    }
}

/// Appends an IEEE-754 single as 8 hex ASCII characters, most significant
/// byte first.
pub fn push_hex_f32(out: &mut Vec<u8>, value: f32) {
    push_hex_bytes(out, &value.to_be_bytes());
}

/// Parses exactly two hex ASCII characters into a byte.
pub fn parse_hex_u8(field: &[u8]) -> Result<u8, BridgeError> {
    match field {
        [high, low] => Ok((hex_value(*high)? << 4) | hex_value(*low)?),
        _ => Err(BridgeError::FieldLength {
            field: 0,
            expected: 2,
            found: field.len(),
        }),
    }
}

/// Parses an even number of hex ASCII characters into bytes.
pub fn parse_hex_bytes(field: &[u8]) -> Result<Vec<u8>, BridgeError> {
    if field.len() % 2 != 0 {
        return Err(BridgeError::FieldLength {
            field: 0,
            expected: field.len() + 1,
            found: field.len(),
        });
    }
    field.chunks_exact(2).map(parse_hex_u8).collect()
}

/// Parses 8 hex ASCII characters into an IEEE-754 single.
///
/// The inverse of [`push_hex_f32`]: the bit pattern survives unchanged,
/// NaN payloads and negative zero included.
pub fn parse_hex_f32(field: &[u8]) -> Result<f32, BridgeError> {
    if field.len() != 8 {
        return Err(BridgeError::FieldLength {
            field: 0,
            expected: 8,
            found: field.len(),
        });
    }
    let mut bytes = [0u8; 4];
    for (dst, pair) in bytes.iter_mut().zip(field.chunks_exact(2)) {
        *dst = parse_hex_u8(pair)?;
    }
    Ok(f32::from_be_bytes(bytes))
}
