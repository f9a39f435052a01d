//! Engine strings.
//!
//! Strings are stored as modified UTF-8: every UTF-16 code unit is encoded
//! as its own 1-3 byte sequence, so supplementary characters occupy two
//! 3-byte surrogate sequences and lone surrogates survive unchanged. Byte
//! order of this encoding matches code unit order, so comparisons work on
//! the raw bytes.
//!
//! Keys whose first byte is `0xFF` can never be produced by the encoder and
//! are reserved for internal properties.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Marker byte of internal property keys.
pub const INTERNAL_PREFIX: u8 = 0xFF;

/// Immutable engine string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsString(Rc<[u8]>);

impl JsString {
    /// Wrap raw engine bytes without validation.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        JsString(Rc::from(bytes))
    }

    /// Encode a Rust string.
    pub fn new(s: &str) -> Self {
        if s.is_ascii() {
            return JsString::from_bytes(s.as_bytes());
        }
        let mut out = Vec::with_capacity(s.len() + 8);
        let mut buf = [0u16; 2];
        for ch in s.chars() {
            for unit in ch.encode_utf16(&mut buf).iter() {
                encode_unit(*unit, &mut out);
            }
        }
        JsString(Rc::from(out))
    }

    /// Encode UTF-16 code units.
    pub fn from_units(units: &[u16]) -> Self {
        let mut out = Vec::with_capacity(units.len());
        for unit in units {
            encode_unit(*unit, &mut out);
        }
        JsString(Rc::from(out))
    }

    pub fn empty() -> Self {
        JsString::from_bytes(&[])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode into UTF-16 code units. Invalid bytes become U+FFFD.
    pub fn units(&self) -> Vec<u16> {
        decode_units(&self.0)
    }

    /// Length in UTF-16 code units.
    pub fn unit_len(&self) -> usize {
        if self.0.is_ascii() {
            self.0.len()
        } else {
            self.units().len()
        }
    }

    /// Whether this is an internal property key.
    pub fn is_internal(&self) -> bool {
        self.0.first() == Some(&INTERNAL_PREFIX)
    }

    pub fn concat(&self, other: &JsString) -> JsString {
        let mut out = Vec::with_capacity(self.0.len() + other.0.len());
        out.extend_from_slice(&self.0);
        out.extend_from_slice(&other.0);
        JsString(Rc::from(out))
    }

    /// Lossy conversion to a Rust string.
    pub fn to_rust_string(&self) -> String {
        // Surrogate sequences are invalid UTF-8, so valid input has none.
        if let Ok(s) = core::str::from_utf8(&self.0) {
            return String::from(s);
        }
        let units = self.units();
        char::decode_utf16(units.iter().copied())
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    /// Canonical array index (`"0"`, `"17"`, never `"017"`).
    pub fn array_index(&self) -> Option<u32> {
        parse_array_index(&self.0)
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_rust_string())
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rust_string())
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString::new(s)
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString::new(&s)
    }
}

/// Append one code unit as a 1-3 byte sequence.
pub fn encode_unit(unit: u16, out: &mut Vec<u8>) {
    let u = unit as u32;
    if u < 0x80 {
        out.push(u as u8);
    } else if u < 0x800 {
        out.push(0xC0 | (u >> 6) as u8);
        out.push(0x80 | (u & 0x3F) as u8);
    } else {
        out.push(0xE0 | (u >> 12) as u8);
        out.push(0x80 | ((u >> 6) & 0x3F) as u8);
        out.push(0x80 | (u & 0x3F) as u8);
    }
}

/// Lenient decoder used for engine-internal strings.
pub fn decode_units(bytes: &[u8]) -> Vec<u16> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b < 0x80 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() && is_cont(bytes[i + 1]) {
            units.push((((b & 0x1F) as u16) << 6) | (bytes[i + 1] & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0
            && i + 2 < bytes.len()
            && is_cont(bytes[i + 1])
            && is_cont(bytes[i + 2])
        {
            units.push(
                (((b & 0x0F) as u16) << 12)
                    | (((bytes[i + 1] & 0x3F) as u16) << 6)
                    | (bytes[i + 2] & 0x3F) as u16,
            );
            i += 3;
        } else if b & 0xF8 == 0xF0
            && i + 3 < bytes.len()
            && is_cont(bytes[i + 1])
            && is_cont(bytes[i + 2])
            && is_cont(bytes[i + 3])
        {
            // Standard UTF-8 supplementary sequence from a careless embedder.
            let cp = (((b & 0x07) as u32) << 18)
                | (((bytes[i + 1] & 0x3F) as u32) << 12)
                | (((bytes[i + 2] & 0x3F) as u32) << 6)
                | (bytes[i + 3] & 0x3F) as u32;
            match char::from_u32(cp) {
                Some(ch) => {
                    let mut buf = [0u16; 2];
                    units.extend_from_slice(ch.encode_utf16(&mut buf));
                }
                None => units.push(0xFFFD),
            }
            i += 4;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    units
}

fn is_cont(b: u8) -> bool {
    b & 0xC0 == 0x80
}

fn parse_array_index(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 10 {
        return None;
    }
    if bytes.len() > 1 && bytes[0] == b'0' {
        return None;
    }
    let mut value: u64 = 0;
    for b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (b - b'0') as u64;
    }
    // 2^32 - 1 is not an array index.
    if value >= u32::MAX as u64 {
        return None;
    }
    Some(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surrogates_use_three_byte_sequences() {
        let s = JsString::new("\u{1F600}");
        assert_eq!(s.as_bytes(), &[0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(s.unit_len(), 2);
        assert_eq!(s.to_rust_string(), "\u{1F600}");
    }

    #[test]
    fn test_lone_surrogate_survives() {
        let s = JsString::from_units(&[0x61, 0xD800]);
        assert_eq!(s.units(), alloc::vec![0x61, 0xD800]);
    }

    #[test]
    fn test_array_index() {
        assert_eq!(JsString::new("0").array_index(), Some(0));
        assert_eq!(JsString::new("42").array_index(), Some(42));
        assert_eq!(JsString::new("042").array_index(), None);
        assert_eq!(JsString::new("4294967295").array_index(), None);
        assert_eq!(JsString::new("x1").array_index(), None);
    }

    #[test]
    fn test_ordering_matches_units() {
        let bmp = JsString::new("\u{FFFF}");
        let astral = JsString::new("\u{10000}");
        // 0xD800 < 0xFFFF as code units
        assert!(astral < bmp);
    }

    #[test]
    fn test_internal_prefix() {
        assert!(JsString::from_bytes(b"\xFFkey").is_internal());
        assert!(!JsString::new("\u{FF}key").is_internal());
    }
}
