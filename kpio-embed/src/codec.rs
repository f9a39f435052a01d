//! Host UTF-8 to engine string conversion.
//!
//! The engine stores text as CESU-8: every UTF-16 code unit is written as a
//! standard one to three byte UTF-8 sequence, so a supplementary code point
//! takes six bytes (two encoded surrogates) and no four byte sequence ever
//! appears.

use crate::error::{Error, Result};

/// Encode a host string into engine bytes.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        kpio_js::encode_unit(unit, &mut out);
    }
    out
}

/// Decode engine bytes back into a host string.
///
/// Rejects invalid lead bytes, bad continuation bytes, truncated and
/// overlong sequences, four byte sequences and unpaired surrogates.
pub fn decode(bytes: &[u8]) -> Result<String> {
    // Fast path: plain ASCII needs no transcoding.
    if bytes.is_ascii() {
        return Ok(bytes.iter().map(|b| *b as char).collect());
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut offsets = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        let (unit, len) = decode_unit(bytes, pos)?;
        units.push(unit);
        offsets.push(pos);
        pos += len;
    }

    let mut out = String::with_capacity(bytes.len());
    for (index, decoded) in char::decode_utf16(units.iter().copied()).enumerate() {
        match decoded {
            Ok(c) => out.push(c),
            Err(err) => {
                // Each successful pair consumed two units; locate the offender.
                let offset = locate_unpaired(&units, &offsets, err.unpaired_surrogate());
                return Err(Error::Argument(format!(
                    "unpaired surrogate {:#06x} at byte {}",
                    err.unpaired_surrogate(),
                    offset.unwrap_or(index)
                )));
            }
        }
    }
    Ok(out)
}

/// Decode one 16-bit unit starting at `pos`; returns the unit and its length.
fn decode_unit(bytes: &[u8], pos: usize) -> Result<(u16, usize)> {
    let lead = bytes[pos];
    let (len, initial, min) = match lead {
        0x00..=0x7F => return Ok((lead as u16, 1)),
        0xC0..=0xDF => (2, (lead & 0x1F) as u32, 0x80),
        0xE0..=0xEF => (3, (lead & 0x0F) as u32, 0x800),
        0xF0..=0xF7 => {
            return Err(malformed(bytes, pos, 1, "four byte sequence"));
        }
        _ => return Err(malformed(bytes, pos, 1, "invalid lead byte")),
    };
    if pos + len > bytes.len() {
        return Err(malformed(bytes, pos, bytes.len() - pos, "truncated sequence"));
    }
    let mut value = initial;
    for i in 1..len {
        let byte = bytes[pos + i];
        if byte & 0xC0 != 0x80 {
            return Err(malformed(bytes, pos, i + 1, "invalid continuation byte"));
        }
        value = (value << 6) | (byte & 0x3F) as u32;
    }
    if value < min {
        return Err(malformed(bytes, pos, len, "overlong sequence"));
    }
    Ok((value as u16, len))
}

fn malformed(bytes: &[u8], pos: usize, len: usize, what: &str) -> Error {
    Error::Argument(format!(
        "{} at byte {}: {:02X?}",
        what,
        pos,
        &bytes[pos..pos + len]
    ))
}

fn locate_unpaired(units: &[u16], offsets: &[usize], unit: u16) -> Option<usize> {
    let mut i = 0;
    while i < units.len() {
        let u = units[i];
        if (0xD800..0xDC00).contains(&u) && units.get(i + 1).map_or(false, |n| (0xDC00..0xE000).contains(n)) {
            i += 2;
            continue;
        }
        if u == unit && (0xD800..0xE000).contains(&u) {
            return offsets.get(i).copied();
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_is_unchanged() {
        assert_eq!(encode("hello"), b"hello");
        assert_eq!(decode(b"hello").unwrap(), "hello");
    }

    #[test]
    fn test_bmp_matches_utf8() {
        let s = "h\u{e9}llo \u{4e16}\u{754c}";
        assert_eq!(encode(s), s.as_bytes());
        assert_eq!(decode(s.as_bytes()).unwrap(), s);
    }

    #[test]
    fn test_supplementary_code_point_uses_six_bytes() {
        let s = "\u{1F600}";
        let encoded = encode(s);
        assert_eq!(encoded, [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert!(encoded.iter().all(|b| *b < 0xF0));
        assert_eq!(decode(&encoded).unwrap(), s);
    }

    #[test]
    fn test_mixed_round_trip() {
        let s = "a\u{10348}b\u{1F4A9}\u{FFFF}\u{0}";
        assert_eq!(decode(&encode(s)).unwrap(), s);
    }

    #[test]
    fn test_rejects_four_byte_sequences() {
        let err = decode("\u{1F600}".as_bytes()).unwrap_err();
        assert!(matches!(&err, Error::Argument(m) if m.starts_with("four byte sequence at byte 0")), "{}", err);
    }

    #[test]
    fn test_rejects_malformed_input() {
        let cases: [(&[u8], &str); 5] = [
            (b"a\x80", "invalid lead byte at byte 1"),
            (b"\xC3\x28", "invalid continuation byte"),
            (b"\xE4\xB8", "truncated sequence"),
            (b"\xC0\xAF", "overlong sequence"),
            (b"\xE0\x80\xAF", "overlong sequence"),
        ];
        for (input, expected) in cases {
            match decode(input) {
                Err(Error::Argument(message)) => assert!(message.starts_with(expected), "{}", message),
                other => panic!("{:?} decoded to {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_rejects_unpaired_surrogate() {
        // Lone high surrogate followed by 'x'.
        let err = decode(b"ab\xED\xA0\xBDx").unwrap_err();
        assert_eq!(err.to_string(), "unpaired surrogate 0xd83d at byte 2");
    }
}
