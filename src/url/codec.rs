//! Percent-encoding helpers
//!
//! Two flavours are needed: plain percent-coding for paths (`/` and `:` kept
//! verbatim) and form coding for parameter keys and values, where a space is
//! written as `+`.

use super::UrlError;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn push_escaped(out: &mut String, b: u8) {
    out.push('%');
    out.push(HEX[(b >> 4) as usize] as char);
    out.push(HEX[(b & 0x0F) as usize] as char);
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn decode_bytes(input: &str, plus_as_space: bool) -> Result<String, UrlError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex_value);
                let lo = bytes.get(i + 2).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                    _ => {
                        return Err(UrlError::Decode {
                            input: input.to_string(),
                            offset: i,
                        })
                    }
                }
                i += 3;
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| UrlError::Decode {
        input: input.to_string(),
        offset: 0,
    })
}

/// Percent-decode a path component
pub fn decode(input: &str) -> Result<String, UrlError> {
    decode_bytes(input, false)
}

/// Percent-encode a path component, keeping `/`
pub fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if is_unreserved(b) || b == b'/' {
            out.push(b as char);
        } else {
            push_escaped(&mut out, b);
        }
    }
    out
}

/// Encode a path for use inside a subscription key
///
/// Keeps `:` so process variable names stay readable; everything that could
/// be mistaken for a URL delimiter is escaped.
pub fn encode_key_path(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if is_unreserved(b) || b == b'/' || b == b':' {
            out.push(b as char);
        } else {
            push_escaped(&mut out, b);
        }
    }
    out
}

/// Decode a form-encoded key or value (`+` is a space)
pub fn decode_form(input: &str) -> Result<String, UrlError> {
    decode_bytes(input, true)
}

/// Form-encode a key or value (space becomes `+`)
pub fn encode_form(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else if b == b' ' {
            out.push('+');
        } else {
            push_escaped(&mut out, b);
        }
    }
    out
}
