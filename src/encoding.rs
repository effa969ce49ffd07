//! Key-component encoding shared by blob keys and index keys
//!
//! A component that is URL-safe is stored as `(` + raw text; anything else is
//! stored as unpadded URL-safe base64. `(` is not in the base64 alphabet, so
//! decoding is unambiguous.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use md5::{Digest, Md5};

const RAW_MARKER: char = '(';

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~')
}

/// Encode a catalog name (or any single key level). `/` is never raw here.
pub fn encode_component(x: &str) -> String {
    if !x.is_empty() && x.bytes().all(is_unreserved) {
        format!("{}{}", RAW_MARKER, x)
    } else {
        URL_SAFE_NO_PAD.encode(x.as_bytes())
    }
}

/// Encode a field path for an index member. `/` stays raw; `|` never does.
pub fn encode_path(path: &str) -> String {
    if !path.is_empty() && path.bytes().all(|b| is_unreserved(b) || b == b'/') {
        format!("{}{}", RAW_MARKER, path)
    } else {
        URL_SAFE_NO_PAD.encode(path.as_bytes())
    }
}

/// Inverse of [`encode_component`] and [`encode_path`]
pub fn decode_component(encoded: &str) -> Option<String> {
    if let Some(raw) = encoded.strip_prefix(RAW_MARKER) {
        return Some(raw.to_string());
    }
    let bytes = URL_SAFE_NO_PAD.decode(encoded.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Lowercase hex MD5 of a catalog name
pub fn md5_hex(x: &str) -> String {
    format!("{:x}", Md5::digest(x.as_bytes()))
}
