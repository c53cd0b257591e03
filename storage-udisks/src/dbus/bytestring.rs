// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 byte strings (`ay`) are NUL-terminated paths.

/// Decode a NUL-terminated byte string, dropping the terminator and anything after it.
pub fn decode_c_string_bytes(bytes: &[u8]) -> String {
    let raw = bytes.split(|b| *b == 0).next().unwrap_or(bytes);
    String::from_utf8_lossy(raw).to_string()
}
