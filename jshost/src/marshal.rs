//! Text conversion across the plugin boundary.
//!
//! Nothing in here takes ownership of a [`Variant`]: callers keep the value
//! they pass in and release it themselves.

use std::fmt;
use std::path::Path;

use crate::error::DecodeError;
use crate::oleaut::{Bstr, Variant};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Coerce a copy of `value` to display text.
///
/// Returns `None` for empty and null values and for anything the coercion
/// rejects.  Never returns a partially filled string.
pub fn to_text(value: &Variant) -> Option<Bstr> {
    if value.is_empty_or_null() {
        return None;
    }
    match value.to_bstr() {
        Ok(text) => Some(text),
        Err(hr) => {
            tracing::trace!(%hr, vt = value.vt(), "value has no text form");
            None
        }
    }
}

/// Transcode wide text for output.  Stops at the first NUL; empty input is
/// "nothing to print" and yields `None`.
pub fn to_utf8(units: &[u16]) -> Option<String> {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    if end == 0 {
        return None;
    }
    Some(String::from_utf16_lossy(&units[..end]))
}

// ── WideText ──────────────────────────────────────────────────────────────────

/// Owned, NUL-terminated UTF-16 buffer for passing source text and names
/// into the plugin.
#[derive(Clone, PartialEq, Eq)]
pub struct WideText(Vec<u16>);

impl WideText {
    pub fn new(text: &str) -> Self {
        Self::from_units(text.encode_utf16())
    }

    pub fn from_units(units: impl IntoIterator<Item = u16>) -> Self {
        let mut buf: Vec<u16> = units.into_iter().collect();
        buf.push(0);
        Self(buf)
    }

    pub fn as_ptr(&self) -> *const u16 {
        self.0.as_ptr()
    }

    /// The text without its terminator.
    pub fn as_wide(&self) -> &[u16] {
        &self.0[..self.0.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.0.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep at most `units` code units.
    pub fn truncate(&mut self, units: usize) {
        if units < self.len() {
            self.0.truncate(units);
            self.0.push(0);
        }
    }
}

impl From<&str> for WideText {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl fmt::Display for WideText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf16_lossy(self.as_wide()))
    }
}

impl fmt::Debug for WideText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WideText({:?})", String::from_utf16_lossy(self.as_wide()))
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode script source.  A leading UTF-8 BOM is dropped; any invalid
/// sequence fails the whole decode.
pub fn decode_utf8(bytes: &[u8]) -> Result<WideText, DecodeError> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    let text = std::str::from_utf8(body).map_err(|e| DecodeError::InvalidUtf8 {
        offset: e.valid_up_to() + (bytes.len() - body.len()),
    })?;
    Ok(WideText::new(text))
}

pub fn read_utf8_file(path: &Path) -> Result<WideText, DecodeError> {
    let bytes = std::fs::read(path)?;
    decode_utf8(&bytes)
}

// ── Helpers for callee-side code ──────────────────────────────────────────────

/// Case-insensitive comparison of plugin-supplied wide text with a host name.
pub fn wide_eq_ignore_case(units: &[u16], name: &str) -> bool {
    let lhs = char::decode_utf16(units.iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .flat_map(char::to_lowercase);
    let rhs = name.chars().flat_map(char::to_lowercase);
    lhs.eq(rhs)
}

/// Borrow a NUL-terminated wide string handed in by the plugin.
///
/// # Safety
///
/// `ptr` must be null or point at a NUL-terminated sequence that outlives
/// `'a`.
pub unsafe fn wide_from_ptr<'a>(ptr: *const u16) -> Option<&'a [u16]> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    Some(std::slice::from_raw_parts(ptr, len))
}
