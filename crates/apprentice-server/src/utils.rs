//! crates/apprentice-server/src/utils.rs
//! Shared utility functions used across the codebase

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Current time as an RFC 3339 string with millisecond precision.
///
/// All timestamps written to the store go through this one formatter so
/// that lexicographic ordering matches chronological ordering.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp, returning None on malformed input.
pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert a Path to an owned String, replacing invalid UTF-8 with U+FFFD.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Stable asset identifier: the first 16 hex chars of SHA-256("context:key").
pub fn asset_id(context_id: &str, key: &str) -> String {
    let digest = sha256_hex(format!("{context_id}:{key}").as_bytes());
    digest[..16].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Truncate a string to max length with ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..floor_char_boundary(s, max_len)])
    }
}

/// Truncate at a char boundary at or below `max_len` bytes, no ellipsis.
pub fn truncate_at_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..floor_char_boundary(s, max_len)]
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Slugify a name into a context id: lowercase alphanumerics and `/`,
/// everything else collapsed to single `-` runs, trimmed at both ends.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true; // suppress a leading dash
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '/' {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
