//! Small shared helpers

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Current wall-clock time as milliseconds since the Unix epoch
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a millisecond timestamp to a UTC instant, if representable
#[must_use]
pub fn datetime_from_ms(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Hex-encoded SHA-256 of an API key or token secret
#[must_use]
pub fn hash_key(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Replace the extension of an audio filename, keeping the stem
#[must_use]
pub fn replace_extension(filename: &str, extension: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    format!("{stem}.{extension}")
}
