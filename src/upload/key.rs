//! Storage key derivation
//!
//! Keys follow `<prefix>/<millisecond-timestamp>-<filename>`. Two uploads of
//! the same file in the same millisecond collide under the default strategy;
//! [`KeyStrategy::TimestampRandom`] adds a random segment for deployments
//! where that matters.

use crate::config::KeyStrategy;
use chrono::{DateTime, Utc};
use std::fmt;

/// Longest sanitized filename kept in a key
pub const MAX_FILENAME_LEN: usize = 200;

/// Used when the client sends no usable filename
pub const FALLBACK_FILENAME: &str = "video";

/// Object key in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reduce an untrusted client filename to a safe key segment
///
/// Keeps the last path component, replaces anything outside `[A-Za-z0-9._-]`
/// with `_` and strips leading dots.
pub fn sanitize_filename(original: &str) -> String {
    let base = original
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let mut cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    cleaned = cleaned.trim_start_matches('.').to_string();
    cleaned.truncate(MAX_FILENAME_LEN);

    if cleaned.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned
    }
}

/// Build a key from its parts
pub fn derive_key(prefix: &str, timestamp_millis: i64, original_filename: &str) -> StorageKey {
    let name = format!("{}-{}", timestamp_millis, sanitize_filename(original_filename));
    StorageKey(join_prefix(prefix, &name))
}

fn join_prefix(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Key derivation policy for one deployment
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    prefix: String,
    strategy: KeyStrategy,
}

impl KeyDeriver {
    pub fn new(prefix: impl Into<String>, strategy: KeyStrategy) -> Self {
        Self {
            prefix: prefix.into(),
            strategy,
        }
    }

    pub fn derive(&self, now: DateTime<Utc>, original_filename: &str) -> StorageKey {
        let millis = now.timestamp_millis();
        match self.strategy {
            KeyStrategy::Timestamp => derive_key(&self.prefix, millis, original_filename),
            KeyStrategy::TimestampRandom => {
                let random = uuid::Uuid::new_v4().simple().to_string();
                let name = format!(
                    "{}-{}-{}",
                    millis,
                    &random[..8],
                    sanitize_filename(original_filename)
                );
                StorageKey(join_prefix(&self.prefix, &name))
            }
        }
    }

    pub fn derive_now(&self, original_filename: &str) -> StorageKey {
        self.derive(Utc::now(), original_filename)
    }
}
