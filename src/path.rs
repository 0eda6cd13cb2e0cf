//! Canonical remote object addresses: `scheme://bucket/key`.
//!
//! Equality and ordering are on the exact string. No normalisation is
//! applied beyond splitting into scheme, bucket and key, so two spellings
//! of the same object are two different lock keys.

use crate::error::ServiceError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A parsed `scheme://bucket/key` path.
#[derive(Debug, Clone)]
pub struct ResourcePath {
    raw: String,
    scheme_len: usize,
    bucket_start: usize,
    key_start: usize,
}

impl ResourcePath {
    /// Parse and validate a path string.
    ///
    /// The key must be relative: no empty, `.` or `..` segments, so it can
    /// be mirrored safely under a local staging root.
    pub fn parse(input: &str) -> Result<Self, ServiceError> {
        let invalid = |reason: &str| ServiceError::InvalidPath {
            path: input.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid("expected scheme://bucket/key"))?;

        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '+' || c == '-')
        {
            return Err(invalid("scheme must be lowercase alphanumeric"));
        }

        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing object key"))?;

        if bucket.is_empty() {
            return Err(invalid("empty bucket"));
        }
        if key.is_empty() {
            return Err(invalid("empty object key"));
        }
        if key.contains('\\') {
            return Err(invalid("object key contains a backslash"));
        }
        if key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(invalid("object key has an empty, '.' or '..' segment"));
        }

        let scheme_len = scheme.len();
        let bucket_start = scheme_len + 3;
        let key_start = bucket_start + bucket.len() + 1;

        Ok(Self {
            raw: input.to_string(),
            scheme_len,
            bucket_start,
            key_start,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_len]
    }

    pub fn bucket(&self) -> &str {
        &self.raw[self.bucket_start..self.key_start - 1]
    }

    pub fn key(&self) -> &str {
        &self.raw[self.key_start..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The same bucket with `suffix` appended to the key.
    ///
    /// Used for published artifacts: `s3://b/doc.pdf` → `s3://b/doc.pdf.md`.
    pub fn with_key_suffix(&self, suffix: &str) -> Self {
        Self {
            raw: format!("{}{}", self.raw, suffix),
            ..self.clone()
        }
    }
}

impl PartialEq for ResourcePath {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ResourcePath {}

impl Hash for ResourcePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for ResourcePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourcePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ResourcePath {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ResourcePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ResourcePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
