//! Remote object stores: download inputs, upload artifacts.
//!
//! The pipeline only ever needs two primitives, `download(bucket, key,
//! local)` and `upload(bucket, key, local)`, so that is the whole
//! [`RemoteStore`] trait. Each URL scheme maps to one store instance in a
//! [`StoreRegistry`]; the pipeline resolves input and output paths
//! against it independently, so a job may read from `oss://` and write to
//! `s3://`.
//!
//! Store errors keep a [`StoreErrorKind`] (not found, permission, transient)
//! even though the HTTP surface only reports the message.

mod fs;
mod s3;

pub use fs::FsStore;
pub use s3::{OssCredentials, S3Store};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Classification of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    NotFound,
    PermissionDenied,
    /// Timeouts, dispatch failures, throttling and 5xx answers.
    Transient,
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreErrorKind::NotFound => "not found",
            StoreErrorKind::PermissionDenied => "permission denied",
            StoreErrorKind::Transient => "transient",
            StoreErrorKind::Other => "error",
        };
        f.write_str(s)
    }
}

/// Which direction a store call was going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    Download,
    Upload,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOp::Download => f.write_str("download"),
            StoreOp::Upload => f.write_str("upload"),
        }
    }
}

/// A failed store call.
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub detail: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Map a local I/O error onto the store taxonomy.
    pub fn from_io(err: &std::io::Error, what: &Path) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => StoreErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StoreErrorKind::PermissionDenied,
            std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut => {
                StoreErrorKind::Transient
            }
            _ => StoreErrorKind::Other,
        };
        Self::new(kind, format!("{}: {}", what.display(), err))
    }
}

/// A sibling temp file for `target`, unique per call: `<name>.<uuid>.part`.
///
/// Writers stream into it and rename over `target`, so two transfers never
/// share a partial file even when their targets differ only by extension.
pub(crate) fn part_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.part", uuid::Uuid::new_v4().simple()));
    target.with_file_name(name)
}

/// Download/upload primitives for one storage backend.
///
/// Uploads must overwrite: publishing the same artifact twice leaves one
/// object with the latest content.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short label for logs (`"s3"`, `"oss"`, `"file"`).
    fn name(&self) -> &str;

    /// Copy `bucket/key` to `local`, replacing any existing file.
    async fn download(&self, bucket: &str, key: &str, local: &Path) -> Result<(), StoreError>;

    /// Copy `local` to `bucket/key`, replacing any existing object.
    async fn upload(&self, bucket: &str, key: &str, local: &Path) -> Result<(), StoreError>;
}

/// Scheme → store lookup.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn RemoteStore>>,
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` for `scheme`, replacing any previous entry.
    pub fn register(&mut self, scheme: impl Into<String>, store: Arc<dyn RemoteStore>) -> &mut Self {
        self.stores.insert(scheme.into(), store);
        self
    }

    pub fn with(mut self, scheme: impl Into<String>, store: Arc<dyn RemoteStore>) -> Self {
        self.register(scheme, store);
        self
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn RemoteStore>> {
        self.stores.get(scheme).cloned()
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut s: Vec<String> = self.stores.keys().cloned().collect();
        s.sort();
        s
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Build the registry from the process environment.
    ///
    /// * `s3`: always registered; credentials from the default AWS chain.
    /// * `oss`: registered when `OSS_ENDPOINT`, `OSS_ACCESS_KEY_ID` and
    ///   `OSS_ACCESS_KEY_SECRET` are all set (`OSS_REGION` optional).
    /// * `file`: registered when `FILE_STORE_ROOT` is set.
    pub async fn from_env() -> Self {
        let mut registry = Self::new();

        registry.register("s3", Arc::new(S3Store::from_env().await));
        info!("Registered store for scheme 's3' (default AWS credential chain)");

        match OssCredentials::from_env() {
            Some(creds) => {
                info!("Registered store for scheme 'oss' at {}", creds.endpoint);
                registry.register("oss", Arc::new(S3Store::oss(creds)));
            }
            None => warn!(
                "OSS_ENDPOINT / OSS_ACCESS_KEY_ID / OSS_ACCESS_KEY_SECRET not set; 'oss://' paths will be rejected"
            ),
        }

        if let Ok(root) = std::env::var("FILE_STORE_ROOT") {
            if !root.is_empty() {
                info!("Registered store for scheme 'file' rooted at {}", root);
                registry.register("file", Arc::new(FsStore::new(PathBuf::from(root))));
            }
        }

        registry
    }
}
