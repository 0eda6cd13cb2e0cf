//! `file://bucket/key` store backed by a local directory.
//!
//! Buckets are subdirectories of the root. Useful for development and for
//! running the whole service without cloud credentials.

use super::{RemoteStore, StoreError, StoreErrorKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut p = self.root.join(bucket);
        for seg in key.split('/') {
            p.push(seg);
        }
        p
    }
}

async fn copy_replacing(from: &Path, to: &Path) -> Result<(), StoreError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::from_io(&e, parent))?;
    }
    let part = super::part_path(to);
    tokio::fs::copy(from, &part)
        .await
        .map_err(|e| StoreError::from_io(&e, from))?;
    tokio::fs::rename(&part, to)
        .await
        .map_err(|e| StoreError::from_io(&e, to))?;
    Ok(())
}

#[async_trait]
impl RemoteStore for FsStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn download(&self, bucket: &str, key: &str, local: &Path) -> Result<(), StoreError> {
        let src = self.object_path(bucket, key);
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            return Err(StoreError::new(
                StoreErrorKind::NotFound,
                format!("{} does not exist", src.display()),
            ));
        }
        debug!("file store: {} → {}", src.display(), local.display());
        copy_replacing(&src, local).await
    }

    async fn upload(&self, bucket: &str, key: &str, local: &Path) -> Result<(), StoreError> {
        let dst = self.object_path(bucket, key);
        debug!("file store: {} → {}", local.display(), dst.display());
        copy_replacing(local, &dst).await
    }
}
