//! Local staging layout.
//!
//! Remote objects are mirrored under a root as `<root>/<scheme>/<bucket>/<key>`.
//! The mapping is a pure function of the path, so a retried job reuses the
//! same files and two different remote objects never share a local file.

use crate::error::ServiceError;
use crate::path::ResourcePath;
use std::path::{Path, PathBuf};

/// Where the input object is downloaded to.
pub fn input_path(root: &Path, path: &ResourcePath) -> PathBuf {
    mirror(root, path)
}

/// Local markdown and JSON artifact paths for an output object.
///
/// Suffixes are appended to the whole key, matching the published names:
/// `out/doc.pdf` → `out/doc.pdf.md`, `out/doc.pdf.json`. Keys that differ
/// only by extension keep distinct artifacts.
pub fn artifact_paths(root: &Path, path: &ResourcePath) -> (PathBuf, PathBuf) {
    let base = mirror(root, path);
    (with_suffix(&base, ".md"), with_suffix(&base, ".json"))
}

/// `file` with `suffix` appended to its full file name.
pub fn with_suffix(file: &Path, suffix: &str) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn mirror(root: &Path, path: &ResourcePath) -> PathBuf {
    let mut local = root.join(path.scheme()).join(path.bucket());
    for seg in path.key().split('/') {
        local.push(seg);
    }
    local
}

/// Create the parent directory of `file`.
pub async fn ensure_parent(file: &Path) -> Result<(), ServiceError> {
    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ServiceError::ArtifactWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    #[test]
    fn input_mirrors_scheme_bucket_key() {
        let local = input_path(Path::new("/stage"), &p("s3://docs/a/b/c.pdf"));
        assert_eq!(local, PathBuf::from("/stage/s3/docs/a/b/c.pdf"));
    }

    #[test]
    fn schemes_do_not_collide() {
        let root = Path::new("/stage");
        assert_ne!(
            input_path(root, &p("s3://b/k.pdf")),
            input_path(root, &p("oss://b/k.pdf"))
        );
    }

    #[test]
    fn artifacts_append_to_full_key() {
        let (md, json) = artifact_paths(Path::new("/out"), &p("oss://b/reports/q1.pdf"));
        assert_eq!(md, PathBuf::from("/out/oss/b/reports/q1.pdf.md"));
        assert_eq!(json, PathBuf::from("/out/oss/b/reports/q1.pdf.json"));
    }

    #[test]
    fn extensionless_key_gains_one() {
        let (md, _) = artifact_paths(Path::new("/out"), &p("s3://b/scan"));
        assert_eq!(md, PathBuf::from("/out/s3/b/scan.md"));
    }

    #[test]
    fn keys_differing_by_extension_keep_separate_artifacts() {
        let root = Path::new("/out");
        let (pdf_md, pdf_json) = artifact_paths(root, &p("s3://b/r.pdf"));
        let (png_md, png_json) = artifact_paths(root, &p("s3://b/r.png"));
        assert_ne!(pdf_md, png_md);
        assert_ne!(pdf_json, png_json);
    }

    #[tokio::test]
    async fn ensure_parent_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x/y/z.pdf");
        ensure_parent(&file).await.unwrap();
        assert!(dir.path().join("x/y").is_dir());
    }
}
