//! Storage path resolution and artifact naming
//!
//! Every path persisted in the scan store is relative to a single artifact
//! root, using `/` separators, so the database stays portable across hosts.
//! This module is the only place that turns those relative paths into
//! filesystem locations (and back), and the only place that knows how
//! artifacts are named.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{Error, Result, ScanIdentity};

/// Directory (under the root) holding uploaded source images
pub const UPLOADS_DIR: &str = "uploads";

/// Directory (under the root) holding masks and composited overlays
pub const ANNOTATIONS_DIR: &str = "annotations";

/// Directory (under the root) holding in-flight annotation attempts
pub const STAGING_DIR: &str = "staging";

/// Hex digits of the identity digest appended to every artifact stem
const IDENTITY_DIGEST_LEN: usize = 16;

/// Maps storage-relative artifact paths to filesystem locations
#[derive(Debug, Clone)]
pub struct StoragePathResolver {
    root: PathBuf,
}

impl StoragePathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and its artifact directories if missing
    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(self.root.join(UPLOADS_DIR))?;
        std::fs::create_dir_all(self.root.join(ANNOTATIONS_DIR))?;
        std::fs::create_dir_all(self.root.join(STAGING_DIR))?;
        Ok(())
    }

    /// Resolve a storage-relative path to an absolute location under the root
    ///
    /// Absolute paths and `..` components are rejected so a stored path can
    /// never point outside the artifact root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if relative.is_empty() {
            return Err(Error::InvalidInput("Empty storage path".to_string()));
        }

        let mut resolved = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::InvalidInput(format!(
                        "Storage path escapes artifact root: {}",
                        relative
                    )));
                }
            }
        }
        Ok(resolved)
    }

    /// Convert an absolute location under the root back to its portable form
    pub fn to_relative(&self, absolute: &Path) -> Result<String> {
        let rel = absolute.strip_prefix(&self.root).map_err(|_| {
            Error::Internal(format!(
                "Path {} is outside storage root {}",
                absolute.display(),
                self.root.display()
            ))
        })?;

        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }

    /// Relative path for an uploaded source image
    pub fn upload_path(&self, identity: &ScanIdentity, extension: &str) -> String {
        let ext = extension.trim_start_matches('.');
        let stem = artifact_stem(identity);
        if ext.is_empty() {
            format!("{}/{}", UPLOADS_DIR, stem)
        } else {
            format!("{}/{}.{}", UPLOADS_DIR, stem, sanitize_component(ext))
        }
    }

    /// Relative path of the drawn mask for a scan
    pub fn mask_path(&self, identity: &ScanIdentity) -> String {
        format!("{}/{}_mask.png", ANNOTATIONS_DIR, artifact_stem(identity))
    }

    /// Relative path of the composited overlay for a scan
    pub fn processed_path(&self, identity: &ScanIdentity) -> String {
        format!(
            "{}/{}_annotation_processed.png",
            ANNOTATIONS_DIR,
            artifact_stem(identity)
        )
    }

    /// Relative directory private to one annotation attempt
    ///
    /// Artifacts are produced here and only moved to their final names once
    /// the attempt owns the scan's annotation record.
    pub fn staging_dir(&self, attempt: &str) -> String {
        format!("{}/{}", STAGING_DIR, sanitize_component(attempt))
    }
}

/// Join a public base URL with a storage-relative path
pub fn public_url(base_url: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// `{scanType}_{ownerId}_{customName}_{digest}` with each part sanitised
///
/// Sanitising is lossy, so the readable prefix alone can collide
/// (`chest front` vs `chest_front`). The digest covers the raw identity and
/// keeps distinct scans on distinct artifact names.
fn artifact_stem(identity: &ScanIdentity) -> String {
    format!(
        "{}_{}_{}_{}",
        sanitize_component(&identity.scan_type),
        sanitize_component(&identity.owner_id),
        sanitize_component(&identity.custom_name),
        identity_digest(identity)
    )
}

/// Truncated SHA-256 over the length-prefixed raw identity parts
fn identity_digest(identity: &ScanIdentity) -> String {
    let mut hasher = Sha256::new();
    for part in [&identity.owner_id, &identity.scan_type, &identity.custom_name] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(IDENTITY_DIGEST_LEN);
    digest
}

/// Whitespace becomes `_`; anything outside `[A-Za-z0-9_.-]` is dropped
///
/// A component made only of dots would read as a relative directory
/// reference, so it is treated as empty.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                Some(c)
            } else {
                None
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        cleaned
    }
}
