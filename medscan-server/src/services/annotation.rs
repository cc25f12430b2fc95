//! Annotation pipeline
//!
//! Accepts a drawn mask, hands it to the external compositor together with
//! the scan's source image and persists the write-once annotation record.
//!
//! The whole check → composite → persist sequence runs inside the scan's
//! exclusive region, and the persist itself is a conditional update, so at
//! most one annotation is ever stored per scan. Each attempt composites in
//! its own staging directory; artifacts reach their final names only after
//! the record is written.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use image::ImageFormat;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use medscan_common::drawing::DataUrl;
use medscan_common::events::{EventBus, ScanEvent};
use medscan_common::storage::public_url;
use medscan_common::{Annotation, Error, Result, ScanIdentity, StoragePathResolver};

use super::scan_locks::ScanLocks;
use crate::db::scans::{self, AnnotationWrite};
use crate::process::ExternalCommand;

const PROCESSING_FAILED: &str = "Annotation processing failed";

/// File names inside an attempt's staging directory
const STAGED_MASK: &str = "mask.png";
const STAGED_PROCESSED: &str = "processed.png";

/// Stored annotation plus public URLs for both artifacts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationView {
    #[serde(flatten)]
    pub annotation: Annotation,
    pub mask_url: String,
    pub processed_url: String,
}

pub struct AnnotationPipeline {
    db: SqlitePool,
    paths: Arc<StoragePathResolver>,
    compositor: ExternalCommand,
    events: EventBus,
    locks: ScanLocks,
}

impl AnnotationPipeline {
    pub fn new(
        db: SqlitePool,
        paths: Arc<StoragePathResolver>,
        compositor: ExternalCommand,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            paths,
            compositor,
            events,
            locks: ScanLocks::new(),
        }
    }

    /// Composite and persist the annotation for a scan
    ///
    /// `mask_data` is a `data:` URL holding any decodable raster image; it is
    /// stored as PNG. Fails with `Conflict` if the scan is already annotated.
    pub async fn submit(
        &self,
        identity: &ScanIdentity,
        mask_data: &str,
        remarks: Option<String>,
    ) -> Result<Annotation> {
        if mask_data.trim().is_empty() {
            return Err(Error::InvalidInput("Missing annotation mask data".to_string()));
        }
        let mask_png = decode_mask(mask_data).await?;

        let _guard = self.locks.acquire(identity).await;

        let scan = scans::find_scan(&self.db, identity)
            .await?
            .ok_or_else(|| Error::NotFound("Scan not found".to_string()))?;
        if scan.has_annotation() {
            return Err(Error::Conflict(
                "Annotation already exists for this scan".to_string(),
            ));
        }

        let source = self.paths.resolve(&scan.file_path)?;
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(Error::NotFound("Scan file missing on server".to_string()));
        }

        let staging_rel = self.paths.staging_dir(&uuid::Uuid::new_v4().to_string());
        let staging = self.paths.resolve(&staging_rel)?;
        let committed = self
            .commit_staged(identity, &source, &staging, &mask_png, remarks)
            .await;
        remove_staging(&staging).await;
        let annotation = committed?;

        info!(scan = %identity, processed = %annotation.processed_path, "Annotation saved");

        self.events.emit(ScanEvent::AnnotationCreated {
            identity: identity.clone(),
            processed_path: annotation.processed_path.clone(),
            timestamp: Utc::now(),
        });

        Ok(annotation)
    }

    /// Stored annotation with artifact URLs under `base_url`, if any
    pub async fn get(
        &self,
        identity: &ScanIdentity,
        base_url: &str,
    ) -> Result<Option<AnnotationView>> {
        let scan = scans::find_scan(&self.db, identity)
            .await?
            .ok_or_else(|| Error::NotFound("Scan not found".to_string()))?;

        Ok(scan.annotation.map(|annotation| AnnotationView {
            mask_url: public_url(base_url, &annotation.mask_path),
            processed_url: public_url(base_url, &annotation.processed_path),
            annotation,
        }))
    }

    /// Composite inside `staging`, persist, then move the artifacts into place
    ///
    /// Final artifact names are touched only after the record write succeeded,
    /// so an attempt that loses the race never alters the winner's files.
    async fn commit_staged(
        &self,
        identity: &ScanIdentity,
        source: &Path,
        staging: &Path,
        mask_png: &[u8],
        remarks: Option<String>,
    ) -> Result<Annotation> {
        tokio::fs::create_dir_all(staging).await?;
        let staged_mask = staging.join(STAGED_MASK);
        let staged_processed = staging.join(STAGED_PROCESSED);

        tokio::fs::write(&staged_mask, mask_png).await?;
        debug!(scan = %identity, staging = %staging.display(), "Mask staged");

        self.run_compositor(source, &staged_mask, &staged_processed).await?;

        let annotation = Annotation {
            mask_path: self.paths.mask_path(identity),
            processed_path: self.paths.processed_path(identity),
            remarks: remarks.unwrap_or_default(),
            created_at: Utc::now(),
        };
        let mask_abs = self.paths.resolve(&annotation.mask_path)?;
        let processed_abs = self.paths.resolve(&annotation.processed_path)?;

        match scans::insert_annotation_if_absent(&self.db, identity, &annotation).await? {
            AnnotationWrite::Written => {}
            AnnotationWrite::AlreadyPresent => {
                // Another process sharing the database persisted first
                return Err(Error::Conflict(
                    "Annotation already exists for this scan".to_string(),
                ));
            }
            AnnotationWrite::ScanMissing => {
                return Err(Error::NotFound("Scan not found".to_string()));
            }
        }

        for (staged, target) in [(&staged_mask, &mask_abs), (&staged_processed, &processed_abs)] {
            if let Err(e) = promote(staged, target).await {
                error!(
                    scan = %identity,
                    target = %target.display(),
                    error = %e,
                    "Annotation recorded but artifact could not be placed"
                );
                return Err(e);
            }
        }

        Ok(annotation)
    }

    async fn run_compositor(&self, source: &Path, mask: &Path, destination: &Path) -> Result<()> {
        let output = self
            .compositor
            .run_with_retry(&[source.as_os_str(), mask.as_os_str(), destination.as_os_str()])
            .await
            .map_err(|e| e.into_core("Compositor"))?;

        if !output.success() {
            return Err(Error::upstream(
                PROCESSING_FAILED,
                format!("compositor exit {:?}: {}", output.status.code(), output.stderr_tail()),
            ));
        }

        if !tokio::fs::try_exists(destination).await.unwrap_or(false) {
            return Err(Error::upstream(
                PROCESSING_FAILED,
                format!("compositor wrote no output at {}", destination.display()),
            ));
        }

        Ok(())
    }
}

/// Decode a mask data URL and re-encode it as PNG
async fn decode_mask(mask_data: &str) -> Result<Vec<u8>> {
    let data = DataUrl::parse(mask_data)?;

    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mask = image::load_from_memory(&data.bytes).map_err(|e| {
            Error::InvalidInput(format!("Mask data is not a decodable image: {}", e))
        })?;
        let mut png = Vec::new();
        mask.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| Error::Internal(format!("PNG encode failed: {}", e)))?;
        Ok(png)
    })
    .await
    .map_err(|e| Error::Internal(format!("Mask decode task failed: {}", e)))?
}

/// Move a staged artifact to its final name (same filesystem, atomic)
async fn promote(staged: &Path, target: &Path) -> Result<()> {
    if let Some(dir) = target.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::rename(staged, target).await?;
    Ok(())
}

/// Best-effort removal of an attempt's staging directory
async fn remove_staging(staging: &Path) {
    match tokio::fs::remove_dir_all(staging).await {
        Ok(()) => debug!("Removed staging {}", staging.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staging {}: {}", staging.display(), e),
    }
}
