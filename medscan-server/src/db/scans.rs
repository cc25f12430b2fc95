//! Scan record store
//!
//! Durable keyed storage for scans and their nested prediction/annotation
//! state. The `(owner_id, scan_type, custom_name)` primary key enforces
//! identity uniqueness; the annotation write is a conditional update so the
//! write-once rule holds even between processes sharing the database.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::path::Path;

use medscan_common::{
    Annotation, Error, Feedback, Prediction, PredictionResult, Result, ScanIdentity, ScanRecord,
};

use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Data needed to register a freshly uploaded scan
#[derive(Debug, Clone)]
pub struct NewScan {
    pub identity: ScanIdentity,
    /// Source image path, relative to the storage root
    pub file_path: String,
}

/// Outcome of the conditional annotation write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationWrite {
    Written,
    AlreadyPresent,
    ScanMissing,
}

const SELECT_COLUMNS: &str = r#"
    SELECT owner_id, scan_type, custom_name, file_path,
           prediction_result, prediction_feedback,
           annotation_mask_path, annotation_processed_path,
           annotation_remarks, annotation_created_at,
           created_at, updated_at
    FROM scans
"#;

/// Register a scan; a duplicate identity is a `Conflict`
pub async fn insert_scan(pool: &SqlitePool, scan: &NewScan) -> Result<ScanRecord> {
    if scan.file_path.is_empty() || Path::new(&scan.file_path).is_absolute() {
        return Err(Error::InvalidInput(
            "Scan file path must be relative to the storage root".to_string(),
        ));
    }

    let now = Utc::now();
    let now_text = now.to_rfc3339();
    let id = &scan.identity;

    let outcome = retry_on_lock("insert_scan", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO scans (owner_id, scan_type, custom_name, file_path, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id.owner_id)
        .bind(&id.scan_type)
        .bind(&id.custom_name)
        .bind(&scan.file_path)
        .bind(&now_text)
        .bind(&now_text)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    })
    .await;

    match outcome {
        Ok(()) => Ok(ScanRecord {
            identity: id.clone(),
            file_path: scan.file_path.clone(),
            prediction: Prediction::default(),
            annotation: None,
            created_at: now,
            updated_at: now,
        }),
        Err(Error::Database(sqlx::Error::Database(db_err))) if db_err.is_unique_violation() => {
            Err(Error::Conflict(format!("Scan already exists: {}", id)))
        }
        Err(e) => Err(e),
    }
}

/// Load a scan by identity
pub async fn find_scan(pool: &SqlitePool, id: &ScanIdentity) -> Result<Option<ScanRecord>> {
    let sql = format!(
        "{} WHERE owner_id = ? AND scan_type = ? AND custom_name = ?",
        SELECT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(&id.owner_id)
        .bind(&id.scan_type)
        .bind(&id.custom_name)
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_record(&r)).transpose()
}

/// Overwrite the prediction verdict and reset feedback to empty
///
/// Returns `false` when no scan matches. Concurrent calls are last-writer-wins.
pub async fn update_prediction(
    pool: &SqlitePool,
    id: &ScanIdentity,
    result: PredictionResult,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    retry_on_lock("update_prediction", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let done = sqlx::query(
            r#"
            UPDATE scans
            SET prediction_result = ?, prediction_feedback = ?, updated_at = ?
            WHERE owner_id = ? AND scan_type = ? AND custom_name = ?
            "#,
        )
        .bind(result.as_str())
        .bind(Feedback::Empty.as_str())
        .bind(&now)
        .bind(&id.owner_id)
        .bind(&id.scan_type)
        .bind(&id.custom_name)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(done.rows_affected() > 0)
    })
    .await
}

/// Overwrite the clinician feedback; returns `false` when no scan matches
pub async fn update_feedback(
    pool: &SqlitePool,
    id: &ScanIdentity,
    feedback: Feedback,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    retry_on_lock("update_feedback", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let done = sqlx::query(
            r#"
            UPDATE scans
            SET prediction_feedback = ?, updated_at = ?
            WHERE owner_id = ? AND scan_type = ? AND custom_name = ?
            "#,
        )
        .bind(feedback.as_str())
        .bind(&now)
        .bind(&id.owner_id)
        .bind(&id.scan_type)
        .bind(&id.custom_name)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(done.rows_affected() > 0)
    })
    .await
}

/// Persist the annotation only if none is stored yet (compare-and-set)
pub async fn insert_annotation_if_absent(
    pool: &SqlitePool,
    id: &ScanIdentity,
    annotation: &Annotation,
) -> Result<AnnotationWrite> {
    let now = Utc::now().to_rfc3339();
    let created_at = annotation.created_at.to_rfc3339();

    let written = retry_on_lock("insert_annotation", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let done = sqlx::query(
            r#"
            UPDATE scans
            SET annotation_mask_path = ?,
                annotation_processed_path = ?,
                annotation_remarks = ?,
                annotation_created_at = ?,
                updated_at = ?
            WHERE owner_id = ? AND scan_type = ? AND custom_name = ?
              AND annotation_mask_path IS NULL
            "#,
        )
        .bind(&annotation.mask_path)
        .bind(&annotation.processed_path)
        .bind(&annotation.remarks)
        .bind(&created_at)
        .bind(&now)
        .bind(&id.owner_id)
        .bind(&id.scan_type)
        .bind(&id.custom_name)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(done.rows_affected() > 0)
    })
    .await?;

    if written {
        return Ok(AnnotationWrite::Written);
    }

    match find_scan(pool, id).await? {
        Some(_) => Ok(AnnotationWrite::AlreadyPresent),
        None => Ok(AnnotationWrite::ScanMissing),
    }
}

fn row_to_record(row: &SqliteRow) -> Result<ScanRecord> {
    let result: String = row.get("prediction_result");
    let feedback: String = row.get("prediction_feedback");
    let prediction = Prediction {
        result: result
            .parse()
            .map_err(|e| Error::Internal(format!("Corrupt prediction_result: {}", e)))?,
        feedback: feedback
            .parse()
            .map_err(|e| Error::Internal(format!("Corrupt prediction_feedback: {}", e)))?,
    };

    let mask_path: Option<String> = row.get("annotation_mask_path");
    let annotation = match mask_path {
        Some(mask_path) => {
            let processed_path: Option<String> = row.get("annotation_processed_path");
            let remarks: Option<String> = row.get("annotation_remarks");
            let created_at: Option<String> = row.get("annotation_created_at");
            Some(Annotation {
                mask_path,
                processed_path: processed_path.unwrap_or_default(),
                remarks: remarks.unwrap_or_default(),
                created_at: parse_timestamp(created_at.as_deref().unwrap_or_default(), "annotation_created_at")?,
            })
        }
        None => None,
    };

    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(ScanRecord {
        identity: ScanIdentity {
            owner_id: row.get("owner_id"),
            scan_type: row.get("scan_type"),
            custom_name: row.get("custom_name"),
        },
        file_path: row.get("file_path"),
        prediction,
        annotation,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let pool = crate::db::init_database_pool(&dir.path().join("medscan.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    fn new_scan() -> NewScan {
        NewScan {
            identity: ScanIdentity::new("u1", "xray", "chest"),
            file_path: "uploads/xray_u1_chest.png".to_string(),
        }
    }

    fn annotation(remarks: &str) -> Annotation {
        Annotation {
            mask_path: "annotations/xray_u1_chest_mask.png".to_string(),
            processed_path: "annotations/xray_u1_chest_annotation_processed.png".to_string(),
            remarks: remarks.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (_dir, pool) = setup().await;
        let created = insert_scan(&pool, &new_scan()).await.unwrap();
        let found = find_scan(&pool, &created.identity).await.unwrap().unwrap();

        assert_eq!(found.file_path, "uploads/xray_u1_chest.png");
        assert_eq!(found.prediction, Prediction::default());
        assert!(found.annotation.is_none());
    }

    #[tokio::test]
    async fn test_identity_is_unique() {
        let (_dir, pool) = setup().await;
        insert_scan(&pool, &new_scan()).await.unwrap();
        assert!(matches!(
            insert_scan(&pool, &new_scan()).await,
            Err(Error::Conflict(_))
        ));

        // Same name under a different scan type is a different scan
        let mut other = new_scan();
        other.identity.scan_type = "mri".to_string();
        insert_scan(&pool, &other).await.unwrap();
    }

    #[tokio::test]
    async fn test_absolute_file_path_rejected() {
        let (_dir, pool) = setup().await;
        let mut scan = new_scan();
        scan.file_path = "/srv/uploads/x.png".to_string();
        assert!(matches!(
            insert_scan(&pool, &scan).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_prediction_update_resets_feedback() {
        let (_dir, pool) = setup().await;
        let id = insert_scan(&pool, &new_scan()).await.unwrap().identity;

        assert!(update_feedback(&pool, &id, Feedback::Right).await.unwrap());
        assert!(update_prediction(&pool, &id, PredictionResult::Abnormal).await.unwrap());

        let scan = find_scan(&pool, &id).await.unwrap().unwrap();
        assert_eq!(scan.prediction.result, PredictionResult::Abnormal);
        assert_eq!(scan.prediction.feedback, Feedback::Empty);
    }

    #[tokio::test]
    async fn test_updates_report_missing_scan() {
        let (_dir, pool) = setup().await;
        let id = ScanIdentity::new("nobody", "xray", "none");
        assert!(!update_prediction(&pool, &id, PredictionResult::Normal).await.unwrap());
        assert!(!update_feedback(&pool, &id, Feedback::Wrong).await.unwrap());
        assert_eq!(
            insert_annotation_if_absent(&pool, &id, &annotation("")).await.unwrap(),
            AnnotationWrite::ScanMissing
        );
    }

    #[tokio::test]
    async fn test_annotation_is_write_once() {
        let (_dir, pool) = setup().await;
        let id = insert_scan(&pool, &new_scan()).await.unwrap().identity;

        let first = annotation("first");
        assert_eq!(
            insert_annotation_if_absent(&pool, &id, &first).await.unwrap(),
            AnnotationWrite::Written
        );
        assert_eq!(
            insert_annotation_if_absent(&pool, &id, &annotation("second")).await.unwrap(),
            AnnotationWrite::AlreadyPresent
        );

        let stored = find_scan(&pool, &id).await.unwrap().unwrap().annotation.unwrap();
        assert_eq!(stored.remarks, "first");
        assert_eq!(stored.mask_path, first.mask_path);
    }
}
