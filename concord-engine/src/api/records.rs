//! Consensus record endpoints
//!
//! Read access to stored versions, the review list of the active version,
//! and submission of reviewer corrections.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::db::records::{self, VersionSummary};
use crate::error::{ApiError, ApiResult};
use crate::review::{apply_correction, review_items, Correction, ReviewItem};
use crate::types::ConsensusRecord;
use crate::AppState;

/// Review list of a segment's active version
#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub segment_id: String,
    pub version: u32,
    pub status: String,
    pub items: Vec<ReviewItem>,
}

/// GET /segments/:id/record
///
/// Returns the active (highest) version.
pub async fn get_active_record(
    State(state): State<AppState>,
    Path(segment_id): Path<String>,
) -> ApiResult<Json<ConsensusRecord>> {
    let record = records::load_active(&state.db, &segment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No record for segment {}", segment_id)))?;
    Ok(Json(record))
}

/// GET /segments/:id/record/:version
pub async fn get_record_version(
    State(state): State<AppState>,
    Path((segment_id, version)): Path<(String, u32)>,
) -> ApiResult<Json<ConsensusRecord>> {
    let record = records::load_version(&state.db, &segment_id, version)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No version {} for segment {}", version, segment_id))
        })?;
    Ok(Json(record))
}

/// GET /segments/:id/versions
pub async fn list_record_versions(
    State(state): State<AppState>,
    Path(segment_id): Path<String>,
) -> ApiResult<Json<Vec<VersionSummary>>> {
    let versions = records::list_versions(&state.db, &segment_id).await?;
    if versions.is_empty() {
        return Err(ApiError::NotFound(format!("No record for segment {}", segment_id)));
    }
    Ok(Json(versions))
}

/// GET /segments/:id/review
pub async fn get_review_items(
    State(state): State<AppState>,
    Path(segment_id): Path<String>,
) -> ApiResult<Json<ReviewResponse>> {
    let record = records::load_active(&state.db, &segment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No record for segment {}", segment_id)))?;

    Ok(Json(ReviewResponse {
        items: review_items(&record),
        segment_id: record.segment_id,
        version: record.version,
        status: record.status.as_str().to_string(),
    }))
}

/// POST /segments/:id/corrections
///
/// Applies the correction to the active version and stores the result as
/// the next version.
///
/// # Returns
/// 201 with the new record; 404 for an unknown segment, 409 when
/// `base_version` is no longer active, 400 for an invalid entry.
pub async fn submit_correction(
    State(state): State<AppState>,
    Path(segment_id): Path<String>,
    Json(correction): Json<Correction>,
) -> ApiResult<(StatusCode, Json<ConsensusRecord>)> {
    if correction.segment_id != segment_id {
        return Err(ApiError::BadRequest(format!(
            "Correction names segment {}, path names {}",
            correction.segment_id, segment_id
        )));
    }

    let active = records::load_active(&state.db, &segment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No record for segment {}", segment_id)))?;

    let next = apply_correction(&active, &correction, state.taxonomy.as_ref())?;

    let correction_id = Uuid::new_v4();
    if let Err(err) = records::append_version(&state.db, &next, &correction_id).await {
        // A concurrent correction claimed the version first
        if err.to_string().contains("UNIQUE constraint failed") {
            return Err(ApiError::Conflict(format!(
                "Version {} of segment {} was written concurrently",
                next.version, segment_id
            )));
        }
        *state.last_error.write().await = Some(err.to_string());
        return Err(err.into());
    }

    info!(
        segment_id = %segment_id,
        version = next.version,
        reviewer = %correction.reviewer,
        entries = correction.entries.len(),
        "Correction applied"
    );

    Ok((StatusCode::CREATED, Json(next)))
}

/// Build record routes
pub fn record_routes() -> Router<AppState> {
    Router::new()
        .route("/segments/:id/record", get(get_active_record))
        .route("/segments/:id/record/:version", get(get_record_version))
        .route("/segments/:id/versions", get(list_record_versions))
        .route("/segments/:id/review", get(get_review_items))
        .route("/segments/:id/corrections", post(submit_correction))
}
