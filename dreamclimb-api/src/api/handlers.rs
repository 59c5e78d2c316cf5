//! HTTP request handlers
//!
//! Implements the questionnaire REST endpoints: submit, problem search,
//! and available tags.

use crate::api::server::AppContext;
use crate::catalog;
use crate::error::Error;
use crate::identity::{self, IdentitySignals};
use crate::reconcile::{self, SubmissionPayload};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use dreamclimb_common::db::models::{Gender, Problem};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

/// Canonical submit payload: the superset of both observed client shapes
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Browser fingerprint hash; the de-duplication hint
    browser_id: String,
    email: Option<String>,
    /// Server-issued code from a previous response, if the client kept one
    update_code: Option<String>,
    gender: Option<Gender>,
    /// Height in cm
    height: Option<i64>,
    /// Arm span in cm
    arm_span: Option<i64>,
    #[serde(default)]
    climbed_problem_ids: Vec<String>,
    /// Canonical (original-language) tag keys
    #[serde(default)]
    preferred_tags: Vec<String>,
    #[serde(default)]
    subscribe_newsletter: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    update_code: String,
    dropped_problem_ids: Vec<String>,
    dropped_tag_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TagOption {
    /// Display label
    tag: String,
    /// Canonical key to submit back in `preferred_tags`
    tag_original: String,
    count: i64,
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "questionnaire".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Questionnaire Endpoints
// ============================================================================

/// POST /questionnaire/submit - Create or amend a survey submission
///
/// Unknown problem ids and tag keys never fail the request; they come back
/// in the `dropped_*` arrays. Only malformed scalar fields return 400.
pub async fn submit(
    State(ctx): State<AppContext>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ErrorResponse>)> {
    let signals = IdentitySignals {
        fingerprint: req.browser_id.clone(),
        email: req.email.clone(),
        update_code: req.update_code.clone(),
    };

    let resolution = match identity::resolve(&ctx.db_pool, &signals).await {
        Ok(resolution) => resolution,
        Err(e) => {
            error!("Identity resolution failed: {}", e);
            return Err(internal_error(e));
        }
    };

    let payload = SubmissionPayload {
        fingerprint: req.browser_id,
        email: req.email.filter(|e| !e.trim().is_empty()),
        gender: req.gender,
        height_cm: req.height,
        arm_span_cm: req.arm_span,
        climbed_problem_ids: req.climbed_problem_ids,
        preferred_tag_keys: req.preferred_tags,
        subscribe_newsletter: req.subscribe_newsletter,
    };

    match reconcile::reconcile(&ctx.db_pool, &ctx.taxonomy, resolution, &payload).await {
        Ok(outcome) => {
            info!("Submission {} reconciled", outcome.submission_id);
            Ok(Json(SubmitResponse {
                update_code: outcome.update_code,
                dropped_problem_ids: outcome.dropped_problem_ids,
                dropped_tag_keys: outcome.dropped_tag_keys,
            }))
        }
        Err(Error::Validation { field, message }) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: message,
                field: Some(field),
            }),
        )),
        Err(e) => {
            error!("Submission reconcile failed: {}", e);
            Err(internal_error(e))
        }
    }
}

/// GET /questionnaire/search-problems - Autocomplete problem search
///
/// Queries of length <= 2 return an empty array without touching the
/// catalog.
pub async fn search_problems(
    State(ctx): State<AppContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Problem>>, (StatusCode, Json<ErrorResponse>)> {
    let limit = params
        .limit
        .unwrap_or(catalog::DEFAULT_SEARCH_LIMIT)
        .clamp(1, 100);

    match catalog::search(&ctx.db_pool, &params.q, limit).await {
        Ok(problems) => Ok(Json(problems)),
        Err(e) => {
            error!("Problem search failed: {}", e);
            Err(internal_error(e))
        }
    }
}

/// GET /questionnaire/available-tags - Tag options with usage counts
///
/// Ordered most-used first, display label as tie-break.
pub async fn available_tags(State(ctx): State<AppContext>) -> Json<Vec<TagOption>> {
    let tags = ctx
        .taxonomy
        .list_all()
        .iter()
        .map(|t| TagOption {
            tag: t.display_label.clone(),
            tag_original: t.original_key.clone(),
            count: t.usage_count,
        })
        .collect();
    Json(tags)
}

fn internal_error(e: Error) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("error: {}", e),
            field: None,
        }),
    )
}
