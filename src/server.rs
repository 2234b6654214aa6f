use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::assessment::{
    submit, summarize_history, verify_stored, Assessment, AssessmentId, AuditLogEntry,
    HistorySummary, SubmissionRequest, VerificationReport,
};
use crate::config::Config;
use crate::criteria::{CriteriaVersionInfo, VersionedCriteria};
use crate::error::SubmissionError;
use crate::store::AssessmentStore;

#[derive(Clone)]
struct ApiState {
    config: Config,
    db_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        let status = match &err {
            SubmissionError::EmptyDevco => StatusCode::BAD_REQUEST,
            SubmissionError::Evaluation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SubmissionError::NoActiveCriteria | SubmissionError::Configuration(_) => {
                StatusCode::CONFLICT
            }
            SubmissionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("{err}");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Clone, Default, Deserialize)]
struct ListQuery {
    devco: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct AssessmentListResponse {
    summary: HistorySummary,
    assessments: Vec<Assessment>,
}

pub async fn run_server(config: Config, bind: SocketAddr) -> Result<()> {
    let state = ApiState {
        db_path: config.resolved_db_path(),
        config,
    };
    // Fail at startup rather than on the first request.
    AssessmentStore::open(&state.db_path)?;

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("REST API listening on http://{bind}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/v1/config", get(show_config))
        .route("/v1/criteria", get(active_criteria))
        .route("/v1/criteria/versions", get(criteria_versions))
        .route(
            "/v1/assessments",
            get(list_assessments).post(submit_assessment),
        )
        .route("/v1/assessments/:id", get(get_assessment))
        .route("/v1/assessments/:id/verify", get(verify_assessment))
        .route("/v1/audit", get(audit_log))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn show_config(State(state): State<ApiState>) -> Json<ApiResponse<Config>> {
    ok(state.config)
}

async fn active_criteria(State(state): State<ApiState>) -> ApiResult<VersionedCriteria> {
    let store = open_store(&state)?;
    let criteria = store
        .active_criteria()
        .map_err(ApiError::internal)?
        .ok_or(SubmissionError::NoActiveCriteria)?;
    Ok(ok(criteria))
}

async fn criteria_versions(State(state): State<ApiState>) -> ApiResult<Vec<CriteriaVersionInfo>> {
    let store = open_store(&state)?;
    let versions = store
        .list_criteria_versions()
        .map_err(ApiError::internal)?;
    Ok(ok(versions))
}

async fn submit_assessment(
    State(state): State<ApiState>,
    Json(request): Json<SubmissionRequest>,
) -> ApiResult<Assessment> {
    let mut store = open_store(&state)?;
    let assessment = submit(&mut store, request, &state.config.audit.actor)?;
    Ok(ok(assessment))
}

async fn list_assessments(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<AssessmentListResponse> {
    let store = open_store(&state)?;
    let devco = query.devco.as_deref().filter(|d| !d.trim().is_empty());
    let limit = query.limit.unwrap_or(state.config.server.default_limit);
    let assessments = store
        .list_assessments(devco, limit)
        .map_err(ApiError::internal)?;
    Ok(ok(AssessmentListResponse {
        summary: summarize_history(devco, &assessments),
        assessments,
    }))
}

async fn get_assessment(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Assessment> {
    let store = open_store(&state)?;
    let assessment = store
        .load_assessment(AssessmentId(id))
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("assessment {id} not found")))?;
    Ok(ok(assessment))
}

async fn verify_assessment(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<VerificationReport> {
    let store = open_store(&state)?;
    let report = verify_stored(&store, AssessmentId(id))
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("assessment {id} not found")))?;
    Ok(ok(report))
}

async fn audit_log(
    State(state): State<ApiState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Vec<AuditLogEntry>> {
    let store = open_store(&state)?;
    let limit = query.limit.unwrap_or(state.config.server.default_limit);
    let entries = store.audit_log(limit).map_err(ApiError::internal)?;
    Ok(ok(entries))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

fn open_store(state: &ApiState) -> std::result::Result<AssessmentStore, ApiError> {
    AssessmentStore::open(&state.db_path)
        .map_err(|e| ApiError::from(SubmissionError::Store(e)))
}
