//! HTTP处理器

use crate::error::ApiError;
use crate::tenant::Tenant;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use ivf_admin::WorkflowMetrics;
use ivf_core::*;
use ivf_workflow::CycleWorkflow;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<CycleWorkflow>,
    pub metrics: WorkflowMetrics,
}

type ApiResult<T> = std::result::Result<T, ApiError>;

impl AppState {
    pub fn new(workflow: Arc<CycleWorkflow>, metrics: WorkflowMetrics) -> Self {
        Self { workflow, metrics }
    }

    /// 记录操作指标并转换为响应
    fn respond<T: Serialize>(&self, operation: &str, result: Result<T>) -> ApiResult<Json<T>> {
        self.metrics.record(operation, &result);
        Ok(Json(result?))
    }

    fn created<T: Serialize>(&self, operation: &str, result: Result<T>) -> ApiResult<(StatusCode, Json<T>)> {
        self.respond(operation, result).map(|body| (StatusCode::CREATED, body))
    }
}

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "IVF Cycle API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "/health",
            "metrics": "/metrics",
            "api": "/api/v1"
        }
    }))
}

/// 健康检查处理器
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_secs": state.metrics.uptime_secs(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus指标
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.export() {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(e) => {
            error!("Failed to export metrics: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn start_cycle(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(req): Json<StartCycleRequest>,
) -> ApiResult<(StatusCode, Json<Cycle>)> {
    let result = state.workflow.start_cycle(&ctx, req).await;
    state.created("start_cycle", result)
}

pub async fn list_patient_cycles(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(patient_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Cycle>>> {
    debug!("Listing cycles of patient {}", patient_id);
    let result = state.workflow.list_patient_cycles(&ctx, patient_id).await;
    state.respond("list_patient_cycles", result)
}

pub async fn get_cycle(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
) -> ApiResult<Json<CycleDetail>> {
    let result = state.workflow.get_cycle_detail(&ctx, cycle_id).await;
    state.respond("get_cycle_detail", result)
}

pub async fn set_stage(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<SetStageRequest>,
) -> ApiResult<Json<Cycle>> {
    let result = state.workflow.set_stage(&ctx, cycle_id, req).await;
    state.respond("set_stage", result)
}

pub async fn record_monitoring(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<MonitoringRequest>,
) -> ApiResult<(StatusCode, Json<MonitoringEntry>)> {
    let result = state.workflow.record_monitoring(&ctx, cycle_id, req).await;
    state.created("record_monitoring", result)
}

pub async fn record_egg_retrieval(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<EggRetrievalRequest>,
) -> ApiResult<(StatusCode, Json<EggRetrieval>)> {
    let result = state.workflow.record_egg_retrieval(&ctx, cycle_id, req).await;
    state.created("record_egg_retrieval", result)
}

pub async fn record_sperm_sample(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<SpermSampleRequest>,
) -> ApiResult<(StatusCode, Json<SpermSample>)> {
    let result = state.workflow.record_sperm_sample(&ctx, cycle_id, req).await;
    state.created("record_sperm_sample", result)
}

pub async fn record_fertilization(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<FertilizationRequest>,
) -> ApiResult<(StatusCode, Json<FertilizationResult>)> {
    let result = state.workflow.record_fertilization(&ctx, cycle_id, req).await;
    state.created("record_fertilization", result)
}

pub async fn list_cycle_embryos(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Embryo>>> {
    let result = state.workflow.list_cycle_embryos(&ctx, cycle_id).await;
    state.respond("list_cycle_embryos", result)
}

pub async fn update_embryo_development(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(embryo_id): Path<Uuid>,
    Json(req): Json<DevelopmentRequest>,
) -> ApiResult<Json<Embryo>> {
    let result = state.workflow.update_embryo_development(&ctx, embryo_id, req).await;
    state.respond("update_embryo_development", result)
}

pub async fn set_embryo_status(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(embryo_id): Path<Uuid>,
    Json(req): Json<EmbryoStatusRequest>,
) -> ApiResult<Json<Embryo>> {
    let result = state.workflow.set_embryo_status(&ctx, embryo_id, req).await;
    state.respond("set_embryo_status", result)
}

pub async fn transfer_embryos(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<(StatusCode, Json<EmbryoTransfer>)> {
    let result = state.workflow.transfer_embryos(&ctx, cycle_id, req).await;
    state.created("transfer_embryos", result)
}

pub async fn freeze_embryos(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<FreezeRequest>,
) -> ApiResult<(StatusCode, Json<CryopreservationRecord>)> {
    let result = state.workflow.freeze_embryos(&ctx, cycle_id, req).await;
    state.created("freeze_embryos", result)
}

pub async fn record_outcome(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(cycle_id): Path<Uuid>,
    Json(req): Json<OutcomeRequest>,
) -> ApiResult<(StatusCode, Json<PregnancyOutcome>)> {
    let result = state.workflow.record_outcome(&ctx, cycle_id, req).await;
    state.created("record_outcome", result)
}
