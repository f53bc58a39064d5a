use crate::api::AppState;
use crate::error::PipelineError;
use crate::models::{ApprovalOutcome, LineItemEdit, PriceFilter, QuoteFields};
use crate::service::export_csv;
use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// 统一响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

type ApiResult = Result<Response, PipelineError>;

fn respond<T: Serialize>(status: StatusCode, message: impl Into<String>, data: T) -> ApiResult {
    Ok((status, Json(ApiResponse::ok(message, data))).into_response())
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match &self {
            PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
            PipelineError::InvalidInput(_) | PipelineError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            PipelineError::QuoteImmutable(_) | PipelineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            PipelineError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let response = ApiResponse::<()> {
            success: false,
            message: format!("Error: {}", self),
            data: None,
        };
        (status, Json(response)).into_response()
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub organization_id: i64,
    pub file_name: String,
}

/// 上传报价文件 (请求体为原始文件内容)
pub async fn upload_document(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult {
    let doc = state
        .pipeline
        .lifecycle
        .upload(params.organization_id, &params.file_name, &body)
        .await?;
    respond(StatusCode::CREATED, format!("Document {} queued for extraction", doc.id), doc)
}

/// 轮询文档状态
pub async fn get_document(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let doc = state.pipeline.lifecycle.status(id).await?;
    respond(StatusCode::OK, doc.status.as_str(), doc)
}

/// 抽取服务回调
pub async fn deliver_extraction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult {
    let lifecycle = &state.pipeline.lifecycle;
    let transition = lifecycle.deliver_payload(id, &body).await?;
    let doc = lifecycle.status(id).await?;
    let message = if transition.is_applied() {
        format!("Document {} is now {}", id, doc.status)
    } else {
        format!("Document {} is {}, result ignored", id, doc.status)
    };
    respond(StatusCode::OK, message, doc)
}

/// 复核页面数据
pub async fn get_quote(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let detail = state.pipeline.review.get_draft(id).await?;
    respond(StatusCode::OK, format!("Quote {}", id), detail)
}

#[derive(Debug, Deserialize)]
pub struct SaveReviewRequest {
    #[serde(default)]
    pub quote: QuoteFields,
    #[serde(default)]
    pub line_items: Vec<LineItemEdit>,
}

/// 保存复核修改
pub async fn save_quote(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SaveReviewRequest>,
) -> ApiResult {
    let detail = state.pipeline.review.save(id, req.quote, req.line_items).await?;
    let warnings = detail.quote.raw_extraction.warnings.len();
    respond(
        StatusCode::OK,
        format!("Quote {} saved with {} warnings", id, warnings),
        detail,
    )
}

/// 审批报价
pub async fn approve_quote(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    match state.pipeline.review.approve(id).await? {
        ApprovalOutcome::Approved(doc) => respond(
            StatusCode::OK,
            format!("Quote {} approved, material matching queued", id),
            doc,
        ),
        ApprovalOutcome::AlreadyApproved => {
            let doc = state.pipeline.review.get_draft(id).await?.document;
            respond(StatusCode::OK, format!("Quote {} already approved", id), doc)
        }
        // approve() 已把 NotReviewable 转为错误
        ApprovalOutcome::NotReviewable(doc) => Err(PipelineError::InvalidTransition {
            document_id: doc.id,
            from: doc.status,
            to: crate::models::DocumentStatus::Approved,
        }),
    }
}

/// 目录更新后重新匹配
pub async fn rematch_quote(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    state.pipeline.review.rematch(id).await?;
    respond(StatusCode::ACCEPTED, format!("Quote {} queued for matching", id), id)
}

/// 已审批价格检索
pub async fn search_prices(State(state): State<AppState>, Query(filter): Query<PriceFilter>) -> ApiResult {
    let rows = state.pipeline.prices.search_verified_prices(&filter).await?;
    respond(StatusCode::OK, format!("{} price rows", rows.len()), rows)
}

/// 导出 CSV
pub async fn export_prices(State(state): State<AppState>, Query(filter): Query<PriceFilter>) -> ApiResult {
    let rows = state.pipeline.prices.search_verified_prices(&filter).await?;
    let mut buffer = Vec::new();
    export_csv(&rows, &mut buffer)?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"verified_prices.csv\""),
        ],
        buffer,
    )
        .into_response())
}

pub async fn material_history(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let points = state.pipeline.prices.price_history(id).await?;
    respond(StatusCode::OK, format!("{} price points", points.len()), points)
}

pub async fn material_suppliers(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let summary = state.pipeline.prices.supplier_summary(id).await?;
    respond(StatusCode::OK, format!("{} suppliers", summary.len()), summary)
}

pub async fn category_summary(State(state): State<AppState>) -> ApiResult {
    let summary = state.pipeline.prices.category_summary().await?;
    respond(StatusCode::OK, format!("{} categories", summary.len()), summary)
}

#[derive(Debug, Deserialize)]
pub struct UnmatchedParams {
    pub limit: Option<i64>,
}

/// 待人工映射的明细
pub async fn unmatched_line_items(
    State(state): State<AppState>,
    Query(params): Query<UnmatchedParams>,
) -> ApiResult {
    let items = state.pipeline.prices.unmatched_line_items(params.limit).await?;
    respond(StatusCode::OK, format!("{} unmatched line items", items.len()), items)
}
