//! JSON API for the requisition workflow and the notification subsystem.
//!
//! Endpoints:
//! - `POST /api/requisitions`                      — create a requisition
//! - `GET  /api/requisitions`                      — list by status (`?status=&limit=`)
//! - `GET  /api/requisitions/{id}`                 — fetch one requisition
//! - `POST /api/requisitions/{id}/approve`         — approve (`{ actor_id }`)
//! - `POST /api/requisitions/{id}/reject`          — reject (`{ actor_id, reason }`)
//! - `POST /api/requisitions/{id}/arrive`          — mark arrived and close
//! - `GET  /api/notifications/{recipient_id}`      — in-app feed (`?limit=`)
//! - `POST /api/notifications/{id}/read`           — flip the read flag
//! - `POST /api/notifications/retry`               — run a retry sweep

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use reqflow_core::domain::org::EmployeeId;
use reqflow_core::domain::requisition::{Requisition, RequisitionId, RequisitionStatus};
use reqflow_core::domain::notification::{NotificationId, NotificationRecord};
use reqflow_db::repositories::NotificationLedger;
use reqflow_notify::RetrySweeper;

use crate::workflow::{NewLine, NewRequisition, RequisitionService, WorkflowError};

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<RequisitionService>,
    pub ledger: Arc<dyn NotificationLedger>,
    pub sweeper: Arc<RetrySweeper>,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateLineRequest {
    pub product_ref: String,
    pub quantity: u32,
    pub unit_price: rust_decimal::Decimal,
    pub total_override: Option<rust_decimal::Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequisitionRequest {
    pub requester_id: String,
    pub cost_center: String,
    pub note: Option<String>,
    pub lines: Vec<CreateLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub actor_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct FeedQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RetryRequest {
    pub max_retries: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LineResponse {
    pub product_ref: String,
    pub quantity: u32,
    pub unit_price: String,
    pub line_total: String,
}

#[derive(Debug, Serialize)]
pub struct RequisitionResponse {
    pub id: String,
    pub requester_id: String,
    pub status: String,
    pub cost_center: String,
    pub note: Option<String>,
    pub total_amount: String,
    pub lines: Vec<LineResponse>,
    pub submitted_at: String,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub kind: String,
    pub priority: String,
    pub status: String,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub total_failed: usize,
    pub retry_succeeded: usize,
    pub retry_failed: usize,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

impl From<&Requisition> for RequisitionResponse {
    fn from(requisition: &Requisition) -> Self {
        Self {
            id: requisition.id.0.clone(),
            requester_id: requisition.requester_id.0.clone(),
            status: requisition.status.as_str().to_string(),
            cost_center: requisition.cost_center.0.clone(),
            note: requisition.note.clone(),
            total_amount: requisition.total_amount().to_string(),
            lines: requisition
                .lines
                .iter()
                .map(|line| LineResponse {
                    product_ref: line.product_ref.0.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price.to_string(),
                    line_total: line.line_total().to_string(),
                })
                .collect(),
            submitted_at: requisition.submitted_at.to_rfc3339(),
            rejection_reason: requisition.rejection_reason.clone(),
        }
    }
}

impl From<&NotificationRecord> for NotificationResponse {
    fn from(record: &NotificationRecord) -> Self {
        Self {
            id: record.id.0.clone(),
            subject: record.subject.clone(),
            body: record.body.clone(),
            kind: record.kind.as_str().to_string(),
            priority: record.priority.as_str().to_string(),
            status: record.status.as_str().to_string(),
            read: record.read,
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

fn error_response(error: WorkflowError) -> (StatusCode, Json<ApiError>) {
    let status = match &error {
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::Domain(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Repository(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ApiError { error: error.to_string() }))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/requisitions", post(create_requisition).get(list_requisitions))
        .route("/api/requisitions/{id}", get(get_requisition))
        .route("/api/requisitions/{id}/approve", post(approve_requisition))
        .route("/api/requisitions/{id}/reject", post(reject_requisition))
        .route("/api/requisitions/{id}/arrive", post(arrive_requisition))
        .route("/api/notifications/{recipient_id}", get(notification_feed))
        .route("/api/notifications/{id}/read", post(mark_notification_read))
        .route("/api/notifications/retry", post(retry_notifications))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_requisition(
    State(state): State<ApiState>,
    Json(request): Json<CreateRequisitionRequest>,
) -> impl IntoResponse {
    let new = NewRequisition {
        requester_id: request.requester_id,
        cost_center: request.cost_center,
        note: request.note,
        lines: request
            .lines
            .into_iter()
            .map(|line| NewLine {
                product_ref: line.product_ref,
                quantity: line.quantity,
                unit_price: line.unit_price,
                total_override: line.total_override,
            })
            .collect(),
    };

    match state.service.create(new).await {
        Ok(requisition) => {
            (StatusCode::CREATED, Json(RequisitionResponse::from(&requisition))).into_response()
        }
        Err(error) => error_response(error).into_response(),
    }
}

async fn list_requisitions(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let status_raw = query.status.as_deref().unwrap_or("pending");
    let Some(status) = RequisitionStatus::parse(status_raw) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError { error: format!("unknown requisition status `{status_raw}`") }),
        )
            .into_response();
    };

    let limit = query.limit.unwrap_or(50).min(200);
    match state.service.list(status, limit).await {
        Ok(requisitions) => {
            let listed: Vec<RequisitionResponse> =
                requisitions.iter().map(RequisitionResponse::from).collect();
            Json(listed).into_response()
        }
        Err(error) => error_response(error).into_response(),
    }
}

async fn get_requisition(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.find(&RequisitionId(id)).await {
        Ok(requisition) => Json(RequisitionResponse::from(&requisition)).into_response(),
        Err(error) => error_response(error).into_response(),
    }
}

async fn approve_requisition(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> impl IntoResponse {
    let requisition_id = RequisitionId(id);
    match state.service.approve(&requisition_id, EmployeeId(request.actor_id)).await {
        Ok(status) => Json(StatusResponse {
            id: requisition_id.0,
            status: status.as_str().to_string(),
        })
        .into_response(),
        Err(error) => error_response(error).into_response(),
    }
}

async fn reject_requisition(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<RejectRequest>,
) -> impl IntoResponse {
    let requisition_id = RequisitionId(id);
    match state
        .service
        .reject(&requisition_id, EmployeeId(request.actor_id), &request.reason)
        .await
    {
        Ok(status) => Json(StatusResponse {
            id: requisition_id.0,
            status: status.as_str().to_string(),
        })
        .into_response(),
        Err(error) => error_response(error).into_response(),
    }
}

async fn arrive_requisition(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> impl IntoResponse {
    let requisition_id = RequisitionId(id);
    match state.service.mark_arrived(&requisition_id, EmployeeId(request.actor_id)).await {
        Ok(status) => Json(StatusResponse {
            id: requisition_id.0,
            status: status.as_str().to_string(),
        })
        .into_response(),
        Err(error) => error_response(error).into_response(),
    }
}

async fn notification_feed(
    State(state): State<ApiState>,
    Path(recipient_id): Path<String>,
    Query(query): Query<FeedQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).min(200);
    match state.ledger.query_for_recipient(&EmployeeId(recipient_id), limit).await {
        Ok(records) => {
            let feed: Vec<NotificationResponse> =
                records.iter().map(NotificationResponse::from).collect();
            Json(feed).into_response()
        }
        Err(repo_error) => {
            error!(error = %repo_error, "notification feed query failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiError { error: "notification feed unavailable".to_string() }),
            )
                .into_response()
        }
    }
}

async fn mark_notification_read(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.ledger.mark_read(&NotificationId(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(repo_error) => {
            error!(error = %repo_error, "mark-read failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiError { error: "notification update unavailable".to_string() }),
            )
                .into_response()
        }
    }
}

async fn retry_notifications(
    State(state): State<ApiState>,
    Json(request): Json<RetryRequest>,
) -> impl IntoResponse {
    let limit = request.max_retries.unwrap_or_else(|| state.sweeper.default_max_retries());
    match state.sweeper.run_with_limit(limit).await {
        Ok(report) => Json(RetryResponse {
            total_failed: report.total_failed,
            retry_succeeded: report.retry_succeeded,
            retry_failed: report.retry_failed,
        })
        .into_response(),
        Err(repo_error) => {
            error!(error = %repo_error, "manual retry sweep failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiError { error: "retry sweep unavailable".to_string() }),
            )
                .into_response()
        }
    }
}
