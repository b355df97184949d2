use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use common_http_errors::{ApiError, ApiResult};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::discount::{DiscountDescriptor, DiscountQuote, DiscountResolver, Rejection, RejectionReason};
use crate::app::credentials_from_headers;
use crate::gateway::{DiscountAvailability, DiscountRedemption, GatewayError, HttpBackend, Payer};
use crate::payment::{NextStep, PaymentError, PaymentRedirect};
use crate::session::{SessionError, SessionView};
use crate::totals::{compute_totals_with_rate, OrderTotals};

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized { message } => ApiError::Unauthorized { message },
            GatewayError::Forbidden { message, .. } => ApiError::Forbidden { code: "forbidden", message },
            GatewayError::NotFound { .. } => ApiError::not_found("not_found"),
            GatewayError::Conflict { message, .. } => ApiError::Conflict { code: "conflict", message, navigate: None },
            GatewayError::Rejected { message, .. } => ApiError::Unprocessable { code: "rejected", message },
            GatewayError::Transport(_) | GatewayError::Timeout => {
                ApiError::BadGateway { code: "backend_unavailable", message: Some(err.to_string()), retryable: true }
            }
            GatewayError::Server { .. } | GatewayError::Decode(_) => {
                ApiError::BadGateway { code: "backend_error", message: Some(err.to_string()), retryable: false }
            }
        }
    }
}

impl From<Rejection> for ApiError {
    fn from(r: Rejection) -> Self {
        match r.reason {
            RejectionReason::Unauthenticated => ApiError::Unauthorized { message: Some(r.message) },
            RejectionReason::NetworkOrServerError => {
                ApiError::BadGateway { code: r.reason.code(), message: Some(r.message), retryable: true }
            }
            RejectionReason::EmptyCode | RejectionReason::InvalidOrderTotal => {
                ApiError::BadRequest { code: r.reason.code(), trace_id: None, message: Some(r.message) }
            }
            reason => ApiError::Unprocessable { code: reason.code(), message: Some(r.message) },
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        let code = err.code();
        let message = Some(err.to_string());
        let navigate = match err.next_step() {
            NextStep::SeatSelection => Some(NextStep::SeatSelection.as_str()),
            _ => None,
        };
        match err {
            PaymentError::InvalidPayer(fields) => ApiError::Invalid { code, fields },
            PaymentError::HoldExpired => ApiError::Gone { code, message, navigate },
            PaymentError::AlreadyRedirecting
            | PaymentError::DiscountPending
            | PaymentError::SeatsInOtherOrders
            | PaymentError::OrderConflict(_) => ApiError::Conflict { code, message, navigate },
            PaymentError::Unauthenticated => ApiError::Unauthorized { message },
            PaymentError::Forbidden(_) => ApiError::Forbidden { code, message },
            PaymentError::Reconcile(_) => ApiError::Misconfigured { code, message },
            PaymentError::Transport(_) => ApiError::BadGateway { code, message, retryable: true },
            PaymentError::Backend(_) => ApiError::BadGateway { code, message, retryable: false },
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ApiError::not_found("session_not_found"),
            SessionError::Expired(_) => ApiError::Gone {
                code: "hold_expired",
                message: Some(err.to_string()),
                navigate: Some(NextStep::SeatSelection.as_str()),
            },
            SessionError::InvalidSubtotal(_) => ApiError::bad_request("invalid_subtotal", err.to_string()),
            SessionError::Rejected(r) => r.into(),
            SessionError::Payment(p) => p.into(),
            SessionError::Gateway(g) => g.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsRequest {
    pub subtotal: i64,
    #[serde(default)]
    pub discount: Option<DiscountDescriptor>,
}

pub async fn compute_totals_handler(
    State(state): State<AppState>,
    Json(req): Json<TotalsRequest>,
) -> ApiResult<Json<OrderTotals>> {
    if req.subtotal < 0 {
        return Err(ApiError::bad_request("invalid_subtotal", "subtotal must not be negative"));
    }
    let totals = compute_totals_with_rate(req.subtotal, req.discount.as_ref(), state.config.service_charge_bps);
    Ok(Json(totals))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateDiscountBody {
    pub code: String,
    pub order_total: i64,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub show_id: Option<String>,
}

pub async fn validate_discount(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ValidateDiscountBody>,
) -> ApiResult<Json<DiscountQuote>> {
    let backend = state.backend_for(&headers);
    let outcome = DiscountResolver::new(&backend)
        .validate(&body.code, body.order_total, body.event_id.as_deref(), body.show_id.as_deref())
        .await;
    match outcome {
        Ok(quote) => {
            state.metrics.record_validation("applied");
            Ok(Json(quote))
        }
        Err(rejection) => {
            state.metrics.record_validation(if rejection.retryable { "error" } else { "rejected" });
            Err(rejection.into())
        }
    }
}

pub async fn discount_availability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> ApiResult<Json<DiscountAvailability>> {
    let backend = state.backend_for(&headers);
    let availability = DiscountResolver::new(&backend).check_availability(&code).await?;
    Ok(Json(availability))
}

pub async fn discount_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<DiscountRedemption>>> {
    let backend = state.backend_for(&headers);
    let history = DiscountResolver::new(&backend).history().await?;
    Ok(Json(history))
}

/// Session routes act on a reservation that belongs to a signed-in buyer; anonymous callers
/// are turned away before the session is looked up.
fn signed_in_backend(state: &AppState, headers: &HeaderMap) -> ApiResult<HttpBackend> {
    let credentials = credentials_from_headers(headers);
    if credentials.is_anonymous() {
        return Err(ApiError::Unauthorized { message: Some("sign in to continue with checkout".into()) });
    }
    Ok(state.backend.with_credentials(credentials))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionBody {
    pub hold_id: Uuid,
}

pub async fn open_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<OpenSessionBody>,
) -> ApiResult<(StatusCode, Json<SessionView>)> {
    let backend = signed_in_backend(&state, &headers)?;
    let view = state.sessions.open(&backend, body.hold_id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    signed_in_backend(&state, &headers)?;
    Ok(Json(state.sessions.view(hold_id)?))
}

#[derive(Debug, Deserialize)]
pub struct SubtotalBody {
    pub subtotal: i64,
}

pub async fn update_subtotal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
    Json(body): Json<SubtotalBody>,
) -> ApiResult<Json<SessionView>> {
    let backend = signed_in_backend(&state, &headers)?;
    let view = state.sessions.set_subtotal(&backend, hold_id, body.subtotal).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct ApplyDiscountBody {
    pub code: String,
}

pub async fn apply_discount(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
    Json(body): Json<ApplyDiscountBody>,
) -> ApiResult<Json<SessionView>> {
    let backend = signed_in_backend(&state, &headers)?;
    let view = state.sessions.apply_discount(&backend, hold_id, &body.code).await?;
    Ok(Json(view))
}

pub async fn remove_discount(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    signed_in_backend(&state, &headers)?;
    Ok(Json(state.sessions.remove_discount(hold_id)?))
}

#[derive(Debug, Deserialize)]
pub struct PayBody {
    pub payer: Payer,
}

pub async fn pay(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
    Json(body): Json<PayBody>,
) -> ApiResult<Json<PaymentRedirect>> {
    let backend = signed_in_backend(&state, &headers)?;
    match state.sessions.pay(&backend, hold_id, body.payer).await {
        Ok(redirect) => {
            info!(%hold_id, order_id = %redirect.order_id, "payment redirect issued");
            Ok(Json(redirect))
        }
        Err(err) => {
            warn!(%hold_id, error = %err, "payment handoff failed");
            Err(err.into())
        }
    }
}

pub async fn restore_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    signed_in_backend(&state, &headers)?;
    Ok(Json(state.sessions.restore(hold_id)?))
}
