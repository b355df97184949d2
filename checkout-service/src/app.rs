use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use common_observability::CheckoutMetrics;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::admin_handlers::{
    create_campaign, delete_campaign, export_campaigns, get_campaign, list_campaigns, reactivate_campaign,
    suspend_campaign, update_campaign, campaign_statistics,
};
use crate::checkout_handlers::{
    apply_discount, compute_totals_handler, discount_availability, discount_history, get_session, open_session,
    pay, remove_discount, restore_session, update_subtotal, validate_discount,
};
use crate::config::CheckoutConfig;
use crate::countdown::{Clock, SystemClock};
use crate::gateway::{Credentials, GatewayResult, HttpBackend};
use crate::session::SessionStore;

pub const SERVICE_NAME: &str = "checkout-service";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CheckoutConfig>,
    pub backend: HttpBackend,
    pub sessions: Arc<SessionStore>,
    pub metrics: Arc<CheckoutMetrics>,
}

impl AppState {
    pub fn from_config(config: CheckoutConfig) -> GatewayResult<Self> {
        let backend = HttpBackend::new(config.backend_base_url.clone(), config.backend_timeout)?;
        Ok(Self::with_parts(config, backend, Arc::new(SystemClock)))
    }

    /// Explicit backend and clock; tests drive time through a manual clock.
    pub fn with_parts(config: CheckoutConfig, backend: HttpBackend, clock: Arc<dyn Clock>) -> Self {
        let metrics = Arc::new(CheckoutMetrics::new());
        let sessions = Arc::new(SessionStore::new(&config, clock, metrics.clone()));
        Self { config: Arc::new(config), backend, sessions, metrics }
    }

    /// Backend client carrying the caller's credentials.
    pub fn backend_for(&self, headers: &HeaderMap) -> HttpBackend {
        self.backend.with_credentials(credentials_from_headers(headers))
    }
}

/// Bearer token and cookie forwarded from the incoming request.
pub fn credentials_from_headers(headers: &HeaderMap) -> Credentials {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let cookie = headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|c| !c.is_empty());
    Credentials { bearer, cookie }
}

pub async fn health() -> &'static str { "ok" }

async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {e}")),
    }
}

pub async fn http_error_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp.headers().get("X-Error-Code").and_then(|v| v.to_str().ok()).unwrap_or("unknown");
        state.metrics.record_http_error(SERVICE_NAME, code, status.as_u16());
    }
    resp
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            state.config.cors_allowed_origins.iter().filter_map(|o| o.parse::<HeaderValue>().ok()).collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true);

    let checkout = Router::new()
        .route("/checkout/totals", post(compute_totals_handler))
        .route("/discounts/validate", post(validate_discount))
        .route("/discounts/history", get(discount_history))
        .route("/discounts/:code/availability", get(discount_availability))
        .route("/checkout/sessions", post(open_session))
        .route("/checkout/sessions/:hold_id", get(get_session))
        .route("/checkout/sessions/:hold_id/subtotal", put(update_subtotal))
        .route("/checkout/sessions/:hold_id/discount", post(apply_discount).delete(remove_discount))
        .route("/checkout/sessions/:hold_id/pay", post(pay))
        .route("/checkout/sessions/:hold_id/restore", post(restore_session));

    let admin = Router::new()
        .route("/admin/discounts", get(list_campaigns).post(create_campaign))
        .route("/admin/discounts/export", get(export_campaigns))
        .route("/admin/discounts/:id", get(get_campaign).put(update_campaign).delete(delete_campaign))
        .route("/admin/discounts/:id/suspend", post(suspend_campaign))
        .route("/admin/discounts/:id/reactivate", post(reactivate_campaign))
        .route("/admin/discounts/:id/statistics", get(campaign_statistics));

    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .merge(checkout)
        .merge(admin)
        .layer(middleware::from_fn_with_state(state.clone(), http_error_metrics))
        .layer(cors)
        .with_state(state)
}

pub const SWEEP_EVERY: Duration = Duration::from_secs(30);
/// How long an expired session stays readable so the page can see `redirectAway`.
pub const EXPIRED_GRACE: Duration = Duration::from_secs(120);
