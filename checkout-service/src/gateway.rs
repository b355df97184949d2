//! Backend API client.
//!
//! Every outbound call goes through [`HttpBackend`], which attaches the caller's credentials and
//! folds transport failures and non-2xx responses into [`GatewayError`]. Orchestration code is
//! written against the [`BackendApi`] trait so tests can substitute an in-memory backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_http_errors::ErrorBody;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("backend unreachable: {0}")]
    Transport(String),
    #[error("backend request timed out")]
    Timeout,
    #[error("authentication required")]
    Unauthorized { message: Option<String> },
    #[error("forbidden ({code})")]
    Forbidden { code: String, message: Option<String> },
    #[error("not found ({code})")]
    NotFound { code: String, message: Option<String> },
    #[error("conflict ({code})")]
    Conflict { code: String, message: Option<String> },
    #[error("rejected with HTTP {status} ({code})")]
    Rejected { status: u16, code: String, message: Option<String> },
    #[error("backend error HTTP {status}")]
    Server { status: u16, message: Option<String> },
    #[error("unexpected backend payload: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Transport-level failures; the UI offers a manual retry for these.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Timeout)
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            GatewayError::Forbidden { code, .. }
            | GatewayError::NotFound { code, .. }
            | GatewayError::Conflict { code, .. }
            | GatewayError::Rejected { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            GatewayError::Unauthorized { message }
            | GatewayError::Forbidden { message, .. }
            | GatewayError::NotFound { message, .. }
            | GatewayError::Conflict { message, .. }
            | GatewayError::Rejected { message, .. }
            | GatewayError::Server { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

// --- wire types ---

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidateDiscountRequest {
    pub code: String,
    pub order_total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscountPayload {
    pub code: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
    #[serde(default)]
    pub maximum_discount: Option<i64>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidateDiscountResponse {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub discount: Option<DiscountPayload>,
    #[serde(default)]
    pub discount_amount: Option<i64>,
    #[serde(default)]
    pub final_total: Option<i64>,
    #[serde(default)]
    pub savings: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub minimum_purchase: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscountAvailability {
    pub code: String,
    pub available: bool,
    #[serde(default)]
    pub remaining_uses: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscountRedemption {
    pub code: String,
    pub order_id: String,
    pub discount_amount: i64,
    pub redeemed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HoldItem {
    #[serde(default)]
    pub seat_id: Option<String>,
    #[serde(default)]
    pub ticket_type: Option<String>,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 { 1 }

/// Backend-owned reservation; the service only ever keeps a read-only copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReservationHold {
    pub hold_id: Uuid,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<HoldItem>,
    pub total_cents: i64,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub show_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub hold_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    #[serde(alias = "id")]
    pub order_id: String,
    #[serde(default)]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Payer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub identification_type: String,
    #[serde(default)]
    pub identification_number: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPreferenceRequest {
    pub order_id: String,
    pub payer: Payer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentPreference {
    pub preference_id: Option<String>,
    pub redirect_url: String,
    /// Authoritative amount in minor units, when the backend reports one.
    pub total: Option<i64>,
}

const URL_KEYS: &[&str] = &["init_point", "initPoint", "redirect_url", "redirectUrl", "url"];
const AMOUNT_KEYS: &[&str] = &["total", "amount", "transaction_amount", "transactionAmount"];
const ID_KEYS: &[&str] = &["id", "preference_id", "preferenceId"];

impl PaymentPreference {
    /// Extract the redirect URL and amount from the gateway's loosely shaped response. Fields
    /// are looked up at the top level first, then under `data`.
    pub fn from_value(value: &serde_json::Value) -> GatewayResult<Self> {
        let scopes = [Some(value), value.get("data")];
        let lookup_str = |keys: &[&str]| {
            scopes.iter().flatten().find_map(|scope| {
                keys.iter().find_map(|k| scope.get(*k).and_then(|v| v.as_str()).filter(|s| !s.is_empty()))
            })
        };
        let redirect_url = lookup_str(URL_KEYS)
            .ok_or_else(|| GatewayError::Decode("payment preference without redirect url".into()))?
            .to_string();
        let total = scopes.iter().flatten().find_map(|scope| {
            AMOUNT_KEYS.iter().find_map(|k| {
                let v = scope.get(*k)?;
                v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64))
            })
        });
        let preference_id = lookup_str(ID_KEYS).map(str::to_string);
        Ok(Self { preference_id, redirect_url, total })
    }
}

/// Seam between orchestration code and the backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn validate_discount(&self, req: &ValidateDiscountRequest) -> GatewayResult<ValidateDiscountResponse>;
    async fn discount_availability(&self, code: &str) -> GatewayResult<DiscountAvailability>;
    async fn discount_history(&self) -> GatewayResult<Vec<DiscountRedemption>>;
    async fn fetch_hold(&self, hold_id: Uuid) -> GatewayResult<ReservationHold>;
    async fn create_order(&self, req: &CreateOrderRequest) -> GatewayResult<CreatedOrder>;
    async fn create_payment_preference(&self, req: &PaymentPreferenceRequest) -> GatewayResult<PaymentPreference>;
}

/// Caller credentials forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub bearer: Option<String>,
    pub cookie: Option<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { bearer: Some(token.into()), cookie: None }
    }

    pub fn is_anonymous(&self) -> bool { self.bearer.is_none() && self.cookie.is_none() }
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), credentials: Credentials::default() }
    }

    /// Same connection pool, different caller.
    pub fn with_credentials(&self, credentials: Credentials) -> Self {
        Self { client: self.client.clone(), base_url: self.base_url.clone(), credentials }
    }

    pub fn base_url(&self) -> &str { &self.base_url }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base_url, path) }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder;
        if let Some(token) = &self.credentials.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(cookie) = &self.credentials.cookie {
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> GatewayResult<Response> {
        let resp = self.authorize(builder).send().await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(error_from_response(resp).await)
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        debug!(path, "backend GET");
        let resp = self.send(self.client.get(self.url(path))).await?;
        resp.json::<T>().await.map_err(|e| GatewayError::Decode(e.to_string()))
    }

    pub(crate) async fn get_json_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(&self, path: &str, query: &Q) -> GatewayResult<T> {
        debug!(path, "backend GET");
        let resp = self.send(self.client.get(self.url(path)).query(query)).await?;
        resp.json::<T>().await.map_err(|e| GatewayError::Decode(e.to_string()))
    }

    pub(crate) async fn get_text(&self, path: &str) -> GatewayResult<String> {
        let resp = self.send(self.client.get(self.url(path))).await?;
        resp.text().await.map_err(GatewayError::from)
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> GatewayResult<T> {
        debug!(path, "backend POST");
        let resp = self.send(self.client.post(self.url(path)).json(body)).await?;
        resp.json::<T>().await.map_err(|e| GatewayError::Decode(e.to_string()))
    }

    pub(crate) async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> GatewayResult<T> {
        debug!(path, "backend PUT");
        let resp = self.send(self.client.put(self.url(path)).json(body)).await?;
        resp.json::<T>().await.map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// POST without a meaningful response body.
    pub(crate) async fn post_empty(&self, path: &str) -> GatewayResult<()> {
        debug!(path, "backend POST");
        self.send(self.client.post(self.url(path))).await.map(|_| ())
    }

    pub(crate) async fn delete(&self, path: &str) -> GatewayResult<()> {
        debug!(path, "backend DELETE");
        self.send(self.client.delete(self.url(path))).await.map(|_| ())
    }
}

async fn error_from_response(resp: Response) -> GatewayError {
    let status = resp.status().as_u16();
    let body: ErrorBody = resp.json().await.unwrap_or_default();
    let ErrorBody { code, message, .. } = body;
    match status {
        401 => GatewayError::Unauthorized { message },
        403 => GatewayError::Forbidden { code, message },
        404 => GatewayError::NotFound { code, message },
        409 => GatewayError::Conflict { code, message },
        s if s >= 500 => GatewayError::Server { status: s, message },
        s => GatewayError::Rejected { status: s, code, message },
    }
}

/// Path segment encoding for user-supplied codes.
pub(crate) fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn validate_discount(&self, req: &ValidateDiscountRequest) -> GatewayResult<ValidateDiscountResponse> {
        self.post_json("/discounts/validate", req).await
    }

    async fn discount_availability(&self, code: &str) -> GatewayResult<DiscountAvailability> {
        self.get_json(&format!("/discounts/{}/availability", encode_segment(code))).await
    }

    async fn discount_history(&self) -> GatewayResult<Vec<DiscountRedemption>> {
        self.get_json("/discounts/history").await
    }

    async fn fetch_hold(&self, hold_id: Uuid) -> GatewayResult<ReservationHold> {
        self.get_json(&format!("/holds/{hold_id}")).await
    }

    async fn create_order(&self, req: &CreateOrderRequest) -> GatewayResult<CreatedOrder> {
        self.post_json("/orders", req).await
    }

    async fn create_payment_preference(&self, req: &PaymentPreferenceRequest) -> GatewayResult<PaymentPreference> {
        let value: serde_json::Value = self.post_json("/payments/preference", req).await?;
        PaymentPreference::from_value(&value)
    }
}
