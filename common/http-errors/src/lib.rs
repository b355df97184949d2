use axum::{http::{StatusCode, HeaderValue}, response::{IntoResponse, Response}, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire shape of every error body, both the ones this service emits and the ones the
/// backend API returns (fields it does not send are left empty).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ErrorBody {
    #[serde(default, alias = "error")]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub trace_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub retryable: Option<bool>,
    /// Where the client should go next (`login`, `seat_selection`, `away`).
    #[serde(default, skip_serializing_if = "Option::is_none")] pub navigate: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")] pub fields: Vec<FieldError>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    Invalid { code: &'static str, fields: Vec<FieldError> },
    Unauthorized { message: Option<String> },
    Forbidden { code: &'static str, message: Option<String> },
    NotFound { code: &'static str, trace_id: Option<Uuid> },
    Conflict { code: &'static str, message: Option<String>, navigate: Option<&'static str> },
    Gone { code: &'static str, message: Option<String>, navigate: Option<&'static str> },
    Unprocessable { code: &'static str, message: Option<String> },
    BadGateway { code: &'static str, message: Option<String>, retryable: bool },
    /// Server-side inconsistency that must stop the flow; never retryable.
    Misconfigured { code: &'static str, message: Option<String> },
    Internal { trace_id: Option<Uuid>, message: Option<String> },
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(e: E, trace_id: Option<Uuid>) -> Self { Self::Internal { trace_id, message: Some(e.to_string()) } }
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self { Self::BadRequest { code, trace_id: None, message: Some(message.into()) } }
    pub fn not_found(code: &'static str) -> Self { Self::NotFound { code, trace_id: None } }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Invalid { .. } | ApiError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Gone { .. } => StatusCode::GONE,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Misconfigured { .. } | ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ApiError::Unauthorized { .. } => "unauthenticated",
            ApiError::Internal { .. } => "internal_error",
            ApiError::BadRequest { code, .. }
            | ApiError::Invalid { code, .. }
            | ApiError::Forbidden { code, .. }
            | ApiError::NotFound { code, .. }
            | ApiError::Conflict { code, .. }
            | ApiError::Gone { code, .. }
            | ApiError::Unprocessable { code, .. }
            | ApiError::BadGateway { code, .. }
            | ApiError::Misconfigured { code, .. } => *code,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code().to_string();
        let mut body = ErrorBody { code: error_code.clone(), ..ErrorBody::default() };
        match self {
            ApiError::BadRequest { trace_id, message, .. } => { body.trace_id = trace_id; body.message = message; }
            ApiError::Invalid { fields, .. } => { body.fields = fields; }
            ApiError::Unauthorized { message } => { body.message = message; body.navigate = Some("login".into()); }
            ApiError::Forbidden { message, .. } => { body.message = message; body.navigate = Some("away".into()); }
            ApiError::NotFound { trace_id, .. } => { body.trace_id = trace_id; }
            ApiError::Conflict { message, navigate, .. } | ApiError::Gone { message, navigate, .. } => {
                body.message = message;
                body.navigate = navigate.map(str::to_string);
            }
            ApiError::Unprocessable { message, .. } => { body.message = message; }
            ApiError::BadGateway { message, retryable, .. } => { body.message = message; body.retryable = Some(retryable); }
            ApiError::Misconfigured { message, .. } => { body.message = message; body.retryable = Some(false); }
            ApiError::Internal { trace_id, message } => { body.trace_id = trace_id; body.message = message; }
        }
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(&error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
