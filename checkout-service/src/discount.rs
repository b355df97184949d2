//! Discount code resolution.
//!
//! The backend decides whether a code is valid; this module normalizes input, maps the
//! backend's answer onto a fixed rejection taxonomy and keeps track of which validation
//! response is allowed to win when several are in flight.

use common_money::{percent_to_bps, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::gateway::{
    BackendApi, DiscountAvailability, DiscountPayload, DiscountRedemption, GatewayError, GatewayResult,
    ValidateDiscountRequest, ValidateDiscountResponse,
};
use crate::totals::discount_amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    Percentage,
    FixedAmount,
}

impl DiscountKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "PERCENTAGE" | "PERCENT" => Some(DiscountKind::Percentage),
            "FIXED_AMOUNT" | "FIXED" | "AMOUNT" => Some(DiscountKind::FixedAmount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountRule {
    /// Percentage in basis points (`5000` = 50%).
    Percentage { bps: u32 },
    /// Minor units.
    FixedAmount { amount: i64 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("unknown discount type '{0}'")]
    UnknownKind(String),
    #[error("percentage must be within (0, 100], got {0}")]
    PercentageOutOfRange(f64),
    #[error("fixed amount must be positive, got {0}")]
    NonPositiveAmount(f64),
    #[error("maximum discount must not be negative, got {0}")]
    NegativeCap(i64),
    #[error("discount code is empty")]
    EmptyCode,
}

/// A validated discount. Immutable: a changed order total produces a new descriptor through
/// re-validation rather than an edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "DiscountPayload", try_from = "DiscountPayload")]
pub struct DiscountDescriptor {
    code: String,
    rule: DiscountRule,
    maximum_discount: Option<i64>,
    description: String,
}

impl DiscountDescriptor {
    pub fn new(code: &str, rule: DiscountRule, maximum_discount: Option<i64>, description: impl Into<String>) -> Result<Self, DescriptorError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(DescriptorError::EmptyCode);
        }
        match rule {
            DiscountRule::Percentage { bps } if bps == 0 || bps > 10_000 => {
                return Err(DescriptorError::PercentageOutOfRange(bps as f64 / 100.0))
            }
            DiscountRule::FixedAmount { amount } if amount <= 0 => {
                return Err(DescriptorError::NonPositiveAmount(amount as f64))
            }
            _ => {}
        }
        if let Some(cap) = maximum_discount {
            if cap < 0 {
                return Err(DescriptorError::NegativeCap(cap));
            }
        }
        Ok(Self { code, rule, maximum_discount, description: description.into() })
    }

    pub fn percentage(code: &str, percent: f64, maximum_discount: Option<i64>) -> Result<Self, DescriptorError> {
        let bps = percent_to_bps(percent).ok_or(DescriptorError::PercentageOutOfRange(percent))?;
        Self::new(code, DiscountRule::Percentage { bps }, maximum_discount, "")
    }

    pub fn fixed_amount(code: &str, amount: i64) -> Result<Self, DescriptorError> {
        Self::new(code, DiscountRule::FixedAmount { amount }, None, "")
    }

    pub fn code(&self) -> &str { &self.code }
    pub fn rule(&self) -> DiscountRule { self.rule }
    pub fn maximum_discount(&self) -> Option<i64> { self.maximum_discount }
    pub fn description(&self) -> &str { &self.description }

    pub fn kind(&self) -> DiscountKind {
        match self.rule {
            DiscountRule::Percentage { .. } => DiscountKind::Percentage,
            DiscountRule::FixedAmount { .. } => DiscountKind::FixedAmount,
        }
    }

    /// Percent for percentage rules, minor units for fixed ones.
    pub fn value(&self) -> f64 {
        match self.rule {
            DiscountRule::Percentage { bps } => bps as f64 / 100.0,
            DiscountRule::FixedAmount { amount } => amount as f64,
        }
    }
}

impl TryFrom<DiscountPayload> for DiscountDescriptor {
    type Error = DescriptorError;

    fn try_from(payload: DiscountPayload) -> Result<Self, Self::Error> {
        let kind = DiscountKind::parse(&payload.kind).ok_or_else(|| DescriptorError::UnknownKind(payload.kind.clone()))?;
        let rule = match kind {
            DiscountKind::Percentage => {
                if !(payload.value > 0.0 && payload.value <= 100.0) {
                    return Err(DescriptorError::PercentageOutOfRange(payload.value));
                }
                let bps = percent_to_bps(payload.value).ok_or(DescriptorError::PercentageOutOfRange(payload.value))?;
                DiscountRule::Percentage { bps }
            }
            DiscountKind::FixedAmount => {
                if !(payload.value.is_finite() && payload.value.round() > 0.0) {
                    return Err(DescriptorError::NonPositiveAmount(payload.value));
                }
                DiscountRule::FixedAmount { amount: payload.value.round() as i64 }
            }
        };
        Self::new(&payload.code, rule, payload.maximum_discount, payload.description)
    }
}

impl From<DiscountDescriptor> for DiscountPayload {
    fn from(d: DiscountDescriptor) -> Self {
        DiscountPayload {
            kind: match d.kind() {
                DiscountKind::Percentage => "PERCENTAGE".to_string(),
                DiscountKind::FixedAmount => "FIXED_AMOUNT".to_string(),
            },
            value: d.value(),
            code: d.code,
            maximum_discount: d.maximum_discount,
            description: d.description,
        }
    }
}

/// Trim, uppercase and keep ASCII alphanumerics only.
pub fn normalize_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    InvalidOrExpired,
    MinimumPurchaseNotMet,
    UserUsageLimitReached,
    CodeUsageLimitReached,
    NotYetValid,
    Unauthenticated,
    NetworkOrServerError,
    EmptyCode,
    InvalidOrderTotal,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::InvalidOrExpired => "INVALID_OR_EXPIRED",
            RejectionReason::MinimumPurchaseNotMet => "MINIMUM_PURCHASE_NOT_MET",
            RejectionReason::UserUsageLimitReached => "USER_USAGE_LIMIT_REACHED",
            RejectionReason::CodeUsageLimitReached => "CODE_USAGE_LIMIT_REACHED",
            RejectionReason::NotYetValid => "NOT_YET_VALID",
            RejectionReason::Unauthenticated => "UNAUTHENTICATED",
            RejectionReason::NetworkOrServerError => "NETWORK_OR_SERVER_ERROR",
            RejectionReason::EmptyCode => "EMPTY_CODE",
            RejectionReason::InvalidOrderTotal => "INVALID_ORDER_TOTAL",
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            RejectionReason::InvalidOrExpired => "This discount code is invalid or has expired.",
            RejectionReason::MinimumPurchaseNotMet => "Your order does not reach the minimum purchase for this code.",
            RejectionReason::UserUsageLimitReached => "You have already used this discount code the maximum number of times.",
            RejectionReason::CodeUsageLimitReached => "This discount code has reached its usage limit.",
            RejectionReason::NotYetValid => "This discount code is not valid yet.",
            RejectionReason::Unauthenticated => "Sign in to use discount codes.",
            RejectionReason::NetworkOrServerError => "We could not validate the code right now. Please try again.",
            RejectionReason::EmptyCode => "Enter a discount code.",
            RejectionReason::InvalidOrderTotal => "The order total is not valid.",
        }
    }

    /// Backend reason codes come in a few spellings; unknown ones yield `None`.
    fn from_code(raw: &str) -> Option<Self> {
        let code: String = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        let reason = match code.as_str() {
            "INVALID_OR_EXPIRED" | "INVALID" | "EXPIRED" | "NOT_FOUND" | "INACTIVE" | "SUSPENDED" => RejectionReason::InvalidOrExpired,
            "MINIMUM_PURCHASE_NOT_MET" | "MINIMUM_PURCHASE" | "MIN_PURCHASE" => RejectionReason::MinimumPurchaseNotMet,
            "USER_USAGE_LIMIT_REACHED" | "USER_LIMIT_REACHED" | "ALREADY_USED" => RejectionReason::UserUsageLimitReached,
            "CODE_USAGE_LIMIT_REACHED" | "USAGE_LIMIT_REACHED" | "MAX_USES_REACHED" | "EXHAUSTED" => RejectionReason::CodeUsageLimitReached,
            "NOT_YET_VALID" | "NOT_STARTED" => RejectionReason::NotYetValid,
            "UNAUTHENTICATED" | "UNAUTHORIZED" => RejectionReason::Unauthenticated,
            _ => return None,
        };
        Some(reason)
    }

    /// Keyword fallback for backends that send only a message, in English or Spanish.
    fn from_message(message: &str) -> Option<Self> {
        let m = message.to_lowercase();
        let any = |words: &[&str]| words.iter().any(|w| m.contains(w));
        if any(&["minimum", "mínimo", "minimo"]) {
            Some(RejectionReason::MinimumPurchaseNotMet)
        } else if any(&["per user", "already used", "you have used", "por usuario", "ya usaste", "ya utilizaste"]) {
            Some(RejectionReason::UserUsageLimitReached)
        } else if any(&["usage limit", "no uses left", "límite de uso", "limite de uso", "agotado"]) {
            Some(RejectionReason::CodeUsageLimitReached)
        } else if any(&["not yet valid", "not valid yet", "not started", "aún no", "aun no"]) {
            Some(RejectionReason::NotYetValid)
        } else if any(&["sign in", "log in", "iniciar sesión", "inicia sesión", "iniciá sesión", "iniciar sesion"]) {
            Some(RejectionReason::Unauthenticated)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct Rejection {
    pub reason: RejectionReason,
    pub message: String,
    /// Required minimum purchase in minor units, for `MINIMUM_PURCHASE_NOT_MET`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_purchase: Option<i64>,
    pub retryable: bool,
}

impl Rejection {
    pub fn new(reason: RejectionReason) -> Self {
        Self {
            reason,
            message: reason.default_message().to_string(),
            minimum_purchase: None,
            retryable: reason == RejectionReason::NetworkOrServerError,
        }
    }

    fn with_message(mut self, message: Option<String>) -> Self {
        if let Some(m) = message.filter(|m| !m.trim().is_empty()) {
            self.message = m;
        }
        self
    }

    fn from_response(resp: ValidateDiscountResponse) -> Self {
        let reason = resp
            .reason
            .as_deref()
            .and_then(RejectionReason::from_code)
            .or_else(|| resp.message.as_deref().and_then(RejectionReason::from_message))
            .unwrap_or(RejectionReason::InvalidOrExpired);
        let mut rejection = Rejection::new(reason);
        if reason == RejectionReason::MinimumPurchaseNotMet {
            if let Some(minimum) = resp.minimum_purchase {
                rejection.minimum_purchase = Some(minimum);
                rejection.message = format!("A minimum purchase of {} is required for this code.", Money::from_cents(minimum));
            }
        }
        rejection.with_message(resp.message)
    }

    fn from_gateway(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized { message } => Rejection::new(RejectionReason::Unauthenticated).with_message(message),
            GatewayError::Transport(_) | GatewayError::Timeout | GatewayError::Server { .. } | GatewayError::Decode(_) => {
                Rejection::new(RejectionReason::NetworkOrServerError)
            }
            GatewayError::Forbidden { code, message }
            | GatewayError::NotFound { code, message }
            | GatewayError::Conflict { code, message }
            | GatewayError::Rejected { code, message, .. } => {
                let reason = RejectionReason::from_code(&code)
                    .or_else(|| message.as_deref().and_then(RejectionReason::from_message))
                    .unwrap_or(RejectionReason::InvalidOrExpired);
                Rejection::new(reason).with_message(message)
            }
        }
    }
}

/// Successful validation as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountQuote {
    pub descriptor: DiscountDescriptor,
    pub discount_amount: i64,
    pub final_total: i64,
    pub savings: i64,
    /// Order total the quote was issued for.
    pub order_total: i64,
}

pub struct DiscountResolver<'a, B: BackendApi + ?Sized> {
    backend: &'a B,
}

impl<'a, B: BackendApi + ?Sized> DiscountResolver<'a, B> {
    pub fn new(backend: &'a B) -> Self { Self { backend } }

    pub async fn validate(
        &self,
        code: &str,
        order_total: i64,
        event_id: Option<&str>,
        show_id: Option<&str>,
    ) -> Result<DiscountQuote, Rejection> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(Rejection::new(RejectionReason::EmptyCode));
        }
        if order_total < 0 {
            return Err(Rejection::new(RejectionReason::InvalidOrderTotal));
        }
        let req = ValidateDiscountRequest {
            code: code.clone(),
            order_total,
            event_id: event_id.map(str::to_string),
            show_id: show_id.map(str::to_string),
        };
        let resp = self.backend.validate_discount(&req).await.map_err(|err| {
            debug!(code = %code, error = %err, "discount validation call failed");
            Rejection::from_gateway(err)
        })?;

        if !resp.valid || resp.discount.is_none() {
            return Err(Rejection::from_response(resp));
        }
        let ValidateDiscountResponse { discount, discount_amount: reported, final_total, savings, .. } = resp;
        let descriptor = discount
            .map(DiscountDescriptor::try_from)
            .transpose()
            .map_err(|err| {
                warn!(code = %code, error = %err, "backend returned an unusable discount descriptor");
                Rejection::new(RejectionReason::NetworkOrServerError)
            })?
            .ok_or_else(|| Rejection::new(RejectionReason::InvalidOrExpired))?;

        let expected = discount_amount(order_total, &descriptor);
        let amount = match reported {
            Some(reported) if reported != expected => {
                warn!(code = %code, order_total, reported, expected, "backend discount amount differs from local formula");
                reported
            }
            Some(reported) => reported,
            None => expected,
        };
        Ok(DiscountQuote {
            descriptor,
            discount_amount: amount,
            final_total: final_total.unwrap_or((order_total - amount).max(0)),
            savings: savings.unwrap_or(amount),
            order_total,
        })
    }

    pub async fn check_availability(&self, code: &str) -> GatewayResult<DiscountAvailability> {
        self.backend.discount_availability(&normalize_code(code)).await
    }

    pub async fn history(&self) -> GatewayResult<Vec<DiscountRedemption>> {
        self.backend.discount_history().await
    }
}

/// Identifies one validation request; only the most recent ticket may change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationTicket {
    seq: u64,
    pub order_total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    Cleared,
    /// A newer request was issued after this one; its outcome was dropped.
    Stale,
}

/// Applied-discount state of one checkout, with last-request-wins ordering.
#[derive(Debug, Default)]
pub struct DiscountState {
    applied: Option<DiscountQuote>,
    last_rejection: Option<Rejection>,
    latest: u64,
    pending: Option<ValidationTicket>,
    pending_code: Option<String>,
}

impl DiscountState {
    /// Start validating `code` at `order_total`. Any request still in flight becomes stale.
    pub fn begin(&mut self, code: &str, order_total: i64) -> ValidationTicket {
        self.latest += 1;
        let ticket = ValidationTicket { seq: self.latest, order_total };
        self.pending = Some(ticket);
        self.pending_code = Some(code.to_string());
        ticket
    }

    pub fn resolve(&mut self, ticket: ValidationTicket, outcome: Result<DiscountQuote, Rejection>) -> Resolution {
        if ticket.seq != self.latest {
            return Resolution::Stale;
        }
        self.pending = None;
        self.pending_code = None;
        match outcome {
            Ok(quote) => {
                self.applied = Some(quote);
                self.last_rejection = None;
                Resolution::Applied
            }
            Err(rejection) => {
                self.applied = None;
                self.last_rejection = Some(rejection);
                Resolution::Cleared
            }
        }
    }

    /// Drop the applied discount and invalidate any request still in flight.
    pub fn remove(&mut self) {
        self.latest += 1;
        self.pending = None;
        self.pending_code = None;
        self.applied = None;
        self.last_rejection = None;
    }

    pub fn is_pending(&self) -> bool { self.pending.is_some() }
    pub fn applied(&self) -> Option<&DiscountQuote> { self.applied.as_ref() }
    pub fn applied_code(&self) -> Option<&str> { self.applied.as_ref().map(|q| q.descriptor.code()) }
    pub fn last_rejection(&self) -> Option<&Rejection> { self.last_rejection.as_ref() }

    /// Code to re-validate when the order total moves away from the one the last request or
    /// quote was issued for. An in-flight request takes precedence over the applied quote.
    pub fn needs_revalidation(&self, order_total: i64) -> Option<String> {
        if let (Some(ticket), Some(code)) = (self.pending, self.pending_code.as_ref()) {
            return (ticket.order_total != order_total).then(|| code.clone());
        }
        self.applied
            .as_ref()
            .filter(|q| q.order_total != order_total)
            .map(|q| q.descriptor.code().to_string())
    }
}
