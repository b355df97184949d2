//! Payment handoff: order creation, payment preference, amount reconciliation and the
//! redirect-in-progress guard.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use bigdecimal::BigDecimal;
use common_http_errors::FieldError;
use common_money::{Money, BPS_SCALE, MINOR_PER_MAJOR};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::{BackendApi, CreateOrderRequest, GatewayError, Payer, PaymentPreferenceRequest};

pub fn validate_payer(payer: &Payer) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let mut require = |field: &str, value: &str| {
        if value.trim().is_empty() {
            errors.push(FieldError { field: field.to_string(), message: format!("{field} is required") });
            false
        } else {
            true
        }
    };
    require("name", &payer.name);
    require("surname", &payer.surname);
    let has_email = require("email", &payer.email);
    require("phone", &payer.phone);
    require("identificationType", &payer.identification_type);
    require("identificationNumber", &payer.identification_number);
    if has_email && !looks_like_email(payer.email.trim()) {
        errors.push(FieldError { field: "email".into(), message: "email is not a valid address".into() });
    }
    errors
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').count() >= 2
                && domain.split('.').all(|part| !part.is_empty())
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("payment amount {remote} looks like a minor/major unit mix-up against the local total {local}")]
    UnitMismatch { local: Money, remote: Money },
    #[error("payment amount {remote} differs from the local total {local} by more than the allowed tolerance")]
    AmountMismatch { local: Money, remote: Money },
    #[error("payment preference did not include an amount")]
    MissingAmount,
}

impl ReconcileError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::UnitMismatch { .. } => "unit_mismatch",
            ReconcileError::AmountMismatch { .. } => "amount_mismatch",
            ReconcileError::MissingAmount => "missing_amount",
        }
    }
}

/// Compare the backend's amount with the locally computed total, both in minor units.
///
/// Amounts are compared in major units. An exact factor of 100 in either direction is
/// reported separately from an ordinary difference above `tolerance_bps` of the local total.
pub fn reconcile_amount(local: i64, remote: Option<i64>, tolerance_bps: u32) -> Result<Money, ReconcileError> {
    let remote = remote.ok_or(ReconcileError::MissingAmount)?;
    let (local, remote) = (Money::from_cents(local), Money::from_cents(remote));
    if local == remote {
        return Ok(remote);
    }
    let (local_major, remote_major) = (local.to_major(), remote.to_major());
    let hundred = BigDecimal::from(MINOR_PER_MAJOR);
    let zero = BigDecimal::from(0);
    if local_major != zero
        && remote_major != zero
        && (remote_major.clone() * hundred.clone() == local_major || local_major.clone() * hundred == remote_major)
    {
        return Err(ReconcileError::UnitMismatch { local, remote });
    }
    let diff = (remote_major - local_major.clone()).abs();
    let allowed = local_major.abs() * BigDecimal::from(tolerance_bps) / BigDecimal::from(BPS_SCALE);
    if diff > allowed {
        return Err(ReconcileError::AmountMismatch { local, remote });
    }
    Ok(remote)
}

/// Where the UI should take the user after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Retry,
    SeatSelection,
    Login,
    Away,
}

impl NextStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextStep::Retry => "retry",
            NextStep::SeatSelection => "seat_selection",
            NextStep::Login => "login",
            NextStep::Away => "away",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PaymentError {
    #[error("payer details are incomplete")]
    InvalidPayer(Vec<FieldError>),
    #[error("a payment redirect is already in progress")]
    AlreadyRedirecting,
    #[error("wait for the discount code to finish validating")]
    DiscountPending,
    #[error("your reservation has expired, please select your seats again")]
    HoldExpired,
    #[error("some of your seats are already part of another order")]
    SeatsInOtherOrders,
    #[error("the order could not be created: {0}")]
    OrderConflict(String),
    #[error("sign in to continue with the payment")]
    Unauthenticated,
    #[error("ticket sales for this event are not open")]
    Forbidden(Option<String>),
    #[error("payment amount check failed: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("could not reach the payment service, please try again")]
    Transport(String),
    #[error("payment service error: {0}")]
    Backend(String),
}

impl PaymentError {
    pub fn next_step(&self) -> NextStep {
        match self {
            PaymentError::HoldExpired | PaymentError::SeatsInOtherOrders | PaymentError::OrderConflict(_) => NextStep::SeatSelection,
            PaymentError::Unauthenticated => NextStep::Login,
            PaymentError::Forbidden(_) => NextStep::Away,
            _ => NextStep::Retry,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::InvalidPayer(_) => "invalid_payer",
            PaymentError::AlreadyRedirecting => "already_redirecting",
            PaymentError::DiscountPending => "discount_pending",
            PaymentError::HoldExpired => "hold_expired",
            PaymentError::SeatsInOtherOrders => "seats_in_other_orders",
            PaymentError::OrderConflict(_) => "order_conflict",
            PaymentError::Unauthenticated => "unauthenticated",
            PaymentError::Forbidden(_) => "sale_not_open",
            PaymentError::Reconcile(e) => e.kind(),
            PaymentError::Transport(_) => "payment_unavailable",
            PaymentError::Backend(_) => "payment_failed",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Transport(_) | PaymentError::Backend(_) | PaymentError::DiscountPending)
    }

    /// Map a failed order-creation call.
    fn from_order(err: GatewayError) -> Self {
        let code = err.code().map(compact_code).unwrap_or_default();
        if code == "HOLDEXPIRED" || matches!(err, GatewayError::Rejected { status: 410, .. }) {
            return PaymentError::HoldExpired;
        }
        if code == "SEATSINOTHERORDERS" {
            return PaymentError::SeatsInOtherOrders;
        }
        match err {
            GatewayError::Conflict { message, .. } => {
                PaymentError::OrderConflict(message.unwrap_or_else(|| "conflict".to_string()))
            }
            other => PaymentError::from(other),
        }
    }
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized { .. } => PaymentError::Unauthenticated,
            GatewayError::Forbidden { message, .. } => PaymentError::Forbidden(message),
            GatewayError::Transport(_) | GatewayError::Timeout => PaymentError::Transport(err.to_string()),
            other => PaymentError::Backend(other.to_string()),
        }
    }
}

fn compact_code(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_uppercase()).collect()
}

const IDLE: u8 = 0;
const IN_FLIGHT: u8 = 1;
const REDIRECTED: u8 = 2;

/// Redirect guard. Held while an attempt runs and left set after a successful handoff, so a
/// second click cannot start another one. Only a finished handoff can be released by a page
/// restore; an attempt still in flight cannot.
#[derive(Debug, Default)]
pub struct RedirectFlag(AtomicU8);

impl RedirectFlag {
    pub fn try_begin(&self) -> bool {
        self.0.compare_exchange(IDLE, IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// The attempt handed off to the payment page.
    pub fn complete(&self) { self.0.store(REDIRECTED, Ordering::Release); }

    /// The attempt failed; allow another one.
    pub fn clear(&self) { self.0.store(IDLE, Ordering::Release); }

    /// Release a finished handoff. Returns false, leaving the guard alone, when there is none.
    pub fn release_redirected(&self) -> bool {
        self.0.compare_exchange(REDIRECTED, IDLE, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn is_set(&self) -> bool { self.0.load(Ordering::Acquire) != IDLE }

    pub fn is_in_flight(&self) -> bool { self.0.load(Ordering::Acquire) == IN_FLIGHT }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub hold_id: Uuid,
    pub payer: Payer,
    #[serde(default)]
    pub discount_code: Option<String>,
    /// Locally computed total in minor units.
    pub local_total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRedirect {
    pub order_id: String,
    pub redirect_url: String,
    pub amount: i64,
    pub redirect_after_ms: u64,
}

pub struct PaymentOrchestrator<'a, B: BackendApi + ?Sized> {
    backend: &'a B,
    tolerance_bps: u32,
    redirect_delay: Duration,
}

impl<'a, B: BackendApi + ?Sized> PaymentOrchestrator<'a, B> {
    pub fn new(backend: &'a B, tolerance_bps: u32, redirect_delay: Duration) -> Self {
        Self { backend, tolerance_bps, redirect_delay }
    }

    /// Run one handoff attempt. The flag is cleared on every failure; `expired` cancels the
    /// attempt as soon as it turns true.
    pub async fn pay(
        &self,
        req: PaymentRequest,
        flag: &RedirectFlag,
        expired: Option<watch::Receiver<bool>>,
    ) -> Result<PaymentRedirect, PaymentError> {
        if !flag.try_begin() {
            return Err(PaymentError::AlreadyRedirecting);
        }
        let hold_id = req.hold_id;
        let outcome = match expired {
            Some(mut rx) => {
                if *rx.borrow() {
                    Err(PaymentError::HoldExpired)
                } else {
                    tokio::select! {
                        res = self.attempt(req) => res,
                        _ = wait_expired(&mut rx) => {
                            warn!(%hold_id, "hold expired during payment handoff");
                            Err(PaymentError::HoldExpired)
                        }
                    }
                }
            }
            None => self.attempt(req).await,
        };
        match &outcome {
            Ok(_) => flag.complete(),
            Err(err) => {
                flag.clear();
                match err {
                    PaymentError::Reconcile(e) => error!(%hold_id, error = %e, "payment redirect blocked"),
                    other => info!(%hold_id, code = other.code(), "payment attempt failed"),
                }
            }
        }
        outcome
    }

    async fn attempt(&self, req: PaymentRequest) -> Result<PaymentRedirect, PaymentError> {
        let fields = validate_payer(&req.payer);
        if !fields.is_empty() {
            return Err(PaymentError::InvalidPayer(fields));
        }

        let discount_code = req.discount_code.filter(|c| !c.trim().is_empty());
        let order = self
            .backend
            .create_order(&CreateOrderRequest { hold_id: req.hold_id, discount_code })
            .await
            .map_err(PaymentError::from_order)?;
        info!(hold_id = %req.hold_id, order_id = %order.order_id, "order created");

        let preference = self
            .backend
            .create_payment_preference(&PaymentPreferenceRequest { order_id: order.order_id.clone(), payer: req.payer })
            .await
            .map_err(PaymentError::from)?;

        let amount = reconcile_amount(req.local_total, preference.total, self.tolerance_bps)?;
        info!(order_id = %order.order_id, amount = amount.as_cents(), "redirecting to payment");
        Ok(PaymentRedirect {
            order_id: order.order_id,
            redirect_url: preference.redirect_url,
            amount: amount.as_cents(),
            redirect_after_ms: self.redirect_delay.as_millis() as u64,
        })
    }
}

/// Resolves once the hold is reported expired; never resolves if the sender is gone.
async fn wait_expired(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|expired| *expired).await.is_err() {
        std::future::pending::<()>().await;
    }
}
