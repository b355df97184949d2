#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use checkout_service::config::CheckoutConfig;
use checkout_service::countdown::ManualClock;
use checkout_service::gateway::{
    BackendApi, CreateOrderRequest, CreatedOrder, DiscountAvailability, DiscountPayload, DiscountRedemption,
    GatewayError, GatewayResult, HoldItem, Payer, PaymentPreference, PaymentPreferenceRequest, ReservationHold,
    ValidateDiscountRequest, ValidateDiscountResponse,
};
use checkout_service::session::SessionStore;
use common_observability::CheckoutMetrics;
use uuid::Uuid;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 14, 20, 0, 0).unwrap()
}

pub fn payer() -> Payer {
    Payer {
        name: "Lucía".into(),
        surname: "Pérez".into(),
        email: "lucia@example.com".into(),
        phone: "1155550000".into(),
        identification_type: "DNI".into(),
        identification_number: "28999111".into(),
    }
}

pub fn hold(hold_id: Uuid, total_cents: i64, expires_in_secs: i64) -> ReservationHold {
    ReservationHold {
        hold_id,
        expires_at: t0() + chrono::Duration::seconds(expires_in_secs),
        items: vec![HoldItem {
            seat_id: Some("A-12".into()),
            ticket_type: Some("GENERAL".into()),
            description: "Platea A fila 12".into(),
            price_cents: total_cents,
            quantity: 1,
        }],
        total_cents,
        event_id: Some("evt-1".into()),
        show_id: None,
    }
}

/// Discount rule served by the fake backend for one code.
#[derive(Clone)]
pub enum CodeRule {
    /// Percentage off, valid only at or above `minimum`.
    Percent { percent: f64, cap: Option<i64>, minimum: i64 },
    Fixed(i64),
    Reject(&'static str),
}

#[derive(Default)]
pub struct FakeBackend {
    pub codes: Mutex<HashMap<String, CodeRule>>,
    pub delays: Mutex<HashMap<String, Duration>>,
    pub validate_calls: Mutex<Vec<ValidateDiscountRequest>>,
    pub holds: Mutex<HashMap<Uuid, ReservationHold>>,
    pub order_result: Mutex<Option<GatewayResult<CreatedOrder>>>,
    pub order_calls: Mutex<Vec<CreateOrderRequest>>,
    pub preference_total: Mutex<Option<i64>>,
    pub preference_delay: Mutex<Option<Duration>>,
    pub preference_calls: Mutex<usize>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_code(&self, code: &str, rule: CodeRule) -> &Self {
        self.codes.lock().unwrap().insert(code.to_string(), rule);
        self
    }

    pub fn delay_code(&self, code: &str, delay: Duration) -> &Self {
        self.delays.lock().unwrap().insert(code.to_string(), delay);
        self
    }

    pub fn with_hold(&self, hold: ReservationHold) -> &Self {
        self.holds.lock().unwrap().insert(hold.hold_id, hold);
        self
    }

    pub fn order_fails(&self, err: GatewayError) -> &Self {
        *self.order_result.lock().unwrap() = Some(Err(err));
        self
    }

    pub fn preference_total(&self, total: Option<i64>) -> &Self {
        *self.preference_total.lock().unwrap() = total;
        self
    }

    pub fn preference_delay(&self, delay: Duration) -> &Self {
        *self.preference_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn validate_totals(&self) -> Vec<i64> {
        self.validate_calls.lock().unwrap().iter().map(|r| r.order_total).collect()
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn validate_discount(&self, req: &ValidateDiscountRequest) -> GatewayResult<ValidateDiscountResponse> {
        self.validate_calls.lock().unwrap().push(req.clone());
        let delay = self.delays.lock().unwrap().get(&req.code).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let rule = self.codes.lock().unwrap().get(&req.code).cloned();
        let resp = match rule {
            None => ValidateDiscountResponse {
                reason: Some("INVALID_OR_EXPIRED".into()),
                message: Some("Código inválido".into()),
                ..Default::default()
            },
            Some(CodeRule::Reject(reason)) => ValidateDiscountResponse { reason: Some(reason.into()), ..Default::default() },
            Some(CodeRule::Percent { minimum, .. }) if req.order_total < minimum => ValidateDiscountResponse {
                reason: Some("MINIMUM_PURCHASE_NOT_MET".into()),
                minimum_purchase: Some(minimum),
                ..Default::default()
            },
            Some(CodeRule::Percent { percent, cap, .. }) => {
                let raw = req.order_total * (percent * 100.0) as i64 / 10_000;
                let amount = cap.map_or(raw, |c| raw.min(c));
                ValidateDiscountResponse {
                    valid: true,
                    discount: Some(DiscountPayload {
                        code: req.code.clone(),
                        kind: "PERCENTAGE".into(),
                        value: percent,
                        maximum_discount: cap,
                        description: String::new(),
                    }),
                    discount_amount: Some(amount),
                    final_total: Some(req.order_total - amount),
                    savings: Some(amount),
                    ..Default::default()
                }
            }
            Some(CodeRule::Fixed(value)) => {
                let amount = value.min(req.order_total);
                ValidateDiscountResponse {
                    valid: true,
                    discount: Some(DiscountPayload {
                        code: req.code.clone(),
                        kind: "FIXED_AMOUNT".into(),
                        value: value as f64,
                        maximum_discount: None,
                        description: String::new(),
                    }),
                    discount_amount: Some(amount),
                    final_total: Some(req.order_total - amount),
                    savings: Some(amount),
                    ..Default::default()
                }
            }
        };
        Ok(resp)
    }

    async fn discount_availability(&self, code: &str) -> GatewayResult<DiscountAvailability> {
        let available = self.codes.lock().unwrap().contains_key(code);
        Ok(DiscountAvailability { code: code.to_string(), available, remaining_uses: None, message: None })
    }

    async fn discount_history(&self) -> GatewayResult<Vec<DiscountRedemption>> {
        Ok(Vec::new())
    }

    async fn fetch_hold(&self, hold_id: Uuid) -> GatewayResult<ReservationHold> {
        self.holds
            .lock()
            .unwrap()
            .get(&hold_id)
            .cloned()
            .ok_or(GatewayError::NotFound { code: "HOLD_NOT_FOUND".into(), message: None })
    }

    async fn create_order(&self, req: &CreateOrderRequest) -> GatewayResult<CreatedOrder> {
        self.order_calls.lock().unwrap().push(req.clone());
        match self.order_result.lock().unwrap().clone() {
            Some(result) => result,
            None => Ok(CreatedOrder { order_id: format!("ord-{}", req.hold_id.simple()), total: None }),
        }
    }

    async fn create_payment_preference(&self, req: &PaymentPreferenceRequest) -> GatewayResult<PaymentPreference> {
        *self.preference_calls.lock().unwrap() += 1;
        let delay = *self.preference_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(PaymentPreference {
            preference_id: Some(format!("pref-{}", req.order_id)),
            redirect_url: format!("https://pay.example/checkout/{}", req.order_id),
            total: *self.preference_total.lock().unwrap(),
        })
    }
}

pub fn store(clock: &ManualClock) -> SessionStore {
    let config = CheckoutConfig::for_backend("http://backend.invalid");
    SessionStore::new(&config, Arc::new(clock.clone()), Arc::new(CheckoutMetrics::new()))
}
