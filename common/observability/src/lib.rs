use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct CheckoutMetrics {
    pub registry: Registry,
    pub discount_validations_total: IntCounterVec,
    pub discount_stale_responses: IntCounter,
    pub holds_expired: IntCounter,
    pub payment_attempts_total: IntCounterVec,
    pub amount_mismatch_total: IntCounterVec,
    pub http_errors_total: IntCounterVec,
}

impl CheckoutMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let discount_validations_total = IntCounterVec::new(
            Opts::new("discount_validations_total", "Discount validations grouped by outcome"),
            &["outcome"],
        ).unwrap();
        let discount_stale_responses = IntCounter::new(
            "discount_stale_responses_total",
            "Discount validation responses discarded because a newer request superseded them",
        ).unwrap();
        let holds_expired = IntCounter::new(
            "checkout_holds_expired_total",
            "Checkout sessions whose reservation hold expired",
        ).unwrap();
        let payment_attempts_total = IntCounterVec::new(
            Opts::new("payment_attempts_total", "Payment handoff attempts grouped by outcome"),
            &["outcome"],
        ).unwrap();
        let amount_mismatch_total = IntCounterVec::new(
            Opts::new("payment_amount_mismatch_total", "Payment redirects blocked by amount reconciliation"),
            &["kind"],
        ).unwrap();
        let http_errors_total = IntCounterVec::new(
            Opts::new("http_errors_total", "Count of HTTP error responses emitted (status >= 400)"),
            &["service", "code", "status"],
        ).unwrap();
        let _ = registry.register(Box::new(discount_validations_total.clone()));
        let _ = registry.register(Box::new(discount_stale_responses.clone()));
        let _ = registry.register(Box::new(holds_expired.clone()));
        let _ = registry.register(Box::new(payment_attempts_total.clone()));
        let _ = registry.register(Box::new(amount_mismatch_total.clone()));
        let _ = registry.register(Box::new(http_errors_total.clone()));
        CheckoutMetrics {
            registry,
            discount_validations_total,
            discount_stale_responses,
            holds_expired,
            payment_attempts_total,
            amount_mismatch_total,
            http_errors_total,
        }
    }

    pub fn record_validation(&self, outcome: &str) {
        self.discount_validations_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_payment(&self, outcome: &str) {
        self.payment_attempts_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_mismatch(&self, kind: &str) {
        self.amount_mismatch_total.with_label_values(&[kind]).inc();
    }

    pub fn record_http_error(&self, service: &str, code: &str, status: u16) {
        self.http_errors_total.with_label_values(&[service, code, &status.to_string()]).inc();
    }

    /// Prometheus text exposition of every registered family.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl Default for CheckoutMetrics {
    fn default() -> Self { Self::new() }
}
