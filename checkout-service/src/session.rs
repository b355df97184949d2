//! In-memory checkout sessions, one per backend hold.
//!
//! A session is a read-only copy of the hold plus everything the checkout page derives from it:
//! current subtotal, applied discount, countdown and the redirect guard. Session locks are
//! released before any backend call and re-taken to apply the result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use common_observability::CheckoutMetrics;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CheckoutConfig;
use crate::countdown::{lock, spawn_ticker, Clock, Countdown, CountdownSnapshot};
use crate::discount::{
    normalize_code, DiscountQuote, DiscountResolver, DiscountState, Rejection, Resolution, ValidationTicket,
};
use crate::gateway::{BackendApi, GatewayError, HoldItem, Payer, ReservationHold};
use crate::payment::{PaymentError, PaymentOrchestrator, PaymentRedirect, PaymentRequest, RedirectFlag};
use crate::totals::{compute_totals_with_rate, OrderTotals};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no checkout session for hold {0}")]
    NotFound(Uuid),
    #[error("reservation hold {0} has expired")]
    Expired(Uuid),
    #[error("subtotal must not be negative: {0}")]
    InvalidSubtotal(i64),
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub struct CheckoutSession {
    hold: ReservationHold,
    subtotal: i64,
    discount: DiscountState,
    countdown: Arc<Mutex<Countdown>>,
    expired_rx: watch::Receiver<bool>,
    redirect: Arc<RedirectFlag>,
    ticker: JoinHandle<()>,
}

impl CheckoutSession {
    fn is_expired(&self) -> bool { *self.expired_rx.borrow() }
}

impl Drop for CheckoutSession {
    fn drop(&mut self) { self.ticker.abort(); }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub hold_id: Uuid,
    pub items: Vec<HoldItem>,
    pub totals: OrderTotals,
    pub discount: Option<DiscountQuote>,
    pub rejection: Option<Rejection>,
    pub validation_pending: bool,
    pub countdown: CountdownSnapshot,
    pub redirecting: bool,
    /// The hold is gone; the page must leave checkout.
    pub redirect_away: bool,
}

type SessionMap = HashMap<Uuid, Arc<Mutex<CheckoutSession>>>;

pub struct SessionStore {
    sessions: RwLock<SessionMap>,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
    service_charge_bps: u32,
    tolerance_bps: u32,
    redirect_delay: Duration,
    metrics: Arc<CheckoutMetrics>,
}

impl SessionStore {
    pub fn new(config: &CheckoutConfig, clock: Arc<dyn Clock>, metrics: Arc<CheckoutMetrics>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            hold_ttl: config.hold_ttl,
            service_charge_bps: config.service_charge_bps,
            tolerance_bps: config.amount_tolerance_bps,
            redirect_delay: config.redirect_delay,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|m| m.len()).unwrap_or_else(|e| e.into_inner().len())
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn get(&self, hold_id: Uuid) -> Result<Arc<Mutex<CheckoutSession>>, SessionError> {
        let map = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        map.get(&hold_id).cloned().ok_or(SessionError::NotFound(hold_id))
    }

    /// Fetch the hold and start its countdown. Opening an existing session returns it as is.
    pub async fn open<B: BackendApi + ?Sized>(&self, backend: &B, hold_id: Uuid) -> Result<SessionView, SessionError> {
        if let Ok(existing) = self.get(hold_id) {
            return Ok(self.render(&lock(&existing)));
        }
        let hold = backend.fetch_hold(hold_id).await?;
        let metrics = self.metrics.clone();
        let countdown = Countdown::start(hold.expires_at, self.hold_ttl, self.clock.now()).with_on_expire(move || {
            metrics.holds_expired.inc();
            info!(%hold_id, "reservation hold expired");
        });
        if countdown.is_expired() {
            return Err(SessionError::Expired(hold_id));
        }
        let expired_rx = countdown.subscribe();
        let countdown = Arc::new(Mutex::new(countdown));
        let ticker = spawn_ticker(countdown.clone(), self.clock.clone());
        let subtotal = hold.total_cents.max(0);
        let session = CheckoutSession {
            hold,
            subtotal,
            discount: DiscountState::default(),
            countdown,
            expired_rx,
            redirect: Arc::new(RedirectFlag::default()),
            ticker,
        };

        let entry = {
            let mut map = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            map.entry(hold_id).or_insert_with(|| Arc::new(Mutex::new(session))).clone()
        };
        info!(%hold_id, "checkout session opened");
        let view = self.render(&lock(&entry));
        Ok(view)
    }

    pub fn view(&self, hold_id: Uuid) -> Result<SessionView, SessionError> {
        let session = self.get(hold_id)?;
        let view = self.render(&lock(&session));
        Ok(view)
    }

    /// Change the subtotal. An applied or in-flight discount is re-validated once against the
    /// new total and any older request becomes stale; if the code no longer holds, the session
    /// ends up with no discount and the rejection recorded.
    pub async fn set_subtotal<B: BackendApi + ?Sized>(&self, backend: &B, hold_id: Uuid, subtotal: i64) -> Result<SessionView, SessionError> {
        if subtotal < 0 {
            return Err(SessionError::InvalidSubtotal(subtotal));
        }
        let session = self.get(hold_id)?;
        let revalidate = {
            let mut s = lock(&session);
            if s.is_expired() {
                return Err(SessionError::Expired(hold_id));
            }
            s.subtotal = subtotal;
            s.discount.needs_revalidation(subtotal).map(|code| {
                let ticket = s.discount.begin(&code, subtotal);
                (code, ticket, s.hold.event_id.clone(), s.hold.show_id.clone())
            })
        };
        if let Some((code, ticket, event_id, show_id)) = revalidate {
            debug!(%hold_id, code = %code, subtotal, "re-validating discount after subtotal change");
            let outcome = DiscountResolver::new(backend)
                .validate(&code, subtotal, event_id.as_deref(), show_id.as_deref())
                .await;
            self.settle(hold_id, &session, ticket, outcome);
        }
        let view = self.render(&lock(&session));
        Ok(view)
    }

    pub async fn apply_discount<B: BackendApi + ?Sized>(&self, backend: &B, hold_id: Uuid, code: &str) -> Result<SessionView, SessionError> {
        let session = self.get(hold_id)?;
        let (ticket, event_id, show_id) = {
            let mut s = lock(&session);
            if s.is_expired() {
                return Err(SessionError::Expired(hold_id));
            }
            let subtotal = s.subtotal;
            (s.discount.begin(&normalize_code(code), subtotal), s.hold.event_id.clone(), s.hold.show_id.clone())
        };
        let outcome = DiscountResolver::new(backend)
            .validate(code, ticket.order_total, event_id.as_deref(), show_id.as_deref())
            .await;
        let rejection = outcome.as_ref().err().cloned();
        let resolution = self.settle(hold_id, &session, ticket, outcome);
        match (resolution, rejection) {
            (Resolution::Cleared, Some(rejection)) => Err(SessionError::Rejected(rejection)),
            _ => {
                let view = self.render(&lock(&session));
                Ok(view)
            }
        }
    }

    pub fn remove_discount(&self, hold_id: Uuid) -> Result<SessionView, SessionError> {
        let session = self.get(hold_id)?;
        let mut s = lock(&session);
        s.discount.remove();
        Ok(self.render(&s))
    }

    fn settle(
        &self,
        hold_id: Uuid,
        session: &Mutex<CheckoutSession>,
        ticket: ValidationTicket,
        outcome: Result<DiscountQuote, Rejection>,
    ) -> Resolution {
        let outcome_label = match &outcome {
            Ok(_) => "applied",
            Err(r) if r.retryable => "error",
            Err(_) => "rejected",
        };
        let resolution = lock(session).discount.resolve(ticket, outcome);
        match resolution {
            Resolution::Stale => {
                self.metrics.discount_stale_responses.inc();
                debug!(%hold_id, "discarded superseded discount validation");
            }
            _ => self.metrics.record_validation(outcome_label),
        }
        resolution
    }

    /// Start the payment handoff for a session. Refused while the hold is expired or while a
    /// discount validation is outstanding.
    pub async fn pay<B: BackendApi + ?Sized>(&self, backend: &B, hold_id: Uuid, payer: Payer) -> Result<PaymentRedirect, SessionError> {
        let session = self.get(hold_id)?;
        let (request, flag, expired_rx) = {
            let s = lock(&session);
            if s.is_expired() {
                return Err(PaymentError::HoldExpired.into());
            }
            if s.discount.is_pending() {
                return Err(PaymentError::DiscountPending.into());
            }
            let totals = self.totals_for(&s);
            let request = PaymentRequest {
                hold_id,
                payer,
                discount_code: s.discount.applied_code().map(str::to_string),
                local_total: totals.total,
            };
            (request, s.redirect.clone(), s.expired_rx.clone())
        };

        let orchestrator = PaymentOrchestrator::new(backend, self.tolerance_bps, self.redirect_delay);
        match orchestrator.pay(request, &flag, Some(expired_rx)).await {
            Ok(redirect) => {
                self.metrics.record_payment("redirected");
                Ok(redirect)
            }
            Err(err) => {
                if let PaymentError::Reconcile(e) = &err {
                    self.metrics.record_mismatch(e.kind());
                }
                self.metrics.record_payment(err.code());
                Err(err.into())
            }
        }
    }

    /// The checkout page came back (browser back or cache restore); allow another attempt once
    /// the previous handoff has finished. An attempt still in flight keeps the guard.
    pub fn restore(&self, hold_id: Uuid) -> Result<SessionView, SessionError> {
        let session = self.get(hold_id)?;
        let s = lock(&session);
        if s.redirect.release_redirected() {
            info!(%hold_id, "checkout restored after redirect, clearing guard");
        } else if s.redirect.is_in_flight() {
            debug!(%hold_id, "checkout restored while payment handoff in flight, keeping guard");
        }
        Ok(self.render(&s))
    }

    /// Drop sessions whose hold expired more than `grace` ago.
    pub fn sweep_expired(&self, grace: Duration) -> usize {
        let now = self.clock.now();
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let mut map = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, session| {
            let s = lock(session);
            !(s.is_expired() && s.hold.expires_at + grace <= now)
        });
        before - map.len()
    }

    fn totals_for(&self, s: &CheckoutSession) -> OrderTotals {
        let descriptor = s.discount.applied().map(|q| &q.descriptor);
        compute_totals_with_rate(s.subtotal, descriptor, self.service_charge_bps)
    }

    fn render(&self, s: &CheckoutSession) -> SessionView {
        let countdown = lock(&s.countdown).snapshot();
        SessionView {
            hold_id: s.hold.hold_id,
            items: s.hold.items.clone(),
            totals: self.totals_for(s),
            discount: s.discount.applied().cloned(),
            rejection: s.discount.last_rejection().cloned(),
            validation_pending: s.discount.is_pending(),
            redirect_away: s.is_expired(),
            countdown,
            redirecting: s.redirect.is_set(),
        }
    }
}

/// Periodically remove sessions whose holds expired more than `grace` ago.
pub fn spawn_session_sweeper(store: Arc<SessionStore>, every: Duration, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = store.sweep_expired(grace);
            if removed > 0 {
                info!(removed, "swept expired checkout sessions");
            }
        }
    })
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("sessions", &self.len()).finish()
    }
}
