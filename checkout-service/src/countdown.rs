//! Hold countdown.
//!
//! A [`Countdown`] is a two-state machine (`Running` then `Expired`) recomputed from the wall
//! clock on every tick. Expiry is published on a watch channel so in-flight work can be
//! cancelled, and an optional callback runs exactly once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub const TICK: Duration = Duration::from_secs(1);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// Clock moved by hand, for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self { Self(Arc::new(Mutex::new(start))) }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.0);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) { *lock(&self.0) = to; }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> { *lock(&self.0) }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountdownState {
    Running,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownSnapshot {
    pub state: CountdownState,
    pub remaining_seconds: i64,
    pub percent_elapsed: f64,
    pub display: String,
    pub expires_at: DateTime<Utc>,
}

type ExpiryCallback = Box<dyn FnOnce() + Send>;

pub struct Countdown {
    expires_at: DateTime<Utc>,
    total: Duration,
    state: CountdownState,
    remaining: chrono::Duration,
    on_expire: Option<ExpiryCallback>,
    expired_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Countdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Countdown")
            .field("expires_at", &self.expires_at)
            .field("state", &self.state)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl Countdown {
    /// Enter `Running`; a hold already past `expires_at` expires immediately.
    pub fn start(expires_at: DateTime<Utc>, total: Duration, now: DateTime<Utc>) -> Self {
        let (expired_tx, _) = watch::channel(false);
        let mut countdown = Self {
            expires_at,
            total,
            state: CountdownState::Running,
            remaining: chrono::Duration::zero(),
            on_expire: None,
            expired_tx,
        };
        countdown.tick(now);
        countdown
    }

    /// Register the expiry callback. Runs at once if the countdown is already expired.
    pub fn with_on_expire(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        if self.state == CountdownState::Expired {
            callback();
        } else {
            self.on_expire = Some(Box::new(callback));
        }
        self
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> CountdownState {
        if self.state == CountdownState::Expired {
            return self.state;
        }
        self.remaining = self.expires_at - now;
        if self.remaining <= chrono::Duration::zero() {
            self.remaining = chrono::Duration::zero();
            self.state = CountdownState::Expired;
            self.expired_tx.send_replace(true);
            if let Some(callback) = self.on_expire.take() {
                callback();
            }
        }
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> { self.expired_tx.subscribe() }

    pub fn state(&self) -> CountdownState { self.state }

    pub fn is_expired(&self) -> bool { self.state == CountdownState::Expired }

    pub fn expires_at(&self) -> DateTime<Utc> { self.expires_at }

    pub fn remaining(&self) -> chrono::Duration { self.remaining }

    pub fn percent_elapsed(&self) -> f64 {
        let total_ms = self.total.as_millis() as f64;
        if total_ms <= 0.0 {
            return 100.0;
        }
        let remaining_ms = self.remaining.num_milliseconds().max(0) as f64;
        (100.0 * (1.0 - remaining_ms / total_ms)).clamp(0.0, 100.0)
    }

    pub fn snapshot(&self) -> CountdownSnapshot {
        let ms = self.remaining.num_milliseconds().max(0);
        let remaining_seconds = (ms + 999) / 1000;
        CountdownSnapshot {
            state: self.state,
            remaining_seconds,
            percent_elapsed: self.percent_elapsed(),
            display: format!("{:02}:{:02}", remaining_seconds / 60, remaining_seconds % 60),
            expires_at: self.expires_at,
        }
    }
}

/// Drive `countdown` once per second until it expires.
pub fn spawn_ticker(countdown: Arc<Mutex<Countdown>>, clock: Arc<dyn Clock>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let state = lock(&countdown).tick(clock.now());
            if state == CountdownState::Expired {
                info!("hold countdown expired");
                break;
            }
        }
        debug!("countdown ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() }

    #[test]
    fn past_deadline_expires_on_start() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let c = Countdown::start(t0() - chrono::Duration::seconds(1), Duration::from_secs(600), t0())
            .with_on_expire(move || { f.fetch_add(1, Ordering::SeqCst); });
        assert!(c.is_expired());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(*c.subscribe().borrow());
    }

    #[test]
    fn snapshot_formats_minutes_and_seconds() {
        let c = Countdown::start(t0() + chrono::Duration::seconds(125), Duration::from_secs(600), t0());
        let s = c.snapshot();
        assert_eq!(s.display, "02:05");
        assert_eq!(s.remaining_seconds, 125);
        assert_eq!(s.state, CountdownState::Running);
    }

    #[test]
    fn percent_elapsed_is_clamped() {
        // remaining longer than the configured hold length
        let c = Countdown::start(t0() + chrono::Duration::seconds(900), Duration::from_secs(600), t0());
        assert_eq!(c.percent_elapsed(), 0.0);
        let mut c = Countdown::start(t0() + chrono::Duration::seconds(300), Duration::from_secs(600), t0());
        assert!((c.percent_elapsed() - 50.0).abs() < 1e-9);
        c.tick(t0() + chrono::Duration::seconds(400));
        assert_eq!(c.percent_elapsed(), 100.0);
    }

    #[test]
    fn recomputes_from_wall_clock() {
        let mut c = Countdown::start(t0() + chrono::Duration::seconds(60), Duration::from_secs(600), t0());
        // a long suspension followed by a single tick
        c.tick(t0() + chrono::Duration::seconds(45));
        assert_eq!(c.snapshot().remaining_seconds, 15);
        c.tick(t0() + chrono::Duration::seconds(61));
        assert!(c.is_expired());
        c.tick(t0() + chrono::Duration::seconds(30));
        assert!(c.is_expired());
    }
}
