mod common;

use std::time::Duration;

use checkout_service::countdown::ManualClock;
use checkout_service::gateway::GatewayError;
use checkout_service::payment::{
    NextStep, PaymentError, PaymentOrchestrator, PaymentRequest, ReconcileError, RedirectFlag,
};
use checkout_service::session::SessionError;
use common::{hold, payer, store, t0, CodeRule, FakeBackend};
use tokio::sync::watch;
use uuid::Uuid;

fn request(hold_id: Uuid, local_total: i64) -> PaymentRequest {
    PaymentRequest { hold_id, payer: payer(), discount_code: None, local_total }
}

#[tokio::test]
async fn session_payment_redirects_with_discount_and_guards_reentry() {
    let backend = FakeBackend::new();
    let hold_id = Uuid::new_v4();
    backend
        .with_hold(hold(hold_id, 10_000, 600))
        .with_code("TEN", CodeRule::Percent { percent: 10.0, cap: None, minimum: 0 })
        .preference_total(Some(10_500));
    let clock = ManualClock::new(t0());
    let store = store(&clock);
    store.open(backend.as_ref(), hold_id).await.unwrap();
    store.apply_discount(backend.as_ref(), hold_id, "TEN").await.unwrap();

    let redirect = store.pay(backend.as_ref(), hold_id, payer()).await.unwrap();
    assert_eq!(redirect.amount, 10_500);
    assert_eq!(redirect.redirect_after_ms, 1_500);
    assert!(redirect.redirect_url.starts_with("https://pay.example/checkout/"));
    let orders = backend.order_calls.lock().unwrap().clone();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].discount_code.as_deref(), Some("TEN"));
    assert!(store.view(hold_id).unwrap().redirecting);

    let err = store.pay(backend.as_ref(), hold_id, payer()).await.unwrap_err();
    assert!(matches!(err, SessionError::Payment(PaymentError::AlreadyRedirecting)));
    assert_eq!(backend.order_calls.lock().unwrap().len(), 1);

    let view = store.restore(hold_id).unwrap();
    assert!(!view.redirecting);
    store.pay(backend.as_ref(), hold_id, payer()).await.unwrap();
    assert_eq!(backend.order_calls.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn restore_during_in_flight_payment_keeps_guard() {
    let backend = FakeBackend::new();
    let hold_id = Uuid::new_v4();
    backend
        .with_hold(hold(hold_id, 10_000, 600))
        .preference_total(Some(11_500))
        .preference_delay(Duration::from_millis(500));
    let clock = ManualClock::new(t0());
    let store = store(&clock);
    store.open(backend.as_ref(), hold_id).await.unwrap();

    let first = store.pay(backend.as_ref(), hold_id, payer());
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let view = store.restore(hold_id).unwrap();
        assert!(view.redirecting);
        store.pay(backend.as_ref(), hold_id, payer()).await
    };
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    assert!(matches!(second, Err(SessionError::Payment(PaymentError::AlreadyRedirecting))));
    assert_eq!(backend.order_calls.lock().unwrap().len(), 1);

    let view = store.restore(hold_id).unwrap();
    assert!(!view.redirecting);
    store.pay(backend.as_ref(), hold_id, payer()).await.unwrap();
    assert_eq!(backend.order_calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn cents_confusion_blocks_redirect() {
    let backend = FakeBackend::new();
    // local $1200.00, backend reports 1200 cents ($12.00)
    backend.preference_total(Some(1_200));
    let orchestrator = PaymentOrchestrator::new(backend.as_ref(), 1_000, Duration::from_millis(1_500));
    let flag = RedirectFlag::default();

    let err = orchestrator.pay(request(Uuid::new_v4(), 120_000), &flag, None).await.unwrap_err();
    assert!(matches!(err, PaymentError::Reconcile(ReconcileError::UnitMismatch { .. })));
    assert_eq!(err.code(), "unit_mismatch");
    assert!(!err.is_retryable());
    assert!(!flag.is_set());
}

#[tokio::test]
async fn large_difference_blocks_redirect() {
    let backend = FakeBackend::new();
    backend.preference_total(Some(15_000));
    let orchestrator = PaymentOrchestrator::new(backend.as_ref(), 1_000, Duration::ZERO);
    let flag = RedirectFlag::default();
    let err = orchestrator.pay(request(Uuid::new_v4(), 11_500), &flag, None).await.unwrap_err();
    assert!(matches!(err, PaymentError::Reconcile(ReconcileError::AmountMismatch { .. })));
    assert!(!flag.is_set());
}

#[tokio::test]
async fn hold_expired_on_order_creation_goes_back_to_seats() {
    let backend = FakeBackend::new();
    backend.order_fails(GatewayError::Conflict { code: "HoldExpired".into(), message: Some("Hold expired".into()) });
    let orchestrator = PaymentOrchestrator::new(backend.as_ref(), 1_000, Duration::ZERO);
    let flag = RedirectFlag::default();

    let err = orchestrator.pay(request(Uuid::new_v4(), 11_500), &flag, None).await.unwrap_err();
    assert_eq!(err, PaymentError::HoldExpired);
    assert_eq!(err.next_step(), NextStep::SeatSelection);
    assert!(!flag.is_set());
    assert_eq!(*backend.preference_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn unauthenticated_order_goes_to_login() {
    let backend = FakeBackend::new();
    backend.order_fails(GatewayError::Unauthorized { message: None });
    let orchestrator = PaymentOrchestrator::new(backend.as_ref(), 1_000, Duration::ZERO);
    let flag = RedirectFlag::default();
    let err = orchestrator.pay(request(Uuid::new_v4(), 11_500), &flag, None).await.unwrap_err();
    assert_eq!(err.next_step(), NextStep::Login);
}

#[tokio::test]
async fn invalid_payer_never_creates_an_order() {
    let backend = FakeBackend::new();
    let orchestrator = PaymentOrchestrator::new(backend.as_ref(), 1_000, Duration::ZERO);
    let flag = RedirectFlag::default();
    let mut req = request(Uuid::new_v4(), 11_500);
    req.payer.phone.clear();
    let err = orchestrator.pay(req, &flag, None).await.unwrap_err();
    match err {
        PaymentError::InvalidPayer(fields) => assert_eq!(fields[0].field, "phone"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(backend.order_calls.lock().unwrap().is_empty());
    assert!(!flag.is_set());
}

#[tokio::test(start_paused = true)]
async fn expiry_cancels_in_flight_payment() {
    let backend = FakeBackend::new();
    backend.preference_total(Some(11_500)).preference_delay(Duration::from_secs(5));
    let orchestrator = PaymentOrchestrator::new(backend.as_ref(), 1_000, Duration::ZERO);
    let flag = RedirectFlag::default();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = tx.send(true);
        // keep the sender alive past the receiver's check
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let err = orchestrator.pay(request(Uuid::new_v4(), 11_500), &flag, Some(rx)).await.unwrap_err();
    assert_eq!(err, PaymentError::HoldExpired);
    assert!(!flag.is_set());
}

#[tokio::test(start_paused = true)]
async fn payment_waits_for_outstanding_validation() {
    let backend = FakeBackend::new();
    let hold_id = Uuid::new_v4();
    backend
        .with_hold(hold(hold_id, 10_000, 600))
        .with_code("SLOW", CodeRule::Fixed(500))
        .delay_code("SLOW", Duration::from_secs(1))
        .preference_total(Some(11_000));
    let clock = ManualClock::new(t0());
    let store = store(&clock);
    store.open(backend.as_ref(), hold_id).await.unwrap();

    let apply = store.apply_discount(backend.as_ref(), hold_id, "SLOW");
    let pay = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.pay(backend.as_ref(), hold_id, payer()).await
    };
    let (applied, paid) = tokio::join!(apply, pay);
    applied.unwrap();
    assert!(matches!(paid, Err(SessionError::Payment(PaymentError::DiscountPending))));

    let redirect = store.pay(backend.as_ref(), hold_id, payer()).await.unwrap();
    assert_eq!(redirect.amount, 11_000);
}
