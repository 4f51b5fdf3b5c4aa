mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bookd::payment::{self, PaymentGateway};
use bookd::store::StoreError;
use bookd::types::ProcessOutcome;
use bookd::webhook;
use serde_json::json;

use common::*;

fn event_payload(event_id: &str, provider_ref: &str) -> serde_json::Value {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": provider_ref } }
    })
}

#[tokio::test]
async fn duplicate_delivery_runs_handler_once() {
    let db = setup_db().await;
    let pool = db.pool;
    let payload = event_payload("evt_dup_456", "pi_mock_1");
    let counter = Arc::new(AtomicUsize::new(0));

    let c = counter.clone();
    let first = webhook::process_event(&pool, "stripe", "evt_dup_456", &payload, move |_conn, _p| {
        Box::pin(async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
    .await
    .expect("first delivery");
    assert_eq!(first, ProcessOutcome::Processed);

    let c = counter.clone();
    let second = webhook::process_event(&pool, "stripe", "evt_dup_456", &payload, move |_conn, _p| {
        Box::pin(async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
    .await
    .expect("second delivery");
    assert_eq!(second, ProcessOutcome::Duplicate);

    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT status FROM webhook_events WHERE provider = 'stripe' AND event_id = 'evt_dup_456'")
            .fetch_all(&pool)
            .await
            .expect("read ledger");
    assert_eq!(rows.len(), 1, "exactly one ledger row per event id");
    assert_eq!(rows[0].0, "PROCESSED");
}

#[tokio::test]
async fn failed_handler_is_recorded_and_retriable() {
    let db = setup_db().await;
    let pool = db.pool;
    let payload = event_payload("evt_fail_1", "pi_mock_2");

    let err = webhook::process_event(&pool, "stripe", "evt_fail_1", &payload, |_conn, _p| {
        Box::pin(async move { Err(StoreError::Payment("provider exploded".to_string())) })
    })
    .await
    .expect_err("failing handler must propagate");
    assert!(matches!(err, StoreError::Payment(_)));

    let (status, last_error): (String, Option<String>) = sqlx::query_as(
        "SELECT status, last_error FROM webhook_events WHERE provider = 'stripe' AND event_id = 'evt_fail_1'",
    )
    .fetch_one(&pool)
    .await
    .expect("read ledger");
    assert_eq!(status, "FAILED");
    assert!(last_error.unwrap_or_default().contains("provider exploded"));

    // FAILED does not suppress re-execution.
    let outcome = webhook::process_event(&pool, "stripe", "evt_fail_1", &payload, |_conn, _p| {
        Box::pin(async move { Ok(()) })
    })
    .await
    .expect("retry delivery");
    assert_eq!(outcome, ProcessOutcome::Processed);
}

#[tokio::test]
async fn failed_handler_leaves_no_partial_effects() {
    let db = setup_db().await;
    let pool = db.pool;
    let payload = event_payload("evt_partial_1", "pi_mock_3");

    let result = webhook::process_event(&pool, "stripe", "evt_partial_1", &payload, |conn, _p| {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO providers (id, user_uid, display_name, is_online, created_at) VALUES ('x', 'ghost', 'Ghost', 1, '2026-01-01T00:00:00Z')",
            )
            .execute(&mut *conn)
            .await?;
            Err(StoreError::Payment("failed after write".to_string()))
        })
    })
    .await;
    assert!(result.is_err());

    let ghosts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM providers WHERE user_uid = 'ghost'")
        .fetch_one(&pool)
        .await
        .expect("count ghosts");
    assert_eq!(ghosts, 0, "handler effects must roll back with the ledger tx");

    let status: String = sqlx::query_scalar(
        "SELECT status FROM webhook_events WHERE provider = 'stripe' AND event_id = 'evt_partial_1'",
    )
    .fetch_one(&pool)
    .await
    .expect("read ledger");
    assert_eq!(status, "FAILED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_deliveries_process_once() {
    let db = setup_db_shared(4).await;
    let pool = db.pool;
    let payload = event_payload("evt_race_1", "pi_mock_4");
    let counter = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let pool = pool.clone();
        let payload = payload.clone();
        let counter = counter.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            webhook::process_event(&pool, "stripe", "evt_race_1", &payload, move |_conn, _p| {
                Box::pin(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.expect("join").expect("delivery"));
    }
    outcomes.sort_by_key(|o| *o == ProcessOutcome::Processed);

    assert_eq!(outcomes, vec![ProcessOutcome::Duplicate, ProcessOutcome::Processed]);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn authorization_event_drives_booking_to_paid_searching() {
    let db = setup_db().await;
    let pool = db.pool;
    let config = test_config();
    let gateway = PaymentGateway::mock();

    let service_id = seed_service(&pool, 45_000).await;
    seed_provider(&pool, "p1", service_id, true, "2026-01-01T00:00:00.000Z").await;

    let booking = create_booking(&pool, &config, "u1", service_id).await;
    let intent = payment::create_intent(&pool, &gateway, booking.id, &user("u1"))
        .await
        .expect("create intent");

    let payload = event_payload("evt_auth_1", &intent.provider_ref);
    let provider_ref = intent.provider_ref.clone();
    let outcome = webhook::process_event(&pool, "stripe", "evt_auth_1", &payload, move |conn, _p| {
        Box::pin(async move {
            payment::on_authorization_success(conn, "STRIPE", &provider_ref).await
        })
    })
    .await
    .expect("process authorization");
    assert_eq!(outcome, ProcessOutcome::Processed);

    assert_eq!(booking_status(&pool, booking.id).await, "PAID_SEARCHING");
    let intents = intent_rows(&pool, booking.id).await;
    assert_eq!(intents[0].1, "AUTHORIZED");
}

#[tokio::test]
async fn late_authorization_for_expired_booking_fails_and_booking_stays_expired() {
    let db = setup_db().await;
    let pool = db.pool;
    let config = test_config();
    let gateway = PaymentGateway::mock();

    let service_id = seed_service(&pool, 45_000).await;
    let booking = create_booking(&pool, &config, "u1", service_id).await;
    let intent = payment::create_intent(&pool, &gateway, booking.id, &user("u1"))
        .await
        .expect("create intent");

    sqlx::query("UPDATE bookings SET status = 'EXPIRED' WHERE id = ?")
        .bind(booking.id.to_string())
        .execute(&pool)
        .await
        .expect("expire booking");

    let payload = event_payload("evt_late_1", &intent.provider_ref);
    let provider_ref = intent.provider_ref.clone();
    let result = webhook::process_event(&pool, "stripe", "evt_late_1", &payload, move |conn, _p| {
        Box::pin(async move {
            payment::on_authorization_success(conn, "STRIPE", &provider_ref).await
        })
    })
    .await;
    assert!(result.is_err(), "authorization after expiry must fail");

    assert_eq!(booking_status(&pool, booking.id).await, "EXPIRED");
    let status: String = sqlx::query_scalar(
        "SELECT status FROM webhook_events WHERE provider = 'stripe' AND event_id = 'evt_late_1'",
    )
    .fetch_one(&pool)
    .await
    .expect("read ledger");
    assert_eq!(status, "FAILED");
}
