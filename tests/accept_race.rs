mod common;

use std::sync::Arc;

use bookd::booking;
use bookd::payment::PaymentGateway;
use bookd::store::{StateCode, StoreError, format_utc};
use chrono::{Duration, Utc};

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_accepts_yield_exactly_one_winner() {
    let db = setup_db_shared(10).await;
    let pool = db.pool;
    let config = test_config();
    let gateway = PaymentGateway::mock();

    let service_id = seed_service(&pool, 45_000).await;
    let base = Utc::now();
    for i in 0..5 {
        seed_provider(
            &pool,
            &format!("p{i}"),
            service_id,
            true,
            &format_utc(base + Duration::seconds(i)),
        )
        .await;
    }

    let booking = create_paid_booking(&pool, &config, &gateway, "u1", service_id).await;
    assert_eq!(booking.candidate_list.len(), 5);

    let total_attempts = 50;
    let barrier = Arc::new(tokio::sync::Barrier::new(total_attempts));
    let mut handles = Vec::with_capacity(total_attempts);

    for attempt in 0..total_attempts {
        let pool = pool.clone();
        let barrier = barrier.clone();
        let provider_uid = format!("p{}", attempt % 5);
        let booking_id = booking.id;

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            booking::accept_booking(&pool, &provider_uid, booking_id)
                .await
                .map(|b| b.provider_id.expect("winner carries provider uid"))
        }));
    }

    let mut winners = Vec::new();
    let mut state_failures = 0;
    for handle in handles {
        match handle.await.expect("join accept task") {
            Ok(uid) => winners.push(uid),
            Err(err) => {
                assert!(
                    matches!(
                        err,
                        StoreError::State {
                            code: StateCode::InvalidTransition
                                | StateCode::OwnedByOtherProvider
                                | StateCode::StatusDrift,
                            ..
                        }
                    ),
                    "losers must fail deterministically, got {err:?}"
                );
                state_failures += 1;
            }
        }
    }

    assert_eq!(winners.len(), 1, "exactly one accept must win");
    assert_eq!(state_failures, total_attempts - 1);

    let (status, provider_id): (String, Option<String>) =
        sqlx::query_as("SELECT status, provider_id FROM bookings WHERE id = ?")
            .bind(booking.id.to_string())
            .fetch_one(&pool)
            .await
            .expect("read booking row");
    assert_eq!(status, "ACCEPTED");
    assert_eq!(provider_id.as_deref(), Some(winners[0].as_str()));

    // The audit log records exactly one accept.
    let accepts: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM booking_events WHERE booking_id = ? AND action = 'accept_booking'",
    )
    .bind(booking.id.to_string())
    .fetch_one(&pool)
    .await
    .expect("count accept events");
    assert_eq!(accepts, 1);
}

#[tokio::test]
async fn non_candidate_cannot_accept() {
    let db = setup_db().await;
    let pool = db.pool;
    let config = test_config();
    let gateway = PaymentGateway::mock();

    let service_id = seed_service(&pool, 45_000).await;
    seed_provider(&pool, "p1", service_id, true, &format_utc(Utc::now())).await;

    let booking = create_paid_booking(&pool, &config, &gateway, "u1", service_id).await;

    let err = booking::accept_booking(&pool, "stranger", booking.id)
        .await
        .expect_err("non-candidate must be rejected");
    assert!(matches!(
        err,
        StoreError::State {
            code: StateCode::NotACandidate,
            ..
        }
    ));
    assert_eq!(booking_status(&pool, booking.id).await, "PAID_SEARCHING");
}

#[tokio::test]
async fn offline_providers_are_not_candidates() {
    let db = setup_db().await;
    let pool = db.pool;
    let config = test_config();

    let service_id = seed_service(&pool, 45_000).await;
    seed_provider(&pool, "online", service_id, true, &format_utc(Utc::now())).await;
    seed_provider(&pool, "offline", service_id, false, &format_utc(Utc::now())).await;

    let booking = create_booking(&pool, &config, "u1", service_id).await;
    assert_eq!(booking.candidate_list, vec!["online".to_string()]);
}

#[tokio::test]
async fn candidate_list_is_capped_and_ordered_by_provider_age() {
    let db = setup_db().await;
    let pool = db.pool;
    let config = test_config();

    let service_id = seed_service(&pool, 45_000).await;
    let base = Utc::now();
    // Seed newest first so insertion order cannot masquerade as the sort.
    for i in (0..7).rev() {
        seed_provider(
            &pool,
            &format!("p{i}"),
            service_id,
            true,
            &format_utc(base + Duration::seconds(i)),
        )
        .await;
    }

    let booking = create_booking(&pool, &config, "u1", service_id).await;
    assert_eq!(
        booking.candidate_list,
        vec!["p0", "p1", "p2", "p3", "p4"]
    );
}

#[tokio::test]
async fn redispatch_allows_a_fresh_accept_cycle() {
    let db = setup_db().await;
    let pool = db.pool;
    let config = test_config();
    let gateway = PaymentGateway::mock();

    let service_id = seed_service(&pool, 45_000).await;
    let base = Utc::now();
    seed_provider(&pool, "p1", service_id, true, &format_utc(base)).await;
    seed_provider(&pool, "p2", service_id, true, &format_utc(base + Duration::seconds(1))).await;

    let booking = create_paid_booking(&pool, &config, &gateway, "u1", service_id).await;

    booking::accept_booking(&pool, "p1", booking.id).await.expect("first accept");
    booking::provider_cancel(&pool, "p1", booking.id)
        .await
        .expect("re-dispatch");

    let reloaded = booking::get_booking(&pool, booking.id).await.expect("reload");
    assert_eq!(booking_status(&pool, booking.id).await, "PAID_SEARCHING");
    assert_eq!(reloaded.provider_id, None);
    assert_eq!(reloaded.candidate_list, booking.candidate_list);

    let accepted = booking::accept_booking(&pool, "p2", booking.id)
        .await
        .expect("second accept");
    assert_eq!(accepted.provider_id.as_deref(), Some("p2"));
}
