#![allow(dead_code)]

use std::fs;

use bookd::auth::{Principal, Role};
use bookd::config::AppConfig;
use bookd::payment::PaymentGateway;
use bookd::types::{Booking, CreateBookingRequest};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tempfile::NamedTempFile;
use uuid::Uuid;

pub struct TestDb {
    pub pool: SqlitePool,
    _db_file: NamedTempFile,
}

pub async fn setup_db() -> TestDb {
    setup_db_shared(5).await
}

pub async fn setup_db_shared(max_connections: u32) -> TestDb {
    let db_file = NamedTempFile::new().expect("create temp sqlite file");
    let options = SqliteConnectOptions::new()
        .filename(db_file.path())
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .expect("connect sqlite for migrations");
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&mut conn)
        .await
        .expect("enable foreign keys for migrations");
    run_migrations_on_conn(&mut conn)
        .await
        .expect("run migrations");
    conn.close().await.expect("close migration conn");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON;")
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
        .expect("connect sqlite file");

    TestDb {
        pool,
        _db_file: db_file,
    }
}

async fn run_migrations_on_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let mut entries: Vec<_> = fs::read_dir("migrations")
        .map_err(sqlx::Error::Io)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("sql"))
        .collect();

    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let contents = fs::read_to_string(entry.path()).map_err(sqlx::Error::Io)?;
        for statement in contents.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&mut *conn).await?;
        }
    }

    Ok(())
}

pub fn test_config() -> AppConfig {
    AppConfig::default()
}

pub fn user(uid: &str) -> Principal {
    Principal::new(uid, Role::User)
}

pub fn provider(uid: &str) -> Principal {
    Principal::new(uid, Role::Provider)
}

pub fn admin(uid: &str) -> Principal {
    Principal::new(uid, Role::Admin)
}

pub async fn seed_service(pool: &SqlitePool, price_cents: i64) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO services (id, category, name, price_cents, is_active) VALUES (?, 'plumbing', 'Standard callout', ?, 1)",
    )
    .bind(id.to_string())
    .bind(price_cents)
    .execute(pool)
    .await
    .expect("insert service");

    id
}

pub async fn seed_provider(
    pool: &SqlitePool,
    uid: &str,
    service_id: Uuid,
    is_online: bool,
    created_at: &str,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO providers (id, user_uid, display_name, is_online, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(uid)
    .bind(format!("Provider {uid}"))
    .bind(is_online as i64)
    .bind(created_at)
    .execute(pool)
    .await
    .expect("insert provider");

    sqlx::query("INSERT INTO provider_services (provider_id, service_id) VALUES (?, ?)")
        .bind(id.to_string())
        .bind(service_id.to_string())
        .execute(pool)
        .await
        .expect("insert provider service");

    id
}

pub async fn create_booking(
    pool: &SqlitePool,
    config: &AppConfig,
    customer_uid: &str,
    service_id: Uuid,
) -> Booking {
    let req = CreateBookingRequest {
        service_id,
        slot_id: "slot-1".to_string(),
        user_id: customer_uid.to_string(),
    };
    bookd::booking::create_booking(pool, config, customer_uid, &req)
        .await
        .expect("create booking")
}

/// Creates the main intent and applies the authorization directly, the way
/// the webhook handler would.
pub async fn authorize_booking(pool: &SqlitePool, gateway: &PaymentGateway, booking: &Booking) {
    let intent =
        bookd::payment::create_intent(pool, gateway, booking.id, &user(&booking.customer_id))
            .await
            .expect("create intent");

    let mut conn = pool.acquire().await.expect("acquire connection");
    bookd::payment::on_authorization_success(&mut conn, "STRIPE", &intent.provider_ref)
        .await
        .expect("authorize intent");
}

/// Create + authorize in one step; returns the booking in PAID_SEARCHING.
pub async fn create_paid_booking(
    pool: &SqlitePool,
    config: &AppConfig,
    gateway: &PaymentGateway,
    customer_uid: &str,
    service_id: Uuid,
) -> Booking {
    let booking = create_booking(pool, config, customer_uid, service_id).await;
    authorize_booking(pool, gateway, &booking).await;
    bookd::booking::get_booking(pool, booking.id)
        .await
        .expect("reload booking")
}

/// Accept → travel → arrived → start, using the booking's real OTP.
pub async fn drive_to_in_progress(pool: &SqlitePool, booking: &Booking, provider_uid: &str) {
    bookd::booking::accept_booking(pool, provider_uid, booking.id)
        .await
        .expect("accept");
    bookd::booking::travel(pool, provider_uid, booking.id)
        .await
        .expect("travel");
    bookd::booking::arrived(pool, provider_uid, booking.id)
        .await
        .expect("arrived");
    bookd::booking::start_service(pool, provider_uid, booking.id, &booking.otp)
        .await
        .expect("start");
}

pub async fn booking_status(pool: &SqlitePool, booking_id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM bookings WHERE id = ?")
        .bind(booking_id.to_string())
        .fetch_one(pool)
        .await
        .expect("read booking status")
}

pub async fn intent_rows(pool: &SqlitePool, booking_id: Uuid) -> Vec<(String, String, i64, String)> {
    sqlx::query_as(
        "SELECT kind, status, amount_cents, provider_ref FROM payment_intents WHERE booking_id = ? ORDER BY created_at ASC",
    )
    .bind(booking_id.to_string())
    .fetch_all(pool)
    .await
    .expect("read payment intents")
}
