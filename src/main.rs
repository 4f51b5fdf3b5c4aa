use std::net::SocketAddr;
use std::str::FromStr;

use bookd::{app::app, config::AppConfig, payment::PaymentGateway, state::AppState, sweeper};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();
    config.validate()?;

    let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON;").execute(conn).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let gateway = PaymentGateway::new(config.stripe_secret_key.clone());
    tracing::info!(
        live_payments = gateway.is_live(),
        production = config.is_production(),
        "starting bookd"
    );

    tokio::spawn(sweeper::run(
        pool.clone(),
        gateway.clone(),
        config.clone(),
    ));

    let state = AppState {
        pool,
        config: config.clone(),
        gateway,
    };

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app(state)).await?;

    Ok(())
}
