use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::payment::PaymentGateway;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: AppConfig,
    pub gateway: PaymentGateway,
}
