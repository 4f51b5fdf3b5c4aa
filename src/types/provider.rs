use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub user_uid: String,
    pub display_name: String,
    pub is_online: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub category: String,
    pub name: String,
    pub price_cents: i64,
    pub is_active: bool,
}
