use axum::{Json, extract::State};

use crate::{error::ApiError, state::AppState, store, types::Service};

/// Public, read-only view of the active services catalogue.
pub async fn list_services_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Service>>, ApiError> {
    let rows: Vec<ServiceRow> = sqlx::query_as(
        r#"
        SELECT id, category, name, price_cents, is_active
        FROM services
        WHERE is_active = 1
        ORDER BY category ASC, name ASC
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let services = rows
        .into_iter()
        .map(|row| {
            Ok(Service {
                id: store::parse_uuid("service id", &row.id)
                    .map_err(|_| ApiError::internal("invalid service id"))?,
                category: row.category,
                name: row.name,
                price_cents: row.price_cents,
                is_active: row.is_active != 0,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(Json(services))
}

#[derive(sqlx::FromRow)]
struct ServiceRow {
    id: String,
    category: String,
    name: String,
    price_cents: i64,
    is_active: i64,
}
