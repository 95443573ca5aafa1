//! Resource Config Scope Repository

use gantry_core::scope::ScopeKey;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::store::StoreResult;

/// Find the scope for a key's digest, creating it on first use
pub async fn find_or_create(conn: &mut PgConnection, key: &ScopeKey) -> StoreResult<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO resource_config_scopes (id, digest, type, source, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (digest) DO UPDATE SET digest = EXCLUDED.digest
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(key.digest()?)
    .bind(&key.type_)
    .bind(serde_json::to_value(&key.source)?)
    .bind(chrono::Utc::now())
    .fetch_one(conn)
    .await?;

    Ok(id)
}
