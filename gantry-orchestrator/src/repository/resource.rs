//! Resource Repository
//!
//! Handles all database operations related to resources and resource types.

use gantry_core::domain::pipeline::{InstanceVars, ResourceConfig, ResourceTypeConfig};
use gantry_core::domain::resource::{CheckableKey, Resource, ResourceType};
use gantry_core::domain::source::{Source, Version};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::store::StoreResult;

/// Mark every resource and resource type of a pipeline inactive
pub async fn deactivate_all(conn: &mut PgConnection, pipeline_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE resource_types SET active = FALSE WHERE pipeline_id = $1")
        .bind(pipeline_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE resources SET active = FALSE WHERE pipeline_id = $1")
        .bind(pipeline_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Insert or reactivate a resource type, keeping its id and scope
pub async fn upsert_resource_type(
    conn: &mut PgConnection,
    pipeline_id: Uuid,
    config: &ResourceTypeConfig,
    position: usize,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO resource_types (
            id, pipeline_id, name, type, source, defaults, privileged, params,
            tags, check_every, pinned_version, active, position
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE, $12)
        ON CONFLICT (pipeline_id, name) DO UPDATE
        SET type = EXCLUDED.type, source = EXCLUDED.source, defaults = EXCLUDED.defaults,
            privileged = EXCLUDED.privileged, params = EXCLUDED.params, tags = EXCLUDED.tags,
            check_every = EXCLUDED.check_every, pinned_version = EXCLUDED.pinned_version,
            active = TRUE, position = EXCLUDED.position
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(pipeline_id)
    .bind(&config.name)
    .bind(&config.type_)
    .bind(serde_json::to_value(&config.source)?)
    .bind(config.defaults.as_ref().map(serde_json::to_value).transpose()?)
    .bind(config.privileged)
    .bind(config.params.as_ref().map(serde_json::to_value).transpose()?)
    .bind(&config.tags)
    .bind(config.check_every.map(|c| c.to_string()))
    .bind(config.version.as_ref().map(serde_json::to_value).transpose()?)
    .bind(position as i32)
    .execute(conn)
    .await?;

    Ok(())
}

/// Insert or reactivate a resource, keeping its id and scope
pub async fn upsert_resource(
    conn: &mut PgConnection,
    pipeline_id: Uuid,
    config: &ResourceConfig,
    position: usize,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO resources (
            id, pipeline_id, name, type, source, tags, check_every, pinned_version,
            webhook_token, icon, active, position
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE, $11)
        ON CONFLICT (pipeline_id, name) DO UPDATE
        SET type = EXCLUDED.type, source = EXCLUDED.source, tags = EXCLUDED.tags,
            check_every = EXCLUDED.check_every, pinned_version = EXCLUDED.pinned_version,
            webhook_token = EXCLUDED.webhook_token, icon = EXCLUDED.icon,
            active = TRUE, position = EXCLUDED.position
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(pipeline_id)
    .bind(&config.name)
    .bind(&config.type_)
    .bind(serde_json::to_value(&config.source)?)
    .bind(&config.tags)
    .bind(config.check_every.map(|c| c.to_string()))
    .bind(config.version.as_ref().map(serde_json::to_value).transpose()?)
    .bind(&config.webhook_token)
    .bind(&config.icon)
    .bind(position as i32)
    .execute(conn)
    .await?;

    Ok(())
}

/// List active resources of every unpaused pipeline
pub async fn list_active_resources(pool: &PgPool) -> StoreResult<Vec<Resource>> {
    let rows = sqlx::query_as::<_, ResourceRow>(
        r#"
        SELECT r.id, r.pipeline_id, p.name AS pipeline_name,
               p.instance_vars AS pipeline_instance_vars, p.team_id, t.name AS team_name,
               r.name, r.type, r.source, r.tags, r.check_every, r.pinned_version, r.icon,
               r.resource_config_scope_id
        FROM resources r
        JOIN pipelines p ON p.id = r.pipeline_id
        JOIN teams t ON t.id = p.team_id
        WHERE r.active AND NOT p.paused
        ORDER BY r.pipeline_id, r.position
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Resource::try_from).collect()
}

/// List active resource types, optionally restricted to one pipeline
pub async fn list_active_resource_types<'e>(
    executor: impl PgExecutor<'e>,
    pipeline_id: Option<Uuid>,
) -> StoreResult<Vec<ResourceType>> {
    let rows = sqlx::query_as::<_, ResourceTypeRow>(
        r#"
        SELECT rt.id, rt.pipeline_id, p.name AS pipeline_name,
               p.instance_vars AS pipeline_instance_vars, p.team_id, t.name AS team_name,
               rt.name, rt.type, rt.source, rt.defaults, rt.privileged, rt.params, rt.tags,
               rt.check_every, rt.pinned_version, s.latest_version AS version,
               rt.resource_config_scope_id
        FROM resource_types rt
        JOIN pipelines p ON p.id = rt.pipeline_id
        JOIN teams t ON t.id = p.team_id
        LEFT JOIN resource_config_scopes s ON s.id = rt.resource_config_scope_id
        WHERE rt.active AND ($1::uuid IS NULL OR rt.pipeline_id = $1)
        ORDER BY rt.pipeline_id, rt.position
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(ResourceType::try_from).collect()
}

/// List active resources of one pipeline
pub async fn list_pipeline_resources(
    conn: &mut PgConnection,
    pipeline_id: Uuid,
) -> StoreResult<Vec<Resource>> {
    let rows = sqlx::query_as::<_, ResourceRow>(
        r#"
        SELECT r.id, r.pipeline_id, p.name AS pipeline_name,
               p.instance_vars AS pipeline_instance_vars, p.team_id, t.name AS team_name,
               r.name, r.type, r.source, r.tags, r.check_every, r.pinned_version, r.icon,
               r.resource_config_scope_id
        FROM resources r
        JOIN pipelines p ON p.id = r.pipeline_id
        JOIN teams t ON t.id = p.team_id
        WHERE r.active AND r.pipeline_id = $1
        ORDER BY r.position
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(Resource::try_from).collect()
}

/// Find an active resource by pipeline and name
pub async fn find_resource(pool: &PgPool, pipeline_id: Uuid, name: &str) -> StoreResult<Option<Resource>> {
    let row = sqlx::query_as::<_, ResourceRow>(
        r#"
        SELECT r.id, r.pipeline_id, p.name AS pipeline_name,
               p.instance_vars AS pipeline_instance_vars, p.team_id, t.name AS team_name,
               r.name, r.type, r.source, r.tags, r.check_every, r.pinned_version, r.icon,
               r.resource_config_scope_id
        FROM resources r
        JOIN pipelines p ON p.id = r.pipeline_id
        JOIN teams t ON t.id = p.team_id
        WHERE r.active AND r.pipeline_id = $1 AND r.name = $2
        "#,
    )
    .bind(pipeline_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    row.map(Resource::try_from).transpose()
}

/// Find an active resource type by pipeline and name
pub async fn find_resource_type(
    pool: &PgPool,
    pipeline_id: Uuid,
    name: &str,
) -> StoreResult<Option<ResourceType>> {
    let row = sqlx::query_as::<_, ResourceTypeRow>(
        r#"
        SELECT rt.id, rt.pipeline_id, p.name AS pipeline_name,
               p.instance_vars AS pipeline_instance_vars, p.team_id, t.name AS team_name,
               rt.name, rt.type, rt.source, rt.defaults, rt.privileged, rt.params, rt.tags,
               rt.check_every, rt.pinned_version, s.latest_version AS version,
               rt.resource_config_scope_id
        FROM resource_types rt
        JOIN pipelines p ON p.id = rt.pipeline_id
        JOIN teams t ON t.id = p.team_id
        LEFT JOIN resource_config_scopes s ON s.id = rt.resource_config_scope_id
        WHERE rt.active AND rt.pipeline_id = $1 AND rt.name = $2
        "#,
    )
    .bind(pipeline_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    row.map(ResourceType::try_from).transpose()
}

/// Link a checkable to its resource config scope
pub async fn set_scope(
    conn: &mut PgConnection,
    checkable: CheckableKey,
    scope_id: Uuid,
) -> Result<(), sqlx::Error> {
    let query = match checkable {
        CheckableKey::Resource(_) => "UPDATE resources SET resource_config_scope_id = $2 WHERE id = $1",
        CheckableKey::ResourceType(_) => {
            "UPDATE resource_types SET resource_config_scope_id = $2 WHERE id = $1"
        }
    };
    let id = match checkable {
        CheckableKey::Resource(id) | CheckableKey::ResourceType(id) => id,
    };

    sqlx::query(query).bind(id).bind(scope_id).execute(conn).await?;
    Ok(())
}

/// Lock an active checkable's row for the rest of the transaction
///
/// Returns false when the checkable does not exist or has been deactivated.
pub async fn lock_checkable(conn: &mut PgConnection, checkable: CheckableKey) -> Result<bool, sqlx::Error> {
    let (query, id) = match checkable {
        CheckableKey::Resource(id) => (
            "SELECT id FROM resources WHERE id = $1 AND active FOR NO KEY UPDATE",
            id,
        ),
        CheckableKey::ResourceType(id) => (
            "SELECT id FROM resource_types WHERE id = $1 AND active FOR NO KEY UPDATE",
            id,
        ),
    };

    let row: Option<(Uuid,)> = sqlx::query_as(query).bind(id).fetch_optional(conn).await?;
    Ok(row.is_some())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ResourceRow {
    id: Uuid,
    pipeline_id: Uuid,
    pipeline_name: String,
    pipeline_instance_vars: Option<serde_json::Value>,
    team_id: Uuid,
    team_name: String,
    name: String,
    #[sqlx(rename = "type")]
    type_: String,
    source: serde_json::Value,
    tags: Vec<String>,
    check_every: Option<String>,
    pinned_version: Option<serde_json::Value>,
    icon: Option<String>,
    resource_config_scope_id: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct ResourceTypeRow {
    id: Uuid,
    pipeline_id: Uuid,
    pipeline_name: String,
    pipeline_instance_vars: Option<serde_json::Value>,
    team_id: Uuid,
    team_name: String,
    name: String,
    #[sqlx(rename = "type")]
    type_: String,
    source: serde_json::Value,
    defaults: Option<serde_json::Value>,
    privileged: bool,
    params: Option<serde_json::Value>,
    tags: Vec<String>,
    check_every: Option<String>,
    pinned_version: Option<serde_json::Value>,
    version: Option<serde_json::Value>,
    resource_config_scope_id: Option<Uuid>,
}

fn instance_vars(value: Option<serde_json::Value>) -> Option<InstanceVars> {
    value
        .and_then(|v| serde_json::from_value::<InstanceVars>(v).ok())
        .filter(|v| !v.is_empty())
}

fn version(value: Option<serde_json::Value>) -> Result<Option<Version>, serde_json::Error> {
    value.map(serde_json::from_value).transpose()
}

impl TryFrom<ResourceRow> for Resource {
    type Error = crate::store::StoreError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        Ok(Resource {
            id: row.id,
            pipeline_id: row.pipeline_id,
            pipeline_name: row.pipeline_name,
            pipeline_instance_vars: instance_vars(row.pipeline_instance_vars),
            team_id: row.team_id,
            team_name: row.team_name,
            name: row.name,
            type_: row.type_,
            source: serde_json::from_value::<Source>(row.source)?,
            tags: row.tags,
            check_every: row.check_every.and_then(|s| s.parse().ok()),
            pinned_version: version(row.pinned_version)?,
            icon: row.icon,
            resource_config_scope_id: row.resource_config_scope_id,
        })
    }
}

impl TryFrom<ResourceTypeRow> for ResourceType {
    type Error = crate::store::StoreError;

    fn try_from(row: ResourceTypeRow) -> Result<Self, Self::Error> {
        Ok(ResourceType {
            id: row.id,
            pipeline_id: row.pipeline_id,
            pipeline_name: row.pipeline_name,
            pipeline_instance_vars: instance_vars(row.pipeline_instance_vars),
            team_id: row.team_id,
            team_name: row.team_name,
            name: row.name,
            type_: row.type_,
            source: serde_json::from_value::<Source>(row.source)?,
            defaults: row.defaults.map(serde_json::from_value).transpose()?,
            privileged: row.privileged,
            params: row.params.map(serde_json::from_value).transpose()?,
            tags: row.tags,
            check_every: row.check_every.and_then(|s| s.parse().ok()),
            pinned_version: version(row.pinned_version)?,
            version: version(row.version)?,
            resource_config_scope_id: row.resource_config_scope_id,
        })
    }
}
