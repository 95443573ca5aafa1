//! Pipeline Repository
//!
//! Handles all database operations related to teams and pipelines.

use gantry_core::domain::pipeline::{
    ConfigVersion, InstanceVars, Pipeline, PipelineConfig, PipelineRef, Team,
};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::store::StoreResult;

/// Find a team by name
pub async fn find_team(pool: &PgPool, name: &str) -> Result<Option<Team>, sqlx::Error> {
    let row: Option<(Uuid, String)> = sqlx::query_as("SELECT id, name FROM teams WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(id, name)| Team { id, name }))
}

/// Instance vars as stored: empty and absent both become NULL
fn instance_vars_value(vars: &Option<InstanceVars>) -> Option<serde_json::Value> {
    vars.as_ref()
        .filter(|v| !v.is_empty())
        .map(|v| serde_json::Value::Object(v.clone().into_iter().collect()))
}

/// Find a pipeline by team and reference
pub async fn find<'e>(
    executor: impl PgExecutor<'e>,
    team_id: Uuid,
    pipeline_ref: &PipelineRef,
) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT p.id, p.team_id, t.name AS team_name, p.name, p.instance_vars,
               p.config_version, p.paused, p.public, p.ordering, p.created_at, p.updated_at
        FROM pipelines p
        JOIN teams t ON t.id = p.team_id
        WHERE p.team_id = $1
          AND p.name = $2
          AND COALESCE(p.instance_vars, '{}'::jsonb) = COALESCE($3::jsonb, '{}'::jsonb)
        "#,
    )
    .bind(team_id)
    .bind(&pipeline_ref.name)
    .bind(instance_vars_value(&pipeline_ref.instance_vars))
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find a pipeline by ID
pub async fn find_by_id<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT p.id, p.team_id, t.name AS team_name, p.name, p.instance_vars,
               p.config_version, p.paused, p.public, p.ordering, p.created_at, p.updated_at
        FROM pipelines p
        JOIN teams t ON t.id = p.team_id
        WHERE p.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Lock a pipeline row and return its id and stored config version
///
/// The lock leaves key columns alone so that concurrent build inserts can
/// still take their foreign-key share lock on the row.
pub async fn lock(
    conn: &mut PgConnection,
    team_id: Uuid,
    pipeline_ref: &PipelineRef,
) -> Result<Option<(Uuid, ConfigVersion)>, sqlx::Error> {
    let row: Option<(Uuid, i64)> = sqlx::query_as(
        r#"
        SELECT id, config_version
        FROM pipelines
        WHERE team_id = $1
          AND name = $2
          AND COALESCE(instance_vars, '{}'::jsonb) = COALESCE($3::jsonb, '{}'::jsonb)
        FOR NO KEY UPDATE
        "#,
    )
    .bind(team_id)
    .bind(&pipeline_ref.name)
    .bind(instance_vars_value(&pipeline_ref.instance_vars))
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(id, version)| (id, ConfigVersion(version))))
}

/// Insert a new pipeline at the end of its team's ordering
pub async fn create(
    conn: &mut PgConnection,
    team_id: Uuid,
    pipeline_ref: &PipelineRef,
    config: &PipelineConfig,
    paused: bool,
) -> StoreResult<Uuid> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    sqlx::query(
        r#"
        INSERT INTO pipelines (
            id, team_id, name, instance_vars, config, config_version,
            paused, public, ordering, created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5, 1, $6, FALSE,
            (SELECT COALESCE(MAX(ordering), 0) + 1 FROM pipelines WHERE team_id = $2),
            $7, $7
        )
        "#,
    )
    .bind(id)
    .bind(team_id)
    .bind(&pipeline_ref.name)
    .bind(instance_vars_value(&pipeline_ref.instance_vars))
    .bind(serde_json::to_value(config)?)
    .bind(paused)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(id)
}

/// Store a new config if the version still matches, bumping it
///
/// Returns false when another save got there first.
pub async fn compare_and_swap_config(
    conn: &mut PgConnection,
    id: Uuid,
    from_version: ConfigVersion,
    config: &PipelineConfig,
) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE pipelines
        SET config = $3, config_version = config_version + 1, updated_at = $4
        WHERE id = $1 AND config_version = $2
        "#,
    )
    .bind(id)
    .bind(from_version.0)
    .bind(serde_json::to_value(config)?)
    .bind(chrono::Utc::now())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List all pipelines
pub async fn list_all(pool: &PgPool) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT p.id, p.team_id, t.name AS team_name, p.name, p.instance_vars,
               p.config_version, p.paused, p.public, p.ordering, p.created_at, p.updated_at
        FROM pipelines p
        JOIN teams t ON t.id = p.team_id
        ORDER BY p.team_id, p.ordering, p.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// List pipelines of the given teams plus every public pipeline
pub async fn list_visible(pool: &PgPool, team_names: &[String]) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT p.id, p.team_id, t.name AS team_name, p.name, p.instance_vars,
               p.config_version, p.paused, p.public, p.ordering, p.created_at, p.updated_at
        FROM pipelines p
        JOIN teams t ON t.id = p.team_id
        WHERE t.name = ANY($1) OR p.public
        ORDER BY p.team_id, p.ordering, p.id
        "#,
    )
    .bind(team_names)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Expose or hide a pipeline
pub async fn set_public(pool: &PgPool, id: Uuid, public: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE pipelines SET public = $2 WHERE id = $1")
        .bind(id)
        .bind(public)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    team_id: Uuid,
    team_name: String,
    name: String,
    instance_vars: Option<serde_json::Value>,
    config_version: i64,
    paused: bool,
    public: bool,
    ordering: i32,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        let instance_vars = row
            .instance_vars
            .and_then(|v| serde_json::from_value::<InstanceVars>(v).ok())
            .filter(|v| !v.is_empty());

        Pipeline {
            id: row.id,
            team_id: row.team_id,
            team_name: row.team_name,
            name: row.name,
            instance_vars,
            config_version: ConfigVersion(row.config_version),
            paused: row.paused,
            public: row.public,
            ordering: row.ordering,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
