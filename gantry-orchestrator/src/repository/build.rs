//! Build Repository
//!
//! Handles all database operations related to check builds and their
//! event logs.

use gantry_core::domain::build::{Build, BuildEvent, BuildStatus};
use gantry_core::domain::resource::CheckableKey;
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::store::{StoreError, StoreResult};

fn checkable_columns(checkable: CheckableKey) -> (Option<Uuid>, Option<Uuid>) {
    match checkable {
        CheckableKey::Resource(id) => (Some(id), None),
        CheckableKey::ResourceType(id) => (None, Some(id)),
    }
}

/// Insert a new build
pub async fn create(conn: &mut PgConnection, build: &Build) -> StoreResult<()> {
    let (resource_id, resource_type_id) = checkable_columns(build.checkable);

    sqlx::query(
        r#"
        INSERT INTO builds (
            id, name, team_id, pipeline_id, resource_id, resource_type_id, status,
            manually_triggered, plan, span_context, create_time, start_time, end_time
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(build.id)
    .bind(&build.name)
    .bind(build.team_id)
    .bind(build.pipeline_id)
    .bind(resource_id)
    .bind(resource_type_id)
    .bind(build.status.as_str())
    .bind(build.manually_triggered)
    .bind(serde_json::to_value(&build.plan)?)
    .bind(serde_json::to_value(&build.span_context)?)
    .bind(build.create_time)
    .bind(build.start_time)
    .bind(build.end_time)
    .execute(conn)
    .await?;

    Ok(())
}

/// Find a build by ID
pub async fn find_by_id<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> StoreResult<Option<Build>> {
    let row = sqlx::query_as::<_, BuildRow>(
        r#"
        SELECT id, name, team_id, pipeline_id, resource_id, resource_type_id, status,
               manually_triggered, plan, span_context, create_time, start_time, end_time
        FROM builds
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(Build::try_from).transpose()
}

/// Lock a build row for the rest of the transaction
pub async fn find_for_update(conn: &mut PgConnection, id: Uuid) -> StoreResult<Option<Build>> {
    let row = sqlx::query_as::<_, BuildRow>(
        r#"
        SELECT id, name, team_id, pipeline_id, resource_id, resource_type_id, status,
               manually_triggered, plan, span_context, create_time, start_time, end_time
        FROM builds
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(Build::try_from).transpose()
}

/// List every build of a checkable, oldest first
pub async fn list_for_checkable<'e>(
    executor: impl PgExecutor<'e>,
    checkable: CheckableKey,
) -> StoreResult<Vec<Build>> {
    let (resource_id, resource_type_id) = checkable_columns(checkable);

    let rows = sqlx::query_as::<_, BuildRow>(
        r#"
        SELECT id, name, team_id, pipeline_id, resource_id, resource_type_id, status,
               manually_triggered, plan, span_context, create_time, start_time, end_time
        FROM builds
        WHERE resource_id = $1 OR resource_type_id = $2
        ORDER BY create_time
        "#,
    )
    .bind(resource_id)
    .bind(resource_type_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(Build::try_from).collect()
}

/// Delete builds and their event logs
pub async fn delete_with_events(conn: &mut PgConnection, ids: &[Uuid]) -> Result<(), sqlx::Error> {
    if ids.is_empty() {
        return Ok(());
    }

    sqlx::query("DELETE FROM build_events WHERE build_id = ANY($1)")
        .bind(ids)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM builds WHERE id = ANY($1)")
        .bind(ids)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Move a build to a terminal status
pub async fn finish(
    conn: &mut PgConnection,
    id: Uuid,
    status: BuildStatus,
    end_time: chrono::DateTime<chrono::Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE builds SET status = $2, end_time = $3 WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .bind(end_time)
        .execute(conn)
        .await?;

    Ok(())
}

/// Append an event to a build's log
pub async fn add_event(conn: &mut PgConnection, event: &BuildEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO build_events (build_id, event_type, payload, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(event.build_id)
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(event.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// List a build's events in insertion order
pub async fn list_events<'e>(executor: impl PgExecutor<'e>, build_id: Uuid) -> Result<Vec<BuildEvent>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BuildEventRow>(
        r#"
        SELECT build_id, event_type, payload, created_at
        FROM build_events
        WHERE build_id = $1
        ORDER BY id
        "#,
    )
    .bind(build_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: Uuid,
    name: String,
    team_id: Uuid,
    pipeline_id: Uuid,
    resource_id: Option<Uuid>,
    resource_type_id: Option<Uuid>,
    status: String,
    manually_triggered: bool,
    plan: serde_json::Value,
    span_context: serde_json::Value,
    create_time: chrono::DateTime<chrono::Utc>,
    start_time: Option<chrono::DateTime<chrono::Utc>>,
    end_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<BuildRow> for Build {
    type Error = StoreError;

    fn try_from(row: BuildRow) -> Result<Self, Self::Error> {
        let checkable = match (row.resource_id, row.resource_type_id) {
            (Some(id), _) => CheckableKey::Resource(id),
            (None, Some(id)) => CheckableKey::ResourceType(id),
            (None, None) => return Err(StoreError::UnlinkedBuild(row.id)),
        };

        Ok(Build {
            id: row.id,
            name: row.name,
            team_id: row.team_id,
            pipeline_id: row.pipeline_id,
            checkable,
            status: string_to_status(&row.status),
            manually_triggered: row.manually_triggered,
            plan: serde_json::from_value(row.plan)?,
            span_context: serde_json::from_value(row.span_context)?,
            create_time: row.create_time,
            start_time: row.start_time,
            end_time: row.end_time,
        })
    }
}

fn string_to_status(s: &str) -> BuildStatus {
    s.parse().unwrap_or(BuildStatus::Errored)
}

#[derive(sqlx::FromRow)]
struct BuildEventRow {
    build_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<BuildEventRow> for BuildEvent {
    fn from(row: BuildEventRow) -> Self {
        BuildEvent {
            build_id: row.build_id,
            event_type: row.event_type,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(resource_id: Option<Uuid>, resource_type_id: Option<Uuid>) -> BuildRow {
        BuildRow {
            id: Uuid::new_v4(),
            name: "check".to_string(),
            team_id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            resource_id,
            resource_type_id,
            status: "started".to_string(),
            manually_triggered: false,
            plan: json!({
                "id": "1",
                "check": { "name": "r", "type": "git", "source": {}, "interval": "1m0s", "resource": "r" }
            }),
            span_context: json!({ "span_id": "7" }),
            create_time: chrono::Utc::now(),
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn test_row_into_build() {
        let resource_type_id = Uuid::new_v4();
        let build = Build::try_from(row(None, Some(resource_type_id))).unwrap();
        assert_eq!(build.checkable, CheckableKey::ResourceType(resource_type_id));
        assert_eq!(build.status, BuildStatus::Started);
        assert_eq!(build.plan.check.interval, "1m0s");
        assert_eq!(build.span_context["span_id"], "7");
    }

    #[test]
    fn test_row_without_checkable_is_rejected() {
        assert!(Build::try_from(row(None, None)).is_err());
    }

    #[test]
    fn test_checkable_columns() {
        let id = Uuid::new_v4();
        assert_eq!(checkable_columns(CheckableKey::Resource(id)), (Some(id), None));
        assert_eq!(checkable_columns(CheckableKey::ResourceType(id)), (None, Some(id)));
    }

    #[test]
    fn test_string_to_status() {
        assert_eq!(string_to_status("succeeded"), BuildStatus::Succeeded);
        assert_eq!(string_to_status("garbage"), BuildStatus::Errored);
    }
}
