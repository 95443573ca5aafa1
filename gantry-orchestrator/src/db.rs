use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create teams table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT INTO teams (id, name) VALUES ($1, 'main') ON CONFLICT (name) DO NOTHING")
        .bind(Uuid::new_v4())
        .execute(pool)
        .await?;

    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            team_id UUID NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            instance_vars JSONB,
            config JSONB NOT NULL DEFAULT '{}',
            config_version BIGINT NOT NULL DEFAULT 1,
            paused BOOLEAN NOT NULL DEFAULT FALSE,
            public BOOLEAN NOT NULL DEFAULT FALSE,
            ordering INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_pipelines_identity
        ON pipelines(team_id, name, COALESCE(instance_vars, '{}'::jsonb))
        "#,
    )
    .execute(pool)
    .await?;

    // Create resource config scopes table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resource_config_scopes (
            id UUID PRIMARY KEY,
            digest VARCHAR(64) NOT NULL UNIQUE,
            type VARCHAR(255) NOT NULL,
            source JSONB NOT NULL DEFAULT '{}',
            latest_version JSONB,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create resource types table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resource_types (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            type VARCHAR(255) NOT NULL,
            source JSONB NOT NULL DEFAULT '{}',
            defaults JSONB,
            privileged BOOLEAN NOT NULL DEFAULT FALSE,
            params JSONB,
            tags TEXT[] NOT NULL DEFAULT '{}',
            check_every VARCHAR(64),
            pinned_version JSONB,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            position INTEGER NOT NULL DEFAULT 0,
            resource_config_scope_id UUID REFERENCES resource_config_scopes(id) ON DELETE SET NULL,
            UNIQUE (pipeline_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create resources table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            type VARCHAR(255) NOT NULL,
            source JSONB NOT NULL DEFAULT '{}',
            tags TEXT[] NOT NULL DEFAULT '{}',
            check_every VARCHAR(64),
            pinned_version JSONB,
            webhook_token TEXT,
            icon VARCHAR(255),
            active BOOLEAN NOT NULL DEFAULT TRUE,
            position INTEGER NOT NULL DEFAULT 0,
            resource_config_scope_id UUID REFERENCES resource_config_scopes(id) ON DELETE SET NULL,
            UNIQUE (pipeline_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create builds table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS builds (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            team_id UUID NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            resource_id UUID REFERENCES resources(id) ON DELETE CASCADE,
            resource_type_id UUID REFERENCES resource_types(id) ON DELETE CASCADE,
            status VARCHAR(50) NOT NULL,
            manually_triggered BOOLEAN NOT NULL DEFAULT FALSE,
            plan JSONB NOT NULL,
            span_context JSONB NOT NULL DEFAULT '{}',
            create_time TIMESTAMPTZ NOT NULL,
            start_time TIMESTAMPTZ,
            end_time TIMESTAMPTZ,
            CHECK (resource_id IS NOT NULL OR resource_type_id IS NOT NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create build events table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_events (
            id BIGSERIAL PRIMARY KEY,
            build_id UUID NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
            event_type VARCHAR(50) NOT NULL,
            payload JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_resources_active ON resources(active)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_resource_types_active ON resource_types(active)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_builds_resource_id ON builds(resource_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_builds_resource_type_id ON builds(resource_type_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_build_events_build_id ON build_events(build_id, id)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
