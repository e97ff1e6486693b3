//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS flows (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            nodes TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_flows_owner ON flows(owner_id);
        CREATE INDEX IF NOT EXISTS idx_flows_owner_active ON flows(owner_id, active);

        CREATE TABLE IF NOT EXISTS chat_states (
            owner_id TEXT NOT NULL,
            address TEXT NOT NULL,
            current_state TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (owner_id, address)
        );

        CREATE TABLE IF NOT EXISTS chat_logs (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            address TEXT NOT NULL,
            direction TEXT NOT NULL,
            content TEXT NOT NULL,
            state_label TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chat_logs_owner ON chat_logs(owner_id);

        CREATE TABLE IF NOT EXISTS quota_accounts (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            message_quota INTEGER NOT NULL,
            message_used INTEGER NOT NULL DEFAULT 0,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_quota_accounts_owner ON quota_accounts(owner_id, is_active);

        CREATE TABLE IF NOT EXISTS channel_accounts (
            owner_id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL UNIQUE,
            business_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS templates (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            language TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            remote_id TEXT,
            rejection_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_templates_owner ON templates(owner_id);
        CREATE INDEX IF NOT EXISTS idx_templates_status ON templates(status);

        CREATE TABLE IF NOT EXISTS blasts (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            template_id TEXT NOT NULL REFERENCES templates(id),
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'DRAFT',
            recipients TEXT NOT NULL,
            parameters TEXT NOT NULL DEFAULT '{}',
            recipient_parameters TEXT NOT NULL DEFAULT '{}',
            scheduled_at TEXT,
            total_recipients INTEGER NOT NULL DEFAULT 0,
            sent_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_blasts_owner ON blasts(owner_id);
        CREATE INDEX IF NOT EXISTS idx_blasts_status ON blasts(status);
        CREATE INDEX IF NOT EXISTS idx_blasts_scheduled ON blasts(status, scheduled_at);
    "#,
}];

/// Run all pending migrations against the connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("creating _migrations table: {e}")))?;

    let current = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| DatabaseError::Migration(format!("{}: {e}", migration.name)))?;
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("recording {}: {e}", migration.name)))?;
        tracing::info!(version = migration.version, name = migration.name, "Migration applied");
    }
    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(e.to_string())),
        None => Ok(0),
    }
}
