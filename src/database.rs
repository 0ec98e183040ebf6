use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::DatabaseConfig;

pub type DbPool = SqlitePool;

pub async fn init_database(config: &DatabaseConfig) -> anyhow::Result<DbPool> {
    if let Some(path) = file_path(&config.url) {
        // Check if file is writable
        if Path::new(path).exists() {
            if let Err(e) = fs::OpenOptions::new().write(true).open(path) {
                return Err(anyhow::anyhow!(
                    "Database file {} exists but is not writable: {}",
                    path,
                    e
                ));
            }
        }
    }

    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("invalid database url {}", config.url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    create_schema(&pool, config.single_open_maintenance).await?;
    tracing::info!(url = %config.url, "database ready");
    Ok(pool)
}

/// Private in-memory database. One connection that never expires, otherwise
/// the data would vanish with it.
pub async fn init_in_memory(single_open_maintenance: bool) -> anyhow::Result<DbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool, single_open_maintenance).await?;
    Ok(pool)
}

fn file_path(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    (!path.is_empty() && !path.starts_with(":memory:")).then_some(path)
}

pub async fn create_schema(pool: &DbPool, single_open_maintenance: bool) -> sqlx::Result<()> {
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS machines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tag TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            usage_hours INTEGER NOT NULL DEFAULT 1 CHECK (usage_hours >= 0),
            status TEXT NOT NULL DEFAULT 'OK' CHECK (status IN (
                'OK', 'IN_OPERATION', 'IN_MAINTENANCE', 'INOPERATIVE', 'AWAITING_PARTS', 'HOURS_EXCEEDED'
            )),
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        )
    "#).execute(pool).await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS schedules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            machine_id INTEGER NOT NULL UNIQUE,
            scheduled_date TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY (machine_id) REFERENCES machines (id) ON DELETE CASCADE
        )
    "#).execute(pool).await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS maintenance_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            machine_id INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            service_type TEXT NOT NULL,
            description TEXT,
            technician TEXT,
            total_cost REAL CHECK (total_cost IS NULL OR total_cost >= 0),
            FOREIGN KEY (machine_id) REFERENCES machines (id) ON DELETE CASCADE
        )
    "#).execute(pool).await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS maintenance_steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            maintenance_id INTEGER NOT NULL,
            description TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            FOREIGN KEY (maintenance_id) REFERENCES maintenance_events (id) ON DELETE CASCADE
        )
    "#).execute(pool).await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            machine_id INTEGER NOT NULL,
            description TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            FOREIGN KEY (machine_id) REFERENCES machines (id) ON DELETE CASCADE
        )
    "#).execute(pool).await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_maintenance_machine ON maintenance_events(machine_id)").execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_steps_maintenance ON maintenance_steps(maintenance_id)").execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_machine ON history(machine_id)").execute(pool).await?;

    // At most one event with a null end date per machine
    if single_open_maintenance {
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_one_open_maintenance \
             ON maintenance_events(machine_id) WHERE end_date IS NULL",
        )
        .execute(pool)
        .await?;
    } else {
        sqlx::query("DROP INDEX IF EXISTS idx_one_open_maintenance").execute(pool).await?;
    }

    Ok(())
}

pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_path_from_url() {
        assert_eq!(file_path("sqlite:maint_control.db"), Some("maint_control.db"));
        assert_eq!(file_path("sqlite://data/plant.db?mode=rwc"), Some("data/plant.db"));
        assert_eq!(file_path("sqlite::memory:"), None);
        assert_eq!(file_path("postgres://db"), None);
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let pool = init_in_memory(true).await.unwrap();
        create_schema(&pool, true).await.unwrap();
        create_schema(&pool, false).await.unwrap();

        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('machines', 'schedules', 'maintenance_events', 'maintenance_steps', 'history')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 5);

        let (open_index,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'idx_one_open_maintenance'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(open_index, 0);
    }
}
