//! Database migrations and initialization.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info, warn};

/// Initialize the SQLite database with the settlement schema and pragmas.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "Could not create database directory");
            }
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_connection(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!(path = %db_path, "Database initialized");
    Ok(pool)
}

/// Statements of the embedded schema, in order. Every one is `IF NOT EXISTS`.
fn schema_statements() -> impl Iterator<Item = &'static str> {
    include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut applied = 0usize;
    for statement in schema_statements() {
        sqlx::query(statement).execute(pool).await?;
        applied += 1;
    }
    info!(statements = applied, "Settlement schema applied");
    Ok(())
}

/// Per-connection settings. Writers wait up to `busy_timeout` for the write lock, which is
/// what lets racing posting claims and link confirms resolve into clean conflicts.
const CONNECTION_PRAGMAS: [&str; 3] = [
    "PRAGMA foreign_keys = ON",
    "PRAGMA busy_timeout = 5000",
    "PRAGMA synchronous = NORMAL",
];

async fn configure_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for pragma in CONNECTION_PRAGMAS {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }

    let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    debug!(journal_mode = %journal_mode, "SQLite journal mode");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_db_creates_database_in_nested_dir() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("data")
            .join("recon.db")
            .to_string_lossy()
            .to_string();

        let pool = init_db(&db_path).await.expect("init_db failed");
        assert!(Path::new(&db_path).exists());

        let result: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_schema_creates_settlement_tables() {
        let (pool, _temp) = fresh_pool().await;

        for table in [
            "settlement_events",
            "settlement_batches",
            "settlement_rows",
            "bank_transactions",
            "recon_links",
            "journals",
            "journal_lines",
        ] {
            let result: (String,) =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                    .bind(table)
                    .fetch_one(&pool)
                    .await
                    .expect("query failed");
            assert_eq!(result.0, table);
        }
    }

    async fn fresh_pool() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        (init_db(&db_path).await.expect("init_db failed"), temp_dir)
    }

    #[tokio::test]
    async fn test_reapplying_schema_keeps_link_guards() {
        let (pool, _temp) = fresh_pool().await;
        run_migrations(&pool).await.expect("second migration run failed");

        let guards: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'uq_recon_links_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            guards,
            vec![
                "uq_recon_links_bank_matched",
                "uq_recon_links_candidate",
                "uq_recon_links_entity_matched",
            ]
        );
    }

    #[tokio::test]
    async fn test_one_matched_link_per_bank_transaction() {
        let (pool, _temp) = fresh_pool().await;
        sqlx::query(
            "INSERT INTO bank_transactions (id, txn_date, credit, created_at) VALUES (1, '2024-06-10', '450', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let link = |entity_id: i64, status: &'static str| {
            sqlx::query(
                r#"
                INSERT INTO recon_links (bank_txn_id, entity_type, entity_id, status, created_at, updated_at)
                VALUES (1, 'marketplace_batch', ?, ?, 0, 0)
                "#,
            )
            .bind(entity_id)
            .bind(status)
        };

        link(7, "matched").execute(&pool).await.unwrap();
        let err = link(8, "matched").execute(&pool).await.unwrap_err();
        assert!(matches!(err, sqlx::Error::Database(ref db) if db.is_unique_violation()));

        // candidates and voided links sit beside a matched one
        link(8, "candidate").execute(&pool).await.unwrap();
        sqlx::query("UPDATE recon_links SET status = 'void' WHERE entity_id = 7")
            .execute(&pool)
            .await
            .unwrap();
        link(9, "matched").execute(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_pragmas() {
        let (pool, _temp) = fresh_pool().await;

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);

        let busy_timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(busy_timeout, 5000);

        // WAL can fall back to the rollback journal on some filesystems.
        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(matches!(journal_mode.as_str(), "wal" | "delete"), "{journal_mode}");
    }

    #[test]
    fn test_schema_statements_skip_blank_tail() {
        let statements: Vec<&str> = schema_statements().collect();
        assert!(statements.iter().all(|s| s.starts_with("CREATE")));
        assert!(statements.iter().any(|s| s.contains("uq_recon_links_bank_matched")));
    }
}
