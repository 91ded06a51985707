//! Schema migrations.
//!
//! The store hands its dialect's [`SchemaBundle`] to a [`Migrator`] once, at
//! open. [`SqlMigrator`] keeps a `schema_migrations` ledger keyed by
//! `(namespace, version)` so several components can share one database
//! without stepping on each other's versions.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{AnyPool, Executor, Row};
use tracing::{debug, info};

use crate::dialect::SqlDialect;
use crate::error::{StateError, StateResult};
use crate::types::epoch_millis;

/// One forward-only schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Ordered migrations for a single dialect.
#[derive(Debug)]
pub struct SchemaBundle {
    pub dialect: &'static str,
    pub migrations: &'static [Migration],
}

#[async_trait]
pub trait Migrator: Send + Sync {
    /// Apply every migration in `bundle` not yet recorded for `namespace`.
    async fn migrate(&self, bundle: &SchemaBundle, namespace: &str) -> StateResult<()>;
}

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    namespace TEXT NOT NULL,
    version BIGINT NOT NULL,
    name TEXT NOT NULL,
    applied BIGINT NOT NULL,
    PRIMARY KEY (namespace, version)
)";

/// Migrator that runs bundles against the store's own pool.
pub struct SqlMigrator {
    pool: AnyPool,
    select_applied: String,
    record_applied: String,
}

impl SqlMigrator {
    pub fn new(pool: AnyPool, dialect: Arc<dyn SqlDialect>) -> Self {
        Self {
            pool,
            select_applied: format!(
                "SELECT version FROM schema_migrations WHERE namespace = {}",
                dialect.placeholder(1)
            ),
            record_applied: format!(
                "INSERT INTO schema_migrations (namespace, version, name, applied) VALUES ({})",
                dialect.placeholders(4)
            ),
        }
    }

    async fn applied_versions(&self, namespace: &str) -> StateResult<HashSet<i64>> {
        let rows = sqlx::query(&self.select_applied)
            .bind(namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StateError::Migrate(e.to_string()))?;
        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("version")
                    .map_err(|e| StateError::Migrate(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl Migrator for SqlMigrator {
    async fn migrate(&self, bundle: &SchemaBundle, namespace: &str) -> StateResult<()> {
        let fail = |e: sqlx::Error| StateError::Migrate(e.to_string());

        sqlx::query(CREATE_LEDGER)
            .execute(&self.pool)
            .await
            .map_err(fail)?;

        let applied = self.applied_versions(namespace).await?;
        let mut pending: Vec<&Migration> = bundle
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect();
        pending.sort_by_key(|m| m.version);

        if pending.is_empty() {
            debug!(%namespace, dialect = bundle.dialect, "schema up to date");
            return Ok(());
        }

        for migration in pending {
            let mut tx = self.pool.begin().await.map_err(fail)?;
            // Passed as a plain string the statement is sent unprepared, so a
            // multi-statement file runs in one call.
            Executor::execute(&mut *tx, migration.sql)
                .await
                .map_err(|e| {
                    StateError::Migrate(format!(
                        "{namespace}/{:04}_{}: {e}",
                        migration.version, migration.name
                    ))
                })?;
            sqlx::query(&self.record_applied)
                .bind(namespace)
                .bind(migration.version)
                .bind(migration.name)
                .bind(epoch_millis() as i64)
                .execute(&mut *tx)
                .await
                .map_err(fail)?;
            tx.commit().await.map_err(fail)?;
            info!(
                %namespace,
                dialect = bundle.dialect,
                version = migration.version,
                name = migration.name,
                "migration applied"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::any::AnyPoolOptions;

    use super::*;
    use crate::dialect::SqliteDialect;

    static TWO_STEP: SchemaBundle = SchemaBundle {
        dialect: "sqlite",
        migrations: &[
            Migration {
                version: 2,
                name: "widen",
                sql: "ALTER TABLE a ADD COLUMN note TEXT;",
            },
            Migration {
                version: 1,
                name: "base",
                sql: "CREATE TABLE a (id INTEGER PRIMARY KEY);\n\
                      CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER NOT NULL);",
            },
        ],
    };

    async fn memory_pool() -> AnyPool {
        sqlx::any::install_default_drivers();
        AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn ledger(pool: &AnyPool, namespace: &str) -> Vec<i64> {
        let rows = sqlx::query(
            "SELECT version FROM schema_migrations WHERE namespace = ? ORDER BY version",
        )
        .bind(namespace)
        .fetch_all(pool)
        .await
        .unwrap();
        rows.iter().map(|r| r.get::<i64, _>("version")).collect()
    }

    #[tokio::test]
    async fn multi_statement_migrations_apply_in_version_order() {
        let pool = memory_pool().await;
        let migrator = SqlMigrator::new(pool.clone(), Arc::new(SqliteDialect));

        migrator.migrate(&TWO_STEP, "processor").await.unwrap();

        assert_eq!(ledger(&pool, "processor").await, vec![1, 2]);
        sqlx::query("INSERT INTO b (a_id) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO a (note) VALUES ('x')")
            .execute(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rerun_is_a_no_op_and_namespaces_are_separate() {
        let pool = memory_pool().await;
        let migrator = SqlMigrator::new(pool.clone(), Arc::new(SqliteDialect));

        migrator.migrate(&TWO_STEP, "processor").await.unwrap();
        migrator.migrate(&TWO_STEP, "processor").await.unwrap();
        assert_eq!(ledger(&pool, "processor").await, vec![1, 2]);
        assert!(ledger(&pool, "agent").await.is_empty());
    }

    #[tokio::test]
    async fn failing_statement_rolls_back_its_step() {
        static BROKEN: SchemaBundle = SchemaBundle {
            dialect: "sqlite",
            migrations: &[Migration {
                version: 1,
                name: "broken",
                sql: "CREATE TABLE c (id INTEGER PRIMARY KEY);\nCREATE TABLE c (id INTEGER);",
            }],
        };
        let pool = memory_pool().await;
        let migrator = SqlMigrator::new(pool.clone(), Arc::new(SqliteDialect));

        let err = migrator.migrate(&BROKEN, "processor").await.unwrap_err();
        assert!(err.to_string().contains("processor/0001_broken"));
        assert!(ledger(&pool, "processor").await.is_empty());
    }
}
