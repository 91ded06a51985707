//! InventoryStore: sqlx-backed persistence for worker inventory.
//!
//! Provides the host commands (`upsert_hosts`, `delete_host`) and the
//! read paths over hosts, processes and states. Statements are rendered
//! once from the [`SqlDialect`] chosen at open; the store supports both
//! on-disk backends and an in-memory sqlite database (for testing).

use std::sync::Arc;

use rffmpeg_core::DatabaseKind;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::debug;

use crate::dialect::{Queries, SqlDialect, SqliteDialect, dialect_for};
use crate::error::{StateError, StateResult};
use crate::migrate::{Migrator, SqlMigrator};
use crate::types::*;

/// Namespace under which the inventory schema is migrated.
pub const MIGRATION_NAMESPACE: &str = "processor";

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe inventory store backed by a sqlx `Any` pool.
#[derive(Clone)]
pub struct InventoryStore {
    pool: AnyPool,
    dialect: Arc<dyn SqlDialect>,
    queries: Arc<Queries>,
}

impl InventoryStore {
    /// Connect to `url`, migrate with the built-in [`SqlMigrator`], and open.
    pub async fn connect(url: &str, kind: DatabaseKind) -> StateResult<Self> {
        let dialect = dialect_for(kind);
        let pool = Self::pool(url, dialect.as_ref()).await?;
        let migrator = SqlMigrator::new(pool.clone(), dialect.clone());
        let store = Self::open(pool, dialect, &migrator).await?;
        debug!(backend = kind.as_str(), "inventory store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory sqlite store (for testing).
    pub async fn open_in_memory() -> StateResult<Self> {
        let dialect: Arc<dyn SqlDialect> = Arc::new(SqliteDialect);
        let pool = Self::pool("sqlite::memory:", dialect.as_ref()).await?;
        let migrator = SqlMigrator::new(pool.clone(), dialect.clone());
        let store = Self::open(pool, dialect, &migrator).await?;
        debug!("in-memory inventory store opened");
        Ok(store)
    }

    /// Open over an existing pool, running `migrator` on the dialect's schema.
    ///
    /// Fails if the migration fails; the store is never handed out on an
    /// unmigrated database.
    pub async fn open(
        pool: AnyPool,
        dialect: Arc<dyn SqlDialect>,
        migrator: &dyn Migrator,
    ) -> StateResult<Self> {
        migrator
            .migrate(dialect.schema(), MIGRATION_NAMESPACE)
            .await?;
        let queries = Arc::new(Queries::render(dialect.as_ref()));
        Ok(Self {
            pool,
            dialect,
            queries,
        })
    }

    async fn pool(url: &str, dialect: &dyn SqlDialect) -> StateResult<AnyPool> {
        sqlx::any::install_default_drivers();
        // Connections are never recycled: an in-memory sqlite database lives
        // exactly as long as its single connection.
        AnyPoolOptions::new()
            .max_connections(dialect.max_connections())
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await
            .map_err(map_err!(Connect))
    }

    /// Name of the backing dialect ("sqlite" or "postgres").
    pub fn backend(&self) -> &'static str {
        self.dialect.name()
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn raw_pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Version string reported by the database server.
    pub async fn server_version(&self) -> StateResult<String> {
        let row = sqlx::query(&self.queries.version)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err!(Query))?;
        row.try_get::<String, _>(0).map_err(map_err!(Decode))
    }

    /// Close the pool. Subsequent calls fail with a connection error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a batch of hosts keyed by `servername`.
    ///
    /// Runs in one transaction: a failing row rolls back the whole batch.
    pub async fn upsert_hosts(&self, hosts: &[Host]) -> StateResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_err!(Transaction))?;
        for host in hosts {
            sqlx::query(&self.queries.upsert_host)
                .bind(host.servername.as_str())
                .bind(host.hostname.as_str())
                .bind(i64::from(host.weight))
                .bind(host.created as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| StateError::Write(format!("upsert {}: {e}", host.servername)))?;
        }
        // Dropping `tx` on the error paths above rolls it back.
        tx.commit().await.map_err(map_err!(Transaction))?;
        debug!(count = hosts.len(), "hosts upserted");
        Ok(())
    }

    /// Delete a host by servername. Returns true if a row existed.
    pub async fn delete_host(&self, servername: &str) -> StateResult<bool> {
        let result = sqlx::query(&self.queries.delete_host)
            .bind(servername)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Write(format!("delete {servername}: {e}")))?;
        let existed = result.rows_affected() > 0;
        debug!(%servername, existed, "host deleted");
        Ok(existed)
    }

    pub async fn count_hosts(&self) -> StateResult<u64> {
        self.count(&self.queries.count_hosts, None).await
    }

    /// All hosts, oldest first.
    pub async fn list_hosts(&self) -> StateResult<Vec<Host>> {
        let rows = sqlx::query(&self.queries.list_hosts)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err!(Query))?;
        rows.iter().map(row_to_host).collect()
    }

    // ── Processes / States ─────────────────────────────────────────

    /// Reported processes, across all hosts or scoped to one (the fallback
    /// included).
    pub async fn list_processes(&self, host_id: Option<HostId>) -> StateResult<Vec<Process>> {
        let rows = match host_id {
            Some(id) => {
                sqlx::query(&self.queries.list_processes_for_host)
                    .bind(id.0)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query(&self.queries.list_processes)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_err!(Query))?;
        rows.iter().map(row_to_process).collect()
    }

    pub async fn count_processes(&self, host_id: HostId) -> StateResult<u64> {
        self.count(&self.queries.count_processes_for_host, Some(host_id.0))
            .await
    }

    pub async fn list_states(&self, host_id: HostId) -> StateResult<Vec<State>> {
        let rows = sqlx::query(&self.queries.list_states_for_host)
            .bind(host_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err!(Query))?;
        rows.iter().map(row_to_state).collect()
    }

    async fn count(&self, sql: &str, arg: Option<i64>) -> StateResult<u64> {
        let mut query = sqlx::query::<sqlx::Any>(sql);
        if let Some(arg) = arg {
            query = query.bind(arg);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err!(Query))?;
        let Some(row) = row else {
            return Ok(0);
        };
        let count: i64 = row.try_get("count").map_err(map_err!(Decode))?;
        u64::try_from(count).map_err(map_err!(Decode))
    }
}

fn row_to_host(row: &AnyRow) -> StateResult<Host> {
    let weight: i64 = row.try_get("weight").map_err(map_err!(Decode))?;
    let created: i64 = row.try_get("created").map_err(map_err!(Decode))?;
    Ok(Host {
        id: Some(HostId(row.try_get("id").map_err(map_err!(Decode))?)),
        servername: row.try_get("servername").map_err(map_err!(Decode))?,
        hostname: row.try_get("hostname").map_err(map_err!(Decode))?,
        weight: u32::try_from(weight).map_err(map_err!(Decode))?,
        created: u64::try_from(created).map_err(map_err!(Decode))?,
    })
}

fn row_to_process(row: &AnyRow) -> StateResult<Process> {
    Ok(Process {
        id: row.try_get("id").map_err(map_err!(Decode))?,
        host_id: HostId(row.try_get("host_id").map_err(map_err!(Decode))?),
        process_id: row.try_get("process_id").map_err(map_err!(Decode))?,
        cmd: row.try_get("cmd").map_err(map_err!(Decode))?,
    })
}

fn row_to_state(row: &AnyRow) -> StateResult<State> {
    Ok(State {
        id: row.try_get("id").map_err(map_err!(Decode))?,
        host_id: HostId(row.try_get("host_id").map_err(map_err!(Decode))?),
        process_id: row.try_get("process_id").map_err(map_err!(Decode))?,
        state: row.try_get("state").map_err(map_err!(Decode))?,
    })
}
