//! SQL dialect strategies.
//!
//! sqlite and postgres differ in placeholder syntax and in the spelling of
//! the upsert conflict clause. A dialect is picked once when the store is
//! opened and every statement is rendered into [`Queries`] up front, so no
//! call site ever branches on the backend.

use std::fmt;
use std::sync::Arc;

use rffmpeg_core::DatabaseKind;

use crate::migrate::{Migration, SchemaBundle};

static SQLITE_SCHEMA: SchemaBundle = SchemaBundle {
    dialect: "sqlite",
    migrations: &[Migration {
        version: 1,
        name: "inventory",
        sql: include_str!("../migrations/sqlite/0001_inventory.sql"),
    }],
};

static POSTGRES_SCHEMA: SchemaBundle = SchemaBundle {
    dialect: "postgres",
    migrations: &[Migration {
        version: 1,
        name: "inventory",
        sql: include_str!("../migrations/postgres/0001_inventory.sql"),
    }],
};

/// Backend-specific SQL rendering.
pub trait SqlDialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Bind marker for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// `ON CONFLICT` clause overwriting `columns` when `key` collides.
    fn upsert_clause(&self, key: &str, columns: &[&str]) -> String;

    /// Query returning the server version as a single text column.
    fn version_query(&self) -> &'static str;

    /// Schema applied by the migrator when the store opens.
    fn schema(&self) -> &'static SchemaBundle;

    /// Pool size. sqlite serializes writers, so it gets a single connection.
    fn max_connections(&self) -> u32;

    /// Comma-separated bind markers `1..=count`.
    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn upsert_clause(&self, key: &str, columns: &[&str]) -> String {
        let sets = columns
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ON CONFLICT ({key}) DO UPDATE SET {sets}")
    }

    fn version_query(&self) -> &'static str {
        "SELECT sqlite_version()"
    }

    fn schema(&self) -> &'static SchemaBundle {
        &SQLITE_SCHEMA
    }

    fn max_connections(&self) -> u32 {
        1
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn upsert_clause(&self, key: &str, columns: &[&str]) -> String {
        let sets = columns
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ON CONFLICT ({key}) DO UPDATE SET {sets}")
    }

    fn version_query(&self) -> &'static str {
        "SELECT version()"
    }

    fn schema(&self) -> &'static SchemaBundle {
        &POSTGRES_SCHEMA
    }

    fn max_connections(&self) -> u32 {
        10
    }
}

/// Dialect for a configured database kind.
pub fn dialect_for(kind: DatabaseKind) -> Arc<dyn SqlDialect> {
    match kind {
        DatabaseKind::Sqlite => Arc::new(SqliteDialect),
        DatabaseKind::Postgres => Arc::new(PostgresDialect),
    }
}

/// Every statement the store issues, rendered for one dialect.
#[derive(Debug, Clone)]
pub(crate) struct Queries {
    pub upsert_host: String,
    pub delete_host: String,
    pub count_hosts: String,
    pub list_hosts: String,
    pub list_processes: String,
    pub list_processes_for_host: String,
    pub count_processes_for_host: String,
    pub list_states_for_host: String,
    pub version: String,
}

impl Queries {
    pub fn render(dialect: &dyn SqlDialect) -> Self {
        let p1 = dialect.placeholder(1);
        Self {
            upsert_host: format!(
                "INSERT INTO hosts (servername, hostname, weight, created) VALUES ({}) {}",
                dialect.placeholders(4),
                dialect.upsert_clause("servername", &["hostname", "weight", "created"]),
            ),
            delete_host: format!("DELETE FROM hosts WHERE servername = {p1}"),
            count_hosts: "SELECT COUNT(*) AS count FROM hosts".to_string(),
            list_hosts: "SELECT id, servername, hostname, weight, created FROM hosts \
                         ORDER BY created ASC, id ASC"
                .to_string(),
            list_processes: "SELECT id, host_id, process_id, cmd FROM processes ORDER BY id ASC"
                .to_string(),
            list_processes_for_host: format!(
                "SELECT id, host_id, process_id, cmd FROM processes WHERE host_id = {p1} \
                 ORDER BY id ASC"
            ),
            count_processes_for_host: format!(
                "SELECT COUNT(*) AS count FROM processes WHERE host_id = {p1}"
            ),
            list_states_for_host: format!(
                "SELECT id, host_id, process_id, state FROM states WHERE host_id = {p1} \
                 ORDER BY id ASC"
            ),
            version: dialect.version_query().to_string(),
        }
    }
}
