//! rffmpeg-state: durable worker inventory for the rffmpeg autoscaler.
//!
//! Backed by [sqlx](https://docs.rs/sqlx) through its `Any` driver, so the
//! same store serves sqlite and postgres deployments.
//!
//! # Architecture
//!
//! ```text
//! Inventory (facade used by the policy and lifecycle manager)
//!   └── InventoryStore
//!         ├── Queries      prebuilt once from the SqlDialect
//!         ├── SqlDialect   placeholders, upsert clause, version query, schema
//!         └── Migrator     applies the dialect's SchemaBundle at open
//! ```
//!
//! `hosts` is the only table this crate writes. `processes` and `states`
//! are filled by an agent running on every transcoding host and are read
//! as a fresh snapshot on every call.
//!
//! The `InventoryStore` is `Clone` + `Send` + `Sync` (the pool is shared)
//! and can be handed to concurrent teardown tasks.

pub mod dialect;
pub mod error;
pub mod inventory;
pub mod migrate;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use dialect::{PostgresDialect, SqlDialect, SqliteDialect, dialect_for};
pub use error::{StateError, StateResult};
pub use inventory::Inventory;
pub use migrate::{Migration, Migrator, SchemaBundle, SqlMigrator};
pub use store::{InventoryStore, MIGRATION_NAMESPACE};
pub use types::*;
