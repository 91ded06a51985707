//! Helpers that stand in for the per-host reporting agent.
//!
//! The autoscaler never writes `processes` or `states`; tests use these to
//! seed the rows an agent would have written.

use crate::error::{StateError, StateResult};
use crate::store::InventoryStore;
use crate::types::HostId;

impl InventoryStore {
    /// Insert a `processes` row as the agent would.
    pub async fn report_process(
        &self,
        host_id: HostId,
        process_id: i64,
        cmd: &str,
    ) -> StateResult<()> {
        let sql = format!(
            "INSERT INTO processes (host_id, process_id, cmd) VALUES ({})",
            self.dialect().placeholders(3)
        );
        sqlx::query(&sql)
            .bind(host_id.0)
            .bind(process_id)
            .bind(cmd)
            .execute(self.raw_pool())
            .await
            .map_err(|e| StateError::Write(e.to_string()))?;
        Ok(())
    }

    /// Insert a `states` row as the agent would.
    pub async fn report_state(
        &self,
        host_id: HostId,
        process_id: i64,
        state: &str,
    ) -> StateResult<()> {
        let sql = format!(
            "INSERT INTO states (host_id, process_id, state) VALUES ({})",
            self.dialect().placeholders(3)
        );
        sqlx::query(&sql)
            .bind(host_id.0)
            .bind(process_id)
            .bind(state)
            .execute(self.raw_pool())
            .await
            .map_err(|e| StateError::Write(e.to_string()))?;
        Ok(())
    }

    /// Drop every process reported for `host_id`, as when its transcodes end.
    pub async fn clear_processes(&self, host_id: HostId) -> StateResult<()> {
        let sql = format!(
            "DELETE FROM processes WHERE host_id = {}",
            self.dialect().placeholder(1)
        );
        sqlx::query(&sql)
            .bind(host_id.0)
            .execute(self.raw_pool())
            .await
            .map_err(|e| StateError::Write(e.to_string()))?;
        Ok(())
    }
}
