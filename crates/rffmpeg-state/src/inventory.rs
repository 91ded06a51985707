//! Inventory: the command/query surface the autoscaler works against.
//!
//! A thin layer over [`InventoryStore`] phrased in terms of workers and
//! load rather than rows. Every read goes to the database; nothing is
//! cached between calls.

use crate::error::StateResult;
use crate::store::InventoryStore;
use crate::types::*;

#[derive(Clone)]
pub struct Inventory {
    store: InventoryStore,
}

impl Inventory {
    pub fn new(store: InventoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &InventoryStore {
        &self.store
    }

    pub async fn add_hosts(&self, hosts: &[Host]) -> StateResult<()> {
        self.store.upsert_hosts(hosts).await
    }

    /// Remove a worker's row. A row that is already gone is not an error.
    pub async fn remove_host(&self, host: &Host) -> StateResult<()> {
        self.store.delete_host(&host.servername).await.map(|_| ())
    }

    pub async fn number_of_hosts(&self) -> StateResult<u64> {
        self.store.count_hosts().await
    }

    /// Registered workers, oldest first.
    pub async fn hosts(&self) -> StateResult<Vec<Host>> {
        self.store.list_hosts().await
    }

    pub async fn all_processes(&self) -> StateResult<Vec<Process>> {
        self.store.list_processes(None).await
    }

    pub async fn processes_on(&self, host_id: HostId) -> StateResult<Vec<Process>> {
        self.store.list_processes(Some(host_id)).await
    }

    pub async fn number_of_processes_on(&self, host_id: HostId) -> StateResult<u64> {
        self.store.count_processes(host_id).await
    }

    pub async fn states_on(&self, host_id: HostId) -> StateResult<Vec<State>> {
        self.store.list_states(host_id).await
    }

    /// Transcodes currently running on `host_id`.
    ///
    /// Skips the full listing when the host reports no processes at all.
    pub async fn transcodes_on(&self, host_id: HostId) -> StateResult<usize> {
        if self.number_of_processes_on(host_id).await? == 0 {
            return Ok(0);
        }
        let processes = self.processes_on(host_id).await?;
        Ok(count_transcodes(&processes))
    }
}
