//! Worker provisioning and teardown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rffmpeg_core::AutoscalerConfig;
use rffmpeg_state::{Host, Inventory};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CloudError, CloudResult};
use crate::provider::{
    CloudProvider, CreateServerRequest, ResolvedResources, ResourceHandle, ResourceKind,
    ResourceNames, Server,
};

pub const WORKER_NAME_PREFIX: &str = "rffmpeg-worker-";

/// Creates and destroys transcoding workers.
///
/// The autoscaler talks to this trait rather than to [`LifecycleManager`]
/// directly so the scaling logic can be exercised without a cloud.
#[async_trait]
pub trait WorkerLifecycle: Send + Sync {
    /// Provision a worker, wait for it to run, and register it.
    async fn create_worker(&self) -> CloudResult<Host>;

    /// Destroy the worker's server, then drop its inventory row.
    async fn delete_worker(&self, host: &Host) -> CloudResult<()>;
}

/// Everything a worker is created with.
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub resources: ResourceNames,
    /// Rendered cloud-init document.
    pub user_data: String,
    pub weight: u32,
    pub poll_interval: Duration,
    pub provision_timeout: Duration,
}

impl ProvisionSettings {
    pub fn from_config(config: &AutoscalerConfig) -> Self {
        Self {
            resources: ResourceNames::from_config(&config.cloud),
            user_data: config.cloud_init(),
            weight: config.fallback.weight,
            poll_interval: config.cloud.poll_interval,
            provision_timeout: config.cloud.provision_timeout,
        }
    }
}

/// A fresh worker name that collides with none of `live`.
pub fn generate_name(live: &[Server]) -> String {
    generate_name_with(live, || Uuid::new_v4().to_string())
}

/// [`generate_name`] with an injectable id source.
pub fn generate_name_with(live: &[Server], mut next_id: impl FnMut() -> String) -> String {
    let taken: HashSet<&str> = live.iter().map(|s| s.name.as_str()).collect();
    loop {
        let name = format!("{WORKER_NAME_PREFIX}{}", next_id());
        if !taken.contains(name.as_str()) {
            return name;
        }
        debug!(%name, "worker name already taken, drawing again");
    }
}

pub struct LifecycleManager {
    cloud: Arc<dyn CloudProvider>,
    inventory: Inventory,
    settings: ProvisionSettings,
}

impl LifecycleManager {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        inventory: Inventory,
        settings: ProvisionSettings,
    ) -> Self {
        Self {
            cloud,
            inventory,
            settings,
        }
    }

    pub fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    /// Resolve every named resource, failing on the first one missing.
    ///
    /// The image is picked for the server type's architecture; the server
    /// type resolves first.
    pub async fn resolve_resources(&self) -> CloudResult<ResolvedResources> {
        let names = &self.settings.resources;
        let mut handles: Vec<ResourceHandle> = Vec::with_capacity(ResourceKind::ALL.len());
        let mut architecture = None;
        for kind in ResourceKind::ALL {
            let name = names.get(kind);
            let wanted = match kind {
                ResourceKind::Image => architecture.as_deref(),
                _ => None,
            };
            let handle = match self.cloud.resource_by_name(kind, name, wanted).await {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    return Err(CloudError::Resolution {
                        kind,
                        name: name.to_string(),
                        reason: "not found".to_string(),
                    });
                }
                Err(e) => {
                    return Err(CloudError::Resolution {
                        kind,
                        name: name.to_string(),
                        reason: e.to_string(),
                    });
                }
            };
            if kind == ResourceKind::ServerType {
                architecture = handle.architecture.clone();
            }
            handles.push(handle);
        }

        let mut handles = handles.into_iter();
        let mut next = || {
            handles
                .next()
                .ok_or_else(|| CloudError::Response("resource resolution incomplete".into()))
        };
        Ok(ResolvedResources {
            server_type: next()?,
            image: next()?,
            ssh_key: next()?,
            location: next()?,
            network: next()?,
            firewall: next()?,
            placement_group: next()?,
        })
    }

    /// Poll until the server reports running or `provision_timeout` passes.
    async fn wait_until_running(&self, name: &str) -> CloudResult<Server> {
        let started = Instant::now();
        loop {
            let server = self
                .cloud
                .server_by_name(name)
                .await?
                .ok_or_else(|| CloudError::ServerNotFound(name.to_string()))?;
            if server.is_running() {
                debug!(%name, waited = ?started.elapsed(), "server running");
                return Ok(server);
            }

            let waited = started.elapsed();
            if waited >= self.settings.provision_timeout {
                return Err(CloudError::ProvisioningTimedOut {
                    servername: name.to_string(),
                    waited,
                });
            }
            debug!(%name, status = ?server.status, "waiting for server");
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

#[async_trait]
impl WorkerLifecycle for LifecycleManager {
    async fn create_worker(&self) -> CloudResult<Host> {
        let live = self.cloud.list_servers().await?;
        let name = generate_name(&live);
        let resources = self.resolve_resources().await?;

        let request = CreateServerRequest {
            name: name.clone(),
            resources,
            user_data: self.settings.user_data.clone(),
        };
        let created = self.cloud.create_server(&request).await?;
        info!(servername = %created.name, id = created.id, "worker requested");

        let server = match self.wait_until_running(&created.name).await {
            Ok(server) => server,
            Err(e) => {
                warn!(servername = %created.name, error = %e, "worker did not come up; server left in place");
                return Err(e);
            }
        };
        let address = server
            .private_address()
            .ok_or_else(|| CloudError::NoPrivateAddress(server.name.clone()))?;

        let host = Host::new(server.name.clone(), address, self.settings.weight);
        if let Err(source) = self.inventory.add_hosts(std::slice::from_ref(&host)).await {
            error!(
                servername = %host.servername,
                error = %source,
                "worker running but not registered; reconcile manually"
            );
            return Err(CloudError::Registration {
                servername: host.servername,
                source,
            });
        }

        info!(servername = %host.servername, hostname = %host.hostname, "worker registered");
        Ok(host)
    }

    async fn delete_worker(&self, host: &Host) -> CloudResult<()> {
        let server = self
            .cloud
            .server_by_name(&host.servername)
            .await?
            .ok_or_else(|| CloudError::ServerNotFound(host.servername.clone()))?;
        self.cloud.delete_server(&server).await?;

        if let Err(source) = self.inventory.remove_host(host).await {
            error!(
                servername = %host.servername,
                error = %source,
                "worker deleted but still registered; reconcile manually"
            );
            return Err(CloudError::Deregistration {
                servername: host.servername.clone(),
                source,
            });
        }

        info!(servername = %host.servername, "worker removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rffmpeg_core::AutoscalerConfig;
    use rffmpeg_state::InventoryStore;

    use super::*;
    use crate::mock::MockCloud;
    use crate::provider::ServerStatus;

    fn settings() -> ProvisionSettings {
        let mut config = AutoscalerConfig::default();
        config.fallback.host = "jellyfin.local".to_string();
        config.media.username = "media".to_string();
        config.media.password = "hunter2".to_string();
        let mut settings = ProvisionSettings::from_config(&config);
        settings.poll_interval = Duration::from_millis(10);
        settings.provision_timeout = Duration::from_millis(100);
        settings
    }

    async fn setup(cloud: MockCloud) -> (Arc<MockCloud>, Inventory, LifecycleManager) {
        let cloud = Arc::new(cloud);
        let inventory = Inventory::new(InventoryStore::open_in_memory().await.unwrap());
        let manager = LifecycleManager::new(cloud.clone(), inventory.clone(), settings());
        (cloud, inventory, manager)
    }

    fn running(id: u64, name: &str) -> Server {
        Server {
            id,
            name: name.to_string(),
            status: ServerStatus::Running,
            private_net: vec![],
        }
    }

    #[test]
    fn generated_names_avoid_live_servers() {
        let live = vec![running(1, "rffmpeg-worker-a"), running(2, "rffmpeg-worker-b")];
        let mut ids = vec!["a", "b", "c"].into_iter();
        let name = generate_name_with(&live, || ids.next().unwrap().to_string());
        assert_eq!(name, "rffmpeg-worker-c");
    }

    #[test]
    fn generated_name_has_prefix_and_uuid() {
        let name = generate_name(&[]);
        let id = name.strip_prefix(WORKER_NAME_PREFIX).unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn create_registers_running_worker() {
        let (cloud, inventory, manager) = setup(MockCloud::with_defaults(&settings())).await;

        let host = manager.create_worker().await.unwrap();
        assert!(host.servername.starts_with(WORKER_NAME_PREFIX));
        assert_eq!(host.weight, 1);

        let hosts = inventory.hosts().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].servername, host.servername);
        assert_eq!(hosts[0].hostname, host.hostname);

        let requests = cloud.create_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].user_data.contains("jellyfin.local"));
        assert!(requests[0].user_data.contains("hunter2"));
    }

    #[tokio::test]
    async fn image_matches_server_type_architecture() {
        let (cloud, _, manager) = setup(MockCloud::with_defaults(&settings())).await;

        let resolved = manager.resolve_resources().await.unwrap();
        assert_eq!(resolved.server_type.architecture.as_deref(), Some("x86"));
        assert_eq!(resolved.image.id, 101);

        manager.create_worker().await.unwrap();
        assert_eq!(cloud.create_requests()[0].resources.image.id, 101);
    }

    #[tokio::test]
    async fn create_polls_until_running() {
        let cloud = MockCloud::with_defaults(&settings()).polls_until_running(3);
        let (cloud, inventory, manager) = setup(cloud).await;

        let before = Instant::now();
        let host = manager.create_worker().await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(30));
        assert_eq!(cloud.status_of(&host.servername), Some(ServerStatus::Running));
        assert_eq!(inventory.number_of_hosts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_times_out_without_registering() {
        let cloud = MockCloud::with_defaults(&settings()).never_ready();
        let (cloud, inventory, manager) = setup(cloud).await;

        let err = manager.create_worker().await.unwrap_err();
        match err {
            CloudError::ProvisioningTimedOut { waited, .. } => {
                assert!(waited >= Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(inventory.number_of_hosts().await.unwrap(), 0);
        assert_eq!(cloud.servers().len(), 1);
    }

    #[tokio::test]
    async fn unresolved_resource_is_named() {
        let cloud = MockCloud::with_defaults(&settings()).without_resource(ResourceKind::Firewall);
        let (cloud, inventory, manager) = setup(cloud).await;

        let err = manager.create_worker().await.unwrap_err();
        match err {
            CloudError::Resolution { kind, name, .. } => {
                assert_eq!(kind, ResourceKind::Firewall);
                assert_eq!(name, "rffmpeg-workers");
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
        assert!(cloud.create_requests().is_empty());
        assert_eq!(inventory.number_of_hosts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_rejects_server_without_private_address() {
        let cloud = MockCloud::with_defaults(&settings()).without_private_network();
        let (_, inventory, manager) = setup(cloud).await;

        let err = manager.create_worker().await.unwrap_err();
        assert!(matches!(err, CloudError::NoPrivateAddress(_)));
        assert_eq!(inventory.number_of_hosts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_removes_server_then_row() {
        let (cloud, inventory, manager) = setup(MockCloud::with_defaults(&settings())).await;
        let host = manager.create_worker().await.unwrap();

        manager.delete_worker(&host).await.unwrap();
        assert!(cloud.servers().is_empty());
        assert_eq!(cloud.deleted(), vec![host.servername.clone()]);
        assert_eq!(inventory.number_of_hosts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_delete_keeps_row() {
        let (cloud, inventory, manager) = setup(MockCloud::with_defaults(&settings())).await;
        let host = manager.create_worker().await.unwrap();
        cloud.fail_delete_of(&host.servername);

        assert!(manager.delete_worker(&host).await.is_err());
        assert_eq!(inventory.number_of_hosts().await.unwrap(), 1);
        assert_eq!(cloud.servers().len(), 1);
    }

    #[tokio::test]
    async fn delete_of_unknown_server_keeps_row() {
        let (_, inventory, manager) = setup(MockCloud::with_defaults(&settings())).await;
        let ghost = Host::new("rffmpeg-worker-ghost", "10.0.0.99", 1);
        inventory.add_hosts(std::slice::from_ref(&ghost)).await.unwrap();

        let err = manager.delete_worker(&ghost).await.unwrap_err();
        assert!(matches!(err, CloudError::ServerNotFound(name) if name == "rffmpeg-worker-ghost"));
        assert_eq!(inventory.number_of_hosts().await.unwrap(), 1);
    }
}
