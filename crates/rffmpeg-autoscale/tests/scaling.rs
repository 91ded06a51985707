//! End-to-end scaling cycles against an in-memory cloud and sqlite.

use std::sync::Arc;
use std::time::Duration;

use rffmpeg_autoscale::{Autoscaler, ControlLoop, CycleOutcome, ScalingPolicy};
use rffmpeg_cloud::mock::MockCloud;
use rffmpeg_cloud::{
    LifecycleManager, ProvisionSettings, Server, ServerStatus, WORKER_NAME_PREFIX,
    generate_name_with,
};
use rffmpeg_core::AutoscalerConfig;
use rffmpeg_state::{Host, HostId, Inventory, InventoryStore};

struct Harness {
    cloud: Arc<MockCloud>,
    inventory: Inventory,
    scaler: Autoscaler,
}

fn settings() -> ProvisionSettings {
    let mut config = AutoscalerConfig::default();
    config.fallback.host = "jellyfin.lan".to_string();
    config.cloud.token = "token".to_string();
    let mut settings = ProvisionSettings::from_config(&config);
    settings.poll_interval = Duration::from_millis(5);
    settings.provision_timeout = Duration::from_secs(5);
    settings
}

async fn harness() -> Harness {
    harness_with(MockCloud::with_defaults(&settings())).await
}

async fn harness_with(cloud: MockCloud) -> Harness {
    let cloud = Arc::new(cloud);
    let inventory = Inventory::new(InventoryStore::open_in_memory().await.unwrap());
    let lifecycle = Arc::new(LifecycleManager::new(
        cloud.clone(),
        inventory.clone(),
        settings(),
    ));
    let scaler = Autoscaler::new(inventory.clone(), lifecycle, ScalingPolicy::new(2), 4);
    Harness {
        cloud,
        inventory,
        scaler,
    }
}

impl Harness {
    /// A running server with a matching inventory row.
    async fn worker(&self, name: &str) -> HostId {
        let server = self.cloud.add_server(name);
        let address = server.private_address().unwrap().to_string();
        self.inventory
            .add_hosts(&[Host::new(name, address, 1)])
            .await
            .unwrap();
        self.inventory
            .hosts()
            .await
            .unwrap()
            .into_iter()
            .find(|h| h.servername == name)
            .and_then(|h| h.id)
            .unwrap()
    }

    async fn transcodes(&self, host_id: HostId, n: usize) {
        for pid in 0..n {
            self.inventory
                .store()
                .report_process(host_id, 100 + pid as i64, "ffmpeg -i movie.mkv transcode.m3u8")
                .await
                .unwrap();
        }
    }

    async fn servernames(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .inventory
            .hosts()
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.servername)
            .collect();
        names.sort();
        names
    }
}

#[tokio::test]
async fn backlog_with_no_workers_provisions_exactly_one() {
    let h = harness().await;
    h.transcodes(HostId::FALLBACK, 2).await;

    let outcome = h.scaler.run_cycle().await;
    let CycleOutcome::ScaledUp { servername } = outcome else {
        panic!("expected scale up, got {outcome:?}");
    };
    assert!(servername.starts_with(WORKER_NAME_PREFIX));
    assert_eq!(h.cloud.create_requests().len(), 1);
    assert_eq!(h.cloud.status_of(&servername), Some(ServerStatus::Running));
    assert_eq!(h.servernames().await, vec![servername]);
}

#[tokio::test]
async fn backlog_with_saturated_workers_provisions_exactly_one() {
    let h = harness().await;
    for name in ["rffmpeg-worker-a", "rffmpeg-worker-b"] {
        let id = h.worker(name).await;
        h.transcodes(id, 3).await;
    }
    h.transcodes(HostId::FALLBACK, 1).await;

    assert!(matches!(
        h.scaler.run_cycle().await,
        CycleOutcome::ScaledUp { .. }
    ));
    assert_eq!(h.cloud.create_requests().len(), 1);
    assert_eq!(h.inventory.number_of_hosts().await.unwrap(), 3);
}

#[tokio::test]
async fn backlog_with_room_takes_no_action() {
    let h = harness().await;
    let busy = h.worker("rffmpeg-worker-a").await;
    h.transcodes(busy, 3).await;
    h.worker("rffmpeg-worker-b").await;
    h.transcodes(HostId::FALLBACK, 1).await;

    assert_eq!(h.scaler.run_cycle().await, CycleOutcome::NoChange);
    assert!(h.cloud.create_requests().is_empty());
    assert!(h.cloud.deleted().is_empty());
    assert_eq!(h.inventory.number_of_hosts().await.unwrap(), 2);
}

#[tokio::test]
async fn idle_fallback_retires_idle_workers_even_when_one_delete_fails() {
    let h = harness().await;
    for name in ["rffmpeg-worker-a", "rffmpeg-worker-b", "rffmpeg-worker-c"] {
        h.worker(name).await;
    }
    let busy = h.worker("rffmpeg-worker-d").await;
    h.transcodes(busy, 1).await;
    h.cloud.fail_delete_of("rffmpeg-worker-b");

    let outcome = h.scaler.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::ScaledDown {
            deleted: vec!["rffmpeg-worker-a".to_string(), "rffmpeg-worker-c".to_string()],
            failed: vec!["rffmpeg-worker-b".to_string()],
        }
    );

    // Rows go only with their servers.
    assert_eq!(
        h.servernames().await,
        vec!["rffmpeg-worker-b", "rffmpeg-worker-d"]
    );
    let mut live: Vec<_> = h.cloud.servers().into_iter().map(|s| s.name).collect();
    live.sort();
    assert_eq!(live, vec!["rffmpeg-worker-b", "rffmpeg-worker-d"]);
}

#[tokio::test]
async fn failed_provisioning_leaves_inventory_untouched() {
    let h = harness_with(MockCloud::with_defaults(&settings()).failing_creates()).await;
    h.transcodes(HostId::FALLBACK, 1).await;

    assert!(matches!(
        h.scaler.run_cycle().await,
        CycleOutcome::ScaleUpFailed { .. }
    ));
    assert_eq!(h.inventory.number_of_hosts().await.unwrap(), 0);
}

#[test]
fn generated_names_skip_live_instances() {
    let live = vec![Server {
        id: 1,
        name: "rffmpeg-worker-X".to_string(),
        status: ServerStatus::Running,
        private_net: vec![],
    }];
    let mut ids = ["X", "X", "Y"].into_iter();
    let name = generate_name_with(&live, || ids.next().unwrap().to_string());
    assert_eq!(name, "rffmpeg-worker-Y");
}

#[tokio::test]
async fn drain_after_scale_down_completes_the_cycle() {
    let h = harness().await;
    h.worker("rffmpeg-worker-a").await;
    h.worker("rffmpeg-worker-b").await;
    let Harness {
        cloud,
        inventory,
        scaler,
    } = h;

    let handle = ControlLoop::new(scaler, Duration::from_secs(3600)).spawn();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let cycles = handle.drain().await.unwrap();

    assert_eq!(cycles, 1);
    assert_eq!(cloud.deleted().len(), 2);
    assert_eq!(inventory.number_of_hosts().await.unwrap(), 0);
}
