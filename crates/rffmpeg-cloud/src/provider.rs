//! Cloud provider abstraction.
//!
//! The lifecycle manager only needs five operations from a cloud. Keeping
//! them behind [`CloudProvider`] lets tests run against an in-memory cloud
//! and leaves room for providers other than Hetzner.

use std::fmt;

use async_trait::async_trait;
use rffmpeg_core::CloudConfig;
use serde::{Deserialize, Serialize};

use crate::error::CloudResult;

/// Named resources a worker is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ServerType,
    Image,
    SshKey,
    Location,
    Network,
    Firewall,
    PlacementGroup,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::ServerType,
        ResourceKind::Image,
        ResourceKind::SshKey,
        ResourceKind::Location,
        ResourceKind::Network,
        ResourceKind::Firewall,
        ResourceKind::PlacementGroup,
    ];

    /// Collection path under the API root. Also the key of the list in the
    /// response body.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::ServerType => "server_types",
            ResourceKind::Image => "images",
            ResourceKind::SshKey => "ssh_keys",
            ResourceKind::Location => "locations",
            ResourceKind::Network => "networks",
            ResourceKind::Firewall => "firewalls",
            ResourceKind::PlacementGroup => "placement_groups",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::ServerType => "server type",
            ResourceKind::Image => "image",
            ResourceKind::SshKey => "ssh key",
            ResourceKind::Location => "location",
            ResourceKind::Network => "network",
            ResourceKind::Firewall => "firewall",
            ResourceKind::PlacementGroup => "placement group",
        };
        f.write_str(label)
    }
}

/// A resolved cloud resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub id: u64,
    pub name: String,
    /// CPU architecture of server types and images ("x86", "arm").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

/// Names of the resources every worker is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub server_type: String,
    pub image: String,
    pub ssh_key: String,
    pub location: String,
    pub network: String,
    pub firewall: String,
    pub placement_group: String,
}

impl ResourceNames {
    pub fn from_config(cloud: &CloudConfig) -> Self {
        Self {
            server_type: cloud.server_type.clone(),
            image: cloud.image.clone(),
            ssh_key: cloud.ssh_key.clone(),
            location: cloud.location.clone(),
            network: cloud.network.clone(),
            firewall: cloud.firewall.clone(),
            placement_group: cloud.placement_group.clone(),
        }
    }

    pub fn get(&self, kind: ResourceKind) -> &str {
        match kind {
            ResourceKind::ServerType => &self.server_type,
            ResourceKind::Image => &self.image,
            ResourceKind::SshKey => &self.ssh_key,
            ResourceKind::Location => &self.location,
            ResourceKind::Network => &self.network,
            ResourceKind::Firewall => &self.firewall,
            ResourceKind::PlacementGroup => &self.placement_group,
        }
    }
}

/// Every resource a create request references, already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResources {
    pub server_type: ResourceHandle,
    pub image: ResourceHandle,
    pub ssh_key: ResourceHandle,
    pub location: ResourceHandle,
    pub network: ResourceHandle,
    pub firewall: ResourceHandle,
    pub placement_group: ResourceHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateServerRequest {
    pub name: String,
    pub resources: ResolvedResources,
    /// Rendered cloud-init document.
    pub user_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Off,
    Deleting,
    Migrating,
    Rebuilding,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateNet {
    #[serde(default)]
    pub network: u64,
    pub ip: String,
}

/// A server as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub status: ServerStatus,
    #[serde(default)]
    pub private_net: Vec<PrivateNet>,
}

impl Server {
    pub fn is_running(&self) -> bool {
        self.status == ServerStatus::Running
    }

    /// First private network address, the one workers are dispatched to.
    pub fn private_address(&self) -> Option<&str> {
        self.private_net
            .first()
            .map(|net| net.ip.as_str())
            .filter(|ip| !ip.is_empty())
    }
}

/// Operations the autoscaler needs from a cloud.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Every server in the project.
    async fn list_servers(&self) -> CloudResult<Vec<Server>>;

    /// Look a named resource up. `Ok(None)` means it does not exist.
    ///
    /// `architecture` narrows kinds published once per architecture
    /// (images). A name that still matches more than one resource is an
    /// error.
    async fn resource_by_name(
        &self,
        kind: ResourceKind,
        name: &str,
        architecture: Option<&str>,
    ) -> CloudResult<Option<ResourceHandle>>;

    /// Request a new server. The returned server is usually not running yet.
    async fn create_server(&self, request: &CreateServerRequest) -> CloudResult<Server>;

    async fn server_by_name(&self, name: &str) -> CloudResult<Option<Server>>;

    async fn delete_server(&self, server: &Server) -> CloudResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_unknown_values() {
        let server: Server = serde_json::from_str(
            r#"{"id": 7, "name": "w", "status": "unplugged", "private_net": []}"#,
        )
        .unwrap();
        assert_eq!(server.status, ServerStatus::Unknown);
        assert!(!server.is_running());
    }

    #[test]
    fn private_address_takes_first_network() {
        let server: Server = serde_json::from_str(
            r#"{"id": 7, "name": "w", "status": "running",
                "private_net": [{"network": 1, "ip": "10.0.0.4"}, {"network": 2, "ip": "10.1.0.4"}]}"#,
        )
        .unwrap();
        assert!(server.is_running());
        assert_eq!(server.private_address(), Some("10.0.0.4"));
    }

    #[test]
    fn missing_private_net_has_no_address() {
        let server: Server =
            serde_json::from_str(r#"{"id": 7, "name": "w", "status": "running"}"#).unwrap();
        assert_eq!(server.private_address(), None);
    }

    #[test]
    fn resource_names_follow_config() {
        let names = ResourceNames::from_config(&CloudConfig::default());
        assert_eq!(names.get(ResourceKind::ServerType), "cpx21");
        assert_eq!(names.get(ResourceKind::Image), "docker-ce");
        assert_eq!(ResourceKind::PlacementGroup.collection(), "placement_groups");
        assert_eq!(ResourceKind::SshKey.to_string(), "ssh key");
    }
}
