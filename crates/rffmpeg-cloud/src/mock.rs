//! In-memory [`CloudProvider`] for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{CloudError, CloudResult};
use crate::lifecycle::ProvisionSettings;
use crate::provider::{
    CloudProvider, CreateServerRequest, PrivateNet, ResourceHandle, ResourceKind, Server,
    ServerStatus,
};

/// A cloud that lives in a mutex.
///
/// New servers come up after a configurable number of status polls and are
/// given a `10.0.0.x` private address.
#[derive(Default)]
pub struct MockCloud {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    servers: Vec<Server>,
    resources: HashMap<(ResourceKind, String), Vec<ResourceHandle>>,
    polls_until_running: u32,
    never_ready: bool,
    private_network: bool,
    fail_create: bool,
    fail_delete: HashSet<String>,
    pending_polls: HashMap<String, u32>,
    create_requests: Vec<CreateServerRequest>,
    deleted: Vec<String>,
}

impl MockCloud {
    pub fn new() -> Self {
        let cloud = Self::default();
        cloud.lock().private_network = true;
        cloud
    }

    /// A cloud holding every resource `settings` refers to.
    ///
    /// The server type is x86. The image exists for both architectures, arm
    /// listed first, so only an architecture-aware lookup picks the x86 one
    /// (id 101).
    pub fn with_defaults(settings: &ProvisionSettings) -> Self {
        let cloud = Self::new();
        {
            let mut inner = cloud.lock();
            for (i, kind) in ResourceKind::ALL.into_iter().enumerate() {
                let name = settings.resources.get(kind).to_string();
                let handle = |id: u64, architecture: Option<&str>| ResourceHandle {
                    id,
                    name: name.clone(),
                    architecture: architecture.map(str::to_string),
                };
                let handles = match kind {
                    ResourceKind::ServerType => vec![handle(100 + i as u64, Some("x86"))],
                    ResourceKind::Image => vec![
                        handle(900 + i as u64, Some("arm")),
                        handle(100 + i as u64, Some("x86")),
                    ],
                    _ => vec![handle(100 + i as u64, None)],
                };
                inner.resources.insert((kind, name), handles);
            }
        }
        cloud
    }

    /// Report non-running status `polls` times before coming up.
    pub fn polls_until_running(self, polls: u32) -> Self {
        self.lock().polls_until_running = polls;
        self
    }

    /// Created servers never reach running.
    pub fn never_ready(self) -> Self {
        self.lock().never_ready = true;
        self
    }

    pub fn without_resource(self, kind: ResourceKind) -> Self {
        self.lock().resources.retain(|(k, _), _| *k != kind);
        self
    }

    /// Created servers get no private network attachment.
    pub fn without_private_network(self) -> Self {
        self.lock().private_network = false;
        self
    }

    /// Every create request fails with an API error.
    pub fn failing_creates(self) -> Self {
        self.lock().fail_create = true;
        self
    }

    /// Insert an already-running server.
    pub fn add_server(&self, name: &str) -> Server {
        let mut inner = self.lock();
        let server = inner.build_server(name, ServerStatus::Running);
        inner.servers.push(server.clone());
        server
    }

    /// Make deletes of `name` fail with an API error.
    pub fn fail_delete_of(&self, name: &str) {
        self.lock().fail_delete.insert(name.to_string());
    }

    pub fn servers(&self) -> Vec<Server> {
        self.lock().servers.clone()
    }

    pub fn create_requests(&self) -> Vec<CreateServerRequest> {
        self.lock().create_requests.clone()
    }

    /// Names of successfully deleted servers, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn status_of(&self, name: &str) -> Option<ServerStatus> {
        self.lock()
            .servers
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.status)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn build_server(&mut self, name: &str, status: ServerStatus) -> Server {
        self.next_id += 1;
        let private_net = if self.private_network {
            vec![PrivateNet {
                network: 1,
                ip: format!("10.0.0.{}", self.next_id + 1),
            }]
        } else {
            Vec::new()
        };
        Server {
            id: self.next_id,
            name: name.to_string(),
            status,
            private_net,
        }
    }
}

#[async_trait]
impl CloudProvider for MockCloud {
    async fn list_servers(&self) -> CloudResult<Vec<Server>> {
        Ok(self.servers())
    }

    async fn resource_by_name(
        &self,
        kind: ResourceKind,
        name: &str,
        architecture: Option<&str>,
    ) -> CloudResult<Option<ResourceHandle>> {
        let inner = self.lock();
        let Some(handles) = inner.resources.get(&(kind, name.to_string())) else {
            return Ok(None);
        };
        Ok(handles
            .iter()
            .find(|h| architecture.is_none() || h.architecture.as_deref() == architecture)
            .cloned())
    }

    async fn create_server(&self, request: &CreateServerRequest) -> CloudResult<Server> {
        let mut inner = self.lock();
        if inner.fail_create {
            return Err(CloudError::Api {
                status: 503,
                message: "resource_unavailable: mock create failure".to_string(),
            });
        }
        inner.create_requests.push(request.clone());
        let server = inner.build_server(&request.name, ServerStatus::Initializing);
        let polls = inner.polls_until_running;
        inner.pending_polls.insert(request.name.clone(), polls);
        inner.servers.push(server.clone());
        Ok(server)
    }

    async fn server_by_name(&self, name: &str) -> CloudResult<Option<Server>> {
        let mut inner = self.lock();
        let never_ready = inner.never_ready;
        let came_up = match inner.pending_polls.get_mut(name) {
            Some(_) if never_ready => false,
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        };
        if came_up {
            inner.pending_polls.remove(name);
            if let Some(server) = inner.servers.iter_mut().find(|s| s.name == name) {
                server.status = ServerStatus::Running;
            }
        }
        Ok(inner.servers.iter().find(|s| s.name == name).cloned())
    }

    async fn delete_server(&self, server: &Server) -> CloudResult<()> {
        let mut inner = self.lock();
        if inner.fail_delete.contains(&server.name) {
            return Err(CloudError::Api {
                status: 500,
                message: format!("server_error: mock delete failure for {}", server.name),
            });
        }
        let before = inner.servers.len();
        inner.servers.retain(|s| s.id != server.id);
        if inner.servers.len() == before {
            return Err(CloudError::Api {
                status: 404,
                message: "not_found: server not found".to_string(),
            });
        }
        inner.deleted.push(server.name.clone());
        Ok(())
    }
}
