//! Hetzner Cloud REST client.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rffmpeg_core::CloudConfig;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{CloudError, CloudResult};
use crate::provider::{
    CloudProvider, CreateServerRequest, ResourceHandle, ResourceKind, Server,
};

const PAGE_SIZE: u32 = 50;

/// [`CloudProvider`] backed by the Hetzner Cloud API.
pub struct HetznerCloud {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    servers: Vec<Server>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

impl HetznerCloud {
    pub fn new(config: &CloudConfig) -> CloudResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// Confirm the token works by listing servers. Returns how many exist.
    pub async fn verify_credentials(&self) -> CloudResult<usize> {
        let servers = self.list_servers().await?;
        info!(servers = servers.len(), api = %self.base_url, "cloud credentials verified");
        Ok(servers.len())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> CloudResult<T> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
            Err(_) => body,
        };
        Err(CloudError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CloudProvider for HetznerCloud {
    async fn list_servers(&self) -> CloudResult<Vec<Server>> {
        let mut servers = Vec::new();
        let mut page = 1;
        loop {
            let request = self
                .client
                .get(self.url("servers"))
                .query(&[("page", page), ("per_page", PAGE_SIZE)]);
            let list: ServerList = self.send(request).await?;
            servers.extend(list.servers);

            match list.meta.and_then(|m| m.pagination.next_page) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        debug!(count = servers.len(), "listed servers");
        Ok(servers)
    }

    async fn resource_by_name(
        &self,
        kind: ResourceKind,
        name: &str,
        architecture: Option<&str>,
    ) -> CloudResult<Option<ResourceHandle>> {
        let collection = kind.collection();
        let mut request = self.client.get(self.url(collection)).query(&[("name", name)]);
        if let Some(arch) = architecture {
            request = request.query(&[("architecture", arch)]);
        }
        let mut body: Value = self.send(request).await?;

        let items = body
            .get_mut(collection)
            .map(Value::take)
            .ok_or_else(|| CloudError::Response(format!("missing `{collection}` in response")))?;
        let handles: Vec<ResourceHandle> = serde_json::from_value(items)
            .map_err(|e| CloudError::Response(format!("{collection}: {e}")))?;

        let mut matches = handles.into_iter().filter(|h| {
            h.name == name
                && match (architecture, h.architecture.as_deref()) {
                    (Some(wanted), Some(actual)) => wanted == actual,
                    _ => true,
                }
        });
        let found = matches.next();
        if matches.next().is_some() {
            return Err(CloudError::Response(format!(
                "{collection}: `{name}` is ambiguous, narrow it by architecture"
            )));
        }
        Ok(found)
    }

    async fn create_server(&self, request: &CreateServerRequest) -> CloudResult<Server> {
        let resources = &request.resources;
        let body = json!({
            "name": request.name,
            "server_type": resources.server_type.id,
            "image": resources.image.id,
            "location": resources.location.name,
            "ssh_keys": [resources.ssh_key.id],
            "networks": [resources.network.id],
            "firewalls": [{ "firewall": resources.firewall.id }],
            "placement_group": resources.placement_group.id,
            "user_data": request.user_data,
            "start_after_create": true,
        });

        let created: ServerEnvelope = self
            .send(self.client.post(self.url("servers")).json(&body))
            .await?;
        info!(id = created.server.id, name = %created.server.name, "server created");
        Ok(created.server)
    }

    async fn server_by_name(&self, name: &str) -> CloudResult<Option<Server>> {
        let request = self.client.get(self.url("servers")).query(&[("name", name)]);
        let list: ServerList = self.send(request).await?;
        Ok(list.servers.into_iter().find(|s| s.name == name))
    }

    async fn delete_server(&self, server: &Server) -> CloudResult<()> {
        let request = self
            .client
            .delete(self.url(&format!("servers/{}", server.id)));
        let _action: Value = self.send(request).await?;
        info!(id = server.id, name = %server.name, "server deleted");
        Ok(())
    }
}
