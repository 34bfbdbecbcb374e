//! Hetzner Cloud API and metadata service client.
//!
//! API Documentation: <https://docs.hetzner.cloud/>

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::{Ipv4Net, Ipv6Net};
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, warn};

use super::models::{
    FloatingIpListResponse, NetworkResponse, ServerDetails, ServerListResponse, ServerResponse,
};
use crate::model::Role;
use crate::providers::traits::{
    Failure, FloatingIp, Network, NetworkAssociation, ProviderApi, ProviderError, ProviderResult,
    Server,
};

/// Base URL of the instance metadata service.
pub const METADATA_BASE_URL: &str = "http://169.254.169.254";

/// Base URL of the Hetzner Cloud API.
pub const API_BASE_URL: &str = "https://api.hetzner.cloud/v1";

/// Default timeout for every request.
const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Endpoints and timeout used by [`HCloud`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Metadata service base URL.
    pub metadata_url: String,
    /// Cloud API base URL.
    pub api_url: String,
    /// Per-request timeout; exceeding it is a retryable error.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            metadata_url: METADATA_BASE_URL.to_string(),
            api_url: API_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Point both endpoints at one base URL (mock servers).
    #[must_use]
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.metadata_url = base.to_string();
        self.api_url = base.to_string();
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Join a base URL and an absolute path without dropping the base path.
fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

/// Hetzner Cloud client.
#[derive(Clone)]
pub struct HCloud {
    /// HTTP client.
    client: Client,
    /// Endpoints.
    config: ClientConfig,
    /// API bearer token; empty for metadata-only use.
    token: String,
}

impl HCloud {
    /// Create a new client without an API token.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(config: ClientConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            token: String::new(),
        })
    }

    /// Make an unauthenticated GET request to the metadata service.
    async fn get_metadata(&self, path: &str) -> ProviderResult<(StatusCode, String)> {
        let url = endpoint(&self.config.metadata_url, path);
        debug!(url = %url, "GET metadata");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Failure::from_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(Failure::from_transport)?;
        Ok((status, text))
    }

    /// Make an authenticated GET request to the cloud API.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ProviderResult<T> {
        let url = endpoint(&self.config.api_url, path);
        debug!(url = %url, ?query, "GET request");

        let mut request: RequestBuilder = self.client.get(&url).bearer_auth(&self.token);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await.map_err(Failure::from_transport)?;

        Self::handle_response(response).await
    }

    /// Handle API response, parsing JSON or classifying the error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> ProviderResult<T> {
        let status = response.status();
        let text = response.text().await.map_err(Failure::from_transport)?;

        if status != StatusCode::OK {
            return Err(Failure::from_status(status, text));
        }

        serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, body = %text, "Failed to parse response");
            Failure::Fatal(ProviderError::Serialization(e))
        })
    }

    /// Convert an API server record to our [`Server`] type.
    fn to_server(details: ServerDetails) -> ProviderResult<Server> {
        let ipv4_address: Ipv4Addr = details.public_net.ipv4.ip.parse().map_err(|_| {
            Failure::unexpected(format!(
                "error parsing public IPv4 address '{}'",
                details.public_net.ipv4.ip
            ))
        })?;
        let ipv6_subnet: Ipv6Net = details.public_net.ipv6.ip.parse().map_err(|_| {
            Failure::unexpected(format!(
                "error parsing public IPv6 subnet '{}'",
                details.public_net.ipv6.ip
            ))
        })?;

        let private_networks = details
            .private_net
            .into_iter()
            .map(|net| {
                let server_ip = net.ip.parse().map_err(|_| {
                    Failure::unexpected(format!(
                        "error parsing private IP '{}' of network {}",
                        net.ip, net.network
                    ))
                })?;
                Ok(NetworkAssociation {
                    network_id: net.network.to_string(),
                    server_ip,
                    mac_address: net.mac_address,
                })
            })
            .collect::<ProviderResult<Vec<_>>>()?;

        Ok(Server {
            name: details.name,
            ipv4_address,
            ipv6_subnet,
            private_networks,
            labels: details.labels,
        })
    }
}

#[async_trait]
impl ProviderApi for HCloud {
    fn with_token(&self, token: &str) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            token: token.to_string(),
        }
    }

    async fn get_instance_id(&self) -> ProviderResult<String> {
        let (status, text) = self.get_metadata("/hetzner/v1/metadata/instance-id").await?;
        if status != StatusCode::OK {
            return Err(Failure::from_status(status, text));
        }
        Ok(text.trim().to_string())
    }

    async fn get_user_data(&self) -> ProviderResult<String> {
        let (status, text) = self.get_metadata("/latest/user-data").await?;
        if status != StatusCode::OK {
            return Err(Failure::Fatal(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            }));
        }
        Ok(text)
    }

    async fn get_server(&self, id: &str) -> ProviderResult<Server> {
        let response: ServerResponse = self.get(&format!("/servers/{id}"), &[]).await?;
        Self::to_server(response.server)
    }

    async fn get_server_with_role_in_cluster(
        &self,
        role: Role,
        cluster: &str,
    ) -> ProviderResult<Server> {
        let selector = format!("cluster=={cluster},role=={role}");
        let response: ServerListResponse = self
            .get("/servers", &[("label_selector", selector.as_str())])
            .await?;

        match response.servers.as_slice() {
            [only] => self.get_server(&only.id.to_string()).await,
            found => Err(Failure::unexpected(format!(
                "could not find a server with role {role} in cluster '{cluster}' ({} matches)",
                found.len()
            ))),
        }
    }

    async fn get_network(&self, id: &str) -> ProviderResult<Network> {
        let response: NetworkResponse = self.get(&format!("/networks/{id}"), &[]).await?;
        let network = response.network;

        let [subnet] = network.subnets.as_slice() else {
            return Err(Failure::unexpected(format!(
                "invalid number of subnets for network {id}: {} != 1",
                network.subnets.len()
            )));
        };

        let ip_range: Ipv4Net = network.ip_range.parse().map_err(|_| {
            Failure::unexpected(format!(
                "error parsing IP range '{}' of network {id}",
                network.ip_range
            ))
        })?;
        let gateway: Ipv4Addr = subnet.gateway.parse().map_err(|_| {
            Failure::unexpected(format!(
                "unable to parse gateway IP '{}' of network {id}",
                subnet.gateway
            ))
        })?;

        Ok(Network { ip_range, gateway })
    }

    async fn get_floating_ips_for_cluster(&self, cluster: &str) -> ProviderResult<Vec<FloatingIp>> {
        let selector = format!("cluster=={cluster}");
        let response: FloatingIpListResponse = self
            .get("/floating_ips", &[("label_selector", selector.as_str())])
            .await?;

        let mut floating_ips = response
            .floating_ips
            .into_iter()
            .map(|fip| {
                let parsed = match fip.ip_type.as_str() {
                    "ipv4" => fip.ip.parse().ok().map(FloatingIp::V4),
                    "ipv6" => fip.ip.parse().ok().map(FloatingIp::V6),
                    other => {
                        return Err(Failure::unexpected(format!("unexpected IP type '{other}'")))
                    }
                };
                parsed.ok_or_else(|| {
                    Failure::unexpected(format!(
                        "error parsing {} floating IP '{}'",
                        fip.ip_type, fip.ip
                    ))
                })
            })
            .collect::<ProviderResult<Vec<_>>>()?;

        floating_ips.sort();
        Ok(floating_ips)
    }
}
