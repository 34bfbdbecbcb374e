//! Fetch-resolve pipeline.
//!
//! Combines the user data, the local server record, its private network,
//! the cluster's floating IPs and the cluster master into one
//! [`ResolvedConfiguration`]. Every provider call goes through the
//! [`RetryPolicy`]; the first fatal error aborts the whole resolution.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::Ipv4Net;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{
    ClusterConfig, IpAddress, NodeConfig, PrivateNetwork, PublicNetwork, ResolvedConfiguration,
    Role, UnknownRole,
};
use crate::net::first_usable_v6;
use crate::providers::{FloatingIp, Network, ProviderApi, ProviderError, Server, UserSecrets};
use crate::retry::RetryPolicy;

/// Public IPv4 gateway on Hetzner Cloud.
pub const PUBLIC_GATEWAY_V4: Ipv4Addr = Ipv4Addr::new(172, 31, 1, 1);

/// Public IPv6 gateway on Hetzner Cloud (link-local).
pub const PUBLIC_GATEWAY_V6: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);

/// Public network device.
pub const PUBLIC_DEVICE: &str = "eth0";

/// Private network device until resolved from the MAC address on the host.
pub const PRIVATE_DEVICE_PLACEHOLDER: &str = "eth1";

/// k3s API server port used in the join URL.
const K3S_API_PORT: u16 = 6443;

/// Errors from the resolution pipeline. Each variant names the failed step.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("error reading user config from user data: {0}")]
    UserSecrets(#[source] ProviderError),

    #[error("error getting instance ID: {0}")]
    InstanceId(#[source] ProviderError),

    #[error("error getting server {id}: {source}")]
    Server {
        id: String,
        #[source]
        source: ProviderError,
    },

    #[error("server '{server}' needs a label '{label}'")]
    MissingLabel { server: String, label: &'static str },

    #[error(transparent)]
    Role(#[from] UnknownRole),

    #[error("error getting network ID {id}: {source}")]
    Network {
        id: String,
        #[source]
        source: ProviderError,
    },

    #[error("error getting floating IPs for cluster '{cluster}': {source}")]
    FloatingIps {
        cluster: String,
        #[source]
        source: ProviderError,
    },

    #[error("error getting master server for cluster '{cluster}': {source}")]
    MasterServer {
        cluster: String,
        #[source]
        source: ProviderError,
    },

    #[error("server '{server}' doesn't have exactly one private network (found {count})")]
    PrivateNetworkCount { server: String, count: usize },

    #[error("master server '{server}' doesn't have exactly one private network (found {count})")]
    MasterPrivateNetworkCount { server: String, count: usize },

    #[error("did not find fetched private network ID '{0}'")]
    UnknownNetwork(String),

    #[error("invalid private address {address}/{prefix_len}")]
    InvalidPrivateAddress { address: Ipv4Addr, prefix_len: u8 },
}

/// Resolves the node and cluster configuration from the provider.
pub struct Resolver<P> {
    client: P,
    policy: RetryPolicy,
    token_override: Option<String>,
}

impl<P: ProviderApi> Resolver<P> {
    /// Create a resolver around an (unauthenticated) provider client.
    pub fn new(client: P) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            token_override: None,
        }
    }

    /// Use a custom retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Authenticate API calls with `token` instead of the user data token.
    #[must_use]
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        self.token_override = token.filter(|t| !t.is_empty());
        self
    }

    /// Run the full pipeline.
    ///
    /// # Errors
    /// Returns the first fatal error, or the last cause of a step whose
    /// retries were exhausted. No partial configuration is returned.
    pub async fn resolve(&self) -> Result<ResolvedConfiguration, ResolveError> {
        let secrets = self
            .policy
            .run("get user secrets", || self.client.get_user_secrets())
            .await
            .map_err(ResolveError::UserSecrets)?;

        let instance_id = self
            .policy
            .run("get instance ID", || self.client.get_instance_id())
            .await
            .map_err(ResolveError::InstanceId)?;
        debug!(instance_id = %instance_id, "resolved instance ID");

        let token = self
            .token_override
            .as_deref()
            .unwrap_or(&secrets.hcloud_token);
        let api = self.client.with_token(token);

        let server = self
            .policy
            .run("get server", || api.get_server(&instance_id))
            .await
            .map_err(|source| ResolveError::Server {
                id: instance_id.clone(),
                source,
            })?;

        let cluster = server
            .label("cluster")
            .ok_or_else(|| ResolveError::MissingLabel {
                server: server.name.clone(),
                label: "cluster",
            })?
            .to_string();
        info!(server = %server.name, cluster = %cluster, "resolving node configuration");

        let mut networks = BTreeMap::new();
        for association in &server.private_networks {
            let id = association.network_id.as_str();
            let network = self
                .policy
                .run("get network", || api.get_network(id))
                .await
                .map_err(|source| ResolveError::Network {
                    id: id.to_string(),
                    source,
                })?;
            networks.insert(id.to_string(), network);
        }

        let floating_ips = self
            .policy
            .run("get floating IPs", || api.get_floating_ips_for_cluster(&cluster))
            .await
            .map_err(|source| ResolveError::FloatingIps {
                cluster: cluster.clone(),
                source,
            })?;

        let master = self
            .policy
            .run("get master server", || {
                api.get_server_with_role_in_cluster(Role::Master, &cluster)
            })
            .await
            .map_err(|source| ResolveError::MasterServer {
                cluster: cluster.clone(),
                source,
            })?;

        let config = assemble(&secrets, &server, &networks, &floating_ips, &master)?;
        info!(
            node = %config.node_config.name,
            role = %config.node_config.role,
            floating_ips = config.node_config.floating_ips.len(),
            "resolved configuration"
        );
        Ok(config)
    }
}

/// Build the configuration from fetched resources.
///
/// # Errors
/// Returns an error if a label is missing or invalid, or the server or the
/// master is not attached to exactly one private network.
pub fn assemble(
    secrets: &UserSecrets,
    server: &Server,
    networks: &BTreeMap<String, Network>,
    floating_ips: &[FloatingIp],
    master: &Server,
) -> Result<ResolvedConfiguration, ResolveError> {
    let missing = |label| ResolveError::MissingLabel {
        server: server.name.clone(),
        label,
    };
    let cluster_name = server.label("cluster").ok_or_else(|| missing("cluster"))?;
    let name = server.label("node_name").ok_or_else(|| missing("node_name"))?;
    let role: Role = server.label("role").ok_or_else(|| missing("role"))?.parse()?;

    let mut ipv4_addresses = vec![IpAddress::primary(Ipv4Net::from(server.ipv4_address))];
    let mut ipv6_addresses = vec![IpAddress::primary(first_usable_v6(server.ipv6_subnet))];
    let mut floating = Vec::with_capacity(floating_ips.len());
    for fip in floating_ips {
        let address = match fip {
            FloatingIp::V4(ip) => {
                let address = IpAddress::secondary(Ipv4Net::from(*ip));
                ipv4_addresses.push(address.clone());
                address
            }
            FloatingIp::V6(subnet) => {
                let address = IpAddress::secondary(first_usable_v6(*subnet));
                ipv6_addresses.push(address.clone());
                address
            }
        };
        floating.push(address);
    }

    let [association] = server.private_networks.as_slice() else {
        return Err(ResolveError::PrivateNetworkCount {
            server: server.name.clone(),
            count: server.private_networks.len(),
        });
    };
    let network = networks
        .get(&association.network_id)
        .ok_or_else(|| ResolveError::UnknownNetwork(association.network_id.clone()))?;
    let prefix_len = network.ip_range.prefix_len();
    let ipv4_address = Ipv4Net::new(association.server_ip, prefix_len).map_err(|_| {
        ResolveError::InvalidPrivateAddress {
            address: association.server_ip,
            prefix_len,
        }
    })?;

    let [master_association] = master.private_networks.as_slice() else {
        return Err(ResolveError::MasterPrivateNetworkCount {
            server: master.name.clone(),
            count: master.private_networks.len(),
        });
    };

    let node_config = NodeConfig {
        name: name.to_string(),
        role,
        public_network: PublicNetwork {
            net_device_name: PUBLIC_DEVICE.to_string(),
            gateway_ipv4: PUBLIC_GATEWAY_V4,
            gateway_ipv6: PUBLIC_GATEWAY_V6,
            ipv4_addresses,
            ipv6_addresses,
        },
        private_network: PrivateNetwork {
            net_device_name: PRIVATE_DEVICE_PLACEHOLDER.to_string(),
            mac_address: Some(association.mac_address.clone()),
            gateway_ipv4: network.gateway,
            ipv4_address,
        },
        floating_ips: floating,
        ssh_authorized_keys: secrets.ssh_authorized_keys.clone(),
    };

    let cluster_config = ClusterConfig {
        bootstrap: secrets.bootstrap,
        cluster_name: cluster_name.to_string(),
        hcloud_token: secrets.hcloud_token.clone(),
        k3os_token: secrets.k3os_token.clone(),
        k3os_master_join_url: format!("https://{}:{K3S_API_PORT}", master_association.server_ip),
        backup_config: secrets.backup.clone(),
        flux_config: secrets.flux.clone(),
        sealed_secrets_config: secrets.sealed_secrets.clone(),
    };

    Ok(ResolvedConfiguration {
        node_config,
        cluster_config,
    })
}
