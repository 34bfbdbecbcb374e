//! Resolved node and cluster configuration.
//!
//! [`ResolvedConfiguration`] is the output of the resolver and the artifact
//! persisted by the configuration cache. Everything downstream (renderers,
//! network setup, backups) consumes only this model.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};

/// Node role within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Control-plane node running `k3s server`.
    Master,
    /// Worker node running `k3s agent`.
    Agent,
}

impl Role {
    /// Label value used on the provider side.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role label holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unexpected role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(Self::Master),
            "agent" => Ok(Self::Agent),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Node and cluster configuration, as cached on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfiguration {
    pub node_config: NodeConfig,
    pub cluster_config: ClusterConfig,
}

/// Configuration of this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Kubernetes node name (`node_name` label).
    pub name: String,
    /// Node role (`role` label).
    pub role: Role,
    /// Public interface.
    pub public_network: PublicNetwork,
    /// Private (cluster-internal) interface.
    pub private_network: PrivateNetwork,
    /// Floating IPs of the cluster; also present in `public_network`.
    #[serde(default)]
    pub floating_ips: Vec<IpAddress>,
    /// SSH keys authorized for the default user.
    #[serde(default)]
    pub ssh_authorized_keys: Vec<String>,
}

/// An address configured on an interface.
///
/// `net` carries the host address together with its prefix, e.g.
/// `10.0.0.5/24`, not only the network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IpAddress {
    pub net: IpNet,
    pub is_primary: bool,
}

impl IpAddress {
    #[must_use]
    pub fn primary(net: impl Into<IpNet>) -> Self {
        Self {
            net: net.into(),
            is_primary: true,
        }
    }

    #[must_use]
    pub fn secondary(net: impl Into<IpNet>) -> Self {
        Self {
            net: net.into(),
            is_primary: false,
        }
    }
}

/// Public interface configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicNetwork {
    pub net_device_name: String,
    pub gateway_ipv4: Ipv4Addr,
    pub gateway_ipv6: Ipv6Addr,
    /// The first entry is the primary address.
    pub ipv4_addresses: Vec<IpAddress>,
    /// The first entry is the primary address.
    pub ipv6_addresses: Vec<IpAddress>,
}

impl PublicNetwork {
    /// Primary public IPv4 address.
    #[must_use]
    pub fn primary_ipv4(&self) -> Option<&IpAddress> {
        self.ipv4_addresses.iter().find(|a| a.is_primary)
    }

    /// Primary public IPv6 address.
    #[must_use]
    pub fn primary_ipv6(&self) -> Option<&IpAddress> {
        self.ipv6_addresses.iter().find(|a| a.is_primary)
    }
}

/// Private interface configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateNetwork {
    /// Device name; a placeholder until resolved from `mac_address` on the host.
    pub net_device_name: String,
    /// Hardware address of the attached interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    pub gateway_ipv4: Ipv4Addr,
    pub ipv4_address: Ipv4Net,
}

/// Cluster-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Set on the first master of a new cluster; restores from backup otherwise.
    #[serde(default)]
    pub bootstrap: bool,
    pub cluster_name: String,
    pub hcloud_token: String,
    pub k3os_token: String,
    pub k3os_master_join_url: String,
    pub backup_config: BackupConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flux_config: Option<FluxConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_secrets_config: Option<SealedSecretsConfig>,
}

/// Restic repository credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub password: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub repository_url: String,
}

/// Flux CD git deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxConfig {
    pub git_url: String,
    /// PEM private key, always terminated by exactly one newline.
    pub git_private_key: String,
}

impl FluxConfig {
    /// Build a Flux config, normalizing the private key's trailing newline.
    #[must_use]
    pub fn new(git_url: impl Into<String>, git_private_key: &str) -> Self {
        let mut key = git_private_key.trim_end_matches(['\n', '\r']).to_string();
        key.push('\n');
        Self {
            git_url: git_url.into(),
            git_private_key: key,
        }
    }
}

/// Sealed Secrets controller key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecretsConfig {
    pub tls_cert: String,
    pub tls_key: String,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Master `m1` of cluster `prod` with one floating IPv4.
    pub fn master_config() -> ResolvedConfiguration {
        let net = |s: &str| s.parse::<IpNet>().unwrap();
        ResolvedConfiguration {
            node_config: NodeConfig {
                name: "m1".to_string(),
                role: Role::Master,
                public_network: PublicNetwork {
                    net_device_name: "eth0".to_string(),
                    gateway_ipv4: Ipv4Addr::new(172, 31, 1, 1),
                    gateway_ipv6: "fe80::1".parse().unwrap(),
                    ipv4_addresses: vec![
                        IpAddress::primary(net("95.216.1.2/32")),
                        IpAddress::secondary(net("1.2.3.4/32")),
                    ],
                    ipv6_addresses: vec![IpAddress::primary(net("2a01:4f9:c010:1234::1/64"))],
                },
                private_network: PrivateNetwork {
                    net_device_name: "eth1".to_string(),
                    mac_address: Some("86:00:00:2a:7d:e0".to_string()),
                    gateway_ipv4: Ipv4Addr::new(10, 0, 0, 1),
                    ipv4_address: "10.0.0.5/24".parse().unwrap(),
                },
                floating_ips: vec![IpAddress::secondary(net("1.2.3.4/32"))],
                ssh_authorized_keys: vec!["ssh-ed25519 AAAA admin".to_string()],
            },
            cluster_config: ClusterConfig {
                bootstrap: false,
                cluster_name: "prod".to_string(),
                hcloud_token: "hctoken".to_string(),
                k3os_token: "k3token".to_string(),
                k3os_master_join_url: "https://10.0.0.5:6443".to_string(),
                backup_config: BackupConfig {
                    password: "pw".to_string(),
                    access_key_id: "akid".to_string(),
                    secret_access_key: "sak".to_string(),
                    repository_url: "s3:https://s3.example.com/bucket".to_string(),
                },
                flux_config: None,
                sealed_secrets_config: None,
            },
        }
    }

    /// Agent `a1` of cluster `prod` without floating IPs.
    pub fn agent_config() -> ResolvedConfiguration {
        let mut config = master_config();
        config.node_config.name = "a1".to_string();
        config.node_config.role = Role::Agent;
        config.node_config.private_network.ipv4_address = "10.0.0.7/24".parse().unwrap();
        config.node_config.public_network.ipv4_addresses.truncate(1);
        config.node_config.floating_ips.clear();
        config
    }
}
