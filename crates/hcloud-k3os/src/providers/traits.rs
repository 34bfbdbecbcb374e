//! Provider trait and common types for the Hetzner Cloud APIs.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::{Ipv4Net, Ipv6Net};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{BackupConfig, FluxConfig, Role, SealedSecretsConfig};

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an unexpected status code.
    #[error("unexpected status code {status} != 200: {message}")]
    Api { status: u16, message: String },

    /// Response decoded but did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// User data is missing fields or violates an invariant.
    #[error("invalid user data: {0}")]
    InvalidUserData(String),

    /// JSON deserialization error.
    #[error("error unmarshalling JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("error unmarshalling YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A provider error tagged with its retry classification.
///
/// The operation that produced the error decides whether retrying makes
/// sense; the retry orchestrator only matches on the tag.
#[derive(Error, Debug)]
pub enum Failure {
    /// Transient; the operation may succeed when repeated.
    #[error("retryable error: {0}")]
    Retryable(#[source] ProviderError),

    /// Permanent; repeating the operation cannot help.
    #[error("{0}")]
    Fatal(#[source] ProviderError),
}

impl Failure {
    /// Whether the retry orchestrator should try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Underlying provider error.
    #[must_use]
    pub fn into_inner(self) -> ProviderError {
        match self {
            Self::Retryable(e) | Self::Fatal(e) => e,
        }
    }

    /// Classify a transport-level error: timeouts and connection failures
    /// are transient, anything else is not.
    #[must_use]
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Retryable(ProviderError::Http(err))
        } else {
            Self::Fatal(ProviderError::Http(err))
        }
    }

    /// Classify a non-success HTTP status: 5xx is transient, 4xx is not.
    #[must_use]
    pub fn from_status(status: StatusCode, message: String) -> Self {
        let err = ProviderError::Api {
            status: status.as_u16(),
            message,
        };
        if status.is_server_error() {
            Self::Retryable(err)
        } else {
            Self::Fatal(err)
        }
    }

    /// Shorthand for a fatal [`ProviderError::UnexpectedResponse`].
    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Fatal(ProviderError::UnexpectedResponse(message.into()))
    }
}

/// Result of a single provider call.
pub type ProviderResult<T> = Result<T, Failure>;

/// A Hetzner Cloud server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    /// Server name.
    pub name: String,
    /// Public IPv4 address.
    pub ipv4_address: Ipv4Addr,
    /// Public IPv6 subnet.
    pub ipv6_subnet: Ipv6Net,
    /// Attached private networks.
    pub private_networks: Vec<NetworkAssociation>,
    /// Server labels.
    pub labels: BTreeMap<String, String>,
}

impl Server {
    /// Look up a label value.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Attachment of a server to a private network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAssociation {
    /// Network ID.
    pub network_id: String,
    /// Server IP within the network.
    pub server_ip: Ipv4Addr,
    /// MAC address of the attached interface.
    pub mac_address: String,
}

/// A Hetzner Cloud private network with a single subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// Network range.
    pub ip_range: Ipv4Net,
    /// Gateway of the network's only subnet.
    pub gateway: Ipv4Addr,
}

/// A floating IP assigned to the cluster.
///
/// IPv4 floating IPs are single addresses; IPv6 floating IPs are subnets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FloatingIp {
    V4(Ipv4Addr),
    V6(Ipv6Net),
}

/// User data as written by the operator, before validation.
#[derive(Debug, Default, Deserialize)]
struct RawUserData {
    #[serde(default)]
    bootstrap: bool,
    hcloud_token: Option<String>,
    k3os_token: Option<String>,
    #[serde(default)]
    ssh_authorized_keys: Vec<String>,
    backup_password: Option<String>,
    backup_access_key_id: Option<String>,
    backup_secret_access_key: Option<String>,
    backup_repository_url: Option<String>,
    flux_git_url: Option<String>,
    flux_git_private_key: Option<String>,
    sealed_secrets_tls_cert: Option<String>,
    sealed_secrets_tls_key: Option<String>,
}

/// Validated secrets and flags from the instance user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSecrets {
    pub bootstrap: bool,
    pub hcloud_token: String,
    pub k3os_token: String,
    pub ssh_authorized_keys: Vec<String>,
    pub backup: BackupConfig,
    pub flux: Option<FluxConfig>,
    pub sealed_secrets: Option<SealedSecretsConfig>,
}

fn required(value: Option<String>, field: &str) -> Result<String, ProviderError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProviderError::InvalidUserData(format!(
            "got empty {field}"
        ))),
    }
}

fn pair<T>(
    first: Option<String>,
    second: Option<String>,
    names: (&str, &str),
    build: impl FnOnce(String, String) -> T,
) -> Result<Option<T>, ProviderError> {
    match (first, second) {
        (Some(a), Some(b)) => Ok(Some(build(a, b))),
        (None, None) => Ok(None),
        _ => Err(ProviderError::InvalidUserData(format!(
            "{} and {} must be both set or both be null",
            names.0, names.1
        ))),
    }
}

impl UserSecrets {
    /// Decode and validate a user data document.
    ///
    /// # Errors
    /// Returns an error if the YAML is malformed, a mandatory field is
    /// missing or empty, or only one half of an optional pair is set.
    pub fn from_yaml(raw: &str) -> Result<Self, ProviderError> {
        let data: RawUserData = serde_yaml::from_str(raw)?;

        let hcloud_token = required(data.hcloud_token, "hcloud_token")?;
        let k3os_token = required(data.k3os_token, "k3os_token")?;
        let backup = BackupConfig {
            password: required(data.backup_password, "backup_password")?,
            access_key_id: required(data.backup_access_key_id, "backup_access_key_id")?,
            secret_access_key: required(
                data.backup_secret_access_key,
                "backup_secret_access_key",
            )?,
            repository_url: required(data.backup_repository_url, "backup_repository_url")?,
        };

        let flux = pair(
            data.flux_git_url,
            data.flux_git_private_key,
            ("flux_git_url", "flux_git_private_key"),
            |url, key| FluxConfig::new(url, &key),
        )?;
        let sealed_secrets = pair(
            data.sealed_secrets_tls_cert,
            data.sealed_secrets_tls_key,
            ("sealed_secrets_tls_cert", "sealed_secrets_tls_key"),
            |tls_cert, tls_key| SealedSecretsConfig { tls_cert, tls_key },
        )?;

        Ok(Self {
            bootstrap: data.bootstrap,
            hcloud_token,
            k3os_token,
            ssh_authorized_keys: data.ssh_authorized_keys,
            backup,
            flux,
            sealed_secrets,
        })
    }
}

/// Access to the instance metadata service and the cloud API.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Same client, authenticating cloud API calls with `token`.
    #[must_use]
    fn with_token(&self, token: &str) -> Self
    where
        Self: Sized;

    /// Get the instance ID of the running server.
    async fn get_instance_id(&self) -> ProviderResult<String>;

    /// Get the raw user data document.
    async fn get_user_data(&self) -> ProviderResult<String>;

    /// Get and validate the user data. Decode and validation errors are fatal.
    async fn get_user_secrets(&self) -> ProviderResult<UserSecrets> {
        let raw = self.get_user_data().await?;
        UserSecrets::from_yaml(&raw).map_err(Failure::Fatal)
    }

    /// Get server by ID.
    async fn get_server(&self, id: &str) -> ProviderResult<Server>;

    /// Find the single server labelled with `role` in `cluster`.
    async fn get_server_with_role_in_cluster(
        &self,
        role: Role,
        cluster: &str,
    ) -> ProviderResult<Server>;

    /// Get network by ID.
    async fn get_network(&self, id: &str) -> ProviderResult<Network>;

    /// List floating IPs labelled for `cluster`, sorted.
    async fn get_floating_ips_for_cluster(&self, cluster: &str) -> ProviderResult<Vec<FloatingIp>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r"
hcloud_token: hctoken
k3os_token: k3token
ssh_authorized_keys:
  - ssh-ed25519 AAAA admin
backup_password: pw
backup_access_key_id: akid
backup_secret_access_key: sak
backup_repository_url: s3:https://s3.example.com/bucket
";

    #[test]
    fn test_valid_user_data() {
        let secrets = UserSecrets::from_yaml(VALID).unwrap();
        assert_eq!(secrets.hcloud_token, "hctoken");
        assert_eq!(secrets.k3os_token, "k3token");
        assert_eq!(secrets.ssh_authorized_keys.len(), 1);
        assert_eq!(secrets.backup.repository_url, "s3:https://s3.example.com/bucket");
        assert!(!secrets.bootstrap);
        assert!(secrets.flux.is_none());
        assert!(secrets.sealed_secrets.is_none());
    }

    #[test]
    fn test_missing_backup_fields_are_named() {
        for field in [
            "backup_password",
            "backup_access_key_id",
            "backup_secret_access_key",
            "backup_repository_url",
        ] {
            let yaml: String = VALID
                .lines()
                .filter(|l| !l.starts_with(field))
                .collect::<Vec<_>>()
                .join("\n");
            let err = UserSecrets::from_yaml(&yaml).unwrap_err();
            assert!(
                err.to_string().contains(field),
                "error for {field} was: {err}"
            );
        }
    }

    #[test]
    fn test_empty_token_rejected() {
        let yaml = VALID.replace("hcloud_token: hctoken", "hcloud_token: ''");
        let err = UserSecrets::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("hcloud_token"));
    }

    #[test]
    fn test_half_flux_pair_rejected() {
        let yaml = format!("{VALID}flux_git_url: ssh://git@example.com/repo\n");
        let err = UserSecrets::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("flux_git_url and flux_git_private_key"));

        let yaml = format!("{VALID}flux_git_private_key: KEY\n");
        assert!(UserSecrets::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_full_flux_pair_normalized() {
        let yaml = format!(
            "{VALID}flux_git_url: ssh://git@example.com/repo\nflux_git_private_key: \"KEY\"\n"
        );
        let secrets = UserSecrets::from_yaml(&yaml).unwrap();
        let flux = secrets.flux.unwrap();
        assert_eq!(flux.git_url, "ssh://git@example.com/repo");
        assert_eq!(flux.git_private_key, "KEY\n");
    }

    #[test]
    fn test_half_sealed_secrets_pair_rejected() {
        let yaml = format!("{VALID}sealed_secrets_tls_key: KEY\n");
        let err = UserSecrets::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("sealed_secrets_tls_cert"));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = UserSecrets::from_yaml("hcloud_token: [unterminated").unwrap_err();
        assert!(matches!(err, ProviderError::Yaml(_)));
    }

    #[test]
    fn test_status_classification() {
        assert!(Failure::from_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(Failure::from_status(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_retryable());
        assert!(!Failure::from_status(StatusCode::NOT_FOUND, String::new()).is_retryable());
        assert!(!Failure::from_status(StatusCode::UNAUTHORIZED, String::new()).is_retryable());
    }

    #[test]
    fn test_floating_ips_sort_v4_first() {
        let mut ips = vec![
            FloatingIp::V6("2001:db8::/64".parse().unwrap()),
            FloatingIp::V4(Ipv4Addr::new(5, 6, 7, 8)),
            FloatingIp::V4(Ipv4Addr::new(1, 2, 3, 4)),
        ];
        ips.sort();
        assert_eq!(ips[0], FloatingIp::V4(Ipv4Addr::new(1, 2, 3, 4)));
        assert!(matches!(ips[2], FloatingIp::V6(_)));
    }
}
