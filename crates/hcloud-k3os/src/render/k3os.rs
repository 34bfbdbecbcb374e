//! k3OS `config.d` file.

use serde::Serialize;

use crate::model::{ResolvedConfiguration, Role};

#[derive(Debug, Serialize)]
struct K3osFile<'a> {
    ssh_authorized_keys: &'a [String],
    k3os: K3osSection<'a>,
}

#[derive(Debug, Serialize)]
struct K3osSection<'a> {
    server_url: &'a str,
    token: &'a str,
    k3s_args: Vec<String>,
}

/// k3s arguments for the node: role specific prefix, then node identity and
/// the flannel interface on the private network.
#[must_use]
pub fn k3s_args(config: &ResolvedConfiguration) -> Vec<String> {
    let node = &config.node_config;
    let private_ip = node.private_network.ipv4_address.addr().to_string();

    let mut args = match node.role {
        Role::Master => vec![
            "server".to_string(),
            "--advertise-address".to_string(),
            private_ip.clone(),
        ],
        Role::Agent => vec!["agent".to_string()],
    };

    let public_ip = node
        .public_network
        .primary_ipv4()
        .map(|a| a.net.addr().to_string())
        .unwrap_or_default();

    args.extend([
        "--node-name".to_string(),
        node.name.clone(),
        "--node-ip".to_string(),
        private_ip,
        "--node-external-ip".to_string(),
        public_ip,
        "--flannel-iface".to_string(),
        node.private_network.net_device_name.clone(),
    ]);
    args
}

/// Render the k3OS configuration as YAML.
///
/// # Errors
/// Returns an error if YAML serialization fails.
pub fn render(config: &ResolvedConfiguration) -> Result<String, serde_yaml::Error> {
    let file = K3osFile {
        ssh_authorized_keys: &config.node_config.ssh_authorized_keys,
        k3os: K3osSection {
            server_url: &config.cluster_config.k3os_master_join_url,
            token: &config.cluster_config.k3os_token,
            k3s_args: k3s_args(config),
        },
    };
    serde_yaml::to_string(&file)
}
