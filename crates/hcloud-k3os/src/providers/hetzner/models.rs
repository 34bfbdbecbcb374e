//! Hetzner Cloud API response models.
//!
//! Only the fields consumed by the configurator are modelled; everything
//! else in the responses is ignored.

use std::collections::BTreeMap;

use serde::Deserialize;

// ============================================================================
// Server types
// ============================================================================

/// Response of `GET /servers/{id}`.
#[derive(Debug, Deserialize)]
pub struct ServerResponse {
    /// Server wrapper.
    pub server: ServerDetails,
}

/// Server details.
#[derive(Debug, Deserialize)]
pub struct ServerDetails {
    /// Server name.
    pub name: String,
    /// Public network configuration.
    pub public_net: PublicNet,
    /// Private network attachments.
    #[serde(default)]
    pub private_net: Vec<PrivateNet>,
    /// User-defined labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Public network block of a server.
#[derive(Debug, Deserialize)]
pub struct PublicNet {
    /// Primary IPv4.
    pub ipv4: PublicIp,
    /// Primary IPv6 subnet.
    pub ipv6: PublicIp,
}

/// A single public address entry. For IPv6 `ip` is a CIDR subnet.
#[derive(Debug, Deserialize)]
pub struct PublicIp {
    pub ip: String,
}

/// Private network attachment of a server.
#[derive(Debug, Deserialize)]
pub struct PrivateNet {
    /// Network ID.
    pub network: u64,
    /// Server IP in the network.
    pub ip: String,
    /// MAC address of the interface.
    pub mac_address: String,
}

/// Response of `GET /servers?label_selector=...`.
#[derive(Debug, Deserialize)]
pub struct ServerListResponse {
    /// Matching servers; only the IDs are used.
    #[serde(default)]
    pub servers: Vec<ServerId>,
}

/// Server reference in a list response.
#[derive(Debug, Deserialize)]
pub struct ServerId {
    pub id: u64,
}

// ============================================================================
// Network types
// ============================================================================

/// Response of `GET /networks/{id}`.
#[derive(Debug, Deserialize)]
pub struct NetworkResponse {
    /// Network wrapper.
    pub network: NetworkDetails,
}

/// Network details.
#[derive(Debug, Deserialize)]
pub struct NetworkDetails {
    /// Network range (CIDR).
    pub ip_range: String,
    /// Subnets; exactly one is supported.
    #[serde(default)]
    pub subnets: Vec<Subnet>,
}

/// Network subnet.
#[derive(Debug, Deserialize)]
pub struct Subnet {
    /// Gateway address.
    pub gateway: String,
}

// ============================================================================
// Floating IP types
// ============================================================================

/// Response of `GET /floating_ips?label_selector=...`.
#[derive(Debug, Deserialize)]
pub struct FloatingIpListResponse {
    #[serde(default)]
    pub floating_ips: Vec<FloatingIpDetails>,
}

/// Floating IP details.
#[derive(Debug, Deserialize)]
pub struct FloatingIpDetails {
    /// `ipv4` or `ipv6`.
    #[serde(rename = "type")]
    pub ip_type: String,
    /// Address (IPv4) or subnet in CIDR notation (IPv6).
    pub ip: String,
}
