//! Provider abstractions for the Hetzner Cloud metadata service and API.

pub mod hetzner;
mod traits;

pub use traits::{
    Failure, FloatingIp, Network, NetworkAssociation, ProviderApi, ProviderError,
    ProviderResult, Server, UserSecrets,
};
