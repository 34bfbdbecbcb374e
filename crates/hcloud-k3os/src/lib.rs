//! Node configurator for k3OS clusters on Hetzner Cloud.
//!
//! At boot the daemon resolves the node's configuration from the instance
//! metadata service and the Hetzner Cloud API, caches it, renders the k3OS
//! and Kubernetes artifacts, configures the network interfaces and keeps
//! master state backed up with restic.
//!
//! # Example
//!
//! ```rust,ignore
//! use hcloud_k3os::providers::hetzner::{ClientConfig, HCloud};
//! use hcloud_k3os::{ConfigCache, Resolver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resolver = Resolver::new(HCloud::new(ClientConfig::default())?);
//!
//!     // Resolve live, falling back to the last good configuration
//!     let config = ConfigCache::default().refresh(&resolver).await?;
//!     println!("{}", config.node_config.name);
//!
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backup;
pub mod cache;
pub mod daemon;
pub mod model;
pub mod net;
pub mod providers;
pub mod render;
pub mod resolver;
pub mod retry;
pub mod runner;

pub use backup::{ensure_bootstrapped, BootstrapOutcome, Restic, Snapshot, SnapshotStore};
pub use cache::ConfigCache;
pub use daemon::{Daemon, Paths};
pub use model::{ResolvedConfiguration, Role};
pub use providers::hetzner::HCloud;
pub use providers::{Failure, ProviderApi, ProviderError};
pub use resolver::{ResolveError, Resolver};
pub use retry::RetryPolicy;
pub use runner::{Command, CommandRunner, SystemRunner};
