//! Hetzner Cloud provider.
//!
//! Implements [`ProviderApi`](crate::providers::ProviderApi) on top of the
//! instance metadata service (`169.254.169.254`, no auth) and the Hetzner
//! Cloud API (`api.hetzner.cloud/v1`, bearer token).

mod client;
mod models;

pub use client::{ClientConfig, HCloud, API_BASE_URL, METADATA_BASE_URL};
