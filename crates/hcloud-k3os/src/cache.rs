//! Last-known-good configuration cache.
//!
//! The cache file is the only state this crate persists. It is replaced as a
//! whole (temp file + rename) so a crash never leaves a partial file behind.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::model::ResolvedConfiguration;
use crate::providers::ProviderApi;
use crate::resolver::Resolver;

/// Default cache file location.
pub const DEFAULT_CACHE_PATH: &str = "/var/lib/hcloud-k3os/config.yaml";

/// YAML file holding the last successfully resolved configuration.
#[derive(Debug, Clone)]
pub struct ConfigCache {
    path: PathBuf,
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PATH)
    }
}

impl ConfigCache {
    /// Cache backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached configuration.
    ///
    /// # Errors
    /// Returns an error if the file is missing, unreadable or not valid YAML.
    pub fn load(&self) -> Result<ResolvedConfiguration> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("error reading cache file at {}", self.path.display()))?;
        let config: ResolvedConfiguration = serde_yaml::from_str(&content)
            .with_context(|| format!("error parsing cache file at {}", self.path.display()))?;

        info!(path = %self.path.display(), node = %config.node_config.name, "Loaded cached configuration");
        Ok(config)
    }

    /// Replace the cached configuration.
    ///
    /// # Errors
    /// Returns an error if serialization or any filesystem step fails. The
    /// previous cache file is left untouched and the temporary file is
    /// removed in that case.
    pub fn store(&self, config: &ResolvedConfiguration) -> Result<()> {
        let content = serde_yaml::to_string(config).context("error marshalling config to YAML")?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .context("Failed to restrict cache file permissions")?;
        file.write_all(content.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .with_context(|| format!("Failed to write {}", file.path().display()))?;

        file.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to move cache file to {}", self.path.display()))?;

        Ok(())
    }

    /// Resolve live and persist the result, or fall back to the cache.
    ///
    /// A failed store is logged; the fresh configuration is still returned.
    ///
    /// # Errors
    /// Returns an error only if live resolution fails and the cache cannot
    /// be loaded either.
    pub async fn refresh<P: ProviderApi>(
        &self,
        resolver: &Resolver<P>,
    ) -> Result<ResolvedConfiguration> {
        match resolver.resolve().await {
            Ok(config) => {
                if let Err(e) = self.store(&config) {
                    error!(error = %format!("{e:#}"), path = %self.path.display(), "Failed to store configuration cache");
                }
                Ok(config)
            }
            Err(e) => {
                warn!(error = %e, "Fetch failed, falling back to cached configuration");
                self.load()
                    .context("live resolution failed and no usable cached configuration")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    #[test]
    fn test_store_then_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ConfigCache::new(tmp.path().join("nested/config.yaml"));
        let config = fixtures::master_config();

        cache.store(&config).unwrap();
        assert_eq!(cache.load().unwrap(), config);
    }

    #[test]
    fn test_store_is_private_and_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ConfigCache::new(tmp.path().join("config.yaml"));

        cache.store(&fixtures::master_config()).unwrap();

        let mode = fs::metadata(cache.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_store_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        // a non-empty directory in place of the cache file makes the rename fail
        let target = tmp.path().join("config.yaml");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"").unwrap();

        let err = ConfigCache::new(&target)
            .store(&fixtures::master_config())
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to move cache file"));

        let entries: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, ["config.yaml"]);
    }

    #[test]
    fn test_store_overwrites_previous() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ConfigCache::new(tmp.path().join("config.yaml"));
        let mut config = fixtures::master_config();

        cache.store(&config).unwrap();
        config.node_config.name = "m2".to_string();
        cache.store(&config).unwrap();

        assert_eq!(cache.load().unwrap().node_config.name, "m2");
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let a = serde_yaml::to_string(&fixtures::master_config()).unwrap();
        let b = serde_yaml::to_string(&fixtures::master_config()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ConfigCache::new(tmp.path().join("config.yaml"));

        let err = cache.load().unwrap_err();
        assert!(format!("{err:#}").contains("error reading cache file"));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        fs::write(&path, "node_config: [").unwrap();

        let err = ConfigCache::new(path).load().unwrap_err();
        assert!(format!("{err:#}").contains("error parsing cache file"));
    }
}
