//! Cluster state backup with restic.
//!
//! Masters back up `/var/lib/rancher` to a restic repository every
//! [`BACKUP_INTERVAL`]. A master that was never bootstrapped either starts a
//! new cluster (user data `bootstrap: true`) or restores the latest snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::model::{BackupConfig, Role};
use crate::runner::{Command, CommandError, CommandRunner};

/// Marker written once the node's k3s state exists.
pub const BOOTSTRAPPED_MARKER: &str = "/var/lib/rancher/.bootstrapped";

/// Directory being backed up.
pub const BACKUP_DIR: &str = "/var/lib/rancher";

/// restic local cache.
pub const RESTIC_CACHE_DIR: &str = "/var/lib/hcloud-k3os/cache";

/// Period of the backup schedule.
pub const BACKUP_INTERVAL: Duration = Duration::from_secs(8 * 60 * 60);

/// Paths under [`BACKUP_DIR`] that are never backed up.
const EXCLUDES: [&str; 2] = [
    "/var/lib/rancher/k3s/agent/containerd",
    "/var/lib/rancher/k3s/data",
];

/// Errors from backup operations.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("error initializing restic repository: {0}")]
    Init(#[source] CommandError),

    #[error("error running backup command: {0}")]
    Backup(#[source] CommandError),

    #[error("error running restore command: {0}")]
    Restore(#[source] CommandError),

    #[error("error running list command: {0}")]
    List(#[source] CommandError),

    #[error("error unmarshalling list output: {0}")]
    ListOutput(#[from] serde_json::Error),

    #[error("backup does not have any snapshots")]
    NoSnapshots,

    #[error("error marking node as bootstrapped at {}: {source}", .path.display())]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A restic snapshot as listed by `restic --json snapshots`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub short_id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Backup repository operations.
pub trait SnapshotStore: Send + Sync {
    /// Create the repository; an existing repository is not an error.
    ///
    /// # Errors
    /// Returns an error if the repository cannot be created.
    fn init(&self) -> Result<(), BackupError>;

    /// Take a snapshot of the cluster state.
    ///
    /// # Errors
    /// Returns an error if the backup fails.
    fn backup(&self) -> Result<(), BackupError>;

    /// Restore the latest snapshot over the cluster state.
    ///
    /// # Errors
    /// Returns an error if the restore fails.
    fn restore_latest(&self) -> Result<(), BackupError>;

    /// List snapshots, oldest first.
    ///
    /// # Errors
    /// Returns an error if listing fails or the output cannot be parsed.
    fn list(&self) -> Result<Vec<Snapshot>, BackupError>;
}

/// [`SnapshotStore`] backed by the `restic` CLI.
pub struct Restic {
    runner: Arc<dyn CommandRunner>,
    config: BackupConfig,
    cache_dir: PathBuf,
}

impl Restic {
    pub fn new(runner: Arc<dyn CommandRunner>, config: BackupConfig) -> Self {
        Self {
            runner,
            config,
            cache_dir: PathBuf::from(RESTIC_CACHE_DIR),
        }
    }

    /// Use a different restic cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::new("restic").args(args).envs([
            ("RESTIC_PASSWORD", self.config.password.as_str()),
            ("RESTIC_REPOSITORY", self.config.repository_url.as_str()),
            ("AWS_ACCESS_KEY_ID", self.config.access_key_id.as_str()),
            ("AWS_SECRET_ACCESS_KEY", self.config.secret_access_key.as_str()),
        ])
    }

    fn cache_dir(&self) -> String {
        self.cache_dir.display().to_string()
    }
}

impl SnapshotStore for Restic {
    fn init(&self) -> Result<(), BackupError> {
        let command = self.command(["init".to_string(), "--cache-dir".to_string(), self.cache_dir()]);
        match self.runner.run(&command) {
            Ok(_) => Ok(()),
            Err(e) if e.output().contains("already initialized") => {
                debug!("restic repository already initialized");
                Ok(())
            }
            Err(e) => Err(BackupError::Init(e)),
        }
    }

    fn backup(&self) -> Result<(), BackupError> {
        let mut args = vec!["backup".to_string(), "--cache-dir".to_string(), self.cache_dir()];
        for exclude in EXCLUDES {
            args.extend(["--exclude".to_string(), exclude.to_string()]);
        }
        args.push(BACKUP_DIR.to_string());

        self.runner
            .run(&self.command(args))
            .map_err(BackupError::Backup)?;
        Ok(())
    }

    fn restore_latest(&self) -> Result<(), BackupError> {
        let command = self.command([
            "restore".to_string(),
            "latest".to_string(),
            "--cache-dir".to_string(),
            self.cache_dir(),
            "--target".to_string(),
            "/".to_string(),
            "--path".to_string(),
            BACKUP_DIR.to_string(),
        ]);
        self.runner.run(&command).map_err(BackupError::Restore)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Snapshot>, BackupError> {
        let out = self
            .runner
            .run(&self.command(["--json", "snapshots"]))
            .map_err(BackupError::List)?;
        // dry runs produce no output
        if out.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&out)?)
    }
}

/// What [`ensure_bootstrapped`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Agents never bootstrap from backup.
    NotMaster,
    /// The marker already existed.
    AlreadyBootstrapped,
    /// New cluster; the marker was written.
    Bootstrapped,
    /// The latest snapshot was restored.
    Restored { snapshot: String },
}

/// One-time master bootstrap/restore decision.
///
/// Runs only on masters whose `marker` does not exist: initializes the
/// repository, then either writes the marker (`bootstrap`) or restores the
/// latest snapshot, whose tree contains the marker.
///
/// # Errors
/// Returns an error if any repository operation fails, if there is no
/// snapshot to restore, or if the marker cannot be written.
pub fn ensure_bootstrapped(
    store: &dyn SnapshotStore,
    role: Role,
    bootstrap: bool,
    marker: &Path,
) -> Result<BootstrapOutcome, BackupError> {
    if role != Role::Master {
        return Ok(BootstrapOutcome::NotMaster);
    }
    if marker.exists() {
        debug!(marker = %marker.display(), "node already bootstrapped");
        return Ok(BootstrapOutcome::AlreadyBootstrapped);
    }

    store.init()?;

    if bootstrap {
        if let Some(dir) = marker.parent() {
            std::fs::create_dir_all(dir).map_err(|source| BackupError::Marker {
                path: marker.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(marker, b"").map_err(|source| BackupError::Marker {
            path: marker.to_path_buf(),
            source,
        })?;
        info!("Bootstrap mode, marked node as bootstrapped");
        return Ok(BootstrapOutcome::Bootstrapped);
    }

    let snapshots = store.list()?;
    let latest = snapshots
        .iter()
        .max_by_key(|s| s.time)
        .ok_or(BackupError::NoSnapshots)?;

    info!(snapshot = %latest.short_id, time = %latest.time, "Restoring latest snapshot from backup");
    store.restore_latest()?;
    info!("Snapshot restored");

    Ok(BootstrapOutcome::Restored {
        snapshot: latest.short_id.clone(),
    })
}

/// Run a backup every `period`, starting one period from now.
///
/// Each backup runs on the blocking pool so the runtime keeps serving
/// timers and signals meanwhile. Failures are logged and the schedule
/// continues. Abort the returned handle to stop it; a backup already in
/// progress runs to completion.
pub fn spawn_schedule(store: Arc<dyn SnapshotStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!("Running periodic backup");
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.backup()).await {
                Ok(Ok(())) => info!("Periodic backup completed"),
                Ok(Err(e)) => error!(error = %e, "Error running periodic backup"),
                Err(e) => error!(error = %e, "Periodic backup task failed"),
            }
        }
    })
}
