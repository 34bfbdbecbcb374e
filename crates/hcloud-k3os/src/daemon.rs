//! Node configuration daemon.
//!
//! Resolves (or loads) the configuration, writes the OS and Kubernetes
//! artifacts, configures the network interfaces, runs the master
//! bootstrap/restore decision and then keeps the backup schedule running
//! until SIGINT or SIGTERM.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::backup::{self, ensure_bootstrapped, Restic, SnapshotStore, BACKUP_INTERVAL};
use crate::cache::ConfigCache;
use crate::model::{IpAddress, ResolvedConfiguration, Role};
use crate::net::{canonical_net, find_device_for_mac, SYS_CLASS_NET};
use crate::providers::ProviderApi;
use crate::render::Renderer;
use crate::resolver::Resolver;
use crate::retry::RetryPolicy;
use crate::runner::{Command, CommandRunner};

/// `ip` exits with this code while the IPv6 gateway is not reachable yet.
const IP_ROUTE_NOT_READY: i32 = 2;

/// Filesystem locations used by the daemon.
#[derive(Debug, Clone)]
pub struct Paths {
    /// State directory holding the cache, marker and restic cache.
    pub state_dir: PathBuf,
    pub cache_file: PathBuf,
    /// Exists while the daemon is up.
    pub liveness_marker: PathBuf,
    pub restic_cache_dir: PathBuf,
    pub bootstrap_marker: PathBuf,
    pub k3os_config: PathBuf,
    /// k3s auto-deploy manifests.
    pub manifests_dir: PathBuf,
    pub iptables_v4: PathBuf,
    pub iptables_v6: PathBuf,
    pub resolv_conf: PathBuf,
    pub sys_class_net: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/hcloud-k3os"),
            cache_file: PathBuf::from(crate::cache::DEFAULT_CACHE_PATH),
            liveness_marker: PathBuf::from("/var/lib/hcloud-k3os/.running"),
            restic_cache_dir: PathBuf::from(backup::RESTIC_CACHE_DIR),
            bootstrap_marker: PathBuf::from(backup::BOOTSTRAPPED_MARKER),
            k3os_config: PathBuf::from("/var/lib/rancher/k3os/config.d/hcloud-k3os.yaml"),
            manifests_dir: PathBuf::from("/var/lib/rancher/k3s/server/manifests"),
            iptables_v4: PathBuf::from("/etc/iptables/rules-save"),
            iptables_v6: PathBuf::from("/etc/iptables/rules6-save"),
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            sys_class_net: PathBuf::from(SYS_CLASS_NET),
        }
    }
}

impl Paths {
    /// Every default path re-rooted under `root`.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        let reroot = |p: PathBuf| root.join(p.strip_prefix("/").unwrap_or(p.as_path()));
        let d = Self::default();
        Self {
            state_dir: reroot(d.state_dir),
            cache_file: reroot(d.cache_file),
            liveness_marker: reroot(d.liveness_marker),
            restic_cache_dir: reroot(d.restic_cache_dir),
            bootstrap_marker: reroot(d.bootstrap_marker),
            k3os_config: reroot(d.k3os_config),
            manifests_dir: reroot(d.manifests_dir),
            iptables_v4: reroot(d.iptables_v4),
            iptables_v6: reroot(d.iptables_v6),
            resolv_conf: reroot(d.resolv_conf),
            sys_class_net: reroot(d.sys_class_net),
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn ip(args: &[&str]) -> Command {
    Command::new("ip").args(args.iter().copied())
}

/// Runs the node workflow against a command runner.
pub struct Daemon {
    runner: Arc<dyn CommandRunner>,
    renderer: Renderer,
    paths: Paths,
    ipv6_route_retry: RetryPolicy,
    ipv6_settle: Duration,
}

impl Daemon {
    /// Create a daemon.
    ///
    /// # Errors
    /// Returns an error if the embedded templates do not parse.
    pub fn new(runner: Arc<dyn CommandRunner>, paths: Paths) -> Result<Self> {
        Ok(Self {
            runner,
            renderer: Renderer::new().context("Failed to load templates")?,
            paths,
            ipv6_route_retry: RetryPolicy::default(),
            ipv6_settle: Duration::from_secs(3),
        })
    }

    /// Override the IPv6 default route retry and the wait before it.
    #[must_use]
    pub fn with_ipv6_timing(mut self, retry: RetryPolicy, settle: Duration) -> Self {
        self.ipv6_route_retry = retry;
        self.ipv6_settle = settle;
        self
    }

    #[must_use]
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Create state directories and drop a stale liveness marker.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be created.
    pub fn prepare(&self) -> Result<()> {
        for dir in [&self.paths.state_dir, &self.paths.restic_cache_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("error creating {}", dir.display()))?;
        }
        if let Some(dir) = self.paths.k3os_config.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("error creating {}", dir.display()))?;
        }
        match std::fs::remove_file(&self.paths.liveness_marker) {
            Ok(()) => debug!("Removed stale liveness marker"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(error = %e, "Error deleting .running file"),
        }
        Ok(())
    }

    /// Resolve the configuration with a temporary DHCP lease on the public
    /// interface, falling back to the cache.
    ///
    /// # Errors
    /// Returns an error if resolution fails and no cached configuration exists.
    pub async fn acquire_config<P: ProviderApi>(
        &self,
        resolver: &Resolver<P>,
        cache: &ConfigCache,
    ) -> Result<ResolvedConfiguration> {
        let dhcp = Command::new("dhcpcd").args(["--ipv4only", "--noarp", "eth0"]);
        if let Err(e) = self.runner.run(&dhcp) {
            warn!(error = %e, "error configuring eth0 with DHCP");
        }

        let result = cache.refresh(resolver).await;

        let release = Command::new("dhcpcd").args(["--ipv4only", "--noarp", "--release", "eth0"]);
        if let Err(e) = self.runner.run(&release) {
            error!(error = %e, "error releasing eth0 from DHCP");
        }

        result
    }

    /// Replace the private device placeholder with the device that carries
    /// the private network's MAC address.
    pub fn localize(&self, config: &mut ResolvedConfiguration) {
        let private = &mut config.node_config.private_network;
        let Some(mac) = private.mac_address.as_deref() else {
            return;
        };
        match find_device_for_mac(&self.paths.sys_class_net, mac) {
            Ok(device) => private.net_device_name = device,
            Err(e) => warn!(
                error = %e,
                device = %private.net_device_name,
                "Keeping default private network device"
            ),
        }
    }

    /// Write the k3OS config, DNS and firewall rules and deploy the
    /// Kubernetes overlays. Each failure is logged; the rest still runs.
    pub fn write_artifacts(&self, config: &ResolvedConfiguration) {
        info!("Generating and writing configuration files");

        let files = [
            ("k3os config", &self.paths.k3os_config, self.renderer.k3os_config(config)),
            ("DNS config", &self.paths.resolv_conf, self.renderer.resolv_conf()),
            ("iptables config", &self.paths.iptables_v4, self.renderer.iptables_v4(config)),
            ("ip6tables config", &self.paths.iptables_v6, self.renderer.iptables_v6()),
        ];
        for (what, path, rendered) in files {
            let result = rendered
                .map_err(anyhow::Error::from)
                .and_then(|content| write_file(path, &content));
            if let Err(e) = result {
                error!(error = %format!("{e:#}"), "Error generating {what}");
            }
        }

        if let Err(e) = self.deploy_overlays(config) {
            error!(error = %format!("{e:#}"), "Error deploying Kubernetes manifests");
        }
    }

    fn deploy_overlays(&self, config: &ResolvedConfiguration) -> Result<()> {
        let overlays = self.renderer.overlays(config)?;
        let workdir = tempfile::Builder::new()
            .suffix("-hcloud-k3os")
            .tempdir()
            .context("Error creating temp dir")?;
        std::fs::create_dir_all(&self.paths.manifests_dir).with_context(|| {
            format!("error creating {}", self.paths.manifests_dir.display())
        })?;

        for overlay in &overlays {
            let dir = match overlay.write_to(workdir.path()) {
                Ok(dir) => dir,
                Err(e) => {
                    error!(overlay = overlay.name, error = %e, "Error generating overlay");
                    continue;
                }
            };
            let kustomize = Command::new("kubectl")
                .args(["kustomize".to_string(), dir.display().to_string()])
                .stdout_to(self.paths.manifests_dir.join(overlay.manifest_name()));
            match self.runner.run(&kustomize) {
                Ok(_) => debug!(overlay = overlay.name, "Deployed overlay"),
                Err(e) => error!(overlay = overlay.name, error = %e, "Error running kustomize"),
            }
        }
        Ok(())
    }

    /// Reset the `eth*` interfaces and configure public and private
    /// addressing. A failing group is logged and the next one still runs.
    pub async fn configure_network(&self, config: &ResolvedConfiguration) {
        info!("Resetting network interfaces");
        if let Err(e) = self.runner.run_all(&self.reset_commands()) {
            error!(error = %e, "Error resetting network interfaces");
        }

        info!("Configuring public IPv4");
        if let Err(e) = self.runner.run_all(&public_ipv4_commands(config)) {
            error!(error = %e, "Error configuring public IPv4");
        }

        info!("Configuring public IPv6");
        if let Err(e) = self.runner.run_all(&public_ipv6_commands(config)) {
            error!(error = %e, "Error configuring public IPv6");
        }
        tokio::time::sleep(self.ipv6_settle).await;
        if let Some(route) = ipv6_default_route(config) {
            self.add_ipv6_default_route(&route).await;
        }

        info!("Configuring private network");
        if let Err(e) = self.runner.run_all(&private_network_commands(config)) {
            error!(error = %e, "Error configuring private network");
        }

        info!("Configuration successful!");
    }

    async fn add_ipv6_default_route(&self, route: &Command) {
        let max_attempts = self.ipv6_route_retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.runner.run(route) {
                Ok(_) => return,
                Err(e) if e.exit_code() == Some(IP_ROUTE_NOT_READY) && attempt < max_attempts => {
                    debug!(attempt, "IPv6 not ready yet, retrying default route");
                    tokio::time::sleep(self.ipv6_route_retry.delay).await;
                }
                Err(e) => {
                    error!(error = %e, "Error adding IPv6 default route");
                    return;
                }
            }
        }
    }

    fn reset_commands(&self) -> Vec<Command> {
        let mut devices: Vec<String> = std::fs::read_dir(&self.paths.sys_class_net)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter_map(|e| e.file_name().into_string().ok())
                    .filter(|name| name.starts_with("eth"))
                    .collect()
            })
            .unwrap_or_default();
        devices.sort();

        devices
            .iter()
            .flat_map(|dev| {
                [
                    ip(&["link", "set", "down", dev]),
                    ip(&["addr", "flush", "dev", dev]),
                    ip(&["link", "set", "up", dev]),
                ]
            })
            .collect()
    }

    /// One-time master bootstrap/restore decision.
    ///
    /// A dry runner never lists real snapshots, so the decision is only
    /// logged.
    ///
    /// # Errors
    /// Returns an error if the repository cannot be prepared or restored.
    pub fn bootstrap(&self, config: &ResolvedConfiguration, store: &dyn SnapshotStore) -> Result<()> {
        if self.runner.is_dry() {
            let pending = config.node_config.role == Role::Master
                && !self.paths.bootstrap_marker.exists();
            let action = match (pending, config.cluster_config.bootstrap) {
                (false, _) => "nothing",
                (true, true) => "initialize repository and mark node as bootstrapped",
                (true, false) => "initialize repository and restore latest snapshot",
            };
            info!(role = %config.node_config.role, action, "Dry run, skipping bootstrap decision");
            return Ok(());
        }

        let outcome = ensure_bootstrapped(
            store,
            config.node_config.role,
            config.cluster_config.bootstrap,
            &self.paths.bootstrap_marker,
        )
        .context("Unable to bootstrap node")?;
        debug!(?outcome, "bootstrap decision");
        Ok(())
    }

    /// Snapshot store for the cluster's backup repository.
    #[must_use]
    pub fn snapshot_store(&self, config: &ResolvedConfiguration) -> Restic {
        Restic::new(self.runner.clone(), config.cluster_config.backup_config.clone())
            .with_cache_dir(&self.paths.restic_cache_dir)
    }

    /// Run the whole workflow until a termination signal arrives.
    ///
    /// # Errors
    /// Returns an error if no configuration can be obtained or the master
    /// bootstrap fails.
    pub async fn run<P: ProviderApi>(&self, resolver: &Resolver<P>) -> Result<()> {
        self.prepare()?;

        let cache = ConfigCache::new(&self.paths.cache_file);
        let mut config = self
            .acquire_config(resolver, &cache)
            .await
            .context("Loading config failed")?;
        self.localize(&mut config);

        self.write_artifacts(&config);
        self.configure_network(&config).await;

        let store: Arc<dyn SnapshotStore> = Arc::new(self.snapshot_store(&config));
        self.bootstrap(&config, store.as_ref())?;

        let schedule = backup::spawn_schedule(store, BACKUP_INTERVAL);

        if let Err(e) = write_file(&self.paths.liveness_marker, "") {
            error!(error = %format!("{e:#}"), "Error creating .running file");
        }

        shutdown_signal().await?;
        info!("Shutdown signal received");

        schedule.abort();
        if let Err(e) = std::fs::remove_file(&self.paths.liveness_marker) {
            error!(error = %e, "Error deleting .running file");
        }
        Ok(())
    }
}

fn address_list(addresses: &[IpAddress], family: &str, device: &str) -> Vec<Command> {
    addresses
        .iter()
        .map(|a| ip(&[family, "addr", "add", &a.net.to_string(), "dev", device]))
        .collect()
}

/// Public IPv4 addresses, on-link route to the gateway and default route.
#[must_use]
pub fn public_ipv4_commands(config: &ResolvedConfiguration) -> Vec<Command> {
    let public = &config.node_config.public_network;
    let device = public.net_device_name.as_str();
    let gateway = public.gateway_ipv4.to_string();

    let mut commands = address_list(&public.ipv4_addresses, "-4", device);
    if let Some(primary) = public.primary_ipv4() {
        let src = primary.net.addr().to_string();
        commands.push(ip(&["-4", "route", "add", &gateway, "dev", device, "src", &src]));
    }
    commands.push(ip(&["-4", "route", "add", "default", "via", &gateway]));
    commands
}

/// Public IPv6 addresses; the default route is added separately.
#[must_use]
pub fn public_ipv6_commands(config: &ResolvedConfiguration) -> Vec<Command> {
    let public = &config.node_config.public_network;
    address_list(&public.ipv6_addresses, "-6", &public.net_device_name)
}

/// IPv6 default route via the link-local gateway.
#[must_use]
pub fn ipv6_default_route(config: &ResolvedConfiguration) -> Option<Command> {
    let public = &config.node_config.public_network;
    let src = public.primary_ipv6()?.net.addr().to_string();
    Some(ip(&[
        "-6",
        "route",
        "add",
        "default",
        "via",
        &public.gateway_ipv6.to_string(),
        "src",
        &src,
        "dev",
        &public.net_device_name,
    ]))
}

/// Private address as /32, route to the gateway and route to the network.
#[must_use]
pub fn private_network_commands(config: &ResolvedConfiguration) -> Vec<Command> {
    let private = &config.node_config.private_network;
    let device = private.net_device_name.as_str();
    let gateway = private.gateway_ipv4.to_string();
    let network = canonical_net(private.ipv4_address.into()).to_string();

    vec![
        ip(&["-4", "addr", "add", &format!("{}/32", private.ipv4_address.addr()), "dev", device]),
        ip(&["-4", "route", "add", &gateway, "dev", device]),
        ip(&["-4", "route", "add", &network, "via", &gateway]),
    ]
}

/// Wait for SIGINT or SIGTERM.
///
/// # Errors
/// Returns an error if the signal handlers cannot be installed.
pub async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = signal::ctrl_c() => result.context("failed to install Ctrl+C handler")?,
        _ = terminate.recv() => {},
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;
    use crate::runner::testing::{failed, RecordingRunner};
    use crate::runner::SystemRunner;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fake_device(root: &Path, name: &str, mac: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("address"), format!("{mac}\n")).unwrap();
    }

    fn daemon(root: &Path, runner: Arc<RecordingRunner>) -> Daemon {
        Daemon::new(runner, Paths::under(root))
            .unwrap()
            .with_ipv6_timing(
                RetryPolicy {
                    max_attempts: 3,
                    delay: Duration::ZERO,
                },
                Duration::ZERO,
            )
    }

    #[test]
    fn test_paths_under_root() {
        let paths = Paths::under(Path::new("/tmp/root"));
        assert_eq!(paths.cache_file, Path::new("/tmp/root/var/lib/hcloud-k3os/config.yaml"));
        assert_eq!(paths.resolv_conf, Path::new("/tmp/root/etc/resolv.conf"));
    }

    #[test]
    fn test_public_ipv4_commands() {
        let lines: Vec<String> = public_ipv4_commands(&fixtures::master_config())
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            lines,
            [
                "ip -4 addr add 95.216.1.2/32 dev eth0",
                "ip -4 addr add 1.2.3.4/32 dev eth0",
                "ip -4 route add 172.31.1.1 dev eth0 src 95.216.1.2",
                "ip -4 route add default via 172.31.1.1",
            ]
        );
    }

    #[test]
    fn test_ipv6_commands() {
        let config = fixtures::master_config();
        let lines: Vec<String> = public_ipv6_commands(&config)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(lines, ["ip -6 addr add 2a01:4f9:c010:1234::1/64 dev eth0"]);
        assert_eq!(
            ipv6_default_route(&config).unwrap().to_string(),
            "ip -6 route add default via fe80::1 src 2a01:4f9:c010:1234::1 dev eth0"
        );
    }

    #[test]
    fn test_private_network_commands() {
        let mut config = fixtures::master_config();
        config.node_config.private_network.net_device_name = "ens10".to_string();
        let lines: Vec<String> = private_network_commands(&config)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            lines,
            [
                "ip -4 addr add 10.0.0.5/32 dev ens10",
                "ip -4 route add 10.0.0.1 dev ens10",
                "ip -4 route add 10.0.0.0/24 via 10.0.0.1",
            ]
        );
    }

    #[test]
    fn test_localize_private_device() {
        let tmp = tempfile::tempdir().unwrap();
        let d = daemon(tmp.path(), Arc::new(RecordingRunner::ok()));
        fake_device(&d.paths().sys_class_net, "eth0", "96:00:00:11:22:33");
        fake_device(&d.paths().sys_class_net, "ens10", "86:00:00:2A:7D:E0");

        let mut config = fixtures::master_config();
        d.localize(&mut config);
        assert_eq!(config.node_config.private_network.net_device_name, "ens10");

        config.node_config.private_network.net_device_name = "eth1".to_string();
        config.node_config.private_network.mac_address = Some("de:ad:be:ef:00:01".to_string());
        d.localize(&mut config);
        assert_eq!(config.node_config.private_network.net_device_name, "eth1");
    }

    #[test]
    fn test_write_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::ok());
        let d = daemon(tmp.path(), runner.clone());

        d.write_artifacts(&fixtures::master_config());

        let paths = d.paths();
        let k3os = std::fs::read_to_string(&paths.k3os_config).unwrap();
        assert!(k3os.contains("https://10.0.0.5:6443"));
        assert!(std::fs::read_to_string(&paths.resolv_conf)
            .unwrap()
            .contains("213.133.98.98"));
        assert!(std::fs::read_to_string(&paths.iptables_v4)
            .unwrap()
            .contains("10.0.0.0/24"));
        assert!(paths.iptables_v6.exists());

        let kustomize: Vec<String> = runner
            .lines()
            .into_iter()
            .filter(|l| l.starts_with("kubectl kustomize"))
            .collect();
        assert_eq!(kustomize.len(), 2);
        assert!(kustomize[0].ends_with("hcloud-csi.yaml"));
        assert!(kustomize[1].ends_with("hcloud-fip.yaml"));
    }

    #[tokio::test]
    async fn test_configure_network_continues_after_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::with(|cmd| {
            if cmd.args.first().map(String::as_str) == Some("-4") && cmd.args[1] == "addr" {
                Err(failed(cmd, 1, "RTNETLINK answers: File exists"))
            } else {
                Ok(String::new())
            }
        }));
        let d = daemon(tmp.path(), runner.clone());
        fake_device(&d.paths().sys_class_net, "eth0", "96:00:00:11:22:33");

        d.configure_network(&fixtures::master_config()).await;

        let lines = runner.lines();
        assert_eq!(&lines[..3], [
            "ip link set down eth0",
            "ip addr flush dev eth0",
            "ip link set up eth0",
        ]);
        // the public IPv4 group stopped at its first command
        assert!(!lines.iter().any(|l| l.contains("route add default via 172.31.1.1")));
        assert!(lines.iter().any(|l| l.starts_with("ip -6 route add default")));
        assert!(lines.iter().any(|l| l == "ip -4 addr add 10.0.0.5/32 dev eth1"));
    }

    #[tokio::test]
    async fn test_ipv6_default_route_retries_while_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let runner = Arc::new(RecordingRunner::with(move |cmd| {
            if cmd.to_string().starts_with("ip -6 route add default") {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    return Err(failed(cmd, 2, "RTNETLINK answers: No route to host"));
                }
            }
            Ok(String::new())
        }));
        let d = daemon(tmp.path(), runner);

        d.configure_network(&fixtures::master_config()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ipv6_default_route_other_errors_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let runner = Arc::new(RecordingRunner::with(move |cmd| {
            if cmd.to_string().starts_with("ip -6 route add default") {
                counter.fetch_add(1, Ordering::SeqCst);
                return Err(failed(cmd, 1, "Error: invalid argument"));
            }
            Ok(String::new())
        }));
        let d = daemon(tmp.path(), runner);

        d.configure_network(&fixtures::master_config()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prepare_removes_stale_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let d = daemon(tmp.path(), Arc::new(RecordingRunner::ok()));
        write_file(&d.paths().liveness_marker, "").unwrap();

        d.prepare().unwrap();
        assert!(!d.paths().liveness_marker.exists());
        assert!(d.paths().restic_cache_dir.is_dir());
        assert!(d.paths().k3os_config.parent().unwrap().is_dir());
    }

    #[test]
    fn test_bootstrap_master_in_bootstrap_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::ok());
        let d = daemon(tmp.path(), runner.clone());
        let mut config = fixtures::master_config();
        config.cluster_config.bootstrap = true;

        let store = d.snapshot_store(&config);
        d.bootstrap(&config, &store).unwrap();

        assert!(d.paths().bootstrap_marker.exists());
        assert_eq!(runner.lines().len(), 1);
        assert!(runner.lines()[0].starts_with("restic init --cache-dir"));
    }

    #[test]
    fn test_dry_run_skips_bootstrap_decision() {
        let tmp = tempfile::tempdir().unwrap();
        let d = Daemon::new(Arc::new(SystemRunner::new(true)), Paths::under(tmp.path())).unwrap();
        let config = fixtures::master_config();

        let store = d.snapshot_store(&config);
        d.bootstrap(&config, &store).unwrap();
        assert!(!d.paths().bootstrap_marker.exists());
    }

    #[test]
    fn test_bootstrap_join_mode_without_snapshots_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let d = daemon(tmp.path(), Arc::new(RecordingRunner::ok()));
        let config = fixtures::master_config();

        let store = d.snapshot_store(&config);
        let err = d.bootstrap(&config, &store).unwrap_err();
        assert!(format!("{err:#}").contains("does not have any snapshots"));
    }
}
