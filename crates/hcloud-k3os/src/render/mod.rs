//! Renders the resolved configuration into OS and Kubernetes artifacts.
//!
//! Text artifacts are Handlebars templates embedded in the binary; the k3OS
//! config is serialized directly. Kubernetes manifests are produced as
//! kustomize overlays which the daemon builds with `kubectl kustomize`.

mod k3os;
mod templates;

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use handlebars::Handlebars;
use serde_json::json;
use thiserror::Error;

use crate::model::{ResolvedConfiguration, Role};
use crate::net::canonical_net;

pub use k3os::k3s_args;

/// Errors from rendering.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("error parsing template: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),

    #[error("error executing template: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("error marshalling k3os config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("error encoding JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("error writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A kustomize directory: a name and its files, `kustomization.yaml` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub name: &'static str,
    pub files: Vec<(&'static str, String)>,
}

impl Overlay {
    /// Write the overlay into `<parent>/<name>` and return that directory.
    ///
    /// # Errors
    /// Returns an error if the directory or a file cannot be written.
    pub fn write_to(&self, parent: &Path) -> Result<PathBuf, RenderError> {
        let dir = parent.join(self.name);
        std::fs::create_dir_all(&dir).map_err(|source| RenderError::Io {
            path: dir.clone(),
            source,
        })?;
        for (file, content) in &self.files {
            let path = dir.join(file);
            std::fs::write(&path, content).map_err(|source| RenderError::Io { path, source })?;
        }
        Ok(dir)
    }

    /// Name of the auto-deploy manifest built from this overlay.
    #[must_use]
    pub fn manifest_name(&self) -> String {
        format!("{}.yaml", self.name)
    }
}

/// Template registry for all rendered artifacts.
pub struct Renderer {
    handlebars: Handlebars<'static>,
}

impl Renderer {
    /// Create a renderer with the embedded templates.
    ///
    /// # Errors
    /// Returns an error if an embedded template does not parse.
    pub fn new() -> Result<Self, RenderError> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(true);

        for (name, template) in [
            ("resolv.conf", templates::RESOLV_CONF),
            ("iptables.v4", templates::IPTABLES_V4),
            ("iptables.v6", templates::IPTABLES_V6),
            ("hcloud-csi/secret", templates::HCLOUD_CSI_SECRET),
            ("hcloud-fip/config", templates::HCLOUD_FIP_CONFIG),
            ("flux/patch", templates::FLUX_PATCH),
            ("sealed-secrets/secret", templates::SEALED_SECRETS_SECRET),
        ] {
            handlebars
                .register_template_string(name, template)
                .map_err(Box::new)?;
        }

        Ok(Self { handlebars })
    }

    /// k3OS config file.
    ///
    /// # Errors
    /// Returns an error if YAML serialization fails.
    pub fn k3os_config(&self, config: &ResolvedConfiguration) -> Result<String, RenderError> {
        Ok(k3os::render(config)?)
    }

    /// `/etc/resolv.conf`.
    ///
    /// # Errors
    /// Returns an error if the template fails to render.
    pub fn resolv_conf(&self) -> Result<String, RenderError> {
        Ok(self.handlebars.render("resolv.conf", &json!({}))?)
    }

    /// IPv4 firewall rules, trusting the private network.
    ///
    /// # Errors
    /// Returns an error if the template fails to render.
    pub fn iptables_v4(&self, config: &ResolvedConfiguration) -> Result<String, RenderError> {
        let private = canonical_net(config.node_config.private_network.ipv4_address.into());
        Ok(self.handlebars.render(
            "iptables.v4",
            &json!({ "private_network": private.to_string() }),
        )?)
    }

    /// IPv6 firewall rules.
    ///
    /// # Errors
    /// Returns an error if the template fails to render.
    pub fn iptables_v6(&self) -> Result<String, RenderError> {
        Ok(self.handlebars.render("iptables.v6", &json!({}))?)
    }

    /// Kubernetes overlays for this node.
    ///
    /// The CSI driver and floating IP controller are rendered for every node;
    /// Flux and Sealed Secrets only on masters that have them configured.
    ///
    /// # Errors
    /// Returns an error if a template fails to render.
    pub fn overlays(&self, config: &ResolvedConfiguration) -> Result<Vec<Overlay>, RenderError> {
        let cluster = &config.cluster_config;
        let token = json!({ "token": cluster.hcloud_token });

        let mut overlays = vec![
            Overlay {
                name: "hcloud-csi",
                files: vec![
                    ("secret.yaml", self.handlebars.render("hcloud-csi/secret", &token)?),
                    (
                        "kustomization.yaml",
                        templates::HCLOUD_CSI_KUSTOMIZATION.to_string(),
                    ),
                ],
            },
            Overlay {
                name: "hcloud-fip",
                files: vec![
                    ("config.yaml", self.hcloud_fip_config(config)?),
                    (
                        "kustomization.yaml",
                        templates::HCLOUD_FIP_KUSTOMIZATION.to_string(),
                    ),
                ],
            },
        ];

        if config.node_config.role != Role::Master {
            return Ok(overlays);
        }

        if let Some(flux) = &cluster.flux_config {
            let data = json!({
                "git_url": flux.git_url,
                "identity": STANDARD.encode(&flux.git_private_key),
            });
            overlays.push(Overlay {
                name: "flux",
                files: vec![
                    ("patch.yaml", self.handlebars.render("flux/patch", &data)?),
                    ("kustomization.yaml", templates::FLUX_KUSTOMIZATION.to_string()),
                ],
            });
        }

        if let Some(sealed) = &cluster.sealed_secrets_config {
            let data = json!({
                "tls_cert": STANDARD.encode(&sealed.tls_cert),
                "tls_key": STANDARD.encode(&sealed.tls_key),
            });
            overlays.push(Overlay {
                name: "sealed-secrets",
                files: vec![
                    (
                        "secret.yaml",
                        self.handlebars.render("sealed-secrets/secret", &data)?,
                    ),
                    (
                        "kustomization.yaml",
                        templates::SEALED_SECRETS_KUSTOMIZATION.to_string(),
                    ),
                ],
            });
        }

        Ok(overlays)
    }

    fn hcloud_fip_config(&self, config: &ResolvedConfiguration) -> Result<String, RenderError> {
        let ips: Vec<String> = config
            .node_config
            .floating_ips
            .iter()
            .map(|a| a.net.addr().to_string())
            .collect();
        let data = json!({
            "token": config.cluster_config.hcloud_token,
            "floating_ips": serde_json::to_string(&ips)?,
        });
        Ok(self.handlebars.render("hcloud-fip/config", &data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{fixtures, FluxConfig, SealedSecretsConfig};

    fn names(overlays: &[Overlay]) -> Vec<&str> {
        overlays.iter().map(|o| o.name).collect()
    }

    fn file<'a>(overlay: &'a Overlay, name: &str) -> &'a str {
        overlay
            .files
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, c)| c.as_str())
            .unwrap()
    }

    #[test]
    fn test_resolv_conf() {
        let out = Renderer::new().unwrap().resolv_conf().unwrap();
        assert_eq!(out.lines().count(), 3);
        assert!(out.starts_with("nameserver 213.133.98.98\n"));
    }

    #[test]
    fn test_iptables_v4_trusts_private_network() {
        let out = Renderer::new()
            .unwrap()
            .iptables_v4(&fixtures::master_config())
            .unwrap();
        assert!(out.contains("-A TCP -s 10.0.0.0/24 -j ACCEPT"));
        assert!(out.contains("-A UDP -s 10.0.0.0/24 -j ACCEPT"));
        assert!(out.trim_end().ends_with("COMMIT"));
    }

    #[test]
    fn test_iptables_v6_has_raw_table() {
        let out = Renderer::new().unwrap().iptables_v6().unwrap();
        assert!(out.contains("*raw"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn test_overlays_without_optional_components() {
        let overlays = Renderer::new()
            .unwrap()
            .overlays(&fixtures::master_config())
            .unwrap();
        assert_eq!(names(&overlays), ["hcloud-csi", "hcloud-fip"]);

        assert!(file(&overlays[0], "secret.yaml").contains("token: hctoken"));
        let fip = file(&overlays[1], "config.yaml");
        assert!(fip.contains(r#""hcloud_floating_ips": ["1.2.3.4"],"#));
        assert!(fip.contains("HCLOUD_API_TOKEN: hctoken"));
    }

    #[test]
    fn test_fip_config_empty_list() {
        let overlays = Renderer::new()
            .unwrap()
            .overlays(&fixtures::agent_config())
            .unwrap();
        assert!(file(&overlays[1], "config.yaml").contains(r#""hcloud_floating_ips": [],"#));
    }

    #[test]
    fn test_master_overlays_with_flux_and_sealed_secrets() {
        let mut config = fixtures::master_config();
        config.cluster_config.flux_config =
            Some(FluxConfig::new("ssh://git@example.com/repo", "KEY"));
        config.cluster_config.sealed_secrets_config = Some(SealedSecretsConfig {
            tls_cert: "CERT".to_string(),
            tls_key: "TLSKEY".to_string(),
        });

        let overlays = Renderer::new().unwrap().overlays(&config).unwrap();
        assert_eq!(
            names(&overlays),
            ["hcloud-csi", "hcloud-fip", "flux", "sealed-secrets"]
        );

        let patch = file(&overlays[2], "patch.yaml");
        assert!(patch.contains("--git-url=ssh://git@example.com/repo"));
        // base64("KEY\n")
        assert!(patch.contains("identity: S0VZCg=="));

        let secret = file(&overlays[3], "secret.yaml");
        assert!(secret.contains("tls.crt: Q0VSVA=="));
        assert!(secret.contains("tls.key: VExTS0VZ"));
    }

    #[test]
    fn test_agent_never_gets_flux() {
        let mut config = fixtures::agent_config();
        config.cluster_config.flux_config =
            Some(FluxConfig::new("ssh://git@example.com/repo", "KEY"));

        let overlays = Renderer::new().unwrap().overlays(&config).unwrap();
        assert_eq!(names(&overlays), ["hcloud-csi", "hcloud-fip"]);
    }

    #[test]
    fn test_overlay_write_to() {
        let tmp = tempfile::tempdir().unwrap();
        let overlays = Renderer::new()
            .unwrap()
            .overlays(&fixtures::master_config())
            .unwrap();

        let dir = overlays[0].write_to(tmp.path()).unwrap();
        assert_eq!(dir, tmp.path().join("hcloud-csi"));
        assert!(dir.join("kustomization.yaml").exists());
        assert!(dir.join("secret.yaml").exists());
        assert_eq!(overlays[0].manifest_name(), "hcloud-csi.yaml");
    }
}
