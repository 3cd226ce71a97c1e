//! Per-node-type configuration: the candidate binaries and files for every
//! component role, plus locating the benchmark for a Kubernetes version.

use crate::error::ConfigError;
use crate::model::NodeType;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub master: Option<NodeConfig>,
    #[serde(default)]
    pub node: Option<NodeConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(flatten)]
    pub roles: BTreeMap<String, RoleConfig>,
}

/// Candidates for one component role, per fact category.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub bins: Vec<String>,
    pub optional: Option<bool>,
    pub defaultbin: Option<String>,
    #[serde(default)]
    pub confs: Vec<String>,
    pub defaultconf: Option<String>,
    #[serde(default)]
    pub svc: Vec<String>,
    pub defaultsvc: Option<String>,
    #[serde(default)]
    pub kubeconfig: Vec<String>,
    pub defaultkubeconfig: Option<String>,
    #[serde(default)]
    pub cafile: Vec<String>,
    pub defaultcafile: Option<String>,
}

impl RoleConfig {
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }

    /// Lays `overlay` over this role key by key: lists the overlay sets
    /// replace ours, defaults it sets win, everything else is kept.
    fn merge(&mut self, overlay: RoleConfig) {
        fn list(base: &mut Vec<String>, overlay: Vec<String>) {
            if !overlay.is_empty() {
                *base = overlay;
            }
        }
        fn value<T>(base: &mut Option<T>, overlay: Option<T>) {
            if overlay.is_some() {
                *base = overlay;
            }
        }
        list(&mut self.bins, overlay.bins);
        list(&mut self.confs, overlay.confs);
        list(&mut self.svc, overlay.svc);
        list(&mut self.kubeconfig, overlay.kubeconfig);
        list(&mut self.cafile, overlay.cafile);
        value(&mut self.optional, overlay.optional);
        value(&mut self.defaultbin, overlay.defaultbin);
        value(&mut self.defaultconf, overlay.defaultconf);
        value(&mut self.defaultsvc, overlay.defaultsvc);
        value(&mut self.defaultkubeconfig, overlay.defaultkubeconfig);
        value(&mut self.defaultcafile, overlay.defaultcafile);
    }
}

impl Config {
    pub fn from_yaml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        debug!(path = %path.display(), "loaded config file");
        Self::from_yaml(path, &text)
    }

    /// Merges a version-specific `config.yaml` from `dir` on top of this one.
    /// A missing overlay is not an error.
    pub fn merge_overlay(&mut self, dir: &Path) -> Result<(), ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            debug!(dir = %dir.display(), "no version-specific config.yaml");
            return Ok(());
        }
        let overlay = Self::load(&path)?;
        info!(path = %path.display(), "using version-specific config file");
        merge_node(&mut self.master, overlay.master);
        merge_node(&mut self.node, overlay.node);
        Ok(())
    }

    pub fn node(&self, node_type: NodeType) -> Result<&NodeConfig, ConfigError> {
        let section = match node_type {
            NodeType::Master => self.master.as_ref(),
            NodeType::Node => self.node.as_ref(),
        };
        section.ok_or_else(|| ConfigError::MissingNodeSection(node_type.to_string()))
    }
}

fn merge_node(base: &mut Option<NodeConfig>, overlay: Option<NodeConfig>) {
    let Some(overlay) = overlay else { return };
    match base {
        None => *base = Some(overlay),
        Some(base) => {
            if !overlay.components.is_empty() {
                base.components = overlay.components;
            }
            for (name, role) in overlay.roles {
                base.roles.entry(name).or_default().merge(role);
            }
        }
    }
}

/// Finds `<cfg_dir>/<version>`, stepping the minor version down until a
/// directory exists (`1.13` -> `1.12` -> ... -> `1.0`).
pub fn benchmark_dir(cfg_dir: &Path, version: &str) -> Result<PathBuf, ConfigError> {
    let (major, minor) = parse_version(version)?;
    for m in (0..=minor).rev() {
        let candidate = cfg_dir.join(format!("{}.{}", major, m));
        if candidate.is_dir() {
            if m != minor {
                info!(requested = version, using = %candidate.display(), "no exact benchmark version; falling back");
            }
            return Ok(candidate);
        }
    }
    Err(ConfigError::BenchmarkNotFound { dir: cfg_dir.to_path_buf(), version: version.to_string() })
}

/// Loads `<cfg_dir>/config.yaml`, locates the benchmark directory for
/// `version` and merges its overlay. Returns the config and that directory.
pub fn load_for_version(cfg_dir: &Path, version: &str) -> Result<(Config, PathBuf), ConfigError> {
    let mut config = Config::load(&cfg_dir.join(CONFIG_FILE))?;
    let dir = benchmark_dir(cfg_dir, version)?;
    config.merge_overlay(&dir)?;
    Ok((config, dir))
}

fn parse_version(version: &str) -> Result<(u32, u32), ConfigError> {
    let trimmed = version.trim().trim_start_matches('v');
    let mut parts = trimmed.split('.');
    let major = parts.next().and_then(|p| p.parse().ok());
    let minor = parts.next().and_then(|p| p.trim_end_matches('+').parse().ok());
    match (major, minor) {
        (Some(major), Some(minor)) => Ok((major, minor)),
        _ => Err(ConfigError::InvalidVersion(version.to_string())),
    }
}

/// Pulls the first `vMAJOR.MINOR` out of version output such as
/// `Server Version: v1.13.4` or `Kubernetes v1.12.1`.
pub fn extract_version(output: &str) -> Option<String> {
    let re = Regex::new(r"v(\d+)\.(\d+)").ok()?;
    let caps = re.captures(output)?;
    Some(format!("{}.{}", &caps[1], &caps[2]))
}

/// Asks `kubectl`, then `kubelet`, which version is running.
pub fn detect_version() -> Result<String, ConfigError> {
    let probes: [(&str, &[&str]); 2] = [("kubectl", &["version", "--short"]), ("kubelet", &["--version"])];
    for (program, args) in probes {
        match Command::new(program).args(args).output() {
            Ok(output) => {
                let text = String::from_utf8_lossy(&output.stdout);
                if let Some(version) = extract_version(&text) {
                    info!(program, version = %version, "detected Kubernetes version");
                    return Ok(version);
                }
                debug!(program, "no version in output");
            }
            Err(e) => debug!(program, error = %e, "version probe failed"),
        }
    }
    Err(ConfigError::VersionUndetected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
master:
  components: [apiserver, scheduler]
  apiserver:
    bins: ["kube-apiserver", "hyperkube apiserver"]
    confs: ["/etc/kubernetes/manifests/kube-apiserver.yaml"]
  scheduler:
    bins: [kube-scheduler]
    optional: true
node:
  components: [kubelet]
  kubelet:
    bins: [kubelet]
    defaultkubeconfig: /etc/kubernetes/kubelet.conf
"#;

    #[test]
    fn parses_roles_and_components() {
        let cfg = Config::from_yaml(Path::new("config.yaml"), BASE).unwrap();
        let master = cfg.node(NodeType::Master).unwrap();
        assert_eq!(master.components, vec!["apiserver", "scheduler"]);
        assert_eq!(master.roles["apiserver"].bins.len(), 2);
        assert!(master.roles["scheduler"].is_optional());
        assert!(!master.roles["apiserver"].is_optional());
        let node = cfg.node(NodeType::Node).unwrap();
        assert_eq!(node.roles["kubelet"].defaultkubeconfig.as_deref(), Some("/etc/kubernetes/kubelet.conf"));
    }

    #[test]
    fn missing_section_is_a_config_error() {
        let cfg = Config::from_yaml(Path::new("c"), "node:\n  components: []\n").unwrap();
        assert!(matches!(cfg.node(NodeType::Master), Err(ConfigError::MissingNodeSection(s)) if s == "master"));
    }

    #[test]
    fn overlay_replaces_roles_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "node:\n  kubelet:\n    bins: [kubelet, hyperkube]\n    svc: [/lib/systemd/system/kubelet.service]\n  proxy:\n    bins: [kube-proxy]\nmaster:\n  scheduler:\n    defaultconf: /etc/kubernetes/scheduler.conf\n",
        )
        .unwrap();
        let mut cfg = Config::from_yaml(Path::new("c"), BASE).unwrap();
        cfg.merge_overlay(dir.path()).unwrap();
        let node = cfg.node(NodeType::Node).unwrap();
        assert_eq!(node.components, vec!["kubelet"]);
        let kubelet = &node.roles["kubelet"];
        assert_eq!(kubelet.bins, vec!["kubelet", "hyperkube"]);
        assert_eq!(kubelet.svc, vec!["/lib/systemd/system/kubelet.service"]);
        assert_eq!(kubelet.defaultkubeconfig.as_deref(), Some("/etc/kubernetes/kubelet.conf"));
        assert_eq!(node.roles["proxy"].bins, vec!["kube-proxy"]);

        let master = cfg.node(NodeType::Master).unwrap();
        assert_eq!(master.roles["apiserver"].confs, vec!["/etc/kubernetes/manifests/kube-apiserver.yaml"]);
        let scheduler = &master.roles["scheduler"];
        assert_eq!(scheduler.bins, vec!["kube-scheduler"]);
        assert!(scheduler.is_optional());
        assert_eq!(scheduler.defaultconf.as_deref(), Some("/etc/kubernetes/scheduler.conf"));
    }

    #[test]
    fn benchmark_dir_falls_back_to_lower_minor() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("1.11")).unwrap();
        assert_eq!(benchmark_dir(dir.path(), "1.13").unwrap(), dir.path().join("1.11"));
        assert_eq!(benchmark_dir(dir.path(), "v1.11").unwrap(), dir.path().join("1.11"));
        assert!(matches!(benchmark_dir(dir.path(), "1.10"), Err(ConfigError::BenchmarkNotFound { .. })));
        assert!(matches!(benchmark_dir(dir.path(), "latest"), Err(ConfigError::InvalidVersion(_))));
    }

    #[test]
    fn version_extraction() {
        assert_eq!(extract_version("Client Version: v1.14.0\nServer Version: v1.13.4").as_deref(), Some("1.14"));
        assert_eq!(extract_version("Kubernetes v1.12.1").as_deref(), Some("1.12"));
        assert_eq!(extract_version("command not found"), None);
    }
}
