//! Node fact resolution: which component binaries are running and which of
//! the candidate config, service, kubeconfig and CA files exist.

use crate::config::{NodeConfig, RoleConfig};
use crate::error::ConfigError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use sysinfo::System;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Binary,
    Config,
    Service,
    Kubeconfig,
    CaFile,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Binary,
        Category::Config,
        Category::Service,
        Category::Kubeconfig,
        Category::CaFile,
    ];

    /// Marker suffix used for this category's placeholders (`$<role><suffix>`).
    pub fn suffix(&self) -> &'static str {
        match self {
            Category::Binary => "bin",
            Category::Config => "conf",
            Category::Service => "svc",
            Category::Kubeconfig => "kubeconfig",
            Category::CaFile => "cafile",
        }
    }

    fn candidates<'a>(&self, role: &'a RoleConfig) -> (&'a [String], Option<&'a str>) {
        match self {
            Category::Binary => (role.bins.as_slice(), role.defaultbin.as_deref()),
            Category::Config => (role.confs.as_slice(), role.defaultconf.as_deref()),
            Category::Service => (role.svc.as_slice(), role.defaultsvc.as_deref()),
            Category::Kubeconfig => (role.kubeconfig.as_slice(), role.defaultkubeconfig.as_deref()),
            Category::CaFile => (role.cafile.as_slice(), role.defaultcafile.as_deref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fact {
    pub category: Category,
    pub role: String,
    pub value: String,
}

/// Resolved value (if any) for every configured role, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactSet {
    entries: BTreeMap<Category, BTreeMap<String, Option<String>>>,
}

impl FactSet {
    pub fn insert(&mut self, category: Category, role: impl Into<String>, value: Option<String>) {
        self.entries.entry(category).or_default().insert(role.into(), value);
    }

    pub fn get(&self, category: Category, role: &str) -> Option<&str> {
        self.entries.get(&category)?.get(role)?.as_deref()
    }

    pub fn facts(&self) -> impl Iterator<Item = Fact> + '_ {
        self.entries.iter().flat_map(|(category, roles)| {
            roles.iter().filter_map(move |(role, value)| {
                value.as_ref().map(|v| Fact { category: *category, role: role.clone(), value: v.clone() })
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcess {
    pub name: String,
    pub exe: Option<String>,
    pub cmd: Vec<String>,
}

impl RunningProcess {
    fn executable_is(&self, wanted: &str) -> bool {
        self.name == wanted
            || self.exe.as_deref().and_then(basename).as_deref() == Some(wanted)
            || self.cmd.first().and_then(|a| basename(a.as_str())).as_deref() == Some(wanted)
    }

    /// `candidate` is an executable name optionally followed by words that
    /// must all appear among the process arguments.
    pub fn matches(&self, candidate: &str) -> bool {
        let mut words = candidate.split_whitespace();
        let Some(program) = words.next() else { return false };
        self.executable_is(program) && words.all(|w| self.cmd.iter().skip(1).any(|a| a == w))
    }
}

fn basename(path: &str) -> Option<String> {
    Path::new(path).file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Source of the current process list.
pub trait ProcessTable {
    fn processes(&self) -> Vec<RunningProcess>;
}

/// The host's process table, read through `sysinfo`.
pub struct SystemProcesses;

impl ProcessTable for SystemProcesses {
    fn processes(&self) -> Vec<RunningProcess> {
        let system = System::new_all();
        system
            .processes()
            .values()
            .map(|p| RunningProcess {
                name: p.name().to_string(),
                exe: p.exe().map(|e| e.to_string_lossy().into_owned()),
                cmd: p.cmd().to_vec(),
            })
            .collect()
    }
}

pub struct FactResolver<'a> {
    config: &'a NodeConfig,
    processes: Vec<RunningProcess>,
}

impl<'a> FactResolver<'a> {
    /// Snapshots the process table once; every role is resolved against it.
    pub fn new(config: &'a NodeConfig, table: &dyn ProcessTable) -> Self {
        let processes = table.processes();
        debug!(count = processes.len(), "captured process table");
        Self { config, processes }
    }

    pub fn resolve(&self) -> Result<FactSet, ConfigError> {
        let mut facts = FactSet::default();
        for component in &self.config.components {
            let role = self
                .config
                .roles
                .get(component)
                .ok_or_else(|| ConfigError::MissingComponent(component.clone()))?;
            for category in Category::ALL {
                let value = match category {
                    Category::Binary => self.resolve_binary(component, role),
                    _ => resolve_file(category, component, role),
                };
                facts.insert(category, component.clone(), value);
            }
        }
        Ok(facts)
    }

    /// True when any configured binary is currently running.
    pub fn any_binary_running(&self) -> bool {
        self.config
            .components
            .iter()
            .filter_map(|c| self.config.roles.get(c))
            .flat_map(|r| r.bins.iter())
            .any(|b| self.is_running(b))
    }

    fn is_running(&self, candidate: &str) -> bool {
        self.processes.iter().any(|p| p.matches(candidate))
    }

    fn resolve_binary(&self, component: &str, role: &RoleConfig) -> Option<String> {
        if let Some(found) = role.bins.iter().find(|b| self.is_running(b)) {
            debug!(component, binary = %found, "resolved running binary");
            return Some(found.clone());
        }
        match role.defaultbin.as_deref() {
            Some(default) => {
                debug!(component, binary = default, "no candidate running; using default binary");
                Some(default.to_string())
            }
            None if role.bins.is_empty() => None,
            None => {
                if !role.is_optional() {
                    warn!(component, candidates = ?role.bins, "no candidate binary is running");
                }
                None
            }
        }
    }
}

fn resolve_file(category: Category, component: &str, role: &RoleConfig) -> Option<String> {
    let (candidates, default) = category.candidates(role);
    let found = candidates
        .iter()
        .flat_map(|c| c.split(|ch: char| ch == ',' || ch.is_whitespace()))
        .filter(|alt| !alt.is_empty())
        .find_map(existing_path);
    match (found, default) {
        (Some(path), _) => {
            debug!(component, category = category.suffix(), path = %path, "resolved file");
            Some(path)
        }
        (None, Some(default)) => {
            debug!(component, category = category.suffix(), path = default, "using default file");
            Some(default.to_string())
        }
        (None, None) => None,
    }
}

fn existing_path(candidate: &str) -> Option<String> {
    if candidate.contains(['*', '?', '[']) {
        let mut hits: Vec<_> = glob::glob(candidate).ok()?.filter_map(Result::ok).collect();
        hits.sort();
        return hits.into_iter().next().map(|p| p.to_string_lossy().into_owned());
    }
    Path::new(candidate).exists().then(|| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct FakeTable(Vec<RunningProcess>);

    impl ProcessTable for FakeTable {
        fn processes(&self) -> Vec<RunningProcess> { self.0.clone() }
    }

    fn proc(name: &str, cmd: &[&str]) -> RunningProcess {
        RunningProcess { name: name.into(), exe: None, cmd: cmd.iter().map(|s| s.to_string()).collect() }
    }

    fn node_config(roles: Vec<(&str, RoleConfig)>) -> NodeConfig {
        NodeConfig {
            components: roles.iter().map(|(n, _)| n.to_string()).collect(),
            roles: roles.into_iter().map(|(n, r)| (n.to_string(), r)).collect(),
        }
    }

    #[test]
    fn candidate_with_arguments_needs_every_word() {
        let p = proc("hyperkube", &["/usr/local/bin/hyperkube", "apiserver", "--secure-port=6443"]);
        assert!(p.matches("hyperkube apiserver"));
        assert!(!p.matches("hyperkube kubelet"));
        assert!(!p.matches("kube-apiserver"));
        let truncated = proc("kube-controller", &["/usr/bin/kube-controller-manager"]);
        assert!(truncated.matches("kube-controller-manager"));
    }

    #[test]
    fn first_running_candidate_wins_in_priority_order() {
        let cfg = node_config(vec![(
            "apiserver",
            RoleConfig { bins: vec!["kube-apiserver".into(), "hyperkube apiserver".into()], ..Default::default() },
        )]);
        let table = FakeTable(vec![
            proc("hyperkube", &["hyperkube", "apiserver"]),
            proc("kube-apiserver", &["kube-apiserver"]),
        ]);
        let facts = FactResolver::new(&cfg, &table).resolve().unwrap();
        assert_eq!(facts.get(Category::Binary, "apiserver"), Some("kube-apiserver"));
    }

    #[test]
    fn absent_binary_is_not_an_error() {
        let cfg = node_config(vec![("kubelet", RoleConfig { bins: vec!["kubelet".into()], ..Default::default() })]);
        let resolver = FactResolver::new(&cfg, &FakeTable(vec![]));
        let facts = resolver.resolve().unwrap();
        assert_eq!(facts.get(Category::Binary, "kubelet"), None);
        assert!(!resolver.any_binary_running());
        assert_eq!(facts.facts().count(), 0);
    }

    #[test]
    fn files_resolve_left_to_right_with_glob_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("kubelet.conf");
        fs::write(&present, "x").unwrap();
        fs::write(dir.path().join("ca.crt"), "x").unwrap();
        let missing = dir.path().join("nope.conf");
        let cfg = node_config(vec![(
            "kubelet",
            RoleConfig {
                confs: vec![format!("{},{}", missing.display(), present.display())],
                cafile: vec![format!("{}/*.crt", dir.path().display())],
                svc: vec![missing.display().to_string()],
                defaultkubeconfig: Some("/etc/kubernetes/kubelet.conf".into()),
                ..Default::default()
            },
        )]);
        let facts = FactResolver::new(&cfg, &FakeTable(vec![])).resolve().unwrap();
        assert_eq!(facts.get(Category::Config, "kubelet"), Some(present.to_str().unwrap()));
        assert_eq!(
            facts.get(Category::CaFile, "kubelet"),
            Some(dir.path().join("ca.crt").to_str().unwrap())
        );
        assert_eq!(facts.get(Category::Service, "kubelet"), None);
        assert_eq!(facts.get(Category::Kubeconfig, "kubelet"), Some("/etc/kubernetes/kubelet.conf"));
    }

    #[test]
    fn listed_component_without_section_is_a_config_error() {
        let cfg = NodeConfig { components: vec!["etcd".into()], roles: BTreeMap::new() };
        let err = FactResolver::new(&cfg, &FakeTable(vec![])).resolve().unwrap_err();
        assert!(matches!(err, ConfigError::MissingComponent(c) if c == "etcd"));
    }
}
