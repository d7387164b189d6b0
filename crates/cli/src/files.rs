//! Manifest (YAML, operator-written) and state file (JSON, tool-owned).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tanuki_core::{AttrMap, ResourceState};
use tanuki_hub::ProviderConfig;

fn max_manifest_bytes() -> usize {
    std::env::var("TANUKI_MAX_MANIFEST_BYTES").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(1024 * 1024)
}

/// One declared object: `<type>.<name>` is its address in the state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declared {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub attributes: AttrMap,
}

impl Declared {
    pub fn address(&self) -> String { address(&self.kind, &self.name) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub resources: Vec<Declared>,
}

impl Manifest {
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.len() > max_manifest_bytes() {
            bail!("manifest is {} bytes; limit is {} (TANUKI_MAX_MANIFEST_BYTES)", yaml.len(), max_manifest_bytes());
        }
        let m: Manifest = serde_yaml::from_str(yaml).context("parsing manifest YAML")?;
        let mut seen = std::collections::BTreeSet::new();
        for r in &m.resources {
            if !seen.insert(r.address()) {
                bail!("{} is declared more than once", r.address());
            }
        }
        Ok(m)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("loading {}", path.display()))
    }
}

pub fn address(kind: &str, name: &str) -> String { format!("{}.{}", kind, name) }

/// Split `<type>.<name>`.
pub fn split_address(addr: &str) -> Result<(&str, &str)> {
    match addr.split_once('.') {
        Some((kind, name)) if !kind.is_empty() && !name.is_empty() => Ok((kind, name)),
        _ => bail!("address {:?} is not <type>.<name>", addr),
    }
}

/// Tracked objects keyed by address. Entries keep the order they were first applied in,
/// so destroy can walk it backwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    #[serde(default)]
    pub order: Vec<String>,
}

impl StateFile {
    /// A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).with_context(|| format!("parsing state {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading state {}", path.display())),
        }
    }

    /// Write to a sibling temp file then rename, so a crash never leaves half a state file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))
    }

    pub fn get(&self, addr: &str) -> Option<&ResourceState> { self.resources.get(addr) }

    pub fn put(&mut self, addr: &str, st: ResourceState) {
        if self.resources.insert(addr.to_string(), st).is_none() {
            self.order.push(addr.to_string());
        }
    }

    pub fn remove(&mut self, addr: &str) {
        self.resources.remove(addr);
        self.order.retain(|a| a != addr);
    }

    /// Addresses newest first.
    pub fn reverse_order(&self) -> Vec<String> { self.order.iter().rev().cloned().collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn manifest_parses_provider_and_resources() {
        let m = Manifest::parse(
            r#"
provider:
  base_url: https://gitlab.example.com
resources:
  - type: gitlab_project
    name: svc
    attributes:
      name: svc
      topics: [b, a]
"#,
        )
        .unwrap();
        assert_eq!(m.provider.base_url.as_deref(), Some("https://gitlab.example.com"));
        assert_eq!(m.resources[0].address(), "gitlab_project.svc");
        assert_eq!(m.resources[0].attributes["topics"], json!(["b", "a"]));
    }

    #[test]
    fn duplicate_addresses_are_refused() {
        let err = Manifest::parse("resources:\n  - {type: gitlab_branch, name: a}\n  - {type: gitlab_branch, name: a}\n").unwrap_err();
        assert!(err.to_string().contains("more than once"), "{}", err);
    }

    #[test]
    fn addresses_split_on_the_first_dot() {
        assert_eq!(split_address("gitlab_branch.release.v1").unwrap(), ("gitlab_branch", "release.v1"));
        assert!(split_address("gitlab_branch").is_err());
        assert!(split_address(".x").is_err());
    }

    #[test]
    fn state_round_trips_and_keeps_apply_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert_eq!(StateFile::load(&path).unwrap(), StateFile::default());

        let mut s = StateFile::default();
        s.put("gitlab_project.svc", ResourceState::new("1", AttrMap::new()));
        s.put("gitlab_branch.rel", ResourceState::new("1:rel", AttrMap::new()));
        s.put("gitlab_project.svc", ResourceState::new("1", AttrMap::new()));
        s.save(&path).unwrap();

        let back = StateFile::load(&path).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.reverse_order(), vec!["gitlab_branch.rel".to_string(), "gitlab_project.svc".to_string()]);

        let mut back = back;
        back.remove("gitlab_branch.rel");
        assert_eq!(back.order, vec!["gitlab_project.svc".to_string()]);
    }
}
