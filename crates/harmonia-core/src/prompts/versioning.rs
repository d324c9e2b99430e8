//! Prompt version registry: content-hashed `(name, version)` pairs with a
//! single active version per name, round-tripping to `versions.json`.
//!
//! Grounded in `original_source/src/prompts/versioning.py` (listed in
//! `_INDEX.md`; on-disk layout per spec.md §6:
//! `prompt_versions/versions.json` + `prompt_versions/<name>/<version>.txt`).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VersioningError {
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VersioningError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersion {
    pub name: String,
    pub version: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub author: String,
    pub deprecated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    /// name -> (version -> entry)
    versions: HashMap<String, HashMap<String, TemplateVersion>>,
    /// name -> active version
    active: HashMap<String, String>,
}

pub struct Registry {
    base_dir: PathBuf,
    state: RegistryState,
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Registry {
    pub fn load(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let state_path = base_dir.join("versions.json");
        let state = if state_path.exists() {
            let raw = fs::read_to_string(&state_path)?;
            serde_json::from_str(&raw)?
        } else {
            RegistryState::default()
        };
        Ok(Registry { base_dir, state })
    }

    fn persist(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        let state_path = self.base_dir.join("versions.json");
        fs::write(&state_path, serde_json::to_string_pretty(&self.state)?)?;
        Ok(())
    }

    fn template_path(&self, name: &str, version: &str) -> PathBuf {
        self.base_dir.join(name).join(format!("{version}.txt"))
    }

    /// Registers `content` under `(name, version)`, content-hashing it and
    /// writing it to `prompt_versions/<name>/<version>.txt`. The first
    /// version registered for a name becomes active automatically.
    pub fn register(
        &mut self,
        name: &str,
        version: &str,
        content: &str,
        description: &str,
        author: &str,
    ) -> Result<TemplateVersion> {
        let entry = TemplateVersion {
            name: name.to_string(),
            version: version.to_string(),
            content_hash: content_hash(content),
            created_at: Utc::now(),
            description: description.to_string(),
            author: author.to_string(),
            deprecated: false,
        };

        let dir = self.base_dir.join(name);
        fs::create_dir_all(&dir)?;
        fs::write(self.template_path(name, version), content)?;

        let versions = self.state.versions.entry(name.to_string()).or_default();
        let is_first = versions.is_empty();
        versions.insert(version.to_string(), entry.clone());
        if is_first {
            self.state.active.insert(name.to_string(), version.to_string());
        }
        self.persist()?;
        Ok(entry)
    }

    pub fn activate(&mut self, name: &str, version: &str) -> Result<()> {
        let versions = self
            .state
            .versions
            .get(name)
            .ok_or_else(|| VersioningError::NotFound(name.to_string()))?;
        if !versions.contains_key(version) {
            return Err(VersioningError::NotFound(format!("{name}@{version}")));
        }
        self.state.active.insert(name.to_string(), version.to_string());
        self.persist()
    }

    pub fn deprecate(&mut self, name: &str, version: &str) -> Result<()> {
        let entry = self
            .state
            .versions
            .get_mut(name)
            .and_then(|v| v.get_mut(version))
            .ok_or_else(|| VersioningError::NotFound(format!("{name}@{version}")))?;
        entry.deprecated = true;
        self.persist()
    }

    pub fn active_version(&self, name: &str) -> Option<&TemplateVersion> {
        let version = self.state.active.get(name)?;
        self.state.versions.get(name)?.get(version)
    }

    pub fn active_content(&self, name: &str) -> Result<String> {
        let active = self
            .active_version(name)
            .ok_or_else(|| VersioningError::NotFound(name.to_string()))?;
        Ok(fs::read_to_string(self.template_path(name, &active.version))?)
    }

    pub fn list_versions(&self, name: &str) -> Vec<TemplateVersion> {
        self.state
            .versions
            .get(name)
            .map(|v| {
                let mut versions: Vec<_> = v.values().cloned().collect();
                versions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                versions
            })
            .unwrap_or_default()
    }

    pub fn compare(&self, name: &str, a: &str, b: &str) -> Option<(String, String)> {
        let dir = self.base_dir.join(name);
        let content_a = fs::read_to_string(dir.join(format!("{a}.txt"))).ok()?;
        let content_b = fs::read_to_string(dir.join(format!("{b}.txt"))).ok()?;
        Some((content_a, content_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_makes_first_version_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(dir.path()).unwrap();
        registry
            .register("base_system", "v1", "hello {{name}}", "initial", "system")
            .unwrap();
        assert_eq!(registry.active_version("base_system").unwrap().version, "v1");
    }

    #[test]
    fn activating_new_version_switches_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(dir.path()).unwrap();
        registry.register("base_system", "v1", "one", "d", "a").unwrap();
        registry.register("base_system", "v2", "two", "d", "a").unwrap();
        assert_eq!(registry.active_version("base_system").unwrap().version, "v1");
        registry.activate("base_system", "v2").unwrap();
        assert_eq!(registry.active_version("base_system").unwrap().version, "v2");
    }

    #[test]
    fn state_round_trips_through_versions_json() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut registry = Registry::load(dir.path()).unwrap();
            registry.register("base_system", "v1", "hello", "d", "a").unwrap();
        }
        let reloaded = Registry::load(dir.path()).unwrap();
        assert_eq!(reloaded.active_version("base_system").unwrap().version, "v1");
    }
}
