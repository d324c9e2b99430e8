//! Multi-Tenant Router: maps a user id to a lazily-created, cached
//! [`Storage`] instance.
//!
//! Grounded in `original_source/src/db/multi_db_manager.py`. Rust's `Arc`
//! strong-count plus an explicit `cleanup_inactive` sweep stands in for the
//! Python `RLock` + `WeakValueDictionary` combination.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::ErrorKind;
use crate::storage::{Storage, StorageError};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("invalid user id: {0}")]
    InvalidUser(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::InvalidUser(_) => ErrorKind::Validation,
            RouterError::Storage(e) => e.kind(),
            RouterError::Io(_) => ErrorKind::DbError,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserHealth {
    Healthy,
    Degraded,
    Unhealthy,
    NotLoaded,
    Missing,
}

pub struct UserStats {
    pub user_id: String,
    pub health: UserHealth,
    pub disk_usage_bytes: u64,
}

/// Keep only `[A-Za-z0-9._-]`; an empty result after stripping becomes
/// `invalid_user`, matching `multi_db_manager.py`'s safe-path derivation.
fn safe_user_id(user_id: &str) -> String {
    let safe: String = user_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        "invalid_user".to_string()
    } else {
        safe
    }
}

pub fn validate_user_id(user_id: &str) -> Result<()> {
    let ok = !user_id.is_empty()
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(RouterError::InvalidUser(user_id.to_string()))
    }
}

pub struct Router {
    base_path: PathBuf,
    cache: Mutex<HashMap<String, Arc<Storage>>>,
}

impl Router {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Router {
            base_path: base_path.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn db_path(&self, user_id: &str) -> PathBuf {
        self.base_path
            .join("users")
            .join(safe_user_id(user_id))
            .join("harmonia.db")
    }

    /// Lazily create (if needed) and return the cached handle for `user_id`.
    pub fn get(&self, user_id: &str) -> Result<Arc<Storage>> {
        validate_user_id(user_id)?;

        let mut cache = self.cache.lock().expect("router cache lock poisoned");
        if let Some(storage) = cache.get(user_id) {
            return Ok(storage.clone());
        }

        let path = self.db_path(user_id);
        let storage = Arc::new(Storage::open(&path)?);
        cache.insert(user_id.to_string(), storage.clone());
        tracing::info!(user_id, path = %path.display(), "opened per-user database");
        Ok(storage)
    }

    pub fn exists(&self, user_id: &str) -> bool {
        self.db_path(user_id).exists()
    }

    /// Enumerate subdirectories of `users/` that contain a `harmonia.db` file.
    pub fn list(&self) -> Result<Vec<String>> {
        let users_dir = self.base_path.join("users");
        if !users_dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&users_dir)? {
            let entry = entry?;
            if entry.path().join("harmonia.db").exists() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Remove the `.db`/`.db-wal`/`.db-shm` files, then the user directory if empty.
    pub fn delete(&self, user_id: &str) -> Result<()> {
        validate_user_id(user_id)?;
        self.cache.lock().unwrap().remove(user_id);

        let dir = self.base_path.join("users").join(safe_user_id(user_id));
        for suffix in ["", "-wal", "-shm"] {
            let mut p = dir.join("harmonia.db").into_os_string();
            p.push(suffix);
            let p = PathBuf::from(p);
            if p.exists() {
                std::fs::remove_file(p)?;
            }
        }
        let _ = std::fs::remove_dir(&dir);
        Ok(())
    }

    pub fn backup(&self, user_id: &str, dest: &Path) -> Result<()> {
        let storage = self.get(user_id)?;
        storage.backup_to(dest)?;
        Ok(())
    }

    /// Drop cached handles with no other live references (`Arc::strong_count == 1`).
    pub fn cleanup_inactive(&self) {
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|_, storage| Arc::strong_count(storage) > 1);
    }

    pub fn health(&self) -> Result<Vec<UserStats>> {
        let users = self.list()?;
        let cache = self.cache.lock().unwrap();
        let mut out = Vec::with_capacity(users.len());
        for user_id in users {
            let loaded = cache.get(&user_id);
            let (health, disk_usage_bytes) = match loaded {
                Some(storage) => {
                    let health = if storage.health_check().is_ok() {
                        UserHealth::Healthy
                    } else {
                        UserHealth::Unhealthy
                    };
                    (health, storage.disk_usage_bytes())
                }
                None => (UserHealth::NotLoaded, 0),
            };
            out.push(UserStats {
                user_id,
                health,
                disk_usage_bytes,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_user_id_strips_unsafe_chars() {
        assert_eq!(safe_user_id("alice-123_x.y"), "alice-123_x.y");
        assert_eq!(safe_user_id("../../etc"), "etcetc");
    }

    #[test]
    fn empty_after_stripping_becomes_invalid_user() {
        assert_eq!(safe_user_id("/../"), "invalid_user");
    }

    #[test]
    fn validate_rejects_path_traversal() {
        assert!(validate_user_id("../etc/passwd").is_err());
        assert!(validate_user_id("alice_123").is_ok());
    }

    #[test]
    fn router_creates_and_caches_same_handle() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::new(dir.path());
        let a = router.get("alice").unwrap();
        let b = router.get("alice").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
