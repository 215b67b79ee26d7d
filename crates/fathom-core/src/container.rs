//! Container registry: isolated indices and their bound provider identity.
//!
//! A container is a named isolated index with its own backing tables and an
//! immutable `ProviderIdentity` snapshotted at creation. The reserved
//! "Default" container always exists and cannot be deleted.
//!
//! Each container persists a JSON sidecar (identity, roots, description)
//! next to the database; the active-container choice is a one-line marker
//! file beside the sidecars.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{FathomError, FathomResult};
use crate::store::ContainerTables;
use crate::types::ProviderIdentity;

/// Name of the reserved, undeletable container.
pub const DEFAULT_CONTAINER: &str = "Default";

/// Persisted description of one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMeta {
    /// Unique container name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Embedding provider bound at creation; immutable thereafter.
    pub provider_identity: ProviderIdentity,
    /// Indexed root paths.
    pub roots: Vec<PathBuf>,
    /// Creation time (seconds since epoch).
    pub created_at: i64,
}

impl ContainerMeta {
    /// Table names backing this container.
    pub fn tables(&self) -> ContainerTables {
        ContainerTables::for_name(&self.name)
    }
}

/// Registry of containers, backed by sidecar files.
pub struct ContainerManager {
    dir: PathBuf,
    state: Mutex<RegistryState>,
}

struct RegistryState {
    containers: HashMap<String, ContainerMeta>,
    active: String,
}

impl ContainerManager {
    /// Open the registry, loading sidecars from `dir` and guaranteeing the
    /// "Default" container exists with the given identity.
    pub fn open(dir: &Path, default_identity: &ProviderIdentity) -> FathomResult<Self> {
        std::fs::create_dir_all(dir)?;

        let mut containers = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(FathomError::from)
                .and_then(|content| {
                    serde_json::from_str::<ContainerMeta>(&content).map_err(|e| {
                        FathomError::Store {
                            details: format!("corrupt sidecar {}: {e}", path.display()),
                        }
                    })
                }) {
                Ok(meta) => {
                    containers.insert(meta.name.clone(), meta);
                }
                Err(e) => {
                    tracing::warn!(sidecar = %path.display(), error = %e, "skipping unreadable sidecar");
                }
            }
        }

        let manager = Self {
            dir: dir.to_path_buf(),
            state: Mutex::new(RegistryState {
                containers,
                active: DEFAULT_CONTAINER.to_string(),
            }),
        };

        {
            let mut state = manager.state.lock();
            if !state.containers.contains_key(DEFAULT_CONTAINER) {
                let meta = ContainerMeta {
                    name: DEFAULT_CONTAINER.into(),
                    description: "Default container".into(),
                    provider_identity: default_identity.clone(),
                    roots: Vec::new(),
                    created_at: now_epoch(),
                };
                manager.write_sidecar(&meta)?;
                state.containers.insert(meta.name.clone(), meta);
            }

            let marker = manager.active_marker_path();
            if let Ok(name) = std::fs::read_to_string(&marker) {
                let name = name.trim().to_string();
                if state.containers.contains_key(&name) {
                    state.active = name;
                }
            }
        }

        Ok(manager)
    }

    /// Create a container. Names are unique; the identity snapshot is
    /// immutable thereafter.
    pub fn create(
        &self,
        name: &str,
        description: &str,
        identity: ProviderIdentity,
        roots: Vec<PathBuf>,
    ) -> FathomResult<ContainerMeta> {
        validate_name(name)?;

        let mut state = self.state.lock();
        if state.containers.contains_key(name) {
            return Err(FathomError::BadInput {
                details: format!("container '{name}' already exists"),
            });
        }

        let meta = ContainerMeta {
            name: name.into(),
            description: description.into(),
            provider_identity: identity,
            roots,
            created_at: now_epoch(),
        };
        self.write_sidecar(&meta)?;
        state.containers.insert(meta.name.clone(), meta.clone());

        tracing::info!(container = name, "created container");
        Ok(meta)
    }

    /// Delete a container's registry entry. The reserved "Default"
    /// container is refused. Dropping the backing tables is the store's job.
    pub fn delete(&self, name: &str) -> FathomResult<ContainerMeta> {
        if name == DEFAULT_CONTAINER {
            return Err(FathomError::BadInput {
                details: "the Default container cannot be deleted".into(),
            });
        }

        let mut state = self.state.lock();
        let meta = state
            .containers
            .remove(name)
            .ok_or_else(|| FathomError::NotFound {
                entity: format!("container '{name}'"),
            })?;

        let sidecar = self.sidecar_path(&meta.name);
        if let Err(e) = std::fs::remove_file(&sidecar) {
            tracing::warn!(sidecar = %sidecar.display(), error = %e, "failed to remove sidecar");
        }

        if state.active == name {
            state.active = DEFAULT_CONTAINER.to_string();
            self.persist_active(&state.active);
        }

        tracing::info!(container = name, "deleted container");
        Ok(meta)
    }

    /// Switch the active container.
    pub fn set_active(&self, name: &str) -> FathomResult<()> {
        let mut state = self.state.lock();
        if !state.containers.contains_key(name) {
            return Err(FathomError::NotFound {
                entity: format!("container '{name}'"),
            });
        }
        state.active = name.to_string();
        self.persist_active(name);
        Ok(())
    }

    /// Name of the active container.
    pub fn active(&self) -> String {
        self.state.lock().active.clone()
    }

    /// Look up one container, or the active one when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> FathomResult<ContainerMeta> {
        let state = self.state.lock();
        let name = name.unwrap_or(&state.active);
        state
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| FathomError::NotFound {
                entity: format!("container '{name}'"),
            })
    }

    /// All containers with their active flag, sorted by name.
    pub fn list(&self) -> Vec<(ContainerMeta, bool)> {
        let state = self.state.lock();
        let mut out: Vec<(ContainerMeta, bool)> = state
            .containers
            .values()
            .map(|meta| (meta.clone(), meta.name == state.active))
            .collect();
        out.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        out
    }

    /// Add a root to a container, persisting the sidecar. No-op when the
    /// root is already registered.
    pub fn add_root(&self, name: &str, root: &Path) -> FathomResult<ContainerMeta> {
        let mut state = self.state.lock();
        let meta = state
            .containers
            .get_mut(name)
            .ok_or_else(|| FathomError::NotFound {
                entity: format!("container '{name}'"),
            })?;

        if !meta.roots.iter().any(|r| r == root) {
            meta.roots.push(root.to_path_buf());
            let snapshot = meta.clone();
            self.write_sidecar(&snapshot)?;
        }
        Ok(meta.clone())
    }

    /// Whether `path` lies under an indexed root of any container.
    pub fn path_in_scope(&self, path: &Path) -> bool {
        let state = self.state.lock();
        state
            .containers
            .values()
            .flat_map(|meta| meta.roots.iter())
            .any(|root| path.starts_with(root))
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        // File names come from the table suffix so arbitrary container
        // names never reach the filesystem.
        let tables = ContainerTables::for_name(name);
        self.dir.join(format!("{}.json", tables.suffix_str()))
    }

    fn active_marker_path(&self) -> PathBuf {
        self.dir.join("active")
    }

    fn write_sidecar(&self, meta: &ContainerMeta) -> FathomResult<()> {
        let content = serde_json::to_string_pretty(meta).map_err(|e| FathomError::Internal(
            format!("failed to serialize sidecar: {e}"),
        ))?;
        std::fs::write(self.sidecar_path(&meta.name), content)?;
        Ok(())
    }

    fn persist_active(&self, name: &str) {
        if let Err(e) = std::fs::write(self.active_marker_path(), name) {
            tracing::warn!(error = %e, "failed to persist active container marker");
        }
    }
}

fn validate_name(name: &str) -> FathomResult<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(FathomError::BadInput {
            details: "container name must be 1-64 characters".into(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' ' | '.'))
    {
        return Err(FathomError::BadInput {
            details: "container name may only contain alphanumerics, '-', '_', '.', and spaces"
                .into(),
        });
    }
    Ok(())
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
