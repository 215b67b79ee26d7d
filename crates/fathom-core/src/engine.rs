//! The command surface consumed by the CLI and MCP adapters.
//!
//! `Engine` owns every subsystem -- store, container registry, indexer,
//! providers, reranker -- and exposes the command-style operations external
//! collaborators consume: search, indexing, file listing, diff, related,
//! annotations, and container lifecycle. Progress and model events flow
//! through a broadcast side channel (`subscribe_events`).
//!
//! The local embedding model is a process-wide singleton owned by the
//! engine behind a lazy cell; containers bound to a remote identity get
//! their own HTTP client. A container whose bound identity no longer
//! matches the active provider fails with `ProviderMismatch` until rebuilt.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::container::{ContainerManager, ContainerMeta};
use crate::error::{FathomError, FathomResult};
use crate::indexer::Indexer;
use crate::provider::{local::LocalProvider, remote::RemoteProvider, EmbeddingProvider};
use crate::reranker::Reranker;
use crate::search;
use crate::store::Store;
use crate::types::{
    Annotation, AnnotationSource, ChunkKind, DiffEntry, DiffWindow, FileListing, Fragment,
    IndexEvent, IndexStatus, JobSummary, ProviderIdentity, ProviderKind, SearchHit, SearchRequest,
};

/// Preview length for `diff` entries.
const DIFF_PREVIEW_BYTES: usize = 200;

/// Cap on `related` top_k.
const RELATED_MAX_TOP_K: usize = 30;

/// The main Fathom engine.
pub struct Engine {
    config: Config,
    store: Arc<Store>,
    containers: ContainerManager,
    indexer: Indexer,
    reranker: Arc<Reranker>,
    local_provider: OnceLock<Arc<LocalProvider>>,
    provider_override: Option<Arc<dyn EmbeddingProvider>>,
    events: broadcast::Sender<IndexEvent>,
}

impl Engine {
    /// Create an engine with the given configuration.
    pub fn new(config: Config) -> FathomResult<Self> {
        Self::build(config, None)
    }

    /// Create an engine with an explicit embedding provider instead of the
    /// configured local/remote backends. New containers snapshot this
    /// provider's identity.
    pub fn with_provider(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> FathomResult<Self> {
        Self::build(config, Some(provider))
    }

    fn build(
        config: Config,
        provider_override: Option<Arc<dyn EmbeddingProvider>>,
    ) -> FathomResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(Store::open(&config.db_path())?);
        let default_identity = provider_override
            .as_ref()
            .map_or_else(|| config.embedding.identity(), |p| p.identity().clone());
        let containers = ContainerManager::open(&config.containers_dir(), &default_identity)?;

        // Backing tables for every known container exist up front.
        for (meta, _) in containers.list() {
            store.create_container(&meta.tables())?;
        }

        let (events, _) = broadcast::channel(256);
        let indexer = Indexer::new(config.clone(), Arc::clone(&store), events.clone());
        let reranker = Arc::new(Reranker::new(&config.reranker));

        tracing::info!(
            data_dir = %config.data_dir.display(),
            provider = %default_identity.label(),
            "engine initialized"
        );

        Ok(Self {
            config,
            store,
            containers,
            indexer,
            reranker,
            local_provider: OnceLock::new(),
            provider_override,
            events,
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to progress and model events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    /// The identity new containers snapshot when none is given explicitly.
    pub fn global_identity(&self) -> ProviderIdentity {
        self.provider_override
            .as_ref()
            .map_or_else(|| self.config.embedding.identity(), |p| p.identity().clone())
    }

    // -----------------------------------------------------------------
    // Provider resolution
    // -----------------------------------------------------------------

    /// Resolve the provider for a container, verifying its bound identity
    /// still matches what the provider serves.
    fn provider_for(&self, meta: &ContainerMeta) -> FathomResult<Arc<dyn EmbeddingProvider>> {
        let provider: Arc<dyn EmbeddingProvider> = match &self.provider_override {
            Some(provider) => Arc::clone(provider),
            None => match meta.provider_identity.kind {
                ProviderKind::Local => {
                    let local = self.local_provider.get_or_init(|| {
                        Arc::new(LocalProvider::new(
                            &self.config.embedding,
                            Some(self.events.clone()),
                        ))
                    });
                    Arc::clone(local) as Arc<dyn EmbeddingProvider>
                }
                ProviderKind::Remote => {
                    Arc::new(RemoteProvider::new(&self.config.embedding)?)
                }
            },
        };

        let served = provider.identity();
        if *served != meta.provider_identity {
            return Err(FathomError::ProviderMismatch {
                details: format!(
                    "container '{}' is bound to {} but the active provider is {}",
                    meta.name,
                    meta.provider_identity.label(),
                    served.label()
                ),
            });
        }
        Ok(provider)
    }

    // -----------------------------------------------------------------
    // Search commands
    // -----------------------------------------------------------------

    /// Execute a hybrid search.
    pub async fn search(&self, request: &SearchRequest) -> FathomResult<Vec<SearchHit>> {
        let meta = self.containers.resolve(request.container.as_deref())?;
        let provider = self.provider_for(&meta)?;

        search::run(
            Arc::clone(&self.store),
            meta.tables(),
            provider,
            Arc::clone(&self.reranker),
            &self.config.search,
            &self.config.reranker,
            request,
        )
        .await
    }

    /// Paths nearest to `path` in embedding space.
    pub async fn related(&self, path: &Path, top_k: usize) -> FathomResult<Vec<SearchHit>> {
        if top_k == 0 || top_k > RELATED_MAX_TOP_K {
            return Err(FathomError::BadInput {
                details: format!("top_k must be in 1..={RELATED_MAX_TOP_K}"),
            });
        }

        let meta = self.containers.resolve(None)?;
        let tables = meta.tables();
        let fragments = self.store.fragments_for_path(&tables, path)?;
        if fragments.is_empty() {
            return Err(FathomError::NotFound {
                entity: format!("indexed file {}", path.display()),
            });
        }

        // Centroid of the file's fragment vectors stands in for the file.
        let dimension = meta.provider_identity.dimension;
        let mut centroid = vec![0.0f32; dimension];
        for fragment in &fragments {
            for (c, v) in centroid.iter_mut().zip(fragment.vector.iter()) {
                *c += v;
            }
        }
        crate::provider::l2_normalize(&mut centroid);

        let pool = self
            .store
            .ann_search(&tables, &centroid, top_k * 4 + 8, None)?;

        let mut hits = Vec::with_capacity(top_k);
        let mut seen = std::collections::HashSet::new();
        for candidate in pool {
            if candidate.path == path || candidate.kind == ChunkKind::Annotation {
                continue;
            }
            if !seen.insert(candidate.path.clone()) {
                continue;
            }
            hits.push(SearchHit {
                path: candidate.path,
                snippet: String::new(),
                score: candidate.score.max(0.0) * 100.0,
                ordinal: candidate.ordinal,
            });
            if hits.len() == top_k {
                break;
            }
        }
        Ok(hits)
    }

    // -----------------------------------------------------------------
    // Indexing commands
    // -----------------------------------------------------------------

    /// Register a directory as a root of the active container and index it.
    pub async fn index_folder(&self, path: &Path) -> FathomResult<JobSummary> {
        let root = path.canonicalize().map_err(|_| FathomError::NotFound {
            entity: format!("directory {}", path.display()),
        })?;
        if !root.is_dir() {
            return Err(FathomError::BadInput {
                details: format!("{} is not a directory", root.display()),
            });
        }

        let active = self.containers.active();
        let meta = self.containers.add_root(&active, &root)?;
        let provider = self.provider_for(&meta)?;

        self.indexer
            .index_root(&meta, provider, &root, &CancellationToken::new())
            .await
    }

    /// Rescan a container's roots, applying adds, modifications, and
    /// deletions incrementally.
    pub async fn reindex_delta(&self, container: Option<&str>) -> FathomResult<JobSummary> {
        let meta = self.containers.resolve(container)?;
        let provider = self.provider_for(&meta)?;
        self.indexer
            .reindex_delta(&meta, provider, &CancellationToken::new())
            .await
    }

    /// Clear a container and rebuild it from its roots.
    pub async fn reindex_all(&self, container: Option<&str>) -> FathomResult<JobSummary> {
        let meta = self.containers.resolve(container)?;
        let provider = self.provider_for(&meta)?;
        self.indexer
            .reindex_all(&meta, provider, &CancellationToken::new())
            .await
    }

    /// Drop all indexed rows of a container, keeping its registration.
    pub async fn reset_index(&self, container: Option<&str>) -> FathomResult<()> {
        let meta = self.containers.resolve(container)?;
        if self.indexer.is_busy(&meta.name) {
            return Err(FathomError::Busy {
                container: meta.name,
            });
        }
        self.store.clear_container(&meta.tables())?;
        tracing::info!(container = %meta.name, "index reset");
        Ok(())
    }

    /// Index or delete a single file (watcher entry point).
    pub async fn index_single(&self, container: Option<&str>, path: &Path) -> FathomResult<JobSummary> {
        let meta = self.containers.resolve(container)?;
        let provider = self.provider_for(&meta)?;
        self.indexer.index_single(&meta, provider, path).await
    }

    /// Remove one path's fragments from a container.
    pub async fn delete_path(&self, container: Option<&str>, path: &Path) -> FathomResult<usize> {
        let meta = self.containers.resolve(container)?;
        if self.indexer.is_busy(&meta.name) {
            return Err(FathomError::Busy {
                container: meta.name,
            });
        }
        self.store.delete_by_path(&meta.tables(), path)
    }

    // -----------------------------------------------------------------
    // Read commands
    // -----------------------------------------------------------------

    /// Read a text slice of a file that lies under an indexed root.
    ///
    /// Paths are canonicalized before the containment check, which defeats
    /// `..` traversal and symlink escape. Lines are 1-based and inclusive.
    pub fn read_file(
        &self,
        path: &Path,
        line_range: Option<(usize, usize)>,
    ) -> FathomResult<String> {
        let canonical = path.canonicalize().map_err(|_| FathomError::NotFound {
            entity: format!("file {}", path.display()),
        })?;

        if !self.path_in_any_root(&canonical) {
            return Err(FathomError::BadInput {
                details: format!(
                    "{} is not under an indexed root of any container",
                    path.display()
                ),
            });
        }

        let content = std::fs::read_to_string(&canonical)?;
        match line_range {
            None => Ok(content),
            Some((start, end)) => {
                if start == 0 || end < start {
                    return Err(FathomError::BadInput {
                        details: "line range must satisfy 1 <= start <= end".into(),
                    });
                }
                let slice: Vec<&str> = content
                    .lines()
                    .skip(start - 1)
                    .take(end - start + 1)
                    .collect();
                Ok(slice.join("\n"))
            }
        }
    }

    /// Deduplicated indexed paths of a container, with current sizes.
    pub fn list_files(
        &self,
        container: Option<&str>,
        path_prefix: Option<&Path>,
        extensions: Option<&[String]>,
    ) -> FathomResult<Vec<FileListing>> {
        let meta = self.containers.resolve(container)?;
        let mut records = self.store.scan_file_records(&meta.tables())?;
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records.dedup_by(|a, b| a.path == b.path);

        let listings = records
            .into_iter()
            .filter(|record| {
                if let Some(prefix) = path_prefix {
                    if !record.path.starts_with(prefix) {
                        return false;
                    }
                }
                if let Some(extensions) = extensions {
                    let ext = record
                        .path
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or_default();
                    if !extensions
                        .iter()
                        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
                    {
                        return false;
                    }
                }
                true
            })
            .map(|record| {
                let size_bytes = std::fs::metadata(&record.path).map(|m| m.len()).unwrap_or(0);
                FileListing {
                    path: record.path,
                    size_bytes,
                }
            })
            .collect();
        Ok(listings)
    }

    /// Aggregate status of a container.
    pub fn index_status(&self, container: Option<&str>) -> FathomResult<IndexStatus> {
        let meta = self.containers.resolve(container)?;
        let (total_files, total_chunks) = self.store.counts(&meta.tables())?;
        if !self.store.check_integrity()? {
            tracing::warn!("database integrity check failed; a reindex is recommended");
        }
        Ok(IndexStatus {
            total_files,
            total_chunks,
            indexed_paths: meta.roots.clone(),
            provider_label: meta.provider_identity.label(),
        })
    }

    /// Recently changed paths across all containers, newest first.
    pub fn diff(&self, window: DiffWindow, with_previews: bool) -> FathomResult<Vec<DiffEntry>> {
        let cutoff = now_epoch() - window.seconds();
        let mut entries: Vec<DiffEntry> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (meta, _) in self.containers.list() {
            let tables = meta.tables();
            for record in self.store.scan_file_records(&tables)? {
                if record.mtime < cutoff || !seen.insert(record.path.clone()) {
                    continue;
                }
                let preview = if with_previews {
                    self.store
                        .fragments_for_path(&tables, &record.path)?
                        .first()
                        .map(|f| {
                            let mut end = DIFF_PREVIEW_BYTES.min(f.text.len());
                            while end > 0 && !f.text.is_char_boundary(end) {
                                end -= 1;
                            }
                            f.text[..end].to_string()
                        })
                } else {
                    None
                };
                entries.push(DiffEntry {
                    path: record.path,
                    mtime: record.mtime,
                    preview,
                });
            }
        }

        entries.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.path.cmp(&b.path)));
        Ok(entries)
    }

    // -----------------------------------------------------------------
    // Annotation commands
    // -----------------------------------------------------------------

    /// Attach a note to a path, embedding it for retrieval.
    pub async fn add_annotation(
        &self,
        container: Option<&str>,
        path: &Path,
        note: &str,
        source: AnnotationSource,
    ) -> FathomResult<Annotation> {
        if note.trim().is_empty() {
            return Err(FathomError::BadInput {
                details: "annotation note must not be empty".into(),
            });
        }

        let meta = self.containers.resolve(container)?;
        let provider = self.provider_for(&meta)?;

        let annotation = Annotation {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.to_path_buf(),
            source,
            note: note.to_string(),
            created_at: now_epoch(),
        };

        let vector = {
            let provider = Arc::clone(&provider);
            let text = annotation.note.clone();
            let mut vectors =
                tokio::task::spawn_blocking(move || provider.embed(&[text.as_str()]))
                    .await
                    .map_err(|e| FathomError::Internal(format!("embed task panicked: {e}")))??;
            vectors
                .pop()
                .ok_or_else(|| FathomError::Internal("provider returned no vector".into()))?
        };

        let pseudo_path = annotation.pseudo_path();
        let fragment = Fragment {
            id: pseudo_path.display().to_string(),
            path: pseudo_path,
            ordinal: 0,
            offset_start: 0,
            offset_end: annotation.note.len() as u64,
            text: annotation.note.clone(),
            vector,
            kind: ChunkKind::Annotation,
            language: crate::types::Language::Plain,
            mtime: annotation.created_at,
        };

        self.store.insert_annotation(
            &meta.tables(),
            &annotation,
            &fragment,
            meta.provider_identity.dimension,
        )?;
        Ok(annotation)
    }

    /// Remove an annotation by id.
    pub fn delete_annotation(&self, container: Option<&str>, id: &str) -> FathomResult<()> {
        let meta = self.containers.resolve(container)?;
        if self.store.delete_annotation(&meta.tables(), id)? {
            Ok(())
        } else {
            Err(FathomError::NotFound {
                entity: format!("annotation '{id}'"),
            })
        }
    }

    /// Annotations of a container, optionally restricted to one path.
    pub fn get_annotations(
        &self,
        container: Option<&str>,
        path: Option<&Path>,
    ) -> FathomResult<Vec<Annotation>> {
        let meta = self.containers.resolve(container)?;
        self.store.list_annotations(&meta.tables(), path)
    }

    // -----------------------------------------------------------------
    // Container commands
    // -----------------------------------------------------------------

    /// Create a container. When no identity is given, the current global
    /// provider is snapshotted; the snapshot is immutable thereafter.
    pub fn create_container(
        &self,
        name: &str,
        description: &str,
        identity: Option<ProviderIdentity>,
        roots: Vec<PathBuf>,
    ) -> FathomResult<ContainerMeta> {
        let identity = identity.unwrap_or_else(|| self.global_identity());
        let meta = self.containers.create(name, description, identity, roots)?;
        self.store.create_container(&meta.tables())?;
        Ok(meta)
    }

    /// Delete a container, dropping its backing tables and all derived
    /// state. The reserved "Default" container is refused.
    pub fn delete_container(&self, name: &str) -> FathomResult<()> {
        if self.indexer.is_busy(name) {
            return Err(FathomError::Busy {
                container: name.to_string(),
            });
        }
        let meta = self.containers.delete(name)?;
        self.store.drop_container(&meta.tables())?;
        Ok(())
    }

    /// Switch the active container.
    pub fn set_active_container(&self, name: &str) -> FathomResult<()> {
        self.containers.set_active(name)
    }

    /// All containers with their active flag.
    pub fn list_containers(&self) -> Vec<(ContainerMeta, bool)> {
        self.containers.list()
    }

    // -----------------------------------------------------------------
    // Watcher support
    // -----------------------------------------------------------------

    /// Metadata of a container (active when `name` is `None`).
    pub fn container_meta(&self, name: Option<&str>) -> FathomResult<ContainerMeta> {
        self.containers.resolve(name)
    }

    /// Whether a path lies under one of a container's roots.
    pub fn path_under_container_roots(&self, container: &str, path: &Path) -> bool {
        self.containers
            .resolve(Some(container))
            .map(|meta| meta.roots.iter().any(|root| path.starts_with(root)))
            .unwrap_or(false)
    }

    /// Whether a container already has a file record for a path.
    pub fn has_file_record(&self, container: &str, path: &Path) -> bool {
        self.containers
            .resolve(Some(container))
            .ok()
            .and_then(|meta| self.store.file_record(&meta.tables(), path).ok().flatten())
            .is_some()
    }

    fn path_in_any_root(&self, canonical: &Path) -> bool {
        for (meta, _) in self.containers.list() {
            for root in &meta.roots {
                let root = root.canonicalize().unwrap_or_else(|_| root.clone());
                if canonical.starts_with(&root) {
                    return true;
                }
            }
        }
        false
    }
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
