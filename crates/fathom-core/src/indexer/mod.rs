//! Indexing orchestration: walk -> extract -> chunk -> embed -> write.
//!
//! Enumeration runs on a parallel, gitignore-aware walker. Extraction and
//! chunking run to completion on the blocking pool, bounded by a semaphore
//! sized to the CPU count; results stream into the embedding stage, which
//! commits one file at a time. A file's fragments become visible atomically:
//! the old version is removed in the same commit that inserts the new one.
//!
//! At most one indexing job per container may be active; concurrent
//! requests get `Busy`. Cancellation is observed at commit boundaries --
//! the in-flight file finishes embedding and committing first.
//!
//! Provider failures retry 3 times with 0.5s / 2s / 8s backoff; a failure
//! that survives the retries fails the job, keeping committed batches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::chunker::{self, RawFragment};
use crate::config::Config;
use crate::container::ContainerMeta;
use crate::error::{FathomError, FathomResult};
use crate::extract::{self, Extraction};
use crate::provider::EmbeddingProvider;
use crate::store::{ContainerTables, Store};
use crate::types::{ExtractedBody, FileRecord, Fragment, IndexEvent, JobSummary};

/// Backoff schedule for retryable provider failures.
const RETRY_BACKOFF: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(500),
    std::time::Duration::from_secs(2),
    std::time::Duration::from_secs(8),
];

/// Indexing orchestrator shared by the engine and the watcher.
pub struct Indexer {
    config: Config,
    store: Arc<Store>,
    active_jobs: Arc<DashMap<String, ()>>,
    events: broadcast::Sender<IndexEvent>,
}

/// Releases the container's busy slot on drop.
#[derive(Debug)]
struct JobGuard {
    jobs: Arc<DashMap<String, ()>>,
    container: String,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs.remove(&self.container);
    }
}

/// One extracted file waiting for embedding.
struct ExtractedFile {
    path: PathBuf,
    record: FileRecord,
    fragments: Vec<RawFragment>,
}

/// Outcome of the extraction stage for one file.
enum StageResult {
    Ready(Box<ExtractedFile>),
    Skipped { path: PathBuf, reason: String },
    Unchanged,
    HashMatch(FileRecord),
}

impl Indexer {
    /// Create an indexer over the shared store.
    pub fn new(config: Config, store: Arc<Store>, events: broadcast::Sender<IndexEvent>) -> Self {
        Self {
            config,
            store,
            active_jobs: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Whether a job is currently running for the container.
    pub fn is_busy(&self, container: &str) -> bool {
        self.active_jobs.contains_key(container)
    }

    fn acquire(&self, container: &str) -> FathomResult<JobGuard> {
        match self.active_jobs.entry(container.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(FathomError::Busy {
                container: container.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Ok(JobGuard {
                    jobs: Arc::clone(&self.active_jobs),
                    container: container.to_string(),
                })
            }
        }
    }

    /// Walk a root and index every new or changed file under it.
    pub async fn index_root(
        &self,
        meta: &ContainerMeta,
        provider: Arc<dyn EmbeddingProvider>,
        root: &Path,
        cancel: &CancellationToken,
    ) -> FathomResult<JobSummary> {
        let _guard = self.acquire(&meta.name)?;
        let candidates = self.enumerate(std::slice::from_ref(&root.to_path_buf()));
        self.process_files(meta, provider, candidates, cancel).await
    }

    /// Rescan all roots: index added/modified files, drop deleted ones.
    pub async fn reindex_delta(
        &self,
        meta: &ContainerMeta,
        provider: Arc<dyn EmbeddingProvider>,
        cancel: &CancellationToken,
    ) -> FathomResult<JobSummary> {
        let _guard = self.acquire(&meta.name)?;
        let tables = meta.tables();

        let on_disk = self.enumerate(&meta.roots);
        let known = self.store.scan_file_records(&tables)?;

        let disk_paths: std::collections::HashMap<&Path, i64> = on_disk
            .iter()
            .map(|(path, mtime)| (path.as_path(), *mtime))
            .collect();

        // Deleted: known to the store, gone from disk (or out of scope).
        let mut deleted = 0usize;
        for record in &known {
            if !disk_paths.contains_key(record.path.as_path()) {
                self.store.delete_by_path(&tables, &record.path)?;
                deleted += 1;
            }
        }

        // Added + modified flow through the normal pipeline; unchanged
        // files short-circuit on the mtime check inside the stage.
        let mut summary = self
            .process_files(meta, provider, on_disk, cancel)
            .await?;
        summary.files_deleted = deleted;
        Ok(summary)
    }

    /// Clear the container's tables, then index every root from scratch.
    pub async fn reindex_all(
        &self,
        meta: &ContainerMeta,
        provider: Arc<dyn EmbeddingProvider>,
        cancel: &CancellationToken,
    ) -> FathomResult<JobSummary> {
        let _guard = self.acquire(&meta.name)?;
        let tables = meta.tables();
        self.store.clear_container(&tables)?;

        let candidates = self.enumerate(&meta.roots);
        self.process_files(meta, provider, candidates, cancel).await
    }

    /// Index one file (watcher path). Deletes the file's fragments when it
    /// no longer exists on disk.
    pub async fn index_single(
        &self,
        meta: &ContainerMeta,
        provider: Arc<dyn EmbeddingProvider>,
        path: &Path,
    ) -> FathomResult<JobSummary> {
        let _guard = self.acquire(&meta.name)?;
        let tables = meta.tables();

        let Ok(metadata) = std::fs::metadata(path) else {
            let removed = self.store.delete_by_path(&tables, path)?;
            return Ok(JobSummary {
                files_deleted: usize::from(removed > 0),
                ..JobSummary::default()
            });
        };

        let mtime = mtime_epoch(&metadata);
        let candidates = vec![(path.to_path_buf(), mtime)];
        self.process_files(meta, provider, candidates, &CancellationToken::new())
            .await
    }

    /// Parallel, gitignore-aware enumeration of candidate files.
    fn enumerate(&self, roots: &[PathBuf]) -> Vec<(PathBuf, i64)> {
        let workers = self.config.indexing.workers();
        let collected = std::sync::Mutex::new(Vec::new());

        for root in roots {
            if !root.exists() {
                tracing::warn!(root = %root.display(), "indexed root does not exist, skipping");
                continue;
            }
            let walker = ignore::WalkBuilder::new(root)
                .add_custom_ignore_filename(&self.config.indexing.ignore_file)
                .threads(workers)
                .build_parallel();

            walker.run(|| {
                Box::new(|entry| {
                    let Ok(entry) = entry else {
                        return ignore::WalkState::Continue;
                    };
                    if entry.file_type().map_or(true, |t| !t.is_file()) {
                        return ignore::WalkState::Continue;
                    }
                    let Ok(metadata) = entry.metadata() else {
                        return ignore::WalkState::Continue;
                    };
                    let mtime = mtime_epoch(&metadata);
                    if let Ok(mut vec) = collected.lock() {
                        vec.push((entry.into_path(), mtime));
                    }
                    ignore::WalkState::Continue
                })
            });
        }

        let mut candidates = collected.into_inner().unwrap_or_default();
        // Deterministic job order regardless of walker interleaving.
        candidates.sort();
        candidates.dedup();
        candidates
    }

    /// Stream candidates through extract -> chunk -> embed -> commit.
    async fn process_files(
        &self,
        meta: &ContainerMeta,
        provider: Arc<dyn EmbeddingProvider>,
        candidates: Vec<(PathBuf, i64)>,
        cancel: &CancellationToken,
    ) -> FathomResult<JobSummary> {
        let tables = meta.tables();
        self.store.create_container(&tables)?;

        let total = candidates.len();
        let mut summary = JobSummary {
            files_seen: total,
            ..JobSummary::default()
        };

        let workers = self.config.indexing.workers();
        let semaphore = Arc::new(Semaphore::new(workers));
        let (tx, mut rx) = mpsc::channel::<StageResult>(workers * 2);

        // Extraction producers.
        let producer = {
            let indexing = self.config.indexing.clone();
            let chunking = self.config.chunking.clone();
            let store = Arc::clone(&self.store);
            let tables = tables.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for (path, mtime) in candidates {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                        break;
                    };

                    let known = store.file_record(&tables, &path).ok().flatten();
                    let indexing = indexing.clone();
                    let chunking = chunking.clone();
                    let tx = tx.clone();
                    tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        let result = extract_stage(&path, mtime, known.as_ref(), &indexing, &chunking);
                        let _ = tx.blocking_send(result);
                    });
                }
            })
        };

        // Embedding + commit consumer.
        let mut committed = 0usize;
        let mut job_error: Option<FathomError> = None;

        while let Some(stage) = rx.recv().await {
            match stage {
                StageResult::Unchanged => {}
                StageResult::HashMatch(record) => {
                    // mtime advanced, content identical: refresh freshness only.
                    self.store.update_file_record(&tables, &record)?;
                }
                StageResult::Skipped { path, reason } => {
                    tracing::debug!(path = %path.display(), reason = %reason, "skipped");
                    summary.files_skipped += 1;
                }
                StageResult::Ready(extracted) => {
                    if job_error.is_some() {
                        // Drain the channel; the job already failed.
                        continue;
                    }
                    match self
                        .embed_and_commit(&tables, meta, Arc::clone(&provider), &extracted)
                        .await
                    {
                        Ok(written) => {
                            summary.files_indexed += 1;
                            summary.fragments_written += written;
                            committed += 1;
                            let _ = self.events.send(IndexEvent::IndexingProgress {
                                current: committed,
                                total,
                                path: extracted.path.clone(),
                            });
                        }
                        Err(e) => {
                            tracing::warn!(
                                path = %extracted.path.display(),
                                error = %e,
                                "indexing job failed; committed batches are retained"
                            );
                            job_error = Some(e);
                        }
                    }
                }
            }

            // Cancellation is observed here, at the commit boundary.
            if cancel.is_cancelled() {
                break;
            }
        }
        producer.abort();

        if let Some(e) = job_error {
            return Err(e);
        }

        let message = if cancel.is_cancelled() {
            format!(
                "indexing cancelled after {} of {total} files",
                summary.files_indexed
            )
        } else {
            format!(
                "indexed {} files ({} fragments, {} skipped)",
                summary.files_indexed, summary.fragments_written, summary.files_skipped
            )
        };
        let _ = self.events.send(IndexEvent::IndexingComplete { message });

        Ok(summary)
    }

    /// Embed one file's fragments (with bounded retries) and commit them.
    async fn embed_and_commit(
        &self,
        tables: &ContainerTables,
        meta: &ContainerMeta,
        provider: Arc<dyn EmbeddingProvider>,
        extracted: &ExtractedFile,
    ) -> FathomResult<usize> {
        let dimension = meta.provider_identity.dimension;

        if extracted.fragments.is_empty() {
            self.store
                .replace_file(tables, &extracted.record, &[], dimension)?;
            return Ok(0);
        }

        let texts: Vec<String> = extracted.fragments.iter().map(|f| f.text.clone()).collect();
        let vectors = self.embed_with_retry(provider, texts).await?;

        if vectors.len() != extracted.fragments.len() {
            return Err(FathomError::Internal(format!(
                "provider returned {} vectors for {} fragments",
                vectors.len(),
                extracted.fragments.len()
            )));
        }

        let fragments: Vec<Fragment> = extracted
            .fragments
            .iter()
            .zip(vectors)
            .map(|(raw, vector)| Fragment {
                id: Fragment::file_id(&extracted.path, raw.ordinal),
                path: extracted.path.clone(),
                ordinal: raw.ordinal,
                offset_start: raw.offset_start,
                offset_end: raw.offset_end,
                text: raw.text.clone(),
                vector,
                kind: raw.kind,
                language: raw.language,
                mtime: extracted.record.mtime,
            })
            .collect();

        self.store
            .replace_file(tables, &extracted.record, &fragments, dimension)?;
        Ok(fragments.len())
    }

    /// Run one embedding batch on the blocking pool, retrying transient
    /// provider failures on the configured backoff schedule.
    async fn embed_with_retry(
        &self,
        provider: Arc<dyn EmbeddingProvider>,
        texts: Vec<String>,
    ) -> FathomResult<Vec<Vec<f32>>> {
        let max_retries = self.config.indexing.max_retries.min(RETRY_BACKOFF.len());
        let texts = Arc::new(texts);

        let mut attempt = 0usize;
        loop {
            let provider = Arc::clone(&provider);
            let texts = Arc::clone(&texts);
            let result = tokio::task::spawn_blocking(move || {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                provider.embed(&refs)
            })
            .await
            .map_err(|e| FathomError::Internal(format!("embedding task panicked: {e}")))?;

            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = RETRY_BACKOFF[attempt];
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "embedding failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Extraction + chunking stage, run on the blocking pool.
fn extract_stage(
    path: &Path,
    mtime: i64,
    known: Option<&FileRecord>,
    indexing: &crate::config::IndexingConfig,
    chunking: &crate::config::ChunkingConfig,
) -> StageResult {
    // Freshness gate: an unchanged mtime means an unchanged file.
    if let Some(record) = known {
        if record.mtime == mtime {
            return StageResult::Unchanged;
        }
    }

    let body = match extract::extract(path, indexing) {
        Extraction::Body(body) => body,
        Extraction::Skipped { path, reason } => return StageResult::Skipped { path, reason },
    };

    let content_hash = hash_body(&body);
    let record = FileRecord {
        path: path.to_path_buf(),
        mtime,
        content_hash,
        extractor: body.extractor,
        language: body.language,
    };

    // mtime advanced but content identical: skip re-embedding.
    if let Some(old) = known {
        if old.content_hash == content_hash {
            return StageResult::HashMatch(record);
        }
    }

    let fragments = chunker::chunk_body(&body, chunking);
    StageResult::Ready(Box::new(ExtractedFile {
        path: path.to_path_buf(),
        record,
        fragments,
    }))
}

/// xxh3 over the body text plus enrichment blocks.
fn hash_body(body: &ExtractedBody) -> u64 {
    use xxhash_rust::xxh3::Xxh3;
    let mut hasher = Xxh3::new();
    hasher.update(body.text.as_bytes());
    for block in &body.metadata_blocks {
        hasher.update(block.text.as_bytes());
    }
    hasher.digest()
}

/// Modification time as seconds since the epoch.
pub fn mtime_epoch(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::{ProviderIdentity, ProviderKind};

    struct FixedProvider {
        identity: ProviderIdentity,
    }

    impl EmbeddingProvider for FixedProvider {
        fn identity(&self) -> &ProviderIdentity {
            &self.identity
        }

        fn embed(&self, texts: &[&str]) -> FathomResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    struct FailingProvider {
        identity: ProviderIdentity,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl EmbeddingProvider for FailingProvider {
        fn identity(&self) -> &ProviderIdentity {
            &self.identity
        }

        fn embed(&self, _texts: &[&str]) -> FathomResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(FathomError::Transport {
                reason: "connection refused".into(),
            })
        }
    }

    fn identity() -> ProviderIdentity {
        ProviderIdentity {
            kind: ProviderKind::Local,
            model: "test".into(),
            dimension: 3,
        }
    }

    fn test_setup(data_dir: &Path) -> (Indexer, ContainerMeta) {
        let mut config = Config::defaults(data_dir);
        config.indexing.git_enrichment = false;
        config.indexing.ocr_enabled = false;
        let store = Arc::new(Store::open(&config.db_path()).expect("store"));
        let (events, _) = broadcast::channel(64);
        let indexer = Indexer::new(config, store, events);
        let meta = ContainerMeta {
            name: "Default".into(),
            description: String::new(),
            provider_identity: identity(),
            roots: Vec::new(),
            created_at: 0,
        };
        (indexer, meta)
    }

    #[tokio::test]
    async fn test_index_root_then_noop_rescan() {
        let data = tempfile::tempdir().expect("tmp");
        let docs = tempfile::tempdir().expect("tmp");
        std::fs::write(docs.path().join("a.md"), "# Alpha\n\nserver costs\n").expect("write");
        std::fs::write(docs.path().join("b.md"), "# Beta\n\nholiday photos\n").expect("write");

        let (indexer, mut meta) = test_setup(data.path());
        meta.roots = vec![docs.path().to_path_buf()];
        let provider = Arc::new(FixedProvider { identity: identity() });

        let cancel = CancellationToken::new();
        let summary = indexer
            .index_root(&meta, provider.clone(), docs.path(), &cancel)
            .await
            .expect("index");
        assert_eq!(summary.files_indexed, 2);
        assert!(summary.fragments_written >= 2);

        // A rescan with nothing changed is a no-op.
        let delta = indexer
            .reindex_delta(&meta, provider, &cancel)
            .await
            .expect("delta");
        assert_eq!(delta.files_indexed, 0);
        assert_eq!(delta.files_deleted, 0);
        assert_eq!(delta.files_skipped, 0);
    }

    #[tokio::test]
    async fn test_reindex_delta_detects_deletions() {
        let data = tempfile::tempdir().expect("tmp");
        let docs = tempfile::tempdir().expect("tmp");
        let victim = docs.path().join("gone.txt");
        std::fs::write(&victim, "alpha content here").expect("write");

        let (indexer, mut meta) = test_setup(data.path());
        meta.roots = vec![docs.path().to_path_buf()];
        let provider = Arc::new(FixedProvider { identity: identity() });
        let cancel = CancellationToken::new();

        indexer
            .index_root(&meta, provider.clone(), docs.path(), &cancel)
            .await
            .expect("index");

        std::fs::remove_file(&victim).expect("remove");
        let delta = indexer
            .reindex_delta(&meta, provider, &cancel)
            .await
            .expect("delta");
        assert_eq!(delta.files_deleted, 1);

        let tables = meta.tables();
        assert!(indexer
            .store
            .fragments_for_path(&tables, &victim)
            .expect("read")
            .is_empty());
    }

    #[tokio::test]
    async fn test_index_single_missing_file_deletes() {
        let data = tempfile::tempdir().expect("tmp");
        let docs = tempfile::tempdir().expect("tmp");
        let path = docs.path().join("note.txt");
        std::fs::write(&path, "note body").expect("write");

        let (indexer, mut meta) = test_setup(data.path());
        meta.roots = vec![docs.path().to_path_buf()];
        let provider = Arc::new(FixedProvider { identity: identity() });

        indexer
            .index_single(&meta, provider.clone(), &path)
            .await
            .expect("index");
        std::fs::remove_file(&path).expect("remove");
        let summary = indexer
            .index_single(&meta, provider, &path)
            .await
            .expect("reindex");
        assert_eq!(summary.files_deleted, 1);
    }

    #[tokio::test]
    async fn test_busy_rejects_second_job() {
        let data = tempfile::tempdir().expect("tmp");
        let (indexer, meta) = test_setup(data.path());
        let _guard = indexer.acquire(&meta.name).expect("first");
        let err = indexer.acquire(&meta.name).unwrap_err();
        assert!(matches!(err, FathomError::Busy { .. }));
    }

    #[tokio::test]
    async fn test_busy_slot_released_on_drop() {
        let data = tempfile::tempdir().expect("tmp");
        let (indexer, meta) = test_setup(data.path());
        drop(indexer.acquire(&meta.name).expect("first"));
        assert!(indexer.acquire(&meta.name).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_retries_then_fails_job() {
        let data = tempfile::tempdir().expect("tmp");
        let docs = tempfile::tempdir().expect("tmp");
        std::fs::write(docs.path().join("a.txt"), "alpha content").expect("write");

        let (indexer, mut meta) = test_setup(data.path());
        meta.roots = vec![docs.path().to_path_buf()];
        let provider = Arc::new(FailingProvider {
            identity: identity(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });

        let cancel = CancellationToken::new();
        let err = indexer
            .index_root(&meta, provider.clone(), docs.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FathomError::Transport { .. }));
        // Initial attempt plus three retries.
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 4);
    }
}
