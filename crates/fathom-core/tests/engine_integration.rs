//! End-to-end engine tests against a deterministic embedding backend.
//!
//! The bag-of-tokens provider below hashes words into buckets, so texts
//! sharing vocabulary land near each other in embedding space without any
//! model weights. Everything else -- extraction, chunking, storage, fusion,
//! dedup, containers, annotations -- is the real pipeline.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fathom_core::config::Config;
use fathom_core::error::{FathomError, FathomResult};
use fathom_core::provider::{l2_normalize, EmbeddingProvider};
use fathom_core::types::{
    AnnotationSource, DiffWindow, ProviderIdentity, ProviderKind, SearchRequest,
};
use fathom_core::Engine;

const DIM: usize = 64;

/// Deterministic bag-of-tokens embedding: each token increments one of 64
/// hash buckets, then the vector is unit-normalized.
struct HashProvider {
    identity: ProviderIdentity,
}

impl HashProvider {
    fn new(model: &str, dimension: usize) -> Self {
        Self {
            identity: ProviderIdentity {
                kind: ProviderKind::Local,
                model: model.into(),
                dimension,
            },
        }
    }
}

impl EmbeddingProvider for HashProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn embed(&self, texts: &[&str]) -> FathomResult<Vec<Vec<f32>>> {
        let dimension = self.identity.dimension;
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; dimension];
                for token in text
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| t.len() >= 2)
                {
                    let mut hasher = std::collections::hash_map::DefaultHasher::new();
                    token.hash(&mut hasher);
                    vector[(hasher.finish() as usize) % dimension] += 1.0;
                }
                l2_normalize(&mut vector);
                vector
            })
            .collect())
    }
}

fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::defaults(data_dir);
    config.indexing.git_enrichment = false;
    config.indexing.ocr_enabled = false;
    config.reranker.enabled = false;
    config
}

fn test_engine(data_dir: &Path) -> Arc<Engine> {
    Arc::new(
        Engine::with_provider(
            test_config(data_dir),
            Arc::new(HashProvider::new("bag-of-tokens", DIM)),
        )
        .expect("engine"),
    )
}

fn request(query: &str, top_k: usize) -> SearchRequest {
    SearchRequest {
        query: query.into(),
        top_k: Some(top_k),
        ..SearchRequest::default()
    }
}

#[tokio::test]
async fn freshness_scenario() {
    let data = tempfile::tempdir().expect("tmp");
    let docs = tempfile::tempdir().expect("tmp");
    std::fs::write(
        docs.path().join("notes.md"),
        "The meeting about server cost overruns\n",
    )
    .expect("write");
    std::fs::write(
        docs.path().join("beach.md"),
        "Holiday photos from the beach\n",
    )
    .expect("write");

    let engine = test_engine(data.path());
    let summary = engine.index_folder(docs.path()).await.expect("index");
    assert_eq!(summary.files_indexed, 2);

    let hits = engine
        .search(&request("invoice about server costs", 5))
        .await
        .expect("search");

    let notes = hits
        .iter()
        .find(|h| h.path.file_name().is_some_and(|n| n == "notes.md"))
        .expect("notes.md must be in the results");
    assert!(notes.score >= 50.0, "score was {}", notes.score);
}

#[tokio::test]
async fn delete_propagation() {
    let data = tempfile::tempdir().expect("tmp");
    let docs_dir = tempfile::tempdir().expect("tmp");
    let docs = docs_dir.path().canonicalize().expect("canon");
    let a = docs.join("a.txt");
    let b = docs.join("b.txt");
    std::fs::write(&a, "alpha release checklist\n").expect("write");
    std::fs::write(&b, "alpha launch retrospective\n").expect("write");

    let engine = test_engine(data.path());
    engine.index_folder(&docs).await.expect("index");

    let before = engine.search(&request("alpha", 5)).await.expect("search");
    assert_eq!(before.len(), 2);

    std::fs::remove_file(&a).expect("remove");
    let summary = engine.reindex_delta(None).await.expect("delta");
    assert_eq!(summary.files_deleted, 1);

    let after = engine.search(&request("alpha", 5)).await.expect("search");
    assert!(after.iter().all(|h| h.path != a), "a.txt must be gone");
    assert!(after.iter().any(|h| h.path == b), "b.txt must remain");
}

#[tokio::test]
async fn rename_keeps_fragment_count() {
    let data = tempfile::tempdir().expect("tmp");
    let docs_dir = tempfile::tempdir().expect("tmp");
    let docs = docs_dir.path().canonicalize().expect("canon");
    let old = docs.join("old.md");
    std::fs::write(&old, "# Zanzibar expedition notes\n\nroute planning details\n")
        .expect("write");

    let engine = test_engine(data.path());
    engine.index_folder(&docs).await.expect("index");
    let before = engine.index_status(None).expect("status");

    let new = docs.join("new.md");
    std::fs::rename(&old, &new).expect("rename");
    engine.reindex_delta(None).await.expect("delta");

    let hits = engine
        .search(&request("zanzibar expedition", 5))
        .await
        .expect("search");
    assert!(hits.iter().any(|h| h.path == new), "new.md must be found");
    assert!(hits.iter().all(|h| h.path != old), "old.md must be gone");

    let after = engine.index_status(None).expect("status");
    assert_eq!(after.total_chunks, before.total_chunks);
    assert_eq!(after.total_files, before.total_files);
}

#[tokio::test]
async fn provider_mismatch_recommends_rebuild() {
    let data = tempfile::tempdir().expect("tmp");
    let docs = tempfile::tempdir().expect("tmp");
    std::fs::write(docs.path().join("a.txt"), "content\n").expect("write");

    {
        let engine = test_engine(data.path());
        engine.index_folder(docs.path()).await.expect("index");
    }

    // Same data dir, different provider dimension.
    let engine = Arc::new(
        Engine::with_provider(
            test_config(data.path()),
            Arc::new(HashProvider::new("bag-of-tokens", 32)),
        )
        .expect("engine"),
    );

    let err = engine.search(&request("content", 5)).await.unwrap_err();
    match err {
        FathomError::ProviderMismatch { .. } => {
            assert!(err.to_string().contains("rebuild"));
        }
        other => panic!("expected ProviderMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn per_file_dedup_returns_distinct_paths() {
    let data = tempfile::tempdir().expect("tmp");
    let docs = tempfile::tempdir().expect("tmp");

    // One large file whose many fragments all mention "parser", plus a
    // dozen small files that also mention it.
    let mut big = String::new();
    for i in 0..60 {
        big.push_str(&format!(
            "## Section {i}\n\nthe parser handles case {i} with recovery, \
             backtracking over malformed input, reporting the span of the \
             offending token, and resuming at the next statement boundary so \
             later sections still produce diagnostics.\n\n"
        ));
    }
    std::fs::write(docs.path().join("parser_guide.md"), &big).expect("write");
    for i in 0..12 {
        std::fs::write(
            docs.path().join(format!("note_{i:02}.txt")),
            format!("quick parser remark number {i}\n"),
        )
        .expect("write");
    }

    let engine = test_engine(data.path());
    let summary = engine.index_folder(docs.path()).await.expect("index");
    assert!(summary.fragments_written > 20, "the guide must chunk into many fragments");

    let hits = engine.search(&request("parser", 10)).await.expect("search");
    assert_eq!(hits.len(), 10);

    let mut paths: Vec<&PathBuf> = hits.iter().map(|h| &h.path).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 10, "every returned path must be distinct");
}

#[tokio::test]
async fn scores_are_descending_and_bounded() {
    let data = tempfile::tempdir().expect("tmp");
    let docs = tempfile::tempdir().expect("tmp");
    for (name, text) in [
        ("a.md", "database migration plan for billing"),
        ("b.md", "billing database schema overview"),
        ("c.md", "frontend styling conventions"),
        ("d.md", "billing reconciliation runbook"),
    ] {
        std::fs::write(docs.path().join(name), text).expect("write");
    }

    let engine = test_engine(data.path());
    engine.index_folder(docs.path()).await.expect("index");

    let hits = engine
        .search(&request("billing database", 10))
        .await
        .expect("search");
    assert!(!hits.is_empty());
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score, "scores must descend");
    }
    for hit in &hits {
        assert!((0.0..=100.0).contains(&hit.score));
    }

    // Determinism: the same query against the same snapshot is identical.
    let again = engine
        .search(&request("billing database", 10))
        .await
        .expect("search");
    let paths: Vec<_> = hits.iter().map(|h| (&h.path, h.ordinal)).collect();
    let paths_again: Vec<_> = again.iter().map(|h| (&h.path, h.ordinal)).collect();
    assert_eq!(paths, paths_again);
}

#[tokio::test]
async fn min_score_and_extension_filters() {
    let data = tempfile::tempdir().expect("tmp");
    let docs = tempfile::tempdir().expect("tmp");
    std::fs::write(docs.path().join("match.md"), "kubernetes upgrade notes").expect("write");
    std::fs::write(docs.path().join("match.txt"), "kubernetes upgrade draft").expect("write");

    let engine = test_engine(data.path());
    engine.index_folder(docs.path()).await.expect("index");

    let mut req = request("kubernetes upgrade", 10);
    req.file_extensions = Some(vec!["md".into()]);
    let hits = engine.search(&req).await.expect("search");
    assert!(!hits.is_empty());
    assert!(hits
        .iter()
        .all(|h| h.path.extension().is_some_and(|e| e == "md")));

    let mut req = request("kubernetes upgrade", 10);
    req.min_score = Some(100.0);
    let hits = engine.search(&req).await.expect("search");
    assert!(hits.iter().all(|h| h.score >= 100.0));
}

#[tokio::test]
async fn read_file_refuses_out_of_scope_paths() {
    let data = tempfile::tempdir().expect("tmp");
    let docs = tempfile::tempdir().expect("tmp");
    let notes = docs.path().join("notes.md");
    std::fs::write(&notes, "line one\nline two\nline three\n").expect("write");

    let engine = test_engine(data.path());
    engine.index_folder(docs.path()).await.expect("index");

    // In scope, full read and line slice.
    let full = engine.read_file(&notes, None).expect("read");
    assert!(full.contains("line two"));
    let slice = engine.read_file(&notes, Some((2, 3))).expect("slice");
    assert_eq!(slice, "line two\nline three");

    // Outside every indexed root.
    let stray = data.path().join("stray.txt");
    std::fs::write(&stray, "secret").expect("write");
    let err = engine.read_file(&stray, None).unwrap_err();
    assert!(matches!(err, FathomError::BadInput { .. }), "got {err:?}");

    // Traversal out of the root is refused after canonicalization.
    let sneaky = docs.path().join("sub").join("..").join("..");
    let sneaky = sneaky.join(stray.file_name().expect("name"));
    assert!(engine.read_file(&sneaky, None).is_err());
}

#[tokio::test]
async fn annotations_survive_file_deletion_and_search_as_pseudo_paths() {
    let data = tempfile::tempdir().expect("tmp");
    let docs = tempfile::tempdir().expect("tmp");
    let report = docs.path().join("report.md");
    std::fs::write(&report, "quarterly outcomes summary\n").expect("write");

    let engine = test_engine(data.path());
    engine.index_folder(docs.path()).await.expect("index");

    let annotation = engine
        .add_annotation(
            None,
            &report,
            "flagged: numbers disagree with the ledger",
            AnnotationSource::Agent,
        )
        .await
        .expect("annotate");

    // The annotation overlay surfaces the note under its pseudo-path, so
    // it never displaces the file it describes.
    let hits = engine
        .search(&request("ledger numbers disagree", 5))
        .await
        .expect("search");
    let pseudo = PathBuf::from(format!("annotation:{}", annotation.id));
    assert!(hits.iter().any(|h| h.path == pseudo), "annotation must be a hit");

    // The note outlives the file it describes.
    std::fs::remove_file(&report).expect("remove");
    engine.reindex_delta(None).await.expect("delta");
    let remaining = engine.get_annotations(None, Some(&report)).expect("list");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, annotation.id);

    // Until explicitly removed.
    engine.delete_annotation(None, &annotation.id).expect("delete");
    assert!(engine
        .get_annotations(None, None)
        .expect("list")
        .is_empty());
    assert!(matches!(
        engine.delete_annotation(None, &annotation.id),
        Err(FathomError::NotFound { .. })
    ));
}

#[tokio::test]
async fn container_isolation_and_lifecycle() {
    let data = tempfile::tempdir().expect("tmp");
    let docs_a_dir = tempfile::tempdir().expect("tmp");
    let docs_b_dir = tempfile::tempdir().expect("tmp");
    let docs_a = docs_a_dir.path().canonicalize().expect("canon");
    let docs_b = docs_b_dir.path().canonicalize().expect("canon");
    std::fs::write(docs_a.join("a.txt"), "gardening almanac\n").expect("write");
    std::fs::write(docs_b.join("b.txt"), "gardening shopping list\n").expect("write");

    let engine = test_engine(data.path());

    // Index docs_a into Default, docs_b into a second container.
    engine.index_folder(&docs_a).await.expect("index a");
    engine
        .create_container("second", "scratch", None, vec![])
        .expect("create");
    engine.set_active_container("second").expect("activate");
    engine.index_folder(&docs_b).await.expect("index b");

    // Each container only sees its own fragments.
    let mut req = request("gardening", 10);
    req.container = Some("Default".into());
    let hits = engine.search(&req).await.expect("search default");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].path.starts_with(&docs_a));

    req.container = Some("second".into());
    let hits = engine.search(&req).await.expect("search second");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].path.starts_with(&docs_b));

    // Deleting the container drops its rows; Default is untouched.
    engine.set_active_container("Default").expect("re-activate");
    engine.delete_container("second").expect("delete");
    assert!(engine.index_status(Some("second")).is_err());
    let status = engine.index_status(Some("Default")).expect("status");
    assert_eq!(status.total_files, 1);

    // The reserved container refuses deletion.
    assert!(matches!(
        engine.delete_container("Default"),
        Err(FathomError::BadInput { .. })
    ));
}

#[tokio::test]
async fn reset_index_clears_rows_keeps_registration() {
    let data = tempfile::tempdir().expect("tmp");
    let docs = tempfile::tempdir().expect("tmp");
    std::fs::write(docs.path().join("a.txt"), "ephemeral data\n").expect("write");

    let engine = test_engine(data.path());
    engine.index_folder(docs.path()).await.expect("index");
    engine.reset_index(None).await.expect("reset");

    let status = engine.index_status(None).expect("status");
    assert_eq!(status.total_files, 0);
    assert_eq!(status.total_chunks, 0);
    // Roots survive a reset; a rescan repopulates.
    assert!(!status.indexed_paths.is_empty());
    let summary = engine.reindex_delta(None).await.expect("delta");
    assert_eq!(summary.files_indexed, 1);
}

#[tokio::test]
async fn diff_reports_recent_changes() {
    let data = tempfile::tempdir().expect("tmp");
    let docs_dir = tempfile::tempdir().expect("tmp");
    let docs = docs_dir.path().canonicalize().expect("canon");
    let path = docs.join("fresh.md");
    std::fs::write(&path, "freshly written words\n").expect("write");

    let engine = test_engine(data.path());
    engine.index_folder(&docs).await.expect("index");

    let entries = engine.diff(DiffWindow::ThirtyMinutes, true).expect("diff");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, path);
    assert!(entries[0]
        .preview
        .as_deref()
        .is_some_and(|p| p.contains("freshly")));
}

#[tokio::test]
async fn related_finds_vocabulary_neighbours() {
    let data = tempfile::tempdir().expect("tmp");
    let docs_dir = tempfile::tempdir().expect("tmp");
    let docs = docs_dir.path().canonicalize().expect("canon");
    let anchor = docs.join("espresso.md");
    std::fs::write(&anchor, "espresso grinder dialing guide\n").expect("write");
    std::fs::write(
        docs.join("coffee.md"),
        "espresso tasting notes and grinder settings\n",
    )
    .expect("write");
    std::fs::write(docs.join("tax.md"), "annual tax filing checklist\n").expect("write");

    let engine = test_engine(data.path());
    engine.index_folder(&docs).await.expect("index");

    let related = engine.related(&anchor, 2).await.expect("related");
    assert!(!related.is_empty());
    assert_eq!(
        related[0].path,
        docs.join("coffee.md"),
        "the vocabulary neighbour must rank first"
    );
    assert!(related.iter().all(|h| h.path != anchor), "self is excluded");

    // Caps are enforced.
    assert!(matches!(
        engine.related(&anchor, 31).await,
        Err(FathomError::BadInput { .. })
    ));
}

#[tokio::test]
async fn list_files_reports_sizes_and_filters() {
    let data = tempfile::tempdir().expect("tmp");
    let docs = tempfile::tempdir().expect("tmp");
    std::fs::write(docs.path().join("a.md"), "one\n").expect("write");
    std::fs::write(docs.path().join("b.rs"), "fn main() {}\n").expect("write");

    let engine = test_engine(data.path());
    engine.index_folder(docs.path()).await.expect("index");

    let all = engine.list_files(None, None, None).expect("list");
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|f| f.size_bytes > 0));

    let only_rs = engine
        .list_files(None, None, Some(&["rs".to_string()]))
        .expect("list rs");
    assert_eq!(only_rs.len(), 1);
    assert!(only_rs[0].path.ends_with("b.rs"));
}
