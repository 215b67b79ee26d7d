//! Hybrid retrieval pipeline.
//!
//! Steps, in order: query expansion, one query embedding, dense and lexical
//! candidate retrieval, Reciprocal Rank Fusion, annotation overlay,
//! optional cross-encoder reranking on the blocking pool, score
//! normalization to [0, 100], mandatory per-file deduplication, and
//! filtering. The pipeline is deterministic for a fixed store snapshot,
//! query, and provider; ties break by fragment ordinal then path.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RerankerConfig, SearchConfig};
use crate::error::{FathomError, FathomResult};
use crate::provider::EmbeddingProvider;
use crate::reranker::Reranker;
use crate::store::{Candidate, ContainerTables, Store};
use crate::types::{ChunkKind, SearchHit, SearchRequest};

/// Built-in multilingual stop-word set for query expansion.
const STOPWORDS: &[&str] = &[
    // English
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "how",
    "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "will", "with", "about",
    // German
    "der", "die", "das", "und", "ist", "ein", "eine", "mit", "von", "für", "auf", "nicht",
    // French
    "le", "la", "les", "un", "une", "des", "et", "est", "dans", "pour", "sur", "que", "qui",
    // Spanish
    "el", "los", "las", "y", "es", "en", "de", "para", "por", "con", "una",
    // Portuguese
    "o", "os", "uma", "do", "da", "em", "não", "se", "ao",
];

/// Default snippet length when the caller doesn't ask for context.
const DEFAULT_CONTEXT_BYTES: usize = 512;

/// Hard cap on requested snippet length.
const MAX_CONTEXT_BYTES: usize = 10_000;

/// The two query forms produced by expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExpansion {
    /// Original query, used for embedding and reranking.
    pub raw: String,
    /// OR-combined keyword form for FTS; empty means skip the FTS leg.
    pub fts_expr: String,
}

/// Lowercase, strip stop words, and build the OR-combined keyword form.
pub fn expand_query(raw: &str) -> QueryExpansion {
    let mut seen = std::collections::HashSet::new();
    let mut keywords = Vec::new();

    for token in raw
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .filter(|t| !STOPWORDS.contains(t))
    {
        if seen.insert(token.to_string()) {
            keywords.push(format!("\"{token}\""));
        }
    }

    QueryExpansion {
        raw: raw.to_string(),
        fts_expr: keywords.join(" OR "),
    }
}

/// One fused candidate awaiting normalization.
#[derive(Debug, Clone)]
struct Fused {
    candidate: Candidate,
    score: f64,
}

/// Reciprocal Rank Fusion across the dense and lexical candidate lists.
/// Ranks are 1-based; a missing list contributes 0.
fn fuse(dense: &[Candidate], lexical: &[Candidate], rrf_k: u32) -> Vec<Fused> {
    let k = f64::from(rrf_k);
    let mut scores: HashMap<String, Fused> = HashMap::new();

    for list in [dense, lexical] {
        for (rank0, candidate) in list.iter().enumerate() {
            let contribution = 1.0 / (k + (rank0 + 1) as f64);
            scores
                .entry(candidate.fragment_id.clone())
                .and_modify(|f| f.score += contribution)
                .or_insert_with(|| Fused {
                    candidate: candidate.clone(),
                    score: contribution,
                });
        }
    }

    let mut fused: Vec<Fused> = scores.into_values().collect();
    sort_fused(&mut fused);
    fused
}

/// Deterministic ordering: score descending, then ordinal, then path.
fn sort_fused(fused: &mut [Fused]) {
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate.ordinal.cmp(&b.candidate.ordinal))
            .then_with(|| a.candidate.path.cmp(&b.candidate.path))
    });
}

/// Execute the full retrieval pipeline for one request.
pub async fn run(
    store: Arc<Store>,
    tables: ContainerTables,
    provider: Arc<dyn EmbeddingProvider>,
    reranker: Arc<Reranker>,
    search_config: &SearchConfig,
    reranker_config: &RerankerConfig,
    request: &SearchRequest,
) -> FathomResult<Vec<SearchHit>> {
    let top_k = validate(request, search_config)?;
    let context_bytes = request
        .context_bytes
        .unwrap_or(DEFAULT_CONTEXT_BYTES)
        .min(MAX_CONTEXT_BYTES);

    // Step 1: query expansion.
    let expansion = expand_query(&request.query);

    // Step 2: embed the query -- the only per-query embedding.
    let query_vector = {
        let provider = Arc::clone(&provider);
        let raw = expansion.raw.clone();
        let mut vectors = tokio::task::spawn_blocking(move || provider.embed(&[raw.as_str()]))
            .await
            .map_err(|e| FathomError::Internal(format!("embed task panicked: {e}")))??;
        vectors.pop().ok_or_else(|| {
            FathomError::Internal("provider returned no vector for query".into())
        })?
    };

    // Steps 3-4: dense and lexical candidates.
    let k_dense = (top_k * search_config.dense_multiplier).max(search_config.dense_floor);
    let dense = store.ann_search(&tables, &query_vector, k_dense, None)?;
    let lexical = store.fts_search(&tables, &expansion.fts_expr, k_dense)?;

    // Step 5: Reciprocal Rank Fusion.
    let mut fused = fuse(&dense, &lexical, search_config.rrf_k);

    // Step 6: annotation overlay -- dense-only, merged by max score.
    let annotations = store.ann_search(&tables, &query_vector, top_k, Some(ChunkKind::Annotation))?;
    overlay_annotations(&mut fused, &annotations, search_config.rrf_k);

    if fused.is_empty() {
        return Ok(Vec::new());
    }

    // Steps 7-8: rerank the head of the fused list, then normalize.
    let scored = rerank_and_normalize(
        fused,
        &expansion.raw,
        Arc::clone(&reranker),
        reranker_config,
    )
    .await;

    // Steps 9-10: per-file dedup (mandatory), filters, top-k.
    let mut hits = Vec::with_capacity(top_k);
    let mut seen_paths = std::collections::HashSet::new();

    for (candidate, score) in scored {
        if !seen_paths.insert(candidate.path.clone()) {
            continue;
        }
        if let Some(min_score) = request.min_score {
            if score < min_score {
                continue;
            }
        }
        if !passes_filters(&candidate.path, request) {
            continue;
        }
        hits.push(SearchHit {
            path: candidate.path,
            snippet: truncate_snippet(&candidate.text, context_bytes),
            score,
            ordinal: candidate.ordinal,
        });
        if hits.len() == top_k {
            break;
        }
    }

    Ok(hits)
}

fn validate(request: &SearchRequest, config: &SearchConfig) -> FathomResult<usize> {
    if request.query.trim().is_empty() {
        return Err(FathomError::BadInput {
            details: "query must not be empty".into(),
        });
    }
    let top_k = request.top_k.unwrap_or(config.default_top_k);
    if top_k == 0 || top_k > config.max_top_k {
        return Err(FathomError::BadInput {
            details: format!("top_k must be in 1..={}", config.max_top_k),
        });
    }
    if let Some(min_score) = request.min_score {
        if !(0.0..=100.0).contains(&min_score) {
            return Err(FathomError::BadInput {
                details: "min_score must be in [0, 100]".into(),
            });
        }
    }
    if let Some(context) = request.context_bytes {
        if context > MAX_CONTEXT_BYTES {
            return Err(FathomError::BadInput {
                details: format!("context_bytes must be at most {MAX_CONTEXT_BYTES}"),
            });
        }
    }
    Ok(top_k)
}

/// Merge annotation candidates into the fused list, keeping the maximum
/// score per fragment identifier. Overlay scores are rank-reciprocal so
/// they live on the same scale as the RRF scores they merge into.
fn overlay_annotations(fused: &mut Vec<Fused>, annotations: &[Candidate], rrf_k: u32) {
    let k = f64::from(rrf_k);
    for (rank0, candidate) in annotations.iter().enumerate() {
        let score = 1.0 / (k + (rank0 + 1) as f64);
        match fused
            .iter_mut()
            .find(|f| f.candidate.fragment_id == candidate.fragment_id)
        {
            Some(existing) => existing.score = existing.score.max(score),
            None => fused.push(Fused {
                candidate: candidate.clone(),
                score,
            }),
        }
    }
    sort_fused(fused);
}

/// Rerank the top candidates and map scores to [0, 100].
///
/// When the reranker is disabled, errors, or exceeds its deadline, the
/// fused order is kept and RRF scores are min-max normalized instead --
/// degraded mode is not an error.
async fn rerank_and_normalize(
    fused: Vec<Fused>,
    raw_query: &str,
    reranker: Arc<Reranker>,
    config: &RerankerConfig,
) -> Vec<(Candidate, f32)> {
    let pool = config.max_candidates.min(fused.len());

    if reranker.is_enabled() && pool > 0 {
        let query = raw_query.to_string();
        let texts: Vec<String> = fused[..pool]
            .iter()
            .map(|f| f.candidate.text.clone())
            .collect();
        let reranker_clone = Arc::clone(&reranker);
        let timeout = Duration::from_millis(config.timeout_ms);

        let scores = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                reranker_clone.score(&query, &refs)
            }),
        )
        .await;

        match scores {
            Ok(Ok(scores)) if scores.iter().all(Option::is_some) && !scores.is_empty() => {
                // The reranked head replaces the fused list; the tail past
                // the pool held ranks the pipeline could never return.
                let mut reranked: Vec<(Candidate, f32)> = fused
                    .into_iter()
                    .take(pool)
                    .zip(scores)
                    .map(|(f, logit)| {
                        let score = sigmoid(logit.unwrap_or(0.0)) * 100.0;
                        (f.candidate, score)
                    })
                    .collect();
                reranked.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.ordinal.cmp(&b.0.ordinal))
                        .then_with(|| a.0.path.cmp(&b.0.path))
                });
                return reranked;
            }
            Ok(Ok(_)) => {
                tracing::debug!("reranker unavailable, keeping fused order");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "rerank task panicked, keeping fused order");
            }
            Err(_) => {
                tracing::debug!("rerank deadline exceeded, keeping fused order");
            }
        }
    }

    normalize_rrf(fused)
}

/// Min-max normalize RRF scores to [0, 100] over the candidate set.
fn normalize_rrf(fused: Vec<Fused>) -> Vec<(Candidate, f32)> {
    let min = fused.iter().map(|f| f.score).fold(f64::INFINITY, f64::min);
    let max = fused
        .iter()
        .map(|f| f.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    fused
        .into_iter()
        .map(|f| {
            let score = if range > 0.0 {
                ((f.score - min) / range * 100.0) as f32
            } else {
                100.0
            };
            (f.candidate, score)
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn passes_filters(path: &Path, request: &SearchRequest) -> bool {
    if let Some(extensions) = &request.file_extensions {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext)) {
            return false;
        }
    }
    if let Some(prefix) = &request.path_prefix {
        if !path.starts_with(prefix) {
            return false;
        }
    }
    true
}

/// Truncate a snippet to at most `max_bytes`, snapped to a char boundary.
fn truncate_snippet(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn candidate(id: &str, path: &str, ordinal: u32, score: f32) -> Candidate {
        Candidate {
            fragment_id: id.into(),
            path: PathBuf::from(path),
            ordinal,
            text: format!("text of {id}"),
            kind: ChunkKind::Doc,
            score,
        }
    }

    #[test]
    fn test_expand_query_strips_stopwords() {
        let expansion = expand_query("Invoice about the server costs");
        assert_eq!(expansion.fts_expr, "\"invoice\" OR \"server\" OR \"costs\"");
        assert_eq!(expansion.raw, "Invoice about the server costs");
    }

    #[test]
    fn test_expand_query_dedups_tokens() {
        let expansion = expand_query("server server SERVER");
        assert_eq!(expansion.fts_expr, "\"server\"");
    }

    #[test]
    fn test_expand_query_all_stopwords_degrades_to_empty() {
        let expansion = expand_query("the of and");
        assert!(expansion.fts_expr.is_empty());
    }

    #[test]
    fn test_fuse_sums_reciprocal_ranks() {
        let dense = vec![candidate("x", "/x", 0, 0.9), candidate("y", "/y", 0, 0.5)];
        let lexical = vec![candidate("y", "/y", 0, -1.0), candidate("z", "/z", 0, -2.0)];
        let fused = fuse(&dense, &lexical, 60);

        // y appears in both lists: 1/(60+2) + 1/(60+1).
        let y = fused.iter().find(|f| f.candidate.fragment_id == "y").unwrap();
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((y.score - expected).abs() < 1e-12);
        // y outranks x (1/61 alone) and z (1/62 alone).
        assert_eq!(fused[0].candidate.fragment_id, "y");
    }

    #[test]
    fn test_fuse_tie_break_is_ordinal_then_path() {
        // Same single-list rank contribution, distinguished by ordinal/path.
        let dense = vec![candidate("a", "/b.txt", 1, 0.9)];
        let lexical = vec![candidate("b", "/a.txt", 1, 0.9)];
        let fused = fuse(&dense, &lexical, 60);
        assert_eq!(fused[0].candidate.path, PathBuf::from("/a.txt"));
    }

    #[test]
    fn test_overlay_keeps_max_score() {
        let mut fused = fuse(&[candidate("ann-1", "/f", 0, 0.2)], &[], 60);
        let strong = fused[0].score;
        // Overlay rank 1 has the same reciprocal value; max keeps it stable.
        overlay_annotations(&mut fused, &[candidate("ann-1", "/f", 0, 0.9)], 60);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - strong).abs() < 1e-12);

        // A new annotation joins the list.
        overlay_annotations(&mut fused, &[candidate("ann-2", "annotation:2", 0, 0.9)], 60);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_normalize_rrf_spans_0_to_100() {
        let fused = fuse(
            &[
                candidate("a", "/a", 0, 0.0),
                candidate("b", "/b", 0, 0.0),
                candidate("c", "/c", 0, 0.0),
            ],
            &[],
            60,
        );
        let scored = normalize_rrf(fused);
        assert!((scored[0].1 - 100.0).abs() < 1e-6);
        assert!((scored.last().unwrap().1 - 0.0).abs() < 1e-6);
        for (_, score) in &scored {
            assert!((0.0..=100.0).contains(score));
        }
    }

    #[test]
    fn test_normalize_rrf_single_candidate_is_100() {
        let fused = fuse(&[candidate("a", "/a", 0, 0.0)], &[], 60);
        let scored = normalize_rrf(fused);
        assert_eq!(scored[0].1, 100.0);
    }

    #[test]
    fn test_sigmoid_range() {
        assert!(sigmoid(-10.0) < 0.001);
        assert!(sigmoid(10.0) > 0.999);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_filters() {
        let request = SearchRequest {
            file_extensions: Some(vec!["md".into()]),
            path_prefix: Some(PathBuf::from("/docs")),
            ..SearchRequest::default()
        };
        assert!(passes_filters(Path::new("/docs/readme.md"), &request));
        assert!(!passes_filters(Path::new("/docs/main.rs"), &request));
        assert!(!passes_filters(Path::new("/src/readme.md"), &request));
        // Extension filter tolerates a leading dot in the allow-list.
        let dotted = SearchRequest {
            file_extensions: Some(vec![".md".into()]),
            ..SearchRequest::default()
        };
        assert!(passes_filters(Path::new("/x/readme.md"), &dotted));
    }

    #[test]
    fn test_truncate_snippet_respects_char_boundaries() {
        let text = "héllo wörld";
        let snippet = truncate_snippet(text, 3);
        assert!(text.starts_with(&snippet));
        assert!(snippet.len() <= 3);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let config = SearchConfig::default();
        let empty = SearchRequest::default();
        assert!(matches!(
            validate(&empty, &config),
            Err(FathomError::BadInput { .. })
        ));

        let oversized = SearchRequest {
            query: "q".into(),
            top_k: Some(500),
            ..SearchRequest::default()
        };
        assert!(validate(&oversized, &config).is_err());

        let bad_score = SearchRequest {
            query: "q".into(),
            min_score: Some(150.0),
            ..SearchRequest::default()
        };
        assert!(validate(&bad_score, &config).is_err());
    }
}
