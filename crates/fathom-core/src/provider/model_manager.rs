//! Model file management: resolution, download, and caching.
//!
//! Model weights are fetched once from HuggingFace and cached permanently
//! under the data directory. Downloads go to a temporary name and are
//! renamed into place so a crashed download never masquerades as a model.
//!
//! Set `FATHOM_SKIP_MODEL_DOWNLOAD` to suppress all network access
//! (CI, tests, offline machines).

use std::path::{Path, PathBuf};

use crate::error::{FathomError, FathomResult};

/// A downloadable ONNX model plus its tokenizer.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// Model name; also the cache directory name.
    pub name: &'static str,
    /// URL of the ONNX weights.
    pub model_url: &'static str,
    /// URL of the tokenizer definition.
    pub tokenizer_url: &'static str,
    /// Output embedding dimension (0 for rerankers).
    pub dimension: usize,
}

/// Default sentence-embedding model.
pub const DEFAULT_EMBEDDING_MODEL: ModelSpec = ModelSpec {
    name: "all-MiniLM-L6-v2",
    model_url: "https://huggingface.co/Xenova/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx",
    tokenizer_url: "https://huggingface.co/Xenova/all-MiniLM-L6-v2/resolve/main/tokenizer.json",
    dimension: 384,
};

/// Larger code-aware embedding model.
pub const CODE_EMBEDDING_MODEL: ModelSpec = ModelSpec {
    name: "jina-embeddings-v2-base-code",
    model_url:
        "https://huggingface.co/jinaai/jina-embeddings-v2-base-code/resolve/main/onnx/model.onnx",
    tokenizer_url:
        "https://huggingface.co/jinaai/jina-embeddings-v2-base-code/resolve/main/tokenizer.json",
    dimension: 768,
};

/// Default cross-encoder reranker model.
pub const RERANKER_MODEL: ModelSpec = ModelSpec {
    name: "ms-marco-MiniLM-L-6-v2",
    model_url: "https://huggingface.co/Xenova/ms-marco-MiniLM-L-6-v2/resolve/main/onnx/model.onnx",
    tokenizer_url:
        "https://huggingface.co/Xenova/ms-marco-MiniLM-L-6-v2/resolve/main/tokenizer.json",
    dimension: 0,
};

/// Look up the spec for a configured model name.
pub fn spec_for(model_name: &str) -> Option<&'static ModelSpec> {
    match model_name {
        "all-MiniLM-L6-v2" => Some(&DEFAULT_EMBEDDING_MODEL),
        "jina-embeddings-v2-base-code" => Some(&CODE_EMBEDDING_MODEL),
        "ms-marco-MiniLM-L-6-v2" => Some(&RERANKER_MODEL),
        _ => None,
    }
}

/// Base directory for all cached models.
pub fn models_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fathom")
        .join("models")
}

fn model_dir(spec: &ModelSpec) -> PathBuf {
    models_base_dir().join(spec.name)
}

/// Cached path of the ONNX weights.
pub fn model_path(spec: &ModelSpec) -> PathBuf {
    model_dir(spec).join("model.onnx")
}

/// Cached path of the tokenizer definition.
pub fn tokenizer_path(spec: &ModelSpec) -> PathBuf {
    model_dir(spec).join("tokenizer.json")
}

/// Whether a usable copy of the model is already cached.
///
/// A file smaller than 1 MB is a truncated download, not a model.
pub fn is_model_ready(spec: &ModelSpec) -> bool {
    let model = model_path(spec);
    let tokenizer = tokenizer_path(spec);
    if !model.exists() || !tokenizer.exists() {
        return false;
    }
    std::fs::metadata(&model)
        .map(|m| m.len() > 1_000_000)
        .unwrap_or(false)
}

/// Ensure the model files exist locally, downloading if needed.
pub fn ensure_model(spec: &ModelSpec) -> FathomResult<(PathBuf, PathBuf)> {
    let model = model_path(spec);
    let tokenizer = tokenizer_path(spec);

    if is_model_ready(spec) {
        return Ok((model, tokenizer));
    }

    if std::env::var("FATHOM_SKIP_MODEL_DOWNLOAD").is_ok() {
        return Err(FathomError::ModelLoad {
            reason: format!(
                "model '{}' not cached and FATHOM_SKIP_MODEL_DOWNLOAD is set",
                spec.name
            ),
        });
    }

    let dir = model_dir(spec);
    std::fs::create_dir_all(&dir)?;

    if !model.exists()
        || std::fs::metadata(&model)
            .map(|m| m.len() < 1_000_000)
            .unwrap_or(true)
    {
        tracing::info!(model = spec.name, "downloading embedding model weights");
        download_file(spec.model_url, &model)?;
    }

    if !tokenizer.exists() {
        download_file(spec.tokenizer_url, &tokenizer)?;
    }

    Ok((model, tokenizer))
}

/// Download a file to a temporary name, then rename into place.
pub fn download_file(url: &str, dest: &Path) -> FathomResult<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(600))
        .build()
        .map_err(|e| FathomError::Transport {
            reason: format!("HTTP client error: {e}"),
        })?;

    let mut response = client.get(url).send().map_err(|e| FathomError::Transport {
        reason: format!("download failed: {e}"),
    })?;

    if !response.status().is_success() {
        return Err(FathomError::Transport {
            reason: format!("download failed: HTTP {}", response.status()),
        });
    }

    let progress = response
        .content_length()
        .map(|total| {
            let bar = indicatif::ProgressBar::new(total);
            bar.set_style(
                indicatif::ProgressStyle::with_template(
                    "{msg} [{bar:30}] {bytes}/{total_bytes} ({eta})",
                )
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
            );
            bar.set_message(
                dest.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );
            bar
        })
        .unwrap_or_else(indicatif::ProgressBar::hidden);

    let temp_path = dest.with_extension("downloading");
    let file = std::fs::File::create(&temp_path)?;
    let mut writer = progress.wrap_write(std::io::BufWriter::new(file));
    std::io::copy(&mut response, &mut writer).map_err(|e| FathomError::Transport {
        reason: format!("download stream error: {e}"),
    })?;
    progress.finish_and_clear();

    std::fs::rename(&temp_path, dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lookup() {
        assert_eq!(spec_for("all-MiniLM-L6-v2").map(|s| s.dimension), Some(384));
        assert_eq!(
            spec_for("jina-embeddings-v2-base-code").map(|s| s.dimension),
            Some(768)
        );
        assert!(spec_for("made-up-model").is_none());
    }

    #[test]
    fn test_cache_paths_are_under_model_name() {
        let path = model_path(&DEFAULT_EMBEDDING_MODEL);
        assert!(path.ends_with("all-MiniLM-L6-v2/model.onnx"));
    }
}
