//! Local ONNX embedding inference.
//!
//! Runs sentence-embedding inference on this machine via ONNX Runtime. No
//! network calls during inference; the model file is downloaded on first
//! use and cached permanently (see [`super::model_manager`]).
//!
//! The provider is a process-wide single-writer resource: the session and
//! tokenizer live behind one mutex, loaded lazily on the first `embed`
//! call. The first load emits a `model-loaded` or `model-load-error` event
//! on the engine's side channel.

use ort::session::Session;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::EmbeddingConfig;
use crate::error::{FathomError, FathomResult};
use crate::types::{IndexEvent, ProviderIdentity, ProviderKind};

use super::{l2_normalize, model_manager, EmbeddingProvider};

/// Embedding provider backed by a local ONNX session.
pub struct LocalProvider {
    identity: ProviderIdentity,
    config: EmbeddingConfig,
    state: Mutex<LoadState>,
    events: Option<broadcast::Sender<IndexEvent>>,
}

/// Lazily initialized model handle. `attempted` distinguishes "not loaded
/// yet" from "load failed"; a failed load is not retried within a process.
struct LoadState {
    attempted: bool,
    session: Option<Session>,
    tokenizer: Option<tokenizers::Tokenizer>,
}

impl LocalProvider {
    /// Create a provider for the given configuration. The model is not
    /// loaded until the first `embed` call.
    pub fn new(
        config: &EmbeddingConfig,
        events: Option<broadcast::Sender<IndexEvent>>,
    ) -> Self {
        Self {
            identity: ProviderIdentity {
                kind: ProviderKind::Local,
                model: config.model.clone(),
                dimension: config.dimension,
            },
            config: config.clone(),
            state: Mutex::new(LoadState {
                attempted: false,
                session: None,
                tokenizer: None,
            }),
            events,
        }
    }

    fn emit(&self, event: IndexEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Load the session and tokenizer if this is the first call.
    fn ensure_loaded(&self, state: &mut LoadState) -> FathomResult<()> {
        if state.attempted {
            return if state.session.is_some() && state.tokenizer.is_some() {
                Ok(())
            } else {
                Err(FathomError::ModelLoad {
                    reason: format!("model '{}' previously failed to load", self.config.model),
                })
            };
        }
        state.attempted = true;

        let result = self.load(state);
        match &result {
            Ok(()) => {
                tracing::info!(model = %self.config.model, "embedding model loaded");
                self.emit(IndexEvent::ModelLoaded);
            }
            Err(e) => {
                tracing::warn!(model = %self.config.model, error = %e, "embedding model load failed");
                self.emit(IndexEvent::ModelLoadError {
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    fn load(&self, state: &mut LoadState) -> FathomResult<()> {
        let (model_path, tokenizer_path) = match &self.config.model_path {
            Some(path) if path.exists() => {
                (path.clone(), path.with_file_name("tokenizer.json"))
            }
            _ => {
                let spec = model_manager::spec_for(&self.config.model).ok_or_else(|| {
                    FathomError::ModelLoad {
                        reason: format!(
                            "unknown model '{}' and no model_path override",
                            self.config.model
                        ),
                    }
                })?;
                model_manager::ensure_model(spec)?
            }
        };

        let session = Session::builder()
            .and_then(|mut b| b.commit_from_file(&model_path))
            .map_err(|e| FathomError::ModelLoad {
                reason: format!("ONNX session error for {}: {e}", model_path.display()),
            })?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            FathomError::ModelLoad {
                reason: format!("tokenizer error for {}: {e}", tokenizer_path.display()),
            }
        })?;

        state.session = Some(session);
        state.tokenizer = Some(tokenizer);
        Ok(())
    }

    /// Run inference on one batch of at most `batch_size` texts.
    fn run_inference(
        &self,
        session: &mut Session,
        tokenizer: &tokenizers::Tokenizer,
        texts: &[&str],
    ) -> FathomResult<Vec<Vec<f32>>> {
        let batch_size = texts.len();
        let max_len = self.config.max_seq_length;

        let (input_ids, attention_mask, token_type_ids) =
            tokenize_batch(tokenizer, texts, max_len)?;

        let shape = vec![batch_size as i64, max_len as i64];

        let ids_value = ort::value::Tensor::from_array((shape.clone(), input_ids))
            .map_err(|e| FathomError::Internal(format!("ONNX tensor error: {e}")))?;
        let mask_value = ort::value::Tensor::from_array((shape.clone(), attention_mask.clone()))
            .map_err(|e| FathomError::Internal(format!("ONNX tensor error: {e}")))?;

        use std::borrow::Cow;
        let mut inputs: Vec<(Cow<'_, str>, ort::session::SessionInputValue<'_>)> = vec![
            (
                Cow::Borrowed("input_ids"),
                ort::session::SessionInputValue::from(ids_value),
            ),
            (
                Cow::Borrowed("attention_mask"),
                ort::session::SessionInputValue::from(mask_value),
            ),
        ];

        // Some sentence models (BERT family) expect token_type_ids; others
        // (Jina) don't. Feed it only when the graph declares the input.
        let expects_token_type = session.inputs().iter().any(|i| i.name() == "token_type_ids");
        if expects_token_type {
            let type_value = ort::value::Tensor::from_array((shape.clone(), token_type_ids))
                .map_err(|e| FathomError::Internal(format!("ONNX tensor error: {e}")))?;
            inputs.push((
                Cow::Borrowed("token_type_ids"),
                ort::session::SessionInputValue::from(type_value),
            ));
        }

        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or_else(|| FathomError::Internal("model has no outputs".into()))?;

        let outputs = session
            .run(inputs)
            .map_err(|e| FathomError::Internal(format!("ONNX inference error: {e}")))?;

        let output_value = outputs
            .get(&output_name)
            .ok_or_else(|| FathomError::Internal("no output tensor found".into()))?;

        let (output_shape, output_data) = output_value
            .try_extract_tensor::<f32>()
            .map_err(|e| FathomError::Internal(format!("output extraction error: {e}")))?;

        let dims: Vec<usize> = output_shape.iter().map(|&d| d as usize).collect();
        let mut embeddings = Vec::with_capacity(batch_size);

        if dims.len() == 3 {
            // [batch, seq_len, hidden] -> mean pool with attention mask.
            let seq_len = dims[1];
            let hidden = dims[2];
            for b in 0..batch_size {
                let mut pooled = vec![0.0f32; hidden];
                let mut mask_sum = 0.0f32;
                for s in 0..seq_len {
                    let mask_val = attention_mask[b * max_len + s] as f32;
                    mask_sum += mask_val;
                    let offset = b * seq_len * hidden + s * hidden;
                    for d in 0..hidden {
                        pooled[d] += output_data[offset + d] * mask_val;
                    }
                }
                if mask_sum > 0.0 {
                    for d in &mut pooled {
                        *d /= mask_sum;
                    }
                }
                l2_normalize(&mut pooled);
                embeddings.push(pooled);
            }
        } else if dims.len() == 2 {
            // [batch, hidden] -> already pooled.
            let hidden = dims[1];
            for b in 0..batch_size {
                let offset = b * hidden;
                let mut vec = output_data[offset..offset + hidden].to_vec();
                l2_normalize(&mut vec);
                embeddings.push(vec);
            }
        } else {
            return Err(FathomError::Internal(format!(
                "unexpected output tensor shape: {dims:?}"
            )));
        }

        for emb in &embeddings {
            if emb.len() != self.identity.dimension {
                return Err(FathomError::ProviderMismatch {
                    details: format!(
                        "model '{}' produced {}-dim vectors, {} declared",
                        self.identity.model,
                        emb.len(),
                        self.identity.dimension
                    ),
                });
            }
        }

        Ok(embeddings)
    }
}

impl EmbeddingProvider for LocalProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn embed(&self, texts: &[&str]) -> FathomResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;

        // Both are present after ensure_loaded succeeds; split the borrow.
        let LoadState {
            session, tokenizer, ..
        } = &mut *state;
        let (Some(session), Some(tokenizer)) = (session.as_mut(), tokenizer.as_ref()) else {
            return Err(FathomError::ModelLoad {
                reason: "model state inconsistent after load".into(),
            });
        };

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let embeddings = self.run_inference(session, tokenizer, batch)?;
            all.extend(embeddings);
        }
        Ok(all)
    }
}

/// Tokenize a batch with padding and truncation to `max_len`.
fn tokenize_batch(
    tokenizer: &tokenizers::Tokenizer,
    texts: &[&str],
    max_len: usize,
) -> FathomResult<(Vec<i64>, Vec<i64>, Vec<i64>)> {
    let mut all_input_ids = Vec::with_capacity(texts.len() * max_len);
    let mut all_attention_mask = Vec::with_capacity(texts.len() * max_len);
    let mut all_token_type_ids = Vec::with_capacity(texts.len() * max_len);

    for text in texts {
        let encoding = tokenizer
            .encode(*text, true)
            .map_err(|e| FathomError::Internal(format!("tokenization error: {e}")))?;

        let ids = encoding.get_ids();
        let mask = encoding.get_attention_mask();
        let type_ids = encoding.get_type_ids();

        let actual_len = ids.len().min(max_len);
        for i in 0..actual_len {
            all_input_ids.push(ids[i] as i64);
            all_attention_mask.push(mask[i] as i64);
            all_token_type_ids.push(type_ids[i] as i64);
        }
        for _ in actual_len..max_len {
            all_input_ids.push(0);
            all_attention_mask.push(0);
            all_token_type_ids.push(0);
        }
    }

    Ok((all_input_ids, all_attention_mask, all_token_type_ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> EmbeddingConfig {
        EmbeddingConfig {
            model: "no-such-model".into(),
            dimension: 384,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_unknown_model_fails_with_model_load() {
        let provider = LocalProvider::new(&offline_config(), None);
        let err = provider.embed(&["hello"]).unwrap_err();
        assert!(matches!(err, FathomError::ModelLoad { .. }), "got: {err:?}");
    }

    #[test]
    fn test_failed_load_is_not_retried() {
        let provider = LocalProvider::new(&offline_config(), None);
        let _ = provider.embed(&["hello"]);
        // Second call reports the cached failure without reattempting.
        let err = provider.embed(&["world"]).unwrap_err();
        assert!(err.to_string().contains("previously failed"));
    }

    #[test]
    fn test_empty_batch_is_a_no_op() {
        let provider = LocalProvider::new(&offline_config(), None);
        assert!(provider.embed(&[]).map(|v| v.is_empty()).unwrap_or(false));
    }

    #[test]
    fn test_identity_reflects_config() {
        let provider = LocalProvider::new(&offline_config(), None);
        assert_eq!(provider.identity().kind, ProviderKind::Local);
        assert_eq!(provider.identity().dimension, 384);
    }
}
