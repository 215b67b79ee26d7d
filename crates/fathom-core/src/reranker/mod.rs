//! Optional cross-encoder reranker.
//!
//! Scores (query, passage) pairs with an ONNX cross-encoder. This is the
//! dominant latency contributor in the retrieval pipeline, so it runs on a
//! blocking worker and is the one step allowed to be skipped under a
//! deadline. When the model is disabled, missing, or failing, `score`
//! returns `None` per candidate and the pipeline keeps the fused order --
//! degraded mode is not an error.

use ort::session::Session;
use parking_lot::Mutex;

use crate::config::RerankerConfig;
use crate::error::{FathomError, FathomResult};
use crate::provider::model_manager;

/// Lazily loaded cross-encoder. Process-wide singleton owned by the engine.
pub struct Reranker {
    config: RerankerConfig,
    state: Mutex<LoadState>,
}

struct LoadState {
    attempted: bool,
    session: Option<Session>,
    tokenizer: Option<tokenizers::Tokenizer>,
}

impl Reranker {
    /// Create a reranker. The model loads lazily on the first `score` call.
    pub fn new(config: &RerankerConfig) -> Self {
        Self {
            config: config.clone(),
            state: Mutex::new(LoadState {
                attempted: false,
                session: None,
                tokenizer: None,
            }),
        }
    }

    /// Whether reranking is configured to run at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Score (query, document) pairs. Returns one entry per document, in
    /// order; `None` where no score could be produced.
    pub fn score(&self, query: &str, documents: &[&str]) -> Vec<Option<f32>> {
        if !self.config.enabled || documents.is_empty() {
            return vec![None; documents.len()];
        }

        let mut state = self.state.lock();
        if !state.attempted {
            state.attempted = true;
            if let Err(e) = self.load(&mut state) {
                tracing::warn!(error = %e, "reranker unavailable, keeping fused order");
            }
        }

        let LoadState {
            session, tokenizer, ..
        } = &mut *state;
        let (Some(session), Some(tokenizer)) = (session.as_mut(), tokenizer.as_ref()) else {
            return vec![None; documents.len()];
        };

        let mut scores = Vec::with_capacity(documents.len());
        for batch in documents.chunks(self.config.batch_size.max(1)) {
            match self.run_inference(session, tokenizer, query, batch) {
                Ok(batch_scores) => scores.extend(batch_scores.into_iter().map(Some)),
                Err(e) => {
                    tracing::warn!(error = %e, "reranker batch inference failed");
                    scores.extend(std::iter::repeat(None).take(batch.len()));
                }
            }
        }
        scores
    }

    fn load(&self, state: &mut LoadState) -> FathomResult<()> {
        let (model_path, tokenizer_path) =
            match std::env::var("FATHOM_RERANKER_MODEL_PATH").map(std::path::PathBuf::from) {
                Ok(path) if path.exists() => {
                    let tokenizer = path.with_file_name("tokenizer.json");
                    (path, tokenizer)
                }
                _ => model_manager::ensure_model(&model_manager::RERANKER_MODEL)?,
            };

        let session = Session::builder()
            .and_then(|mut b| b.commit_from_file(&model_path))
            .map_err(|e| FathomError::ModelLoad {
                reason: format!("reranker session error for {}: {e}", model_path.display()),
            })?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            FathomError::ModelLoad {
                reason: format!("reranker tokenizer error: {e}"),
            }
        })?;

        state.session = Some(session);
        state.tokenizer = Some(tokenizer);
        tracing::info!("reranker model loaded");
        Ok(())
    }

    fn run_inference(
        &self,
        session: &mut Session,
        tokenizer: &tokenizers::Tokenizer,
        query: &str,
        documents: &[&str],
    ) -> FathomResult<Vec<f32>> {
        let batch_size = documents.len();
        let max_len = self.config.max_seq_length;

        let (input_ids, attention_mask, token_type_ids) =
            tokenize_pairs(tokenizer, query, documents, max_len)?;

        let shape = vec![batch_size as i64, max_len as i64];

        let ids_value = ort::value::Tensor::from_array((shape.clone(), input_ids))
            .map_err(|e| FathomError::Internal(format!("ONNX tensor error: {e}")))?;
        let mask_value = ort::value::Tensor::from_array((shape.clone(), attention_mask))
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
            .ok_or_else(|| FathomError::Internal("reranker model has no outputs".into()))?;

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
        let mut scores = Vec::with_capacity(batch_size);

        if dims.len() == 2 {
            // [batch, labels]: single-label models emit the relevance logit
            // directly; multi-label models put it last.
            let labels = dims[1];
            for b in 0..batch_size {
                let offset = b * labels;
                let score = if labels == 1 {
                    output_data[offset]
                } else {
                    output_data[offset + labels - 1]
                };
                scores.push(score);
            }
        } else if dims.len() == 1 {
            scores.extend_from_slice(&output_data[..batch_size.min(output_data.len())]);
        } else {
            return Err(FathomError::Internal(format!(
                "unexpected output tensor shape: {dims:?}"
            )));
        }

        Ok(scores)
    }
}

/// Tokenize (query, document) pairs with padding and truncation.
fn tokenize_pairs(
    tokenizer: &tokenizers::Tokenizer,
    query: &str,
    documents: &[&str],
    max_len: usize,
) -> FathomResult<(Vec<i64>, Vec<i64>, Vec<i64>)> {
    let mut all_input_ids = Vec::with_capacity(documents.len() * max_len);
    let mut all_attention_mask = Vec::with_capacity(documents.len() * max_len);
    let mut all_token_type_ids = Vec::with_capacity(documents.len() * max_len);

    for doc in documents {
        let encoding = tokenizer
            .encode(
                tokenizers::EncodeInput::Dual(query.into(), (*doc).into()),
                true,
            )
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

    #[test]
    fn test_disabled_reranker_returns_none_scores() {
        let config = RerankerConfig {
            enabled: false,
            ..RerankerConfig::default()
        };
        let reranker = Reranker::new(&config);
        let scores = reranker.score("query", &["doc a", "doc b"]);
        assert_eq!(scores, vec![None, None]);
        assert!(!reranker.is_enabled());
    }

    #[test]
    fn test_empty_candidates() {
        let reranker = Reranker::new(&RerankerConfig::default());
        assert!(reranker.score("query", &[]).is_empty());
    }
}
