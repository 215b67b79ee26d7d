//! Remote HTTP embedding provider.
//!
//! Sends batches to a configured endpoint with bearer auth. The request
//! body follows the common `{"input": [...], "model": "..."}` shape; the
//! response must carry one embedding per input, in input order, with the
//! declared dimension. Remote calls are not serialized -- concurrent
//! containers may embed in parallel against the same endpoint.

use serde::Deserialize;

use crate::config::EmbeddingConfig;
use crate::error::{FathomError, FathomResult};
use crate::types::{ProviderIdentity, ProviderKind};

use super::{l2_normalize, EmbeddingProvider};

/// Embedding provider backed by an HTTP endpoint.
pub struct RemoteProvider {
    identity: ProviderIdentity,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl RemoteProvider {
    /// Build a provider from the embedding config. Fails when no endpoint
    /// is configured.
    pub fn new(config: &EmbeddingConfig) -> FathomResult<Self> {
        let endpoint = config.endpoint.clone().ok_or_else(|| FathomError::Config {
            details: "remote provider requires embedding.endpoint".into(),
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FathomError::Transport {
                reason: format!("HTTP client error: {e}"),
            })?;

        Ok(Self {
            identity: ProviderIdentity {
                kind: ProviderKind::Remote,
                model: config.model.clone(),
                dimension: config.dimension,
            },
            endpoint,
            api_key: config.api_key.clone(),
            client,
        })
    }
}

impl EmbeddingProvider for RemoteProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn embed(&self, texts: &[&str]) -> FathomResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "input": texts,
            "model": self.identity.model,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                FathomError::Timeout {
                    operation: format!("embed batch of {}", texts.len()),
                }
            } else {
                FathomError::Transport {
                    reason: format!("embedding request failed: {e}"),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(FathomError::Transport {
                reason: format!("embedding endpoint returned HTTP {}", response.status()),
            });
        }

        let parsed: EmbeddingResponse = response.json().map_err(|e| FathomError::Transport {
            reason: format!("malformed embedding response: {e}"),
        })?;

        if parsed.data.len() != texts.len() {
            return Err(FathomError::Transport {
                reason: format!(
                    "endpoint returned {} embeddings for {} inputs",
                    parsed.data.len(),
                    texts.len()
                ),
            });
        }

        let mut vectors = Vec::with_capacity(parsed.data.len());
        for row in parsed.data {
            if row.embedding.len() != self.identity.dimension {
                return Err(FathomError::ProviderMismatch {
                    details: format!(
                        "endpoint returned {}-dim vectors, {} declared for model '{}'",
                        row.embedding.len(),
                        self.identity.dimension,
                        self.identity.model
                    ),
                });
            }
            let mut vector = row.embedding;
            l2_normalize(&mut vector);
            vectors.push(vector);
        }

        Ok(vectors)
    }
}
