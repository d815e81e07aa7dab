//! Embedding Client
//!
//! Wraps the external embedding provider behind the [`EmbeddingClient`]
//! capability: batches inputs, retries transient failures, L2-normalizes
//! every returned vector, and verifies dimensionality against the
//! configured embedding dimension.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Retry schedule shared by the provider clients.
pub(crate) const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Capability for turning text into unit-norm vectors.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow!("provider returned no embedding"))
    }
}

// ============================================================================
// OpenAI-compatible HTTP implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(base_url: String, api_key: String, model: String, dim: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dim,
        }
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AttemptError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(format!("transport error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("embedding provider error ({status}): {text}");
            return if is_retryable_status(status.as_u16()) {
                Err(AttemptError::Retryable(message))
            } else {
                Err(AttemptError::Fatal(message))
            };
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Fatal(format!("malformed embedding response: {e}")))?;
        if parsed.data.len() != texts.len() {
            return Err(AttemptError::Fatal(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        // Provider order is not guaranteed; restore input order by index.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for datum in data {
            if datum.embedding.len() != self.dim {
                return Err(AttemptError::Fatal(format!(
                    "provider returned {}-dim embedding; expected {}",
                    datum.embedding.len(),
                    self.dim
                )));
            }
            let mut vector = datum.embedding;
            l2_normalize(&mut vector).map_err(|e| AttemptError::Fatal(e.to_string()))?;
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

/// Outcome of a single provider attempt: worth retrying, or not.
enum AttemptError {
    Retryable(String),
    Fatal(String),
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_error = None;
        for (attempt, delay) in std::iter::once(Duration::ZERO)
            .chain(RETRY_DELAYS.iter().copied())
            .enumerate()
        {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(AttemptError::Fatal(message)) => {
                    warn!(attempt = attempt + 1, error = %message, "embedding request failed");
                    return Err(anyhow!(message));
                }
                Err(AttemptError::Retryable(message)) => {
                    warn!(attempt = attempt + 1, error = %message, "embedding request failed");
                    last_error = Some(message);
                }
            }
        }

        Err(anyhow!(last_error
            .unwrap_or_else(|| "embedding provider unavailable".to_string())))
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Scale a vector to unit L2 norm in place.
pub fn l2_normalize(vector: &mut [f32]) -> Result<()> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        bail!("cannot normalize zero or non-finite vector");
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn normalize_produces_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_zero_vector() {
        let mut v = vec![0.0, 0.0];
        assert!(l2_normalize(&mut v).is_err());
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
    }

    #[tokio::test]
    async fn embeds_and_restores_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 2.0]},
                    {"index": 0, "embedding": [3.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let client =
            OpenAiEmbeddingClient::new(server.uri(), "key".into(), "embed-model".into(), 2);
        let vectors = client
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 2);
        // Index 0 was [3, 0]; normalized to [1, 0].
        assert!((vectors[0][0] - 1.0).abs() < 1e-6);
        assert!((vectors[1][1] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(server.uri(), "bad".into(), "embed-model".into(), 2);
        let err = client.embed_batch(&["hello".to_string()]).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(server.uri(), "key".into(), "embed-model".into(), 2);
        assert!(client.embed_batch(&["hello".to_string()]).await.is_err());
    }
}
