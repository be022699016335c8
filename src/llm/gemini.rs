use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::{EmbeddingProvider, LlmProvider};
use super::types::GenerationRequest;
use crate::core::errors::RagError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Vector width of the text-embedding-004 model.
pub const GEMINI_EMBEDDING_DIMENSIONS: usize = 768;

/// Consecutive malformed stream deltas tolerated before the stream is
/// failed in-band.
const MAX_MALFORMED_DELTAS: usize = 25;

#[derive(Clone)]
pub struct GeminiProvider {
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: String,
    dimensions: usize,
    timeout: std::time::Duration,
    client: Client,
}

impl GeminiProvider {
    pub fn new(
        api_key: String,
        model: String,
        embedding_model: String,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            api_key,
            model,
            embedding_model,
            base_url: GEMINI_BASE_URL.to_string(),
            dimensions: GEMINI_EMBEDDING_DIMENSIONS,
            timeout,
            client: Client::new(),
        }
    }

    fn ensure_key(&self) -> Result<(), RagError> {
        if self.api_key.is_empty() {
            return Err(RagError::ProviderUnavailable(
                "GEMINI_API_KEY is not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Request body for a generation call. The system instruction is
    /// omitted entirely unless its trimmed value is non-empty — the API
    /// rejects an empty `systemInstruction` block.
    fn request_body(request: &GenerationRequest) -> Value {
        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }],
            }],
        });

        if let Some(instruction) = request.system_trimmed() {
            if let Some(obj) = body.as_object_mut() {
                obj.insert(
                    "systemInstruction".to_string(),
                    json!({ "parts": [{ "text": instruction }] }),
                );
            }
        }

        body
    }

    /// Concatenated candidate text from a generateContent payload (full
    /// response and stream deltas share the shape).
    fn candidate_text(payload: &Value) -> Option<String> {
        let parts = payload["candidates"][0]["content"]["parts"].as_array()?;
        let text: String = parts
            .iter()
            .filter_map(|part| part["text"].as_str())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn parse_stream_line(line: &str) -> Option<Result<String, ()>> {
        let data = line.strip_prefix("data: ")?;
        match serde_json::from_str::<Value>(data) {
            Ok(payload) => Self::candidate_text(&payload).map(Ok),
            Err(_) => Some(Err(())),
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response, RagError> {
        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .send(),
        )
        .await
        .map_err(|_| RagError::ProviderTimeout("gemini request timed out".to_string()))?
        .map_err(RagError::from_http)?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::ProviderError(format!(
                "gemini returned {status}: {detail}"
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, RagError> {
        request.validate()?;
        self.ensure_key()?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = Self::request_body(&request);
        let response = self.post(&url, &body).await?;

        let payload: Value = response.json().await.map_err(RagError::from_http)?;
        Self::candidate_text(&payload)
            .ok_or_else(|| RagError::ProviderError("gemini returned no candidates".to_string()))
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError> {
        request.validate()?;
        self.ensure_key()?;

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        let body = Self::request_body(&request);
        let response = self.post(&url, &body).await?;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut pending = String::new();
            let mut malformed = 0usize;

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        let _ = tx.send(Err(RagError::from_http(err))).await;
                        return;
                    }
                };

                pending.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(newline) = pending.find('\n') {
                    let line = pending[..newline].trim().to_string();
                    pending.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }

                    match Self::parse_stream_line(&line) {
                        Some(Ok(fragment)) => {
                            if tx.send(Ok(fragment)).await.is_err() {
                                // receiver gone: stop reading from the provider
                                return;
                            }
                        }
                        Some(Err(())) => {
                            malformed += 1;
                            tracing::warn!("Skipping malformed gemini delta ({} so far)", malformed);
                            if malformed > MAX_MALFORMED_DELTAS {
                                let _ = tx
                                    .send(Err(RagError::ProviderError(
                                        "too many malformed stream deltas".to_string(),
                                    )))
                                    .await;
                                return;
                            }
                        }
                        None => {}
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.ensure_key()?;

        let url = format!(
            "{}/models/{}:embedContent",
            self.base_url, self.embedding_model
        );
        let body = json!({
            "content": { "parts": [{ "text": text }] },
            "taskType": "RETRIEVAL_QUERY",
        });

        let response = self.post(&url, &body).await?;
        let payload: Value = response.json().await.map_err(RagError::from_http)?;

        parse_values(&payload["embedding"])
            .ok_or_else(|| RagError::ProviderError("gemini returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.ensure_key()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/models/{}:batchEmbedContents",
            self.base_url, self.embedding_model
        );
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{}", self.embedding_model),
                    "content": { "parts": [{ "text": text }] },
                    "taskType": "RETRIEVAL_DOCUMENT",
                })
            })
            .collect();
        let body = json!({ "requests": requests });

        let response = self.post(&url, &body).await?;
        let payload: Value = response.json().await.map_err(RagError::from_http)?;

        let embeddings = payload["embeddings"]
            .as_array()
            .ok_or_else(|| RagError::ProviderError("gemini returned no embeddings".to_string()))?;

        Ok(embeddings.iter().filter_map(parse_values).collect())
    }
}

fn parse_values(value: &Value) -> Option<Vec<f32>> {
    let values = value["values"].as_array()?;
    Some(
        values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(key: &str) -> GeminiProvider {
        GeminiProvider::new(
            key.to_string(),
            "gemini-2.5-flash-lite".to_string(),
            "text-embedding-004".to_string(),
            std::time::Duration::from_secs(5),
        )
    }

    #[test]
    fn blank_system_instruction_is_omitted_from_the_body() {
        let request = GenerationRequest::new("question").with_system("   ");
        let body = GeminiProvider::request_body(&request);
        assert!(body.get("systemInstruction").is_none());

        let request = GenerationRequest::new("question").with_system(" be brief ");
        let body = GeminiProvider::request_body(&request);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            Value::String("be brief".to_string())
        );
    }

    #[test]
    fn stream_lines_parse_deltas_and_flag_malformed_json() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#;
        assert_eq!(
            GeminiProvider::parse_stream_line(line),
            Some(Ok("Hel".to_string()))
        );

        assert_eq!(
            GeminiProvider::parse_stream_line("data: {broken json"),
            Some(Err(()))
        );
        // non-data lines (comments, blank keep-alives) are ignored
        assert_eq!(GeminiProvider::parse_stream_line(": keep-alive"), None);
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_network_call() {
        let provider = provider("");
        let err = provider
            .generate(GenerationRequest::new("question"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ProviderUnavailable(_)));

        let err = provider.embed("question").await.unwrap_err();
        assert!(matches!(err, RagError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_prompt_fails_before_any_network_call() {
        let provider = provider("key");
        let err = provider
            .generate(GenerationRequest::new("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyInput(_)));
    }
}
