use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::{ChatMessage, GenerationRequest};
use crate::core::errors::RagError;

/// Consecutive malformed stream deltas tolerated before the stream is
/// failed in-band.
const MAX_MALFORMED_DELTAS: usize = 25;

#[derive(Clone)]
pub struct OpenRouterProvider {
    api_key: String,
    model: String,
    base_url: String,
    timeout: std::time::Duration,
    client: Client,
}

impl OpenRouterProvider {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: Client::new(),
        }
    }

    fn ensure_key(&self) -> Result<(), RagError> {
        if self.api_key.is_empty() {
            return Err(RagError::ProviderUnavailable(
                "OPENROUTER_API_KEY is not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Message list for a chat completion: a `system` role message is sent
    /// only when the instruction is non-empty.
    fn build_messages(request: &GenerationRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(instruction) = request
            .system_instruction
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            messages.push(ChatMessage::system(instruction));
        }
        messages.push(ChatMessage::user(request.prompt.clone()));
        messages
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": Self::build_messages(request),
            "max_tokens": 4096,
            "temperature": 0.7,
            "stream": stream,
        })
    }

    fn parse_stream_line(line: &str) -> Option<Result<String, ()>> {
        let data = line.strip_prefix("data: ")?;
        if data == "[DONE]" {
            return None;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(payload) => payload["choices"][0]["delta"]["content"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(|s| Ok(s.to_string())),
            Err(_) => Some(Err(())),
        }
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, RagError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("HTTP-Referer", "http://localhost:3000")
                .header("X-Title", "Quarry RAG")
                .json(body)
                .send(),
        )
        .await
        .map_err(|_| RagError::ProviderTimeout("openrouter request timed out".to_string()))?
        .map_err(RagError::from_http)?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::ProviderError(format!(
                "openrouter returned {status}: {detail}"
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, RagError> {
        request.validate()?;
        self.ensure_key()?;

        let body = self.request_body(&request, false);
        let response = self.post(&body).await?;
        let payload: Value = response.json().await.map_err(RagError::from_http)?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| RagError::ProviderError("openrouter returned no choices".to_string()))
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError> {
        request.validate()?;
        self.ensure_key()?;

        let body = self.request_body(&request, true);
        let response = self.post(&body).await?;

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
                    if line == "data: [DONE]" {
                        return;
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
                            tracing::warn!(
                                "Skipping malformed openrouter delta ({} so far)",
                                malformed
                            );
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
