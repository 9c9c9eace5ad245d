//! OpenRouter API client implementation with automatic retry for transient errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};

use super::error::{LlmError, RetryPolicy};
use super::{ChatRequest, ChatResponse, LlmClient, TokenUsage};
use crate::util::truncate_for_log;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// OpenRouter API client with automatic retry for transient errors.
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    api_key: String,
    retry_policy: RetryPolicy,
}

impl OpenRouterClient {
    pub fn new(base_url: impl Into<String>, api_key: String) -> Self {
        Self::with_retry_policy(base_url, api_key, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        base_url: impl Into<String>,
        api_key: String,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            retry_policy,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Parse Retry-After header (seconds) if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Execute a single request without retry.
    async fn execute_request(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://gloriamundo.com")
            .header("X-Title", "GloriaMundo")
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {}", e))
                } else {
                    LlmError::network(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &body, retry_after));
        }

        let parsed: OpenRouterResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::malformed(format!(
                "Failed to parse response: {}, body: {}",
                e,
                truncate_for_log(&body, 500)
            ))
        })?;

        // OpenRouter reports some upstream failures inside a 200 body
        if let Some(err) = parsed.error {
            return Err(LlmError::from_status(
                err.code.unwrap_or(502),
                &err.message,
                None,
            ));
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::malformed("No choices in response"))?;

        Ok(ChatResponse {
            content: choice.message.content,
            reasoning: choice.message.reasoning.filter(|r| !r.is_empty()),
            finish_reason: choice.finish_reason,
            usage: parsed
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            model: parsed.model.or_else(|| Some(request.model.clone())),
        })
    }

    /// Execute a request, retrying transient failures within the policy.
    async fn execute_with_retry(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            let error = match self.execute_request(request).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            model = %request.model,
                            retries = attempt,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Chat completion succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            let Some(delay) = self
                .retry_policy
                .next_delay(&error, attempt, start.elapsed())
            else {
                // Unavailable models are the caller's to handle; not an error here
                if error.should_fallback() {
                    tracing::warn!(model = %request.model, "Model unavailable upstream: {}", error);
                } else {
                    tracing::error!(
                        model = %request.model,
                        retries = attempt,
                        "Chat completion failed: {}",
                        error
                    );
                }
                return Err(error);
            };

            tracing::warn!(
                model = %request.model,
                attempt = attempt + 1,
                kind = %error.kind,
                delay_ms = delay.as_millis() as u64,
                "Retrying chat completion: {}",
                truncate_for_log(&error.message, 200)
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion to OpenRouter"
        );
        self.execute_with_retry(request).await
    }
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    #[serde(default)]
    choices: Vec<OpenRouterChoice>,
    #[serde(default)]
    usage: Option<OpenRouterUsage>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    error: Option<OpenRouterErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Usage data (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct OpenRouterUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, LlmErrorKind, Role};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "openai/gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::new(Role::User, "hi")],
            temperature: None,
            max_tokens: None,
            include_reasoning: None,
        }
    }

    fn completion() -> serde_json::Value {
        json!({
            "model": "openai/gpt-4o-mini",
            "choices": [{
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        })
    }

    #[tokio::test]
    async fn test_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "openai/gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion()))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(server.uri(), "sk-test".to_string());
        let response = client.chat_completion(&request()).await.unwrap();
        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(response.usage, Some(TokenUsage::new(3, 2)));
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion()))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(server.uri(), "sk-test".to_string());
        let response = client.chat_completion(&request()).await.unwrap();
        assert_eq!(response.content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(402).set_body_string("insufficient credits"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(server.uri(), "sk-test".to_string());
        let err = client.chat_completion(&request()).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::InsufficientCredits);
        assert_eq!(err.status_code, Some(402));
    }

    #[tokio::test]
    async fn test_error_in_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"code": 400, "message": "model does not support file input"}
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(server.uri(), "sk-test".to_string());
        let err = client.chat_completion(&request()).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Rejected);
        assert!(err.message.contains("file input"));
    }

    #[tokio::test]
    async fn test_unavailable_model_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "No endpoints found for openai/gpt-4o-mini."}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(server.uri(), "sk-test".to_string());
        let err = client.chat_completion(&request()).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::ModelUnavailable);
        assert!(err.should_fallback());
    }
}
