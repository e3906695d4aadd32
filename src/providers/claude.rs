use serde::Deserialize;
use serde_json::json;

use super::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};
use super::{Backend, BackendError, BackendFuture, HttpOptions, get_env, http_client};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const MESSAGES_PATH: &str = "/v1/messages";
const API_VERSION: &str = "2023-06-01";
pub(crate) const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const PROVIDER: &str = "Claude";

#[derive(Debug, Clone)]
pub struct Claude {
    key: String,
    model: String,
    base_url: String,
    options: HttpOptions,
}

impl Claude {
    pub fn new(key: impl Into<String>, options: HttpOptions) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: get_env("ANTHROPIC_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            options,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }
}

impl Backend for Claude {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn send(&self, prompt: String) -> BackendFuture<'_> {
        Box::pin(async move {
            let client = http_client(self.options.timeout)?;
            let url = messages_url(&self.base_url);
            let body = json!({
                "model": self.model,
                "max_tokens": self.options.max_tokens,
                "messages": [
                    {"role": "user", "content": prompt}
                ]
            });

            let mut attempt = 0usize;
            let mut delay = RATE_LIMIT_BASE_DELAY;
            loop {
                attempt += 1;
                let response = client
                    .post(&url)
                    .header("x-api-key", self.key.as_str())
                    .header("anthropic-version", API_VERSION)
                    .json(&body)
                    .send()
                    .await?;

                let status = response.status();
                let retry_after = retry_after(response.headers());
                let text = response.text().await.unwrap_or_default();
                if status.is_success() {
                    return extract_text_response(&text);
                }
                if is_rate_limited(status, &text) && attempt < RATE_LIMIT_MAX_RETRIES {
                    delay = wait_with_backoff(PROVIDER, attempt, delay, retry_after).await;
                    continue;
                }
                return Err(BackendError::Api {
                    provider: PROVIDER,
                    status,
                    message: extract_claude_error(&text).unwrap_or(text),
                });
            }
        })
    }
}

/// Accepts either a bare host (`https://api.anthropic.com`) or the full
/// messages endpoint.
fn messages_url(base: &str) -> String {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.ends_with(MESSAGES_PATH) {
        trimmed.to_string()
    } else if trimmed.ends_with("/v1") {
        format!("{}/messages", trimmed)
    } else {
        format!("{}{}", trimmed, MESSAGES_PATH)
    }
}

fn extract_text_response(text: &str) -> Result<String, BackendError> {
    let payload: ClaudeResponse =
        serde_json::from_str(text).map_err(|err| BackendError::MalformedResponse {
            provider: PROVIDER,
            message: format!("failed to parse response JSON: {}", err),
        })?;
    let joined = payload
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    if joined.trim().is_empty() {
        return Err(BackendError::MalformedResponse {
            provider: PROVIDER,
            message: "no text content returned".to_string(),
        });
    }
    Ok(joined)
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let mut parts = Vec::new();
    if let Some(message) = error.message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(kind) = error.kind
        && !kind.trim().is_empty()
    {
        parts.push(format!("type: {}", kind));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_blocks_are_joined() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/claude_message_response.json"
        ));
        let text = extract_text_response(payload).expect("text");
        assert_eq!(text, "[\"你好\", \"早上好\"]");
    }

    #[test]
    fn empty_content_is_malformed() {
        let err = extract_text_response(r#"{"content": []}"#).unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse { .. }));
        let err = extract_text_response("<html>").unwrap_err();
        assert!(err.to_string().contains("failed to parse response JSON"));
    }

    #[test]
    fn error_body_is_summarised() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert_eq!(
            extract_claude_error(body).as_deref(),
            Some("invalid x-api-key | type: authentication_error")
        );
        assert_eq!(extract_claude_error("oops"), None);
    }

    #[test]
    fn messages_url_accepts_host_or_endpoint() {
        assert_eq!(
            messages_url("https://api.anthropic.com"),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            messages_url("https://proxy.example/v1/"),
            "https://proxy.example/v1/messages"
        );
        assert_eq!(
            messages_url("https://proxy.example/v1/messages"),
            "https://proxy.example/v1/messages"
        );
    }
}
