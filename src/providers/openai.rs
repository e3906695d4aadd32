use serde::Deserialize;
use serde_json::json;

use super::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};
use super::{Backend, BackendError, BackendFuture, HttpOptions, get_env, http_client};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";
const PROVIDER: &str = "OpenAI";

/// Any endpoint speaking the OpenAI chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    model: String,
    base_url: String,
    options: HttpOptions,
}

impl OpenAI {
    pub fn new(key: impl Into<String>, options: HttpOptions) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: get_env("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
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

impl Backend for OpenAI {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn send(&self, prompt: String) -> BackendFuture<'_> {
        Box::pin(async move {
            let client = http_client(self.options.timeout)?;
            let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
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
                    .bearer_auth(&self.key)
                    .json(&body)
                    .send()
                    .await?;

                let status = response.status();
                let retry_after = retry_after(response.headers());
                let text = response.text().await.unwrap_or_default();
                if status.is_success() {
                    return extract_message_content(&text);
                }
                if is_rate_limited(status, &text) && attempt < RATE_LIMIT_MAX_RETRIES {
                    delay = wait_with_backoff(PROVIDER, attempt, delay, retry_after).await;
                    continue;
                }
                return Err(BackendError::Api {
                    provider: PROVIDER,
                    status,
                    message: extract_openai_error(&text).unwrap_or(text),
                });
            }
        })
    }
}

fn extract_message_content(text: &str) -> Result<String, BackendError> {
    let payload: ChatResponse =
        serde_json::from_str(text).map_err(|err| BackendError::MalformedResponse {
            provider: PROVIDER,
            message: format!("failed to parse response JSON: {}", err),
        })?;
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| BackendError::MalformedResponse {
            provider: PROVIDER,
            message: "no message content returned".to_string(),
        })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let parts: Vec<String> = [
        error.message,
        error.kind.map(|kind| format!("type: {}", kind)),
        error.code.map(|code| format!("code: {}", code)),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.trim().is_empty())
    .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_content_is_returned() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/openai_chat_response.json"
        ));
        let text = extract_message_content(payload).expect("content");
        assert_eq!(text, "[\"Hello\", \"Good morning\"]");
    }

    #[test]
    fn missing_content_is_malformed() {
        let err = extract_message_content(r#"{"choices": []}"#).unwrap_err();
        assert!(err.to_string().contains("no message content returned"));
    }

    #[test]
    fn error_body_is_summarised() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        assert_eq!(
            extract_openai_error(body).as_deref(),
            Some("Incorrect API key provided | type: invalid_request_error | code: invalid_api_key")
        );
    }
}
