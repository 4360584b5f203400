use std::time::{Duration, Instant};

use async_trait::async_trait;
use rxguard_core::{ReasoningRequest, ReasoningService, ServiceError, Settings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("GROQ_API_KEY is not set")]
    MissingApiKey,

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ClientError::MissingApiKey);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
            timeout,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ClientError> {
        Self::new(
            settings.api_key.clone(),
            settings.reasoning_base_url.clone(),
            settings.model_name.clone(),
            settings.temperature,
            Duration::from_secs(settings.reasoning_timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body<'a>(&'a self, request: &'a ReasoningRequest) -> Result<ChatRequest<'a>, ServiceError> {
        let schema = serde_json::to_string_pretty(&request.schema)
            .map_err(|e| ServiceError::Other(e.to_string()))?;
        Ok(ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "{}\n\nRespond with a single JSON object matching this schema:\n{}",
                        request.prompt, schema
                    ),
                },
            ],
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::Timeout(self.timeout.as_secs())
        } else if err.is_connect() {
            ServiceError::Connection(err.to_string())
        } else {
            ServiceError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl ReasoningService for ChatCompletionsClient {
    async fn complete(&self, request: &ReasoningRequest) -> Result<Value, ServiceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.body(request)?;
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(task = request.task, status = status.as_u16(), "Reasoning request rejected");
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(format!("invalid completion body: {e}")))?;

        debug!(
            task = request.task,
            model = %self.model,
            latency_ms = started.elapsed().as_millis() as u64,
            "Reasoning request complete"
        );

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::Malformed("completion has no content".to_string()))?;

        parse_json_object(&content)
    }
}

/// Parse completion text as a JSON object, tolerating a surrounding code fence.
fn parse_json_object(content: &str) -> Result<Value, ServiceError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(unfenced.trim()) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(ServiceError::Malformed(
            "completion is not a JSON object".to_string(),
        )),
        Err(e) => Err(ServiceError::Malformed(format!("completion is not JSON: {e}"))),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_and_fenced_objects() {
        assert_eq!(parse_json_object(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_json_object("```json\n{\"a\": 2}\n```").unwrap(),
            json!({"a": 2})
        );
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(parse_json_object("[1,2]"), Err(ServiceError::Malformed(_))));
        assert!(matches!(parse_json_object("not json"), Err(ServiceError::Malformed(_))));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let err = ChatCompletionsClient::new(" ", "http://x", "m", 0.1, Duration::from_secs(1));
        assert!(matches!(err, Err(ClientError::MissingApiKey)));
    }

    #[test]
    fn prompt_carries_schema() {
        let client =
            ChatCompletionsClient::new("k", "http://x/", "m", 0.1, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://x");
        let request = ReasoningRequest {
            task: "extraction",
            system: "sys".into(),
            prompt: "Extract".into(),
            schema: json!({"type": "object"}),
        };
        let body = serde_json::to_value(client.body(&request).unwrap()).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["content"], "sys");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.starts_with("Extract"));
        assert!(user.contains("\"type\": \"object\""));
    }
}
