//! Clients for the external structured-output generator.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::ExternalServiceError;

/// Longest error body kept from a failed HTTP response.
const MAX_ERROR_BODY: usize = 512;

/// One request to the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratorRequest {
    /// Instructions: role, vocabulary and response rules.
    pub system_prompt: String,
    /// Command text plus the world summary.
    pub user_prompt: String,
    /// Name the schema is registered under.
    pub schema_name: String,
    /// Strict JSON schema the reply must follow.
    pub json_schema: Value,
}

/// Produces raw reply text for a [`GeneratorRequest`].
#[async_trait]
pub trait GeneratorClient: Send + Sync {
    /// Generate a reply. The content is parsed and validated by the caller.
    async fn generate(&self, request: &GeneratorRequest) -> Result<String, ExternalServiceError>;
}

/// OpenAI-compatible chat-completions client using `json_schema` output.
pub struct HttpGeneratorClient {
    client: Client,
    settings: GeneratorConfig,
}

impl HttpGeneratorClient {
    /// Client for the configured endpoint. Timeouts are applied by the
    /// orchestrator, not by the HTTP client.
    pub fn new(settings: GeneratorConfig) -> Result<Self, ExternalServiceError> {
        let client = Client::builder()
            .build()
            .map_err(|err| {
                ExternalServiceError::Transport(format!("failed to construct HTTP client: {err}"))
            })?;
        Ok(Self { client, settings })
    }

    fn headers(&self) -> Result<HeaderMap, ExternalServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = self.settings.api_key.as_ref() {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|err| {
                    ExternalServiceError::Transport(format!("invalid API key header: {err}"))
                })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn body(&self, request: &GeneratorRequest) -> Value {
        let mut body = json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.json_schema,
                }
            }
        });
        if let Some(temperature) = self.settings.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.settings.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl GeneratorClient for HttpGeneratorClient {
    async fn generate(&self, request: &GeneratorRequest) -> Result<String, ExternalServiceError> {
        info!(
            endpoint = %self.settings.endpoint,
            model = %self.settings.model,
            schema = %request.schema_name,
            "sending generator request"
        );
        let response = self
            .client
            .post(&self.settings.endpoint)
            .headers(self.headers()?)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ExternalServiceError::Timeout
                } else {
                    ExternalServiceError::Transport(format!(
                        "request to {} failed: {err}",
                        self.settings.endpoint
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(ExternalServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|err| {
                ExternalServiceError::MalformedJson(format!(
                    "failed to parse completion payload: {err}"
                ))
            })?;
        let text = completion.text().ok_or_else(|| {
            ExternalServiceError::MalformedJson("completion payload missing response text".into())
        })?;
        debug!(chars = text.len(), "generator replied");
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl ChatCompletion {
    fn text(&self) -> Option<String> {
        self.choices.iter().find_map(|choice| {
            if let Some(message) = choice.message.as_ref() {
                if let Some(content) = message.content.as_ref() {
                    return Some(content.trim().to_string());
                }
                if let Some(refusal) = message.refusal.as_ref() {
                    return Some(json!({ "error": refusal }).to_string());
                }
            }
            choice.text.as_ref().map(|text| text.trim().to_string())
        })
    }
}

/// Canned reply for [`ScriptedGenerator`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Reply immediately with this content.
    Content(String),
    /// Reply with this content after a delay.
    Delayed(Duration, String),
    /// Fail with this error.
    Fail(ExternalServiceError),
    /// Never reply.
    Hang,
}

impl ScriptedReply {
    /// Immediate reply serialising `value`.
    pub fn json(value: Value) -> Self {
        ScriptedReply::Content(value.to_string())
    }
}

struct Rule {
    needle: Option<String>,
    reply: ScriptedReply,
}

/// Generator replaying scripted replies, for tests and offline runs.
///
/// Each request consumes the first rule whose needle appears in the user
/// prompt; rules added with [`push`](Self::push) match any request.
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(Instant, GeneratorRequest)>>,
}

impl ScriptedGenerator {
    /// Generator with no replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next request.
    pub fn push(&self, reply: ScriptedReply) -> &Self {
        self.rules.lock().push(Rule { needle: None, reply });
        self
    }

    /// Queue a reply for the next request whose user prompt contains `needle`.
    pub fn when(&self, needle: impl Into<String>, reply: ScriptedReply) -> &Self {
        self.rules.lock().push(Rule {
            needle: Some(needle.into()),
            reply,
        });
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GeneratorRequest> {
        self.calls.lock().iter().map(|(_, request)| request.clone()).collect()
    }

    /// When each request arrived.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }

    fn take(&self, prompt: &str) -> Option<ScriptedReply> {
        let mut rules = self.rules.lock();
        let index = rules
            .iter()
            .position(|rule| rule.needle.as_deref().is_none_or(|needle| prompt.contains(needle)))?;
        Some(rules.remove(index).reply)
    }
}

#[async_trait]
impl GeneratorClient for ScriptedGenerator {
    async fn generate(&self, request: &GeneratorRequest) -> Result<String, ExternalServiceError> {
        self.calls.lock().push((Instant::now(), request.clone()));
        match self.take(&request.user_prompt) {
            Some(ScriptedReply::Content(content)) => Ok(content),
            Some(ScriptedReply::Delayed(delay, content)) => {
                tokio::time::sleep(delay).await;
                Ok(content)
            }
            Some(ScriptedReply::Fail(err)) => Err(err),
            Some(ScriptedReply::Hang) => futures::future::pending().await,
            None => Err(ExternalServiceError::Transport("no scripted reply left".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GeneratorRequest {
        GeneratorRequest {
            system_prompt: String::new(),
            user_prompt: prompt.to_string(),
            schema_name: "s".into(),
            json_schema: json!({}),
        }
    }

    #[tokio::test]
    async fn scripted_rules_match_by_needle_then_order() {
        let generator = ScriptedGenerator::new();
        generator
            .push(ScriptedReply::Content("any".into()))
            .when("retreat", ScriptedReply::Content("retreating".into()));

        assert_eq!(generator.generate(&request("please retreat")).await.unwrap(), "any");
        assert_eq!(generator.generate(&request("please retreat")).await.unwrap(), "retreating");
        assert!(matches!(
            generator.generate(&request("again")).await,
            Err(ExternalServiceError::Transport(_))
        ));
        assert_eq!(generator.requests().len(), 3);
    }

    #[test]
    fn completion_text_prefers_message_content() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "  {\"message\": \"ok\"} "}}]
        }))
        .unwrap();
        assert_eq!(completion.text().as_deref(), Some("{\"message\": \"ok\"}"));

        let refused: ChatCompletion = serde_json::from_value(json!({
            "choices": [{"message": {"content": null, "refusal": "cannot help"}}]
        }))
        .unwrap();
        assert_eq!(refused.text().unwrap(), json!({"error": "cannot help"}).to_string());
    }

    #[test]
    fn request_body_uses_strict_json_schema() {
        let client = HttpGeneratorClient::new(GeneratorConfig::default()).unwrap();
        let body = client.body(&request("hold"));
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(body["messages"][1]["content"], "hold");
    }
}
