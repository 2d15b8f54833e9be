use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::ServiceError;
use crate::types::{ToolArgs, truncate_chars};

const SERVICE: &str = "decision-maker";

const SYSTEM_MESSAGE: &str = "You are a browser automation agent. Answer with exactly one \
TOOL/ARGS/REASON block or a single DONE line, as described in the prompt.";

/// One loop iteration's output from the decision-maker.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    ToolCall {
        name: String,
        args: ToolArgs,
        reason: Option<String>,
    },
    Done {
        summary: String,
    },
    /// Anything that is neither form. Never treated as success.
    Invalid {
        raw: String,
    },
}

impl Decision {
    /// Parse a completion in the `TOOL:`/`ARGS:`/`REASON:` or `DONE:` grammar.
    ///
    /// Keys are case-insensitive and markdown fences are ignored. `ARGS` may
    /// span several lines but must be a JSON object.
    pub fn parse(text: &str) -> Decision {
        let invalid = || Decision::Invalid {
            raw: text.to_string(),
        };

        let cleaned = strip_fences(text);
        let trimmed = cleaned.trim();
        if let Some(summary) = strip_key(trimmed, "DONE:") {
            return Decision::Done {
                summary: summary.trim().to_string(),
            };
        }

        let mut name: Option<String> = None;
        let mut args_text: Option<String> = None;
        let mut reason: Option<String> = None;
        let mut in_args = false;

        for line in trimmed.lines() {
            let line_trim = line.trim();
            if let Some(rest) = strip_key(line_trim, "TOOL:") {
                name = Some(rest.trim().to_string());
                in_args = false;
            } else if let Some(rest) = strip_key(line_trim, "ARGS:") {
                args_text = Some(rest.trim().to_string());
                in_args = true;
            } else if let Some(rest) = strip_key(line_trim, "REASON:") {
                reason = Some(rest.trim().to_string());
                in_args = false;
            } else if in_args {
                if let Some(buf) = args_text.as_mut() {
                    buf.push('\n');
                    buf.push_str(line_trim);
                }
            } else if let Some(r) = reason.as_mut() {
                r.push(' ');
                r.push_str(line_trim);
            }
        }

        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return invalid();
        };
        let name = name.trim_matches(|c| c == '`' || c == '"' || c == '\'').to_string();

        let args = match args_text.as_deref().map(str::trim) {
            None | Some("") => ToolArgs::new(),
            Some(raw) => match serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(ToolArgs::from_value)
            {
                Some(args) => args,
                None => return invalid(),
            },
        };

        Decision::ToolCall {
            name,
            args,
            reason: reason.filter(|r| !r.trim().is_empty()),
        }
    }
}

fn strip_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Case-insensitive prefix match on `key`, returning the remainder.
fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let head = line.get(..key.len())?;
    head.eq_ignore_ascii_case(key).then(|| &line[key.len()..])
}

/// The external service choosing the next action.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn decide(&self, prompt: &str) -> Result<Decision, ServiceError>;
}

/// Decision-maker backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiBrain {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiBrain {
    pub fn new(config: &LlmConfig) -> Result<Self, ServiceError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ServiceError::NotConfigured {
                service: SERVICE,
                reason: "OPENAI_API_KEY not set in environment".into(),
            })?;

        Ok(Self {
            client: http_client(config, SERVICE)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl DecisionMaker for OpenAiBrain {
    async fn decide(&self, prompt: &str) -> Result<Decision, ServiceError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_MESSAGE},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.0,
        });

        let content =
            chat_completion(&self.client, &self.base_url, &self.api_key, SERVICE, &body).await?;
        debug!("Decision-maker says: {}", truncate_chars(&content, 500));

        let decision = Decision::parse(&content);
        if let Decision::Invalid { raw } = &decision {
            warn!("Unparseable decision: {}", truncate_chars(raw, 200));
        }
        Ok(decision)
    }
}

/// HTTP client with the configured request cap. Connecting gets at most 10s of it.
pub(crate) fn http_client(config: &LlmConfig, service: &'static str) -> Result<Client, ServiceError> {
    Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.request_timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| ServiceError::from_reqwest(service, &e))
}

/// POST a chat completion request and return the first choice's text.
///
/// A non-success status always becomes `ServiceError::Api` carrying the status
/// line, whatever the body looks like.
pub(crate) async fn chat_completion(
    client: &Client,
    base_url: &str,
    api_key: &str,
    service: &'static str,
    body: &Value,
) -> Result<String, ServiceError> {
    let response = client
        .post(format!("{}/chat/completions", base_url))
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| ServiceError::from_reqwest(service, &e))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ServiceError::Api {
            service,
            status: status.to_string(),
            message: api_error_message(&text),
        });
    }

    let json_resp: Value = response
        .json()
        .await
        .map_err(|e| ServiceError::from_reqwest(service, &e))?;

    json_resp["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::EmptyResponse {
            service,
            body: truncate_chars(&json_resp.to_string(), 300),
        })
}

/// `error.message` from a JSON error body, else the raw body cut short.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| {
            let raw = body.trim();
            if raw.is_empty() {
                "Unknown API error".to_string()
            } else {
                truncate_chars(raw, 300)
            }
        })
}
