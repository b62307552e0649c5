//! Assistant proxy
//!
//! Stateless: each `ask` sends the system prompt, the recent conversation and
//! the new message to the Anthropic Messages API and returns the reply text.
//! The API key stays in the host process; the UI only sees text.

use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Only the most recent turns of the conversation are sent.
pub const HISTORY_TURNS: usize = 8;

pub const NOT_CONFIGURED_REPLY: &str =
    "The assistant is not configured. Set ANTHROPIC_API_KEY and restart Studio.";
pub const EMPTY_REPLY: &str = "Sorry, no response.";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a concise coding assistant inside a code editor. \
Answer questions about the user's project and the open file. \
Use fenced code blocks for code.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Clone)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(60),
        }
    }
}

impl AiConfig {
    /// `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL`, `STUDIO_AI_MODEL`, `STUDIO_AI_MAX_TOKENS`.
    /// A missing key is not an error; the assistant then answers with a fixed reply.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            api_key: var("ANTHROPIC_API_KEY"),
            base_url: var("ANTHROPIC_BASE_URL").unwrap_or(defaults.base_url),
            model: var("STUDIO_AI_MODEL").unwrap_or(defaults.model),
            max_tokens: var("STUDIO_AI_MAX_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_tokens),
            timeout: defaults.timeout,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ChatTurn>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

pub struct Assistant {
    client: Client,
    config: AiConfig,
}

impl Assistant {
    pub fn new(config: AiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Ai(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    pub async fn ask(&self, request: &AskRequest) -> Result<String> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Ok(NOT_CONFIGURED_REPLY.to_string());
        };

        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: request
                .system_prompt
                .as_deref()
                .unwrap_or(DEFAULT_SYSTEM_PROMPT),
            messages: conversation(&request.history, &request.message),
        };
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        log::debug!("assistant request: {} messages to {}", body.messages.len(), url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Ai(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Ai(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| truncate(&text, 300));
            log::warn!("assistant request rejected ({}): {}", status, reason);
            return Err(Error::Ai(format!("{}: {}", status, reason)));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Ai(format!("invalid response: {}", e)))?;
        Ok(first_text(parsed))
    }
}

/// Recent history plus the new message, shaped the way the API accepts it:
/// starts with a user turn, roles alternate, no empty turns.
fn conversation(history: &[ChatTurn], message: &str) -> Vec<ChatTurn> {
    let recent = &history[history.len().saturating_sub(HISTORY_TURNS)..];
    let mut turns: Vec<ChatTurn> = Vec::with_capacity(recent.len() + 1);

    for turn in recent.iter().chain(std::iter::once(&ChatTurn::user(message))) {
        if turn.content.trim().is_empty() {
            continue;
        }
        if turns.is_empty() && turn.role == ChatRole::Assistant {
            continue;
        }
        match turns.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&turn.content);
            }
            _ => turns.push(turn.clone()),
        }
    }
    turns
}

fn first_text(response: MessagesResponse) -> String {
    response
        .content
        .into_iter()
        .find_map(|block| match block {
            ContentBlock::Text { text } if !text.trim().is_empty() => Some(text),
            _ => None,
        })
        .unwrap_or_else(|| EMPTY_REPLY.to_string())
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ask(message: &str, history: Vec<ChatTurn>) -> AskRequest {
        AskRequest {
            system_prompt: None,
            message: message.to_string(),
            history,
        }
    }

    #[test]
    fn keeps_only_recent_history() {
        let history: Vec<ChatTurn> = (0..12)
            .map(|i| {
                if i % 2 == 0 {
                    ChatTurn::user(format!("q{i}"))
                } else {
                    ChatTurn::assistant(format!("a{i}"))
                }
            })
            .collect();

        let turns = conversation(&history, "now");
        assert_eq!(turns.len(), HISTORY_TURNS + 1);
        assert_eq!(turns[0], ChatTurn::user("q4"));
        assert_eq!(turns.last().unwrap(), &ChatTurn::user("now"));
    }

    #[test]
    fn drops_leading_assistant_greeting() {
        let history = vec![
            ChatTurn::assistant("Hey, ask me anything."),
            ChatTurn::user("what is this?"),
            ChatTurn::assistant("a parser"),
        ];
        let turns = conversation(&history, "explain it");
        assert_eq!(
            turns,
            vec![
                ChatTurn::user("what is this?"),
                ChatTurn::assistant("a parser"),
                ChatTurn::user("explain it"),
            ]
        );
    }

    #[test]
    fn merges_consecutive_turns_of_one_role() {
        let history = vec![ChatTurn::user("first try"), ChatTurn::user("")];
        let turns = conversation(&history, "second try");
        assert_eq!(turns, vec![ChatTurn::user("first try\n\nsecond try")]);
    }

    #[test]
    fn reply_is_first_non_empty_text_block() {
        let parsed: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"thinking","thinking":"..."},{"type":"text","text":"Hello"}]}"#,
        )
        .unwrap();
        assert_eq!(first_text(parsed), "Hello");

        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert_eq!(first_text(empty), EMPTY_REPLY);
    }

    #[test]
    fn request_deserializes_from_camel_case() {
        let req: AskRequest = serde_json::from_str(
            r#"{"message":"hi","systemPrompt":"be brief","history":[{"role":"assistant","content":"yo"}]}"#,
        )
        .unwrap();
        assert_eq!(req.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(req.history, vec![ChatTurn::assistant("yo")]);
    }

    #[test]
    fn debug_masks_api_key() {
        let config = AiConfig::default().with_api_key("sk-secret");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("sk-secret"));
    }

    #[tokio::test]
    async fn missing_key_returns_fixed_reply() {
        let assistant = Assistant::new(AiConfig::default()).unwrap();
        assert!(!assistant.is_configured());
        let reply = assistant.ask(&ask("hello", Vec::new())).await.unwrap();
        assert_eq!(reply, NOT_CONFIGURED_REPLY);
    }

    #[tokio::test]
    async fn network_failure_is_an_error_value() {
        let config = AiConfig::default()
            .with_api_key("test-key")
            .with_base_url("http://127.0.0.1:9")
            .with_timeout(Duration::from_secs(5));
        let assistant = Assistant::new(config).unwrap();

        let err = assistant.ask(&ask("hello", Vec::new())).await.unwrap_err();
        assert!(matches!(err, Error::Ai(_)));
        assert!(err.to_string().starts_with("assistant error:"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
