//! Type definitions for Huddle collaborator interactions

use huddle_core::{MessageContent, MessageOrigin, ParticipantName, Usage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claude model variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Opus,
    #[default]
    Sonnet,
    Haiku,
}

impl Model {
    /// Get the API model name
    pub fn api_name(&self) -> &'static str {
        match self {
            Model::Opus => "claude-opus-4-20250514",
            Model::Sonnet => "claude-sonnet-4-5-20250929",
            Model::Haiku => "claude-haiku-3-5-20250929",
        }
    }

    /// USD per million (input, output) tokens
    fn pricing(&self) -> (f64, f64) {
        match self {
            Model::Opus => (15.0, 75.0),
            Model::Sonnet => (3.0, 15.0),
            Model::Haiku => (0.8, 4.0),
        }
    }

    /// Build a usage record, pricing the tokens for this model
    pub fn usage(&self, prompt_tokens: u64, completion_tokens: u64) -> Usage {
        let (input, output) = self.pricing();
        Usage {
            model: self.to_string(),
            prompt_tokens,
            completion_tokens,
            cost: (prompt_tokens as f64 * input + completion_tokens as f64 * output) / 1_000_000.0,
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Model::Opus => write!(f, "opus"),
            Model::Sonnet => write!(f, "sonnet"),
            Model::Haiku => write!(f, "haiku"),
        }
    }
}

impl std::str::FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opus" => Ok(Model::Opus),
            "sonnet" => Ok(Model::Sonnet),
            "haiku" => Ok(Model::Haiku),
            _ => Err(format!("Invalid model: {}. Use opus, sonnet, or haiku.", s)),
        }
    }
}

/// Context handed to a reply capability for one turn
#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub conversation_id: Uuid,
    /// Participant asked to reply
    pub speaker: ParticipantName,
    /// Sender of the most recent message, if any
    pub last_sender: Option<ParticipantName>,
    /// Replies produced so far in this conversation
    pub round: usize,
}

/// Output of a reply capability
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub content: MessageContent,
    pub usage: Option<Usage>,
    pub origin: MessageOrigin,
}

impl Reply {
    pub fn new(content: impl Into<MessageContent>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Reply typed by a human rather than generated
    pub fn human(content: impl Into<MessageContent>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            origin: MessageOrigin::Human,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Speaker role in a completion transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a completion transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Provider-neutral completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub turns: Vec<ChatTurn>,
    pub max_tokens: Option<usize>,
}

impl CompletionRequest {
    /// Single user prompt
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            turns: vec![ChatTurn::user(text)],
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Completion returned by a model
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Anthropic API message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: Role,
    pub content: String,
}

/// Anthropic API request format
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
}

/// Anthropic API response format
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicResponse {
    #[allow(dead_code)]
    pub id: String,
    pub content: Vec<AnthropicContent>,
    pub usage: Option<AnthropicUsage>,
}

/// Content block in Anthropic response
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

/// Token counts in Anthropic response
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_api_names() {
        assert_eq!(Model::Opus.api_name(), "claude-opus-4-20250514");
        assert_eq!(Model::Sonnet.api_name(), "claude-sonnet-4-5-20250929");
        assert_eq!(Model::Haiku.api_name(), "claude-haiku-3-5-20250929");
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!("opus".parse::<Model>().unwrap(), Model::Opus);
        assert_eq!("SONNET".parse::<Model>().unwrap(), Model::Sonnet);
        assert!("invalid".parse::<Model>().is_err());
    }

    #[test]
    fn test_model_usage_cost() {
        let usage = Model::Sonnet.usage(1_000_000, 100_000);
        assert_eq!(usage.model, "sonnet");
        assert!((usage.cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_request_serialization_skips_empty_system() {
        let request = AnthropicRequest {
            model: Model::Haiku.api_name().to_string(),
            max_tokens: 10,
            system: None,
            messages: vec![AnthropicMessage {
                role: Role::User,
                content: "hi".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
