//! Core type definitions for Huddle conversations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique participant identity within a group chat
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantName(String);

impl ParticipantName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ParticipantName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for ParticipantName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ParticipantName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Who produced a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Automatic reply from a participant's reply capability
    #[default]
    Agent,
    /// Text typed by a human out of band
    Human,
}

/// Message payload: plain text or structured JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Structured(serde_json::Value),
}

impl MessageContent {
    /// Render the content as text (structured content is rendered as JSON)
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Structured(value) => value.is_null(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<serde_json::Value> for MessageContent {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// A single entry in the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Participant (or human proxy) that produced the message
    pub sender: ParticipantName,
    /// Message content
    pub content: MessageContent,
    /// Zero-based position in the history
    pub position: usize,
    /// Whether a human or an automatic reply produced this message
    #[serde(default)]
    pub origin: MessageOrigin,
    /// When the message was appended
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Content rendered as text
    pub fn text(&self) -> String {
        self.content.as_text()
    }

    pub fn is_human(&self) -> bool {
        self.origin == MessageOrigin::Human
    }
}

/// Append-only, ordered conversation history
///
/// Positions are assigned on push and never change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return it
    pub fn push(
        &mut self,
        sender: impl Into<ParticipantName>,
        content: impl Into<MessageContent>,
        origin: MessageOrigin,
    ) -> &Message {
        let position = self.messages.len();
        self.messages.push(Message {
            sender: sender.into(),
            content: content.into(),
            position,
            origin,
            timestamp: Utc::now(),
        });
        &self.messages[position]
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent `n` messages, oldest first
    pub fn tail(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

/// Built-in speaker selection methods
///
/// These names double as the sentinels a custom selection function may
/// return to delegate a single turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerSelectionMethod {
    #[default]
    Auto,
    Manual,
    Random,
    RoundRobin,
}

impl std::fmt::Display for SpeakerSelectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
            Self::Random => write!(f, "random"),
            Self::RoundRobin => write!(f, "round_robin"),
        }
    }
}

impl std::str::FromStr for SpeakerSelectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            "random" => Ok(Self::Random),
            "round_robin" | "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            _ => Err(format!("Invalid speaker selection method: {}", s)),
        }
    }
}

/// How a transition graph entry is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionMode {
    /// Entry lists the only speakers permitted next
    #[default]
    Allowed,
    /// Entry lists speakers forbidden next
    Disallowed,
}

impl std::fmt::Display for TransitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Disallowed => write!(f, "disallowed"),
        }
    }
}

impl std::str::FromStr for TransitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allowed" => Ok(Self::Allowed),
            "disallowed" => Ok(Self::Disallowed),
            _ => Err(format!("Invalid transition mode: {}", s)),
        }
    }
}

/// When the orchestrator asks a human before continuing or stopping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanInputMode {
    /// Honor termination decisions without asking
    #[default]
    Never,
    /// Ask on every turn
    Always,
    /// Ask only when the evaluator wants to terminate
    #[serde(alias = "terminate")]
    TerminateOnly,
}

impl std::fmt::Display for HumanInputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Always => write!(f, "always"),
            Self::TerminateOnly => write!(f, "terminate_only"),
        }
    }
}

impl std::str::FromStr for HumanInputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            "terminate" | "terminate_only" | "terminate-only" => Ok(Self::TerminateOnly),
            _ => Err(format!("Invalid human input mode: {}", s)),
        }
    }
}

/// Declarative message predicate, loadable from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCondition {
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Equals(String),
    /// Regular expression matched anywhere in the text
    Matches(String),
}

/// Why a conversation stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    /// Round counter reached the configured maximum
    RoundLimit,
    /// A participant exceeded its consecutive auto-reply ceiling
    AutoReplyLimit { participant: String },
    /// A receiver's termination predicate matched the latest message
    PredicateMatch { participant: String },
    /// A human asked to stop
    HumanExit,
    /// Invalid configuration discovered during the run
    ConfigurationError { error: String },
    /// Reply generation failed fatally or exhausted its retries
    ReplyFailed { participant: String, error: String },
    /// Human input was required but the channel failed
    HumanInputUnavailable { error: String },
    /// Externally cancelled
    Cancelled,
    /// The conversation state machine received an event it cannot handle
    InvalidTransition { error: String },
}

impl TerminationReason {
    /// Whether this reason represents a failure rather than graceful completion
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError { .. }
                | Self::ReplyFailed { .. }
                | Self::HumanInputUnavailable { .. }
                | Self::InvalidTransition { .. }
        )
    }

    /// Short, stable code for logs and exit status reporting
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoundLimit => "round_limit",
            Self::AutoReplyLimit { .. } => "auto_reply_limit",
            Self::PredicateMatch { .. } => "predicate_match",
            Self::HumanExit => "human_exit",
            Self::ConfigurationError { .. } => "configuration_error",
            Self::ReplyFailed { .. } => "reply_failed",
            Self::HumanInputUnavailable { .. } => "human_input_unavailable",
            Self::Cancelled => "cancelled",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundLimit => write!(f, "round limit reached"),
            Self::AutoReplyLimit { participant } => {
                write!(f, "auto-reply limit reached by {}", participant)
            }
            Self::PredicateMatch { participant } => {
                write!(f, "termination predicate of {} matched", participant)
            }
            Self::HumanExit => write!(f, "human requested exit"),
            Self::ConfigurationError { error } => write!(f, "configuration error: {}", error),
            Self::ReplyFailed { participant, error } => {
                write!(f, "reply from {} failed: {}", participant, error)
            }
            Self::HumanInputUnavailable { error } => {
                write!(f, "human input unavailable: {}", error)
            }
            Self::Cancelled => write!(f, "cancelled"),
            Self::InvalidTransition { error } => write!(f, "invalid transition: {}", error),
        }
    }
}
