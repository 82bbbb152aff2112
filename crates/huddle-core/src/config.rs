//! Configuration management for Huddle
//!
//! A group chat is described by a TOML file (`huddle.toml` by default):
//! conversation limits, the selection strategy and its fallbacks, the
//! transition graph, the human-input policy, and the participants.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::{
    HuddleError, HumanInputMode, Result, SpeakerSelectionMethod, TerminationCondition,
    TransitionMode,
};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "huddle.toml";

/// Group chat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChatConfig {
    /// Maximum number of replies before the conversation stops
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Primary speaker selection method
    #[serde(default)]
    pub speaker_selection_method: SpeakerSelectionMethod,

    /// Methods tried in order when the primary method fails recoverably
    #[serde(default = "default_selection_fallbacks")]
    pub selection_fallbacks: Vec<SpeakerSelectionMethod>,

    /// Whether a participant may speak twice in a row
    #[serde(default = "default_true")]
    pub allow_repeat_speaker: bool,

    /// Re-prompts for auto and manual selection before falling back
    #[serde(default = "default_selection_retries")]
    pub max_retries_for_selecting_speaker: usize,

    /// Retries for transient reply-generation failures
    #[serde(default = "default_reply_retries")]
    pub reply_retries: usize,

    /// Base backoff between reply retries, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// When to solicit a human before continuing or stopping
    #[serde(default)]
    pub human_input_mode: HumanInputMode,

    /// Name used as sender for human-typed messages
    #[serde(default = "default_human_name")]
    pub human_name: String,

    /// Seed for random speaker selection
    #[serde(default)]
    pub seed: Option<u64>,

    /// Speaker transition constraints
    #[serde(default)]
    pub transitions: Option<TransitionsConfig>,

    /// Model settings for LLM participants and automatic selection
    #[serde(default)]
    pub model: ModelConfig,

    /// Participants in declaration order (also the round-robin order)
    #[serde(default)]
    pub participants: Vec<ParticipantConfig>,
}

/// Transition graph declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionsConfig {
    #[serde(default)]
    pub mode: TransitionMode,

    /// Speaker name to the list of allowed (or disallowed) next speakers
    #[serde(default)]
    pub graph: HashMap<String, Vec<String>>,
}

/// How a participant produces replies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    /// Replies come from the configured language model
    #[default]
    Llm,
    /// Replies are read from a fixed list, in order
    Scripted,
    /// Replies are typed by a human
    Human,
}

/// A single participant declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub name: String,

    /// Role description shown to the automatic selector
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub kind: ParticipantKind,

    /// System prompt for LLM participants
    #[serde(default)]
    pub system_message: Option<String>,

    /// Canned replies for scripted participants
    #[serde(default)]
    pub replies: Vec<String>,

    /// Ceiling on consecutive automatic replies to the same sender
    #[serde(default)]
    pub max_consecutive_auto_reply: Option<usize>,

    /// Predicate applied to incoming messages
    #[serde(default)]
    pub is_termination_msg: Option<TerminationCondition>,

    /// Reply used when the reply capability produces nothing
    #[serde(default)]
    pub default_auto_reply: Option<String>,
}

impl ParticipantConfig {
    pub fn new(name: impl Into<String>, kind: ParticipantKind) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind,
            system_message: None,
            replies: Vec::new(),
            max_consecutive_auto_reply: None,
            is_termination_msg: None,
            default_auto_reply: None,
        }
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model to use
    #[serde(default = "default_model")]
    pub default: String,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

// Default value providers
fn default_max_rounds() -> usize {
    10
}

fn default_selection_fallbacks() -> Vec<SpeakerSelectionMethod> {
    vec![SpeakerSelectionMethod::RoundRobin]
}

fn default_true() -> bool {
    true
}

fn default_selection_retries() -> usize {
    2
}

fn default_reply_retries() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_human_name() -> String {
    "human".to_string()
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_max_tokens() -> usize {
    4096
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl GroupChatConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from `huddle.toml` in `dir` or use defaults
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| HuddleError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write the example configuration to `huddle.toml` in `dir`
    pub fn write_default(dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let config_path = dir.join(DEFAULT_CONFIG_FILE);
        let content = toml::to_string_pretty(&Self::example()).map_err(|e| {
            HuddleError::Config(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// A small scripted planner/coder/critic chat
    pub fn example() -> Self {
        let mut planner = ParticipantConfig::new("planner", ParticipantKind::Scripted);
        planner.description = Some("Breaks the request into steps".to_string());
        planner.replies = vec!["Step 1: write the function. Step 2: review it.".to_string()];

        let mut coder = ParticipantConfig::new("coder", ParticipantKind::Scripted);
        coder.description = Some("Writes the code".to_string());
        coder.replies = vec!["fn add(a: i32, b: i32) -> i32 { a + b }".to_string()];
        coder.max_consecutive_auto_reply = Some(3);

        let mut critic = ParticipantConfig::new("critic", ParticipantKind::Scripted);
        critic.description = Some("Reviews the code and ends the chat".to_string());
        critic.replies = vec!["Looks correct. TERMINATE".to_string()];

        let mut user = ParticipantConfig::new("user", ParticipantKind::Scripted);
        user.is_termination_msg = Some(TerminationCondition::Contains("TERMINATE".to_string()));
        user.default_auto_reply = Some("Please continue.".to_string());

        let graph = HashMap::from([
            ("user".to_string(), vec!["planner".to_string()]),
            ("planner".to_string(), vec!["coder".to_string()]),
            ("coder".to_string(), vec!["critic".to_string()]),
            (
                "critic".to_string(),
                vec!["coder".to_string(), "user".to_string()],
            ),
        ]);

        Self {
            speaker_selection_method: SpeakerSelectionMethod::RoundRobin,
            transitions: Some(TransitionsConfig {
                mode: TransitionMode::Allowed,
                graph,
            }),
            participants: vec![user, planner, coder, critic],
            ..Self::default()
        }
    }

    /// Check participant names and transition graph references
    pub fn validate(&self) -> Result<()> {
        if self.participants.is_empty() {
            return Err(HuddleError::Config("No participants declared".to_string()));
        }

        let mut names = HashSet::new();
        for participant in &self.participants {
            if participant.name.trim().is_empty() {
                return Err(HuddleError::Config(
                    "Participant name cannot be empty".to_string(),
                ));
            }
            if !names.insert(participant.name.as_str()) {
                return Err(HuddleError::Config(format!(
                    "Duplicate participant name: {}",
                    participant.name
                )));
            }
            if participant.kind == ParticipantKind::Scripted
                && participant.replies.is_empty()
                && participant.default_auto_reply.is_none()
            {
                return Err(HuddleError::Config(format!(
                    "Scripted participant {} has no replies",
                    participant.name
                )));
            }
        }

        if let Some(transitions) = &self.transitions {
            for (from, targets) in &transitions.graph {
                if !names.contains(from.as_str()) {
                    return Err(HuddleError::UnknownParticipant(from.clone()));
                }
                if let Some(unknown) = targets.iter().find(|t| !names.contains(t.as_str())) {
                    return Err(HuddleError::UnknownParticipant(unknown.clone()));
                }
            }
        }

        if self.max_rounds == 0 {
            return Err(HuddleError::Config(
                "max_rounds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether running this chat needs a human-input channel
    pub fn needs_human_input(&self) -> bool {
        self.human_input_mode != HumanInputMode::Never
            || self.speaker_selection_method == SpeakerSelectionMethod::Manual
            || self
                .selection_fallbacks
                .contains(&SpeakerSelectionMethod::Manual)
            || self
                .participants
                .iter()
                .any(|p| p.kind == ParticipantKind::Human)
    }
}

impl Default for GroupChatConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            speaker_selection_method: SpeakerSelectionMethod::default(),
            selection_fallbacks: default_selection_fallbacks(),
            allow_repeat_speaker: true,
            max_retries_for_selecting_speaker: default_selection_retries(),
            reply_retries: default_reply_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            human_input_mode: HumanInputMode::default(),
            human_name: default_human_name(),
            seed: None,
            transitions: None,
            model: ModelConfig::default(),
            participants: Vec::new(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            max_tokens: default_max_tokens(),
            api_key_env: default_api_key_env(),
        }
    }
}
