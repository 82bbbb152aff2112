//! Reply capabilities
//!
//! A participant's reply capability is opaque to the orchestrator: it gets
//! the full history and a turn context and returns content. Implementations
//! here cover model-backed agents, scripted agents, and human participants.

use crate::client::CompletionClient;
use crate::human::{HumanInput, HumanPrompt, HumanResponse};
use crate::types::{ChatTurn, CompletionRequest, Reply, ReplyContext, Role};
use async_trait::async_trait;
use huddle_core::{HuddleError, Message, MessageContent, ParticipantName, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Trait for producing a participant's reply (allows mocking in tests)
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, history: &[Message], ctx: &ReplyContext) -> Result<Reply>;
}

/// Participant backed by a language model
pub struct LlmAgent {
    client: Arc<dyn CompletionClient>,
    system_message: Option<String>,
    max_tokens: Option<usize>,
    /// Number of most recent messages sent to the model (0 = all)
    history_window: usize,
}

impl LlmAgent {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            system_message: None,
            max_tokens: None,
            history_window: 0,
        }
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_history_window(mut self, messages: usize) -> Self {
        self.history_window = messages;
        self
    }

    fn build_request(&self, history: &[Message], ctx: &ReplyContext) -> CompletionRequest {
        let window = if self.history_window == 0 {
            history
        } else {
            &history[history.len().saturating_sub(self.history_window)..]
        };

        let mut system = format!(
            "You are {} in a group conversation. Messages from others are prefixed with their name.",
            ctx.speaker
        );
        if let Some(extra) = &self.system_message {
            system.push_str("\n\n");
            system.push_str(extra);
        }

        CompletionRequest {
            system: Some(system),
            turns: build_turns(window, &ctx.speaker),
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl ReplyGenerator for LlmAgent {
    #[instrument(skip(self, history, ctx), fields(speaker = %ctx.speaker, round = ctx.round))]
    async fn generate(&self, history: &[Message], ctx: &ReplyContext) -> Result<Reply> {
        let request = self.build_request(history, ctx);
        let completion = self.client.complete(&request).await?;
        debug!("{} produced {} chars", ctx.speaker, completion.text.len());

        Ok(Reply {
            content: MessageContent::Text(completion.text),
            usage: completion.usage,
            ..Default::default()
        })
    }
}

/// Fold a group history into alternating user/assistant turns
///
/// The speaker's own messages become assistant turns; everything else is a
/// user turn prefixed with its sender. Adjacent turns with the same role are
/// merged so the transcript strictly alternates, starting and ending with a
/// user turn.
pub fn build_turns(history: &[Message], speaker: &ParticipantName) -> Vec<ChatTurn> {
    let mut turns: Vec<ChatTurn> = Vec::new();

    for message in history {
        let (role, content) = if &message.sender == speaker {
            (Role::Assistant, message.text())
        } else {
            (Role::User, format!("{}: {}", message.sender, message.text()))
        };

        match turns.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&content);
            }
            _ => turns.push(ChatTurn { role, content }),
        }
    }

    if turns.first().map(|t| t.role) != Some(Role::User) {
        turns.insert(0, ChatTurn::user("(conversation start)"));
    }
    if turns.last().map(|t| t.role) == Some(Role::Assistant) {
        turns.push(ChatTurn::user("Continue."));
    }

    turns
}

/// Participant that replies from a fixed list
///
/// The n-th automatic reply of the speaker in the current history picks the
/// n-th entry, so one definition can serve many conversations. Once the
/// list is exhausted it replies with empty content (or cycles, if enabled).
pub struct ScriptedAgent {
    replies: Vec<MessageContent>,
    cycle: bool,
}

impl ScriptedAgent {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MessageContent>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            cycle: false,
        }
    }

    pub fn cycling(mut self) -> Self {
        self.cycle = true;
        self
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedAgent {
    async fn generate(&self, history: &[Message], ctx: &ReplyContext) -> Result<Reply> {
        let spoken = history
            .iter()
            .filter(|m| m.sender == ctx.speaker && !m.is_human())
            .count();

        let content = if self.cycle && !self.replies.is_empty() {
            self.replies.get(spoken % self.replies.len())
        } else {
            self.replies.get(spoken)
        };

        Ok(content.cloned().map(Reply::new).unwrap_or_default())
    }
}

/// Participant whose replies are typed by a human
pub struct HumanAgent {
    input: Arc<dyn HumanInput>,
}

impl HumanAgent {
    pub fn new(input: Arc<dyn HumanInput>) -> Self {
        Self { input }
    }
}

#[async_trait]
impl ReplyGenerator for HumanAgent {
    async fn generate(&self, history: &[Message], ctx: &ReplyContext) -> Result<Reply> {
        let mut question = String::new();
        if let Some(last) = history.last() {
            question.push_str(&format!("[{}] {}\n", last.sender, last.text()));
        }
        question.push_str(&format!(
            "Reply as {} (empty to use the default reply, 'exit' to stop):",
            ctx.speaker
        ));

        match self.input.prompt(&HumanPrompt::text(question)).await? {
            HumanResponse::Text(text) => Ok(Reply::human(text)),
            HumanResponse::Skip => Ok(Reply::default()),
            HumanResponse::Exit => Err(HuddleError::HumanExit),
        }
    }
}
