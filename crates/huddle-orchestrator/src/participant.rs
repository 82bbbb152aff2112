//! Participants and the declared roster

use huddle_agent::ReplyGenerator;
use huddle_core::{
    HuddleError, Message, MessageContent, ParticipantConfig, ParticipantName, Result,
    TerminationCondition,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

/// Pure predicate over an incoming message
pub type Predicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// A named conversational entity
///
/// Definitions are immutable and may be shared by many conversations.
/// Per-run counters live in the conversation, never here.
#[derive(Clone)]
pub struct Participant {
    name: ParticipantName,
    description: Option<String>,
    reply: Arc<dyn ReplyGenerator>,
    max_consecutive_auto_reply: Option<usize>,
    termination: Option<Predicate>,
    default_auto_reply: Option<MessageContent>,
}

impl Participant {
    pub fn new(name: impl Into<ParticipantName>, reply: Arc<dyn ReplyGenerator>) -> Self {
        Self {
            name: name.into(),
            description: None,
            reply,
            max_consecutive_auto_reply: None,
            termination: None,
            default_auto_reply: None,
        }
    }

    /// Apply a declaration's settings to a reply capability chosen by the caller
    pub fn from_config(config: &ParticipantConfig, reply: Arc<dyn ReplyGenerator>) -> Result<Self> {
        let mut participant = Self::new(config.name.as_str(), reply);
        if let Some(description) = &config.description {
            participant = participant.with_description(description.as_str());
        }
        if let Some(ceiling) = config.max_consecutive_auto_reply {
            participant = participant.with_max_consecutive_auto_reply(ceiling);
        }
        if let Some(condition) = &config.is_termination_msg {
            participant = participant.with_termination_condition(condition)?;
        }
        if let Some(default) = &config.default_auto_reply {
            participant = participant.with_default_auto_reply(default.as_str());
        }
        Ok(participant)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_max_consecutive_auto_reply(mut self, ceiling: usize) -> Self {
        self.max_consecutive_auto_reply = Some(ceiling);
        self
    }

    /// Terminate when this participant receives a message matching `predicate`
    pub fn with_termination<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.termination = Some(Arc::new(predicate));
        self
    }

    /// Like [`with_termination`](Self::with_termination), from a declarative condition
    pub fn with_termination_condition(mut self, condition: &TerminationCondition) -> Result<Self> {
        self.termination = Some(compile_condition(condition)?);
        Ok(self)
    }

    pub fn with_default_auto_reply(mut self, reply: impl Into<MessageContent>) -> Self {
        self.default_auto_reply = Some(reply.into());
        self
    }

    pub fn name(&self) -> &ParticipantName {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn reply_generator(&self) -> &Arc<dyn ReplyGenerator> {
        &self.reply
    }

    pub fn max_consecutive_auto_reply(&self) -> Option<usize> {
        self.max_consecutive_auto_reply
    }

    pub fn default_auto_reply(&self) -> Option<&MessageContent> {
        self.default_auto_reply.as_ref()
    }

    /// Apply this participant's termination predicate, false if none
    pub fn is_termination_msg(&self, message: &Message) -> bool {
        self.termination
            .as_ref()
            .map(|predicate| predicate(message))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("max_consecutive_auto_reply", &self.max_consecutive_auto_reply)
            .field("has_termination", &self.termination.is_some())
            .finish()
    }
}

/// Compile a declarative condition into a predicate
pub fn compile_condition(condition: &TerminationCondition) -> Result<Predicate> {
    let predicate: Predicate = match condition.clone() {
        TerminationCondition::Contains(needle) => {
            Arc::new(move |m: &Message| m.text().contains(&needle))
        }
        TerminationCondition::StartsWith(prefix) => {
            Arc::new(move |m: &Message| m.text().trim_start().starts_with(&prefix))
        }
        TerminationCondition::EndsWith(suffix) => {
            Arc::new(move |m: &Message| m.text().trim_end().ends_with(&suffix))
        }
        TerminationCondition::Equals(expected) => {
            Arc::new(move |m: &Message| m.text().trim() == expected)
        }
        TerminationCondition::Matches(pattern) => {
            let regex = Regex::new(&pattern).map_err(|e| {
                HuddleError::Config(format!("Invalid termination pattern {:?}: {}", pattern, e))
            })?;
            Arc::new(move |m: &Message| regex.is_match(&m.text()))
        }
    };
    Ok(predicate)
}

/// Participants in declaration order
///
/// Declaration order is the round-robin order.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    /// Build a roster, rejecting empty or duplicate names
    pub fn new(participants: Vec<Participant>) -> Result<Self> {
        if participants.is_empty() {
            return Err(HuddleError::Config("No participants declared".to_string()));
        }

        let mut seen = HashSet::new();
        for participant in &participants {
            if participant.name.as_str().trim().is_empty() {
                return Err(HuddleError::Config(
                    "Participant name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(participant.name.clone()) {
                return Err(HuddleError::Config(format!(
                    "Duplicate participant name: {}",
                    participant.name
                )));
            }
        }

        Ok(Self { participants })
    }

    pub fn get(&self, name: &ParticipantName) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.name == name)
    }

    pub fn contains(&self, name: &ParticipantName) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &ParticipantName) -> Option<usize> {
        self.participants.iter().position(|p| &p.name == name)
    }

    pub fn names(&self) -> Vec<ParticipantName> {
        self.participants.iter().map(|p| p.name.clone()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Participant> {
        self.participants.iter()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
