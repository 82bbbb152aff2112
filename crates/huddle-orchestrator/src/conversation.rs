//! Group chat definition and the conversation driver
//!
//! A [`GroupChat`] is the immutable setup (participants, graph, selection,
//! termination and human-input policy). Each [`Conversation`] owns its own
//! history, round counter and auto-reply counters, so any number of them
//! can run from one shared `Arc<GroupChat>`.
//!
//! The driver feeds events into the pure state machine and executes the
//! actions it returns until the conversation reaches `Terminated`.

use crate::graph::{TransitionGraph, TransitionPolicy};
use crate::participant::{Participant, Roster};
use crate::selector::{SelectionStrategy, Selector};
use crate::state_machine::{transition, Action, Event, State};
use crate::termination::{AutoReplyCounters, TerminationDecision, TerminationEvaluator};
use crate::transcript::TranscriptLogger;
use huddle_agent::{CompletionClient, HumanInput, HumanPrompt, HumanResponse, ReplyContext};
use huddle_core::fail_open::retry_transient;
use huddle_core::{
    gather_usage_summary, GroupChatConfig, History, HuddleError, HumanInputMode, Message,
    MessageContent, MessageOrigin, ParticipantName, Result, SpeakerSelectionMethod,
    TerminationReason, UsageSummary,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Usage key for completions made by automatic speaker selection
pub const SELECTION_USAGE_KEY: &str = "speaker_selection";

/// Outcome of one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResult {
    pub conversation_id: Uuid,
    pub messages: Vec<Message>,
    /// Replies produced, excluding the seed and human interjections
    pub rounds: usize,
    pub reason: TerminationReason,
    /// Usage per participant (plus automatic selection)
    pub usage: BTreeMap<String, UsageSummary>,
}

impl ConversationResult {
    /// Usage summed across every participant
    pub fn total_usage(&self) -> UsageSummary {
        gather_usage_summary(self.usage.values())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn is_success(&self) -> bool {
        !self.reason.is_failure()
    }
}

/// Immutable group chat setup shared by its conversations
pub struct GroupChat {
    roster: Roster,
    policy: TransitionPolicy,
    selector: Selector,
    evaluator: TerminationEvaluator,
    human_input_mode: HumanInputMode,
    human: Option<Arc<dyn HumanInput>>,
    human_name: ParticipantName,
    reply_retries: usize,
    retry_backoff: Duration,
    transcript: Option<TranscriptLogger>,
}

impl std::fmt::Debug for GroupChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupChat")
            .field("roster", &self.roster)
            .field("policy", &self.policy)
            .field("selector", &self.selector)
            .field("evaluator", &self.evaluator)
            .field("human_input_mode", &self.human_input_mode)
            .finish()
    }
}

impl GroupChat {
    pub fn builder() -> GroupChatBuilder {
        GroupChatBuilder::default()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    pub fn max_rounds(&self) -> usize {
        self.evaluator.max_rounds()
    }

    pub fn human_input_mode(&self) -> HumanInputMode {
        self.human_input_mode
    }
}

/// Builder for [`GroupChat`]; `build` validates the whole setup
pub struct GroupChatBuilder {
    participants: Vec<Participant>,
    graph: Option<TransitionGraph>,
    allow_repeat_speaker: bool,
    strategy: SelectionStrategy,
    fallbacks: Vec<SpeakerSelectionMethod>,
    max_retries_for_selecting_speaker: usize,
    max_rounds: usize,
    human_input_mode: HumanInputMode,
    human: Option<Arc<dyn HumanInput>>,
    human_name: String,
    completion: Option<Arc<dyn CompletionClient>>,
    seed: Option<u64>,
    reply_retries: usize,
    retry_backoff: Duration,
    transcript: Option<PathBuf>,
}

impl Default for GroupChatBuilder {
    fn default() -> Self {
        Self::from_config(&GroupChatConfig::default())
    }
}

impl GroupChatBuilder {
    /// Take every setting except participants from `config`
    pub fn from_config(config: &GroupChatConfig) -> Self {
        Self {
            participants: Vec::new(),
            graph: config.transitions.as_ref().map(TransitionGraph::from_config),
            allow_repeat_speaker: config.allow_repeat_speaker,
            strategy: config.speaker_selection_method.into(),
            fallbacks: config.selection_fallbacks.clone(),
            max_retries_for_selecting_speaker: config.max_retries_for_selecting_speaker,
            max_rounds: config.max_rounds,
            human_input_mode: config.human_input_mode,
            human: None,
            human_name: config.human_name.clone(),
            completion: None,
            seed: config.seed,
            reply_retries: config.reply_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            transcript: None,
        }
    }

    pub fn participant(mut self, participant: Participant) -> Self {
        self.participants.push(participant);
        self
    }

    pub fn participants(mut self, participants: impl IntoIterator<Item = Participant>) -> Self {
        self.participants.extend(participants);
        self
    }

    pub fn graph(mut self, graph: TransitionGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn allow_repeat_speaker(mut self, allow: bool) -> Self {
        self.allow_repeat_speaker = allow;
        self
    }

    pub fn selection(mut self, strategy: impl Into<SelectionStrategy>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn selection_fallbacks(mut self, fallbacks: Vec<SpeakerSelectionMethod>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn max_retries_for_selecting_speaker(mut self, retries: usize) -> Self {
        self.max_retries_for_selecting_speaker = retries;
        self
    }

    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn human_input_mode(mut self, mode: HumanInputMode) -> Self {
        self.human_input_mode = mode;
        self
    }

    pub fn human_input(mut self, human: Arc<dyn HumanInput>) -> Self {
        self.human = Some(human);
        self
    }

    pub fn human_name(mut self, name: impl Into<String>) -> Self {
        self.human_name = name.into();
        self
    }

    pub fn completion_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(client);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn reply_retries(mut self, retries: usize, backoff: Duration) -> Self {
        self.reply_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn transcript(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcript = Some(path.into());
        self
    }

    pub fn build(self) -> Result<GroupChat> {
        let roster = Roster::new(self.participants)?;

        if self.max_rounds == 0 {
            return Err(HuddleError::Config("max_rounds must be at least 1".to_string()));
        }
        if self.human_name.trim().is_empty() {
            return Err(HuddleError::Config("human_name cannot be empty".to_string()));
        }

        let policy = TransitionPolicy::new(self.graph, self.allow_repeat_speaker);
        policy.validate(&roster)?;

        let mut selector = Selector::new(self.strategy)
            .with_fallbacks(self.fallbacks)
            .with_max_retries(self.max_retries_for_selecting_speaker)
            .with_retry_backoff(self.retry_backoff)
            .with_seed(self.seed);
        if let Some(client) = self.completion {
            selector = selector.with_completion_client(client);
        }
        if let Some(human) = &self.human {
            selector = selector.with_human_input(human.clone());
        }

        if selector.needs_completion_client() && !selector.has_completion_client() {
            return Err(HuddleError::Config(
                "auto speaker selection requires a completion client".to_string(),
            ));
        }
        if selector.needs_human_input() && self.human.is_none() {
            return Err(HuddleError::Config(
                "manual speaker selection requires a human input channel".to_string(),
            ));
        }
        if self.human_input_mode != HumanInputMode::Never && self.human.is_none() {
            return Err(HuddleError::Config(format!(
                "human_input_mode {} requires a human input channel",
                self.human_input_mode
            )));
        }

        Ok(GroupChat {
            roster,
            policy,
            selector,
            evaluator: TerminationEvaluator::new(self.max_rounds),
            human_input_mode: self.human_input_mode,
            human: self.human,
            human_name: ParticipantName::new(self.human_name),
            reply_retries: self.reply_retries,
            retry_backoff: self.retry_backoff,
            transcript: self.transcript.map(TranscriptLogger::new),
        })
    }
}

/// One run of a group chat
pub struct Conversation {
    id: Uuid,
    chat: Arc<GroupChat>,
    history: History,
    round: usize,
    counters: AutoReplyCounters,
    selector: Selector,
    usage: BTreeMap<String, UsageSummary>,
    state: State,
    first_speaker: Option<ParticipantName>,
    cancel: CancellationToken,
}

impl Conversation {
    pub fn new(chat: Arc<GroupChat>) -> Self {
        let id = Uuid::new_v4();
        let usage = chat
            .roster
            .iter()
            .map(|p| (p.name().to_string(), UsageSummary::new()))
            .collect();
        Self {
            id,
            selector: chat.selector.fork(),
            chat,
            history: History::new(),
            round: 0,
            counters: AutoReplyCounters::new(id),
            usage,
            state: State::Idle,
            first_speaker: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Invoke `speaker` first instead of selecting after the initiator
    pub fn with_first_speaker(mut self, speaker: impl Into<ParticipantName>) -> Self {
        self.first_speaker = Some(speaker.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Run to termination from a seed message sent by `initiator`
    ///
    /// `initiator` need not be a participant. Errors are reserved for
    /// misuse (a second run, an unknown first speaker); everything that
    /// happens during the run is reported through the result's reason.
    #[instrument(skip_all, fields(conversation = %self.id))]
    pub async fn run(
        &mut self,
        initiator: impl Into<ParticipantName>,
        message: impl Into<MessageContent>,
    ) -> Result<ConversationResult> {
        if self.state != State::Idle {
            return Err(HuddleError::Config(
                "conversation has already been run".to_string(),
            ));
        }
        if let Some(first) = &self.first_speaker {
            if !self.chat.roster.contains(first) {
                return Err(HuddleError::UnknownParticipant(first.to_string()));
            }
        }

        let initiator = initiator.into();
        if let Some(transcript) = &self.chat.transcript {
            transcript
                .log_start(self.id, &self.chat.roster.names(), self.chat.max_rounds())
                .await;
        }
        let seed = self
            .history
            .push(initiator.clone(), message, MessageOrigin::Agent)
            .clone();
        self.log_message(&seed).await;
        info!("Conversation {} started by {}", self.id, initiator);

        let mut event = Event::Start {
            initiator,
            first_speaker: self.first_speaker.clone(),
        };

        loop {
            let current = std::mem::replace(&mut self.state, State::Idle);
            let (next_state, actions) = transition(current, event);
            self.state = next_state;

            let mut next_event = None;
            for action in actions {
                if let Some(produced) = self.perform(action).await {
                    next_event = Some(produced);
                }
            }

            if self.state.is_terminal() {
                break;
            }

            event = match next_event {
                Some(produced) => produced,
                None => Event::Terminate {
                    reason: TerminationReason::InvalidTransition {
                        error: format!("{:?} produced no follow-up event", self.state),
                    },
                },
            };
        }

        let reason = match &self.state {
            State::Terminated { reason } => reason.clone(),
            other => TerminationReason::InvalidTransition {
                error: format!("conversation stopped in {:?}", other),
            },
        };

        let mut usage = self.usage.clone();
        if !self.selector.usage().is_empty() {
            usage.insert(SELECTION_USAGE_KEY.to_string(), self.selector.usage().clone());
        }

        let result = ConversationResult {
            conversation_id: self.id,
            messages: self.history.as_slice().to_vec(),
            rounds: self.round,
            reason,
            usage,
        };

        if let Some(transcript) = &self.chat.transcript {
            transcript
                .log_termination(&result.reason, result.rounds, &result.total_usage())
                .await;
        }

        Ok(result)
    }

    async fn perform(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::LogActivity { message } => {
                info!("{}", message);
                None
            }
            Action::InvokeSpeaker { speaker } => Some(self.invoke(speaker).await),
            Action::EvaluateTermination { speaker } => Some(self.evaluate(speaker).await),
            Action::SelectSpeaker { last_speaker } => Some(self.select(last_speaker).await),
            Action::Finish { reason } => {
                if reason.is_failure() {
                    warn!(
                        "Conversation {} failed after {} rounds: {}",
                        self.id, self.round, reason
                    );
                } else {
                    info!(
                        "Conversation {} finished after {} rounds: {}",
                        self.id, self.round, reason
                    );
                }
                None
            }
        }
    }

    async fn invoke(&mut self, speaker: ParticipantName) -> Event {
        let cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return Event::Cancel;
        }

        let chat = self.chat.clone();
        let Some(participant) = chat.roster.get(&speaker) else {
            return Event::Terminate {
                reason: TerminationReason::ConfigurationError {
                    error: format!("unknown speaker {}", speaker),
                },
            };
        };

        let ctx = ReplyContext {
            conversation_id: self.id,
            speaker: speaker.clone(),
            last_sender: self.history.last().map(|m| m.sender.clone()),
            round: self.round,
        };
        let generator = participant.reply_generator().clone();
        let history = self.history.as_slice();
        let operation = format!("reply from {}", speaker);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Cancelled while waiting for {}", speaker);
                return Event::Cancel;
            }
            result = retry_transient(&operation, chat.reply_retries, chat.retry_backoff, || {
                generator.generate(history, &ctx)
            }) => result,
        };

        match result {
            Ok(reply) => {
                let content = if reply.content.is_empty() {
                    match participant.default_auto_reply() {
                        Some(default) => {
                            debug!("{} produced nothing, using default auto-reply", speaker);
                            default.clone()
                        }
                        None => reply.content,
                    }
                } else {
                    reply.content
                };

                if let Some(usage) = &reply.usage {
                    self.usage
                        .entry(speaker.to_string())
                        .or_default()
                        .record(usage);
                }

                let previous = self.history.last().map(|m| m.sender.clone());
                self.round += 1;
                let message = self
                    .history
                    .push(speaker.clone(), content, reply.origin)
                    .clone();

                if message.is_human() {
                    self.counters.reset_all();
                } else if let Some(previous) = previous {
                    let count = self.counters.record(&speaker, &previous);
                    debug!("{} has replied to {} {} time(s) in a row", speaker, previous, count);
                }

                self.log_message(&message).await;
                Event::ReplyReceived { speaker }
            }
            Err(HuddleError::HumanExit) => Event::Terminate {
                reason: TerminationReason::HumanExit,
            },
            Err(HuddleError::HumanInputUnavailable(error)) => Event::Terminate {
                reason: TerminationReason::HumanInputUnavailable { error },
            },
            Err(e) => {
                error!("Reply from {} failed: {}", speaker, e);
                Event::Terminate {
                    reason: TerminationReason::ReplyFailed {
                        participant: speaker.to_string(),
                        error: e.to_string(),
                    },
                }
            }
        }
    }

    async fn evaluate(&mut self, speaker: ParticipantName) -> Event {
        let messages = self.history.as_slice();
        let Some(latest) = messages.last() else {
            return Event::Terminate {
                reason: TerminationReason::InvalidTransition {
                    error: format!("no reply from {} to evaluate", speaker),
                },
            };
        };
        let previous = messages
            .len()
            .checked_sub(2)
            .and_then(|i| messages.get(i))
            .map(|m| &m.sender);

        let decision = self.chat.evaluator.evaluate(
            self.round,
            latest,
            previous,
            &self.counters,
            &self.chat.roster,
        );
        debug!("Round {} after {}: {:?}", self.round, speaker, decision);

        self.apply_human_policy(decision).await
    }

    /// Let the human confirm, override or end, per the input mode
    async fn apply_human_policy(&mut self, decision: TerminationDecision) -> Event {
        let mode = self.chat.human_input_mode;
        match (mode, decision) {
            // hard ceiling, never overridden
            (_, TerminationDecision::Terminate(TerminationReason::RoundLimit)) => {
                Event::Terminate {
                    reason: TerminationReason::RoundLimit,
                }
            }
            (HumanInputMode::Never, decision)
            | (HumanInputMode::TerminateOnly, decision @ TerminationDecision::Continue) => {
                decision_event(decision)
            }
            (HumanInputMode::TerminateOnly, TerminationDecision::Terminate(reason)) => {
                let prompt = HumanPrompt::text(format!(
                    "The conversation would stop ({}). Type a message to keep going, or press enter to stop:",
                    reason
                ));
                match self.ask_human(&prompt).await {
                    Ok(HumanResponse::Text(text)) => {
                        info!("Human overrode termination ({})", reason);
                        self.append_human_message(text).await;
                        Event::Continue
                    }
                    Ok(HumanResponse::Skip) | Ok(HumanResponse::Exit) => {
                        Event::Terminate { reason }
                    }
                    Err(event) => event,
                }
            }
            (HumanInputMode::Always, decision) => {
                let message = match &decision {
                    TerminationDecision::Continue => {
                        "Type a message to interject, press enter to continue, or 'exit' to stop:"
                            .to_string()
                    }
                    TerminationDecision::Terminate(reason) => format!(
                        "The conversation would stop ({}). Type a message to keep going, or press enter to stop:",
                        reason
                    ),
                };
                match self.ask_human(&HumanPrompt::text(message)).await {
                    Ok(HumanResponse::Text(text)) => {
                        self.append_human_message(text).await;
                        Event::Continue
                    }
                    Ok(HumanResponse::Skip) => decision_event(decision),
                    Ok(HumanResponse::Exit) => Event::Terminate {
                        reason: match decision {
                            TerminationDecision::Terminate(reason) => reason,
                            TerminationDecision::Continue => TerminationReason::HumanExit,
                        },
                    },
                    Err(event) => event,
                }
            }
        }
    }

    /// Ask the human channel; channel failure and cancellation become events
    async fn ask_human(&self, prompt: &HumanPrompt) -> std::result::Result<HumanResponse, Event> {
        let Some(human) = self.chat.human.clone() else {
            return Err(Event::Terminate {
                reason: TerminationReason::HumanInputUnavailable {
                    error: "no human input channel".to_string(),
                },
            });
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Event::Cancel),
            response = human.prompt(prompt) => response.map_err(|e| {
                warn!("Human input failed: {}", e);
                let error = match e {
                    HuddleError::HumanInputUnavailable(error) => error,
                    other => other.to_string(),
                };
                Event::Terminate {
                    reason: TerminationReason::HumanInputUnavailable { error },
                }
            }),
        }
    }

    async fn append_human_message(&mut self, text: String) {
        let message = self
            .history
            .push(self.chat.human_name.clone(), text, MessageOrigin::Human)
            .clone();
        self.counters.reset_all();
        self.log_message(&message).await;
    }

    async fn select(&mut self, last_speaker: ParticipantName) -> Event {
        let cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return Event::Cancel;
        }

        let chat = self.chat.clone();
        let candidates =
            match chat
                .policy
                .candidates(&last_speaker, self.history.as_slice(), &chat.roster)
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    error!("{}", e);
                    return Event::SelectionFailed {
                        error: e.to_string(),
                    };
                }
            };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Event::Cancel,
            result = self.selector.select_next(
                &last_speaker,
                &mut self.history,
                &candidates,
                &chat.roster,
            ) => result,
        };

        match result {
            Ok(speaker) => Event::SpeakerSelected { speaker },
            Err(HuddleError::HumanExit) => Event::Terminate {
                reason: TerminationReason::HumanExit,
            },
            Err(HuddleError::HumanInputUnavailable(error)) => Event::Terminate {
                reason: TerminationReason::HumanInputUnavailable { error },
            },
            Err(e) => {
                error!("Speaker selection after {} failed: {}", last_speaker, e);
                Event::SelectionFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn log_message(&self, message: &Message) {
        debug!("[{}] {}", message.sender, message.text());
        if let Some(transcript) = &self.chat.transcript {
            transcript.log_message(message, self.round).await;
        }
    }
}

fn decision_event(decision: TerminationDecision) -> Event {
    match decision {
        TerminationDecision::Continue => Event::Continue,
        TerminationDecision::Terminate(reason) => Event::Terminate { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use huddle_agent::{Reply, ReplyGenerator, ScriptedAgent, ScriptedHuman};
    use huddle_core::Usage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scripted(name: &str, replies: &[&str]) -> Participant {
        Participant::new(
            name,
            Arc::new(ScriptedAgent::new(replies.iter().copied()).cycling()),
        )
    }

    fn round_robin_chat(participants: Vec<Participant>) -> GroupChatBuilder {
        GroupChat::builder()
            .participants(participants)
            .selection(SpeakerSelectionMethod::RoundRobin)
            .reply_retries(3, Duration::from_millis(1))
    }

    fn senders(result: &ConversationResult) -> Vec<&str> {
        result.messages.iter().map(|m| m.sender.as_str()).collect()
    }

    /// Fails transiently a fixed number of times, then replies
    struct FlakyAgent {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReplyGenerator for FlakyAgent {
        async fn generate(&self, _history: &[Message], _ctx: &ReplyContext) -> Result<Reply> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(HuddleError::Transient("timeout".to_string()))
            } else {
                Ok(Reply::new("recovered").with_usage(Usage {
                    model: "mock".into(),
                    prompt_tokens: 2,
                    completion_tokens: 1,
                    cost: 0.1,
                }))
            }
        }
    }

    /// Never replies
    struct StuckAgent;

    #[async_trait]
    impl ReplyGenerator for StuckAgent {
        async fn generate(&self, _history: &[Message], _ctx: &ReplyContext) -> Result<Reply> {
            std::future::pending::<()>().await;
            Ok(Reply::default())
        }
    }

    /// Human channel that never answers
    struct PendingHuman;

    #[async_trait]
    impl HumanInput for PendingHuman {
        async fn prompt(&self, _prompt: &HumanPrompt) -> Result<HumanResponse> {
            std::future::pending::<()>().await;
            Ok(HumanResponse::Skip)
        }
    }

    #[tokio::test]
    async fn test_round_limit_counts_replies_only() {
        let chat = round_robin_chat(vec![
            scripted("a", &["from a"]),
            scripted("b", &["from b"]),
            scripted("c", &["from c"]),
        ])
        .max_rounds(3)
        .build()
        .unwrap();

        let mut conversation = Conversation::new(Arc::new(chat));
        let result = conversation.run("user", "start").await.unwrap();

        assert_eq!(result.reason, TerminationReason::RoundLimit);
        assert_eq!(result.rounds, 3);
        assert_eq!(senders(&result), vec!["user", "a", "b", "c"]);
        assert!(conversation.state().is_terminal());
    }

    #[tokio::test]
    async fn test_first_speaker_and_positions() {
        let chat = round_robin_chat(vec![scripted("a", &["x"]), scripted("b", &["y"])])
            .max_rounds(2)
            .build()
            .unwrap();

        let mut conversation = Conversation::new(Arc::new(chat)).with_first_speaker("b");
        let result = conversation.run("a", "hello").await.unwrap();

        assert_eq!(senders(&result), vec!["a", "b", "a"]);
        let positions: Vec<usize> = result.messages.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_run_twice_is_an_error() {
        let chat = round_robin_chat(vec![scripted("a", &["x"])])
            .max_rounds(1)
            .build()
            .unwrap();
        let mut conversation = Conversation::new(Arc::new(chat));
        conversation.run("user", "go").await.unwrap();
        assert!(conversation.run("user", "again").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_first_speaker_is_an_error() {
        let chat = round_robin_chat(vec![scripted("a", &["x"])]).build().unwrap();
        let mut conversation = Conversation::new(Arc::new(chat)).with_first_speaker("ghost");
        let err = conversation.run("user", "go").await.unwrap_err();
        assert!(matches!(err, HuddleError::UnknownParticipant(_)));
    }

    #[tokio::test]
    async fn test_default_auto_reply_fills_empty_replies() {
        let chat = round_robin_chat(vec![Participant::new(
            "quiet",
            Arc::new(ScriptedAgent::new(Vec::<&str>::new())),
        )
        .with_default_auto_reply("nothing to add")])
        .max_rounds(1)
        .build()
        .unwrap();

        let result = Conversation::new(Arc::new(chat))
            .run("user", "anything?")
            .await
            .unwrap();
        assert_eq!(
            result.last_message().map(|m| m.text()),
            Some("nothing to add".to_string())
        );
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let chat = round_robin_chat(vec![Participant::new(
            "flaky",
            Arc::new(FlakyAgent {
                failures: 2,
                calls: AtomicUsize::new(0),
            }),
        )])
        .max_rounds(1)
        .build()
        .unwrap();

        let result = Conversation::new(Arc::new(chat))
            .run("user", "go")
            .await
            .unwrap();
        assert_eq!(result.reason, TerminationReason::RoundLimit);
        assert!((result.total_usage().total_cost - 0.1).abs() < 1e-9);
        assert!(result.usage.contains_key("flaky"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_reply() {
        let chat = GroupChat::builder()
            .participant(Participant::new(
                "flaky",
                Arc::new(FlakyAgent {
                    failures: 10,
                    calls: AtomicUsize::new(0),
                }),
            ))
            .selection(SpeakerSelectionMethod::RoundRobin)
            .reply_retries(1, Duration::from_millis(1))
            .build()
            .unwrap();

        let result = Conversation::new(Arc::new(chat))
            .run("user", "go")
            .await
            .unwrap();
        assert!(matches!(
            result.reason,
            TerminationReason::ReplyFailed { ref participant, .. } if participant == "flaky"
        ));
        assert!(!result.is_success());
        assert_eq!(result.rounds, 0);
    }

    #[tokio::test]
    async fn test_cancellation_discards_inflight_reply() {
        let chat = round_robin_chat(vec![Participant::new("stuck", Arc::new(StuckAgent))])
            .build()
            .unwrap();
        let token = CancellationToken::new();
        let mut conversation = Conversation::new(Arc::new(chat)).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let result = conversation.run("user", "go").await.unwrap();
        canceller.await.unwrap();

        assert_eq!(result.reason, TerminationReason::Cancelled);
        assert_eq!(result.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_manual_selection() {
        let chat = round_robin_chat(vec![scripted("a", &["1"]), scripted("b", &["2"])])
            .selection(SpeakerSelectionMethod::Manual)
            .human_input(Arc::new(PendingHuman))
            .build()
            .unwrap();
        let token = CancellationToken::new();
        let mut conversation = Conversation::new(Arc::new(chat))
            .with_first_speaker("a")
            .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let result = conversation.run("user", "go").await.unwrap();
        canceller.await.unwrap();

        assert_eq!(result.reason, TerminationReason::Cancelled);
        assert_eq!(senders(&result), vec!["user", "a"]);
        assert_eq!(result.rounds, 1);
    }

    #[tokio::test]
    async fn test_terminate_only_human_override() {
        let human = Arc::new(ScriptedHuman::from_lines(["keep going", ""]));
        let chat = round_robin_chat(vec![
            scripted("a", &["working"]).with_termination(|m| m.text().contains("TERMINATE")),
            scripted("b", &["done TERMINATE"]),
        ])
        .human_input_mode(HumanInputMode::TerminateOnly)
        .human_input(human.clone())
        .build()
        .unwrap();

        let result = Conversation::new(Arc::new(chat))
            .run("user", "go")
            .await
            .unwrap();

        assert_eq!(
            result.reason,
            TerminationReason::PredicateMatch {
                participant: "a".into()
            }
        );
        // user, a, b, human, a, b
        assert_eq!(senders(&result), vec!["user", "a", "b", "human", "a", "b"]);
        assert_eq!(result.rounds, 4);
        assert!(result.messages[3].is_human());
        assert_eq!(human.prompts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_always_mode_exit_on_continue() {
        let human = Arc::new(ScriptedHuman::from_lines(["", "exit"]));
        let chat = round_robin_chat(vec![scripted("a", &["x"]), scripted("b", &["y"])])
            .human_input_mode(HumanInputMode::Always)
            .human_input(human)
            .build()
            .unwrap();

        let result = Conversation::new(Arc::new(chat))
            .run("user", "go")
            .await
            .unwrap();
        assert_eq!(result.reason, TerminationReason::HumanExit);
        assert_eq!(result.rounds, 2);
    }

    #[tokio::test]
    async fn test_round_limit_is_not_overridable() {
        let human = Arc::new(ScriptedHuman::from_lines(["more please"]));
        let chat = round_robin_chat(vec![scripted("a", &["x"])])
            .max_rounds(1)
            .human_input_mode(HumanInputMode::TerminateOnly)
            .human_input(human.clone())
            .build()
            .unwrap();

        let result = Conversation::new(Arc::new(chat))
            .run("user", "go")
            .await
            .unwrap();
        assert_eq!(result.reason, TerminationReason::RoundLimit);
        assert_eq!(human.remaining().await, 1);
    }

    #[tokio::test]
    async fn test_exhausted_human_channel() {
        let chat = round_robin_chat(vec![scripted("a", &["x"])])
            .human_input_mode(HumanInputMode::Always)
            .human_input(Arc::new(ScriptedHuman::default()))
            .build()
            .unwrap();

        let result = Conversation::new(Arc::new(chat))
            .run("user", "go")
            .await
            .unwrap();
        assert!(matches!(
            result.reason,
            TerminationReason::HumanInputUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_candidates_surface_as_configuration_error() {
        let chat = round_robin_chat(vec![scripted("a", &["x"]), scripted("b", &["y"])])
            .graph(TransitionGraph::allowed().with_edges("a", Vec::<&str>::new()))
            .build()
            .unwrap();

        let result = Conversation::new(Arc::new(chat))
            .with_first_speaker("a")
            .run("user", "go")
            .await
            .unwrap();
        assert!(matches!(
            result.reason,
            TerminationReason::ConfigurationError { .. }
        ));
        assert_eq!(result.rounds, 1);
    }

    #[test]
    fn test_build_rejects_missing_collaborators() {
        let auto = GroupChat::builder()
            .participant(scripted("a", &["x"]))
            .selection(SpeakerSelectionMethod::Auto)
            .build();
        assert!(auto.is_err());

        let manual = GroupChat::builder()
            .participant(scripted("a", &["x"]))
            .selection(SpeakerSelectionMethod::Manual)
            .build();
        assert!(manual.is_err());

        let human_mode = round_robin_chat(vec![scripted("a", &["x"])])
            .human_input_mode(HumanInputMode::TerminateOnly)
            .build();
        assert!(human_mode.is_err());

        let bad_graph = round_robin_chat(vec![scripted("a", &["x"])])
            .graph(TransitionGraph::allowed().with_edges("a", ["ghost"]))
            .build();
        assert!(matches!(
            bad_graph.unwrap_err(),
            HuddleError::UnknownParticipant(_)
        ));

        let no_rounds = round_robin_chat(vec![scripted("a", &["x"])])
            .max_rounds(0)
            .build();
        assert!(no_rounds.is_err());
    }
}
