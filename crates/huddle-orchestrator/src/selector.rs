//! Speaker selection
//!
//! Given the eligible candidates, pick exactly one. The primary strategy is
//! tried first; when it fails recoverably (out-of-graph answer, unparseable
//! model reply) the configured fallback methods are tried in order.
//! Configuration errors and human exits are never masked by fallbacks.

use crate::participant::Roster;
use huddle_agent::{ChatTurn, CompletionClient, CompletionRequest, HumanInput, HumanPrompt, HumanResponse};
use huddle_core::{
    History, HuddleError, ParticipantName, Result, SpeakerSelectionMethod, UsageSummary,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Messages shown to the automatic selector
const AUTO_SELECTION_WINDOW: usize = 20;

/// What a custom selection function decided for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomSelection {
    /// A participant by name
    Speaker(ParticipantName),
    /// Delegate this turn to a built-in method
    Method(SpeakerSelectionMethod),
}

impl CustomSelection {
    /// Interpret a raw string: built-in method names delegate, anything else is a speaker
    pub fn parse(value: &str) -> Self {
        match value.parse::<SpeakerSelectionMethod>() {
            Ok(method) => Self::Method(method),
            Err(_) => Self::Speaker(ParticipantName::new(value.trim())),
        }
    }
}

impl From<SpeakerSelectionMethod> for CustomSelection {
    fn from(method: SpeakerSelectionMethod) -> Self {
        Self::Method(method)
    }
}

impl From<&str> for CustomSelection {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

/// User-supplied selection function
///
/// Receives the last speaker and the shared history, which it may append to.
pub trait SpeakerSelectFn: Send + Sync {
    fn select(&self, last_speaker: &ParticipantName, history: &mut History)
        -> Result<CustomSelection>;
}

impl<F> SpeakerSelectFn for F
where
    F: Fn(&ParticipantName, &mut History) -> Result<CustomSelection> + Send + Sync,
{
    fn select(
        &self,
        last_speaker: &ParticipantName,
        history: &mut History,
    ) -> Result<CustomSelection> {
        self(last_speaker, history)
    }
}

/// Primary selection strategy
#[derive(Clone)]
pub enum SelectionStrategy {
    Custom(Arc<dyn SpeakerSelectFn>),
    Auto,
    RoundRobin,
    Random,
    Manual,
}

impl SelectionStrategy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&ParticipantName, &mut History) -> Result<CustomSelection> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Built-in method this strategy runs, if any
    pub fn method(&self) -> Option<SpeakerSelectionMethod> {
        match self {
            Self::Custom(_) => None,
            Self::Auto => Some(SpeakerSelectionMethod::Auto),
            Self::RoundRobin => Some(SpeakerSelectionMethod::RoundRobin),
            Self::Random => Some(SpeakerSelectionMethod::Random),
            Self::Manual => Some(SpeakerSelectionMethod::Manual),
        }
    }
}

impl From<SpeakerSelectionMethod> for SelectionStrategy {
    fn from(method: SpeakerSelectionMethod) -> Self {
        match method {
            SpeakerSelectionMethod::Auto => Self::Auto,
            SpeakerSelectionMethod::Manual => Self::Manual,
            SpeakerSelectionMethod::Random => Self::Random,
            SpeakerSelectionMethod::RoundRobin => Self::RoundRobin,
        }
    }
}

impl std::fmt::Debug for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.method() {
            Some(method) => write!(f, "{}", method),
            None => write!(f, "custom"),
        }
    }
}

/// Next speaker after `last_speaker` in declaration order, wrapping
///
/// A `last_speaker` outside the roster (an external initiator) yields the
/// first candidate.
pub fn round_robin(
    last_speaker: &ParticipantName,
    candidates: &[ParticipantName],
    roster: &Roster,
) -> Option<ParticipantName> {
    let names = roster.names();
    let start = match roster.position(last_speaker) {
        Some(pos) => pos,
        None => return candidates.first().cloned(),
    };

    (1..=names.len())
        .map(|offset| &names[(start + offset) % names.len()])
        .find(|name| candidates.contains(name))
        .cloned()
        .or_else(|| candidates.first().cloned())
}

/// Distinct candidate-or-roster names mentioned in `text`, word-bounded
pub fn mentioned_names(text: &str, names: &[ParticipantName]) -> Vec<ParticipantName> {
    names
        .iter()
        .filter(|name| {
            let pattern = format!(r"(?:^|[^\w]){}(?:[^\w]|$)", regex::escape(name.as_str()));
            Regex::new(&pattern)
                .map(|re| re.is_match(text))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Picks the next speaker for one conversation
#[derive(Clone)]
pub struct Selector {
    strategy: SelectionStrategy,
    fallbacks: Vec<SpeakerSelectionMethod>,
    max_retries: usize,
    retry_backoff: Duration,
    completion: Option<Arc<dyn CompletionClient>>,
    human: Option<Arc<dyn HumanInput>>,
    seed: Option<u64>,
    rng: StdRng,
    usage: UsageSummary,
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("strategy", &self.strategy)
            .field("fallbacks", &self.fallbacks)
            .field("max_retries", &self.max_retries)
            .field("seed", &self.seed)
            .finish()
    }
}

impl Selector {
    pub fn new(strategy: impl Into<SelectionStrategy>) -> Self {
        Self {
            strategy: strategy.into(),
            fallbacks: vec![SpeakerSelectionMethod::RoundRobin],
            max_retries: 2,
            retry_backoff: Duration::from_millis(100),
            completion: None,
            human: None,
            seed: None,
            rng: StdRng::from_entropy(),
            usage: UsageSummary::new(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<SpeakerSelectionMethod>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Base delay before retrying a transient completion failure
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_completion_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(client);
        self
    }

    pub fn with_human_input(mut self, human: Arc<dyn HumanInput>) -> Self {
        self.human = Some(human);
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self.rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self
    }

    /// Fresh copy for a new conversation
    ///
    /// Seeded selectors restart their sequence; unseeded ones draw new entropy.
    pub fn fork(&self) -> Self {
        let mut forked = self.clone().with_seed(self.seed);
        forked.usage = UsageSummary::new();
        forked
    }

    pub fn strategy(&self) -> &SelectionStrategy {
        &self.strategy
    }

    /// Every built-in method this selector may run
    pub fn methods(&self) -> Vec<SpeakerSelectionMethod> {
        self.strategy
            .method()
            .into_iter()
            .chain(self.fallbacks.iter().copied())
            .collect()
    }

    pub fn needs_completion_client(&self) -> bool {
        self.methods().contains(&SpeakerSelectionMethod::Auto)
    }

    pub fn needs_human_input(&self) -> bool {
        self.methods().contains(&SpeakerSelectionMethod::Manual)
    }

    pub fn has_completion_client(&self) -> bool {
        self.completion.is_some()
    }

    pub fn has_human_input(&self) -> bool {
        self.human.is_some()
    }

    /// Token usage of automatic selection so far
    pub fn usage(&self) -> &UsageSummary {
        &self.usage
    }

    /// Select the next speaker from `candidates`
    ///
    /// The result is always one of `candidates`. A single candidate is
    /// returned without consulting any strategy.
    #[instrument(skip_all, fields(last_speaker = %last_speaker))]
    pub async fn select_next(
        &mut self,
        last_speaker: &ParticipantName,
        history: &mut History,
        candidates: &[ParticipantName],
        roster: &Roster,
    ) -> Result<ParticipantName> {
        match candidates {
            [] => {
                return Err(HuddleError::NoEligibleSpeaker(last_speaker.to_string()));
            }
            [only] => {
                debug!("Single candidate {}, skipping strategy", only);
                return Ok(only.clone());
            }
            _ => {}
        }

        let selection = match self.strategy.clone() {
            SelectionStrategy::Custom(f) => {
                self.run_custom(f.as_ref(), last_speaker, history, candidates, roster)
                    .await
            }
            strategy => {
                let method = strategy.method().unwrap_or_default();
                match self
                    .run_method(method, last_speaker, history, candidates, roster)
                    .await
                {
                    Err(e) if e.is_recoverable_selection() => {
                        warn!("{} selection failed: {}", method, e);
                        self.run_fallbacks(last_speaker, history, candidates, roster)
                            .await
                    }
                    other => other,
                }
            }
        }?;

        info!("Selected {} to speak after {}", selection, last_speaker);
        Ok(selection)
    }

    async fn run_custom(
        &mut self,
        f: &dyn SpeakerSelectFn,
        last_speaker: &ParticipantName,
        history: &mut History,
        candidates: &[ParticipantName],
        roster: &Roster,
    ) -> Result<ParticipantName> {
        let choice = f.select(last_speaker, history).map_err(|e| {
            HuddleError::InvalidSelection(format!("custom selection function failed: {}", e))
        })?;

        match choice {
            CustomSelection::Speaker(name) => {
                if candidates.contains(&name) {
                    Ok(name)
                } else if roster.contains(&name) {
                    warn!(
                        "Custom selection chose {}, which may not follow {}",
                        name, last_speaker
                    );
                    self.run_fallbacks(last_speaker, history, candidates, roster)
                        .await
                } else {
                    Err(HuddleError::InvalidSelection(format!(
                        "custom selection returned unknown participant {}",
                        name
                    )))
                }
            }
            CustomSelection::Method(method) => match self
                .run_method(method, last_speaker, history, candidates, roster)
                .await
            {
                Err(HuddleError::SelectionDeferred) => {
                    debug!("Human deferred {} selection, using fallbacks", method);
                    self.run_fallbacks(last_speaker, history, candidates, roster)
                        .await
                }
                Err(e) if e.is_recoverable_selection() => {
                    Err(HuddleError::InvalidSelection(format!(
                        "custom selection delegated to {}, which failed: {}",
                        method, e
                    )))
                }
                other => other,
            },
        }
    }

    async fn run_fallbacks(
        &mut self,
        last_speaker: &ParticipantName,
        history: &mut History,
        candidates: &[ParticipantName],
        roster: &Roster,
    ) -> Result<ParticipantName> {
        for method in self.fallbacks.clone() {
            match self
                .run_method(method, last_speaker, history, candidates, roster)
                .await
            {
                Ok(name) => {
                    info!("Fallback {} selected {}", method, name);
                    return Ok(name);
                }
                Err(e) if e.is_recoverable_selection() => {
                    warn!("Fallback {} failed: {}", method, e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(HuddleError::InvalidSelection(format!(
            "every selection method failed to choose a speaker after {}",
            last_speaker
        )))
    }

    async fn run_method(
        &mut self,
        method: SpeakerSelectionMethod,
        last_speaker: &ParticipantName,
        history: &History,
        candidates: &[ParticipantName],
        roster: &Roster,
    ) -> Result<ParticipantName> {
        match method {
            SpeakerSelectionMethod::RoundRobin => round_robin(last_speaker, candidates, roster)
                .ok_or_else(|| HuddleError::NoEligibleSpeaker(last_speaker.to_string())),
            SpeakerSelectionMethod::Random => candidates
                .choose(&mut self.rng)
                .cloned()
                .ok_or_else(|| HuddleError::NoEligibleSpeaker(last_speaker.to_string())),
            SpeakerSelectionMethod::Auto => {
                self.select_auto(last_speaker, history, candidates, roster)
                    .await
            }
            SpeakerSelectionMethod::Manual => {
                self.select_manual(last_speaker, candidates, roster).await
            }
        }
    }

    async fn select_auto(
        &mut self,
        last_speaker: &ParticipantName,
        history: &History,
        candidates: &[ParticipantName],
        roster: &Roster,
    ) -> Result<ParticipantName> {
        let client = self.completion.clone().ok_or_else(|| {
            HuddleError::Config("auto speaker selection needs a completion client".to_string())
        })?;

        let mut request = auto_request(history, candidates, roster);
        let roster_names = roster.names();
        let mut last_rejection = HuddleError::SelectionFailed(
            "automatic selection produced no answer".to_string(),
        );

        for attempt in 0..=self.max_retries {
            let completion = match client.complete(&request).await {
                Ok(completion) => completion,
                Err(e) if e.is_transient() => {
                    warn!("Automatic selection attempt {} failed: {}", attempt + 1, e);
                    last_rejection = HuddleError::SelectionFailed(e.to_string());
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_backoff * (attempt as u32 + 1)).await;
                    }
                    continue;
                }
                Err(e) => {
                    error!("Automatic selection failed: {}", e);
                    return Err(e);
                }
            };
            if let Some(usage) = &completion.usage {
                self.usage.record(usage);
            }

            let mentioned = mentioned_names(&completion.text, &roster_names);
            let eligible: Vec<&ParticipantName> =
                mentioned.iter().filter(|n| candidates.contains(n)).collect();

            let correction = match (mentioned.len(), eligible.as_slice()) {
                (1, [chosen]) => return Ok((*chosen).clone()),
                (1, []) => {
                    last_rejection = HuddleError::OutOfGraphSelection {
                        speaker: mentioned[0].to_string(),
                    };
                    format!(
                        "{} may not speak after {}. Choose exactly one of: {}. Only return the name.",
                        mentioned[0],
                        last_speaker,
                        join_names(candidates)
                    )
                }
                (0, _) => {
                    last_rejection = HuddleError::SelectionFailed(format!(
                        "no participant named in {:?}",
                        completion.text
                    ));
                    format!(
                        "You did not name a participant. Choose exactly one of: {}. Only return the name.",
                        join_names(candidates)
                    )
                }
                _ => {
                    last_rejection = HuddleError::SelectionFailed(format!(
                        "several participants named: {}",
                        join_names(&mentioned)
                    ));
                    format!(
                        "You named several participants ({}). Choose exactly one of: {}. Only return the name.",
                        join_names(&mentioned),
                        join_names(candidates)
                    )
                }
            };

            debug!("Automatic selection attempt {} rejected: {}", attempt + 1, last_rejection);
            request.turns.push(ChatTurn::assistant(completion.text));
            request.turns.push(ChatTurn::user(correction));
        }

        Err(last_rejection)
    }

    async fn select_manual(
        &self,
        last_speaker: &ParticipantName,
        candidates: &[ParticipantName],
        roster: &Roster,
    ) -> Result<ParticipantName> {
        let human = self.human.clone().ok_or_else(|| {
            HuddleError::Config("manual speaker selection needs a human input channel".to_string())
        })?;

        let prompt = HumanPrompt::choice(
            format!(
                "Choose the next speaker after {} (number or name, empty for automatic):",
                last_speaker
            ),
            candidates.iter().map(ToString::to_string).collect(),
        );

        let mut last_rejection =
            HuddleError::SelectionFailed("no valid manual selection".to_string());

        for _ in 0..=self.max_retries {
            let response = human.prompt(&prompt).await.map_err(|e| match e {
                HuddleError::HumanInputUnavailable(_) => e,
                other => HuddleError::HumanInputUnavailable(other.to_string()),
            })?;

            match response {
                HumanResponse::Text(answer) => {
                    if let Some(chosen) = resolve_manual(&answer, candidates) {
                        return Ok(chosen);
                    }
                    let name = ParticipantName::new(answer.as_str());
                    last_rejection = if roster.contains(&name) {
                        HuddleError::OutOfGraphSelection {
                            speaker: answer.clone(),
                        }
                    } else {
                        HuddleError::SelectionFailed(format!("{:?} is not a candidate", answer))
                    };
                    warn!("Manual selection rejected: {}", last_rejection);
                }
                HumanResponse::Skip => return Err(HuddleError::SelectionDeferred),
                HumanResponse::Exit => return Err(HuddleError::HumanExit),
            }
        }

        Err(last_rejection)
    }
}

/// Candidate by 1-based index or exact name
fn resolve_manual(answer: &str, candidates: &[ParticipantName]) -> Option<ParticipantName> {
    if let Ok(index) = answer.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| candidates.get(i))
            .cloned();
    }
    candidates.iter().find(|c| c.as_str() == answer).cloned()
}

fn join_names(names: &[ParticipantName]) -> String {
    names
        .iter()
        .map(ParticipantName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn auto_request(
    history: &History,
    candidates: &[ParticipantName],
    roster: &Roster,
) -> CompletionRequest {
    let mut system = String::from(
        "You are coordinating a group conversation. Pick who speaks next.\n\nParticipants:\n",
    );
    for participant in roster.iter() {
        system.push_str(&format!(
            "- {}: {}\n",
            participant.name(),
            participant.description().unwrap_or("(no description)")
        ));
    }

    let mut transcript = String::from("Conversation so far:\n");
    for message in history.tail(AUTO_SELECTION_WINDOW) {
        transcript.push_str(&format!("[{}] {}\n", message.sender, message.text()));
    }
    transcript.push_str(&format!(
        "\nRead the conversation above. Then select the next speaker from: {}. Only return the name.",
        join_names(candidates)
    ));

    CompletionRequest::prompt(transcript).with_system(system)
}
