//! Transition graph and candidate computation
//!
//! The graph maps a speaker to a list of neighbours. In `Allowed` mode the
//! neighbours are the only participants that may follow; in `Disallowed`
//! mode they are the ones that may not. A speaker with no entry is
//! unconstrained in either mode.

use crate::participant::Roster;
use huddle_core::{
    HuddleError, Message, ParticipantName, Result, TransitionMode, TransitionsConfig,
};
use std::collections::HashMap;
use tracing::debug;

/// Who may follow whom
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionGraph {
    mode: TransitionMode,
    edges: HashMap<ParticipantName, Vec<ParticipantName>>,
}

impl TransitionGraph {
    pub fn new(mode: TransitionMode) -> Self {
        Self {
            mode,
            edges: HashMap::new(),
        }
    }

    pub fn allowed() -> Self {
        Self::new(TransitionMode::Allowed)
    }

    pub fn disallowed() -> Self {
        Self::new(TransitionMode::Disallowed)
    }

    /// Add neighbours for `from`, creating the entry even when `to` is empty
    pub fn with_edges<I, S>(mut self, from: impl Into<ParticipantName>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ParticipantName>,
    {
        let entry = self.edges.entry(from.into()).or_default();
        for name in to {
            let name = name.into();
            if !entry.contains(&name) {
                entry.push(name);
            }
        }
        self
    }

    pub fn from_config(config: &TransitionsConfig) -> Self {
        config
            .graph
            .iter()
            .fold(Self::new(config.mode), |graph, (from, to)| {
                graph.with_edges(from.as_str(), to.iter().map(String::as_str))
            })
    }

    pub fn mode(&self) -> TransitionMode {
        self.mode
    }

    /// Neighbours declared for `from`, if it has an entry
    pub fn entry(&self, from: &ParticipantName) -> Option<&[ParticipantName]> {
        self.edges.get(from).map(Vec::as_slice)
    }

    /// Every name referenced by the graph must be a declared participant
    pub fn validate(&self, roster: &Roster) -> Result<()> {
        for (from, to) in &self.edges {
            for name in std::iter::once(from).chain(to.iter()) {
                if !roster.contains(name) {
                    return Err(HuddleError::UnknownParticipant(format!(
                        "Transition graph references unknown participant: {}",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Computes eligible next speakers
#[derive(Debug, Clone)]
pub struct TransitionPolicy {
    graph: Option<TransitionGraph>,
    allow_repeat_speaker: bool,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self::new(None, true)
    }
}

impl TransitionPolicy {
    pub fn new(graph: Option<TransitionGraph>, allow_repeat_speaker: bool) -> Self {
        Self {
            graph,
            allow_repeat_speaker,
        }
    }

    pub fn graph(&self) -> Option<&TransitionGraph> {
        self.graph.as_ref()
    }

    pub fn allow_repeat_speaker(&self) -> bool {
        self.allow_repeat_speaker
    }

    pub fn validate(&self, roster: &Roster) -> Result<()> {
        match &self.graph {
            Some(graph) => graph.validate(roster),
            None => Ok(()),
        }
    }

    /// Eligible speakers after `last_speaker`, in declaration order
    ///
    /// An empty result is a configuration error: the conversation cannot
    /// continue from `last_speaker`.
    pub fn candidates(
        &self,
        last_speaker: &ParticipantName,
        _history: &[Message],
        roster: &Roster,
    ) -> Result<Vec<ParticipantName>> {
        let entry = self.graph.as_ref().and_then(|g| {
            g.entry(last_speaker).map(|neighbours| (g.mode(), neighbours))
        });

        let candidates: Vec<ParticipantName> = roster
            .names()
            .into_iter()
            .filter(|name| match entry {
                Some((TransitionMode::Allowed, neighbours)) => neighbours.contains(name),
                Some((TransitionMode::Disallowed, neighbours)) => !neighbours.contains(name),
                None => true,
            })
            .filter(|name| self.allow_repeat_speaker || name != last_speaker)
            .collect();

        debug!(
            "Candidates after {}: [{}]",
            last_speaker,
            candidates
                .iter()
                .map(ParticipantName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        if candidates.is_empty() {
            return Err(HuddleError::NoEligibleSpeaker(format!(
                "No participant may speak after {}",
                last_speaker
            )));
        }
        Ok(candidates)
    }
}
