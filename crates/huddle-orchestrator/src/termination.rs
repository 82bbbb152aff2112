//! Termination evaluation
//!
//! Runs once after every appended reply. Checks, in order: the round
//! ceiling, the sender's consecutive auto-reply ceiling, then the
//! termination predicates of every receiver.

use crate::participant::Roster;
use huddle_core::{Message, ParticipantName, TerminationReason};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationDecision {
    Continue,
    Terminate(TerminationReason),
}

impl TerminationDecision {
    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate(_))
    }
}

/// Consecutive automatic replies, per conversation
///
/// Keyed by (speaker, sender it replied to). Any human message resets all
/// counters.
#[derive(Debug, Clone, Default)]
pub struct AutoReplyCounters {
    conversation_id: Uuid,
    counts: HashMap<(ParticipantName, ParticipantName), usize>,
}

impl AutoReplyCounters {
    pub fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            counts: HashMap::new(),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Count one automatic reply from `speaker` to `sender`, returning the new total
    pub fn record(&mut self, speaker: &ParticipantName, sender: &ParticipantName) -> usize {
        let count = self
            .counts
            .entry((speaker.clone(), sender.clone()))
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn get(&self, speaker: &ParticipantName, sender: &ParticipantName) -> usize {
        self.counts
            .get(&(speaker.clone(), sender.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn reset_all(&mut self) {
        debug!("Resetting auto-reply counters for {}", self.conversation_id);
        self.counts.clear();
    }
}

/// Decides whether a conversation stops after the latest reply
#[derive(Debug, Clone, Copy)]
pub struct TerminationEvaluator {
    max_rounds: usize,
}

impl TerminationEvaluator {
    pub fn new(max_rounds: usize) -> Self {
        Self { max_rounds }
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Evaluate the most recently appended message
    ///
    /// `round` counts replies so far, including `latest`. `previous_sender`
    /// is the sender of the message `latest` answered.
    pub fn evaluate(
        &self,
        round: usize,
        latest: &Message,
        previous_sender: Option<&ParticipantName>,
        counters: &AutoReplyCounters,
        roster: &Roster,
    ) -> TerminationDecision {
        if round >= self.max_rounds {
            return TerminationDecision::Terminate(TerminationReason::RoundLimit);
        }

        if !latest.is_human() {
            let ceiling = roster
                .get(&latest.sender)
                .and_then(|p| p.max_consecutive_auto_reply());
            if let (Some(ceiling), Some(previous)) = (ceiling, previous_sender) {
                let count = counters.get(&latest.sender, previous);
                if count > ceiling {
                    return TerminationDecision::Terminate(TerminationReason::AutoReplyLimit {
                        participant: latest.sender.to_string(),
                    });
                }
            }
        }

        roster
            .iter()
            .filter(|p| p.name() != &latest.sender)
            .find(|p| p.is_termination_msg(latest))
            .map(|p| {
                TerminationDecision::Terminate(TerminationReason::PredicateMatch {
                    participant: p.name().to_string(),
                })
            })
            .unwrap_or(TerminationDecision::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::Participant;
    use huddle_agent::ScriptedAgent;
    use huddle_core::{History, MessageOrigin};
    use std::sync::Arc;

    fn agent(name: &str) -> Participant {
        Participant::new(name, Arc::new(ScriptedAgent::new(["ok"])))
    }

    fn roster() -> Roster {
        Roster::new(vec![
            agent("user").with_termination(|m| m.text().contains("TERMINATE")),
            agent("assistant").with_max_consecutive_auto_reply(1),
            agent("critic").with_termination(|m| m.text().contains("TERMINATE")),
        ])
        .unwrap()
    }

    fn message(sender: &str, text: &str, origin: MessageOrigin) -> Message {
        let mut history = History::new();
        history.push(sender, text, origin).clone()
    }

    #[test]
    fn test_round_limit_first() {
        let evaluator = TerminationEvaluator::new(3);
        let counters = AutoReplyCounters::default();
        let msg = message("assistant", "TERMINATE", MessageOrigin::Agent);

        let decision = evaluator.evaluate(3, &msg, None, &counters, &roster());
        assert_eq!(
            decision,
            TerminationDecision::Terminate(TerminationReason::RoundLimit)
        );
    }

    #[test]
    fn test_auto_reply_ceiling() {
        let evaluator = TerminationEvaluator::new(10);
        let roster = roster();
        let mut counters = AutoReplyCounters::new(Uuid::new_v4());
        let msg = message("assistant", "working", MessageOrigin::Agent);
        let user = ParticipantName::from("user");

        counters.record(&"assistant".into(), &user);
        assert_eq!(
            evaluator.evaluate(1, &msg, Some(&user), &counters, &roster),
            TerminationDecision::Continue
        );

        counters.record(&"assistant".into(), &user);
        assert_eq!(
            evaluator.evaluate(2, &msg, Some(&user), &counters, &roster),
            TerminationDecision::Terminate(TerminationReason::AutoReplyLimit {
                participant: "assistant".into()
            })
        );

        // counts to a different sender are separate
        let critic = ParticipantName::from("critic");
        assert_eq!(
            evaluator.evaluate(2, &msg, Some(&critic), &counters, &roster),
            TerminationDecision::Continue
        );
    }

    #[test]
    fn test_predicates_in_declaration_order_excluding_sender() {
        let evaluator = TerminationEvaluator::new(10);
        let roster = roster();
        let counters = AutoReplyCounters::default();

        let from_assistant = message("assistant", "done. TERMINATE", MessageOrigin::Agent);
        assert_eq!(
            evaluator.evaluate(1, &from_assistant, None, &counters, &roster),
            TerminationDecision::Terminate(TerminationReason::PredicateMatch {
                participant: "user".into()
            })
        );

        // user's own predicate is not applied to its own message
        let from_user = message("user", "TERMINATE", MessageOrigin::Agent);
        assert_eq!(
            evaluator.evaluate(1, &from_user, None, &counters, &roster),
            TerminationDecision::Terminate(TerminationReason::PredicateMatch {
                participant: "critic".into()
            })
        );
    }

    #[test]
    fn test_human_messages_skip_auto_reply_check() {
        let evaluator = TerminationEvaluator::new(10);
        let roster = roster();
        let mut counters = AutoReplyCounters::default();
        let user = ParticipantName::from("user");
        counters.record(&"assistant".into(), &user);
        counters.record(&"assistant".into(), &user);

        let typed = message("assistant", "I'll take it from here", MessageOrigin::Human);
        assert!(!evaluator
            .evaluate(1, &typed, Some(&user), &counters, &roster)
            .is_terminate());
    }

    #[test]
    fn test_counter_resets() {
        let mut counters = AutoReplyCounters::new(Uuid::new_v4());
        let a = ParticipantName::from("a");
        let b = ParticipantName::from("b");
        let c = ParticipantName::from("c");

        assert_eq!(counters.record(&a, &b), 1);
        assert_eq!(counters.record(&a, &b), 2);
        counters.record(&c, &b);

        assert_eq!(counters.get(&c, &b), 1);

        counters.reset_all();
        assert_eq!(counters.get(&a, &b), 0);
        assert_eq!(counters.get(&c, &b), 0);
    }
}
