//! Pure state machine for conversation control flow
//!
//! No I/O and no async: `transition(state, event) -> (state, actions)`.
//! The conversation driver executes the actions and feeds the resulting
//! events back in. Invalid transitions end in `Terminated` with an
//! `InvalidTransition` reason; this function never panics.

use huddle_core::{ParticipantName, TerminationReason};

/// Conversation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Seed message not yet processed
    Idle,
    /// Waiting for `speaker` to reply
    AwaitingReply { speaker: ParticipantName },
    /// Reply from `speaker` appended, termination pending
    Evaluating { speaker: ParticipantName },
    /// Choosing who follows `last_speaker`
    Selecting { last_speaker: ParticipantName },
    /// Stopped
    Terminated { reason: TerminationReason },
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

/// Events that trigger transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Seed appended; start with `first_speaker` or select after `initiator`
    Start {
        initiator: ParticipantName,
        first_speaker: Option<ParticipantName>,
    },
    /// Reply from `speaker` was appended
    ReplyReceived { speaker: ParticipantName },
    /// Termination check passed
    Continue,
    /// Stop for `reason`
    Terminate { reason: TerminationReason },
    /// Next speaker chosen
    SpeakerSelected { speaker: ParticipantName },
    /// Selection failed with a configuration problem
    SelectionFailed { error: String },
    /// External cancellation
    Cancel,
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    LogActivity { message: String },
    InvokeSpeaker { speaker: ParticipantName },
    EvaluateTermination { speaker: ParticipantName },
    SelectSpeaker { last_speaker: ParticipantName },
    Finish { reason: TerminationReason },
}

fn terminate(reason: TerminationReason) -> (State, Vec<Action>) {
    let actions = vec![
        Action::LogActivity {
            message: format!("Conversation terminated: {}", reason),
        },
        Action::Finish {
            reason: reason.clone(),
        },
    ];
    (State::Terminated { reason }, actions)
}

/// Pure state transition function
///
/// Deterministic and free of side effects. Any event a state cannot handle
/// terminates the conversation with a descriptive `InvalidTransition`.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        (
            State::Idle,
            Event::Start {
                initiator,
                first_speaker,
            },
        ) => match first_speaker {
            Some(speaker) => {
                let actions = vec![
                    Action::LogActivity {
                        message: format!("{} opened the conversation; {} speaks first", initiator, speaker),
                    },
                    Action::InvokeSpeaker {
                        speaker: speaker.clone(),
                    },
                ];
                (State::AwaitingReply { speaker }, actions)
            }
            None => {
                let actions = vec![
                    Action::LogActivity {
                        message: format!("{} opened the conversation", initiator),
                    },
                    Action::SelectSpeaker {
                        last_speaker: initiator.clone(),
                    },
                ];
                (
                    State::Selecting {
                        last_speaker: initiator,
                    },
                    actions,
                )
            }
        },

        (State::AwaitingReply { speaker }, Event::ReplyReceived { speaker: replied })
            if speaker == replied =>
        {
            let actions = vec![Action::EvaluateTermination {
                speaker: speaker.clone(),
            }];
            (State::Evaluating { speaker }, actions)
        }

        (State::Evaluating { speaker }, Event::Continue) => {
            let actions = vec![Action::SelectSpeaker {
                last_speaker: speaker.clone(),
            }];
            (
                State::Selecting {
                    last_speaker: speaker,
                },
                actions,
            )
        }

        (State::Selecting { last_speaker }, Event::SpeakerSelected { speaker }) => {
            let actions = vec![
                Action::LogActivity {
                    message: format!("{} speaks after {}", speaker, last_speaker),
                },
                Action::InvokeSpeaker {
                    speaker: speaker.clone(),
                },
            ];
            (State::AwaitingReply { speaker }, actions)
        }

        (State::Selecting { .. }, Event::SelectionFailed { error }) => {
            terminate(TerminationReason::ConfigurationError { error })
        }

        // Stops from any live state
        (State::AwaitingReply { .. }, Event::Terminate { reason })
        | (State::Evaluating { .. }, Event::Terminate { reason })
        | (State::Selecting { .. }, Event::Terminate { reason }) => terminate(reason),

        (State::Idle, Event::Cancel)
        | (State::AwaitingReply { .. }, Event::Cancel)
        | (State::Evaluating { .. }, Event::Cancel)
        | (State::Selecting { .. }, Event::Cancel) => terminate(TerminationReason::Cancelled),

        // Terminal state rejects everything
        (State::Terminated { reason }, event) => (
            State::Terminated {
                reason: TerminationReason::InvalidTransition {
                    error: format!(
                        "Event {:?} received after termination ({})",
                        event, reason
                    ),
                },
            },
            vec![],
        ),

        (state, event) => terminate(TerminationReason::InvalidTransition {
            error: format!("{:?} cannot handle event {:?}", state, event),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> ParticipantName {
        ParticipantName::from(n)
    }

    #[test]
    fn test_full_turn_cycle() {
        // Idle -> Selecting
        let (state, actions) = transition(
            State::Idle,
            Event::Start {
                initiator: name("user"),
                first_speaker: None,
            },
        );
        assert_eq!(
            state,
            State::Selecting {
                last_speaker: name("user")
            }
        );
        assert!(matches!(actions[1], Action::SelectSpeaker { .. }));

        // Selecting -> AwaitingReply
        let (state, actions) = transition(
            state,
            Event::SpeakerSelected {
                speaker: name("coder"),
            },
        );
        assert_eq!(
            state,
            State::AwaitingReply {
                speaker: name("coder")
            }
        );
        assert_eq!(
            actions.last(),
            Some(&Action::InvokeSpeaker {
                speaker: name("coder")
            })
        );

        // AwaitingReply -> Evaluating
        let (state, actions) = transition(
            state,
            Event::ReplyReceived {
                speaker: name("coder"),
            },
        );
        assert!(matches!(state, State::Evaluating { .. }));
        assert_eq!(actions.len(), 1);

        // Evaluating -> Selecting
        let (state, _) = transition(state, Event::Continue);
        assert_eq!(
            state,
            State::Selecting {
                last_speaker: name("coder")
            }
        );

        // Selecting -> Terminated
        let (state, actions) = transition(
            state,
            Event::Terminate {
                reason: TerminationReason::HumanExit,
            },
        );
        assert!(state.is_terminal());
        assert!(actions.iter().any(|a| matches!(a, Action::Finish { .. })));
    }

    #[test]
    fn test_start_with_first_speaker() {
        let (state, actions) = transition(
            State::Idle,
            Event::Start {
                initiator: name("user"),
                first_speaker: Some(name("planner")),
            },
        );
        assert_eq!(
            state,
            State::AwaitingReply {
                speaker: name("planner")
            }
        );
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::InvokeSpeaker { .. })));
    }

    #[test]
    fn test_evaluation_terminates() {
        let (state, actions) = transition(
            State::Evaluating {
                speaker: name("coder"),
            },
            Event::Terminate {
                reason: TerminationReason::RoundLimit,
            },
        );
        assert_eq!(
            state,
            State::Terminated {
                reason: TerminationReason::RoundLimit
            }
        );
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_selection_failure_is_configuration_error() {
        let (state, _) = transition(
            State::Selecting {
                last_speaker: name("a"),
            },
            Event::SelectionFailed {
                error: "no eligible speaker".into(),
            },
        );
        assert!(matches!(
            state,
            State::Terminated {
                reason: TerminationReason::ConfigurationError { .. }
            }
        ));
    }

    #[test]
    fn test_cancel_from_live_states() {
        for state in [
            State::Idle,
            State::AwaitingReply { speaker: name("a") },
            State::Evaluating { speaker: name("a") },
            State::Selecting {
                last_speaker: name("a"),
            },
        ] {
            let (next, _) = transition(state, Event::Cancel);
            assert_eq!(
                next,
                State::Terminated {
                    reason: TerminationReason::Cancelled
                }
            );
        }
    }

    #[test]
    fn test_invalid_transition_never_panics() {
        // reply from someone who was not asked
        let (state, _) = transition(
            State::AwaitingReply { speaker: name("a") },
            Event::ReplyReceived { speaker: name("b") },
        );
        assert!(matches!(
            state,
            State::Terminated {
                reason: TerminationReason::InvalidTransition { .. }
            }
        ));

        let (state, _) = transition(State::Idle, Event::Continue);
        assert!(matches!(
            state,
            State::Terminated {
                reason: TerminationReason::InvalidTransition { .. }
            }
        ));
    }

    #[test]
    fn test_terminal_state_rejects_all_events() {
        let done = State::Terminated {
            reason: TerminationReason::RoundLimit,
        };
        let (state, actions) = transition(done, Event::Continue);
        assert!(actions.is_empty());
        if let State::Terminated {
            reason: TerminationReason::InvalidTransition { error },
        } = state
        {
            assert!(error.contains("round limit reached"));
        } else {
            panic!("expected invalid transition");
        }
    }
}
