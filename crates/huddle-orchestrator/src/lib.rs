//! # huddle-orchestrator
//!
//! Speaker selection and termination engine for Huddle group chats.
//!
//! This crate provides:
//! - Participants and the declared roster
//! - Transition graphs and eligible-candidate computation
//! - Speaker selection strategies with a fallback chain
//! - Termination evaluation (round ceiling, auto-reply ceiling, predicates)
//! - A pure conversation state machine and the async driver around it
//! - Fail-open markdown transcripts

mod conversation;
mod graph;
mod participant;
mod selector;
mod state_machine;
mod termination;
mod transcript;

pub use conversation::{
    Conversation, ConversationResult, GroupChat, GroupChatBuilder, SELECTION_USAGE_KEY,
};
pub use graph::{TransitionGraph, TransitionPolicy};
pub use participant::{compile_condition, Participant, Predicate, Roster};
pub use selector::{
    mentioned_names, round_robin, CustomSelection, SelectionStrategy, Selector, SpeakerSelectFn,
};
pub use state_machine::{transition, Action, Event, State};
pub use termination::{AutoReplyCounters, TerminationDecision, TerminationEvaluator};
pub use transcript::TranscriptLogger;
