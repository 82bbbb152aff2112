//! # huddle-core
//!
//! Core types for the Huddle group-conversation orchestrator.
//!
//! A group chat is a set of named participants taking turns on one shared,
//! append-only history. Each turn one participant replies; the orchestrator
//! then decides whether the conversation stops and, if not, who speaks next.
//!
//! ## Core Paradigm
//!
//! - Participants are immutable definitions; per-run counters live in the conversation
//! - History is append-only and positions are assigned on push
//! - Transition graphs constrain who may follow whom
//! - Every termination carries an explicit reason

pub mod config;
mod error;
pub mod fail_open;
mod types;
mod usage;

pub use config::{
    GroupChatConfig, ModelConfig, ParticipantConfig, ParticipantKind, TransitionsConfig,
    DEFAULT_CONFIG_FILE,
};
pub use error::{HuddleError, Result};
pub use types::*;
pub use usage::{gather_usage_summary, ModelUsage, Usage, UsageSummary};
