//! # huddle-agent
//!
//! External collaborators for Huddle group chats.
//!
//! The orchestrator never generates text itself. It calls into:
//! - a reply capability per participant (`ReplyGenerator`)
//! - a completion capability for automatic speaker selection (`CompletionClient`)
//! - a human-input channel (`HumanInput`)
//!
//! This crate defines those seams and ships the implementations the CLI
//! uses: an Anthropic client with an instance-scoped circuit breaker,
//! model-backed, scripted and human participants, and stdin/scripted human
//! channels.

mod auth;
mod circuit_breaker;
mod client;
mod human;
mod reply;
mod types;

pub use auth::api_key_from_env;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{AnthropicClient, CompletionClient};
pub use human::{HumanInput, HumanPrompt, HumanResponse, ScriptedHuman, StdinHuman};
pub use reply::{build_turns, HumanAgent, LlmAgent, ReplyGenerator, ScriptedAgent};
pub use types::*;
