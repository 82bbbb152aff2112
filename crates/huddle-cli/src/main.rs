//! Huddle CLI - multi-agent group chats
//!
//! Usage:
//!   huddle init [path]                      Write an example huddle.toml
//!   huddle validate <config>                Check participants and graph
//!   huddle run <config> --message <text>    Run a conversation

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use huddle_agent::{
    AnthropicClient, CompletionClient, HumanAgent, HumanInput, LlmAgent, Model, ReplyGenerator,
    ScriptedAgent, StdinHuman,
};
use huddle_core::{
    GroupChatConfig, ParticipantConfig, ParticipantKind, SpeakerSelectionMethod,
    DEFAULT_CONFIG_FILE,
};
use huddle_orchestrator::{Conversation, ConversationResult, GroupChatBuilder, Participant};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "huddle")]
#[command(author, version, about = "Multi-agent group chats with speaker selection")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example huddle.toml
    Init {
        /// Directory to write into (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Run a conversation
    Run {
        /// Path to the configuration file
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Seed message
        #[arg(short, long)]
        message: String,

        /// Sender of the seed message
        #[arg(long, default_value = "user")]
        initiator: String,

        /// Participant that replies first (otherwise selected)
        #[arg(long)]
        first_speaker: Option<String>,

        /// Override max_rounds from the configuration
        #[arg(long)]
        max_rounds: Option<usize>,

        /// Write a markdown transcript to this file
        #[arg(long, value_name = "FILE")]
        transcript: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Validate { config } => cmd_validate(config),
        Commands::Run {
            config,
            message,
            initiator,
            first_speaker,
            max_rounds,
            transcript,
            json,
        } => {
            cmd_run(
                config,
                message,
                initiator,
                first_speaker,
                max_rounds,
                transcript,
                json,
            )
            .await
        }
    }
}

fn cmd_init(path: PathBuf) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }

    GroupChatConfig::write_default(&path).context("Failed to write example configuration")?;

    println!("Created {}", config_path.display());
    println!("Try: huddle run {} --message \"Write an add function\"", config_path.display());
    Ok(())
}

fn load_config(path: &Path) -> Result<GroupChatConfig> {
    let config = GroupChatConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn cmd_validate(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;

    println!("{} is valid", path.display());
    println!("  Participants: {}", config.participants.len());
    for participant in &config.participants {
        let kind = match participant.kind {
            ParticipantKind::Llm => "llm",
            ParticipantKind::Scripted => "scripted",
            ParticipantKind::Human => "human",
        };
        println!("    {} ({})", participant.name, kind);
    }
    println!("  Selection: {}", config.speaker_selection_method);
    println!("  Max rounds: {}", config.max_rounds);
    println!("  Human input: {}", config.human_input_mode);
    if let Some(transitions) = &config.transitions {
        println!(
            "  Transition graph: {} entries ({})",
            transitions.graph.len(),
            transitions.mode
        );
    }
    Ok(())
}

/// Collaborators shared by every participant of one run
struct Collaborators {
    completion: Option<Arc<dyn CompletionClient>>,
    human: Option<Arc<dyn HumanInput>>,
}

impl Collaborators {
    fn for_config(config: &GroupChatConfig) -> Result<Self> {
        let uses_model = config
            .participants
            .iter()
            .any(|p| p.kind == ParticipantKind::Llm)
            || config.speaker_selection_method == SpeakerSelectionMethod::Auto
            || config
                .selection_fallbacks
                .contains(&SpeakerSelectionMethod::Auto);

        let completion: Option<Arc<dyn CompletionClient>> = if uses_model {
            let model: Model = config
                .model
                .default
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let client = AnthropicClient::from_env(model, &config.model.api_key_env)
                .context("A model is required by this configuration")?
                .with_max_tokens(config.model.max_tokens);
            Some(Arc::new(client))
        } else {
            None
        };

        let human: Option<Arc<dyn HumanInput>> = if config.needs_human_input() {
            Some(Arc::new(StdinHuman::new()))
        } else {
            None
        };

        Ok(Self { completion, human })
    }

    fn participant(&self, config: &ParticipantConfig) -> Result<Participant> {
        let reply: Arc<dyn ReplyGenerator> = match config.kind {
            ParticipantKind::Llm => {
                let client = self
                    .completion
                    .clone()
                    .context("LLM participant without a completion client")?;
                let mut agent = LlmAgent::new(client);
                if let Some(system) = &config.system_message {
                    agent = agent.with_system_message(system.as_str());
                }
                Arc::new(agent)
            }
            ParticipantKind::Scripted => Arc::new(ScriptedAgent::new(config.replies.clone())),
            ParticipantKind::Human => {
                let human = self
                    .human
                    .clone()
                    .context("Human participant without an input channel")?;
                Arc::new(HumanAgent::new(human))
            }
        };

        Participant::from_config(config, reply)
            .with_context(|| format!("Invalid participant {}", config.name))
    }
}

async fn cmd_run(
    path: PathBuf,
    message: String,
    initiator: String,
    first_speaker: Option<String>,
    max_rounds: Option<usize>,
    transcript: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let mut config = load_config(&path)?;
    if let Some(max_rounds) = max_rounds {
        config.max_rounds = max_rounds;
    }

    let collaborators = Collaborators::for_config(&config)?;
    let participants = config
        .participants
        .iter()
        .map(|p| collaborators.participant(p))
        .collect::<Result<Vec<_>>>()?;

    let mut builder = GroupChatBuilder::from_config(&config).participants(participants);
    if let Some(client) = &collaborators.completion {
        builder = builder.completion_client(client.clone());
    }
    if let Some(human) = &collaborators.human {
        builder = builder.human_input(human.clone());
    }
    if let Some(transcript) = transcript {
        builder = builder.transcript(transcript);
    }
    let chat = builder.build().context("Failed to set up group chat")?;

    let token = CancellationToken::new();
    let mut conversation = Conversation::new(Arc::new(chat)).with_cancellation(token.clone());
    if let Some(first) = first_speaker {
        conversation = conversation.with_first_speaker(first);
    }

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling conversation");
            token.cancel();
        }
    });

    info!("Starting conversation {}", conversation.id());
    let result = conversation
        .run(initiator, message)
        .await
        .context("Conversation could not start")?;
    ctrl_c.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if result.reason.is_failure() {
        anyhow::bail!("Conversation failed: {}", result.reason);
    }
    Ok(())
}

fn print_result(result: &ConversationResult) {
    for message in &result.messages {
        let marker = if message.is_human() { " (human)" } else { "" };
        println!("[{}{}] {}", message.sender, marker, message.text());
        println!();
    }

    println!("Conversation {}", result.conversation_id);
    println!("  Rounds: {}", result.rounds);
    println!("  Stopped: {} ({})", result.reason, result.reason.code());

    let usage = result.total_usage();
    if !usage.is_empty() {
        println!("  Cost: ${:.4}", usage.total_cost);
        for (model, model_usage) in &usage.models {
            println!(
                "    {}: {} prompt + {} completion tokens",
                model, model_usage.prompt_tokens, model_usage.completion_tokens
            );
        }
    }
}
