//! Markdown transcript of a conversation
//!
//! Every write is fail-open: a transcript that cannot be written never
//! stops the conversation.

use chrono::Utc;
use huddle_core::fail_open::fail_open;
use huddle_core::{Message, ParticipantName, Result, TerminationReason, UsageSummary};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Longest message body written verbatim
const TRANSCRIPT_PREVIEW_CHARS: usize = 2000;

/// Appends conversation events to a markdown file
#[derive(Debug, Clone)]
pub struct TranscriptLogger {
    output_path: PathBuf,
}

impl TranscriptLogger {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// Start a transcript, replacing any previous file
    pub async fn log_start(
        &self,
        conversation_id: Uuid,
        participants: &[ParticipantName],
        max_rounds: usize,
    ) {
        fail_open("transcript::log_start", || async {
            let content = format!(
                "# Huddle Transcript\n\n**Conversation**: {}\n**Started**: {}\n**Participants**: {}\n**Max Rounds**: {}\n\n---\n\n",
                conversation_id,
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                participants
                    .iter()
                    .map(ParticipantName::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                max_rounds
            );
            self.write(&content, false).await
        })
        .await;
    }

    pub async fn log_message(&self, message: &Message, round: usize) {
        fail_open("transcript::log_message", || async {
            let text = message.text();
            let body = if text.chars().count() > TRANSCRIPT_PREVIEW_CHARS {
                let truncated: String = text.chars().take(TRANSCRIPT_PREVIEW_CHARS).collect();
                format!("{truncated}...")
            } else {
                text
            };

            let origin = if message.is_human() { " (human)" } else { "" };
            let content = format!(
                "### {}{} (round {})\n\n> {}\n\n",
                message.sender,
                origin,
                round,
                body.replace('\n', "\n> ")
            );
            self.write(&content, true).await
        })
        .await;
    }

    pub async fn log_termination(
        &self,
        reason: &TerminationReason,
        rounds: usize,
        usage: &UsageSummary,
    ) {
        fail_open("transcript::log_termination", || async {
            let mut content = format!(
                "---\n\n## Summary\n\n**Finished**: {}\n**Rounds**: {}\n**Reason**: {}\n**Cost**: ${:.4}\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                rounds,
                reason,
                usage.total_cost
            );
            for (model, model_usage) in &usage.models {
                content.push_str(&format!(
                    "- {}: {} prompt, {} completion tokens\n",
                    model, model_usage.prompt_tokens, model_usage.completion_tokens
                ));
            }
            content.push('\n');
            self.write(&content, true).await
        })
        .await;
    }

    async fn write(&self, content: &str, append: bool) -> Result<()> {
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        let mut file = options.open(&self.output_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::{History, MessageOrigin, Usage};
    use tempfile::TempDir;
    use tokio::fs;

    #[tokio::test]
    async fn test_transcript_sections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chat.md");
        let logger = TranscriptLogger::new(&path);

        let mut history = History::new();
        let seed = history.push("user", "plan a trip", MessageOrigin::Agent).clone();
        let typed = history.push("human", "line one\nline two", MessageOrigin::Human).clone();

        let mut usage = UsageSummary::new();
        usage.record(&Usage {
            model: "claude-sonnet".into(),
            prompt_tokens: 120,
            completion_tokens: 40,
            cost: 0.25,
        });

        logger
            .log_start(Uuid::new_v4(), &["planner".into(), "critic".into()], 5)
            .await;
        logger.log_message(&seed, 0).await;
        logger.log_message(&typed, 1).await;
        logger
            .log_termination(&TerminationReason::RoundLimit, 1, &usage)
            .await;

        let content = fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("# Huddle Transcript"));
        assert!(content.contains("**Participants**: planner, critic"));
        assert!(content.contains("### user (round 0)"));
        assert!(content.contains("### human (human) (round 1)"));
        assert!(content.contains("> line one\n> line two"));
        assert!(content.contains("**Reason**: round limit reached"));
        assert!(content.contains("claude-sonnet: 120 prompt, 40 completion tokens"));
    }

    #[tokio::test]
    async fn test_start_truncates_previous_run() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chat.md");
        fs::write(&path, "stale contents").await.unwrap();

        let logger = TranscriptLogger::new(&path);
        logger.log_start(Uuid::new_v4(), &[], 1).await;

        let content = fs::read_to_string(&path).await.unwrap();
        assert!(!content.contains("stale contents"));
    }

    #[tokio::test]
    async fn test_unwritable_path_fails_open() {
        let temp_dir = TempDir::new().unwrap();
        let logger = TranscriptLogger::new(temp_dir.path().join("missing").join("chat.md"));

        let mut history = History::new();
        let message = history.push("a", "hello", MessageOrigin::Agent).clone();
        logger.log_message(&message, 1).await;

        assert!(!logger.path().exists());
    }
}
