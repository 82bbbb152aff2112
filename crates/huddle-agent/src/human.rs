//! Human-input channel
//!
//! Used for human-input policy checks, manual speaker selection, and human
//! participants. An empty answer or `auto` defers to the automatic policy;
//! `exit` asks to stop.

use async_trait::async_trait;
use huddle_core::{HuddleError, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// A question put to the human
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanPrompt {
    pub message: String,
    /// Valid answers, when the question is a choice
    pub choices: Vec<String>,
}

impl HumanPrompt {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            choices: Vec::new(),
        }
    }

    pub fn choice(message: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            message: message.into(),
            choices,
        }
    }

    /// Prompt text as shown on a terminal
    pub fn render(&self) -> String {
        let mut out = self.message.clone();
        for (i, choice) in self.choices.iter().enumerate() {
            out.push_str(&format!("\n  {}. {}", i + 1, choice));
        }
        out.push_str("\n> ");
        out
    }
}

/// Answer from the human
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanResponse {
    /// Free text (or a choice)
    Text(String),
    /// Defer to the automatic policy
    Skip,
    /// Stop the conversation
    Exit,
}

impl HumanResponse {
    /// Interpret a raw line of input
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "auto" | "skip" => Self::Skip,
            "exit" | "quit" => Self::Exit,
            _ => Self::Text(trimmed.to_string()),
        }
    }
}

/// Trait for soliciting human input (allows scripting in tests)
#[async_trait]
pub trait HumanInput: Send + Sync {
    async fn prompt(&self, prompt: &HumanPrompt) -> Result<HumanResponse>;
}

/// Reads answers from standard input
pub struct StdinHuman {
    reader: Mutex<BufReader<Stdin>>,
}

impl StdinHuman {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl Default for StdinHuman {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HumanInput for StdinHuman {
    async fn prompt(&self, prompt: &HumanPrompt) -> Result<HumanResponse> {
        let mut reader = self.reader.lock().await;

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(prompt.render().as_bytes())
            .await
            .map_err(|e| HuddleError::HumanInputUnavailable(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| HuddleError::HumanInputUnavailable(e.to_string()))?;

        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| HuddleError::HumanInputUnavailable(e.to_string()))?;
        if read == 0 {
            return Err(HuddleError::HumanInputUnavailable(
                "stdin closed".to_string(),
            ));
        }

        Ok(HumanResponse::parse(&line))
    }
}

/// Answers from a fixed queue; records every prompt it receives
#[derive(Default)]
pub struct ScriptedHuman {
    responses: Mutex<VecDeque<HumanResponse>>,
    prompts: Mutex<Vec<HumanPrompt>>,
}

impl ScriptedHuman {
    pub fn new(responses: impl IntoIterator<Item = HumanResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Build from raw input lines, parsed like terminal input
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(lines.into_iter().map(HumanResponse::parse))
    }

    /// Prompts received so far
    pub async fn prompts(&self) -> Vec<HumanPrompt> {
        self.prompts.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

#[async_trait]
impl HumanInput for ScriptedHuman {
    async fn prompt(&self, prompt: &HumanPrompt) -> Result<HumanResponse> {
        self.prompts.lock().await.push(prompt.clone());
        self.responses.lock().await.pop_front().ok_or_else(|| {
            HuddleError::HumanInputUnavailable("scripted responses exhausted".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_responses() {
        assert_eq!(HumanResponse::parse("  \n"), HumanResponse::Skip);
        assert_eq!(HumanResponse::parse("AUTO"), HumanResponse::Skip);
        assert_eq!(HumanResponse::parse("exit\n"), HumanResponse::Exit);
        assert_eq!(
            HumanResponse::parse(" keep going \n"),
            HumanResponse::Text("keep going".to_string())
        );
    }

    #[test]
    fn test_render_choices() {
        let prompt = HumanPrompt::choice("Next speaker?", vec!["a".into(), "b".into()]);
        let rendered = prompt.render();
        assert!(rendered.contains("1. a"));
        assert!(rendered.contains("2. b"));
    }

    #[tokio::test]
    async fn test_scripted_human_records_and_exhausts() {
        let human = ScriptedHuman::from_lines(["hello", ""]);
        let first = human.prompt(&HumanPrompt::text("q1")).await.unwrap();
        assert_eq!(first, HumanResponse::Text("hello".to_string()));
        let second = human.prompt(&HumanPrompt::text("q2")).await.unwrap();
        assert_eq!(second, HumanResponse::Skip);

        let err = human.prompt(&HumanPrompt::text("q3")).await.unwrap_err();
        assert!(matches!(err, HuddleError::HumanInputUnavailable(_)));
        assert_eq!(human.prompts().await.len(), 3);
    }
}
