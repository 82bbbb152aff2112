//! Token and cost accounting across participants

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Usage reported by a single completion call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Cost in USD, zero when the provider does not report pricing
    #[serde(default)]
    pub cost: f64,
}

/// Accumulated usage for one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl ModelUsage {
    fn absorb(&mut self, other: &ModelUsage) {
        self.cost += other.cost;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Usage summary keyed by model name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_cost: f64,
    pub models: BTreeMap<String, ModelUsage>,
}

impl UsageSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completion call
    pub fn record(&mut self, usage: &Usage) {
        self.total_cost += usage.cost;
        self.models
            .entry(usage.model.clone())
            .or_default()
            .absorb(&ModelUsage {
                cost: usage.cost,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.prompt_tokens + usage.completion_tokens,
            });
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &UsageSummary) {
        self.total_cost += other.total_cost;
        for (model, usage) in &other.models {
            self.models.entry(model.clone()).or_default().absorb(usage);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Sum usage across participants, per model
///
/// Participants that never called a model contribute an empty summary.
pub fn gather_usage_summary<'a, I>(summaries: I) -> UsageSummary
where
    I: IntoIterator<Item = &'a UsageSummary>,
{
    let mut total = UsageSummary::new();
    for summary in summaries {
        total.merge(summary);
    }
    total
}
