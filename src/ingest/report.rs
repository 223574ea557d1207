//! Per-item results of batch ingestion.

use serde::Serialize;

use super::IngestError;
use crate::emitter::FileRecord;

/// What happened to one batch input.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// A record was produced and handed to the emitter.
    Emitted { record: FileRecord },
    /// A local file matched the identity recorded by the previous run.
    Unchanged,
    /// The item failed; the rest of the batch was unaffected.
    Failed {
        reason: &'static str,
        message: String,
    },
}

/// One batch input (a URL or a path) and its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub target: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl ItemReport {
    pub(crate) fn failed(target: impl Into<String>, error: &IngestError) -> Self {
        Self {
            target: target.into(),
            outcome: ItemOutcome::Failed {
                reason: error.reason(),
                message: error.to_string(),
            },
        }
    }
}

/// Outcome of a batch, one entry per input in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    items: Vec<ItemReport>,
}

impl IngestReport {
    pub(crate) fn push(&mut self, item: ItemReport) {
        self.items.push(item);
    }

    #[must_use]
    pub fn items(&self) -> &[ItemReport] {
        &self.items
    }

    /// Records produced by this batch.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.items.iter().filter_map(|item| match &item.outcome {
            ItemOutcome::Emitted { record } => Some(record),
            _ => None,
        })
    }

    /// Failed items only.
    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn emitted(&self) -> usize {
        self.records().count()
    }

    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Unchanged))
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    /// True when no item failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}
