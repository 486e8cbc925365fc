//! Processing results persisted per entry and per transaction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fhir::ResourceType;

/// One clinically meaningful fact extracted from a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedResourceReference {
    pub resource_type: ResourceType,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub title: String,
}

/// Clinical document classification of a processed bundle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    Prescription,
    DiagnosticReport,
    OPConsultation,
    DischargeSummary,
    ImmunizationRecord,
    HealthDocumentRecord,
    WellnessRecord,
    #[default]
    Unknown,
}

/// Outcome of a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryOutcome {
    /// Content available, no errors
    Succeeded,
    /// Content available but some resources failed (e.g. an attachment)
    Partial,
    /// No usable content
    Errored,
}

/// Result of processing one pushed entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEntry {
    pub transaction_id: String,
    pub entry_index: usize,
    pub media: String,

    /// The bundle JSON after attachment references were rewritten
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default)]
    pub errors: Vec<String>,

    #[serde(default)]
    pub tracked_resources: Vec<TrackedResourceReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_resource_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub document_type: DocumentType,

    /// Names of the organizations the records originate from
    #[serde(default)]
    pub origins: Vec<String>,
}

impl ProcessedEntry {
    /// An entry that produced no content at all
    pub fn errored(
        transaction_id: &str,
        entry_index: usize,
        media: &str,
        error: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            entry_index,
            media: media.to_string(),
            content: None,
            errors: vec![error.into()],
            tracked_resources: Vec::new(),
            latest_resource_date: None,
            document_type: DocumentType::Unknown,
            origins: Vec::new(),
        }
    }

    pub fn outcome(&self) -> EntryOutcome {
        match (&self.content, self.errors.is_empty()) {
            (None, _) => EntryOutcome::Errored,
            (Some(_), true) => EntryOutcome::Succeeded,
            (Some(_), false) => EntryOutcome::Partial,
        }
    }
}

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Received,
    Processing,
    Succeeded,
    Errored,
    Partial,
}

impl TransactionStatus {
    /// Final status from entry outcomes: the worst outcome wins.
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = EntryOutcome>,
    {
        let mut total = 0usize;
        let mut succeeded = 0usize;
        let mut errored = 0usize;

        for outcome in outcomes {
            total += 1;
            match outcome {
                EntryOutcome::Succeeded => succeeded += 1,
                EntryOutcome::Errored => errored += 1,
                EntryOutcome::Partial => {}
            }
        }

        if total == 0 || errored == total {
            Self::Errored
        } else if succeeded == total {
            Self::Succeeded
        } else {
            Self::Partial
        }
    }

    /// Whether processing has finished for this transaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Errored | Self::Partial)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "RECEIVED",
            Self::Processing => "PROCESSING",
            Self::Succeeded => "SUCCEEDED",
            Self::Errored => "ERRORED",
            Self::Partial => "PARTIAL",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(content: Option<&str>, errors: &[&str]) -> ProcessedEntry {
        ProcessedEntry {
            transaction_id: "t1".into(),
            entry_index: 0,
            media: "application/fhir+json".into(),
            content: content.map(str::to_string),
            errors: errors.iter().map(|e| e.to_string()).collect(),
            tracked_resources: vec![],
            latest_resource_date: None,
            document_type: DocumentType::Unknown,
            origins: vec![],
        }
    }

    #[test]
    fn test_entry_outcome() {
        assert_eq!(entry(Some("{}"), &[]).outcome(), EntryOutcome::Succeeded);
        assert_eq!(entry(Some("{}"), &["io"]).outcome(), EntryOutcome::Partial);
        assert_eq!(entry(None, &["bad tag"]).outcome(), EntryOutcome::Errored);
    }

    #[test]
    fn test_status_worst_outcome() {
        use EntryOutcome::*;

        assert_eq!(
            TransactionStatus::from_outcomes([Succeeded, Succeeded]),
            TransactionStatus::Succeeded
        );
        assert_eq!(
            TransactionStatus::from_outcomes([Succeeded, Errored, Succeeded]),
            TransactionStatus::Partial
        );
        assert_eq!(
            TransactionStatus::from_outcomes([Succeeded, Partial]),
            TransactionStatus::Partial
        );
        assert_eq!(
            TransactionStatus::from_outcomes([Errored, Errored]),
            TransactionStatus::Errored
        );
        assert_eq!(
            TransactionStatus::from_outcomes(Vec::<EntryOutcome>::new()),
            TransactionStatus::Errored
        );
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TransactionStatus::Partial).unwrap();
        assert_eq!(json, "\"PARTIAL\"");
        assert_eq!(TransactionStatus::Processing.to_string(), "PROCESSING");
    }
}
