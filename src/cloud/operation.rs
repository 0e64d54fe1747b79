//! Provider operation model and sub-error aggregation.
//!
//! A disk resize returns a zonal operation handle. The handle is polled until
//! its status is `DONE`; only then may the `error.errors` list be trusted. That
//! list may contain null or message-less entries, which are skipped when the
//! failures are flattened into one [`AggregatedOperationError`].

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a provider operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    #[default]
    #[serde(other)]
    Unknown,
}

impl OperationStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// One fault condition reported by a finished operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OperationSubError {
    pub code: String,
    pub message: String,
}

impl OperationSubError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OperationErrorBlock {
    pub errors: Vec<Option<OperationSubError>>,
}

/// A provider-side asynchronous task handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderOperation {
    pub name: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrorBlock>,
}

impl ProviderOperation {
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: OperationStatus::Pending,
            error: None,
        }
    }

    #[must_use]
    pub fn done(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: OperationStatus::Done,
            error: None,
        }
    }

    /// Mark the operation finished with the given sub-errors.
    #[must_use]
    pub fn with_errors(mut self, errors: Vec<Option<OperationSubError>>) -> Self {
        self.error = Some(OperationErrorBlock { errors });
        self
    }

    /// Sub-errors reported with the operation, empty when none were reported.
    #[must_use]
    pub fn sub_errors(&self) -> &[Option<OperationSubError>] {
        match &self.error {
            Some(block) => &block.errors,
            None => &[],
        }
    }

    /// A handle without a name cannot be polled.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

// ──────────────────── aggregation ────────────────────

/// Flattened view of every non-empty sub-error a finished operation reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedOperationError {
    messages: Vec<String>,
}

impl AggregatedOperationError {
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl fmt::Display for AggregatedOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.messages.as_slice() {
            return f.write_str(only);
        }
        write!(
            f,
            "{} errors occurred: {}",
            self.messages.len(),
            self.messages.join("; ")
        )
    }
}

impl std::error::Error for AggregatedOperationError {}

/// Collapse provider sub-errors into one error.
///
/// Each entry is rendered as its message, or its code when the message is
/// blank. Null entries and entries with neither are skipped. Returns `None`
/// when nothing is left, so an empty list never turns into a failure.
#[must_use]
pub fn aggregate_sub_errors(
    errors: &[Option<OperationSubError>],
) -> Option<AggregatedOperationError> {
    let messages: Vec<String> = errors
        .iter()
        .flatten()
        .filter_map(|sub| {
            [sub.message.trim(), sub.code.trim()]
                .into_iter()
                .find(|text| !text.is_empty())
                .map(str::to_string)
        })
        .collect();

    if messages.is_empty() {
        None
    } else {
        Some(AggregatedOperationError { messages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_is_not_an_error() {
        assert!(aggregate_sub_errors(&[]).is_none());
    }

    #[test]
    fn null_and_empty_entries_are_skipped() {
        let errors = vec![None, Some(OperationSubError::new(" ", "")), None];
        assert!(aggregate_sub_errors(&errors).is_none());
    }

    #[test]
    fn code_stands_in_for_a_blank_message() {
        let errors = vec![
            None,
            Some(OperationSubError::new("QUOTA_EXCEEDED", "  ")),
            Some(OperationSubError::new("RESOURCE_NOT_READY", "disk busy")),
        ];
        let aggregated = aggregate_sub_errors(&errors).expect("code-only entry counts");
        assert_eq!(
            aggregated.to_string(),
            "2 errors occurred: QUOTA_EXCEEDED; disk busy"
        );
    }

    #[test]
    fn two_sub_errors_are_both_reported_in_order() {
        let errors = vec![
            Some(OperationSubError::new("QUOTA_EXCEEDED", "quota exceeded")),
            None,
            Some(OperationSubError::new("ZONE_RESOURCE_POOL_EXHAUSTED", "zone unavailable")),
        ];
        let aggregated = aggregate_sub_errors(&errors).expect("two messages aggregate");
        let text = aggregated.to_string();
        assert_eq!(aggregated.messages().len(), 2);
        assert!(text.contains("quota exceeded"), "{text}");
        assert!(text.contains("zone unavailable"), "{text}");
        assert!(
            text.find("quota exceeded") < text.find("zone unavailable"),
            "order preserved: {text}"
        );
    }

    #[test]
    fn single_sub_error_displays_bare_message() {
        let aggregated =
            aggregate_sub_errors(&[Some(OperationSubError::new("X", "disk busy"))]).unwrap();
        assert_eq!(aggregated.to_string(), "disk busy");
    }

    #[test]
    fn parses_done_operation_with_errors() {
        let raw = r#"{
            "kind": "compute#operation",
            "name": "operation-1700000000000-abc",
            "status": "DONE",
            "error": {"errors": [{"code": "QUOTA_EXCEEDED", "message": "quota exceeded"}, null]}
        }"#;
        let op: ProviderOperation = serde_json::from_str(raw).expect("operation parses");
        assert!(op.status.is_terminal());
        assert!(op.is_well_formed());
        assert_eq!(op.sub_errors().len(), 2);
        assert!(op.sub_errors()[1].is_none());
    }

    #[test]
    fn unknown_status_is_not_terminal() {
        let op: ProviderOperation =
            serde_json::from_str(r#"{"name": "op", "status": "ABORTING"}"#).unwrap();
        assert_eq!(op.status, OperationStatus::Unknown);
        assert!(!op.status.is_terminal());
    }

    #[test]
    fn nameless_operation_is_malformed() {
        let op: ProviderOperation = serde_json::from_str(r#"{"status": "RUNNING"}"#).unwrap();
        assert!(!op.is_well_formed());
        assert!(op.sub_errors().is_empty());
    }
}
