//! Ordered audit log of handler evaluations within one run.

use crate::error::DispatchResult;
use crate::handler::Outcome;
use serde::{Deserialize, Serialize};

/// One evaluated handler.
///
/// Serialized as
/// `{handler, matched, outcome, revisionBefore, revisionAfter}`; `outcome` is
/// omitted for handlers whose predicate did not match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub handler: String,
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// State being entered, for state machine runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub revision_before: u64,
    pub revision_after: u64,
}

impl TraceEntry {
    pub(crate) fn skipped(handler: &str, revision: u64) -> Self {
        Self {
            handler: handler.to_string(),
            matched: false,
            outcome: None,
            reason: None,
            state: None,
            revision_before: revision,
            revision_after: revision,
        }
    }

    pub(crate) fn evaluated(
        handler: &str,
        matched: bool,
        outcome: &Outcome,
        revision_before: u64,
        revision_after: u64,
    ) -> Self {
        Self {
            handler: handler.to_string(),
            matched,
            outcome: Some(outcome.label().to_string()),
            reason: outcome.reason().map(str::to_string),
            state: None,
            revision_before,
            revision_after,
        }
    }

    #[must_use]
    pub(crate) fn in_state(mut self, state: &str) -> Self {
        self.state = Some(state.to_string());
        self
    }
}

/// Append-only list of [`TraceEntry`] values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    /// Handlers that produced an outcome, in order. Includes a handler whose
    /// predicate panicked, which is recorded unmatched with a `Fault`.
    pub fn invoked_handlers(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.is_some())
            .map(|entry| entry.handler.as_str())
            .collect()
    }

    pub fn to_json(&self) -> DispatchResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl IntoIterator for Trace {
    type Item = TraceEntry;
    type IntoIter = std::vec::IntoIter<TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trace_export_schema() {
        let mut trace = Trace::new();
        trace.push(TraceEntry::skipped("Basic", 0));
        trace.push(TraceEntry::evaluated("Intermediate", true, &Outcome::Handled, 0, 1));

        assert_eq!(
            trace.to_json().unwrap(),
            json!([
                {"handler": "Basic", "matched": false, "revisionBefore": 0, "revisionAfter": 0},
                {"handler": "Intermediate", "matched": true, "outcome": "Handled", "revisionBefore": 0, "revisionAfter": 1}
            ])
        );
        assert_eq!(trace.invoked_handlers(), vec!["Intermediate"]);
    }

    #[test]
    fn test_rejection_reason_is_exported() {
        let entry = TraceEntry::evaluated("limits", true, &Outcome::Reject("over limit".to_string()), 3, 3)
            .in_state("review");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["outcome"], "Reject");
        assert_eq!(json["reason"], "over limit");
        assert_eq!(json["state"], "review");
    }

    #[test]
    fn test_predicate_fault_counts_as_invoked() {
        let mut trace = Trace::new();
        trace.push(TraceEntry::skipped("Basic", 0));
        trace.push(TraceEntry::evaluated(
            "Flaky",
            false,
            &Outcome::Fault("predicate panicked: boom".to_string()),
            0,
            0,
        ));

        assert_eq!(trace.invoked_handlers(), vec!["Flaky"]);
    }
}
