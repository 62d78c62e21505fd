//! Context sync status records and the backend payload parser.

use serde::{Deserialize, Deserializer, Serialize};

use sandbox_core::UnitFailure;

use crate::policy::{has_prefix, normalize_path};

/// Status token of a finished, successful task.
pub const STATUS_SUCCESS: &str = "Success";
/// Status token of a finished, failed task.
pub const STATUS_FAILED: &str = "Failed";

/// One reported outcome of a sync task.
///
/// Missing and `null` fields both read as their default; a running task
/// typically reports `null` for its error and finish time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextStatusData {
    #[serde(deserialize_with = "null_as_default")]
    pub context_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(deserialize_with = "null_as_default")]
    pub task_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub error_message: String,
    #[serde(deserialize_with = "null_as_default")]
    pub start_time: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub finish_time: i64,
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Option::unwrap_or_default)
}

impl ContextStatusData {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_SUCCESS)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_FAILED)
    }

    /// Anything that is neither success nor failure is still running.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        !self.is_success() && !self.is_failed()
    }

    /// Whether this record belongs to the given context/path/task filter.
    /// A path filter matches records at or below it.
    #[must_use]
    pub fn matches(&self, context_id: Option<&str>, path: Option<&str>, task: Option<&str>) -> bool {
        if context_id.is_some_and(|id| id != self.context_id) {
            return false;
        }
        if path.is_some_and(|p| !has_prefix(&normalize_path(&self.path), &normalize_path(p))) {
            return false;
        }
        if let Some(task) = task {
            if !self.task_type.is_empty() && !self.task_type.eq_ignore_ascii_case(task) {
                return false;
            }
        }
        true
    }

    fn as_failure(&self) -> UnitFailure {
        let message = if self.error_message.is_empty() {
            format!("{} task failed", self.task_type)
        } else {
            self.error_message.clone()
        };
        UnitFailure {
            target: format!("{}:{}", self.context_id, self.path),
            message,
        }
    }
}

/// Verdict of the sync completion predicate over a set of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncVerdict {
    /// At least one record is still running.
    InProgress,
    /// Every record finished successfully (vacuously true when empty).
    Succeeded,
    /// Nothing is running and some records failed.
    Failed(Vec<UnitFailure>),
}

/// Completion predicate: done iff nothing is in progress; successful iff
/// additionally nothing failed.
#[must_use]
pub fn evaluate<'a, I>(entries: I) -> SyncVerdict
where
    I: IntoIterator<Item = &'a ContextStatusData>,
{
    let mut failures = Vec::new();
    for entry in entries {
        if entry.is_in_progress() {
            return SyncVerdict::InProgress;
        }
        if entry.is_failed() {
            failures.push(entry.as_failure());
        }
    }
    if failures.is_empty() {
        SyncVerdict::Succeeded
    } else {
        SyncVerdict::Failed(failures)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Records decoded from one status payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStatus {
    pub entries: Vec<ContextStatusData>,
    /// Envelopes and records that could not be decoded.
    pub malformed: usize,
}

/// Parse the backend's status payload, counting what had to be skipped.
///
/// The payload is a JSON array of `{"type": "data", "data": "<json>"}`
/// envelopes whose `data` is itself a JSON-encoded array of records.
/// A bad record is skipped on its own; a bad envelope skips its records.
/// A payload that is unusable as a whole counts as one malformed part.
#[must_use]
pub fn parse_status_payload(raw: &str) -> ParsedStatus {
    let mut parsed = ParsedStatus::default();
    if raw.trim().is_empty() {
        return parsed;
    }
    let envelopes: Vec<Envelope> = match serde_json::from_str(raw) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed context status payload");
            parsed.malformed = 1;
            return parsed;
        }
    };

    for envelope in envelopes.into_iter().filter(|e| e.kind == "data") {
        let records = match envelope.data {
            serde_json::Value::String(inner) => {
                serde_json::from_str::<Vec<serde_json::Value>>(&inner)
            }
            other => serde_json::from_value::<Vec<serde_json::Value>>(other),
        };
        let records = match records {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed context status entry");
                parsed.malformed += 1;
                continue;
            }
        };
        for record in records {
            match serde_json::from_value::<ContextStatusData>(record) {
                Ok(entry) => parsed.entries.push(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed context status record");
                    parsed.malformed += 1;
                }
            }
        }
    }
    parsed
}

/// Parse the backend's status payload, dropping anything undecodable.
#[must_use]
pub fn parse_context_status(raw: &str) -> Vec<ContextStatusData> {
    parse_status_payload(raw).entries
}
