//! Bulk write encoding and response summaries.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::IndexError;

/// One document-level write.
///
/// Both variants are keyed by document id, so replaying an operation leaves
/// the store in the same state.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Create or replace the document stored under `id`.
    Upsert { id: String, document: Value },
    /// Remove the document stored under `id`. Missing ids are not an error.
    Delete { id: String },
}

impl BulkOperation {
    pub fn upsert(id: impl Into<String>, document: Value) -> Self {
        BulkOperation::Upsert {
            id: id.into(),
            document,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        BulkOperation::Delete { id: id.into() }
    }

    pub fn id(&self) -> &str {
        match self {
            BulkOperation::Upsert { id, .. } | BulkOperation::Delete { id } => id,
        }
    }
}

/// Encode operations as an NDJSON `_bulk` body targeting `index`.
pub(crate) fn encode(index: &str, operations: &[BulkOperation]) -> Result<String, IndexError> {
    let mut body = String::new();
    for operation in operations {
        match operation {
            BulkOperation::Upsert { id, document } => {
                let action = json!({ "index": { "_index": index, "_id": id } });
                body.push_str(&serde_json::to_string(&action)?);
                body.push('\n');
                body.push_str(&serde_json::to_string(document)?);
                body.push('\n');
            }
            BulkOperation::Delete { id } => {
                let action = json!({ "delete": { "_index": index, "_id": id } });
                body.push_str(&serde_json::to_string(&action)?);
                body.push('\n');
            }
        }
    }
    Ok(body)
}

/// A document the store refused inside an otherwise successful bulk call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// Outcome of one `_bulk` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub took_ms: u64,
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkSummary {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

pub(crate) fn summarize(body: &str) -> Result<BulkSummary, IndexError> {
    let response: BulkResponse = serde_json::from_str(body)
        .map_err(|e| IndexError::Response(format!("bulk response: {e}")))?;

    let mut summary = BulkSummary {
        took_ms: response.took,
        ..Default::default()
    };

    for item in response.items.into_iter().flat_map(|entry| entry.into_values()) {
        match item.error {
            Some(error) => summary.failures.push(BulkFailure {
                id: item.id.unwrap_or_default(),
                status: item.status,
                reason: error_reason(&error),
            }),
            None => summary.succeeded += 1,
        }
    }

    Ok(summary)
}

fn error_reason(error: &Value) -> String {
    let kind = error.get("type").and_then(Value::as_str);
    let reason = error.get("reason").and_then(Value::as_str);
    match (kind, reason) {
        (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
        (None, Some(reason)) => reason.to_string(),
        (Some(kind), None) => kind.to_string(),
        (None, None) => error.to_string(),
    }
}
