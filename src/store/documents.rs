use async_trait::async_trait;
use surrealdb::types::{RecordId, RecordIdKey};
use thiserror::Error;

use crate::{db::DbHandle, models::PlanEntry};

#[derive(Debug, Error)]
pub enum DocumentError {
	#[error("invalid target {0}: {1}")]
	InvalidTarget(String, String),

	#[error("database error: {0}")]
	DbError(String),
}

/// Primitive used by the executor to remove one plan entry.
#[async_trait]
pub trait DocumentStore: Send + Sync {
	/// Fetch-then-delete the target document.
	///
	/// `Ok(false)` means the document was already gone. That is not an error:
	/// a resumed or redelivered chunk will find entries it removed earlier.
	async fn delete(&self, entry: &PlanEntry) -> Result<bool, DocumentError>;
}

/// Deletes plan entries stored as `<table>:<document_id>` records in the same
/// database as the jobs.
#[derive(Debug, Clone)]
pub struct SurrealDocuments {
	db: DbHandle,
}

impl SurrealDocuments {
	pub fn new(db: DbHandle) -> Self {
		SurrealDocuments { db }
	}
}

pub fn record_id(entry: &PlanEntry) -> Result<RecordId, DocumentError> {
	if entry.table.is_empty() || entry.document_id.is_empty() {
		return Err(DocumentError::InvalidTarget(entry.to_string(), "empty table or id".into()));
	}
	Ok(RecordId {
		table: entry.table.as_str().into(),
		key: RecordIdKey::String(entry.document_id.clone()),
	})
}

#[async_trait]
impl DocumentStore for SurrealDocuments {
	async fn delete(&self, entry: &PlanEntry) -> Result<bool, DocumentError> {
		let target = record_id(entry)?;

		let response = self
			.db
			.db
			.query("DELETE $target RETURN BEFORE")
			.bind(("target", target))
			.await;

		let before: Result<Vec<serde_json::Value>, surrealdb::Error> = match response {
			Ok(mut response) => response.take(0),
			Err(e) => Err(e),
		};

		match before {
			Ok(before) => Ok(!before.is_empty()),
			// A table that was never created holds no documents.
			Err(e) if is_missing_table(&e.to_string(), &entry.table) => {
				tracing::debug!(%entry, "target table does not exist");
				Ok(false)
			}
			Err(e) => Err(DocumentError::DbError(e.to_string())),
		}
	}
}

fn is_missing_table(message: &str, table: &str) -> bool {
	message.contains("table") && message.contains(&format!("'{table}' does not exist"))
}
