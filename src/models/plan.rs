use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use surrealdb::types::SurrealValue;

/// One document to remove: `<table>:<document_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, SurrealValue)]
pub struct PlanEntry {
    pub table: String,
    pub document_id: String,
}

impl PlanEntry {
    pub fn new(table: impl Into<String>, document_id: impl Into<String>) -> Self {
        PlanEntry { table: table.into(), document_id: document_id.into() }
    }
}

impl std::fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table, self.document_id)
    }
}

/// A single step of a dry-run traversal, as reported by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedDeletion {
    pub table: String,
    pub document_id: String,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub relationship_name: Option<String>,
}

/// Result of running the cascade traversal in dry-run mode.
///
/// The order of `plan` is already safe to execute front to back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunPlan {
    pub total_deleted: u64,
    #[serde(default)]
    pub deleted_by_table: BTreeMap<String, u64>,
    pub plan: Vec<PlannedDeletion>,
}

impl DryRunPlan {
    /// Reduce the dry-run result to the `(table, document_id)` pairs a job
    /// executes, keeping planner order.
    pub fn into_entries(self) -> Vec<PlanEntry> {
        self.plan
            .into_iter()
            .map(|step| PlanEntry { table: step.table, document_id: step.document_id })
            .collect()
    }

    pub fn contains(&self, table: &str, document_id: &str) -> bool {
        self.plan.iter().any(|step| step.table == table && step.document_id == document_id)
    }
}
