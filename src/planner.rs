use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::DryRunPlan;

#[derive(Debug, Error)]
pub enum PlannerError {
	#[error("failed to read plan {0}: {1}")]
	Read(PathBuf, std::io::Error),

	#[error("failed to parse plan {0}: {1}")]
	Parse(PathBuf, serde_json::Error),

	#[error("plan does not include the root document {table}:{id}")]
	RootMismatch { table: String, id: String },

	#[error("planner failed: {0}")]
	Other(String),
}

/// Computes the full cascade for a root delete without deleting anything.
#[async_trait]
pub trait Planner: Send + Sync {
	async fn compute_plan(&self, table: &str, id: &str) -> Result<DryRunPlan, PlannerError>;
}

/// Serves a dry-run result previously written to disk by the traversal tool.
#[derive(Debug, Clone)]
pub struct PlanFile {
	path: PathBuf,
}

impl PlanFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		PlanFile { path: path.into() }
	}
}

#[async_trait]
impl Planner for PlanFile {
	async fn compute_plan(&self, table: &str, id: &str) -> Result<DryRunPlan, PlannerError> {
		let raw = tokio::fs::read_to_string(&self.path)
			.await
			.map_err(|e| PlannerError::Read(self.path.clone(), e))?;

		let plan: DryRunPlan = serde_json::from_str(&raw).map_err(|e| PlannerError::Parse(self.path.clone(), e))?;

		if !plan.contains(table, id) {
			return Err(PlannerError::RootMismatch { table: table.to_string(), id: id.to_string() });
		}
		if plan.total_deleted != plan.plan.len() as u64 {
			tracing::warn!(
				total_deleted = plan.total_deleted,
				entries = plan.plan.len(),
				"dry-run total does not match plan length; using plan entries"
			);
		}

		Ok(plan)
	}
}
