//! Resumable, chunked cascade deletes.
//!
//! A [`JobController`] turns a root delete into a durable [`DeletionJob`]
//! holding the full plan computed by a [`Planner`], then removes the plan's
//! documents a few at a time across scheduler ticks. Progress is persisted
//! after every chunk, so jobs survive restarts ([`JobController::resume_jobs`])
//! and can be cancelled between chunks.

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod models;
pub mod planner;
pub mod ratelimit;
pub mod store;

pub use config::{Config, EngineSettings};
pub use db::DbHandle;
pub use engine::{ChunkExecutor, ChunkScheduler, JobController, JobError, TickOutcome};
pub use models::{DeletionJob, DryRunPlan, JobId, JobStatus, PlanEntry};
pub use planner::{PlanFile, Planner, PlannerError};
pub use ratelimit::{RateLimitError, RateLimiter, TokenBucketLimiter, Unlimited};
pub use store::{DocumentStore, JobStore, SurrealDocuments};
