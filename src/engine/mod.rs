pub mod controller;
pub mod executor;
pub mod scheduler;

pub use controller::{JobController, JobError};
pub use executor::{ChunkExecutor, TickOutcome};
pub use scheduler::ChunkScheduler;
