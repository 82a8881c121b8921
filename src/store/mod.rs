pub mod documents;
pub mod jobs;

pub use documents::{DocumentError, DocumentStore, SurrealDocuments};
pub use jobs::{JobPatch, JobStore, StoreError};
