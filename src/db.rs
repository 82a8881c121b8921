use std::path::Path;

use surrealdb::engine::local::{Db, Mem, SurrealKv};
use surrealdb::Surreal;

/// Wrapper around the SurrealDB handle.
/// Clone is cheap (Arc internally).
#[derive(Clone)]
pub struct DbHandle {
    pub db: Surreal<Db>,
}

impl std::fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbHandle").finish_non_exhaustive()
    }
}

/// Open (or create) the on-disk database and run migrations.
pub async fn open(path: &Path) -> Result<DbHandle, surrealdb::Error> {
    let db = Surreal::new::<SurrealKv>(path.to_path_buf()).await?;
    init(db).await
}

/// Volatile in-memory database. Used by tests and dry runs.
pub async fn open_memory() -> Result<DbHandle, surrealdb::Error> {
    let db = Surreal::new::<Mem>(()).await?;
    init(db).await
}

async fn init(db: Surreal<Db>) -> Result<DbHandle, surrealdb::Error> {
    db.use_ns("cascade").use_db("cascade").await?;
    run_migrations(&db).await?;
    Ok(DbHandle { db })
}

/// Run schema migrations. DEFINE statements are idempotent.
async fn run_migrations(db: &Surreal<Db>) -> Result<(), surrealdb::Error> {
    db.query(SCHEMA_V1).await?.check()?;
    tracing::debug!("schema migrations applied");
    Ok(())
}

// Target documents live in their own (schemaless) tables; only the job
// table is owned by this crate.
const SCHEMA_V1: &str = "
    DEFINE TABLE OVERWRITE deletion_job SCHEMAFULL;
    DEFINE FIELD OVERWRITE root_table ON deletion_job TYPE string;
    DEFINE FIELD OVERWRITE root_id ON deletion_job TYPE string;
    DEFINE FIELD OVERWRITE plan ON deletion_job TYPE array<object>;
    DEFINE FIELD OVERWRITE plan.* ON deletion_job TYPE object;
    DEFINE FIELD OVERWRITE plan.*.table ON deletion_job TYPE string;
    DEFINE FIELD OVERWRITE plan.*.document_id ON deletion_job TYPE string;
    DEFINE FIELD OVERWRITE status ON deletion_job TYPE string;
    DEFINE FIELD OVERWRITE deleted_so_far ON deletion_job TYPE int DEFAULT 0;
    DEFINE FIELD OVERWRITE total_to_delete ON deletion_job TYPE int;
    DEFINE FIELD OVERWRITE chunk_size ON deletion_job TYPE int;
    DEFINE FIELD OVERWRITE documents_removed ON deletion_job TYPE int DEFAULT 0;
    DEFINE FIELD OVERWRITE error ON deletion_job TYPE option<string>;
    DEFINE FIELD OVERWRITE created_at ON deletion_job TYPE datetime;
    DEFINE FIELD OVERWRITE updated_at ON deletion_job TYPE datetime;
    DEFINE INDEX OVERWRITE idx_job_status ON deletion_job FIELDS status;
    DEFINE INDEX OVERWRITE idx_job_created ON deletion_job FIELDS created_at;
";
