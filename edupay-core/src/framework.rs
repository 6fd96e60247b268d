use sqlx::PgPool;

/// Executes the database `Processor`s of [`crate::entities`] against a pool.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}
