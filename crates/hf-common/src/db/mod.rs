pub mod migrations;
pub mod pipeline_store;
pub mod pool;
pub mod util;

/// Declares a storage error enum that already carries the pool and postgres sources.
macro_rules! db_error {
    ($name:ident { $($variants:tt)* }) => {
        #[derive(Debug, thiserror::Error)]
        pub enum $name {
            #[error("failed to get postgres connection: {0}")]
            Pool(#[from] deadpool_postgres::PoolError),
            #[error("postgres error: {0}")]
            Postgres(#[from] tokio_postgres::Error),
            $($variants)*
        }
    };
}

pub(crate) use db_error;

pub use migrations::{MigrationError, run_migrations};
pub use pipeline_store::PgPipelineStore;
pub use pool::{DbPoolError, PgPool, create_pool_from_url, create_pool_from_url_checked};
