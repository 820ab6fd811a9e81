// Tally Infrastructure - SQLite Adapter
// Implements: BatchStore (emulated key-value keyspace), JobTransport + JobQueue (jobs table)

mod batch_store;
mod connection;
mod error;
mod job_queue;
mod migration;

pub use batch_store::SqliteBatchStore;
pub use connection::create_pool;
pub use job_queue::SqliteJobQueue;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by map_sqlx_error
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
