pub mod connection;
pub mod retry;

pub use connection::{create_sqlite_pool, initialize_database, run_migrations};
pub use retry::{is_busy_error, with_busy_retry};
