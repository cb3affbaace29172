pub mod app;

pub use app::AppConfig;
pub use app::Environment;
pub use app::DatabaseConfig;
pub use app::ServerConfig;
pub use app::BusyRetryConfig;
pub use app::AllocationConfig;
pub use app::MAX_SLOTS_PER_ENDPOINT_LIMIT;
