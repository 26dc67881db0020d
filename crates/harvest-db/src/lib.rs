pub mod config;
pub mod database;
pub mod job_repository;
pub mod result_repository;
pub mod store;

pub use config::DatabaseConfig;
pub use database::Database;
pub use job_repository::JobRepository;
pub use result_repository::ResultRepository;
pub use store::PgJobStore;
