pub mod check_runner;
pub mod context;
pub mod detector;
pub mod error;
pub mod job;
pub mod logging;
pub mod persist;
pub mod prepare;
pub mod runner;
pub mod settings;

pub use error::JobError;
pub use job::MigrationJob;
pub use settings::RuntimeSettings;
