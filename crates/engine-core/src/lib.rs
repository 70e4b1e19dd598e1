pub mod connectors;
pub mod consistency;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod ratelimit;
pub mod retry;
pub mod state;
