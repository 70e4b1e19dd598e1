pub mod algorithm;
pub mod error;
pub mod job;
pub mod process;
pub mod repository;
pub mod task;
