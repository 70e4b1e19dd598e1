pub mod check;
pub mod core;
pub mod position;
pub mod progress;
pub mod records;
