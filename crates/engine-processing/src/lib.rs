pub mod channel;
pub mod check;
pub mod dumper;
pub mod error;
pub mod importer;
pub mod position;
pub mod retry;
pub mod splitter;
pub mod task;
