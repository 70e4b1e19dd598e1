//! Registry key layout of the migration pipeline.
//!
//! ```text
//! /pipeline/process_config
//! /pipeline/jobs/{job_id}/config
//! /pipeline/jobs/{job_id}/offset/{sharding_item}
//! /pipeline/jobs/{job_id}/check/ranges
//! /pipeline/jobs/{job_id}/check/result
//! ```

const ROOT: &str = "/pipeline";

pub fn process_config() -> String {
    format!("{ROOT}/process_config")
}

pub fn jobs() -> String {
    format!("{ROOT}/jobs")
}

pub fn job(job_id: &str) -> String {
    format!("{ROOT}/jobs/{job_id}")
}

pub fn job_config(job_id: &str) -> String {
    format!("{}/config", job(job_id))
}

pub fn job_offsets(job_id: &str) -> String {
    format!("{}/offset", job(job_id))
}

pub fn job_item_progress(job_id: &str, sharding_item: usize) -> String {
    format!("{}/{}", job_offsets(job_id), sharding_item)
}

pub fn check_ranges(job_id: &str) -> String {
    format!("{}/check/ranges", job(job_id))
}

pub fn check_result(job_id: &str) -> String {
    format!("{}/check/result", job(job_id))
}
