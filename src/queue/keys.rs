//! Redis key layout for the `bet-resolution` queue (spec §6.3).

use uuid::Uuid;

pub fn waiting_key() -> String {
    "bullmq:bet-resolution:waiting".to_string()
}

pub fn active_key() -> String {
    "bullmq:bet-resolution:active".to_string()
}

pub fn completed_key() -> String {
    "bullmq:bet-resolution:completed".to_string()
}

pub fn failed_key() -> String {
    "bullmq:bet-resolution:failed".to_string()
}

pub fn job_key(job_id: &str) -> String {
    format!("bullmq:bet-resolution:job:{job_id}")
}

pub fn resolve_job_id(bet_id: Uuid) -> String {
    format!("resolve-{bet_id}")
}

pub fn wash_job_id(bet_id: Uuid) -> String {
    format!("wash-{bet_id}")
}
