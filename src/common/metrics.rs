use metrics::{counter, gauge};

/// Error/Reliability Metrics - Success/Failure pairs
pub fn increment_connect_api_success() {
    counter!("connect_api_total", "result" => "success").increment(1);
}

pub fn increment_connect_api_failure() {
    counter!("connect_api_total", "result" => "failure").increment(1);
}

pub fn increment_cache_hit() {
    counter!("cache_total", "result" => "hit").increment(1);
}

pub fn increment_cache_miss() {
    counter!("cache_total", "result" => "miss").increment(1);
}

/// Business Logic Metrics
pub fn increment_activities_downloaded(count: u64) {
    counter!("activities_downloaded").increment(count);
}

pub fn increment_activities_failed(count: u64) {
    counter!("activities_failed").increment(count);
}

pub fn increment_files_skipped_existing(count: u64) {
    counter!("files_skipped_existing").increment(count);
}

pub fn set_index_size(count: usize) {
    gauge!("index_size").set(count as f64);
}
