//! Server clock helpers

use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Server start, monotonic and wall-clock
static SERVER_START: OnceLock<(Instant, DateTime<Utc>)> = OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(|| (Instant::now(), Utc::now()));
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|(start, _)| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Wall-clock time the server started, if initialized
pub fn started_at() -> Option<DateTime<Utc>> {
    SERVER_START.get().map(|(_, at)| *at)
}
