//! Status row schema and the formatting rules for its columns.
//!
//! Each process writes one `StatusRow` under its own hash file on a status
//! request; the controller reads them back and renders the aggregate table.

use serde::{Deserialize, Serialize};

/// Row identifier: `"M"` for the master, the decimal worker id otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusId {
    Worker(u32),
    Master(String),
}

impl StatusId {
    pub fn master() -> Self {
        Self::Master("M".to_string())
    }

    pub fn worker(id: u32) -> Self {
        Self::Worker(id)
    }

    pub fn label(&self) -> String {
        match self {
            Self::Worker(id) => id.to_string(),
            Self::Master(label) => label.clone(),
        }
    }
}

/// One line of the aggregated status table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRow {
    pub id: StatusId,
    pub listen: String,
    pub name: String,
    pub memory: String,
    pub peak_memory: String,
    pub start_time: String,
    pub connections: String,
    pub timers: usize,
}

/// Column descriptions shown by `status --info`.
pub const COLUMN_DESCRIPTIONS: &[(&str, &str)] = &[
    ("id", "worker id, or M for the master process"),
    ("listen", "listening address of the worker's listener, N/A for the master"),
    ("name", "listener name from the configuration"),
    ("memory", "resident memory in MB"),
    ("peak_memory", "peak resident memory in MB"),
    ("start_time", "(restart count) followed by uptime"),
    ("connections", "active connections / total connections accepted"),
    ("timers", "pending event-loop timers"),
];

/// Formats kilobytes as MB with two decimals and an `M` suffix.
pub fn format_memory(kilobytes: u64) -> String {
    format!("{:.2}M", kilobytes as f64 / 1024.0)
}

/// Formats `(<restart_count>) <human uptime>`.
pub fn format_start_time(restart_count: u32, uptime_secs: i64) -> String {
    format!("({}) {}", restart_count, format_uptime(uptime_secs))
}

/// Formats `<active>/<total>`.
pub fn format_connections(active: usize, total: u64) -> String {
    format!("{active}/{total}")
}

/// Humanizes an uptime in seconds: `2d 3h 4m 5s`, omitting leading zero
/// units.
pub fn format_uptime(uptime_secs: i64) -> String {
    let secs = uptime_secs.max(0);
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || !parts.is_empty() {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || !parts.is_empty() {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}
