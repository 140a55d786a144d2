//! Resident-memory readings for the status rows.

/// Current and peak resident set size of this process, in kilobytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryReading {
    pub rss_kb: u64,
    pub peak_kb: u64,
}

/// Reads `/proc/self/status` (`VmRSS` / `VmHWM`). Returns zeros where the
/// procfs fields are unavailable.
pub fn read_self_memory() -> MemoryReading {
    let Ok(content) = std::fs::read_to_string("/proc/self/status") else {
        return MemoryReading::default();
    };
    let mut reading = MemoryReading::default();
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            reading.rss_kb = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("VmHWM:") {
            reading.peak_kb = parse_kb(rest);
        }
    }
    reading
}

fn parse_kb(field: &str) -> u64 {
    field
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .unwrap_or(0)
}
