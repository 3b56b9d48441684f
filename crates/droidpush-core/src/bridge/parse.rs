//! Parsers for the bridge's fixed-format text output.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::DeviceEntry;

static UNKNOWN_PACKAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*java\.lang\.IllegalArgumentException:\sUnknown package:\s(\S+)\s*$")
        .expect("unknown-package pattern is a valid regex")
});

/// Parse `devices` output into `(address, state token)` entries.
///
/// The header, daemon status lines and blank lines are skipped.
pub fn parse_device_list(stdout: &str) -> Vec<DeviceEntry> {
    let mut entries = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices") || line.starts_with('*') {
            continue;
        }
        let mut columns = line.split_whitespace();
        match (columns.next(), columns.next()) {
            (Some(address), Some(token)) => entries.push(DeviceEntry::new(address, token)),
            _ => debug!(line, "ignoring unparseable devices line"),
        }
    }
    entries
}

/// Parse `pm list packages` output (`package:<id>` per line).
pub fn parse_package_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Whether `text` carries the bridge's "Unknown package" report for exactly `package_id`.
pub fn is_unknown_package(text: &str, package_id: &str) -> bool {
    UNKNOWN_PACKAGE
        .captures_iter(text)
        .any(|caps| caps.get(1).is_some_and(|m| m.as_str() == package_id))
}
