//! Browser and platform tallies derived from reported user agents.

use crate::record::TelemetryRecord;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn browser_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)Chrome|Firefox|Safari|Edge|Opera|MSIE|Trident").expect("static browser pattern")
    })
}

fn platform_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)Windows|Mac|Linux|iOS|Android").expect("static platform pattern"))
}

/// Leftmost match of `pattern` in each user agent, lowercased and counted
fn tally(records: &[TelemetryRecord], pattern: &Regex) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for ua in records.iter().filter_map(TelemetryRecord::user_agent) {
        if let Some(found) = pattern.find(ua) {
            *counts.entry(found.as_str().to_lowercase()).or_insert(0) += 1;
        }
    }
    counts
}

pub fn browser_counts(records: &[TelemetryRecord]) -> BTreeMap<String, usize> {
    tally(records, browser_pattern())
}

pub fn platform_counts(records: &[TelemetryRecord]) -> BTreeMap<String, usize> {
    tally(records, platform_pattern())
}
