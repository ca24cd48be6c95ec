//! Telemetry record model.
//!
//! A [`TelemetryRecord`] is one visitor submission as it is persisted: identity
//! fields attached by the server, reputation annotations, and the client-reported
//! device and behavior data. Client-supplied sections are parsed leniently, a
//! garbled field degrades to its default instead of rejecting the submission.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Placeholder used for identity fields the server could not determine
pub const UNKNOWN: &str = "N/A";

/// Deserialize `T`, falling back to `T::default()` when the value has the wrong shape
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Deserialize a sequence element by element, dropping the elements with the wrong
/// shape. A value that is not an array yields an empty sequence.
pub(crate) fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| T::deserialize(item).ok())
        .collect())
}

/// Interaction areas arrive as a list of grid-cell keys, or as an object when the
/// collector serialized a JS `Set`. Anything else counts as no coverage data.
fn interaction_areas<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let cells: BTreeSet<String> = match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Value::Object(map) => map.into_iter().map(|(k, _)| k).collect(),
        _ => BTreeSet::new(),
    };
    Ok(cells.into_iter().collect())
}

/// Network identity and reputation annotations for the submitting address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpInfo {
    #[serde(default = "unknown")]
    pub city: String,
    #[serde(default = "unknown")]
    pub region: String,
    #[serde(default = "unknown")]
    pub country: String,
    #[serde(default = "unknown", alias = "org")]
    pub organization: String,
    #[serde(default)]
    pub is_tor: bool,
    #[serde(default)]
    pub is_proxy: bool,
    #[serde(default)]
    pub is_hosting: bool,
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

impl IpInfo {
    /// Reputation data when the lookup was disabled or failed
    pub fn unknown() -> Self {
        Self {
            city: unknown(),
            region: unknown(),
            country: unknown(),
            organization: unknown(),
            is_tor: false,
            is_proxy: false,
            is_hosting: false,
        }
    }
}

impl Default for IpInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

/// A sampled pointer position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub time: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, time: 0.0 }
    }
}

/// A click with the tag name of its target element
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClickPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub target: String,
}

/// One keydown event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyPress {
    #[serde(default)]
    pub key: String,
    pub time: f64,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
}

/// One scroll sample: vertical offset and capture time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollSample {
    pub top: f64,
    pub time: f64,
    #[serde(default)]
    pub direction: String,
}

/// Structured behavior trace gathered by the client collector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehavioralTrace {
    #[serde(default, deserialize_with = "lenient")]
    pub moves: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub clicks: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub idle_seconds: f64,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub mouse_points: Vec<Point>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub click_points: Vec<ClickPoint>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub move_velocities: Vec<f64>,
    /// Milliseconds between consecutive clicks
    #[serde(default, deserialize_with = "lenient_seq")]
    pub event_intervals: Vec<f64>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub scroll_patterns: Vec<ScrollSample>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub key_press_patterns: Vec<KeyPress>,
    #[serde(default, deserialize_with = "lenient")]
    pub input_backspaces: u64,
    /// Distinct coarse screen-grid cells touched by the pointer
    #[serde(default, deserialize_with = "interaction_areas")]
    pub interaction_areas: Vec<String>,
}

/// JSON body posted by the client collector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    #[serde(default, deserialize_with = "lenient")]
    pub fingerprint: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub device_data: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub behavior: BehavioralTrace,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub webrtc: Vec<String>,
}

impl SubmissionPayload {
    /// Parse a raw body; anything that is not a JSON object yields an empty payload
    pub fn from_slice(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// One persisted visitor submission. Never mutated after `save`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
    pub cookie_id: String,
    pub ip: String,
    #[serde(default)]
    pub ip_info: IpInfo,
    #[serde(default)]
    pub device_data: Map<String, Value>,
    #[serde(default)]
    pub behavioral: BehavioralTrace,
    #[serde(default)]
    pub webrtc_ips: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl TelemetryRecord {
    /// Minimal record carrying only identity fields
    pub fn new(
        timestamp: DateTime<Utc>,
        fingerprint: impl Into<String>,
        cookie_id: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            fingerprint: fingerprint.into(),
            cookie_id: cookie_id.into(),
            ip: ip.into(),
            ip_info: IpInfo::unknown(),
            device_data: Map::new(),
            behavioral: BehavioralTrace::default(),
            webrtc_ips: Vec::new(),
            headers: BTreeMap::new(),
        }
    }

    /// Assemble a record from a client payload and the server-side annotations
    pub fn from_submission(
        payload: SubmissionPayload,
        timestamp: DateTime<Utc>,
        cookie_id: impl Into<String>,
        ip: impl Into<String>,
        ip_info: IpInfo,
        headers: BTreeMap<String, String>,
    ) -> Self {
        let mut webrtc_ips = payload.webrtc;
        webrtc_ips.sort();
        webrtc_ips.dedup();

        Self {
            timestamp,
            fingerprint: payload.fingerprint.unwrap_or_else(unknown),
            cookie_id: cookie_id.into(),
            ip: ip.into(),
            ip_info,
            device_data: payload.device_data,
            behavioral: payload.behavior,
            webrtc_ips,
            headers,
        }
    }

    /// User agent reported by the collector, if any
    pub fn user_agent(&self) -> Option<&str> {
        self.device_data.get("userAgent").and_then(Value::as_str)
    }
}
