use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullRefresh,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    Insert,
    Upsert,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    #[default]
    Schema,
    Schemaless,
}

/// Unit of a request rate limit. Unknown units are kept verbatim and count as
/// one second.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RateLimitUnit {
    #[default]
    Minute,
    Hour,
    Day,
    Other(String),
}

impl RateLimitUnit {
    pub fn seconds(&self) -> u64 {
        match self {
            RateLimitUnit::Minute => 60,
            RateLimitUnit::Hour => 3600,
            RateLimitUnit::Day => 86_400,
            RateLimitUnit::Other(_) => 1,
        }
    }
}

impl From<String> for RateLimitUnit {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "minute" => RateLimitUnit::Minute,
            "hour" => RateLimitUnit::Hour,
            "day" => RateLimitUnit::Day,
            _ => RateLimitUnit::Other(value),
        }
    }
}

impl From<RateLimitUnit> for String {
    fn from(value: RateLimitUnit) -> Self {
        match value {
            RateLimitUnit::Minute => "minute".to_string(),
            RateLimitUnit::Hour => "hour".to_string(),
            RateLimitUnit::Day => "day".to_string(),
            RateLimitUnit::Other(s) => s,
        }
    }
}

/// A resolved request budget: `value` calls per `unit_seconds`, with at most
/// `concurrency` calls in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub value: u32,
    pub unit_seconds: u64,
    pub concurrency: usize,
}

impl RateLimit {
    /// Minimum spacing between two call starts.
    pub fn min_interval(&self) -> Duration {
        if self.value == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.unit_seconds as f64 / f64::from(self.value))
    }
}

fn default_batch_size() -> usize {
    1
}

/// One addressable unit in a destination catalog (an object, table or endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    #[serde(default)]
    pub json_schema: Value,
    #[serde(default)]
    pub supported_sync_modes: Vec<SyncMode>,
    #[serde(default)]
    pub batch_support: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_rate_limit: Option<u32>,
    #[serde(default)]
    pub request_rate_limit_unit: RateLimitUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_rate_concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_method: Option<String>,
}

impl Stream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            json_schema: Value::Null,
            supported_sync_modes: vec![SyncMode::FullRefresh, SyncMode::Incremental],
            batch_support: false,
            batch_size: 1,
            request_rate_limit: None,
            request_rate_limit_unit: RateLimitUnit::Minute,
            request_rate_concurrency: None,
            url: None,
            request_method: None,
        }
    }

    pub fn rate_limit_unit_seconds(&self) -> u64 {
        self.request_rate_limit_unit.seconds()
    }

    /// Records per destination call.
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_support {
            self.batch_size.max(1)
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<Stream>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_rate_limit: Option<u32>,
    #[serde(default)]
    pub request_rate_limit_unit: RateLimitUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_rate_concurrency: Option<usize>,
    #[serde(default)]
    pub schema_mode: SchemaMode,
}

impl Catalog {
    pub fn find_stream(&self, name: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.name == name)
    }

    /// Resolve the request budget for `stream`. Stream-level settings win over
    /// catalog-level ones; `None` means unlimited.
    pub fn rate_limit_for(&self, stream: &Stream) -> Option<RateLimit> {
        let (value, unit) = match stream.request_rate_limit {
            Some(v) => (v, &stream.request_rate_limit_unit),
            None => (self.request_rate_limit?, &self.request_rate_limit_unit),
        };
        if value == 0 {
            return None;
        }
        let concurrency = stream
            .request_rate_concurrency
            .or(self.request_rate_concurrency)
            .unwrap_or(1)
            .max(1);
        Some(RateLimit {
            value,
            unit_seconds: unit.seconds(),
            concurrency,
        })
    }
}
