use serde::{Deserialize, Serialize};

/// A single structured event extracted from one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// One served HTTP request.
    Request(RequestEvent),
    /// A connection pool occupancy sample.
    PoolSample(PoolSample),
}

impl LogEvent {
    /// Get the kind of line this event was parsed from.
    pub fn format(&self) -> LineFormat {
        match self {
            LogEvent::Request(_) => LineFormat::Request,
            LogEvent::PoolSample(_) => LineFormat::Pool,
        }
    }
}

impl From<RequestEvent> for LogEvent {
    fn from(event: RequestEvent) -> Self {
        LogEvent::Request(event)
    }
}

impl From<PoolSample> for LogEvent {
    fn from(sample: PoolSample) -> Self {
        LogEvent::PoolSample(sample)
    }
}

/// A request record from a pipe-separated request log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEvent {
    /// HTTP method (e.g., "GET").
    pub method: String,
    /// Response status code as it appears in the log (e.g., "200").
    pub status_code: String,
    /// Bytes received from the client.
    pub upload_bytes: u64,
    /// Bytes sent to the client.
    pub download_bytes: u64,
    /// Request duration in milliseconds.
    pub duration_ms: u64,
}

/// Connection pool allocation reported as `total allocated: <current> of <max>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSample {
    /// Connections currently allocated.
    pub current: u64,
    /// Pool capacity. Always greater than zero.
    pub max: u64,
}

/// Log line schema understood by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// Pipe-separated request log.
    Request,
    /// Free-text connection pool log.
    Pool,
}

impl LineFormat {
    /// Get the string representation used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            LineFormat::Request => "request",
            LineFormat::Pool => "pool",
        }
    }
}

impl std::fmt::Display for LineFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
