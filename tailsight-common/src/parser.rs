//! Log line parser for the request and connection pool log formats.
//!
//! Parsing never fails loudly: a line either yields a best-effort
//! [`LogEvent`] or `None` when it does not match the expected schema.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::event::{LineFormat, LogEvent, PoolSample, RequestEvent};

/// Minimum number of `|`-separated fields in a request line.
pub const REQUEST_MIN_FIELDS: usize = 10;

const METHOD_FIELD: usize = 4;
const STATUS_FIELD: usize = 6;
const UPLOAD_FIELD: usize = 7;
const DOWNLOAD_FIELD: usize = 8;
const DURATION_FIELD: usize = 9;

/// Placeholder the upstream server writes when a byte count is unknown.
pub const UNKNOWN_SENTINEL: &str = "-1";

// Pool pattern: "... total allocated: 12 of 50 ..."
static POOL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"total allocated: (\d+) of (\d+)").unwrap());

/// Normalize a numeric log field to a non-negative count.
///
/// | input                          | result     |
/// |--------------------------------|------------|
/// | non-negative integer           | the number |
/// | `-1` (unknown sentinel)        | `0`        |
/// | anything else (`-7`, `abc`, `` , overflow) | `0` |
///
/// Surrounding whitespace is ignored.
pub fn normalize_count(field: &str) -> u64 {
    let field = field.trim();
    if field == UNKNOWN_SENTINEL {
        return 0;
    }
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }
    field.parse().unwrap_or(0)
}

/// Parse one pipe-separated request line.
///
/// Returns `None` if the line has fewer than [`REQUEST_MIN_FIELDS`] fields
/// or carries no status code. Numeric fields are normalized with
/// [`normalize_count`] rather than rejected.
pub fn parse_request(line: &str) -> Option<RequestEvent> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    if fields.len() < REQUEST_MIN_FIELDS {
        return None;
    }

    let status_code = fields[STATUS_FIELD].trim();
    if status_code.is_empty() {
        return None;
    }

    Some(RequestEvent {
        method: fields[METHOD_FIELD].trim().to_string(),
        status_code: status_code.to_string(),
        upload_bytes: normalize_count(fields[UPLOAD_FIELD]),
        download_bytes: normalize_count(fields[DOWNLOAD_FIELD]),
        duration_ms: normalize_count(fields[DURATION_FIELD]),
    })
}

/// Parse a connection pool allocation line.
///
/// Every entry of `require_substrings` must occur in the line as well.
/// A pool capacity of zero is treated as garbage.
pub fn parse_pool_sample<S: AsRef<str>>(
    line: &str,
    require_substrings: &[S],
) -> Option<PoolSample> {
    if !line.contains("total allocated:") {
        return None;
    }
    if !require_substrings.iter().all(|s| line.contains(s.as_ref())) {
        return None;
    }

    let caps = POOL_REGEX.captures(line)?;
    let current: u64 = caps.get(1)?.as_str().parse().ok()?;
    let max: u64 = caps.get(2)?.as_str().parse().ok()?;
    if max == 0 {
        return None;
    }

    Some(PoolSample { current, max })
}

/// Parser bound to one log source's format.
#[derive(Debug, Clone)]
pub struct LineParser {
    format: LineFormat,
    require_substrings: Vec<String>,
}

impl LineParser {
    /// Create a parser for the given format.
    pub fn new(format: LineFormat) -> Self {
        Self {
            format,
            require_substrings: Vec::new(),
        }
    }

    /// Require additional substrings on pool lines.
    pub fn with_required_substrings(mut self, substrings: Vec<String>) -> Self {
        self.require_substrings = substrings;
        self
    }

    /// The format this parser accepts.
    pub fn format(&self) -> LineFormat {
        self.format
    }

    /// Parse one raw line. `None` means the line is not parseable.
    pub fn parse(&self, line: &str) -> Option<LogEvent> {
        match self.format {
            LineFormat::Request => parse_request(line).map(LogEvent::Request),
            LineFormat::Pool => parse_pool_sample(line, self.require_substrings.as_slice())
                .map(LogEvent::PoolSample),
        }
    }
}
