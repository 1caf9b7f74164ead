//! Prometheus text exposition of store snapshots.
//!
//! Rendering is a pure function of a snapshot and a [`RenderContext`]: the
//! same inputs always give byte-identical output. Families are written in a
//! fixed order, dimension keys in their snapshot order (sorted for status
//! codes) and labels sorted by name.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::io::Write;

use crate::mapping::{PrometheusType, build_metric_name, sanitize_label_name, sanitize_metric_name};
use crate::source::SourceStats;
use crate::store::{PoolSnapshot, RequestSnapshot, StoreSnapshot};

/// Prefix of the exporter's own metrics.
pub const SELF_METRICS_PREFIX: &str = "tailsight_exporter";

/// Naming and labelling applied to every series of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    prefix: String,
    /// Sanitized, sorted by name.
    labels: Vec<(String, String)>,
}

impl RenderContext {
    /// Build a context. Source labels override default labels of the same name.
    pub fn new(
        prefix: &str,
        labels: &HashMap<String, String>,
        default_labels: &HashMap<String, String>,
    ) -> Self {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (k, v) in default_labels {
            merged.insert(sanitize_label_name(k), v.clone());
        }
        for (k, v) in labels {
            merged.insert(sanitize_label_name(k), v.clone());
        }

        Self {
            prefix: sanitize_metric_name(prefix),
            labels: merged.into_iter().collect(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }
}

/// Render one source's snapshot.
pub fn render(snapshot: &StoreSnapshot, ctx: &RenderContext) -> String {
    let mut exposition = Exposition::new(ctx);
    match snapshot {
        StoreSnapshot::Request(request) => render_request(&mut exposition, request),
        StoreSnapshot::Pool(pool) => render_pool(&mut exposition, pool),
    }
    exposition.finish()
}

fn render_request(out: &mut Exposition<'_>, snapshot: &RequestSnapshot) {
    let window = snapshot.window_secs;

    let name = out.family(
        "status_codes_total",
        PrometheusType::Gauge,
        &format!("Requests per HTTP status code in the last {}s window", window),
    );
    for (code, count) in &snapshot.status {
        out.sample(&name, Some(("code", code.as_str())), count);
    }

    let name = out.family(
        "request_duration_seconds",
        PrometheusType::Gauge,
        &format!("Requests per latency tier in the last {}s window", window),
    );
    for (tier, count) in &snapshot.latency {
        out.sample(&name, Some(("tier", tier.as_str())), count);
    }

    let name = out.family(
        "traffic_bytes",
        PrometheusType::Gauge,
        &format!("Bytes transferred in the last {}s window", window),
    );
    out.sample(&name, Some(("direction", "upload")), snapshot.upload_bytes);
    out.sample(
        &name,
        Some(("direction", "download")),
        snapshot.download_bytes,
    );

    let name = out.family(
        "requests_in_window",
        PrometheusType::Gauge,
        &format!("Requests in the last {}s window", window),
    );
    out.sample(&name, None, snapshot.requests_in_window);

    let name = out.family(
        "requests_total",
        PrometheusType::Counter,
        "Requests seen since exporter start",
    );
    out.sample(&name, None, snapshot.requests_total);

    let name = out.family(
        "status_codes_dropped_total",
        PrometheusType::Counter,
        "Requests whose status code exceeded the tracked code limit",
    );
    out.sample(&name, None, snapshot.dropped_status_codes);

    timestamp_family(out, snapshot.taken_at_millis);
}

fn render_pool(out: &mut Exposition<'_>, snapshot: &PoolSnapshot) {
    let name = out.family(
        "current",
        PrometheusType::Gauge,
        "Connections currently allocated",
    );
    out.sample(&name, None, snapshot.current);

    let name = out.family("max", PrometheusType::Gauge, "Connection pool capacity");
    out.sample(&name, None, snapshot.max);

    let name = out.family(
        "usage_percentage",
        PrometheusType::Gauge,
        "Connection pool usage in percent",
    );
    out.sample(
        &name,
        None,
        format!("{:.2}", snapshot.usage_percentage()),
    );

    let name = out.family(
        "available",
        PrometheusType::Gauge,
        "Connections still available in the pool",
    );
    out.sample(&name, None, snapshot.available());

    if let Some(updated) = snapshot.last_updated_millis {
        let name = out.family(
            "last_update_timestamp_seconds",
            PrometheusType::Gauge,
            "Unix time of the last pool sample",
        );
        out.sample(&name, None, format_millis(updated));
    }

    timestamp_family(out, snapshot.taken_at_millis);
}

fn timestamp_family(out: &mut Exposition<'_>, taken_at_millis: i64) {
    let name = out.family(
        "metrics_timestamp",
        PrometheusType::Gauge,
        "Unix time these metrics were produced",
    );
    out.sample(&name, None, format_millis(taken_at_millis));
}

/// Render the exporter's own per-source counters.
pub fn render_self_metrics(sources: &[(&str, SourceStats)]) -> String {
    let ctx = RenderContext::new(SELF_METRICS_PREFIX, &HashMap::new(), &HashMap::new());
    let mut out = Exposition::new(&ctx);

    let families: [(&str, &str, fn(&SourceStats) -> u64); 4] = [
        ("lines_total", "Complete lines read per source", |s: &SourceStats| s.lines),
        (
            "lines_unparsed_total",
            "Lines that did not match the source format",
            |s: &SourceStats| s.unparsed,
        ),
        ("rotations_total", "Log rotations detected", |s: &SourceStats| s.rotations),
        (
            "file_open_failures_total",
            "Attempts to open a missing log file",
            |s: &SourceStats| s.open_failures,
        ),
    ];

    for (suffix, help, value) in families {
        let name = out.family(suffix, PrometheusType::Counter, help);
        for (source, stats) in sources {
            out.sample(&name, Some(("source", *source)), value(stats));
        }
    }

    out.finish()
}

/// Accumulates one exposition block.
struct Exposition<'a> {
    ctx: &'a RenderContext,
    output: Vec<u8>,
    families: usize,
}

impl<'a> Exposition<'a> {
    fn new(ctx: &'a RenderContext) -> Self {
        Self {
            ctx,
            output: Vec::with_capacity(2048),
            families: 0,
        }
    }

    /// Start a family and return its full metric name.
    fn family(&mut self, suffix: &str, kind: PrometheusType, help: &str) -> String {
        let name = build_metric_name(&self.ctx.prefix, suffix);
        if self.families > 0 {
            writeln!(self.output).ok();
        }
        writeln!(self.output, "# HELP {} {}", name, help).ok();
        writeln!(self.output, "# TYPE {} {}", name, kind.as_str()).ok();
        self.families += 1;
        name
    }

    fn sample(&mut self, name: &str, label: Option<(&str, &str)>, value: impl Display) {
        let mut labels: Vec<(&str, &str)> = self
            .ctx
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .filter(|(k, _)| label.is_none_or(|(own, _)| own != *k))
            .collect();
        if let Some(label) = label {
            labels.push(label);
            labels.sort_by(|a, b| a.0.cmp(b.0));
        }

        writeln!(self.output, "{}{} {}", name, format_labels(&labels), value).ok();
    }

    fn finish(self) -> String {
        String::from_utf8(self.output).unwrap_or_default()
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

fn format_millis(millis: i64) -> String {
    format_value(millis as f64 / 1000.0)
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
