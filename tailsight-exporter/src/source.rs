//! One monitored log file: tailer, parser and store wired together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tailsight_common::{LineFormat, LineParser};
use tailsight_tailer::{LogTailer, TailerConfig, TailerCounters};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::clock::SharedClock;
use crate::config::{ExporterConfig, SourceConfig};
use crate::render::{RenderContext, render};
use crate::store::MetricsStore;

/// Per-source pipeline statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Lines handed to the parser.
    pub lines: u64,
    /// Lines the parser rejected.
    pub unparsed: u64,
    /// Rotations detected by the tailer.
    pub rotations: u64,
    /// Open attempts that found no file.
    pub open_failures: u64,
    /// Successful file opens.
    pub opens: u64,
}

#[derive(Debug, Default)]
struct IngestStats {
    lines: u64,
    unparsed: u64,
}

/// A log source and the store it feeds.
pub struct Source {
    name: String,
    path: PathBuf,
    parser: LineParser,
    store: MetricsStore,
    context: RenderContext,
    tailer_config: TailerConfig,
    counters: Arc<TailerCounters>,
    stats: RwLock<IngestStats>,
}

impl Source {
    /// Build a source from its configuration.
    pub fn from_config(source: &SourceConfig, config: &ExporterConfig, clock: SharedClock) -> Self {
        let parser = LineParser::new(source.format)
            .with_required_substrings(source.require_substrings.clone());
        let store = MetricsStore::for_format(source.format, &config.window, clock);
        let context = RenderContext::new(
            source.prefix(),
            &source.labels,
            &config.prometheus.default_labels,
        );

        Self {
            name: source.name.clone(),
            path: source.path.clone(),
            parser,
            store,
            context,
            tailer_config: source.tailer_config(&config.tailer),
            counters: Arc::new(TailerCounters::default()),
            stats: RwLock::new(IngestStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> LineFormat {
        self.parser.format()
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    /// Create the tailer for this source. Its counters feed [`Source::stats`].
    pub fn tailer(&self) -> LogTailer {
        LogTailer::with_counters(
            self.path.clone(),
            self.tailer_config.clone(),
            self.counters.clone(),
        )
    }

    /// Parse one line and apply it to the store.
    ///
    /// Returns `true` if the line produced an event.
    pub fn ingest(&self, line: &str) -> bool {
        let event = self.parser.parse(line);

        let mut stats = self.stats.write();
        stats.lines += 1;
        let Some(event) = event else {
            stats.unparsed += 1;
            trace!(source = %self.name, line = %line, "Skipping unparseable line");
            return false;
        };
        drop(stats);

        if !self.store.apply(&event) {
            debug!(source = %self.name, format = %event.format(), "Event does not match store");
            return false;
        }
        true
    }

    /// Tail the file until shutdown, feeding every line into the store.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let tailer = self.tailer();
        tailer
            .run(
                |line| {
                    self.ingest(&line);
                },
                shutdown,
            )
            .await;
    }

    /// Render this source's metrics block.
    pub fn render(&self) -> String {
        render(&self.store.snapshot(), &self.context)
    }

    pub fn stats(&self) -> SourceStats {
        let tailer = self.counters.snapshot();
        let stats = self.stats.read();
        SourceStats {
            lines: stats.lines,
            unparsed: stats.unparsed,
            rotations: tailer.rotations,
            open_failures: tailer.open_failures,
            opens: tailer.opens,
        }
    }

    /// Whether the tailer has opened the file at least once.
    pub fn is_ready(&self) -> bool {
        self.counters.snapshot().opens > 0
    }
}
