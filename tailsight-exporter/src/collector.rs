//! Registry of all sources, rendered together for each scrape.

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::ExporterConfig;
use crate::render::render_self_metrics;
use crate::source::{Source, SourceStats};

/// All configured sources.
pub struct MetricCollector {
    sources: Vec<Arc<Source>>,
}

impl MetricCollector {
    pub fn new(sources: Vec<Arc<Source>>) -> Self {
        Self { sources }
    }

    /// Build one source per configured log file.
    pub fn from_config(config: &ExporterConfig, clock: SharedClock) -> Self {
        let sources = config
            .sources
            .iter()
            .map(|source| Arc::new(Source::from_config(source, config, clock.clone())))
            .collect();
        Self::new(sources)
    }

    pub fn sources(&self) -> &[Arc<Source>] {
        &self.sources
    }

    pub fn source(&self, name: &str) -> Option<&Arc<Source>> {
        self.sources.iter().find(|source| source.name() == name)
    }

    /// Statistics for every source, in configuration order.
    pub fn stats(&self) -> Vec<(String, SourceStats)> {
        self.sources
            .iter()
            .map(|source| (source.name().to_string(), source.stats()))
            .collect()
    }

    /// Ready once every source has opened its file.
    pub fn is_ready(&self) -> bool {
        self.sources.iter().all(|source| source.is_ready())
    }

    /// Render every source block followed by the exporter's own metrics.
    pub fn render(&self) -> String {
        let stats = self.stats();
        let self_stats: Vec<(&str, SourceStats)> = stats
            .iter()
            .map(|(name, stats)| (name.as_str(), *stats))
            .collect();

        let mut blocks: Vec<String> = self.sources.iter().map(|source| source.render()).collect();
        blocks.push(render_self_metrics(&self_stats));
        blocks.join("\n")
    }
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<MetricCollector>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SourceConfig;
    use tailsight_common::LineFormat;

    fn make_collector() -> MetricCollector {
        let config = ExporterConfig {
            sources: vec![
                SourceConfig::new("requests", "/nonexistent/request.log", LineFormat::Request),
                SourceConfig::new("pool", "/nonexistent/pool.log", LineFormat::Pool),
            ],
            ..Default::default()
        };
        MetricCollector::from_config(&config, Arc::new(ManualClock::new(30_000)))
    }

    #[test]
    fn test_collector_render() {
        let collector = make_collector();
        collector
            .source("requests")
            .unwrap()
            .ingest("1|2|3|4|POST|/x|201|100|0|20");
        collector
            .source("pool")
            .unwrap()
            .ingest("total allocated: 3 of 10");

        let output = collector.render();

        assert!(output.contains("artifactory_status_codes_total{code=\"201\"} 1\n"));
        assert!(output.contains("s3_connection_current 3\n"));
        assert!(output.contains("tailsight_exporter_lines_total{source=\"requests\"} 1\n"));
        assert!(output.contains("tailsight_exporter_lines_total{source=\"pool\"} 1\n"));

        let request_block = output.find("artifactory_status_codes_total").unwrap();
        let pool_block = output.find("s3_connection_current").unwrap();
        let self_block = output.find("tailsight_exporter_lines_total").unwrap();
        assert!(request_block < pool_block && pool_block < self_block);
        assert!(output.contains("artifactory_metrics_timestamp 30\n\n# HELP s3_connection_current"));
    }

    #[test]
    fn test_collector_lookup() {
        let collector = make_collector();

        assert_eq!(collector.sources().len(), 2);
        assert_eq!(
            collector.source("pool").map(|s| s.format()),
            Some(LineFormat::Pool)
        );
        assert!(collector.source("missing").is_none());
    }

    #[test]
    fn test_collector_not_ready_without_files() {
        let collector = make_collector();
        assert!(!collector.is_ready());
    }
}
