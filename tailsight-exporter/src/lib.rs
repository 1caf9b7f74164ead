//! Prometheus exporter for metrics extracted from tailed log files.
//!
//! Each configured source follows one log file, parses every new line and
//! aggregates the events into recent time windows. Scrapes render the current
//! window of every source.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Log file   │────>│   Tailer    │────>│   Parser    │────>│    Store    │
//! │ (rotating)  │     │ (per file)  │     │ (per line)  │     │  (windows)  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                                     │
//!                                         ┌─────────────┐     ┌──────v──────┐
//!                                         │ HTTP Server │<────│  Renderer   │
//!                                         │ (/metrics)  │     │             │
//!                                         └─────────────┘     └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! tailsight-exporter --config config.json5
//! tailsight-exporter --request-log /var/log/artifactory/request.log
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod clock;
pub mod collector;
pub mod config;
pub mod http;
pub mod mapping;
pub mod render;
pub mod ring;
pub mod source;
pub mod store;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use collector::{MetricCollector, SharedCollector};
pub use config::{ExporterConfig, SourceConfig, WindowConfig};
pub use http::HttpServer;
pub use render::{RenderContext, render};
pub use ring::RingSeries;
pub use source::{Source, SourceStats};
pub use store::{
    Direction, LatencyTiers, MetricsStore, PoolSnapshot, PoolStore, RequestSnapshot,
    RequestStore, SeriesRef, StoreSnapshot,
};
