//! Rotation-aware log file tailer for TailSight.
//!
//! [`LogTailer`] follows an append-only log file by path and delivers each
//! complete line exactly once while the process runs, surviving:
//!
//! - rename-and-recreate rotation (detected through the file's identity)
//! - delete-and-recreate
//! - in-place truncation (`copytruncate`)
//! - the file being absent for a while
//!
//! # Usage
//!
//! ```ignore
//! use tailsight_tailer::{LogTailer, TailerConfig};
//!
//! let tailer = LogTailer::new("/var/log/app/request.log", TailerConfig::default());
//! tailer.run(|line| println!("{line}"), shutdown_rx).await;
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod tailer;

pub use config::TailerConfig;
pub use error::{Result, TailError};
pub use identity::FileIdentity;
pub use tailer::{LogTailer, TailEvent, TailState, TailerCounters, TailerStats};
