//! cairn-core library.
//!
//! Activity log compaction, feed and notification grouping, and
//! notification composition for the cairn crag database.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types where appropriate.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod compact;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod group;
pub mod i18n;
pub mod media;
pub mod model;
pub mod notify;
pub mod resolve;
