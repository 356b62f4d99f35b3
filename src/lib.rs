// Traffic Report
// Resilient query-and-report pipeline for labeled network-traffic statistics

pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod demo;
pub mod dispatch;
pub mod export;
pub mod logging;
pub mod observer;
pub mod pipeline;
pub mod query;
pub mod report;

pub use config::{ConfigError, ReportConfig};
pub use db::{ConnectionConfig, DatabaseType, DriverRegistry, SessionManager};
pub use dispatch::Dispatcher;
pub use export::{default_targets, OutputPolicy, RenderTarget};
pub use observer::{RunObserver, TracingObserver};
pub use pipeline::{Pipeline, PipelineError};
pub use query::{Catalogue, ResultSet, TabularResult};
pub use report::ReportRun;
