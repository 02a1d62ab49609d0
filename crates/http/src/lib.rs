//! # paydesk-http
//!
//! Liveness and readiness endpoints for the paydesk service, backed by
//! pluggable dependency probes.

pub mod config;
pub mod error;
pub mod health;
pub mod probe;
pub mod server;

pub use config::HttpConfig;
pub use error::{HttpError, HttpResult};
pub use health::{HealthState, ReadinessReport, ReadinessStatus};
pub use probe::{DependencyDiscovery, DependencyProbe, PostgresProbe, StaticDiscovery};
pub use server::{router, serve, serve_with_shutdown, LIVE_PATH, READY_PATH};
