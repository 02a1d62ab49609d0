//! Liveness and readiness endpoints
//!
//! Liveness never touches a dependency. Readiness runs every discovered
//! probe and reports each result under the probe's name.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::HttpError;
use crate::probe::DependencyDiscovery;

/// Shared state of the health routes
#[derive(Clone)]
pub struct HealthState {
    discovery: Arc<dyn DependencyDiscovery>,
    probe_timeout: Duration,
}

impl HealthState {
    pub fn new<D: DependencyDiscovery + 'static>(discovery: D, probe_timeout: Duration) -> Self {
        Self {
            discovery: Arc::new(discovery),
            probe_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessStatus {
    Ok,
    Unavailable,
    Error,
}

/// Body of `GET /health/ready`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub status: ReadinessStatus,
    pub services: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /health/live`
pub async fn live() -> StatusCode {
    StatusCode::OK
}

/// `GET /health/ready`
pub async fn ready(State(state): State<HealthState>) -> (StatusCode, Json<ReadinessReport>) {
    let probes = match state.discovery.discover().await {
        Ok(probes) => probes,
        Err(err) => {
            tracing::error!(error = %err, "dependency discovery failed");
            let report = ReadinessReport {
                status: ReadinessStatus::Error,
                services: BTreeMap::new(),
                error: Some(err.to_string()),
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(report));
        }
    };

    let mut services = BTreeMap::new();
    let mut healthy = true;
    for probe in probes {
        let name = probe.name().to_string();
        let outcome = match tokio::time::timeout(state.probe_timeout, probe.check()).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::ProbeTimeout {
                service: name.clone(),
                millis: state.probe_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(detail) => {
                services.insert(name, detail);
            }
            Err(err) => {
                tracing::warn!(service = %name, error = %err, "readiness probe failed");
                healthy = false;
                services.insert(name, err.to_string());
            }
        }
    }

    let (code, status) = if healthy {
        (StatusCode::OK, ReadinessStatus::Ok)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, ReadinessStatus::Unavailable)
    };
    (
        code,
        Json(ReadinessReport {
            status,
            services,
            error: None,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpResult;
    use crate::probe::{DependencyProbe, StaticDiscovery};
    use crate::server::{router, HttpConfig};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct FixedProbe {
        name: &'static str,
        outcome: Result<&'static str, &'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl FixedProbe {
        fn up(name: &'static str, version: &'static str) -> Self {
            Self {
                name,
                outcome: Ok(version),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn down(name: &'static str, reason: &'static str) -> Self {
            Self {
                name,
                outcome: Err(reason),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl DependencyProbe for FixedProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self) -> HttpResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
                .map(str::to_string)
                .map_err(|reason| HttpError::probe(self.name, reason))
        }
    }

    struct SlowProbe;

    #[async_trait]
    impl DependencyProbe for SlowProbe {
        fn name(&self) -> &str {
            "postgres"
        }

        async fn check(&self) -> HttpResult<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("never".to_string())
        }
    }

    struct BrokenDiscovery;

    #[async_trait]
    impl DependencyDiscovery for BrokenDiscovery {
        async fn discover(&self) -> HttpResult<Vec<Arc<dyn DependencyProbe>>> {
            Err(HttpError::discovery("connection pool not configured"))
        }
    }

    fn app<D: DependencyDiscovery + 'static>(discovery: D) -> axum::Router {
        router(
            HealthState::new(discovery, Duration::from_millis(200)),
            &HttpConfig::default(),
        )
    }

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_live_is_empty_and_skips_probes() {
        let probe = FixedProbe::down("postgres", "connection refused");
        let calls = probe.calls.clone();

        let (status, body) = get(app(StaticDiscovery::new().with_probe(probe)), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ready_reports_version() {
        let discovery = StaticDiscovery::new().with_probe(FixedProbe::up(
            "postgres",
            "PostgreSQL 16.2 on x86_64-pc-linux-gnu",
        ));

        let (status, body) = get(app(discovery), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "status": "ok",
                "services": {"postgres": "PostgreSQL 16.2 on x86_64-pc-linux-gnu"}
            })
        );
    }

    #[tokio::test]
    async fn test_ready_unavailable_when_probe_fails() {
        let discovery = StaticDiscovery::new()
            .with_probe(FixedProbe::down("postgres", "connection refused"))
            .with_probe(FixedProbe::up("blob", "ok"));

        let (status, body) = get(app(discovery), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let report: ReadinessReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.status, ReadinessStatus::Unavailable);
        assert!(report.services["postgres"].contains("connection refused"));
        assert_eq!(report.services["blob"], "ok");
    }

    #[tokio::test]
    async fn test_ready_times_out_slow_probe() {
        let discovery = StaticDiscovery::new().with_probe(SlowProbe);

        let (status, body) = get(app(discovery), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let report: ReadinessReport = serde_json::from_slice(&body).unwrap();
        assert!(report.services["postgres"].contains("timed out"));
    }

    #[tokio::test]
    async fn test_ready_discovery_failure_is_500() {
        let (status, body) = get(app(BrokenDiscovery), "/health/ready").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let report: ReadinessReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.status, ReadinessStatus::Error);
        assert!(report.error.unwrap().contains("connection pool not configured"));
    }

    #[tokio::test]
    async fn test_ready_with_no_dependencies() {
        let (status, body) = get(app(StaticDiscovery::new()), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        let report: ReadinessReport = serde_json::from_slice(&body).unwrap();
        assert!(report.services.is_empty());
    }
}
