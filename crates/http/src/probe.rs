//! Dependency probes used by the readiness endpoint

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::{HttpError, HttpResult};

/// A downstream service the process needs in order to serve traffic
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Key the result is reported under
    fn name(&self) -> &str;

    /// A short description of the live service, usually its version
    async fn check(&self) -> HttpResult<String>;
}

/// Finds the probes to run for one readiness request
#[async_trait]
pub trait DependencyDiscovery: Send + Sync {
    async fn discover(&self) -> HttpResult<Vec<Arc<dyn DependencyProbe>>>;
}

/// A fixed probe list
#[derive(Clone, Default)]
pub struct StaticDiscovery {
    probes: Vec<Arc<dyn DependencyProbe>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe<P: DependencyProbe + 'static>(mut self, probe: P) -> Self {
        self.probes.push(Arc::new(probe));
        self
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

#[async_trait]
impl DependencyDiscovery for StaticDiscovery {
    async fn discover(&self) -> HttpResult<Vec<Arc<dyn DependencyProbe>>> {
        Ok(self.probes.clone())
    }
}

/// Reports the PostgreSQL server version
#[derive(Debug, Clone)]
pub struct PostgresProbe {
    pool: PgPool,
}

impl PostgresProbe {
    pub const NAME: &'static str = "postgres";

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyProbe for PostgresProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn check(&self) -> HttpResult<String> {
        sqlx::query_scalar::<_, String>("SELECT version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HttpError::probe(Self::NAME, e.to_string()))
    }
}
