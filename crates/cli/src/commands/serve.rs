use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use paydesk_core::AppConfigTrait;
use paydesk_http::{
    router, serve, DependencyDiscovery, DependencyProbe, HealthState, HttpConfig, HttpError,
    HttpResult, PostgresProbe,
};
use sqlx::postgres::PgPoolOptions;

use super::Context;

/// Probes configured from the process environment.
///
/// Without a database URL the dependency set cannot be determined, which the
/// readiness endpoint reports as an error rather than as an empty, ready set.
struct EnvironmentDiscovery {
    postgres: Option<Arc<dyn DependencyProbe>>,
}

impl EnvironmentDiscovery {
    fn from_context(context: &Context) -> anyhow::Result<Self> {
        let postgres = match &context.app.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(context.app.db_max_connections)
                    .connect_lazy(url)
                    .context("invalid DATABASE_URL")?;
                Some(Arc::new(PostgresProbe::new(pool)) as Arc<dyn DependencyProbe>)
            }
            None => None,
        };
        Ok(Self { postgres })
    }
}

#[async_trait]
impl DependencyDiscovery for EnvironmentDiscovery {
    async fn discover(&self) -> HttpResult<Vec<Arc<dyn DependencyProbe>>> {
        match &self.postgres {
            Some(probe) => Ok(vec![probe.clone()]),
            None => Err(HttpError::discovery("DATABASE_URL is not set")),
        }
    }
}

/// Serve the probe endpoints until interrupted
pub async fn run(context: &Context) -> anyhow::Result<()> {
    let http_config = HttpConfig::from_env()?;
    let discovery = EnvironmentDiscovery::from_context(context)?;
    if discovery.postgres.is_none() {
        tracing::warn!("DATABASE_URL is not set, readiness will report an error");
    }

    let bind = context.app.bind_address();
    let addr = tokio::net::lookup_host(&bind)
        .await
        .with_context(|| format!("cannot resolve bind address {}", bind))?
        .next()
        .with_context(|| format!("no address found for {}", bind))?;

    let state = HealthState::new(discovery, http_config.probe_timeout());
    println!("Probe server starting on http://{}", addr);
    serve(addr, router(state, &http_config)).await?;
    Ok(())
}
