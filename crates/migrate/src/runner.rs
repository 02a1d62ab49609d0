//! Migration Runner - Executes migrations against a backend
//!
//! Handles ordering, tracking applied migrations, and batching. Each unit
//! runs in its own scope and its history row is written inside that same
//! scope, so the history reflects exactly the units that completed.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::backends::{MigrationBackend, MigrationTransaction};
use crate::definitions::{
    AppliedMigrationRecord, MigrationConfig, MigrationRunResult, MigrationStatus,
    MigrationStatusEntry, MigrationTarget,
};
use crate::error::{MigrationError, MigrationResult};
use crate::executor::SchemaExecutor;
use crate::graph::DependencyGraph;
use crate::registry::MigrationRegistry;
use crate::unit::{MigrationId, MigrationUnit};

/// Migration runner that applies registered units to a backend
pub struct MigrationRunner<B: MigrationBackend> {
    backend: B,
    registry: MigrationRegistry,
    config: MigrationConfig,
}

impl<B: MigrationBackend> MigrationRunner<B> {
    /// Create a new migration runner with the default configuration
    pub fn new(backend: B, registry: MigrationRegistry) -> Self {
        Self {
            backend,
            registry,
            config: MigrationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Apply every pending unit up to `target`.
    ///
    /// Resolver errors are raised before the lock is taken or any unit runs.
    /// The run lock is released on every path.
    pub async fn run(&self, target: &MigrationTarget) -> MigrationResult<MigrationRunResult> {
        let start_time = Instant::now();

        let graph = DependencyGraph::build(&self.registry)?;
        let order = graph.order()?;
        let scope = &order[..target_len(&order, target)?];

        let lock = self
            .backend
            .acquire_lock(self.config.lock_key, self.config.lock_timeout)
            .await?;
        tracing::debug!(backend = self.backend.name(), "migration lock held");

        let result = self.run_locked(&graph, scope, start_time).await;

        match lock.release().await {
            Ok(()) => result,
            Err(release_err) => match result {
                Ok(_) => Err(release_err),
                Err(err) => {
                    tracing::warn!("failed to release migration lock: {}", release_err);
                    Err(err)
                }
            },
        }
    }

    async fn run_locked(
        &self,
        graph: &DependencyGraph,
        scope: &[MigrationId],
        start_time: Instant,
    ) -> MigrationResult<MigrationRunResult> {
        let table = &self.config.migrations_table;
        self.backend.ensure_history_table(table).await?;

        let records = self.backend.applied_records(table).await?;
        let applied = self.applied_ids(graph, &records)?;

        let pending: Vec<&MigrationUnit> = scope
            .iter()
            .filter(|id| !applied.contains(*id))
            .filter_map(|id| self.registry.get(id))
            .collect();
        let skipped_count = scope.len() - pending.len();

        if pending.is_empty() {
            tracing::info!(skipped = skipped_count, "no pending migrations");
            return Ok(MigrationRunResult {
                applied: Vec::new(),
                skipped_count,
                batch: None,
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        }

        let batch = records.iter().map(|r| r.batch).max().unwrap_or(0) + 1;
        let executor = SchemaExecutor::new(self.config.verification);
        tracing::info!(pending = pending.len(), batch, "running migrations");

        let mut applied_ids = Vec::with_capacity(pending.len());
        for unit in pending {
            self.apply_unit(unit, batch, &executor).await?;
            applied_ids.push(unit.id().clone());
        }

        let execution_time_ms = start_time.elapsed().as_millis();
        tracing::info!(
            applied = applied_ids.len(),
            batch,
            elapsed_ms = execution_time_ms as u64,
            "migrations complete"
        );

        Ok(MigrationRunResult {
            applied: applied_ids,
            skipped_count,
            batch: Some(batch),
            execution_time_ms,
        })
    }

    /// Apply a single unit and record it in the same scope
    async fn apply_unit(
        &self,
        unit: &MigrationUnit,
        batch: i32,
        executor: &SchemaExecutor,
    ) -> MigrationResult<()> {
        let started = Instant::now();
        let id = unit.id().as_str();
        let description = unit.description();
        let completed = unit.steps().len();

        tracing::info!(
            migration = id,
            namespace = %unit.namespace(),
            batch,
            atomic = unit.is_atomic(),
            "applying migration: {}",
            description
        );
        if unit.has_unsafe_steps() {
            tracing::warn!(migration = id, "migration contains raw SQL steps");
        }

        let mut tx = self
            .backend
            .begin(unit.is_atomic(), self.config.statement_timeout)
            .await
            .map_err(|e| e.for_unit(id, description, 0))?;

        let applied = unit.apply(tx.editor(), executor).await;
        let outcome = match applied {
            Ok(()) => tx
                .record_applied(
                    &self.config.migrations_table,
                    &AppliedMigrationRecord::for_unit(unit, batch),
                )
                .await
                .map_err(|e| e.for_unit(id, description, completed)),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| e.for_unit(id, description, completed))?;
                tracing::info!(
                    migration = id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "migration applied"
                );
                Ok(())
            }
            Err(err) => {
                rollback(tx, id).await;
                tracing::error!(migration = id, error = %err, "migration failed");
                Err(err)
            }
        }
    }

    fn applied_ids(
        &self,
        graph: &DependencyGraph,
        records: &[AppliedMigrationRecord],
    ) -> MigrationResult<HashSet<MigrationId>> {
        let applied: HashSet<MigrationId> = records.iter().map(|r| r.id.clone()).collect();
        for record in records {
            if !self.registry.contains(&record.id) {
                tracing::warn!(
                    migration = %record.id,
                    "applied migration is not in the registry"
                );
            }
        }
        graph.check_history(&applied)?;
        Ok(applied)
    }

    /// Every known unit in resolved order with its state
    pub async fn status(&self) -> MigrationResult<Vec<MigrationStatusEntry>> {
        let order = DependencyGraph::build(&self.registry)?.order()?;
        let table = &self.config.migrations_table;
        self.backend.ensure_history_table(table).await?;

        let records: HashMap<MigrationId, AppliedMigrationRecord> = self
            .backend
            .applied_records(table)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        Ok(order
            .iter()
            .filter_map(|id| self.registry.get(id))
            .map(|unit| MigrationStatusEntry {
                id: unit.id().clone(),
                namespace: unit.namespace().clone(),
                description: unit.description().to_string(),
                status: match records.get(unit.id()) {
                    Some(record) => MigrationStatus::Applied {
                        applied_at: record.applied_at,
                        batch: record.batch,
                    },
                    None => MigrationStatus::Pending,
                },
            })
            .collect())
    }

    /// Units `run(target)` would apply, without applying them
    pub async fn plan(&self, target: &MigrationTarget) -> MigrationResult<Vec<&MigrationUnit>> {
        let graph = DependencyGraph::build(&self.registry)?;
        let order = graph.order()?;
        let scope = &order[..target_len(&order, target)?];

        let table = &self.config.migrations_table;
        self.backend.ensure_history_table(table).await?;
        let records = self.backend.applied_records(table).await?;
        let applied = self.applied_ids(&graph, &records)?;

        Ok(scope
            .iter()
            .filter(|id| !applied.contains(*id))
            .filter_map(|id| self.registry.get(id))
            .collect())
    }

    /// Rendered SQL for one unit
    pub fn sql_for(&self, id: &MigrationId) -> MigrationResult<Vec<String>> {
        self.registry
            .get(id)
            .map(MigrationUnit::sql_preview)
            .ok_or_else(|| MigrationError::UnknownMigration(id.to_string()))
    }
}

async fn rollback(tx: Box<dyn MigrationTransaction>, id: &str) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(migration = id, "rollback failed: {}", err);
    }
}

/// Length of the resolved-order prefix a target covers
fn target_len(order: &[MigrationId], target: &MigrationTarget) -> MigrationResult<usize> {
    match target {
        MigrationTarget::Latest => Ok(order.len()),
        MigrationTarget::Until(id) => order
            .iter()
            .position(|candidate| candidate == id)
            .map(|index| index + 1)
            .ok_or_else(|| MigrationError::UnknownMigration(id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<MigrationId> {
        raw.iter().map(|id| MigrationId::new(id).unwrap()).collect()
    }

    #[test]
    fn test_target_prefix() {
        let order = ids(&["20240101_000000_a", "20240102_000000_b", "20240103_000000_c"]);
        assert_eq!(target_len(&order, &MigrationTarget::Latest).unwrap(), 3);
        assert_eq!(
            target_len(
                &order,
                &MigrationTarget::Until(MigrationId::new("20240102_000000_b").unwrap())
            )
            .unwrap(),
            2
        );
        assert!(matches!(
            target_len(
                &order,
                &MigrationTarget::Until(MigrationId::new("20240104_000000_d").unwrap())
            ),
            Err(MigrationError::UnknownMigration(_))
        ));
    }
}
