//! Dependency & Ordering Resolver
//!
//! Edges come from explicit `depends_on` declarations plus the implicit
//! dependency of every unit on the unit immediately before it (by id) in the
//! same namespace. The order is a topological sort with ties broken by
//! ascending id, so the same registry always resolves to the same sequence.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet};

use crate::error::{MigrationError, MigrationResult};
use crate::registry::MigrationRegistry;
use crate::unit::{MigrationId, MigrationUnit};

/// Resolved dependency graph over every registered unit
#[derive(Debug)]
pub struct DependencyGraph {
    /// unit -> the units it depends on
    dependencies: BTreeMap<MigrationId, BTreeSet<MigrationId>>,
}

impl DependencyGraph {
    /// Build the graph, failing on dependencies that name no known unit
    pub fn build(registry: &MigrationRegistry) -> MigrationResult<Self> {
        let mut dependencies: BTreeMap<MigrationId, BTreeSet<MigrationId>> = BTreeMap::new();

        for namespace in registry.namespaces() {
            let mut previous: Option<&MigrationUnit> = None;
            for unit in registry.units_in(namespace) {
                let deps = dependencies.entry(unit.id().clone()).or_default();
                if let Some(previous) = previous {
                    deps.insert(previous.id().clone());
                }
                previous = Some(unit);
            }
        }

        for unit in registry.units() {
            for dependency in unit.dependencies() {
                if !registry.contains(dependency) {
                    return Err(MigrationError::UnknownDependency {
                        unit: unit.id().to_string(),
                        dependency: dependency.to_string(),
                    });
                }
                dependencies
                    .entry(unit.id().clone())
                    .or_default()
                    .insert(dependency.clone());
            }
        }

        Ok(Self { dependencies })
    }

    pub fn dependencies_of(&self, id: &MigrationId) -> Option<&BTreeSet<MigrationId>> {
        self.dependencies.get(id)
    }

    /// Topological order using Kahn's algorithm, smallest ready id first
    pub fn order(&self) -> MigrationResult<Vec<MigrationId>> {
        let mut in_degree: BTreeMap<&MigrationId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&MigrationId, Vec<&MigrationId>> = BTreeMap::new();

        for (unit, deps) in &self.dependencies {
            in_degree.insert(unit, deps.len());
            for dependency in deps {
                dependents.entry(dependency).or_default().push(unit);
            }
        }

        let mut ready: BinaryHeap<Reverse<&MigrationId>> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut result = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(current)) = ready.pop() {
            result.push(current.clone());
            if let Some(next) = dependents.get(current) {
                for dependent in next {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(Reverse(*dependent));
                        }
                    }
                }
            }
        }

        if result.len() != self.dependencies.len() {
            let cycle = self.find_cycle();
            return Err(MigrationError::CycleDetected {
                cycle: cycle.join(" -> "),
            });
        }

        Ok(result)
    }

    /// Every applied unit must have all of its dependencies applied too
    pub fn check_history(&self, applied: &HashSet<MigrationId>) -> MigrationResult<()> {
        for (unit, deps) in &self.dependencies {
            if !applied.contains(unit) {
                continue;
            }
            if let Some(missing) = deps.iter().find(|dep| !applied.contains(*dep)) {
                return Err(MigrationError::InconsistentHistory {
                    applied: unit.to_string(),
                    dependency: missing.to_string(),
                });
            }
        }
        Ok(())
    }

    fn find_cycle(&self) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();

        for unit in self.dependencies.keys() {
            if !visited.contains(unit) {
                if let Some(cycle) = self.dfs_cycle(unit, &mut visited, &mut on_stack, &mut path) {
                    return cycle;
                }
            }
        }
        Vec::new()
    }

    fn dfs_cycle<'a>(
        &'a self,
        current: &'a MigrationId,
        visited: &mut HashSet<&'a MigrationId>,
        on_stack: &mut HashSet<&'a MigrationId>,
        path: &mut Vec<&'a MigrationId>,
    ) -> Option<Vec<String>> {
        visited.insert(current);
        on_stack.insert(current);
        path.push(current);

        if let Some(deps) = self.dependencies.get(current) {
            for dep in deps {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, on_stack, path) {
                        return Some(cycle);
                    }
                } else if on_stack.contains(dep) {
                    if let Some(start) = path.iter().position(|id| *id == dep) {
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|id| id.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Some(cycle);
                    }
                }
            }
        }

        on_stack.remove(current);
        path.pop();
        None
    }
}

/// Resolve the full apply order of a registry
pub fn resolve_order(registry: &MigrationRegistry) -> MigrationResult<Vec<MigrationId>> {
    DependencyGraph::build(registry)?.order()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(ns: &str, id: &str, deps: &[&str]) -> MigrationUnit {
        deps.iter()
            .fold(MigrationUnit::builder(ns, id, id), |b, d| b.depends_on(d))
            .build()
            .unwrap()
    }

    fn registry(units: Vec<MigrationUnit>) -> MigrationRegistry {
        let mut registry = MigrationRegistry::new();
        for u in units {
            registry.register(u).unwrap();
        }
        registry
    }

    fn ids(order: &[MigrationId]) -> Vec<&str> {
        order.iter().map(|id| id.as_str()).collect()
    }

    #[test]
    fn test_namespace_chain_and_cross_namespace_dependency() {
        let registry = registry(vec![
            unit("user_data", "20240101_000000_user_profile", &["20240201_000000_merchant_email"]),
            unit("merchant_data", "20240105_000000_merchant", &[]),
            unit("merchant_data", "20240201_000000_merchant_email", &[]),
            unit("user_data", "20240301_000000_user_avatar", &[]),
        ]);
        let order = resolve_order(&registry).unwrap();
        assert_eq!(
            ids(&order),
            vec![
                "20240105_000000_merchant",
                "20240201_000000_merchant_email",
                "20240101_000000_user_profile",
                "20240301_000000_user_avatar",
            ]
        );
    }

    #[test]
    fn test_ties_broken_by_ascending_id() {
        let registry = registry(vec![
            unit("user_data", "20240102_000000_b", &[]),
            unit("merchant_data", "20240101_000000_a", &[]),
            unit("plan_data", "20240103_000000_c", &[]),
        ]);
        let order = resolve_order(&registry).unwrap();
        assert_eq!(
            ids(&order),
            vec!["20240101_000000_a", "20240102_000000_b", "20240103_000000_c"]
        );
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let registry = registry(vec![
            unit("merchant_data", "20240101_000000_a", &["20240101_000000_b"]),
            unit("user_data", "20240101_000000_b", &["20240101_000000_a"]),
        ]);
        match resolve_order(&registry) {
            Err(MigrationError::CycleDetected { cycle }) => {
                assert!(cycle.contains("20240101_000000_a"));
                assert!(cycle.contains("20240101_000000_b"));
                assert!(cycle.contains(" -> "));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let registry = registry(vec![unit(
            "merchant_data",
            "20240101_000000_a",
            &["20231231_000000_missing"],
        )]);
        assert!(matches!(
            resolve_order(&registry),
            Err(MigrationError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_inconsistent_history() {
        let registry = registry(vec![
            unit("merchant_data", "20240101_000000_a", &[]),
            unit("merchant_data", "20240102_000000_b", &[]),
        ]);
        let graph = DependencyGraph::build(&registry).unwrap();
        let applied: HashSet<MigrationId> =
            [MigrationId::new("20240102_000000_b").unwrap()].into_iter().collect();
        assert!(matches!(
            graph.check_history(&applied),
            Err(MigrationError::InconsistentHistory { .. })
        ));
    }
}
