//! Migration Registry - the catalog of known units across namespaces

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MigrationError, MigrationResult};
use crate::unit::{MigrationId, MigrationUnit, Namespace};

/// Supplies the units of one namespace
pub trait MigrationProvider: Send + Sync {
    fn namespace(&self) -> &str;

    fn migrations(&self) -> MigrationResult<Vec<MigrationUnit>>;
}

/// Every known unit, keyed by id
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    units: BTreeMap<MigrationId, MigrationUnit>,
    namespaces: BTreeSet<Namespace>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, unit: MigrationUnit) -> MigrationResult<()> {
        if self.units.contains_key(unit.id()) {
            return Err(MigrationError::DuplicateMigration(unit.id().to_string()));
        }
        self.namespaces.insert(unit.namespace().clone());
        self.units.insert(unit.id().clone(), unit);
        Ok(())
    }

    /// Register all units of a provider, which must all belong to its namespace
    pub fn register_provider(&mut self, provider: &dyn MigrationProvider) -> MigrationResult<()> {
        let namespace = Namespace::new(provider.namespace())?;
        let units = provider.migrations()?;
        for unit in units {
            if unit.namespace() != &namespace {
                return Err(MigrationError::invalid(format!(
                    "provider '{}' supplied migration {} of namespace '{}'",
                    namespace,
                    unit.id(),
                    unit.namespace()
                )));
            }
            self.register(unit)?;
        }
        tracing::debug!(namespace = %namespace, "migration provider registered");
        Ok(())
    }

    pub fn with_provider(mut self, provider: &dyn MigrationProvider) -> MigrationResult<Self> {
        self.register_provider(provider)?;
        Ok(self)
    }

    pub fn get(&self, id: &MigrationId) -> Option<&MigrationUnit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &MigrationId) -> bool {
        self.units.contains_key(id)
    }

    /// Units in ascending id order
    pub fn units(&self) -> impl Iterator<Item = &MigrationUnit> {
        self.units.values()
    }

    /// Units of one namespace in ascending id order
    pub fn units_in<'a>(
        &'a self,
        namespace: &'a Namespace,
    ) -> impl Iterator<Item = &'a MigrationUnit> + 'a {
        self.units
            .values()
            .filter(move |unit| unit.namespace() == namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, Vec<(&'static str, &'static str)>);

    impl MigrationProvider for Fixed {
        fn namespace(&self) -> &str {
            self.0
        }

        fn migrations(&self) -> MigrationResult<Vec<MigrationUnit>> {
            self.1
                .iter()
                .map(|(ns, id)| MigrationUnit::builder(ns, id, "test").build())
                .collect()
        }
    }

    #[test]
    fn test_duplicate_ids_rejected_across_namespaces() {
        let mut registry = MigrationRegistry::new();
        registry
            .register_provider(&Fixed("merchant_data", vec![("merchant_data", "20240101_000000_a")]))
            .unwrap();
        let err = registry
            .register_provider(&Fixed("user_data", vec![("user_data", "20240101_000000_a")]))
            .unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateMigration(_)));
    }

    #[test]
    fn test_provider_namespace_must_match() {
        let mut registry = MigrationRegistry::new();
        let err = registry
            .register_provider(&Fixed("merchant_data", vec![("user_data", "20240101_000000_a")]))
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDefinition(_)));
    }

    #[test]
    fn test_units_are_id_ordered() {
        let registry = MigrationRegistry::new()
            .with_provider(&Fixed(
                "merchant_data",
                vec![
                    ("merchant_data", "20240301_000000_c"),
                    ("merchant_data", "20240101_000000_a"),
                ],
            ))
            .unwrap();
        let ids: Vec<&str> = registry.units().map(|u| u.id().as_str()).collect();
        assert_eq!(ids, vec!["20240101_000000_a", "20240301_000000_c"]);
        assert_eq!(registry.namespaces().count(), 1);
    }
}
