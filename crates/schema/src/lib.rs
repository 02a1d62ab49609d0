//! # paydesk-schema
//!
//! The migration catalog of the merchant data layer. Each namespace is a
//! [`MigrationProvider`]; [`registry`] collects all of them.

pub mod merchant_data;
pub mod user_data;

use paydesk_migrate::{MigrationProvider, MigrationRegistry, MigrationResult};

pub use merchant_data::MerchantDataMigrations;
pub use user_data::UserDataMigrations;

pub const MERCHANT_DATA: &str = "merchant_data";
pub const USER_DATA: &str = "user_data";

/// Every namespace's provider, in registration order
pub fn providers() -> Vec<Box<dyn MigrationProvider>> {
    vec![Box::new(MerchantDataMigrations), Box::new(UserDataMigrations)]
}

/// Registry holding the complete catalog
pub fn registry() -> MigrationResult<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    for provider in providers() {
        registry.register_provider(provider.as_ref())?;
    }
    Ok(registry)
}
