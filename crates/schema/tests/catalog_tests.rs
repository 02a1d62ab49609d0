//! Applies the whole catalog to the in-memory backend

use paydesk_migrate::{
    MemoryBackend, MigrationConfig, MigrationId, MigrationRunner, MigrationTarget,
    VerificationMode,
};
use paydesk_schema::{merchant_data, registry, user_data};

fn strict_runner() -> MigrationRunner<MemoryBackend> {
    let config = MigrationConfig {
        verification: VerificationMode::Strict,
        ..MigrationConfig::default()
    };
    MigrationRunner::new(MemoryBackend::new(), registry().unwrap()).with_config(config)
}

#[tokio::test]
async fn test_full_catalog_applies_in_strict_mode() {
    let runner = strict_runner();
    let result = runner.run(&MigrationTarget::Latest).await.unwrap();
    assert_eq!(result.applied_count(), runner.registry().len());
    assert_eq!(result.batch, Some(1));

    let schema = runner.backend().schema();
    for table in [
        "merchant",
        "location",
        "psimi",
        "payment_scheme",
        "primary_mid",
        "secondary_mid",
        "plan",
        "user_profile",
    ] {
        assert!(schema.table(table).is_some(), "missing table {}", table);
    }

    let parent = schema.column("location", "parent_location_id").unwrap();
    assert!(parent.references_table("location"));
    assert!(schema.has_index("location_parent_location_id_idx"));

    assert!(schema.has_index("psimi_scheme_identifier_key"));
    assert!(schema.has_index("secondary_mid_primary_mid_key"));
    assert!(schema.has_index("plan_features_idx"));

    assert!(schema.column("location", "street_address").is_some());
    assert!(schema.column("location", "address_line").is_none());
    assert!(!schema.column("merchant", "legal_name").unwrap().nullable);

    let raw = runner.backend().raw_log();
    assert!(raw.iter().any(|sql| sql.contains("INSERT INTO \"payment_scheme\"")));
    assert!(raw.iter().any(|sql| sql.contains("plan_monthly_fee_check")));
}

#[tokio::test]
async fn test_catalog_rerun_is_noop() {
    let runner = strict_runner();
    runner.run(&MigrationTarget::Latest).await.unwrap();

    let again = runner.run(&MigrationTarget::Latest).await.unwrap();
    assert_eq!(again.applied_count(), 0);
    assert_eq!(again.skipped_count, runner.registry().len());

    let status = runner.status().await.unwrap();
    assert!(status.iter().all(|entry| entry.is_applied()));
}

#[tokio::test]
async fn test_user_profile_waits_for_merchant() {
    let runner = strict_runner();
    let target = MigrationTarget::Until(MigrationId::new(user_data::CREATE_USER_PROFILE).unwrap());
    let result = runner.run(&target).await.unwrap();

    let applied: Vec<&str> = result.applied.iter().map(|id| id.as_str()).collect();
    assert_eq!(
        applied,
        vec![
            merchant_data::CREATE_MERCHANT,
            merchant_data::CREATE_LOCATION,
            merchant_data::LOCATION_PARENT,
            user_data::CREATE_USER_PROFILE,
        ]
    );

    let pending = runner.plan(&MigrationTarget::Latest).await.unwrap();
    assert_eq!(pending.len(), runner.registry().len() - 4);
}

#[tokio::test]
async fn test_records_carry_namespace() {
    let runner = strict_runner();
    runner.run(&MigrationTarget::Latest).await.unwrap();

    let records = runner.backend().records(&runner.config().migrations_table);
    let user_records = records
        .iter()
        .filter(|r| r.namespace.as_str() == paydesk_schema::USER_DATA)
        .count();
    assert_eq!(user_records, 3);
}
