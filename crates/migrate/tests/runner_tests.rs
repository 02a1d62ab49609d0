//! End-to-end runner tests against the in-memory backend
//!
//! These cover ordering, idempotence, resume-after-failure, verification
//! modes and locking without needing a PostgreSQL server.

use paydesk_migrate::*;
use std::time::Duration;

const MERCHANT: &str = "20240110_090000_create_merchant";
const MERCHANT_STATUS: &str = "20240112_090000_merchant_status";
const MERCHANT_FLAG: &str = "20240114_090000_merchant_flag";
const MERCHANT_MCC: &str = "20240116_090000_merchant_mcc";
const PROFILE: &str = "20240111_080000_create_user_profile";

fn create_merchant() -> MigrationUnit {
    MigrationUnit::builder("merchant_data", MERCHANT, "Create merchant")
        .create_table("merchant", |t| {
            t.id()
                .column("name", ColumnSpec::varchar(255))
                .column("email", ColumnSpec::varchar(255).unique());
        })
        .build()
        .unwrap()
}

fn merchant_status() -> MigrationUnit {
    MigrationUnit::builder("merchant_data", MERCHANT_STATUS, "Add merchant status")
        .add_column(
            "merchant",
            "status",
            ColumnSpec::varchar(20)
                .with_choices(["active", "suspended"])
                .with_default("active"),
        )
        .build()
        .unwrap()
}

fn merchant_flag() -> MigrationUnit {
    MigrationUnit::builder("merchant_data", MERCHANT_FLAG, "Add and backfill onboarding flag")
        .add_column("merchant", "onboarded", ColumnSpec::boolean().with_default(false))
        .unsafe_sql(
            "UPDATE merchant SET onboarded = TRUE WHERE status = 'active'",
            "backfill onboarded for active merchants",
        )
        .build()
        .unwrap()
}

fn merchant_mcc() -> MigrationUnit {
    MigrationUnit::builder("merchant_data", MERCHANT_MCC, "Add merchant category code")
        .add_column("merchant", "mcc", ColumnSpec::varchar(4).nullable().indexed())
        .build()
        .unwrap()
}

fn user_profile() -> MigrationUnit {
    MigrationUnit::builder("user_data", PROFILE, "Create user profile")
        .depends_on(MERCHANT_STATUS)
        .create_table("user_profile", |t| {
            t.id()
                .column("display_name", ColumnSpec::varchar(100))
                .column(
                    "merchant_id",
                    ColumnSpec::big_integer()
                        .nullable()
                        .references("merchant", "id", OnDelete::SetNull),
                );
        })
        .build()
        .unwrap()
}

fn registry(units: Vec<MigrationUnit>) -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    for unit in units {
        registry.register(unit).unwrap();
    }
    registry
}

fn full_registry() -> MigrationRegistry {
    registry(vec![
        create_merchant(),
        merchant_status(),
        merchant_flag(),
        merchant_mcc(),
        user_profile(),
    ])
}

fn recorded_ids(backend: &MemoryBackend) -> Vec<String> {
    backend
        .records("schema_migrations")
        .iter()
        .map(|r| r.id.to_string())
        .collect()
}

#[tokio::test]
async fn test_dependencies_apply_before_dependants() {
    let backend = MemoryBackend::new();
    let runner = MigrationRunner::new(backend.clone(), full_registry());

    let result = runner.run(&MigrationTarget::Latest).await.unwrap();
    let applied: Vec<&str> = result.applied.iter().map(|id| id.as_str()).collect();

    // user_profile has the earlier timestamp but waits for merchant_status
    assert_eq!(
        applied,
        vec![MERCHANT, MERCHANT_STATUS, PROFILE, MERCHANT_FLAG, MERCHANT_MCC]
    );
    assert_eq!(recorded_ids(&backend), applied);
    assert!(backend.schema().table("user_profile").is_some());
}

#[tokio::test]
async fn test_second_run_is_a_noop() {
    let backend = MemoryBackend::new();
    let runner = MigrationRunner::new(backend.clone(), full_registry());

    let first = runner.run(&MigrationTarget::Latest).await.unwrap();
    assert_eq!(first.applied_count(), 5);
    assert_eq!(first.batch, Some(1));
    let records_after_first = backend.records("schema_migrations");

    let second = runner.run(&MigrationTarget::Latest).await.unwrap();
    assert_eq!(second.applied_count(), 0);
    assert_eq!(second.skipped_count, 5);
    assert_eq!(second.batch, None);
    assert_eq!(backend.records("schema_migrations"), records_after_first);
}

#[tokio::test]
async fn test_failed_unit_leaves_earlier_units_recorded_and_resumes() {
    let backend = MemoryBackend::new();
    backend.fail_raw_sql_matching("SET onboarded");
    let runner = MigrationRunner::new(backend.clone(), full_registry());

    let err = runner.run(&MigrationTarget::Latest).await.unwrap_err();
    match &err {
        MigrationError::PartialApplyAborted {
            id,
            completed_steps,
            ..
        } => {
            assert_eq!(id, MERCHANT_FLAG);
            assert_eq!(*completed_steps, 1);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.to_string().contains("Add and backfill onboarding flag"));

    assert_eq!(recorded_ids(&backend), vec![MERCHANT, MERCHANT_STATUS, PROFILE]);
    // the column added by the failed unit's first step was rolled back
    assert!(backend.schema().column("merchant", "onboarded").is_none());

    backend.clear_failures();
    let resumed = runner.run(&MigrationTarget::Latest).await.unwrap();
    let resumed_ids: Vec<&str> = resumed.applied.iter().map(|id| id.as_str()).collect();
    assert_eq!(resumed_ids, vec![MERCHANT_FLAG, MERCHANT_MCC]);
    assert_eq!(resumed.batch, Some(2));
    assert!(backend.schema().column("merchant", "onboarded").is_some());
    assert_eq!(backend.raw_log().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_runners_apply_each_unit_once() {
    let backend = MemoryBackend::new();
    let first = MigrationRunner::new(backend.clone(), full_registry());
    let second = MigrationRunner::new(backend.clone(), full_registry());

    let (a, b) = tokio::join!(
        first.run(&MigrationTarget::Latest),
        second.run(&MigrationTarget::Latest)
    );
    let mut counts = vec![a.unwrap().applied.len(), b.unwrap().applied.len()];
    counts.sort_unstable();
    assert_eq!(counts, vec![0, 5]);
    assert_eq!(backend.records("schema_migrations").len(), 5);
    assert_eq!(backend.raw_log().len(), 1);
}

#[tokio::test]
async fn test_alter_column_round_trip_restores_shape() {
    let backend = MemoryBackend::new();
    MigrationRunner::new(backend.clone(), registry(vec![create_merchant()]))
        .run(&MigrationTarget::Latest)
        .await
        .unwrap();
    let original = backend.schema().column_shape("merchant", "name").unwrap();

    let forward = SchemaChange::alter_column(
        "merchant",
        "name",
        ColumnSpec::varchar(255).nullable().unique().with_default("unnamed"),
        ColumnSpec::varchar(255),
    );
    let reverse = forward.reversed().unwrap();

    let units = vec![
        create_merchant(),
        MigrationUnit::builder("merchant_data", "20240120_000000_relax_name", "Relax name")
            .change(forward)
            .build()
            .unwrap(),
        MigrationUnit::builder("merchant_data", "20240121_000000_restore_name", "Restore name")
            .change(reverse)
            .build()
            .unwrap(),
    ];
    let runner = MigrationRunner::new(backend.clone(), registry(units)).with_config(
        MigrationConfig {
            verification: VerificationMode::Strict,
            ..MigrationConfig::default()
        },
    );

    runner
        .run(&MigrationTarget::Until(
            MigrationId::new("20240120_000000_relax_name").unwrap(),
        ))
        .await
        .unwrap();
    let altered = backend.schema().column_shape("merchant", "name").unwrap();
    assert!(altered.nullable && altered.unique && altered.default.is_some());

    runner.run(&MigrationTarget::Latest).await.unwrap();
    assert_eq!(
        backend.schema().column_shape("merchant", "name").unwrap(),
        original
    );
}

#[tokio::test]
async fn test_cycle_rejected_before_anything_runs() {
    let backend = MemoryBackend::new();
    let units = vec![
        create_merchant(),
        MigrationUnit::builder("merchant_data", "20240201_000000_a", "A")
            .depends_on("20240202_000000_b")
            .add_column("merchant", "a", ColumnSpec::text().nullable())
            .build()
            .unwrap(),
        MigrationUnit::builder("user_data", "20240202_000000_b", "B")
            .depends_on("20240201_000000_a")
            .build()
            .unwrap(),
    ];
    let runner = MigrationRunner::new(backend.clone(), registry(units));

    let err = runner.run(&MigrationTarget::Latest).await.unwrap_err();
    assert!(matches!(err, MigrationError::CycleDetected { .. }));
    assert!(err.is_resolution_error());
    assert!(backend.schema().table_names().is_empty());
    assert!(backend.records("schema_migrations").is_empty());
}

#[tokio::test]
async fn test_two_phase_self_reference() {
    let backend = MemoryBackend::new();
    let parent = ColumnSpec::big_integer().nullable();
    let units = vec![
        MigrationUnit::builder("merchant_data", "20240301_000000_create_location", "Create location")
            .create_table("location", |t| {
                t.id().column("name", ColumnSpec::varchar(255));
            })
            .build()
            .unwrap(),
        MigrationUnit::builder("merchant_data", "20240302_000000_location_parent", "Location parent")
            .add_column("location", "parent_id", parent.clone())
            .alter_column(
                "location",
                "parent_id",
                parent
                    .clone()
                    .references("location", "id", OnDelete::Cascade),
                parent.clone(),
            )
            .build()
            .unwrap(),
    ];
    let runner = MigrationRunner::new(backend.clone(), registry(units));
    runner.run(&MigrationTarget::Latest).await.unwrap();

    let fk = backend
        .schema()
        .column("location", "parent_id")
        .and_then(|spec| spec.references.clone())
        .unwrap();
    assert_eq!(fk.table, "location");

    let single_phase = MigrationUnit::builder("merchant_data", "20240303_000000_bad", "Bad")
        .add_column(
            "location",
            "root_id",
            parent.references("location", "id", OnDelete::Cascade),
        )
        .build();
    assert!(matches!(
        single_phase,
        Err(MigrationError::InvalidDefinition(_))
    ));
}

#[tokio::test]
async fn test_strict_mode_fails_unit_on_stale_assumption() {
    let backend = MemoryBackend::new();
    let units = vec![
        create_merchant(),
        MigrationUnit::builder("merchant_data", "20240401_000000_email_optional", "Email optional")
            .alter_column(
                "merchant",
                "email",
                ColumnSpec::varchar(255).nullable(),
                // the live column is unique; this claims it was not
                ColumnSpec::varchar(255),
            )
            .build()
            .unwrap(),
    ];

    let strict = MigrationRunner::new(backend.clone(), registry(units.clone())).with_config(
        MigrationConfig {
            verification: VerificationMode::Strict,
            ..MigrationConfig::default()
        },
    );
    let err = strict.run(&MigrationTarget::Latest).await.unwrap_err();
    assert!(matches!(err, MigrationError::ApplyFailed { .. }));
    assert!(matches!(
        err.root_cause(),
        MigrationError::StaleAssumption { .. }
    ));
    assert_eq!(recorded_ids(&backend), vec![MERCHANT]);

    let lenient = MigrationRunner::new(backend.clone(), registry(units));
    let result = lenient.run(&MigrationTarget::Latest).await.unwrap();
    assert_eq!(result.applied_count(), 1);
}

#[tokio::test]
async fn test_lock_released_after_failure() {
    let backend = MemoryBackend::new();
    backend.fail_raw_sql_matching("SET onboarded");
    let runner = MigrationRunner::new(backend.clone(), full_registry());
    assert!(runner.run(&MigrationTarget::Latest).await.is_err());

    let lock = backend
        .acquire_lock(0, Some(Duration::from_millis(50)))
        .await
        .map_err(|e| e.to_string())
        .unwrap();
    lock.release().await.unwrap();
}

#[tokio::test]
async fn test_status_and_plan() {
    let backend = MemoryBackend::new();
    let runner = MigrationRunner::new(backend.clone(), full_registry());

    runner
        .run(&MigrationTarget::Until(MigrationId::new(MERCHANT_STATUS).unwrap()))
        .await
        .unwrap();

    let status = runner.status().await.unwrap();
    assert_eq!(status.len(), 5);
    assert!(status[0].is_applied() && status[1].is_applied());
    assert!(matches!(
        status[1].status,
        MigrationStatus::Applied { batch: 1, .. }
    ));
    assert_eq!(status[2].status, MigrationStatus::Pending);

    let plan: Vec<&str> = runner
        .plan(&MigrationTarget::Latest)
        .await
        .unwrap()
        .iter()
        .map(|unit| unit.id().as_str())
        .collect();
    assert_eq!(plan, vec![PROFILE, MERCHANT_FLAG, MERCHANT_MCC]);
}

#[tokio::test]
async fn test_unknown_target_and_sql_preview() {
    let runner = MigrationRunner::new(MemoryBackend::new(), full_registry());

    let missing = MigrationId::new("20991231_000000_future").unwrap();
    assert!(matches!(
        runner.run(&MigrationTarget::Until(missing.clone())).await,
        Err(MigrationError::UnknownMigration(_))
    ));
    assert!(matches!(
        runner.sql_for(&missing),
        Err(MigrationError::UnknownMigration(_))
    ));

    let sql = runner
        .sql_for(&MigrationId::new(MERCHANT_MCC).unwrap())
        .unwrap();
    assert_eq!(sql.len(), 2);
    assert!(sql[1].contains("\"merchant_mcc_idx\""));
}

#[tokio::test]
async fn test_out_of_order_unit_is_inconsistent_history() {
    let backend = MemoryBackend::new();
    MigrationRunner::new(backend.clone(), registry(vec![create_merchant(), merchant_status()]))
        .run(&MigrationTarget::Latest)
        .await
        .unwrap();

    // a unit slotted in before an applied one in the same namespace
    let late = MigrationUnit::builder("merchant_data", "20240111_000000_late", "Late arrival")
        .add_column("merchant", "late", ColumnSpec::text().nullable())
        .build()
        .unwrap();
    let runner = MigrationRunner::new(
        backend.clone(),
        registry(vec![create_merchant(), late, merchant_status()]),
    );
    let err = runner.run(&MigrationTarget::Latest).await.unwrap_err();
    assert!(matches!(err, MigrationError::InconsistentHistory { .. }));
}

#[tokio::test]
async fn test_storage_outage_surfaces_as_unavailable() {
    let backend = MemoryBackend::new();
    backend.set_unavailable(true);
    let runner = MigrationRunner::new(backend, full_registry());
    assert!(matches!(
        runner.run(&MigrationTarget::Latest).await,
        Err(MigrationError::StorageUnavailable(_))
    ));
}
