//! Merchant, location, identifier, scheme, MID and plan tables

use async_trait::async_trait;
use paydesk_migrate::{
    ColumnDefault, ColumnSpec, DataPatch, IndexDef, IndexMethod, MigrationProvider,
    MigrationResult, MigrationUnit, OnDelete, SchemaEditor, TableHandle,
};

use crate::MERCHANT_DATA;

pub const CREATE_MERCHANT: &str = "20240105_100000_create_merchant";
pub const CREATE_LOCATION: &str = "20240105_100500_create_location";
pub const LOCATION_PARENT: &str = "20240106_090000_location_parent";
pub const CREATE_PSIMI: &str = "20240108_140000_create_psimi";
pub const CREATE_PAYMENT_SCHEME: &str = "20240110_110000_create_payment_scheme";
pub const CREATE_MIDS: &str = "20240112_153000_create_mids";
pub const CREATE_PLAN: &str = "20240115_120000_create_plan";
pub const MERCHANT_LEGAL_NAME: &str = "20240118_093000_merchant_legal_name_required";
pub const PLAN_FEATURES: &str = "20240120_080000_plan_features";

pub const MERCHANT_STATUSES: [&str; 4] = ["pending", "active", "suspended", "closed"];

/// Card schemes every deployment starts with: (code, display name)
pub const DEFAULT_SCHEMES: [(&str, &str); 3] = [
    ("visa", "Visa"),
    ("mastercard", "Mastercard"),
    ("amex", "American Express"),
];

const MERCHANT: TableHandle<'static> = TableHandle::new("merchant", &["name", "legal_name"]);
const PSIMI: TableHandle<'static> =
    TableHandle::new("psimi", &["scheme_code", "payment_scheme_id"]);

/// Migrations of the `merchant_data` namespace
#[derive(Debug, Clone, Copy, Default)]
pub struct MerchantDataMigrations;

impl MigrationProvider for MerchantDataMigrations {
    fn namespace(&self) -> &str {
        MERCHANT_DATA
    }

    fn migrations(&self) -> MigrationResult<Vec<MigrationUnit>> {
        Ok(vec![
            create_merchant()?,
            create_location()?,
            location_parent()?,
            create_psimi()?,
            create_payment_scheme()?,
            create_mids()?,
            create_plan()?,
            merchant_legal_name_required()?,
            plan_features()?,
        ])
    }
}

fn timestamp_now() -> ColumnDefault {
    ColumnDefault::Expression("now()".to_string())
}

fn create_merchant() -> MigrationResult<MigrationUnit> {
    MigrationUnit::builder(MERCHANT_DATA, CREATE_MERCHANT, "Create merchant table")
        .create_table("merchant", |t| {
            t.id()
                .column("name", ColumnSpec::varchar(255))
                .column("legal_name", ColumnSpec::varchar(255).nullable())
                .column(
                    "status",
                    ColumnSpec::varchar(20)
                        .with_choices(MERCHANT_STATUSES)
                        .with_default("pending"),
                )
                .column("mcc", ColumnSpec::varchar(4).nullable().indexed())
                .timestamps();
        })
        .build()
}

fn create_location() -> MigrationResult<MigrationUnit> {
    MigrationUnit::builder(MERCHANT_DATA, CREATE_LOCATION, "Create merchant locations")
        .create_table("location", |t| {
            t.id()
                .column(
                    "merchant_id",
                    ColumnSpec::big_integer()
                        .references("merchant", "id", OnDelete::Cascade)
                        .indexed(),
                )
                .column("name", ColumnSpec::varchar(255))
                .column("address_line", ColumnSpec::text().nullable())
                .column("city", ColumnSpec::varchar(100))
                .column("country_code", ColumnSpec::varchar(2))
                .timestamps();
        })
        .build()
}

/// Locations nest under a parent location. The self reference is added
/// without the key first and retargeted afterwards.
fn location_parent() -> MigrationResult<MigrationUnit> {
    let plain = ColumnSpec::big_integer().nullable();
    MigrationUnit::builder(MERCHANT_DATA, LOCATION_PARENT, "Nest locations under a parent")
        .add_column("location", "parent_location_id", plain.clone())
        .alter_column(
            "location",
            "parent_location_id",
            plain
                .clone()
                .references("location", "id", OnDelete::SetNull)
                .indexed(),
            plain,
        )
        .build()
}

fn create_psimi() -> MigrationResult<MigrationUnit> {
    MigrationUnit::builder(
        MERCHANT_DATA,
        CREATE_PSIMI,
        "Create payment service identifiers (PSIMI)",
    )
    .create_table("psimi", |t| {
        t.id()
            .column(
                "location_id",
                ColumnSpec::big_integer()
                    .references("location", "id", OnDelete::Cascade)
                    .indexed(),
            )
            .column("scheme_code", ColumnSpec::varchar(20))
            .column("identifier", ColumnSpec::varchar(64))
            .timestamps();
    })
    .add_index(
        IndexDef::new(
            "psimi_scheme_identifier_key",
            "psimi",
            &["scheme_code", "identifier"],
        )
        .unique(),
    )
    .build()
}

fn create_payment_scheme() -> MigrationResult<MigrationUnit> {
    MigrationUnit::builder(
        MERCHANT_DATA,
        CREATE_PAYMENT_SCHEME,
        "Create payment schemes and link identifiers to them",
    )
    .create_table("payment_scheme", |t| {
        t.id()
            .column("code", ColumnSpec::varchar(20).unique())
            .column("name", ColumnSpec::varchar(100))
            .column("enabled", ColumnSpec::boolean().with_default(true))
            .timestamps();
    })
    .add_column(
        "psimi",
        "payment_scheme_id",
        ColumnSpec::big_integer()
            .nullable()
            .references("payment_scheme", "id", OnDelete::Restrict)
            .indexed(),
    )
    .run_patch(LinkIdentifierSchemes)
    .build()
}

/// Seeds [`DEFAULT_SCHEMES`] and points existing identifiers at them
#[derive(Debug)]
pub struct LinkIdentifierSchemes;

impl LinkIdentifierSchemes {
    fn seed_sql() -> String {
        let values: Vec<String> = DEFAULT_SCHEMES
            .iter()
            .map(|(code, name)| format!("('{}', '{}')", code, name))
            .collect();
        format!(
            "INSERT INTO \"payment_scheme\" (\"code\", \"name\") VALUES {} ON CONFLICT (\"code\") DO NOTHING;",
            values.join(", ")
        )
    }

    fn link_sql() -> MigrationResult<String> {
        let unlinked = format!("{} IS NULL", PSIMI.column("payment_scheme_id")?);
        PSIMI.update(
            &[(
                "payment_scheme_id",
                "(SELECT \"id\" FROM \"payment_scheme\" WHERE \"payment_scheme\".\"code\" = \"psimi\".\"scheme_code\")",
            )],
            Some(unlinked.as_str()),
        )
    }
}

#[async_trait]
impl DataPatch for LinkIdentifierSchemes {
    fn describe(&self) -> String {
        "seed default payment schemes and link identifiers".to_string()
    }

    async fn run(&self, editor: &mut dyn SchemaEditor) -> MigrationResult<()> {
        let seeded = editor.execute_raw(&Self::seed_sql()).await?;
        let linked = editor.execute_raw(&Self::link_sql()?).await?;
        tracing::info!(seeded, linked, "payment schemes linked");
        Ok(())
    }

    fn sql_preview(&self) -> Option<Vec<String>> {
        let link = Self::link_sql().ok()?;
        Some(vec![Self::seed_sql(), link])
    }
}

fn create_mids() -> MigrationResult<MigrationUnit> {
    MigrationUnit::builder(
        MERCHANT_DATA,
        CREATE_MIDS,
        "Create primary and secondary merchant ids",
    )
    .create_table("primary_mid", |t| {
        t.id()
            .column(
                "merchant_id",
                ColumnSpec::big_integer()
                    .references("merchant", "id", OnDelete::Cascade)
                    .indexed(),
            )
            .column(
                "payment_scheme_id",
                ColumnSpec::big_integer().references("payment_scheme", "id", OnDelete::Restrict),
            )
            .column("mid", ColumnSpec::varchar(32).unique())
            .column("acquirer_api_key", ColumnSpec::text().nullable().secret())
            .timestamps();
    })
    .create_table("secondary_mid", |t| {
        t.id()
            .column(
                "primary_mid_id",
                ColumnSpec::big_integer().references("primary_mid", "id", OnDelete::Cascade),
            )
            .column("mid", ColumnSpec::varchar(32))
            .column("terminal_count", ColumnSpec::integer().with_default(0))
            .timestamps();
    })
    .add_index(
        IndexDef::new(
            "secondary_mid_primary_mid_key",
            "secondary_mid",
            &["primary_mid_id", "mid"],
        )
        .unique(),
    )
    .build()
}

fn create_plan() -> MigrationResult<MigrationUnit> {
    MigrationUnit::builder(MERCHANT_DATA, CREATE_PLAN, "Create plans and assign merchants")
        .create_table("plan", |t| {
            t.id()
                .column("code", ColumnSpec::varchar(50).unique())
                .column("name", ColumnSpec::varchar(255))
                .column(
                    "monthly_fee",
                    ColumnSpec::decimal(10, 2)
                        .with_default(ColumnDefault::Numeric("0.00".to_string())),
                )
                .column("currency", ColumnSpec::varchar(3).with_default("EUR"))
                .timestamps();
        })
        .add_column(
            "merchant",
            "plan_id",
            ColumnSpec::big_integer()
                .nullable()
                .references("plan", "id", OnDelete::SetNull),
        )
        .build()
}

/// Backfills `legal_name` from `name` before making it required, and
/// renames the location address column
fn merchant_legal_name_required() -> MigrationResult<MigrationUnit> {
    let name = MERCHANT.column("name")?;
    let missing = format!("{} IS NULL", MERCHANT.column("legal_name")?);
    let backfill = MERCHANT.update(&[("legal_name", name.as_str())], Some(missing.as_str()))?;

    MigrationUnit::builder(
        MERCHANT_DATA,
        MERCHANT_LEGAL_NAME,
        "Require merchant legal name",
    )
    .backfill("copy trading name into missing legal names", &backfill)
    .alter_column(
        "merchant",
        "legal_name",
        ColumnSpec::varchar(255),
        ColumnSpec::varchar(255).nullable(),
    )
    .rename_column("location", "address_line", "street_address")
    .build()
}

fn plan_features() -> MigrationResult<MigrationUnit> {
    MigrationUnit::builder(MERCHANT_DATA, PLAN_FEATURES, "Add plan feature flags")
        .add_column(
            "plan",
            "features",
            ColumnSpec::jsonb()
                .with_default(ColumnDefault::Expression("'{}'::jsonb".to_string()))
                .with_index_method(IndexMethod::Gin),
        )
        .unsafe_sql(
            "ALTER TABLE \"plan\" ADD CONSTRAINT \"plan_monthly_fee_check\" CHECK (\"monthly_fee\" >= 0)",
            "monthly fee may not be negative",
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use paydesk_migrate::{SchemaChange, Step};

    #[test]
    fn test_units_are_in_id_order() {
        let units = MerchantDataMigrations.migrations().unwrap();
        let ids: Vec<&str> = units.iter().map(|u| u.id().as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert!(units.iter().all(|u| u.namespace().as_str() == MERCHANT_DATA));
    }

    #[test]
    fn test_location_parent_is_two_phase() {
        let unit = location_parent().unwrap();
        let changes: Vec<&SchemaChange> = unit.changes().collect();
        assert!(matches!(
            changes[0],
            SchemaChange::AddColumn { spec, .. } if spec.references.is_none()
        ));
        assert!(matches!(
            changes[1],
            SchemaChange::AlterColumn { new, .. } if new.references_table("location")
        ));
    }

    #[test]
    fn test_legal_name_backfill_runs_before_alter() {
        let unit = merchant_legal_name_required().unwrap();
        assert!(matches!(unit.steps()[0], Step::Patch(_)));
        let sql = unit.sql_preview();
        assert!(sql[0].starts_with("UPDATE \"merchant\" SET \"legal_name\" = \"name\""));
        assert!(sql[1].contains("SET NOT NULL"));
    }

    #[test]
    fn test_scheme_patch_preview() {
        let preview = LinkIdentifierSchemes.sql_preview().unwrap();
        assert_eq!(preview.len(), 2);
        assert!(preview[0].contains("('amex', 'American Express')"));
        assert!(preview[1].starts_with("UPDATE \"psimi\" SET \"payment_scheme_id\""));
        assert!(preview[1].ends_with("WHERE \"payment_scheme_id\" IS NULL;"));
    }

    #[test]
    fn test_raw_sql_is_confined_to_plan_features() {
        let units = MerchantDataMigrations.migrations().unwrap();
        let with_raw: Vec<&str> = units
            .iter()
            .filter(|u| u.has_unsafe_steps())
            .map(|u| u.id().as_str())
            .collect();
        assert_eq!(with_raw, vec![PLAN_FEATURES]);
        assert!(create_plan().unwrap().sql_preview()[0].contains("DEFAULT 0.00"));
    }
}
