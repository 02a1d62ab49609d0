//! Back-office user profiles, owned by merchants

use paydesk_migrate::{ColumnSpec, MigrationProvider, MigrationResult, MigrationUnit, OnDelete};

use crate::merchant_data::{CREATE_LOCATION, CREATE_MERCHANT};
use crate::USER_DATA;

pub const CREATE_USER_PROFILE: &str = "20240107_120000_create_user_profile";
pub const USER_PROFILE_LOCATION: &str = "20240116_100000_user_profile_location";
pub const USER_PROFILE_LAST_LOGIN: &str = "20240121_140000_user_profile_last_login";

pub const USER_ROLES: [&str; 3] = ["owner", "admin", "viewer"];

/// Migrations of the `user_data` namespace
#[derive(Debug, Clone, Copy, Default)]
pub struct UserDataMigrations;

impl MigrationProvider for UserDataMigrations {
    fn namespace(&self) -> &str {
        USER_DATA
    }

    fn migrations(&self) -> MigrationResult<Vec<MigrationUnit>> {
        let create_profile =
            MigrationUnit::builder(USER_DATA, CREATE_USER_PROFILE, "Create user profiles")
                .depends_on(CREATE_MERCHANT)
                .create_table("user_profile", |t| {
                    t.id()
                        .column(
                            "merchant_id",
                            ColumnSpec::big_integer()
                                .references("merchant", "id", OnDelete::Cascade)
                                .indexed(),
                        )
                        .column("email", ColumnSpec::varchar(255).unique())
                        .column("display_name", ColumnSpec::varchar(255))
                        .column(
                            "role",
                            ColumnSpec::varchar(20)
                                .with_choices(USER_ROLES)
                                .with_default("viewer"),
                        )
                        .column("password_hash", ColumnSpec::text().secret())
                        .timestamps();
                })
                .build()?;

        let profile_location = MigrationUnit::builder(
            USER_DATA,
            USER_PROFILE_LOCATION,
            "Scope user profiles to a location",
        )
        .depends_on(CREATE_LOCATION)
        .add_column(
            "user_profile",
            "location_id",
            ColumnSpec::big_integer()
                .nullable()
                .references("location", "id", OnDelete::SetNull)
                .indexed(),
        )
        .build()?;

        let last_login = MigrationUnit::builder(
            USER_DATA,
            USER_PROFILE_LAST_LOGIN,
            "Track user last login",
        )
        .add_column(
            "user_profile",
            "last_login_at",
            ColumnSpec::timestamp_tz().nullable(),
        )
        .build()?;

        Ok(vec![create_profile, profile_location, last_login])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_namespace_dependencies() {
        let units = UserDataMigrations.migrations().unwrap();
        assert_eq!(units[0].dependencies()[0].as_str(), CREATE_MERCHANT);
        assert_eq!(units[1].dependencies()[0].as_str(), CREATE_LOCATION);
        assert!(units[2].dependencies().is_empty());
    }
}
