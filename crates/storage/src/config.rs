//! Blob store selection from the environment

use paydesk_core::{AppConfigTrait, ConfigError, ConfigSource};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::azure::AzureBlobStore;
use crate::blob::BlobStore;
use crate::error::StorageResult;
use crate::local::LocalBlobStore;

/// Which blob store to construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
    Local { root: PathBuf },
    Azure { account_url: String, sas_token: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: BlobBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::Local {
                root: PathBuf::from("./storage"),
            },
        }
    }
}

impl StorageConfig {
    pub fn build_store(&self) -> StorageResult<Box<dyn BlobStore>> {
        Ok(match &self.backend {
            BlobBackend::Local { root } => Box::new(LocalBlobStore::new(root)),
            BlobBackend::Azure {
                account_url,
                sas_token,
            } => Box::new(AzureBlobStore::new(account_url, sas_token)?),
        })
    }
}

impl AppConfigTrait for StorageConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let kind = env::var("BLOB_BACKEND").unwrap_or_else(|_| "local".to_string());
        let backend = match kind.to_lowercase().as_str() {
            "local" => BlobBackend::Local {
                root: env::var("BLOB_LOCAL_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./storage")),
            },
            "azure" => BlobBackend::Azure {
                account_url: env::var("AZURE_STORAGE_ACCOUNT_URL").map_err(|_| {
                    ConfigError::missing_required(
                        "account_url",
                        "AZURE_STORAGE_ACCOUNT_URL is required for the azure blob backend",
                    )
                })?,
                sas_token: env::var("AZURE_STORAGE_SAS_TOKEN").map_err(|_| {
                    ConfigError::missing_required(
                        "sas_token",
                        "AZURE_STORAGE_SAS_TOKEN is required for the azure blob backend",
                    )
                })?,
            },
            _ => {
                return Err(ConfigError::invalid_value(
                    "blob_backend",
                    kind,
                    "local or azure",
                ))
            }
        };

        let config = Self { backend };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match &self.backend {
            BlobBackend::Local { root } if root.as_os_str().is_empty() => Err(
                ConfigError::validation_failed("local blob root must not be empty"),
            ),
            BlobBackend::Azure { account_url, .. } if url::Url::parse(account_url).is_err() => {
                Err(ConfigError::invalid_value(
                    "account_url",
                    account_url,
                    "absolute https URL",
                ))
            }
            _ => Ok(()),
        }
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let vars = match self.backend {
            BlobBackend::Local { .. } => vec![("root", "BLOB_LOCAL_ROOT")],
            BlobBackend::Azure { .. } => vec![
                ("account_url", "AZURE_STORAGE_ACCOUNT_URL"),
                ("sas_token", "AZURE_STORAGE_SAS_TOKEN"),
            ],
        };

        std::iter::once(("backend", "BLOB_BACKEND"))
            .chain(vars)
            .map(|(field, var)| {
                let source = if env::var(var).is_ok() {
                    ConfigSource::EnvVar(var.to_string())
                } else {
                    ConfigSource::Default("built-in".to_string())
                };
                (field.to_string(), source)
            })
            .collect()
    }
}
