//! Blob store abstraction

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StorageError, StorageResult};

/// Write-only blob storage, addressed by container and blob name
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend name for log output
    fn name(&self) -> &'static str;

    /// Store `contents` as `container/name`, replacing any existing blob
    async fn upload_blob(&self, contents: Bytes, container: &str, name: &str) -> StorageResult<()>;
}

/// Container names follow Azure's rules: 3-63 characters of lowercase
/// letters, digits and single hyphens, starting with a letter or digit.
pub fn validate_container(container: &str) -> StorageResult<()> {
    let valid_chars = container
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid = (3..=63).contains(&container.len())
        && valid_chars
        && !container.starts_with('-')
        && !container.ends_with('-')
        && !container.contains("--");

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidLocation(format!(
            "container '{}' must be 3-63 lowercase letters, digits or single hyphens",
            container
        )))
    }
}

/// Blob names are `/`-separated relative paths without empty, `.` or `..`
/// segments.
pub fn validate_blob_name(name: &str) -> StorageResult<()> {
    let invalid = name.is_empty()
        || name.len() > 1024
        || name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        Err(StorageError::InvalidLocation(format!(
            "blob name '{}' is not a relative path",
            name
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_rules() {
        assert!(validate_container("merchant-docs").is_ok());
        assert!(validate_container("ab").is_err());
        assert!(validate_container("Merchant").is_err());
        assert!(validate_container("-docs").is_err());
        assert!(validate_container("a--b").is_err());
    }

    #[test]
    fn test_blob_name_rules() {
        assert!(validate_blob_name("2024/01/statement.pdf").is_ok());
        assert!(validate_blob_name("").is_err());
        assert!(validate_blob_name("/etc/passwd").is_err());
        assert!(validate_blob_name("a/../b").is_err());
        assert!(validate_blob_name("a//b").is_err());
    }
}
