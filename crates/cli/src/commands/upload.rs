use std::path::Path;

use anyhow::Context as _;
use bytes::Bytes;
use paydesk_core::AppConfigTrait;
use paydesk_storage::{BlobStore, StorageConfig};

/// Upload `file` to the blob store selected by the environment
pub async fn run(file: &Path, container: &str, name: Option<&str>) -> anyhow::Result<()> {
    let store = StorageConfig::from_env()?.build_store()?;
    upload_with(store.as_ref(), file, container, name).await
}

async fn upload_with(
    store: &dyn BlobStore,
    file: &Path,
    container: &str,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let name = match name {
        Some(name) => name.to_string(),
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("cannot derive a blob name from {}", file.display()))?,
    };

    let contents = tokio::fs::read(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let size = contents.len();

    store
        .upload_blob(Bytes::from(contents), container, &name)
        .await?;

    println!(
        "Uploaded {} ({} bytes) to {}/{} via {}",
        file.display(),
        size,
        container,
        name,
        store.name()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paydesk_storage::LocalBlobStore;

    #[tokio::test]
    async fn test_upload_uses_file_name_by_default() {
        let source = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let file = source.path().join("settlement.csv");
        std::fs::write(&file, b"mid,amount\n1,10.00\n").unwrap();

        let store = LocalBlobStore::new(root.path());
        upload_with(&store, &file, "reports", None).await.unwrap();

        let stored = std::fs::read(root.path().join("reports").join("settlement.csv")).unwrap();
        assert_eq!(stored, b"mid,amount\n1,10.00\n");
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(root.path());
        let err = upload_with(&store, Path::new("/nonexistent/file.csv"), "reports", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
