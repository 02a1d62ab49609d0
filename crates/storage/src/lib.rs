//! # paydesk-storage
//!
//! Outbound I/O collaborators of the data layer: a [`BlobStore`] with
//! local filesystem and Azure-style implementations, and a small JSON
//! [`HttpClient`].
//!
//! ```rust
//! use bytes::Bytes;
//! use paydesk_storage::{BlobStore, LocalBlobStore};
//!
//! # tokio_test::block_on(async {
//! let dir = tempfile::tempdir().unwrap();
//! let store = LocalBlobStore::new(dir.path());
//! store
//!     .upload_blob(Bytes::from_static(b"id,name\n"), "exports", "merchants.csv")
//!     .await
//!     .unwrap();
//! # });
//! ```

pub mod azure;
pub mod blob;
pub mod config;
pub mod content_type;
pub mod error;
pub mod http_client;
pub mod local;

pub use azure::AzureBlobStore;
pub use blob::{validate_blob_name, validate_container, BlobStore};
pub use config::{BlobBackend, StorageConfig};
pub use content_type::detect_content_type;
pub use error::{StorageError, StorageResult};
pub use http_client::{HttpClient, HttpClientBuilder};
pub use local::LocalBlobStore;
