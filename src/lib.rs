//! Mizuchi Storage Library
//!
//! Storage engine for upload middleware that streams files straight into
//! S3-compatible object storage.
//!
//! # Features
//!
//! - **Single Pass**: Content is streamed to the bucket, never spooled to disk
//! - **Pluggable Naming**: Bucket, object name, metadata and content type are
//!   resolved per upload
//! - **Content Sniffing**: Optional detection of the real content type from
//!   the first chunk of the stream
//! - **Verified Size**: The reported size is read back from the store
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_storage::{auto_content_type, BucketStorage, FileInfo, IncomingFile, S3Backend};
//! use mizuchi_storage::config::S3Config;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = S3Backend::from_config(&S3Config {
//!         region: "us-east-1".into(),
//!         endpoint: Some("http://localhost:9000".into()),
//!         access_key: Some("minioadmin".into()),
//!         secret_key: Some("minioadmin".into()),
//!         part_size: 8 * 1024 * 1024,
//!     })
//!     .await;
//!
//!     let storage = BucketStorage::<()>::builder()
//!         .store(Arc::new(backend))
//!         .bucket("uploads")
//!         .content_type_resolver(auto_content_type())
//!         .build()?;
//!
//!     let file = IncomingFile::from_stream(
//!         FileInfo::new("avatar", "me.png"),
//!         futures::stream::empty(),
//!     );
//!     let stored = storage.handle_file(&(), file).await?;
//!     println!("{} bytes in {}/{}", stored.size, stored.bucket_name, stored.object_name);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod resolver;
pub mod sniff;
pub mod storage;
pub mod telemetry;
pub mod upload;

// Re-export commonly used types
pub use config::EngineConfig;
pub use resolver::DEFAULT_CONTENT_TYPE;
pub use sniff::{auto_content_type, AutoContentType};
pub use storage::{MemoryStore, ObjectStore, S3Backend};
pub use upload::{
    BucketStorage, FileInfo, IncomingFile, StorageEngine, StoredFile, StoredFileRef, UploadError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
