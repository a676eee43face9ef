//! Object store seam
//!
//! The upload pipeline talks to object storage only through [`ObjectStore`].
//! Two implementations ship with the crate:
//!
//! - [`s3::S3Backend`]: any S3-compatible service via `aws-sdk-s3`
//! - [`memory::MemoryStore`]: in-process store for tests and embedding
//!
//! # Operations
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | `put_object` | Single-pass streamed write, returns the ETag |
//! | `get_object` | Streamed read used for size verification |
//! | `delete_object` | Removal of a previously stored object |

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use thiserror::Error;

pub use memory::MemoryStore;
pub use s3::S3Backend;

/// Byte stream carrying file content in and out of the store
pub type FileStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// User-defined object metadata
pub type Metadata = HashMap<String, String>;

/// Object store errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Request error: {0}")]
    Request(String),

    #[error("Response error: {0}")]
    Response(String),

    #[error("Stream error: {0}")]
    Stream(#[from] io::Error),
}

impl BackendError {
    /// Whether the backend reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Streamed write request
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub metadata: Option<Metadata>,
    pub body: FileStream,
}

impl std::fmt::Debug for PutObjectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutObjectRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("content_type", &self.content_type)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Backend used by the upload pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `request.body` into `bucket/key` and return the ETag
    async fn put_object(&self, request: PutObjectRequest) -> Result<String, BackendError>;

    /// Open `bucket/key` for streamed reading
    async fn get_object(&self, bucket: &str, key: &str) -> Result<FileStream, BackendError>;

    /// Delete `bucket/key`
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BackendError>;
}
