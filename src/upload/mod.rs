//! Upload module
//!
//! Streams incoming files into object storage. [`collect`] resolves the
//! per-upload parameters, [`engine::BucketStorage`] writes the object and
//! verifies it by reading it back.

use crate::resolver::{ResolveError, DEFAULT_CONTENT_TYPE};
use crate::storage::{BackendError, FileStream, Metadata};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

pub mod collect;
pub mod engine;

pub use collect::{collect, ResolvedParams, Resolvers};
pub use engine::{BucketStorage, StorageBuilder};

/// Transfer encoding reported when the caller did not supply one
const DEFAULT_ENCODING: &str = "7bit";

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to resolve upload parameters: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Failed to write object: {0}")]
    Write(#[source] BackendError),

    #[error("Failed to read back {bucket}/{key}: {source}")]
    ReadBack {
        bucket: String,
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to remove object: {0}")]
    Remove(#[source] BackendError),

    #[error("File stream is missing")]
    MissingStream,
}

impl UploadError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Resolve(_) => "resolve",
            UploadError::Write(_) => "write",
            UploadError::ReadBack { .. } => "read_back",
            UploadError::Remove(_) => "remove",
            UploadError::MissingStream => "missing_stream",
        }
    }
}

/// Caller-supplied description of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Form field the file was sent in
    pub field_name: String,
    /// File name on the client
    pub original_name: String,
    pub encoding: String,
    /// MIME type declared by the client
    pub mime_type: String,
}

impl FileInfo {
    pub fn new(field_name: impl Into<String>, original_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            original_name: original_name.into(),
            encoding: DEFAULT_ENCODING.to_string(),
            mime_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }
}

/// File being uploaded: its description and its content
pub struct IncomingFile {
    info: FileInfo,
    stream: Option<FileStream>,
}

impl IncomingFile {
    pub fn new(info: FileInfo, stream: FileStream) -> Self {
        Self {
            info,
            stream: Some(stream),
        }
    }

    /// Box any byte stream as the file content
    pub fn from_stream<S>(info: FileInfo, stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::new(info, Box::pin(stream))
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Take the content stream, leaving the file without one
    pub fn take_stream(&mut self) -> Option<FileStream> {
        self.stream.take()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }
}

impl std::fmt::Debug for IncomingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingFile")
            .field("info", &self.info)
            .field("has_stream", &self.has_stream())
            .finish()
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Bytes counted when reading the object back
    pub size: u64,
    pub bucket_name: String,
    pub object_name: String,
    pub metadata: Option<Metadata>,
    pub content_type: String,
    pub etag: String,
}

impl StoredFile {
    /// Reference used to remove the object later
    pub fn reference(&self) -> StoredFileRef {
        StoredFileRef {
            bucket_name: self.bucket_name.clone(),
            object_name: self.object_name.clone(),
        }
    }
}

/// Location of a previously stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFileRef {
    pub bucket_name: String,
    pub object_name: String,
}

impl StoredFileRef {
    pub fn new(bucket_name: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            object_name: object_name.into(),
        }
    }
}

/// Storage engine consumed by upload middleware
#[async_trait]
pub trait StorageEngine<Req>: Send + Sync {
    /// Store a file and report where it went
    async fn handle_file(&self, req: &Req, file: IncomingFile) -> Result<StoredFile, UploadError>;

    /// Remove a file stored by an earlier call to `handle_file`
    async fn remove_file(&self, req: &Req, file: StoredFileRef) -> Result<(), UploadError>;
}
