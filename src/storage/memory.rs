//! In-memory object store
//!
//! Keeps objects in a `HashMap` behind a `parking_lot::Mutex`. Besides
//! backing tests it can stand in for S3 when embedding the engine in tools
//! that do not need durable storage.
//!
//! Unlike S3, deleting a missing object reports [`BackendError::NotFound`].

use super::{BackendError, FileStream, Metadata, ObjectStore, PutObjectRequest};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Chunk size used when streaming objects back out
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Object held by [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub metadata: Option<Metadata>,
    pub etag: String,
}

#[derive(Default)]
struct Faults {
    put: AtomicBool,
    get: AtomicBool,
    delete: AtomicBool,
}

/// In-memory object store
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), StoredObject>>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of a stored object
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Check whether an object exists
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.object(bucket, key).is_some()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Whether the store holds no objects
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every following write fail until reset
    pub fn fail_writes(&self, fail: bool) {
        self.faults.put.store(fail, Ordering::SeqCst);
    }

    /// Make every following read fail until reset
    pub fn fail_reads(&self, fail: bool) {
        self.faults.get.store(fail, Ordering::SeqCst);
    }

    /// Make every following delete fail until reset
    pub fn fail_deletes(&self, fail: bool) {
        self.faults.delete.store(fail, Ordering::SeqCst);
    }

    fn compute_etag(data: &[u8]) -> String {
        let digest = Sha256::digest(data);
        format!("\"{}\"", hex::encode(&digest[..16]))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, request: PutObjectRequest) -> Result<String, BackendError> {
        if self.faults.put.load(Ordering::SeqCst) {
            return Err(BackendError::Request("write rejected by store".into()));
        }

        let mut body = request.body;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        let data = buffer.freeze();
        let etag = Self::compute_etag(&data);

        self.objects.lock().insert(
            (request.bucket, request.key),
            StoredObject {
                data,
                content_type: request.content_type,
                metadata: request.metadata,
                etag: etag.clone(),
            },
        );

        Ok(etag)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<FileStream, BackendError> {
        if self.faults.get.load(Ordering::SeqCst) {
            return Err(BackendError::Request("read timed out".into()));
        }

        let object = self.object(bucket, key).ok_or_else(|| BackendError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;

        let data = object.data;
        let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|start| {
                let end = std::cmp::min(start + READ_CHUNK_SIZE, data.len());
                Ok(data.slice(start..end))
            })
            .collect();

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        if self.faults.delete.load(Ordering::SeqCst) {
            return Err(BackendError::Request("delete rejected by store".into()));
        }

        self.objects
            .lock()
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn request(key: &str, data: &'static [u8]) -> PutObjectRequest {
        PutObjectRequest {
            bucket: "uploads".into(),
            key: key.into(),
            content_type: "text/plain".into(),
            metadata: None,
            body: Box::pin(futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(data))])),
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStore::new();
        let etag = store.put_object(request("a.txt", b"hello")).await.unwrap();
        assert!(etag.starts_with('"') && etag.ends_with('"'));

        let chunks: Vec<Bytes> = store
            .get_object("uploads", "a.txt")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"hello");
    }

    #[tokio::test]
    async fn test_large_object_is_chunked_on_read() {
        let store = MemoryStore::new();
        let data = vec![7u8; READ_CHUNK_SIZE * 2 + 5];
        store
            .put_object(PutObjectRequest {
                bucket: "uploads".into(),
                key: "big".into(),
                content_type: "application/octet-stream".into(),
                metadata: None,
                body: Box::pin(futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(data.clone()))])),
            })
            .await
            .unwrap();

        let chunks: Vec<Bytes> = store
            .get_object("uploads", "big")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_delete_missing_reports_not_found() {
        let store = MemoryStore::new();
        let err = store.delete_object("uploads", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        assert!(store.put_object(request("a", b"x")).await.is_err());
        assert!(store.is_empty());

        store.fail_writes(false);
        store.put_object(request("a", b"x")).await.unwrap();
        store.fail_reads(true);
        assert!(store.get_object("uploads", "a").await.is_err());
        store.fail_deletes(true);
        assert!(store.delete_object("uploads", "a").await.is_err());
        assert!(store.contains("uploads", "a"));
    }
}
