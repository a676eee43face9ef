//! Bucket storage engine
//!
//! [`BucketStorage`] turns an [`IncomingFile`] into a stored object:
//!
//! 1. resolve bucket, object name, metadata and content type
//! 2. stream the content to the object store in a single pass
//! 3. read the object back and count its bytes
//!
//! The size in [`StoredFile`] is the count from step 3, so it reflects what
//! the store actually holds. When the read-back fails the freshly written
//! object is unverified; unless disabled with
//! [`StorageBuilder::cleanup_orphans`], the engine tries to delete it before
//! returning [`UploadError::ReadBack`].

use super::collect::{collect, ResolvedParams, Resolvers};
use super::{IncomingFile, StorageEngine, StoredFile, StoredFileRef, UploadError};
use crate::config::{is_valid_bucket_name, ConfigError, ContentTypeMode, EngineConfig};
use crate::metrics;
use crate::resolver::{
    ContentTypeResolver, FixedContentType, PlainContentType, RandomObjectName, Resolver, Setting,
    StaticValue,
};
use crate::sniff::AutoContentType;
use crate::storage::{BackendError, Metadata, ObjectStore, PutObjectRequest, S3Backend};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Storage engine writing uploads to an object store bucket
pub struct BucketStorage<Req> {
    store: Arc<dyn ObjectStore>,
    resolvers: Resolvers<Req>,
    cleanup_orphans: bool,
}

impl<Req> Clone for BucketStorage<Req> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            resolvers: self.resolvers.clone(),
            cleanup_orphans: self.cleanup_orphans,
        }
    }
}

impl<Req> std::fmt::Debug for BucketStorage<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStorage")
            .field("cleanup_orphans", &self.cleanup_orphans)
            .finish_non_exhaustive()
    }
}

impl<Req> BucketStorage<Req>
where
    Req: Send + Sync + 'static,
{
    pub fn builder() -> StorageBuilder<Req> {
        StorageBuilder::default()
    }

    /// Build an S3-backed engine from configuration
    pub async fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let backend = S3Backend::from_config(&config.s3).await;

        let builder = Self::builder()
            .store(Arc::new(backend))
            .bucket(config.bucket.clone())
            .cleanup_orphans(config.cleanup_orphans);

        let builder = match config.content_type {
            ContentTypeMode::Default => builder,
            ContentTypeMode::Auto => builder.content_type_resolver(AutoContentType),
        };
        builder.build()
    }

    /// Get the object store
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Store a file and verify its size
    #[tracing::instrument(
        name = "storage.handle_file",
        skip_all,
        fields(
            file.field_name = %file.info().field_name,
            file.original_name = %file.info().original_name,
            s3.bucket = tracing::field::Empty,
            s3.key = tracing::field::Empty,
            s3.etag = tracing::field::Empty,
            content_type = tracing::field::Empty,
            upload.bytes = tracing::field::Empty
        )
    )]
    pub async fn handle_file(
        &self,
        req: &Req,
        mut file: IncomingFile,
    ) -> Result<StoredFile, UploadError> {
        let started = Instant::now();

        let params = match collect(&self.resolvers, req, &mut file).await {
            Ok(params) => params,
            Err(e) => {
                metrics::record_upload_failure(metrics::UNRESOLVED_BUCKET, "resolve");
                return Err(UploadError::Resolve(e));
            }
        };

        let bucket = params.bucket.clone();
        let result = self.upload(params, file).await;
        match &result {
            Ok(stored) => {
                metrics::record_upload_success(&bucket, stored.size);
                metrics::record_upload_duration(&bucket, started.elapsed().as_secs_f64());
            }
            Err(e) => metrics::record_upload_failure(&bucket, e.kind()),
        }
        result
    }

    /// Delete a previously stored file
    #[tracing::instrument(
        name = "storage.remove_file",
        skip_all,
        fields(s3.bucket = %file.bucket_name, s3.key = %file.object_name)
    )]
    pub async fn remove_file(&self, _req: &Req, file: StoredFileRef) -> Result<(), UploadError> {
        let result = self
            .store
            .delete_object(&file.bucket_name, &file.object_name)
            .await;
        metrics::record_removal(result.is_ok());
        result.map_err(UploadError::Remove)
    }

    async fn upload(
        &self,
        params: ResolvedParams,
        mut file: IncomingFile,
    ) -> Result<StoredFile, UploadError> {
        let ResolvedParams {
            bucket,
            object_name,
            metadata,
            content_type,
            replacement,
        } = params;

        let span = tracing::Span::current();
        span.record("s3.bucket", bucket.as_str());
        span.record("s3.key", object_name.as_str());
        span.record("content_type", content_type.as_str());

        let body = match replacement {
            Some(stream) => stream,
            None => file.take_stream().ok_or(UploadError::MissingStream)?,
        };

        let etag = self
            .store
            .put_object(PutObjectRequest {
                bucket: bucket.clone(),
                key: object_name.clone(),
                content_type: content_type.clone(),
                metadata: metadata.clone(),
                body,
            })
            .await
            .map_err(UploadError::Write)?;
        span.record("s3.etag", etag.as_str());

        let size = match self.read_back_size(&bucket, &object_name).await {
            Ok(size) => size,
            Err(source) => {
                if self.cleanup_orphans {
                    self.remove_orphan(&bucket, &object_name).await;
                }
                return Err(UploadError::ReadBack {
                    bucket,
                    key: object_name,
                    source,
                });
            }
        };
        span.record("upload.bytes", size);

        Ok(StoredFile {
            size,
            bucket_name: bucket,
            object_name,
            metadata,
            content_type,
            etag,
        })
    }

    async fn read_back_size(&self, bucket: &str, key: &str) -> Result<u64, BackendError> {
        let mut stream = self.store.get_object(bucket, key).await?;
        let mut size = 0u64;
        while let Some(chunk) = stream.next().await {
            size += chunk?.len() as u64;
        }
        Ok(size)
    }

    async fn remove_orphan(&self, bucket: &str, key: &str) {
        if let Err(e) = self.store.delete_object(bucket, key).await {
            tracing::warn!(
                s3.bucket = %bucket,
                s3.key = %key,
                error = %e,
                "Failed to remove unverified object"
            );
        }
    }
}

#[async_trait]
impl<Req> StorageEngine<Req> for BucketStorage<Req>
where
    Req: Send + Sync + 'static,
{
    async fn handle_file(&self, req: &Req, file: IncomingFile) -> Result<StoredFile, UploadError> {
        BucketStorage::handle_file(self, req, file).await
    }

    async fn remove_file(&self, req: &Req, file: StoredFileRef) -> Result<(), UploadError> {
        BucketStorage::remove_file(self, req, file).await
    }
}

/// Builder for [`BucketStorage`]
pub struct StorageBuilder<Req> {
    store: Option<Arc<dyn ObjectStore>>,
    bucket: Option<Setting<Req, String>>,
    object_name: Option<Arc<dyn Resolver<Req, String>>>,
    metadata: Option<Arc<dyn Resolver<Req, Option<Metadata>>>>,
    content_type: Option<Arc<dyn ContentTypeResolver<Req>>>,
    cleanup_orphans: bool,
}

impl<Req> Default for StorageBuilder<Req> {
    fn default() -> Self {
        Self {
            store: None,
            bucket: None,
            object_name: None,
            metadata: None,
            content_type: None,
            cleanup_orphans: true,
        }
    }
}

impl<Req> StorageBuilder<Req>
where
    Req: Send + Sync + 'static,
{
    /// Object store the engine writes to (required)
    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Store every upload in the same bucket
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(Setting::Value(bucket.into()));
        self
    }

    /// Pick the bucket per upload
    pub fn bucket_resolver<R>(mut self, resolver: R) -> Self
    where
        R: Resolver<Req, String> + 'static,
    {
        self.bucket = Some(Setting::Resolver(Arc::new(resolver)));
        self
    }

    /// Object name resolver, random hex names by default
    pub fn object_name<R>(mut self, resolver: R) -> Self
    where
        R: Resolver<Req, String> + 'static,
    {
        self.object_name = Some(Arc::new(resolver));
        self
    }

    /// Metadata resolver, no metadata by default
    pub fn metadata<R>(mut self, resolver: R) -> Self
    where
        R: Resolver<Req, Option<Metadata>> + 'static,
    {
        self.metadata = Some(Arc::new(resolver));
        self
    }

    /// Content type from a resolver that does not need the file content
    pub fn content_type<R>(mut self, resolver: R) -> Self
    where
        R: Resolver<Req, String> + 'static,
    {
        self.content_type = Some(Arc::new(PlainContentType(Arc::new(resolver))));
        self
    }

    /// Content type from a resolver with access to the file stream, such as
    /// [`AutoContentType`]
    pub fn content_type_resolver<R>(mut self, resolver: R) -> Self
    where
        R: ContentTypeResolver<Req> + 'static,
    {
        self.content_type = Some(Arc::new(resolver));
        self
    }

    /// Delete objects whose read-back failed (default: true)
    pub fn cleanup_orphans(mut self, cleanup: bool) -> Self {
        self.cleanup_orphans = cleanup;
        self
    }

    pub fn build(self) -> Result<BucketStorage<Req>, ConfigError> {
        let store = self.store.ok_or(ConfigError::MissingClient)?;

        let bucket = match self.bucket.ok_or(ConfigError::MissingBucket)? {
            Setting::Value(name) if !is_valid_bucket_name(&name) => {
                return Err(ConfigError::InvalidBucketName(name));
            }
            setting => setting.into_resolver(),
        };

        let resolvers = Resolvers {
            bucket,
            object_name: self
                .object_name
                .unwrap_or_else(|| Arc::new(RandomObjectName)),
            metadata: self
                .metadata
                .unwrap_or_else(|| Arc::new(StaticValue::new(None::<Metadata>))),
            content_type: self
                .content_type
                .unwrap_or_else(|| Arc::new(FixedContentType::default())),
        };

        Ok(BucketStorage {
            store,
            resolvers,
            cleanup_orphans: self.cleanup_orphans,
        })
    }
}
