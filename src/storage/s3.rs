//! S3 backend
//!
//! [`ObjectStore`] implementation on top of `aws-sdk-s3`, usable against AWS
//! or any S3-compatible service (MinIO, RustFS, Ceph RGW).
//!
//! # Streaming
//!
//! Writes never hold more than one part in memory. The body is cut into
//! `part_size` parts while it is read:
//!
//! - if the stream ends inside the first part, a single `PutObject` is sent
//! - otherwise a multipart upload is created and each part uploaded as soon
//!   as it is full
//!
//! A failed multipart upload is aborted so that the service releases the
//! parts already received.
//!
//! # Tracing
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | PutObject / multipart | `s3.put_object` | bucket, key, content_type, bytes, parts, etag |
//! | GetObject | `s3.get_object` | bucket, key |
//! | DeleteObject | `s3.delete_object` | bucket, key |

use super::{BackendError, FileStream, Metadata, ObjectStore, PutObjectRequest};
use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::io;

/// Minimum part size (5MB) - S3 requirement
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default part size (8MB)
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Maximum parts allowed
pub const MAX_PARTS: i32 = 10000;

/// S3-compatible object store
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    part_size: usize,
}

impl S3Backend {
    /// Wrap an already configured SDK client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Build a client from configuration
    ///
    /// Static credentials are used when both keys are present, otherwise the
    /// default AWS provider chain applies. A custom endpoint switches to
    /// path-style addressing, which MinIO and most S3 clones require.
    pub async fn from_config(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "mizuchi-storage",
            ));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::debug!(
            region = %config.region,
            endpoint = ?config.endpoint,
            part_size = config.part_size,
            "S3 backend configured"
        );

        Self::new(Client::from_conf(builder.build())).with_part_size(config.part_size)
    }

    /// Set the multipart part size, clamped to [`MIN_PART_SIZE`]
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = std::cmp::max(part_size, MIN_PART_SIZE);
        self
    }

    /// Get the multipart part size
    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Get the underlying SDK client
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn put_single(
        &self,
        target: &Target,
        body: Bytes,
    ) -> Result<String, BackendError> {
        let output = self
            .client
            .put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .content_type(&target.content_type)
            .set_metadata(target.metadata.clone())
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &target.bucket, &target.key))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Response("PutObject response carried no ETag".into()))
    }

    async fn put_multipart(
        &self,
        target: &Target,
        first: Bytes,
        reader: &mut PartReader,
    ) -> Result<(String, i32), BackendError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .content_type(&target.content_type)
            .set_metadata(target.metadata.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &target.bucket, &target.key))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| {
                BackendError::Response("CreateMultipartUpload returned no upload id".into())
            })?
            .to_string();

        match self.upload_parts(target, &upload_id, first, reader).await {
            Ok(done) => Ok(done),
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&target.bucket)
                    .key(&target.key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(
                        upload_id = %upload_id,
                        error = %DisplayErrorContext(&abort),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        target: &Target,
        upload_id: &str,
        first: Bytes,
        reader: &mut PartReader,
    ) -> Result<(String, i32), BackendError> {
        let mut completed = Vec::new();
        let mut part = first;
        let mut part_number: i32 = 1;

        loop {
            if part_number > MAX_PARTS {
                return Err(BackendError::Request(format!(
                    "Object exceeds {} parts of {} bytes",
                    MAX_PARTS, self.part_size
                )));
            }

            let bytes = part.len();
            let output = self
                .client
                .upload_part()
                .bucket(&target.bucket)
                .key(&target.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &target.bucket, &target.key))?;

            tracing::debug!(part_number, bytes, "UploadPart completed");

            completed.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            part = reader.next_part().await?;
            if part.is_empty() {
                break;
            }
            part_number += 1;
        }

        let parts = completed.len() as i32;
        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &target.bucket, &target.key))?;

        let etag = output.e_tag().map(str::to_string).ok_or_else(|| {
            BackendError::Response("CompleteMultipartUpload response carried no ETag".into())
        })?;

        Ok((etag, parts))
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, request),
        fields(
            s3.bucket = %request.bucket,
            s3.key = %request.key,
            http.content_type = %request.content_type,
            upload.bytes = tracing::field::Empty,
            upload.parts = tracing::field::Empty,
            s3.etag = tracing::field::Empty
        )
    )]
    async fn put_object(&self, request: PutObjectRequest) -> Result<String, BackendError> {
        let PutObjectRequest {
            bucket,
            key,
            content_type,
            metadata,
            body,
        } = request;
        let target = Target {
            bucket,
            key,
            content_type,
            metadata,
        };

        let mut reader = PartReader::new(body, self.part_size);
        let first = reader.next_part().await?;

        let (etag, parts) = if reader.is_exhausted() {
            (self.put_single(&target, first).await?, 1)
        } else {
            self.put_multipart(&target, first, &mut reader).await?
        };

        let span = tracing::Span::current();
        span.record("upload.bytes", reader.total());
        span.record("upload.parts", parts);
        span.record("s3.etag", etag.as_str());

        tracing::info!(
            etag = %etag,
            bytes = reader.total(),
            parts,
            "PutObject completed"
        );

        Ok(etag)
    }

    #[tracing::instrument(
        name = "s3.get_object",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key)
    )]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<FileStream, BackendError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, key))?;

        let stream = futures::stream::try_unfold(output.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(io::Error::other(e)),
            }
        });

        Ok(Box::pin(stream))
    }

    #[tracing::instrument(
        name = "s3.delete_object",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key)
    )]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, key))?;

        tracing::info!("DeleteObject completed");
        Ok(())
    }
}

/// Destination of a write, split from its body
struct Target {
    bucket: String,
    key: String,
    content_type: String,
    metadata: Option<Metadata>,
}

/// Cuts a byte stream into parts of at most `part_size` bytes
struct PartReader {
    body: FileStream,
    buffer: BytesMut,
    part_size: usize,
    finished: bool,
    total: u64,
}

impl PartReader {
    fn new(body: FileStream, part_size: usize) -> Self {
        Self {
            body,
            buffer: BytesMut::new(),
            part_size,
            finished: false,
            total: 0,
        }
    }

    /// Next part; empty once the stream is drained
    async fn next_part(&mut self) -> io::Result<Bytes> {
        while !self.finished && self.buffer.len() < self.part_size {
            match self.body.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.total += chunk.len() as u64;
                    self.buffer.extend_from_slice(&chunk);
                }
                None => self.finished = true,
            }
        }

        let take = std::cmp::min(self.part_size, self.buffer.len());
        Ok(self.buffer.split_to(take).freeze())
    }

    fn is_exhausted(&self) -> bool {
        self.finished && self.buffer.is_empty()
    }

    fn total(&self) -> u64 {
        self.total
    }
}

fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, bucket: &str, key: &str) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    if status == Some(404) || matches!(err.code(), Some("NoSuchKey") | Some("NotFound")) {
        return BackendError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
    }

    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(_) => BackendError::Response(message),
        _ => BackendError::Request(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(chunks: Vec<&'static [u8]>) -> FileStream {
        Box::pin(futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, io::Error>(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn test_part_reader_small_body_fits_one_part() {
        let mut reader = PartReader::new(stream_of(vec![b"abc", b"def"]), 16);
        let part = reader.next_part().await.unwrap();
        assert_eq!(&part[..], b"abcdef");
        assert!(reader.is_exhausted());
        assert_eq!(reader.total(), 6);
    }

    #[tokio::test]
    async fn test_part_reader_splits_across_chunk_boundaries() {
        let mut reader = PartReader::new(stream_of(vec![b"abcd", b"efgh", b"ij"]), 3);
        let mut parts = Vec::new();
        loop {
            let part = reader.next_part().await.unwrap();
            if part.is_empty() {
                break;
            }
            parts.push(part);
        }
        assert_eq!(parts.len(), 4);
        assert_eq!(parts.concat(), b"abcdefghij");
        assert!(parts[..3].iter().all(|p| p.len() == 3));
        assert!(reader.is_exhausted());
    }

    #[tokio::test]
    async fn test_part_reader_empty_stream() {
        let mut reader = PartReader::new(stream_of(vec![]), 8);
        let part = reader.next_part().await.unwrap();
        assert!(part.is_empty());
        assert!(reader.is_exhausted());
    }

    #[tokio::test]
    async fn test_part_size_is_clamped() {
        let config = S3Config {
            region: "us-east-1".into(),
            endpoint: Some("http://localhost:9000".into()),
            access_key: Some("test-access".into()),
            secret_key: Some("test-secret".into()),
            part_size: 1024,
        };
        let backend = S3Backend::from_config(&config).await;
        assert_eq!(backend.part_size(), MIN_PART_SIZE);
    }
}
