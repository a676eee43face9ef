//! Upload parameter resolvers
//!
//! Every stored file needs a bucket, an object name, optional metadata and a
//! content type. Each of those is produced per upload by a resolver, an async
//! function of the request context and the incoming file.
//!
//! | Parameter | Trait | Default |
//! |-----------|-------|---------|
//! | bucket | [`Resolver<Req, String>`] | none, must be configured |
//! | object name | [`Resolver<Req, String>`] | [`RandomObjectName`] |
//! | metadata | [`Resolver<Req, Option<Metadata>>`] | no metadata |
//! | content type | [`ContentTypeResolver<Req>`] | [`FixedContentType`] (`application/octet-stream`) |
//!
//! The content-type resolver is the only one allowed to touch the file
//! stream; [`crate::sniff::AutoContentType`] uses that to classify content.

use crate::storage::FileStream;
use crate::upload::{FileInfo, IncomingFile};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Content type used when nothing better is known
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Number of random bytes behind a generated object name
const OBJECT_NAME_BYTES: usize = 16;

/// Resolver errors
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("File stream is no longer available")]
    StreamUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-upload resolution of one parameter
#[async_trait]
pub trait Resolver<Req, T>: Send + Sync {
    /// Compute the value for this request and file
    async fn resolve(&self, req: &Req, file: &FileInfo) -> Result<T, ResolveError>;
}

/// Constant value, the same for every upload
#[derive(Debug, Clone)]
pub struct StaticValue<T>(pub T);

impl<T> StaticValue<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }
}

#[async_trait]
impl<Req, T> Resolver<Req, T> for StaticValue<T>
where
    Req: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    async fn resolve(&self, _req: &Req, _file: &FileInfo) -> Result<T, ResolveError> {
        Ok(self.0.clone())
    }
}

/// Resolver backed by a plain function
///
/// ```
/// use mizuchi_storage::resolver::{from_fn, ResolveError, Resolver};
/// use mizuchi_storage::upload::FileInfo;
///
/// # tokio_test_block(async {
/// let object_name = from_fn(|user: &String, file: &FileInfo| -> Result<String, ResolveError> {
///     Ok(format!("{}/{}", user, file.original_name))
/// });
/// let info = FileInfo::new("avatar", "me.png");
/// let name = object_name.resolve(&"alice".to_string(), &info).await.unwrap();
/// assert_eq!(name, "alice/me.png");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct FnResolver<F>(F);

/// Wrap a function as a [`Resolver`]
pub fn from_fn<F>(f: F) -> FnResolver<F> {
    FnResolver(f)
}

#[async_trait]
impl<Req, T, F> Resolver<Req, T> for FnResolver<F>
where
    Req: Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(&Req, &FileInfo) -> Result<T, ResolveError> + Send + Sync,
{
    async fn resolve(&self, req: &Req, file: &FileInfo) -> Result<T, ResolveError> {
        (self.0)(req, file)
    }
}

/// Default object name: 16 random bytes, hex encoded
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomObjectName;

impl RandomObjectName {
    /// Generate a fresh 32 character name
    pub fn generate() -> String {
        let raw: [u8; OBJECT_NAME_BYTES] = rand::random();
        hex::encode(raw)
    }
}

#[async_trait]
impl<Req> Resolver<Req, String> for RandomObjectName
where
    Req: Send + Sync + 'static,
{
    async fn resolve(&self, _req: &Req, _file: &FileInfo) -> Result<String, ResolveError> {
        Ok(Self::generate())
    }
}

/// Configuration value that is either a constant or a resolver
pub enum Setting<Req, T> {
    Value(T),
    Resolver(Arc<dyn Resolver<Req, T>>),
}

impl<Req, T> Setting<Req, T>
where
    Req: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Turn the setting into a resolver
    pub fn into_resolver(self) -> Arc<dyn Resolver<Req, T>> {
        match self {
            Setting::Value(value) => Arc::new(StaticValue(value)),
            Setting::Resolver(resolver) => resolver,
        }
    }
}

// ============================================================================
// Content type
// ============================================================================

/// Outcome of content-type resolution
pub struct ContentTypeResolution {
    pub content_type: String,
    /// Stream to upload instead of the file's own stream
    pub replacement: Option<FileStream>,
}

impl ContentTypeResolution {
    /// Content type without a replacement stream
    pub fn plain(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            replacement: None,
        }
    }
}

impl std::fmt::Debug for ContentTypeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentTypeResolution")
            .field("content_type", &self.content_type)
            .field("replacement", &self.replacement.is_some())
            .finish()
    }
}

/// Content-type resolution with access to the file stream
///
/// An implementation that reads from the stream must take it out of the
/// file and hand back a replacement carrying the complete content.
#[async_trait]
pub trait ContentTypeResolver<Req>: Send + Sync {
    async fn resolve(
        &self,
        req: &Req,
        file: &mut IncomingFile,
    ) -> Result<ContentTypeResolution, ResolveError>;
}

/// Constant content type
#[derive(Debug, Clone)]
pub struct FixedContentType(String);

impl FixedContentType {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self(content_type.into())
    }
}

impl Default for FixedContentType {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENT_TYPE)
    }
}

/// Default content-type resolver
pub fn default_content_type() -> FixedContentType {
    FixedContentType::default()
}

#[async_trait]
impl<Req> ContentTypeResolver<Req> for FixedContentType
where
    Req: Send + Sync + 'static,
{
    async fn resolve(
        &self,
        _req: &Req,
        _file: &mut IncomingFile,
    ) -> Result<ContentTypeResolution, ResolveError> {
        Ok(ContentTypeResolution::plain(self.0.clone()))
    }
}

/// Content type from an ordinary resolver, leaving the stream untouched
pub(crate) struct PlainContentType<Req>(pub(crate) Arc<dyn Resolver<Req, String>>);

#[async_trait]
impl<Req> ContentTypeResolver<Req> for PlainContentType<Req>
where
    Req: Send + Sync + 'static,
{
    async fn resolve(
        &self,
        req: &Req,
        file: &mut IncomingFile,
    ) -> Result<ContentTypeResolution, ResolveError> {
        let content_type = self.0.resolve(req, file.info()).await?;
        Ok(ContentTypeResolution::plain(content_type))
    }
}
