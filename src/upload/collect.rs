//! Upload parameter collection
//!
//! Bucket, object name and metadata are independent of each other and are
//! resolved concurrently. The content type is resolved afterwards because
//! its resolver may consume the file stream.

use super::IncomingFile;
use crate::resolver::{ContentTypeResolution, ContentTypeResolver, ResolveError, Resolver};
use crate::storage::{FileStream, Metadata};
use std::sync::Arc;

/// Resolvers for every upload parameter
pub struct Resolvers<Req> {
    pub bucket: Arc<dyn Resolver<Req, String>>,
    pub object_name: Arc<dyn Resolver<Req, String>>,
    pub metadata: Arc<dyn Resolver<Req, Option<Metadata>>>,
    pub content_type: Arc<dyn ContentTypeResolver<Req>>,
}

impl<Req> Clone for Resolvers<Req> {
    fn clone(&self) -> Self {
        Self {
            bucket: Arc::clone(&self.bucket),
            object_name: Arc::clone(&self.object_name),
            metadata: Arc::clone(&self.metadata),
            content_type: Arc::clone(&self.content_type),
        }
    }
}

/// Parameters of a single upload
pub struct ResolvedParams {
    pub bucket: String,
    pub object_name: String,
    pub metadata: Option<Metadata>,
    pub content_type: String,
    /// Stream to upload in place of the file's own stream
    pub replacement: Option<FileStream>,
}

impl std::fmt::Debug for ResolvedParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedParams")
            .field("bucket", &self.bucket)
            .field("object_name", &self.object_name)
            .field("metadata", &self.metadata)
            .field("content_type", &self.content_type)
            .field("replacement", &self.replacement.is_some())
            .finish()
    }
}

/// Resolve all parameters for `file`
///
/// The first failing resolver aborts collection; the other in-flight
/// resolvers are dropped and the content-type resolver never runs.
pub async fn collect<Req>(
    resolvers: &Resolvers<Req>,
    req: &Req,
    file: &mut IncomingFile,
) -> Result<ResolvedParams, ResolveError> {
    let info = file.info();
    let (bucket, object_name, metadata) = futures::try_join!(
        resolvers.bucket.resolve(req, info),
        resolvers.object_name.resolve(req, info),
        resolvers.metadata.resolve(req, info),
    )?;

    let ContentTypeResolution {
        content_type,
        replacement,
    } = resolvers.content_type.resolve(req, file).await?;

    Ok(ResolvedParams {
        bucket,
        object_name,
        metadata,
        content_type,
        replacement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{from_fn, FixedContentType, RandomObjectName, StaticValue};
    use crate::upload::FileInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct Delayed<T> {
        delay: Duration,
        outcome: fn() -> Result<T, ResolveError>,
    }

    #[async_trait]
    impl<T: Send + 'static> Resolver<(), T> for Delayed<T> {
        async fn resolve(&self, _req: &(), _file: &FileInfo) -> Result<T, ResolveError> {
            tokio::time::sleep(self.delay).await;
            (self.outcome)()
        }
    }

    #[derive(Default)]
    struct CountingContentType(AtomicUsize);

    #[async_trait]
    impl ContentTypeResolver<()> for CountingContentType {
        async fn resolve(
            &self,
            _req: &(),
            _file: &mut IncomingFile,
        ) -> Result<ContentTypeResolution, ResolveError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ContentTypeResolution::plain("text/plain"))
        }
    }

    fn file() -> IncomingFile {
        IncomingFile::from_stream(FileInfo::new("doc", "notes.txt"), futures::stream::empty())
    }

    fn resolvers(content_type: Arc<dyn ContentTypeResolver<()>>) -> Resolvers<()> {
        Resolvers {
            bucket: Arc::new(StaticValue::new("uploads".to_string())),
            object_name: Arc::new(RandomObjectName),
            metadata: Arc::new(StaticValue::new(None::<Metadata>)),
            content_type,
        }
    }

    #[tokio::test]
    async fn test_collect_defaults() {
        let mut file = file();
        let params = collect(&resolvers(Arc::new(FixedContentType::default())), &(), &mut file)
            .await
            .unwrap();
        assert_eq!(params.bucket, "uploads");
        assert_eq!(params.object_name.len(), 32);
        assert!(params.metadata.is_none());
        assert_eq!(params.content_type, "application/octet-stream");
        assert!(params.replacement.is_none());
        assert!(file.has_stream());
    }

    #[tokio::test]
    async fn test_results_land_in_their_slots_regardless_of_completion_order() {
        let mut set = resolvers(Arc::new(FixedContentType::default()));
        set.bucket = Arc::new(Delayed::<String> {
            delay: Duration::from_millis(30),
            outcome: || Ok("slow-bucket".to_string()),
        });
        set.object_name = Arc::new(Delayed::<String> {
            delay: Duration::from_millis(1),
            outcome: || Ok("fast-name".to_string()),
        });
        set.metadata = Arc::new(Delayed::<Option<Metadata>> {
            delay: Duration::from_millis(15),
            outcome: || Ok(Some(Metadata::from([("k".to_string(), "v".to_string())]))),
        });

        let params = collect(&set, &(), &mut file()).await.unwrap();
        assert_eq!(params.bucket, "slow-bucket");
        assert_eq!(params.object_name, "fast-name");
        assert_eq!(params.metadata.unwrap()["k"], "v");
    }

    #[tokio::test]
    async fn test_first_error_wins_and_content_type_never_runs() {
        let counter = Arc::new(CountingContentType::default());
        let mut set = resolvers(counter.clone());
        set.bucket = Arc::new(Delayed::<String> {
            delay: Duration::from_millis(5),
            outcome: || Err(ResolveError::Rejected("bucket denied".into())),
        });
        set.object_name = Arc::new(Delayed::<String> {
            delay: Duration::from_secs(30),
            outcome: || Ok("never".to_string()),
        });

        let started = Instant::now();
        let err = collect(&set, &(), &mut file()).await.unwrap_err();
        assert!(matches!(err, ResolveError::Rejected(ref m) if m == "bucket denied"));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_two_failures_surface_one_error() {
        let counter = Arc::new(CountingContentType::default());
        let mut set = resolvers(counter.clone());
        set.bucket = Arc::new(Delayed::<String> {
            delay: Duration::from_millis(20),
            outcome: || Err(ResolveError::Rejected("bucket denied".into())),
        });
        set.object_name = Arc::new(Delayed::<String> {
            delay: Duration::from_millis(1),
            outcome: || Err(ResolveError::Rejected("name denied".into())),
        });

        let result = collect(&set, &(), &mut file()).await;
        match result {
            Err(ResolveError::Rejected(message)) => assert_eq!(message, "name denied"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_content_type_error_aborts() {
        let mut set = resolvers(Arc::new(FixedContentType::default()));
        set.content_type = Arc::new(crate::resolver::PlainContentType(Arc::new(from_fn(
            |_: &(), _: &FileInfo| -> Result<String, ResolveError> {
                Err(ResolveError::Rejected("no type".into()))
            },
        ))));
        let err = collect(&set, &(), &mut file()).await.unwrap_err();
        assert_eq!(err.to_string(), "Rejected: no type");
    }

    #[tokio::test]
    async fn test_content_type_resolver_runs_once() {
        let counter = Arc::new(CountingContentType::default());
        let params = collect(&resolvers(counter.clone()), &(), &mut file())
            .await
            .unwrap();
        assert_eq!(params.content_type, "text/plain");
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
