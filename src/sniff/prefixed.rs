//! Buffered-prefix stream decorator

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Yields a captured prefix, then everything the inner stream produces.
    ///
    /// Polling is demand driven: the inner stream is only polled once the
    /// prefix has been consumed, so a slow consumer holds back the source
    /// instead of buffering it.
    pub struct PrefixedStream<S> {
        prefix: Option<Bytes>,
        #[pin]
        inner: S,
    }
}

impl<S> PrefixedStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self {
            prefix: Some(prefix).filter(|p| !p.is_empty()),
            inner,
        }
    }

    /// Whether the prefix is still waiting to be read
    pub fn has_prefix(&self) -> bool {
        self.prefix.is_some()
    }
}

impl<S> Stream for PrefixedStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if let Some(prefix) = this.prefix.take() {
            return Poll::Ready(Some(Ok(prefix)));
        }
        this.inner.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let extra = usize::from(self.prefix.is_some());
        let (lower, upper) = self.inner.size_hint();
        (
            lower.saturating_add(extra),
            upper.and_then(|u| u.checked_add(extra)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, TryStreamExt};

    fn chunks(parts: &[&'static [u8]]) -> Vec<io::Result<Bytes>> {
        parts.iter().map(|p| Ok(Bytes::from_static(p))).collect()
    }

    #[tokio::test]
    async fn test_prefix_then_inner() {
        let stream = PrefixedStream::new(
            Bytes::from_static(b"head"),
            futures::stream::iter(chunks(&[b"-body", b"-tail"])),
        );
        let out: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(out.concat(), b"head-body-tail");
    }

    #[tokio::test]
    async fn test_empty_prefix_is_skipped() {
        let mut stream = PrefixedStream::new(Bytes::new(), futures::stream::iter(chunks(&[b"x"])));
        assert!(!stream.has_prefix());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"x");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_inner_error_is_forwarded() {
        let inner = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"p"), inner);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_size_hint_counts_prefix() {
        let stream = PrefixedStream::new(
            Bytes::from_static(b"p"),
            futures::stream::iter(chunks(&[b"a", b"b"])),
        );
        assert_eq!(stream.size_hint(), (3, Some(3)));
    }
}
