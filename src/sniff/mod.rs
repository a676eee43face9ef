//! Content-type sniffing
//!
//! [`AutoContentType`] reads the first chunk of an upload, classifies it and
//! hands back a [`PrefixedStream`] that replays the chunk ahead of the rest of
//! the source, so the stored object is byte-for-byte the original upload.
//!
//! Classification order:
//!
//! 1. Binary magic numbers (`infer`)
//! 2. SVG documents (`quick-xml`): the first element must be `<svg>`
//! 3. Text signatures found by `infer` (HTML, XML, scripts)
//! 4. `application/octet-stream`
//!
//! SVG is checked ahead of the text signatures because an SVG file starting
//! with `<?xml` or `<!--` also matches them.
//!
//! A stream that ends before producing any data is classified as
//! `application/octet-stream` and replaced by an empty stream.

mod prefixed;

pub use prefixed::PrefixedStream;

use crate::metrics;
use crate::resolver::{
    ContentTypeResolution, ContentTypeResolver, ResolveError, DEFAULT_CONTENT_TYPE,
};
use crate::storage::FileStream;
use crate::upload::IncomingFile;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use quick_xml::events::Event;
use quick_xml::Reader;

/// MIME type of SVG documents
pub const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// Auto-detecting content-type resolver
pub const AUTO_CONTENT_TYPE: AutoContentType = AutoContentType;

/// Content-type resolver that sniffs the upload stream
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoContentType;

/// Auto-detecting content-type resolver
pub fn auto_content_type() -> AutoContentType {
    AutoContentType
}

#[async_trait]
impl<Req> ContentTypeResolver<Req> for AutoContentType
where
    Req: Send + Sync + 'static,
{
    #[tracing::instrument(
        name = "sniff.content_type",
        skip_all,
        fields(
            file.original_name = %file.info().original_name,
            sniff.mime = tracing::field::Empty,
            sniff.prefix_bytes = tracing::field::Empty
        )
    )]
    async fn resolve(
        &self,
        _req: &Req,
        file: &mut IncomingFile,
    ) -> Result<ContentTypeResolution, ResolveError> {
        let mut source = file.take_stream().ok_or(ResolveError::StreamUnavailable)?;

        let first = loop {
            match source.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break Some(chunk),
                Some(Err(e)) => return Err(ResolveError::Io(e)),
                None => break None,
            }
        };

        let prefix_bytes = first.as_ref().map_or(0, Bytes::len);
        let (mime, replacement): (&'static str, FileStream) = match first {
            Some(chunk) => (
                detect_content_type(&chunk),
                Box::pin(PrefixedStream::new(chunk, source)),
            ),
            None => (DEFAULT_CONTENT_TYPE, Box::pin(futures::stream::empty())),
        };

        let span = tracing::Span::current();
        span.record("sniff.mime", mime);
        span.record("sniff.prefix_bytes", prefix_bytes);
        metrics::record_sniffed_content_type(mime);

        Ok(ContentTypeResolution {
            content_type: mime.to_string(),
            replacement: Some(replacement),
        })
    }
}

/// Classify a leading chunk of content
pub fn detect_content_type(chunk: &[u8]) -> &'static str {
    match infer::get(chunk) {
        Some(kind) if kind.matcher_type() != infer::MatcherType::Text => kind.mime_type(),
        text => {
            if is_svg(chunk) {
                SVG_CONTENT_TYPE
            } else {
                text.map_or(DEFAULT_CONTENT_TYPE, |kind| kind.mime_type())
            }
        }
    }
}

/// Check whether a chunk starts a well-formed SVG document
///
/// Only the prolog and the root start tag need to be present; the chunk may
/// end anywhere after that, including inside a multi-byte character.
pub fn is_svg(chunk: &[u8]) -> bool {
    let Some(text) = utf8_prefix(chunk) else {
        return false;
    };
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Decl(_)) | Ok(Event::Comment(_)) | Ok(Event::DocType(_)) | Ok(Event::PI(_)) => {}
            Ok(Event::Text(t)) if t.iter().all(u8::is_ascii_whitespace) => {}
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return e.name().local_name().as_ref() == b"svg";
            }
            _ => return false,
        }
    }
}

/// Longest valid UTF-8 prefix, tolerating a character cut at the chunk end
fn utf8_prefix(chunk: &[u8]) -> Option<&str> {
    match std::str::from_utf8(chunk) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&chunk[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_detect_binary_signatures() {
        assert_eq!(detect_content_type(PNG_HEADER), "image/png");
        assert_eq!(detect_content_type(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), "image/jpeg");
        assert_eq!(detect_content_type(b"GIF89a\x01\x00"), "image/gif");
        assert_eq!(detect_content_type(b"%PDF-1.7\n"), "application/pdf");
    }

    #[test]
    fn test_detect_svg() {
        assert_eq!(
            detect_content_type(br#"<svg xmlns="http://www.w3.org/2000/svg"></svg>"#),
            SVG_CONTENT_TYPE
        );
        assert_eq!(
            detect_content_type(
                b"<?xml version=\"1.0\"?>\n<!-- logo -->\n<!DOCTYPE svg>\n<svg width=\"1\"/>"
            ),
            SVG_CONTENT_TYPE
        );
    }

    #[test]
    fn test_svg_prefix_cut_mid_document() {
        assert!(is_svg(b"<svg viewBox=\"0 0 10 10\"><path d=\"M0 0 L10 1"));
    }

    #[test]
    fn test_non_svg_xml() {
        assert!(!is_svg(b"<?xml version=\"1.0\"?><rss></rss>"));
        assert_ne!(
            detect_content_type(b"<?xml version=\"1.0\"?><rss></rss>"),
            SVG_CONTENT_TYPE
        );
    }

    #[test]
    fn test_plain_text_is_not_svg() {
        assert!(!is_svg(b"hello svg world"));
        assert!(!is_svg(&[0xC3, 0x28, 0x3C]));
    }

    #[test]
    fn test_unknown_bytes_fall_back() {
        assert_eq!(detect_content_type(b"\x00\x01\x02plain bytes"), DEFAULT_CONTENT_TYPE);
        assert_eq!(detect_content_type(b""), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_utf8_prefix_tolerates_cut_character() {
        let text = "<svg>é".as_bytes();
        let cut = &text[..text.len() - 1];
        assert_eq!(utf8_prefix(cut), Some("<svg>"));
    }
}
