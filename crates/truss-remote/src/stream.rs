//! Lazy decoding of chunked prediction output.
//!
//! A [`PredictionStream`] pulls raw frames from the transport, cuts them into
//! reads of at most [`STREAM_CHUNK_SIZE`] bytes and decodes every read as it
//! arrives. Decoder state is carried between reads, so a character split
//! across two reads is emitted whole with the second one.

use crate::{error::TrussError, transport::ByteStream};
use bytes::Bytes;
use encoding_rs::{DecoderResult, Encoding};
use futures::{Stream, StreamExt, TryStreamExt, stream::FusedStream};
use http::{HeaderMap, header::CONTENT_TYPE};
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

/// Maximum number of raw bytes decoded per yielded chunk.
pub const STREAM_CHUNK_SIZE: usize = 8192;

/// Encoding used when the response does not declare a charset.
pub static DEFAULT_STREAM_ENCODING: &Encoding = &encoding_rs::UTF_8_INIT;

/// The `charset` parameter of the response's `Content-Type`, if any.
fn declared_charset(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Labels naming ISO-8859-1 proper, compared without separators.
///
/// The WHATWG registry folds these into windows-1252, which maps 0x80..=0x9F
/// to punctuation instead of the C1 controls.
const LATIN1_LABELS: &[&str] = &["latin1", "l1", "iso88591", "isoir100", "cp819", "ibm819"];

fn compact_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !matches!(c, '-' | '_'))
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Resolve a charset label, also accepting spellings such as `utf_8` that
/// differ from the registered labels only by separators.
fn charset_for_label(label: &str) -> Option<Charset> {
    let compact = compact_label(label.trim());
    if LATIN1_LABELS.contains(&compact.as_str()) {
        return Some(Charset::Latin1);
    }
    Encoding::for_label(label.as_bytes())
        .or_else(|| Encoding::for_label(compact.as_bytes()))
        .map(|encoding| Charset::Whatwg {
            encoding,
            decoder: encoding.new_decoder_without_bom_handling(),
        })
}

enum Charset {
    /// One byte per character, no state carried between reads.
    Latin1,
    Whatwg {
        encoding: &'static Encoding,
        decoder: encoding_rs::Decoder,
    },
}

/// Incremental decoder for one response body.
pub struct ChunkDecoder {
    charset: Charset,
    consumed: usize,
}

impl ChunkDecoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            charset: Charset::Whatwg {
                encoding,
                decoder: encoding.new_decoder_without_bom_handling(),
            },
            consumed: 0,
        }
    }

    /// Pick the encoding declared by `headers`, falling back to UTF-8.
    pub fn for_headers(headers: &HeaderMap) -> Result<Self, TrussError> {
        match declared_charset(headers) {
            Some(label) => {
                let charset =
                    charset_for_label(&label).ok_or(TrussError::UnknownEncoding(label))?;
                Ok(Self {
                    charset,
                    consumed: 0,
                })
            }
            None => Ok(Self::new(DEFAULT_STREAM_ENCODING)),
        }
    }

    /// Canonical name of the encoding in use.
    pub fn name(&self) -> &'static str {
        match &self.charset {
            Charset::Latin1 => "ISO-8859-1",
            Charset::Whatwg { encoding, .. } => encoding.name(),
        }
    }

    /// Decode the next read. Bytes of an incomplete trailing character are
    /// held back until the following call.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<String, TrussError> {
        self.decode_inner(bytes, false)
    }

    /// Flush the decoder at end of stream.
    pub fn finish(mut self) -> Result<String, TrussError> {
        self.decode_inner(&[], true)
    }

    fn decode_inner(&mut self, bytes: &[u8], last: bool) -> Result<String, TrussError> {
        let name = self.name();
        let decoder = match &mut self.charset {
            Charset::Latin1 => {
                self.consumed += bytes.len();
                return Ok(encoding_rs::mem::decode_latin1(bytes).into_owned());
            }
            Charset::Whatwg { decoder, .. } => decoder,
        };

        let capacity = decoder
            .max_utf8_buffer_length_without_replacement(bytes.len())
            .ok_or_else(|| decode_error(name, "read too large to decode".to_string()))?;
        let mut out = String::with_capacity(capacity);

        let (result, read) = decoder.decode_to_string_without_replacement(bytes, &mut out, last);
        self.consumed += read;

        match result {
            DecoderResult::InputEmpty => Ok(out),
            DecoderResult::Malformed(bad, extra) => {
                let offset = self.consumed.saturating_sub(bad as usize + extra as usize);
                Err(decode_error(
                    name,
                    format!("malformed sequence of {bad} byte(s) at offset {offset}"),
                ))
            }
            DecoderResult::OutputFull => {
                Err(decode_error(name, "decode buffer exhausted".to_string()))
            }
        }
    }
}

fn decode_error(encoding: &'static str, message: String) -> TrussError {
    TrussError::Decode { encoding, message }
}

impl std::fmt::Debug for ChunkDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkDecoder")
            .field("encoding", &self.name())
            .field("consumed", &self.consumed)
            .finish()
    }
}

/// Single-pass stream of decoded text chunks from a chunked prediction.
///
/// Once the transport signals end of body, or any error is yielded, the
/// stream is terminated and keeps returning `None`.
pub struct PredictionStream {
    body: Option<ByteStream>,
    // `None` once terminated
    decoder: Option<ChunkDecoder>,
    pending: Bytes,
}

impl PredictionStream {
    pub fn new(body: ByteStream, decoder: ChunkDecoder) -> Self {
        Self {
            body: Some(body),
            decoder: Some(decoder),
            pending: Bytes::new(),
        }
    }

    /// Drain the remaining chunks into one string.
    pub async fn collect_text(self) -> Result<String, TrussError> {
        self.try_collect().await
    }

    fn terminate(&mut self) {
        self.body = None;
        self.decoder = None;
        self.pending.clear();
    }
}

impl Stream for PredictionStream {
    type Item = Result<String, TrussError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(decoder) = this.decoder.as_mut() else {
                return Poll::Ready(None);
            };

            if !this.pending.is_empty() {
                let read = this
                    .pending
                    .split_to(this.pending.len().min(STREAM_CHUNK_SIZE));
                match decoder.decode(&read) {
                    Ok(text) if text.is_empty() => continue,
                    Ok(text) => return Poll::Ready(Some(Ok(text))),
                    Err(e) => {
                        this.terminate();
                        return Poll::Ready(Some(Err(e)));
                    }
                }
            }

            let frame = match this.body.as_mut() {
                Some(body) => ready!(body.poll_next_unpin(cx)),
                None => None,
            };

            match frame {
                Some(Ok(bytes)) => {
                    log::trace!("received {} bytes", bytes.len());
                    this.pending = bytes;
                }
                Some(Err(e)) => {
                    this.terminate();
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.body = None;
                    let Some(decoder) = this.decoder.take() else {
                        return Poll::Ready(None);
                    };
                    return match decoder.finish() {
                        Ok(tail) if tail.is_empty() => Poll::Ready(None),
                        Ok(tail) => Poll::Ready(Some(Ok(tail))),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
            }
        }
    }
}

impl FusedStream for PredictionStream {
    fn is_terminated(&self) -> bool {
        self.decoder.is_none()
    }
}

impl std::fmt::Debug for PredictionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionStream")
            .field("decoder", &self.decoder)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkDecoder, PredictionStream, STREAM_CHUNK_SIZE};
    use crate::{error::TrussError, transport::ByteStream};
    use bytes::Bytes;
    use encoding_rs::{UTF_8, WINDOWS_1252};
    use futures::{StreamExt, stream::FusedStream};
    use http::{HeaderMap, HeaderValue, header::CONTENT_TYPE};

    fn frames(parts: Vec<Vec<u8>>) -> ByteStream {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p)))).boxed()
    }

    fn content_type(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
        headers
    }

    fn content_type_owned(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn decoder_defaults_to_utf8() {
        let decoder = ChunkDecoder::for_headers(&HeaderMap::new()).unwrap();
        assert_eq!(decoder.name(), UTF_8.name());

        let decoder = ChunkDecoder::for_headers(&content_type("text/plain")).unwrap();
        assert_eq!(decoder.name(), UTF_8.name());
    }

    #[test]
    fn decoder_honours_declared_charset() {
        let decoder =
            ChunkDecoder::for_headers(&content_type("text/plain; charset=latin-1")).unwrap();
        assert_eq!(decoder.name(), "ISO-8859-1");

        let decoder =
            ChunkDecoder::for_headers(&content_type("text/plain; Charset=\"utf-8\"")).unwrap();
        assert_eq!(decoder.name(), UTF_8.name());

        let decoder =
            ChunkDecoder::for_headers(&content_type("text/plain; charset=windows-1252")).unwrap();
        assert_eq!(decoder.name(), WINDOWS_1252.name());
    }

    #[test]
    fn iso_8859_1_labels_are_not_folded_into_windows_1252() {
        for label in ["latin-1", "latin1", "ISO-8859-1", "iso_8859_1", "l1"] {
            let headers = content_type_owned(&format!("text/plain; charset={label}"));
            let mut decoder = ChunkDecoder::for_headers(&headers).unwrap();
            assert_eq!(decoder.name(), "ISO-8859-1", "{label}");
            assert_eq!(
                decoder.decode(&[0x80, 0x93, 0x9F]).unwrap(),
                "\u{80}\u{93}\u{9f}",
                "{label}"
            );
        }
    }

    #[test]
    fn unknown_charset_is_an_error() {
        let err = ChunkDecoder::for_headers(&content_type("text/plain; charset=klingon"))
            .expect_err("unknown label should fail");
        match err {
            TrussError::UnknownEncoding(label) => assert_eq!(label, "klingon"),
            other => panic!("expected UnknownEncoding, got {other}"),
        }
    }

    #[test]
    fn split_character_is_carried_to_next_read() {
        let bytes = "héllo".as_bytes();
        let mut decoder = ChunkDecoder::new(UTF_8);
        // 'é' is two bytes; cut between them
        assert_eq!(decoder.decode(&bytes[..2]).unwrap(), "h");
        assert_eq!(decoder.decode(&bytes[2..]).unwrap(), "éllo");
        assert_eq!(decoder.finish().unwrap(), "");
    }

    #[test]
    fn malformed_utf8_reports_offset() {
        let mut decoder = ChunkDecoder::new(UTF_8);
        assert_eq!(decoder.decode(b"ok").unwrap(), "ok");
        let err = decoder.decode(&[b'!', 0xFF]).expect_err("0xFF is never valid UTF-8");
        match err {
            TrussError::Decode { encoding, message } => {
                assert_eq!(encoding, "UTF-8");
                assert!(message.contains("offset 3"), "{message}");
            }
            other => panic!("expected Decode, got {other}"),
        }
    }

    #[test]
    fn truncated_trailing_character_fails_on_finish() {
        let mut decoder = ChunkDecoder::new(UTF_8);
        assert_eq!(decoder.decode(&[0xC3]).unwrap(), "");
        assert!(matches!(decoder.finish(), Err(TrussError::Decode { .. })));
    }

    #[tokio::test]
    async fn stream_reads_at_most_chunk_size_bytes() {
        let body = vec![b'a'; STREAM_CHUNK_SIZE * 2 + 10];
        let decoder = ChunkDecoder::new(UTF_8);
        let chunks: Vec<String> = PredictionStream::new(frames(vec![body]), decoder)
            .map(|c| c.unwrap())
            .collect()
            .await;

        let lens: Vec<usize> = chunks.iter().map(String::len).collect();
        assert_eq!(lens, vec![STREAM_CHUNK_SIZE, STREAM_CHUNK_SIZE, 10]);
    }

    #[tokio::test]
    async fn concatenated_chunks_reproduce_body_across_boundaries() {
        let mut text = "a".repeat(STREAM_CHUNK_SIZE - 1);
        text.push_str("ü€ and some more text 🚀");
        let raw = text.as_bytes().to_vec();
        // Irregular transport framing on top of the fixed-size reads
        let parts = vec![
            raw[..5].to_vec(),
            raw[5..STREAM_CHUNK_SIZE + 2].to_vec(),
            raw[STREAM_CHUNK_SIZE + 2..].to_vec(),
        ];

        let stream = PredictionStream::new(frames(parts), ChunkDecoder::new(UTF_8));
        assert_eq!(stream.collect_text().await.unwrap(), text);
    }

    #[tokio::test]
    async fn latin1_chunks_decode_with_declared_charset() {
        let decoder =
            ChunkDecoder::for_headers(&content_type("text/plain; charset=latin-1")).unwrap();
        let stream = PredictionStream::new(
            frames(vec![b"caf".to_vec(), vec![0xE9, b' ', b'o', b'l', 0xE9]]),
            decoder,
        );
        assert_eq!(stream.collect_text().await.unwrap(), "café olé");
    }

    #[tokio::test]
    async fn latin1_control_range_maps_to_same_code_points() {
        let decoder =
            ChunkDecoder::for_headers(&content_type("text/plain; charset=latin-1")).unwrap();
        let stream = PredictionStream::new(
            frames(vec![vec![0x80, 0x93], vec![0x9F, 0xFF]]),
            decoder,
        );
        assert_eq!(
            stream.collect_text().await.unwrap(),
            "\u{80}\u{93}\u{9f}\u{ff}"
        );
    }

    #[tokio::test]
    async fn exhausted_stream_stays_exhausted() {
        let mut stream =
            PredictionStream::new(frames(vec![b"done".to_vec()]), ChunkDecoder::new(UTF_8));

        assert_eq!(stream.next().await.unwrap().unwrap(), "done");
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn transport_error_is_yielded_then_stream_ends() {
        let body: ByteStream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(TrussError::HttpError("connection reset".into())),
            Ok(Bytes::from_static(b"never seen")),
        ])
        .boxed();
        let mut stream = PredictionStream::new(body, ChunkDecoder::new(UTF_8));

        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert!(matches!(
            stream.next().await,
            Some(Err(TrussError::HttpError(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn decode_error_is_propagated() {
        let mut stream = PredictionStream::new(
            frames(vec![vec![b'o', b'k', 0xFF]]),
            ChunkDecoder::new(UTF_8),
        );
        assert!(matches!(
            stream.next().await,
            Some(Err(TrussError::Decode { .. }))
        ));
        assert!(stream.next().await.is_none());
    }
}
