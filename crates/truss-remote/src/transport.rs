//! Outbound HTTP for deployment requests.
//!
//! Request builders in this crate produce plain [`http::Request`] values. A
//! [`Transport`] executes them and hands back an [`http::Response`] whose body
//! is already classified as either a chunked byte stream or a complete buffer.

use crate::error::TrussError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use http::{HeaderMap, Request, Response, header::TRANSFER_ENCODING};
use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Raw body frames of a chunked response, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Bytes, TrussError>>;

/// Body of a deployment response, classified once by the transport.
pub enum ResponseBody {
    /// The response declared `Transfer-Encoding: chunked`.
    Chunked(ByteStream),
    /// The full body, read to completion.
    Complete(Vec<u8>),
}

impl ResponseBody {
    pub fn is_chunked(&self) -> bool {
        matches!(self, ResponseBody::Chunked(_))
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Chunked(_) => f.write_str("Chunked(..)"),
            ResponseBody::Complete(bytes) => write!(f, "Complete({} bytes)", bytes.len()),
        }
    }
}

/// Whether the headers declare chunked transfer encoding.
///
/// Only the final transfer coding is consulted, since HTTP/1.1 requires
/// `chunked` to be applied last.
pub fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

/// Executes prepared requests against a remote deployment.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `req`. When `stream` is set, a chunked response is returned as a
    /// [`ResponseBody::Chunked`] stream instead of being buffered.
    async fn send(
        &self,
        req: Request<Vec<u8>>,
        stream: bool,
    ) -> Result<Response<ResponseBody>, TrussError>;
}

/// A single, global client, built once
static CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Option<Client>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport with its own client, applying `timeout` to every request.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TrussError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client: Some(client),
        })
    }

    fn client(&self) -> &Client {
        self.client.as_ref().unwrap_or(&*CLIENT)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        req: Request<Vec<u8>>,
        stream: bool,
    ) -> Result<Response<ResponseBody>, TrussError> {
        let (parts, body) = req.into_parts();
        log::debug!("{} {}", parts.method, parts.uri);

        let resp = self
            .client()
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        let mut builder = Response::builder().status(resp.status());
        for (name, value) in resp.headers().iter() {
            builder = builder.header(name, value);
        }

        let body = if stream && is_chunked(resp.headers()) {
            log::trace!("streaming chunked response");
            ResponseBody::Chunked(
                resp.bytes_stream()
                    .map(|frame| frame.map_err(TrussError::from))
                    .boxed(),
            )
        } else {
            ResponseBody::Complete(resp.bytes().await?.to_vec())
        };

        Ok(builder.body(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::{ResponseBody, is_chunked};
    use http::{HeaderMap, HeaderValue, header::TRANSFER_ENCODING};

    fn headers(values: &[&'static str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for v in values.iter().copied() {
            map.append(TRANSFER_ENCODING, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn chunked_detection_reads_final_coding() {
        assert!(is_chunked(&headers(&["chunked"])));
        assert!(is_chunked(&headers(&["Chunked"])));
        assert!(is_chunked(&headers(&["gzip, chunked"])));
        assert!(is_chunked(&headers(&["gzip", "chunked"])));
        assert!(!is_chunked(&headers(&["chunked, gzip"])));
        assert!(!is_chunked(&headers(&[])));
    }

    #[test]
    fn complete_body_debug_reports_length() {
        let body = ResponseBody::Complete(vec![0; 3]);
        assert!(!body.is_chunked());
        assert_eq!(format!("{body:?}"), "Complete(3 bytes)");
    }
}
