//! Buffered and streaming response-body rewriting.
//!
//! `buffer_rewrite` reads the whole body, transparently decoding gzip,
//! deflate, and brotli content encodings, applies a byte transform, and
//! re-frames the response with an exact `Content-Length`.
//!
//! `stream_rewrite` hands a producer the original body plus the write end
//! of a byte pipe and replaces the response body with the pipe's read end;
//! framing switches to chunked. The pipe supports close-with-error, which
//! surfaces on the reader's next poll.

use std::io::Read;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Response};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use thiserror::Error;
use tokio::sync::mpsc;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The body type every engine entry point works with.
pub type Body = BoxBody<Bytes, BoxError>;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("read body: {0}")]
    ReadBody(#[source] BoxError),
    #[error("decode {encoding} body: {source}")]
    Decode {
        encoding: String,
        source: std::io::Error,
    },
    #[error("unsupported content encoding {0:?}")]
    UnsupportedEncoding(String),
    #[error("invalid header value")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

pub fn full_body(data: impl Into<Bytes>) -> Body {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

pub fn empty_body() -> Body {
    Empty::new().map_err(|never| match never {}).boxed()
}

/// Media type from `Content-Type`, lowercased, without parameters.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next()?.trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence.to_ascii_lowercase())
    }
}

fn content_encoding(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty() && v != "identity")
}

async fn take_body_bytes(res: &mut Response<Body>) -> Result<Vec<u8>, RewriteError> {
    let body = std::mem::replace(res.body_mut(), empty_body());
    let collected = body.collect().await.map_err(RewriteError::ReadBody)?;
    Ok(collected.to_bytes().to_vec())
}

fn decode(encoding: &str, data: &[u8]) -> Result<Vec<u8>, RewriteError> {
    let mut out = Vec::with_capacity(data.len() * 2);
    match encoding {
        "gzip" | "x-gzip" => {
            flate2::read::GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|source| RewriteError::Decode {
                    encoding: encoding.to_string(),
                    source,
                })?;
        }
        "deflate" => {
            // Servers send both zlib-wrapped and raw deflate under this name.
            if flate2::read::ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .is_err()
            {
                out.clear();
                flate2::read::DeflateDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|source| RewriteError::Decode {
                        encoding: encoding.to_string(),
                        source,
                    })?;
            }
        }
        "br" => {
            brotli::BrotliDecompress(&mut &data[..], &mut out).map_err(|source| {
                RewriteError::Decode {
                    encoding: encoding.to_string(),
                    source,
                }
            })?;
        }
        other => return Err(RewriteError::UnsupportedEncoding(other.to_string())),
    }
    Ok(out)
}

/// Collects the body, decodes any known `Content-Encoding`, and puts the
/// plaintext back, adjusting `Content-Encoding`/`Content-Length`.
pub async fn decode_in_place(res: &mut Response<Body>) -> Result<(), RewriteError> {
    let Some(encoding) = content_encoding(res.headers()) else {
        return Ok(());
    };
    let raw = take_body_bytes(res).await?;
    let decoded = decode(&encoding, &raw)?;
    res.headers_mut().remove(header::CONTENT_ENCODING);
    set_content_length(res.headers_mut(), decoded.len());
    *res.body_mut() = full_body(decoded);
    Ok(())
}

/// Fully buffers the (decoded) body, applies `transform`, and re-frames.
pub async fn buffer_rewrite<F>(res: &mut Response<Body>, transform: F) -> Result<(), RewriteError>
where
    F: FnOnce(Vec<u8>) -> Vec<u8>,
{
    decode_in_place(res).await?;
    let data = take_body_bytes(res).await?;
    let out = transform(data);
    set_content_length(res.headers_mut(), out.len());
    *res.body_mut() = full_body(out);
    Ok(())
}

fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len as u64));
}

/// Write end of the pipe installed by [`stream_rewrite`].
pub struct PipeWriter {
    tx: mpsc::Sender<Result<Bytes, BoxError>>,
}

impl PipeWriter {
    /// Sends one chunk. Returns `Err` once the reader has gone away.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), BoxError> {
        self.tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| -> BoxError { "body pipe closed".into() })
    }

    /// Closes the pipe with an error; the reader observes it on next poll.
    pub async fn close_with_error(&self, err: BoxError) {
        let _ = self.tx.send(Err(err)).await;
    }
}

struct PipeBody {
    rx: mpsc::Receiver<Result<Bytes, BoxError>>,
}

impl http_body::Body for PipeBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Bytes>, BoxError>>> {
        self.get_mut()
            .rx
            .poll_recv(cx)
            .map(|next| next.map(|chunk| chunk.map(http_body::Frame::data)))
    }
}

/// Advances `body` to its next non-empty data chunk.
pub async fn next_chunk(body: &mut Body) -> Option<Result<Bytes, BoxError>> {
    loop {
        match body.frame().await {
            None => return None,
            Some(Err(err)) => return Some(Err(err)),
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    if !data.is_empty() {
                        return Some(Ok(data));
                    }
                }
            }
        }
    }
}

const PIPE_DEPTH: usize = 16;

/// Replaces the response body with a pipe fed by `producer`, which receives
/// the original body. Framing becomes chunked; `Content-Length` is dropped.
pub fn stream_rewrite<F, Fut>(res: &mut Response<Body>, producer: F)
where
    F: FnOnce(Body, PipeWriter) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(PIPE_DEPTH);
    let original = std::mem::replace(res.body_mut(), BodyExt::boxed(PipeBody { rx }));
    res.headers_mut().remove(header::CONTENT_LENGTH);
    res.headers_mut().insert(
        header::TRANSFER_ENCODING,
        HeaderValue::from_static("chunked"),
    );
    tokio::spawn(producer(original, PipeWriter { tx }));
}
