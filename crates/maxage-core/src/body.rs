//! Body and gRPC framing helpers shared by the proxy layers.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Response};
use http_body::{Body, Frame};
use http_body_util::combinators::UnsyncBoxBody;
use futures::StreamExt;
use http_body_util::{BodyExt, BodyStream, Empty, Full, StreamBody};
use tonic::{Code, Status};

/// Boxed error carried by proxied bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type used on both sides of the proxy.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

const GRPC_CONTENT_TYPE: &str = "application/grpc";
/// Compression flag plus big-endian message length.
const GRPC_HEADER_LEN: usize = 5;
const GRPC_STATUS: &str = "grpc-status";
const GRPC_MESSAGE: &str = "grpc-message";

/// Box any body into a [`ProxyBody`].
pub fn boxed<B>(body: B) -> ProxyBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

pub fn full(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed_unsync()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// Rebuild a buffered body, trailers included.
///
/// gRPC reports the call status in trailers, so they have to survive buffering.
pub fn replay(data: Bytes, trailers: Option<HeaderMap>) -> ProxyBody {
    let mut frames: Vec<Result<Frame<Bytes>, BoxError>> = Vec::with_capacity(2);
    if !data.is_empty() {
        frames.push(Ok(Frame::data(data)));
    }
    if let Some(trailers) = trailers {
        frames.push(Ok(Frame::trailers(trailers)));
    }
    StreamBody::new(futures::stream::iter(frames)).boxed_unsync()
}

/// Emit `frames` first, then whatever `rest` still yields.
pub fn prepend(frames: Vec<Frame<Bytes>>, rest: ProxyBody) -> ProxyBody {
    let head = futures::stream::iter(frames.into_iter().map(Ok::<_, BoxError>));
    StreamBody::new(head.chain(BodyStream::new(rest))).boxed_unsync()
}

/// A body that fails with `error` on first poll.
pub fn failed(error: BoxError) -> ProxyBody {
    StreamBody::new(futures::stream::iter([Err::<Frame<Bytes>, _>(error)])).boxed_unsync()
}

/// Whether `buf` holds more bytes than the first length-prefixed gRPC message.
pub fn holds_multiple_messages(buf: &[u8]) -> bool {
    let Some(prefix) = buf.get(1..GRPC_HEADER_LEN) else {
        return false;
    };
    let mut len = [0u8; 4];
    len.copy_from_slice(prefix);
    let first = GRPC_HEADER_LEN.saturating_add(u32::from_be_bytes(len) as usize);
    buf.len() > first
}

/// Whether the headers describe a gRPC exchange.
pub fn is_grpc(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(GRPC_CONTENT_TYPE))
}

/// The non-OK gRPC status code carried in `headers`, if any.
pub fn failure_code(headers: &HeaderMap) -> Option<Code> {
    headers
        .get(GRPC_STATUS)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i32>().ok())
        .map(Code::from_i32)
        .filter(|code| *code != Code::Ok)
}

/// A trailers-only gRPC response reporting `status`.
pub fn status_response(status: &Status) -> Response<ProxyBody> {
    let mut response = Response::new(empty());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    headers.insert(GRPC_STATUS, HeaderValue::from(status.code() as i32));
    if let Ok(message) = HeaderValue::from_str(status.message()) {
        headers.insert(GRPC_MESSAGE, message);
    }
    response
}
