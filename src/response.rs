//! Response helpers shared by the proxy and admin listeners

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};

/// Body type of every response the listeners produce
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Create a plain-text response
pub fn text_response(status: StatusCode, body: impl Into<String>) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(Bytes::from(body.into())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Create a response with an empty body
pub fn empty_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}

/// Create full body
pub fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

/// Create empty body
pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}
