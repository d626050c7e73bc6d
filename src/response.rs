// ==============================================================================
// HttpResponse
// ==============================================================================
//
// Controllers do not write to the connection directly. They append body
// chunks, mutate headers and cookies, and optionally set an explicit status;
// the dispatcher turns that state plus the rendered reply into one
// `Response`.

use std::sync::{
    Arc,
    atomic::{AtomicU16, Ordering},
};

use axum_core::{body::Body, response::Response};
use bytes::{Bytes, BytesMut};
use cookie::{Cookie, time::Duration};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use serde::Serialize;

const EMPTY_BODY: &[u8] = b"empty response body";

// ==============================================================================
// StatusSlot
// ==============================================================================

/// Shared slot for the status a handler set explicitly.
///
/// The recovery layer keeps one clone so that a handler which sets a status
/// and then panics still has that status honoured.
#[derive(Clone, Debug, Default)]
pub struct StatusSlot(Arc<AtomicU16>);

impl StatusSlot {
    pub(crate) fn set(&self, status: StatusCode) {
        self.0.store(status.as_u16(), Ordering::Relaxed);
    }

    /// The explicit status, if one was set.
    #[must_use]
    pub fn get(&self) -> Option<StatusCode> {
        match self.0.load(Ordering::Relaxed) {
            0 => None,
            code => StatusCode::from_u16(code).ok(),
        }
    }
}

// ==============================================================================
// HttpResponse
// ==============================================================================

/// Response state accumulated by a controller.
#[derive(Debug, Default)]
pub struct HttpResponse {
    chunks: Vec<Bytes>,
    headers: HeaderMap,
    status: StatusSlot,
}

impl HttpResponse {
    pub(crate) fn with_status_slot(status: StatusSlot) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    // =========================================================================
    // Body
    // =========================================================================

    /// Appends a body chunk.
    pub fn append(&mut self, chunk: impl Into<Bytes>) -> &mut Self {
        self.chunks.push(chunk.into());
        self
    }

    #[must_use]
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Joins the appended chunks with `body`.
    ///
    /// With no appended chunks `body` is returned as-is. With neither, the
    /// placeholder `empty response body` is returned.
    #[must_use]
    pub fn send(&self, body: Option<Bytes>) -> Bytes {
        match (body, self.chunks.as_slice()) {
            (Some(body), []) => body,
            (None, []) => Bytes::from_static(EMPTY_BODY),
            (None, [only]) => only.clone(),
            (body, chunks) => {
                let mut joined = BytesMut::new();
                for chunk in chunks.iter().chain(body.as_ref()) {
                    joined.extend_from_slice(chunk);
                }
                joined.freeze()
            }
        }
    }

    /// Serializes `body` as JSON. A serialization failure yields the error
    /// text instead.
    #[must_use]
    pub fn send_json<T: Serialize + ?Sized>(&self, body: &T) -> Bytes {
        serde_json::to_vec(body).map_or_else(|err| Bytes::from(err.to_string()), Bytes::from)
    }

    // =========================================================================
    // Headers
    // =========================================================================

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub const fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Replaces header `name`. Invalid names or values are dropped with a
    /// warning.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = header_pair(name, value) {
            self.headers.insert(name, value);
        }
    }

    /// Adds a value to header `name`. Invalid names or values are dropped
    /// with a warning.
    pub fn add_header(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = header_pair(name, value) {
            self.headers.append(name, value);
        }
    }

    // =========================================================================
    // Cookies
    // =========================================================================

    /// Replaces every `Set-Cookie` header with this cookie. `max_age` is in
    /// seconds; `0` makes a session cookie.
    pub fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        path: &str,
        max_age: i64,
        secure: bool,
        http_only: bool,
    ) {
        if let Some(value) = cookie_value(name, value, path, max_age, secure, http_only) {
            self.headers.insert(header::SET_COOKIE, value);
        }
    }

    /// Adds a `Set-Cookie` header. `max_age` is in seconds; `0` makes a
    /// session cookie.
    pub fn add_cookie(
        &mut self,
        name: &str,
        value: &str,
        path: &str,
        max_age: i64,
        secure: bool,
        http_only: bool,
    ) {
        if let Some(value) = cookie_value(name, value, path, max_age, secure, http_only) {
            self.headers.append(header::SET_COOKIE, value);
        }
    }

    /// Expires cookie `name` on the client.
    pub fn del_cookie(&mut self, name: &str, path: &str) {
        let cookie = Cookie::build((name, ""))
            .path(path)
            .max_age(Duration::ZERO)
            .build();
        if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
            self.headers.insert(header::SET_COOKIE, value);
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Sets an explicit status code. It is also reported by the recovery
    /// layer if the handler fails afterwards.
    pub fn write_header(&self, status: StatusCode) {
        self.status.set(status);
    }

    /// The explicit status, if one was set.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status.get()
    }

    /// Builds the final response around `body`.
    pub(crate) fn into_response(self, body: Bytes) -> Response {
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status.get().unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

fn header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => Some((name, value)),
        _ => {
            tracing::warn!(name, "dropping invalid response header");
            None
        }
    }
}

fn cookie_value(
    name: &str,
    value: &str,
    path: &str,
    max_age: i64,
    secure: bool,
    http_only: bool,
) -> Option<HeaderValue> {
    let mut cookie = Cookie::build((name, value))
        .path(path)
        .secure(secure)
        .http_only(http_only);
    if max_age != 0 {
        cookie = cookie.max_age(Duration::seconds(max_age));
    }
    HeaderValue::from_str(&cookie.build().to_string())
        .inspect_err(|_| tracing::warn!(name, "dropping invalid cookie"))
        .ok()
}
