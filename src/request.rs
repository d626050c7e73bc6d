// ==============================================================================
// HttpRequest
// ==============================================================================
//
// The buffered request handed to controllers. The body is read once, the
// query string is decoded eagerly, and form bodies are decoded for verbs
// that carry them.

use std::borrow::Cow;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version, header, request::Parts};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// A fully-read request with decoded query and form values.
#[derive(Debug)]
pub struct HttpRequest {
    parts: Parts,
    body: Bytes,
    query: Vec<(String, String)>,
    form: Option<Vec<(String, String)>>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        let (parts, ()) = http::Request::new(()).into_parts();
        Self::new(parts, Bytes::new())
    }
}

fn decode_pairs(input: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input).into_owned().collect()
}

/// Parses a string leniently, the way query accessors degrade: empty or
/// malformed input yields the default.
fn lenient<T: std::str::FromStr + Default>(raw: Option<&str>) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or_default()
}

impl HttpRequest {
    /// Wraps request head and buffered body.
    ///
    /// Form-encoded bodies are decoded for `POST`, `PUT`, `PATCH` and
    /// `DELETE`.
    #[must_use]
    pub fn new(parts: Parts, body: Bytes) -> Self {
        let query = parts
            .uri
            .query()
            .map(|q| decode_pairs(q.as_bytes()))
            .unwrap_or_default();

        let mut this = Self {
            parts,
            body,
            query,
            form: None,
        };

        let carries_form = matches!(
            this.parts.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );
        if carries_form && this.content_type() == Some(FORM_URLENCODED) {
            this.form = Some(decode_pairs(&this.body));
        }
        this
    }

    // =========================================================================
    // Request line and headers
    // =========================================================================

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.parts.method
    }

    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    #[must_use]
    pub const fn version(&self) -> Version {
        self.parts.version
    }

    /// The raw (still percent-encoded) path.
    #[must_use]
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// The path with percent-escapes decoded; invalid UTF-8 is replaced.
    #[must_use]
    pub fn decoded_path(&self) -> Cow<'_, str> {
        percent_encoding::percent_decode_str(self.path()).decode_utf8_lossy()
    }

    /// Path plus query string, as sent by the client.
    #[must_use]
    pub fn request_uri(&self) -> &str {
        self.parts
            .uri
            .path_and_query()
            .map_or_else(|| self.path(), |pq| pq.as_str())
    }

    #[must_use]
    pub fn raw_query(&self) -> &str {
        self.parts.uri.query().unwrap_or_default()
    }

    /// The `Host` header, falling back to the URI authority.
    #[must_use]
    pub fn host(&self) -> &str {
        self.header(header::HOST.as_str())
            .or_else(|| self.parts.uri.authority().map(http::uri::Authority::as_str))
            .unwrap_or_default()
    }

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// First value of header `name`, if present and visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of header `name`.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.parts
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Media type of the body without parameters, e.g. `application/json`.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
    }

    #[must_use]
    pub fn referer(&self) -> Option<&str> {
        self.header(header::REFERER.as_str())
    }

    #[must_use]
    pub fn is_post(&self) -> bool {
        self.parts.method == Method::POST
    }

    #[must_use]
    pub fn is_ajax(&self) -> bool {
        self.header("x-requested-with") == Some("XMLHttpRequest")
    }

    /// Request extensions, as left by outer layers.
    #[must_use]
    pub const fn extensions(&self) -> &http::Extensions {
        &self.parts.extensions
    }

    // =========================================================================
    // Body
    // =========================================================================

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether a form body was decoded.
    #[must_use]
    pub const fn has_form(&self) -> bool {
        self.form.is_some()
    }

    // =========================================================================
    // Cookies
    // =========================================================================

    /// Value of cookie `name`.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies()
            .into_iter()
            .find_map(|(k, v)| (k == name).then_some(v))
    }

    /// Every `name=value` pair from the `Cookie` headers, in order.
    #[must_use]
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.header_values(header::COOKIE.as_str())
            .into_iter()
            .flat_map(cookie::Cookie::split_parse)
            .filter_map(Result::ok)
            .map(|c| (c.name().to_owned(), c.value().to_owned()))
            .collect()
    }

    // =========================================================================
    // Query values
    // =========================================================================

    /// Decoded query string pairs, in order.
    #[must_use]
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// First query value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        first(&self.query, key)
    }

    #[must_use]
    pub fn get_int(&self, key: &str) -> i64 {
        lenient(self.get(key))
    }

    #[must_use]
    pub fn get_float(&self, key: &str) -> f64 {
        lenient(self.get(key))
    }

    #[must_use]
    pub fn get_slice(&self, key: &str) -> Vec<&str> {
        all(&self.query, key).collect()
    }

    /// Every query value for `key`, unparsable ones as `0`.
    #[must_use]
    pub fn get_int_slice(&self, key: &str) -> Vec<i64> {
        all(&self.query, key).map(|v| lenient(Some(v))).collect()
    }

    // =========================================================================
    // Form values
    // =========================================================================

    /// Decoded form body pairs; empty when no form was decoded.
    #[must_use]
    pub fn form_pairs(&self) -> &[(String, String)] {
        self.form.as_deref().unwrap_or_default()
    }

    /// First form value for `key`.
    #[must_use]
    pub fn get_post(&self, key: &str) -> Option<&str> {
        first(self.form_pairs(), key)
    }

    #[must_use]
    pub fn get_post_int(&self, key: &str) -> i64 {
        lenient(self.get_post(key))
    }

    #[must_use]
    pub fn get_post_float(&self, key: &str) -> f64 {
        lenient(self.get_post(key))
    }

    #[must_use]
    pub fn get_post_slice(&self, key: &str) -> Vec<&str> {
        all(self.form_pairs(), key).collect()
    }

    #[must_use]
    pub fn get_post_int_slice(&self, key: &str) -> Vec<i64> {
        all(self.form_pairs(), key).map(|v| lenient(Some(v))).collect()
    }

    // =========================================================================
    // Form, then query
    // =========================================================================

    /// Non-empty form value for `key`, else the query value.
    #[must_use]
    pub fn get_request(&self, key: &str) -> Option<&str> {
        self.get_post(key)
            .filter(|v| !v.is_empty())
            .or_else(|| self.get(key))
    }

    /// Non-zero form integer for `key`, else the query integer.
    #[must_use]
    pub fn get_request_int(&self, key: &str) -> i64 {
        match self.get_post_int(key) {
            0 => self.get_int(key),
            n => n,
        }
    }
}

fn first<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find_map(|(k, v)| (k == key).then_some(v.as_str()))
}

fn all<'a>(pairs: &'a [(String, String)], key: &str) -> impl Iterator<Item = &'a str> {
    pairs
        .iter()
        .filter(move |(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: &'static str,
    ) -> HttpRequest {
        let mut builder = http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, ()) = builder.body(()).unwrap_or_default().into_parts();
        HttpRequest::new(parts, Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn query_accessors() {
        let req = request(Method::GET, "/list?page=3&tag=a&tag=b&n=1&n=x&q=hello%20world", &[], "");
        assert_eq!(req.get("q"), Some("hello world"));
        assert_eq!(req.get("missing"), None);
        assert_eq!(req.get_int("page"), 3);
        assert_eq!(req.get_int("q"), 0);
        assert_eq!(req.get_slice("tag"), ["a", "b"]);
        assert_eq!(req.get_int_slice("n"), [1, 0]);
        assert_eq!(req.raw_query(), "page=3&tag=a&tag=b&n=1&n=x&q=hello%20world");
        assert!(!req.has_form());
    }

    #[test]
    fn form_is_decoded_for_body_verbs_only() {
        let form = [("content-type", "application/x-www-form-urlencoded; charset=utf-8")];

        let post = request(Method::POST, "/save?id=9", &form, "id=0&name=a+b");
        assert!(post.has_form());
        assert_eq!(post.get_post("name"), Some("a b"));
        assert_eq!(post.get_request_int("id"), 9);
        assert_eq!(post.get_request("name"), Some("a b"));

        let delete = request(Method::DELETE, "/save", &form, "id=4");
        assert_eq!(delete.get_post_int("id"), 4);

        let get = request(Method::GET, "/save", &form, "id=4");
        assert!(!get.has_form());
        assert_eq!(get.get_post("id"), None);

        let json = request(Method::POST, "/save", &[("content-type", "application/json")], "{}");
        assert!(!json.has_form());
    }

    #[test]
    fn slices_outlive_the_lookup_key() {
        let form = [("content-type", "application/x-www-form-urlencoded")];
        let req = request(Method::POST, "/save?tag=a&tag=b", &form, "id=1&id=2");
        let (tags, ids) = {
            let tag = String::from("tag");
            let id = String::from("id");
            (req.get_slice(&tag), req.get_post_slice(&id))
        };
        assert_eq!(tags, ["a", "b"]);
        assert_eq!(ids, ["1", "2"]);
    }

    #[test]
    fn headers_and_cookies() {
        let req = request(
            Method::POST,
            "/x",
            &[
                ("host", "blog.example.com:8080"),
                ("cookie", "session=abc123; theme=dark"),
                ("x-requested-with", "XMLHttpRequest"),
                ("referer", "https://example.com/"),
            ],
            "",
        );
        assert_eq!(req.host(), "blog.example.com:8080");
        assert_eq!(req.cookie("theme").as_deref(), Some("dark"));
        assert_eq!(req.cookies().len(), 2);
        assert!(req.is_ajax());
        assert!(req.is_post());
        assert_eq!(req.referer(), Some("https://example.com/"));
    }

    #[test]
    fn decodes_path() {
        let req = request(Method::GET, "/files/a%20b?x=1", &[], "");
        assert_eq!(req.path(), "/files/a%20b");
        assert_eq!(req.decoded_path(), "/files/a b");
        assert_eq!(req.request_uri(), "/files/a%20b?x=1");
    }
}
