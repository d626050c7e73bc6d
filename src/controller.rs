// ==============================================================================
// Controllers
// ==============================================================================
//
// A controller is a plain struct that embeds a `Base`. A fresh value is
// produced by the route's factory for every request; the dispatcher then
// moves the per-request context into its `Base` before any hook runs.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use http::{Extensions, StatusCode, header};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    config::{Configurator, NoConfig},
    reply::Reply,
    request::HttpRequest,
    response::HttpResponse,
    router::{RouteInfo, RouteTable, Verb},
    service::Service,
    template::{InlineTemplate, NoTemplates, TemplateEngine},
};

/// Cookie path used by the `Base` cookie shortcuts.
const COOKIE_PATH: &str = "/";

/// A request handler unit.
///
/// ```rust
/// use axum_dispatch::{Base, Controller};
///
/// #[derive(Default)]
/// struct Users {
///     base: Base,
/// }
///
/// impl Controller for Users {
///     fn base(&mut self) -> &mut Base {
///         &mut self.base
///     }
/// }
///
/// impl Users {
///     fn show(&mut self, id: i32) -> String {
///         format!("user:{id}")
///     }
/// }
/// ```
pub trait Controller: Send + 'static {
    /// Whether [`Controller::init`] should run before each action.
    const HAS_INIT: bool = false;

    /// The embedded per-request context.
    fn base(&mut self) -> &mut Base;

    /// Runs after the interceptor passes and before the action. Only called
    /// when [`Controller::HAS_INIT`] is `true`.
    fn init(&mut self) {}
}

// ==============================================================================
// Base
// ==============================================================================

/// Per-request context owned by a controller.
pub struct Base {
    pub(crate) route: Arc<RouteInfo>,
    pub(crate) request: HttpRequest,
    pub(crate) response: HttpResponse,
    pub(crate) service: Service,
    pub(crate) config: Arc<dyn Configurator>,
    pub(crate) templates: Arc<dyn TemplateEngine>,
    pub(crate) routes: Arc<RouteTable>,
    pub(crate) extensions: Extensions,
    pub(crate) share: Vec<Map<String, Value>>,
}

impl Default for Base {
    fn default() -> Self {
        Self {
            route: Arc::default(),
            request: HttpRequest::default(),
            response: HttpResponse::default(),
            service: Service::default(),
            config: Arc::new(NoConfig),
            templates: Arc::new(NoTemplates),
            routes: Arc::default(),
            extensions: Extensions::new(),
            share: Vec::new(),
        }
    }
}

impl fmt::Debug for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Base")
            .field("route", &self.route)
            .field("request", &self.request)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

impl Base {
    pub(crate) fn take_response(&mut self) -> HttpResponse {
        std::mem::take(&mut self.response)
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    /// The matched route.
    #[must_use]
    pub fn route(&self) -> &RouteInfo {
        &self.route
    }

    #[must_use]
    pub const fn request(&self) -> &HttpRequest {
        &self.request
    }

    #[must_use]
    pub const fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub const fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    #[must_use]
    pub const fn service(&self) -> &Service {
        &self.service
    }

    pub const fn service_mut(&mut self) -> &mut Service {
        &mut self.service
    }

    #[must_use]
    pub fn config(&self) -> &dyn Configurator {
        self.config.as_ref()
    }

    #[must_use]
    pub fn templates(&self) -> &dyn TemplateEngine {
        self.templates.as_ref()
    }

    /// Values stored by injectors.
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub const fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// The template path of the route registered for `controller` and
    /// `action` under `verb`.
    #[must_use]
    pub fn url_for(&self, verb: Verb, controller: &str, action: &str) -> Option<&str> {
        self.routes.url_for(verb, controller, action)
    }

    // =========================================================================
    // Cookies
    // =========================================================================

    /// Request cookie value, or an empty string.
    #[must_use]
    pub fn get_cookie(&self, name: &str) -> String {
        self.request.cookie(name).unwrap_or_default()
    }

    /// Adds an `HttpOnly` cookie on `/`.
    pub fn add_cookie(&mut self, name: &str, value: &str, max_age: i64) {
        self.response
            .add_cookie(name, value, COOKIE_PATH, max_age, false, true);
    }

    /// Sets an `HttpOnly` cookie on `/`, replacing other `Set-Cookie`s.
    pub fn set_cookie(&mut self, name: &str, value: &str, max_age: i64) {
        self.response
            .set_cookie(name, value, COOKIE_PATH, max_age, false, true);
    }

    pub fn del_cookie(&mut self, name: &str) {
        self.response.del_cookie(name, COOKIE_PATH);
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    pub fn append_body(&mut self, chunk: impl Into<Bytes>) -> &mut Self {
        self.response.append(chunk);
        self
    }

    /// Adds values merged into every [`Base::render_html`] and
    /// [`Base::render_html_str`] data map. Keys already in the data win.
    pub fn add_share(&mut self, data: Map<String, Value>) {
        self.share.push(data);
    }

    /// The appended body chunks followed by `body`.
    #[must_use]
    pub fn render(&self, body: impl Into<Bytes>) -> Bytes {
        self.response.send(Some(body.into()))
    }

    /// Serializes `body` as JSON and sets the content type.
    pub fn render_json<T: Serialize + ?Sized>(&mut self, body: &T) -> Bytes {
        self.response
            .set_header(header::CONTENT_TYPE.as_str(), "application/json");
        self.response.send_json(body)
    }

    /// A named template reply with share data merged in.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if `data` is not representable as JSON.
    pub fn render_html<T: Serialize>(
        &self,
        name: &str,
        data: T,
    ) -> Result<Reply, serde_json::Error> {
        Ok(Reply::Template {
            name: name.to_owned(),
            data: self.merge_share(serde_json::to_value(data)?),
        })
    }

    /// An inline template reply with share data merged in.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if `data` is not representable as JSON.
    pub fn render_html_str<T: Serialize>(
        &self,
        source: &str,
        data: T,
    ) -> Result<Reply, serde_json::Error> {
        Ok(Reply::Inline {
            template: InlineTemplate::new(source),
            data: self.merge_share(serde_json::to_value(data)?),
        })
    }

    /// `{"code": 0, "data": body}`
    pub fn success<T: Serialize>(&mut self, body: T) -> Bytes {
        self.render_json(&json!({ "code": 0, "data": body }))
    }

    /// `{"code": 0, "data": body, "extra": extra}`
    pub fn success_extra<T: Serialize, E: Serialize>(&mut self, body: T, extra: E) -> Bytes {
        self.render_json(&json!({ "code": 0, "data": body, "extra": extra }))
    }

    /// `{"code": code, "msg": msg}`
    pub fn failure(&mut self, code: i64, msg: &str) -> Bytes {
        self.render_json(&json!({ "code": code, "msg": msg }))
    }

    /// `{"code": code, "msg": msg, "extra": extra}`
    pub fn failure_extra<E: Serialize>(&mut self, code: i64, msg: &str, extra: E) -> Bytes {
        self.render_json(&json!({ "code": code, "msg": msg, "extra": extra }))
    }

    /// Redirects to `url`. Codes other than 201, 301, 302, 303, 307 and 308
    /// become 301.
    pub fn redirect(&mut self, url: &str, code: u16) -> Bytes {
        let status = match code {
            201 | 301 | 302 | 303 | 307 | 308 => {
                StatusCode::from_u16(code).unwrap_or(StatusCode::MOVED_PERMANENTLY)
            }
            _ => StatusCode::MOVED_PERMANENTLY,
        };
        self.response.set_header(header::LOCATION.as_str(), url);
        self.response.write_header(status);
        self.render(Bytes::new())
    }

    /// Object data gains share keys it lacks. Null data becomes the union of
    /// the shares, later shares overriding earlier ones. Anything else is
    /// returned unchanged.
    fn merge_share(&self, data: Value) -> Value {
        if self.share.is_empty() {
            return data;
        }
        match data {
            Value::Null => {
                let mut merged = Map::new();
                for share in &self.share {
                    merged.extend(share.clone());
                }
                Value::Object(merged)
            }
            Value::Object(mut map) => {
                for (key, value) in self.share.iter().flatten() {
                    map.entry(key.clone()).or_insert_with(|| value.clone());
                }
                Value::Object(map)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn share_data_does_not_override_keys() {
        let mut base = Base::default();
        base.add_share(share(json!({"title": "Site", "user": "ann"})));
        base.add_share(share(json!({"title": "Other", "lang": "en"})));

        let reply = base.render_html("page.html", json!({"title": "Page"}));
        assert_eq!(
            reply.ok(),
            Some(Reply::Template {
                name: "page.html".to_owned(),
                data: json!({"title": "Page", "user": "ann", "lang": "en"}),
            })
        );

        let reply = base.render_html("page.html", Value::Null);
        let expected = json!({"title": "Other", "user": "ann", "lang": "en"});
        assert!(matches!(
            reply,
            Ok(Reply::Template { data, .. }) if data == expected
        ));

        let reply = base.render_html("list.html", [1, 2]);
        assert!(matches!(reply, Ok(Reply::Template { data, .. }) if data == json!([1, 2])));
    }

    #[test]
    fn json_helpers_set_content_type() {
        let mut base = Base::default();
        assert_eq!(base.success(json!({"id": 1})), r#"{"code":0,"data":{"id":1}}"#);
        assert_eq!(base.failure(40, "bad"), r#"{"code":40,"msg":"bad"}"#);
        assert_eq!(
            base.response().headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }

    #[test]
    fn redirect_normalises_codes() {
        let mut base = Base::default();
        assert_eq!(base.redirect("/login", 302), "");
        assert_eq!(base.response().status(), Some(StatusCode::FOUND));

        let mut base = Base::default();
        base.redirect("/home", 200);
        assert_eq!(base.response().status(), Some(StatusCode::MOVED_PERMANENTLY));
        assert_eq!(
            base.response().headers().get(header::LOCATION).and_then(|v| v.to_str().ok()),
            Some("/home")
        );
    }

    #[test]
    fn render_joins_appended_chunks() {
        let mut base = Base::default();
        base.append_body("<h1>").append_body("hi");
        assert_eq!(base.render("</h1>"), "<h1>hi</h1>");
    }
}
