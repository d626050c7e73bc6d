// ==============================================================================
// Parameter binding
// ==============================================================================
//
// Turns the matched route's parameter specs plus the request into the
// ordered list of `Resolved` values the action is called with. Path captures
// are bound first and never looked up anywhere else; the remaining scalars
// come from the body (JSON or form) and then the query string; struct
// parameters get a synthetic document merged from query and body.

pub(crate) mod de;

use std::fmt;

use serde_json::{Map, Value};

use crate::{
    param::{ParamKind, Resolved, Scalar, TypeTag},
    request::HttpRequest,
    signature::ParamSpec,
};

// ==============================================================================
// BindError
// ==============================================================================

/// A value could not be turned into an action argument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BindError {
    message: String,
}

impl BindError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn unexpected(expected: &str, got: &Resolved) -> Self {
        Self::new(format!("expected a `{expected}` argument, got {got:?}"))
    }
}

impl serde::de::Error for BindError {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Self::new(msg.to_string())
    }
}

// ==============================================================================
// Body source
// ==============================================================================

/// Where non-path values come from, decided once per request from the verb
/// and `Content-Type`.
#[derive(Debug)]
enum BodySource {
    /// Top-level members of a JSON object body.
    Json(Map<String, Value>),
    /// Parsed `application/x-www-form-urlencoded` body.
    Form,
    /// Query string only.
    Query,
}

impl BodySource {
    fn detect(request: &HttpRequest) -> Self {
        if request.content_type() == Some("application/json") && !request.body().is_empty() {
            return match serde_json::from_slice::<Value>(request.body()) {
                Ok(Value::Object(map)) => Self::Json(map),
                Ok(_) => {
                    tracing::debug!(path = request.path(), "json body is not an object");
                    Self::Json(Map::new())
                }
                Err(err) => {
                    tracing::warn!(
                        path = request.path(),
                        error = %err,
                        "ignoring malformed json body"
                    );
                    Self::Query
                }
            };
        }
        if request.has_form() {
            Self::Form
        } else {
            Self::Query
        }
    }

    fn scalar(&self, request: &HttpRequest, name: &str, tag: TypeTag) -> Scalar {
        let from_body = match self {
            Self::Json(map) => map.get(name).map(|v| Scalar::from_json(tag, v)),
            Self::Form => request.get_post(name).map(|raw| Scalar::parse(tag, raw)),
            Self::Query => None,
        };
        from_body
            .or_else(|| request.get(name).map(|raw| Scalar::parse(tag, raw)))
            .unwrap_or_else(|| Scalar::zero(tag))
    }

    /// Query pairs first, then body members on top.
    fn document(&self, request: &HttpRequest) -> Value {
        let mut doc = pairs_to_map(request.query_pairs());
        match self {
            Self::Json(map) => doc.extend(map.clone()),
            Self::Form => doc.extend(pairs_to_map(request.form_pairs())),
            Self::Query => {}
        }
        Value::Object(doc)
    }
}

/// Single keys map to strings, repeated keys to arrays of strings.
fn pairs_to_map(pairs: &[(String, String)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(key) {
            None => {
                map.insert(key.clone(), Value::String(value.clone()));
            }
            Some(Value::Array(values)) => values.push(Value::String(value.clone())),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value.clone())]);
            }
        }
    }
    map
}

// ==============================================================================
// resolve
// ==============================================================================

/// Coerces every declared parameter of a matched route.
pub(crate) fn resolve(
    specs: &[ParamSpec],
    captures: &[String],
    request: &HttpRequest,
) -> Vec<Resolved> {
    let source = BodySource::detect(request);
    specs
        .iter()
        .map(|spec| match (spec.kind, spec.path_index) {
            (ParamKind::Scalar(tag), Some(index)) => Resolved::Scalar(
                captures
                    .get(index)
                    .map_or_else(|| Scalar::zero(tag), |raw| Scalar::parse(tag, raw)),
            ),
            (ParamKind::Scalar(tag), None) => {
                Resolved::Scalar(source.scalar(request, &spec.name, tag))
            }
            (ParamKind::Struct(_), _) => Resolved::Struct(source.document(request)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use serde_json::json;

    fn request(method: Method, uri: &str, content_type: Option<&str>, body: &str) -> HttpRequest {
        let mut builder = http::Request::builder().method(method).uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, ct);
        }
        let (parts, ()) = builder.body(()).unwrap_or_default().into_parts();
        HttpRequest::new(parts, Bytes::from(body.to_owned()))
    }

    fn spec(name: &str, kind: ParamKind, path_index: Option<usize>) -> ParamSpec {
        ParamSpec {
            name: name.to_owned(),
            kind,
            path_index,
        }
    }

    #[test]
    fn path_values_win_over_query() {
        let req = request(Method::GET, "/user/5?id=9", None, "");
        let specs = [spec("id", ParamKind::Scalar(TypeTag::Int), Some(0))];
        let resolved = resolve(&specs, &["5".to_owned()], &req);
        assert_eq!(resolved, vec![Resolved::Scalar(Scalar::Int(5))]);
    }

    #[test]
    fn query_scalars_degrade_to_zero() {
        let req = request(Method::GET, "/search?page=abc&size=20", None, "");
        let specs = [
            spec("page", ParamKind::Scalar(TypeTag::Int), None),
            spec("size", ParamKind::Scalar(TypeTag::Int64), None),
            spec("missing", ParamKind::Scalar(TypeTag::Bool), None),
        ];
        let resolved = resolve(&specs, &[], &req);
        assert_eq!(
            resolved,
            vec![
                Resolved::Scalar(Scalar::Int(0)),
                Resolved::Scalar(Scalar::Int64(20)),
                Resolved::Scalar(Scalar::Bool(false)),
            ]
        );
    }

    #[test]
    fn form_fields_fall_back_to_query() {
        let req = request(
            Method::POST,
            "/save?draft=true&title=query",
            Some("application/x-www-form-urlencoded"),
            "title=form+title",
        );
        let specs = [
            spec("title", ParamKind::Scalar(TypeTag::Str), None),
            spec("draft", ParamKind::Scalar(TypeTag::Bool), None),
        ];
        let resolved = resolve(&specs, &[], &req);
        assert_eq!(
            resolved,
            vec![
                Resolved::Scalar(Scalar::Str("form title".to_owned())),
                Resolved::Scalar(Scalar::Bool(true)),
            ]
        );
    }

    #[test]
    fn struct_document_overlays_body_on_query() {
        let req = request(
            Method::PUT,
            "/user?name=q&lang=en",
            Some("application/json; charset=utf-8"),
            r#"{"name":"body","age":30}"#,
        );
        let specs = [spec("form", ParamKind::Struct("UserForm"), None)];
        let resolved = resolve(&specs, &[], &req);
        assert_eq!(
            resolved,
            vec![Resolved::Struct(json!({"name": "body", "age": 30, "lang": "en"}))]
        );
    }

    #[test]
    fn repeated_query_keys_become_arrays() {
        let map = pairs_to_map(&[
            ("tag".to_owned(), "a".to_owned()),
            ("tag".to_owned(), "b".to_owned()),
            ("tag".to_owned(), "c".to_owned()),
        ]);
        assert_eq!(Value::Object(map), json!({"tag": ["a", "b", "c"]}));
    }

    #[test]
    fn malformed_json_body_falls_back_to_query() {
        let req = request(Method::POST, "/x?n=4", Some("application/json"), "{not json");
        let specs = [spec("n", ParamKind::Scalar(TypeTag::Int), None)];
        assert_eq!(
            resolve(&specs, &[], &req),
            vec![Resolved::Scalar(Scalar::Int(4))]
        );
    }
}
