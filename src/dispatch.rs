// ==============================================================================
// Dispatcher
// ==============================================================================
//
// One request, start to finish:
//
// 1. Buffer the body (bounded by `AppConfig::max_body_bytes`) and wrap the
//    request.
// 2. Resolve the route. A miss is answered directly with a 404/405.
// 3. Open the per-request service handle and run the injectors.
// 4. Bind the action arguments.
// 5. Hand everything to the route's endpoint, which builds the controller,
//    gates it through the interceptor and runs the action.
// 6. Render the reply, executing templates where needed.
//
// Failures come back as `DispatchError` and are turned into a response by
// the recovery layer wrapped around this service.

use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum_core::{
    extract::Request,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::{Extensions, HeaderValue, StatusCode, header};
use tower_service::Service;

use crate::{
    action::Outcome,
    bind::{self, BindError},
    config::{AppConfig, Configurator},
    controller::Base,
    interceptor::{InjectError, Injector},
    reply::{Reply, ReplyError},
    request::HttpRequest,
    response::{HttpResponse, StatusSlot},
    router::RouteTable,
    service::ServiceProvider,
    template::{TemplateEngine, TemplateError},
};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// A request that could not be served.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),
    #[error("injector failed: {0}")]
    Inject(#[from] InjectError),
    #[error("cannot bind action arguments: {0}")]
    Bind(#[from] BindError),
    #[error("{0}")]
    Contract(#[from] ReplyError),
    #[error("template failed: {0}")]
    Template(#[from] TemplateError),
}

/// Everything a request needs that outlives it.
pub(crate) struct Shared {
    pub(crate) table: Arc<RouteTable>,
    pub(crate) config: AppConfig,
    pub(crate) configurator: Arc<dyn Configurator>,
    pub(crate) templates: Arc<dyn TemplateEngine>,
    pub(crate) services: Arc<dyn ServiceProvider>,
    pub(crate) injectors: Vec<Arc<dyn Injector>>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("table", &self.table)
            .field("config", &self.config)
            .field("configurator", &self.configurator)
            .field("injectors", &self.injectors.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    pub(crate) fn table(&self) -> &RouteTable {
        &self.shared.table
    }
}

impl Service<Request> for Dispatcher {
    type Response = Response;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move { shared.dispatch(request).await })
    }
}

impl Shared {
    async fn dispatch(&self, request: Request) -> Result<Response, DispatchError> {
        let (mut parts, body) = request.into_parts();
        let slot = parts.extensions.remove::<StatusSlot>().unwrap_or_default();

        let body = match axum::body::to_bytes(body, self.config.max_body_bytes).await {
            Ok(body) => body,
            Err(err) => {
                slot.set(StatusCode::PAYLOAD_TOO_LARGE);
                return Err(DispatchError::Body(err));
            }
        };
        let request = HttpRequest::new(parts, body);

        let matched = match self.table.resolve(request.method(), request.host(), request.path()) {
            Ok(matched) => matched,
            Err(err) => {
                tracing::debug!(
                    method = %request.method(),
                    host = request.host(),
                    path = request.path(),
                    "no route"
                );
                return Ok(err.into_response());
            }
        };
        let route = matched.route;
        tracing::debug!(route = %route.info, "matched route");

        let mut extensions = Extensions::new();
        let mut service = self.services.open();
        for injector in &self.injectors {
            injector.inject(&route.info, &mut extensions, &mut service)?;
        }

        let args = bind::resolve(&route.specs, &matched.captures, &request);
        let base = Base {
            route: Arc::clone(&route.info),
            request,
            response: HttpResponse::with_status_slot(slot),
            service,
            config: Arc::clone(&self.configurator),
            templates: Arc::clone(&self.templates),
            routes: Arc::clone(&self.table),
            extensions,
            share: Vec::new(),
        };

        let (mut response, outcome) = route.endpoint.run(base, args, route.interceptor.as_deref())?;
        let body = match outcome {
            Outcome::Rejected(body) | Outcome::Replied(Reply::Body(body)) => body,
            Outcome::Replied(Reply::Template { name, data }) => {
                let html = self.templates.execute_by_name(&name, &data)?;
                html_body(&mut response, html)
            }
            Outcome::Replied(Reply::Inline { template, data }) => {
                let html = self.templates.execute(&template, &data)?;
                html_body(&mut response, html)
            }
        };
        Ok(response.into_response(body))
    }
}

fn html_body(response: &mut HttpResponse, html: Vec<u8>) -> Bytes {
    let headers = response.headers_mut();
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
    }
    Bytes::from(html)
}
