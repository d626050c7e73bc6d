// ==============================================================================
// Route table and matcher
// ==============================================================================
//
// Routes are grouped per verb (GET, POST, PUT, DELETE, ANY) and, within a
// verb, per subdomain namespace in registration order. The table is built
// once through `RouteGroup` and is immutable afterwards.
//
// Matching a request:
//
// 1. Resolve the host: strip the port; IP addresses and `localhost` resolve
//    to the configured local host.
// 2. Pick the first namespace whose subdomain labels the host, else `*`.
// 3. Scan its routes: an exact static match wins immediately; otherwise the
//    longest matching static prefix or regex route wins (first registered on
//    ties); a `/*` route is the last resort.
// 4. GET and POST retry against ANY. Other verbs outside the four known ones
//    only ever look at ANY.

use std::{fmt, net::IpAddr, str::FromStr, sync::Arc};

use axum_core::response::{IntoResponse, Response};
use http::{Method, StatusCode};

use crate::{
    action::{Action, Endpoint, Handler},
    controller::Controller,
    interceptor::{InjectError, Interceptor, RegistrationHook},
    param::short_type_name,
    pattern::{PathPattern, PatternError, PatternMatch},
    signature::{ParamSpec, Signature, SignatureError},
};

// ==============================================================================
// Verb
// ==============================================================================

/// The verbs routes are registered under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Verb {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    /// Matches any method; GET and POST fall back to it.
    Any,
}

impl Verb {
    const ALL: [Self; 5] = [Self::Get, Self::Post, Self::Put, Self::Delete, Self::Any];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Any => "ANY",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }

    /// The verb whose routes a request method is matched against first.
    fn of(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Get),
            Method::POST => Some(Self::Post),
            Method::PUT => Some(Self::Put),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a route verb.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown route verb `{0}`")]
pub struct UnknownVerb(pub String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVerb(s.to_owned()))
    }
}

// ==============================================================================
// RouteInfo / CompiledRoute
// ==============================================================================

/// Descriptive data about a registered route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteInfo {
    pub verb: Verb,
    pub subdomain: String,
    /// The declared path after namespace joining, e.g. `/api/user/:id:int`.
    pub path: String,
    /// The normalised path, e.g. `/api/user/:id`.
    pub template: String,
    /// Unqualified controller type name.
    pub controller: &'static str,
    pub action: String,
}

impl fmt::Display for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{} -> {}.{}",
            self.verb, self.subdomain, self.template, self.controller, self.action
        )
    }
}

/// One registered endpoint.
pub(crate) struct CompiledRoute {
    pub(crate) pattern: PathPattern,
    pub(crate) info: Arc<RouteInfo>,
    pub(crate) specs: Vec<ParamSpec>,
    pub(crate) endpoint: Arc<dyn Endpoint>,
    pub(crate) interceptor: Option<Arc<dyn Interceptor>>,
}

impl fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("pattern", &self.pattern)
            .field("info", &self.info)
            .field("specs", &self.specs)
            .field("interceptor", &self.interceptor.is_some())
            .finish_non_exhaustive()
    }
}

impl CompiledRoute {
    /// Whether `self` and `other` would compete for the same exact match.
    fn collides_with(&self, other: &Self) -> bool {
        match (&self.pattern, &other.pattern) {
            (PathPattern::Static(a), PathPattern::Static(b)) => a == b,
            (PathPattern::Wildcard, PathPattern::Wildcard) => true,
            (
                PathPattern::Regex {
                    regex: a, params: pa, ..
                },
                PathPattern::Regex {
                    regex: b, params: pb, ..
                },
            ) => a.as_str() == b.as_str() && pa == pb,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Namespace {
    subdomain: String,
    routes: Vec<CompiledRoute>,
}

impl Namespace {
    fn is_fallback(&self) -> bool {
        self.subdomain == "*"
    }

    /// Whether `host` carries this namespace's subdomain as a label.
    fn serves(&self, host: &str) -> bool {
        let sub = self.subdomain.as_str();
        host.strip_prefix(sub).is_some_and(|rest| rest.starts_with('.'))
            || host.contains(&format!(".{sub}."))
    }

    fn select(&self, path: &str) -> Option<Matched<'_>> {
        let mut best: Option<Matched<'_>> = None;
        let mut wildcard = None;

        for route in &self.routes {
            let captures = match route.pattern.matches(path) {
                None => continue,
                Some(PatternMatch::Exact) => {
                    return Some(Matched {
                        route,
                        captures: Vec::new(),
                    });
                }
                Some(PatternMatch::Wildcard) => {
                    wildcard.get_or_insert(route);
                    continue;
                }
                Some(PatternMatch::Prefix) => Vec::new(),
                Some(PatternMatch::Captures(captures)) => captures,
            };
            let longer = best
                .as_ref()
                .is_none_or(|b| route.pattern.path_len() > b.route.pattern.path_len());
            if longer {
                best = Some(Matched { route, captures });
            }
        }

        best.or_else(|| {
            wildcard.map(|route| Matched {
                route,
                captures: Vec::new(),
            })
        })
    }
}

// ==============================================================================
// RouteTable
// ==============================================================================

/// The result of matching a request.
#[derive(Debug)]
pub(crate) struct Matched<'a> {
    pub(crate) route: &'a CompiledRoute,
    /// Percent-decoded path captures, in declaration order.
    pub(crate) captures: Vec<String>,
}

/// A request that no route accepts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("not found route of path '{host}{path}'")]
    NotFound { host: String, path: String },
    #[error("not support http method '{0}'")]
    MethodNotAllowed(Method),
}

impl RouteError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Every registered route, by verb and subdomain.
#[derive(Debug)]
pub struct RouteTable {
    verbs: [Vec<Namespace>; 5],
    local_host: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            verbs: Default::default(),
            local_host: "www.localhost".to_owned(),
        }
    }
}

impl RouteTable {
    pub(crate) fn new(local_host: impl Into<String>) -> Self {
        Self {
            local_host: local_host.into(),
            ..Self::default()
        }
    }

    /// Number of registered routes across all verbs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.verbs
            .iter()
            .flatten()
            .map(|ns| ns.routes.len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every registered route, by verb then namespace then registration
    /// order.
    pub fn routes(&self) -> impl Iterator<Item = &RouteInfo> {
        self.verbs
            .iter()
            .flatten()
            .flat_map(|ns| ns.routes.iter().map(|r| r.info.as_ref()))
    }

    /// The template path of the route registered for `controller` and
    /// `action` under `verb`.
    #[must_use]
    pub fn url_for(&self, verb: Verb, controller: &str, action: &str) -> Option<&str> {
        self.verbs[verb.index()]
            .iter()
            .flat_map(|ns| &ns.routes)
            .find(|r| r.info.controller == controller && r.info.action == action)
            .map(|r| r.info.template.as_str())
    }

    /// Host without port, with IP addresses and `localhost` mapped to the
    /// local host.
    fn resolve_host<'a>(&'a self, host: &'a str) -> &'a str {
        let bare = if let Some(v6) = host.strip_prefix('[') {
            v6.split_once(']').map_or(v6, |(addr, _)| addr)
        } else {
            match host.rsplit_once(':') {
                Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
                _ => host,
            }
        };
        if bare.parse::<IpAddr>().is_ok() || bare.eq_ignore_ascii_case("localhost") {
            &self.local_host
        } else {
            bare
        }
    }

    fn search(&self, verb: Verb, host: &str, path: &str) -> Option<Matched<'_>> {
        let namespaces = &self.verbs[verb.index()];
        let namespace = namespaces
            .iter()
            .find(|ns| !ns.is_fallback() && ns.serves(host))
            .or_else(|| namespaces.iter().find(|ns| ns.is_fallback()))?;
        namespace.select(path)
    }

    /// Finds the route for a request.
    pub(crate) fn resolve(
        &self,
        method: &Method,
        host: &str,
        path: &str,
    ) -> Result<Matched<'_>, RouteError> {
        let resolved_host = self.resolve_host(host);
        let found = match Verb::of(method) {
            Some(verb @ (Verb::Get | Verb::Post)) => self
                .search(verb, resolved_host, path)
                .or_else(|| self.search(Verb::Any, resolved_host, path)),
            Some(verb) => self.search(verb, resolved_host, path),
            None => {
                return self
                    .search(Verb::Any, resolved_host, path)
                    .ok_or_else(|| RouteError::MethodNotAllowed(method.clone()));
            }
        };
        found.ok_or_else(|| RouteError::NotFound {
            host: host.to_owned(),
            path: path.to_owned(),
        })
    }
}

// ==============================================================================
// Registration
// ==============================================================================

/// Why a route could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationErrorKind {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("duplicate route")]
    Duplicate,
    #[error("rejected by registration hook: {0}")]
    Hook(#[from] InjectError),
}

/// A route that failed to register. Startup should abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot register {verb} {path} on subdomain `{subdomain}`: {kind}")]
pub struct RegistrationError {
    pub verb: Verb,
    pub subdomain: String,
    pub path: String,
    #[source]
    pub kind: RegistrationErrorKind,
}

/// Accumulates routes and registration errors while the app is built.
pub(crate) struct TableBuilder {
    table: RouteTable,
    hooks: Vec<Arc<dyn RegistrationHook>>,
    errors: Vec<RegistrationError>,
}

impl TableBuilder {
    pub(crate) fn new(
        local_host: impl Into<String>,
        hooks: Vec<Arc<dyn RegistrationHook>>,
    ) -> Self {
        Self {
            table: RouteTable::new(local_host),
            hooks,
            errors: Vec::new(),
        }
    }

    /// The table, or the first registration error. Every error is logged.
    pub(crate) fn finish(self) -> Result<RouteTable, RegistrationError> {
        for err in &self.errors {
            tracing::error!(error = %err, "route registration failed");
        }
        match self.errors.into_iter().next() {
            Some(err) => Err(err),
            None => {
                tracing::info!(routes = self.table.len(), "route table built");
                Ok(self.table)
            }
        }
    }

    fn insert(
        &mut self,
        subdomain: &str,
        route: CompiledRoute,
    ) -> Result<(), RegistrationErrorKind> {
        let namespaces = &mut self.table.verbs[route.info.verb.index()];
        let index = match namespaces.iter().position(|ns| ns.subdomain == subdomain) {
            Some(index) => index,
            None => {
                namespaces.push(Namespace {
                    subdomain: subdomain.to_owned(),
                    routes: Vec::new(),
                });
                namespaces.len() - 1
            }
        };
        let namespace = &mut namespaces[index];
        if namespace.routes.iter().any(|r| r.collides_with(&route)) {
            return Err(RegistrationErrorKind::Duplicate);
        }
        for hook in &self.hooks {
            hook.registered(&route.info)?;
        }
        tracing::info!(route = %route.info, "registered route");
        namespace.routes.push(route);
        Ok(())
    }
}

/// Registers the routes of one subdomain and namespace.
///
/// Obtained from [`AppBuilder::register`](crate::AppBuilder::register).
pub struct RouteGroup<'a> {
    subdomain: String,
    namespace: String,
    interceptor: Option<Arc<dyn Interceptor>>,
    builder: &'a mut TableBuilder,
}

impl fmt::Debug for RouteGroup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteGroup")
            .field("subdomain", &self.subdomain)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<'a> RouteGroup<'a> {
    /// Blank subdomains become `www`; namespaces are trimmed of `/`.
    pub(crate) fn new(
        subdomain: &str,
        namespace: &str,
        interceptor: Option<Arc<dyn Interceptor>>,
        builder: &'a mut TableBuilder,
    ) -> Self {
        let subdomain = match subdomain.trim() {
            "" => "www",
            sub => sub,
        };
        Self {
            subdomain: subdomain.to_owned(),
            namespace: namespace.trim().trim_matches('/').to_owned(),
            interceptor,
            builder,
        }
    }

    fn join(&self, path: &str) -> String {
        if self.namespace.is_empty() {
            path.to_owned()
        } else {
            format!("/{}{path}", self.namespace)
        }
    }

    fn add<C, F, A, Args>(
        &mut self,
        verb: Verb,
        path: &str,
        factory: F,
        decl: &str,
        action: A,
    ) -> &mut Self
    where
        C: Controller,
        F: Fn() -> C + Send + Sync + 'static,
        A: Action<C, Args>,
        Args: 'static,
    {
        let path = self.join(path);
        let result = compile::<C, A, Args>(verb, &self.subdomain, &path, decl).and_then(
            |(pattern, info, specs)| {
                self.builder.insert(
                    &self.subdomain,
                    CompiledRoute {
                        pattern,
                        info: Arc::new(info),
                        specs,
                        endpoint: Arc::new(Handler::<C, A, Args>::new(factory, action)),
                        interceptor: self.interceptor.clone(),
                    },
                )
            },
        );
        if let Err(kind) = result {
            self.builder.errors.push(RegistrationError {
                verb,
                subdomain: self.subdomain.clone(),
                path,
                kind,
            });
        }
        self
    }

    /// Registers a GET route. `decl` names the action and its parameters,
    /// e.g. `Show(id int)`.
    pub fn get<C, F, A, Args>(&mut self, path: &str, factory: F, decl: &str, action: A) -> &mut Self
    where
        C: Controller,
        F: Fn() -> C + Send + Sync + 'static,
        A: Action<C, Args>,
        Args: 'static,
    {
        self.add(Verb::Get, path, factory, decl, action)
    }

    /// Registers a POST route.
    pub fn post<C, F, A, Args>(
        &mut self,
        path: &str,
        factory: F,
        decl: &str,
        action: A,
    ) -> &mut Self
    where
        C: Controller,
        F: Fn() -> C + Send + Sync + 'static,
        A: Action<C, Args>,
        Args: 'static,
    {
        self.add(Verb::Post, path, factory, decl, action)
    }

    /// Registers a PUT route.
    pub fn put<C, F, A, Args>(&mut self, path: &str, factory: F, decl: &str, action: A) -> &mut Self
    where
        C: Controller,
        F: Fn() -> C + Send + Sync + 'static,
        A: Action<C, Args>,
        Args: 'static,
    {
        self.add(Verb::Put, path, factory, decl, action)
    }

    /// Registers a DELETE route.
    pub fn delete<C, F, A, Args>(
        &mut self,
        path: &str,
        factory: F,
        decl: &str,
        action: A,
    ) -> &mut Self
    where
        C: Controller,
        F: Fn() -> C + Send + Sync + 'static,
        A: Action<C, Args>,
        Args: 'static,
    {
        self.add(Verb::Delete, path, factory, decl, action)
    }

    /// Registers a route for any method.
    pub fn any<C, F, A, Args>(&mut self, path: &str, factory: F, decl: &str, action: A) -> &mut Self
    where
        C: Controller,
        F: Fn() -> C + Send + Sync + 'static,
        A: Action<C, Args>,
        Args: 'static,
    {
        self.add(Verb::Any, path, factory, decl, action)
    }
}

fn compile<C, A, Args>(
    verb: Verb,
    subdomain: &str,
    path: &str,
    decl: &str,
) -> Result<(PathPattern, RouteInfo, Vec<ParamSpec>), RegistrationErrorKind>
where
    A: Action<C, Args>,
{
    let pattern = PathPattern::compile(path)?;
    let signature = Signature::validate(decl, &A::kinds(), pattern.params())?;
    let info = RouteInfo {
        verb,
        subdomain: subdomain.to_owned(),
        path: path.to_owned(),
        template: pattern.template().to_owned(),
        controller: short_type_name::<C>(),
        action: signature.action,
    };
    Ok((pattern, info, signature.specs))
}
