// ==============================================================================
// Hooks around registration and dispatch
// ==============================================================================
//
// - `RegistrationHook`: sees every route once, at registration.
// - `Injector`: runs once per request before parameters are bound, and may
//   stash collaborators in the controller's extension map.
// - `Interceptor`: per route group; gates the action and can short-circuit
//   the request with a body of its own.
//
// Plain closures implement all three.

use bytes::Bytes;
use http::Extensions;

use crate::{request::HttpRequest, response::HttpResponse, router::RouteInfo, service::Service};

// ==============================================================================
// Interceptor
// ==============================================================================

/// The outcome of an [`Interceptor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Gate {
    /// Continue to the action.
    Pass,
    /// Skip the action and write these bytes verbatim.
    Reject(Bytes),
}

/// A pre-action gate shared by every route in a group.
pub trait Interceptor: Send + Sync + 'static {
    fn before(
        &self,
        route: &RouteInfo,
        service: &mut Service,
        request: &HttpRequest,
        response: &mut HttpResponse,
    ) -> Gate;
}

impl<F> Interceptor for F
where
    F: Fn(&RouteInfo, &mut Service, &HttpRequest, &mut HttpResponse) -> Gate
        + Send
        + Sync
        + 'static,
{
    fn before(
        &self,
        route: &RouteInfo,
        service: &mut Service,
        request: &HttpRequest,
        response: &mut HttpResponse,
    ) -> Gate {
        self(route, service, request, response)
    }
}

// ==============================================================================
// Injector / RegistrationHook
// ==============================================================================

/// A collaborator refused a route or a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct InjectError {
    message: String,
}

impl InjectError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Per-request injection into the controller's [`Base`](crate::Base).
pub trait Injector: Send + Sync + 'static {
    /// # Errors
    ///
    /// An error aborts the request; it is rendered as a failure.
    fn inject(
        &self,
        route: &RouteInfo,
        extensions: &mut Extensions,
        service: &mut Service,
    ) -> Result<(), InjectError>;
}

impl<F> Injector for F
where
    F: Fn(&RouteInfo, &mut Extensions, &mut Service) -> Result<(), InjectError>
        + Send
        + Sync
        + 'static,
{
    fn inject(
        &self,
        route: &RouteInfo,
        extensions: &mut Extensions,
        service: &mut Service,
    ) -> Result<(), InjectError> {
        self(route, extensions, service)
    }
}

/// Observes each route as it is registered.
pub trait RegistrationHook: Send + Sync + 'static {
    /// # Errors
    ///
    /// An error fails the build.
    fn registered(&self, route: &RouteInfo) -> Result<(), InjectError>;
}

impl<F> RegistrationHook for F
where
    F: Fn(&RouteInfo) -> Result<(), InjectError> + Send + Sync + 'static,
{
    fn registered(&self, route: &RouteInfo) -> Result<(), InjectError> {
        self(route)
    }
}
