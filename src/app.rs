// ==============================================================================
// App / AppBuilder
// ==============================================================================
//
// `AppBuilder` collects collaborators and route groups; `build` compiles the
// route table and wraps the dispatcher in the recovery layer. The resulting
// `App` is a cheap-to-clone `Service<Request>` that never errors.

use std::{
    convert::Infallible,
    fmt,
    future::{Ready, ready},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum_core::{extract::Request, response::Response};
use tower::ServiceBuilder;
use tower_service::Service;

use crate::{
    config::{AppConfig, ConfigError, Configurator, NoConfig},
    dispatch::{DispatchError, Dispatcher, Shared},
    interceptor::{Injector, Interceptor, RegistrationHook},
    recover::{Recover, RecoverFuture, RecoverLayer},
    router::{RegistrationError, RouteGroup, RouteTable, TableBuilder, Verb},
    service::{NoService, ServiceProvider},
    template::{NoTemplates, TemplateEngine},
};

type Registration = Box<dyn FnOnce(&mut RouteGroup<'_>) + Send>;

struct Group {
    subdomain: String,
    namespace: String,
    interceptor: Option<Arc<dyn Interceptor>>,
    register: Registration,
}

// ==============================================================================
// AppBuilder
// ==============================================================================

/// Assembles an [`App`].
///
/// ```rust
/// use axum_dispatch::{AppBuilder, Base, Controller};
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
/// let app = AppBuilder::new()
///     .register("", "", None, |r| {
///         r.get("/user/:id:int:1:9999", Users::default, "Show(id int)", |_: &mut Users, id: i32| {
///             format!("user:{id}")
///         });
///     })
///     .build();
/// assert!(app.is_ok());
/// ```
pub struct AppBuilder {
    config: AppConfig,
    configurator: Arc<dyn Configurator>,
    templates: Arc<dyn TemplateEngine>,
    services: Arc<dyn ServiceProvider>,
    injectors: Vec<Arc<dyn Injector>>,
    hooks: Vec<Arc<dyn RegistrationHook>>,
    groups: Vec<Group>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder")
            .field("config", &self.config)
            .field("configurator", &self.configurator)
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}

impl AppBuilder {
    /// A builder with default settings and no collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            configurator: Arc::new(NoConfig),
            templates: Arc::new(NoTemplates),
            services: Arc::new(NoService),
            injectors: Vec::new(),
            hooks: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// A builder whose [`AppConfig`] is read from `configurator`, which is
    /// also handed to every controller.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a dispatcher setting has the wrong type.
    pub fn from_configurator(configurator: impl Configurator) -> Result<Self, ConfigError> {
        let config = AppConfig::from_configurator(&configurator)?;
        Ok(Self {
            config,
            configurator: Arc::new(configurator),
            ..Self::new()
        })
    }

    /// Replaces the dispatcher settings.
    #[must_use]
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn templates(mut self, templates: impl TemplateEngine) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    /// Source of the per-request [`Service`](crate::Service) handle.
    #[must_use]
    pub fn services(mut self, services: impl ServiceProvider) -> Self {
        self.services = Arc::new(services);
        self
    }

    /// Runs `injector` for every request, in the order added.
    #[must_use]
    pub fn injector(mut self, injector: impl Injector) -> Self {
        self.injectors.push(Arc::new(injector));
        self
    }

    /// Shows every route to `hook` when the app is built.
    #[must_use]
    pub fn hook(mut self, hook: impl RegistrationHook) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Adds the routes `register` declares under `subdomain` and
    /// `namespace`. An empty subdomain means `www`; `*` catches every host
    /// no other group claims.
    #[must_use]
    pub fn register<F>(
        mut self,
        subdomain: &str,
        namespace: &str,
        interceptor: Option<Arc<dyn Interceptor>>,
        register: F,
    ) -> Self
    where
        F: FnOnce(&mut RouteGroup<'_>) + Send + 'static,
    {
        self.groups.push(Group {
            subdomain: subdomain.to_owned(),
            namespace: namespace.to_owned(),
            interceptor,
            register: Box::new(register),
        });
        self
    }

    /// Compiles every route.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistrationError`]; all of them are logged.
    pub fn build(self) -> Result<App, RegistrationError> {
        let mut builder = TableBuilder::new(self.config.local_host.clone(), self.hooks);
        for group in self.groups {
            let mut routes = RouteGroup::new(
                &group.subdomain,
                &group.namespace,
                group.interceptor,
                &mut builder,
            );
            (group.register)(&mut routes);
        }
        let table = builder.finish()?;

        let verbose = self.config.verbose;
        let dispatcher = Dispatcher::new(Shared {
            table: Arc::new(table),
            config: self.config,
            configurator: self.configurator,
            templates: self.templates,
            services: self.services,
            injectors: self.injectors,
        });
        Ok(App {
            svc: ServiceBuilder::new()
                .layer(RecoverLayer::new(verbose))
                .service(dispatcher),
        })
    }
}

// ==============================================================================
// App
// ==============================================================================

/// The built application.
#[derive(Clone, Debug)]
pub struct App {
    svc: Recover<Dispatcher>,
}

impl App {
    /// The compiled routes.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        self.svc.get_ref().table()
    }

    /// The template path of the route registered for `controller` and
    /// `action` under `method` (`GET`, `POST`, `PUT`, `DELETE` or `ANY`).
    #[must_use]
    pub fn url_for(&self, method: &str, controller: &str, action: &str) -> Option<&str> {
        let verb = method.parse::<Verb>().ok()?;
        self.routes().url_for(verb, controller, action)
    }

    /// Convert this app into a [`MakeService`], suitable for use with
    /// [`axum::serve`].
    ///
    /// [`MakeService`]: tower::make::MakeService
    #[must_use]
    pub const fn into_make_service(self) -> IntoMakeService<Self> {
        IntoMakeService { svc: self }
    }
}

impl Service<Request> for App {
    type Response = Response;
    type Error = Infallible;
    type Future =
        RecoverFuture<Pin<Box<dyn Future<Output = Result<Response, DispatchError>> + Send>>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.svc.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        self.svc.call(request)
    }
}

// ==============================================================================
// IntoMakeService
// ==============================================================================

/// A [`MakeService`] wrapper so `axum::serve(listener, app.into_make_service())`
/// works.
///
/// [`MakeService`]: tower::make::MakeService
#[derive(Debug, Clone)]
pub struct IntoMakeService<S> {
    svc: S,
}

impl<S, T> Service<T> for IntoMakeService<S>
where
    S: Clone,
{
    type Response = S;
    type Error = Infallible;
    type Future = Ready<Result<S, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _target: T) -> Self::Future {
        ready(Ok(self.svc.clone()))
    }
}
