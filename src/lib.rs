//! # `axum-dispatch`
//!
//! Controller-style routing for [Axum](https://docs.rs/axum): routes map a
//! verb, a subdomain and a typed path pattern to a method on a controller
//! struct.
//!
//! ```rust
//! use axum_dispatch::{AppBuilder, Base, Controller};
//!
//! #[derive(Default)]
//! struct Users {
//!     base: Base,
//! }
//!
//! impl Controller for Users {
//!     fn base(&mut self) -> &mut Base {
//!         &mut self.base
//!     }
//! }
//!
//! impl Users {
//!     fn show(&mut self, id: i32) -> String {
//!         format!("user:{id}")
//!     }
//! }
//!
//! # fn main() -> Result<(), axum_dispatch::RegistrationError> {
//! let app = AppBuilder::new()
//!     .register("*", "", None, |r| {
//!         r.get("/user/:id:int:1:9999", Users::default, "Show(id int)", Users::show);
//!     })
//!     .build()?;
//! assert_eq!(app.url_for("GET", "Users", "Show"), Some("/user/:id"));
//! # Ok(())
//! # }
//! ```
//!
//! Path segments are `/:name:type`, optionally bounded as `:min` or
//! `:min:max` for `int` and `float64`. A literal path also matches the paths
//! below it (`/docs` serves `/docs/intro`), the longest literal winning. The
//! root `/` only matches itself; `/*` catches the rest.
//!
//! The [`App`] is a `tower::Service` and serves with
//! `axum::serve(listener, app.into_make_service())`. Every failure, panics
//! included, is turned into exactly one response.

mod action;
mod app;
mod bind;
mod config;
mod controller;
mod dispatch;
mod interceptor;
mod param;
mod pattern;
mod recover;
mod reply;
mod request;
mod response;
mod router;
mod service;
mod signature;
mod template;

pub use action::Action;
pub use app::{App, AppBuilder, IntoMakeService};
pub use bind::BindError;
pub use config::{AppConfig, ConfigError, Configurator, JsonConfigurator, NoConfig};
pub use controller::{Base, Controller};
pub use dispatch::DispatchError;
pub use interceptor::{Gate, InjectError, Injector, Interceptor, RegistrationHook};
pub use param::{Bind, Param, ParamKind, Resolved, Scalar, TypeTag, UnknownTypeTag};
pub use pattern::{Bounds, PathParam, PathPattern, PatternError, PatternMatch};
pub use recover::{Recover, RecoverFuture, RecoverLayer, UNKNOWN_CODE};
pub use reply::{IntoReply, Reply, ReplyError};
pub use request::HttpRequest;
pub use response::{HttpResponse, StatusSlot};
pub use router::{
    RegistrationError, RegistrationErrorKind, RouteError, RouteGroup, RouteInfo, RouteTable,
    UnknownVerb, Verb,
};
pub use service::{NoService, Service, ServiceProvider};
pub use signature::{ParamSpec, Signature, SignatureError};
pub use template::{InlineTemplate, NoTemplates, TemplateEngine, TemplateError};
