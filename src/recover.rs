// ==============================================================================
// Recovery boundary
// ==============================================================================
//
// `Recover` wraps a service whose errors are displayable and turns every
// error and every panic into exactly one response.
//
// - Production: `{"code": .., "message": ..}` as JSON. The code is
//   `UNKNOWN_CODE` unless the handler set a status explicitly, in which case
//   that status is both the code and the HTTP status. Otherwise 500.
// - Verbose: a one-line summary naming the panicking function and file,
//   followed by the backtrace, as plain text.
//
// Panics are caught around both `call` and every `poll` of the inner
// future. A process-wide hook records the message, location and (in
// verbose mode) a backtrace while a guard is armed on the current thread,
// and defers to the previous hook otherwise.

use std::{
    any::Any,
    backtrace::Backtrace,
    cell::{Cell, RefCell},
    convert::Infallible,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe, PanicHookInfo},
    pin::Pin,
    sync::Once,
    task::{Context, Poll},
};

use axum_core::{
    extract::Request,
    response::{IntoResponse, Response},
};
use http::{HeaderValue, StatusCode, header};
use pin_project_lite::pin_project;
use serde::Serialize;
use tower_layer::Layer;
use tower_service::Service;

use crate::response::StatusSlot;

/// Code reported when the failure carries no explicit status.
pub const UNKNOWN_CODE: i64 = -1;

// ==============================================================================
// Panic capture
// ==============================================================================

thread_local! {
    /// `Some(verbose)` while a guard runs on this thread.
    static ARMED: Cell<Option<bool>> = const { Cell::new(None) };
    static CAPTURED: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

#[derive(Debug)]
struct Captured {
    message: String,
    location: Option<String>,
    backtrace: Option<Backtrace>,
}

impl Captured {
    fn from_hook(info: &PanicHookInfo<'_>, verbose: bool) -> Self {
        Self {
            message: payload_message(info.payload()),
            location: info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line())),
            backtrace: verbose.then(Backtrace::force_capture),
        }
    }

    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        Self {
            message: payload_message(payload),
            location: None,
            backtrace: None,
        }
    }

    /// `panic: <message> [<function> <file:line>]`
    fn summary(&self) -> String {
        let function = self
            .backtrace
            .as_ref()
            .and_then(|bt| call_site(&bt.to_string()))
            .unwrap_or_else(|| "unknown".to_owned());
        let location = self.location.as_deref().unwrap_or("unknown");
        format!("panic: {} [{function} {location}]", self.message)
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}

/// First frame of a rendered backtrace that belongs to neither the runtime
/// nor this module.
fn call_site(backtrace: &str) -> Option<String> {
    const RUNTIME: &[&str] = &[
        "std::",
        "core::",
        "alloc::",
        "<alloc::",
        "<core::",
        "<std::",
        "rust_begin_unwind",
        "__rust",
        "axum_dispatch::recover::",
    ];
    backtrace
        .lines()
        .filter_map(|line| {
            let (index, symbol) = line.trim_start().split_once(": ")?;
            index.parse::<usize>().ok()?;
            Some(symbol.trim())
        })
        .find(|symbol| !RUNTIME.iter().any(|prefix| symbol.starts_with(prefix)))
        .map(str::to_owned)
}

fn install_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| match ARMED.with(Cell::get) {
            Some(verbose) => {
                let captured = Captured::from_hook(info, verbose);
                CAPTURED.with(|slot| *slot.borrow_mut() = Some(captured));
            }
            None => previous(info),
        }));
    });
}

/// Runs `f`, turning a panic into its captured report.
fn guard<R>(verbose: bool, f: impl FnOnce() -> R) -> Result<R, Captured> {
    install_hook();
    let outer = ARMED.with(|armed| armed.replace(Some(verbose)));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    ARMED.with(|armed| armed.set(outer));
    result.map_err(|payload| {
        CAPTURED
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| Captured::from_payload(payload.as_ref()))
    })
}

// ==============================================================================
// Rendering
// ==============================================================================

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: i64,
    message: &'a str,
}

#[derive(Clone, Debug)]
struct Report {
    verbose: bool,
    slot: StatusSlot,
}

impl Report {
    fn error(&self, err: &dyn fmt::Display) -> Response {
        let message = err.to_string();
        tracing::error!(error = %message, "request failed");
        self.render(&message, || message.clone())
    }

    fn panic(&self, captured: &Captured) -> Response {
        tracing::error!(
            message = %captured.message,
            location = captured.location.as_deref().unwrap_or("unknown"),
            "request panicked"
        );
        self.render(&captured.message, || match &captured.backtrace {
            Some(backtrace) => format!("{}\n\n{backtrace}", captured.summary()),
            None => captured.summary(),
        })
    }

    fn render(&self, message: &str, verbose_text: impl FnOnce() -> String) -> Response {
        let explicit = self.slot.get();
        let status = explicit.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.verbose {
            return (status, verbose_text()).into_response();
        }

        let code = explicit.map_or(UNKNOWN_CODE, |s| i64::from(s.as_u16()));
        let body = serde_json::to_vec(&ErrorBody { code, message }).unwrap_or_default();
        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

// ==============================================================================
// Layer / Service
// ==============================================================================

/// [`Layer`] that applies [`Recover`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RecoverLayer {
    verbose: bool,
}

impl RecoverLayer {
    /// `verbose` selects plain-text reports with backtraces over JSON.
    #[must_use]
    pub const fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl<S: Service<Request>> Layer<S> for RecoverLayer {
    type Service = Recover<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recover {
            inner,
            verbose: self.verbose,
            not_ready: None,
        }
    }
}

/// Renders every error and panic of the inner service as a response.
pub struct Recover<S: Service<Request>> {
    inner: S,
    verbose: bool,
    not_ready: Option<S::Error>,
}

impl<S: Service<Request>> Recover<S> {
    /// The wrapped service.
    pub const fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: Service<Request> + Clone> Clone for Recover<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            verbose: self.verbose,
            not_ready: None,
        }
    }
}

impl<S: Service<Request> + fmt::Debug> fmt::Debug for Recover<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recover")
            .field("inner", &self.inner)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl<S> Service<Request> for Recover<S>
where
    S: Service<Request, Response = Response>,
    S::Error: fmt::Display,
{
    type Response = Response;
    type Error = Infallible;
    type Future = RecoverFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // An inner readiness error is reported on the next call.
        match self.inner.poll_ready(cx) {
            Poll::Ready(Err(err)) => {
                self.not_ready = Some(err);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let report = Report {
            verbose: self.verbose,
            slot: StatusSlot::default(),
        };
        if let Some(err) = self.not_ready.take() {
            return RecoverFuture::failed(report.error(&err));
        }

        request.extensions_mut().insert(report.slot.clone());
        let inner = &mut self.inner;
        match guard(report.verbose, || inner.call(request)) {
            Ok(future) => RecoverFuture::Inner {
                future,
                verbose: report.verbose,
                slot: Some(report.slot),
            },
            Err(captured) => RecoverFuture::failed(report.panic(&captured)),
        }
    }
}

pin_project! {
    #[project = RecoverFutureProj]
    /// Response future for [`Recover`].
    pub enum RecoverFuture<F> {
        Inner {
            #[pin]
            future: F,
            verbose: bool,
            slot: Option<StatusSlot>,
        },
        Failed {
            response: Option<Response>,
        },
    }
}

impl<F> RecoverFuture<F> {
    const fn failed(response: Response) -> Self {
        Self::Failed {
            response: Some(response),
        }
    }
}

impl<F> fmt::Debug for RecoverFuture<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner { .. } => f.write_str("RecoverFuture::Inner"),
            Self::Failed { .. } => f.write_str("RecoverFuture::Failed"),
        }
    }
}

impl<F, E> Future for RecoverFuture<F>
where
    F: Future<Output = Result<Response, E>>,
    E: fmt::Display,
{
    type Output = Result<Response, Infallible>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            RecoverFutureProj::Failed { response } => {
                Poll::Ready(Ok(response.take().unwrap_or_default()))
            }
            RecoverFutureProj::Inner {
                future,
                verbose,
                slot,
            } => {
                let outcome = match guard(*verbose, || future.poll(cx)) {
                    Ok(Poll::Pending) => return Poll::Pending,
                    Ok(Poll::Ready(result)) => Ok(result),
                    Err(captured) => Err(captured),
                };
                let Some(slot) = slot.take() else {
                    return Poll::Ready(Ok(Response::default()));
                };
                let report = Report {
                    verbose: *verbose,
                    slot,
                };
                Poll::Ready(Ok(match outcome {
                    Ok(Ok(response)) => response,
                    Ok(Err(err)) => report.error(&err),
                    Err(captured) => report.panic(&captured),
                }))
            }
        }
    }
}
