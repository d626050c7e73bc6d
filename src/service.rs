// ==============================================================================
// Per-request service handle
// ==============================================================================
//
// The data layer is a collaborator. Each request gets one `Service`, opened
// by the app's `ServiceProvider` before injectors run and owned by the
// controller's `Base` afterwards. The crate never looks inside it.

use std::{any::Any, fmt};

/// An opaque, type-erased handle to whatever the data layer provides for a
/// single request (a connection, a transaction, a unit of work).
#[derive(Default)]
pub struct Service(Option<Box<dyn Any + Send>>);

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("open", &self.0.is_some())
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Wraps a data-layer value.
    #[must_use]
    pub fn new<T: Any + Send>(inner: T) -> Self {
        Self(Some(Box::new(inner)))
    }

    /// Whether the provider supplied anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref()?.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_mut()?.downcast_mut()
    }

    /// Removes and returns the inner value if it is a `T`.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        if !self.0.as_ref()?.is::<T>() {
            return None;
        }
        self.0.take()?.downcast().ok().map(|boxed| *boxed)
    }
}

/// Opens a [`Service`] for each request.
pub trait ServiceProvider: Send + Sync + 'static {
    fn open(&self) -> Service;
}

impl<F> ServiceProvider for F
where
    F: Fn() -> Service + Send + Sync + 'static,
{
    fn open(&self) -> Service {
        self()
    }
}

/// The default provider: every request gets an empty [`Service`].
#[derive(Clone, Copy, Debug, Default)]
pub struct NoService;

impl ServiceProvider for NoService {
    fn open(&self) -> Service {
        Service::default()
    }
}
