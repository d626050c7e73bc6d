// ==============================================================================
// Typed actions
// ==============================================================================
//
// An action is any `Fn(&mut C, A1, .., An) -> R` where every `Ai` is a
// `Param` and `R` is an `IntoReply`. The argument kinds are known statically
// and checked against the textual declaration at registration; at request
// time the coerced values are converted back into the concrete argument
// types in order.
//
// `Handler` pairs an action with its controller factory and erases both
// behind `Endpoint`, so the route table can hold heterogeneous routes.

use std::{marker::PhantomData, sync::Arc};

use bytes::Bytes;

use crate::{
    bind::BindError,
    controller::{Base, Controller},
    dispatch::DispatchError,
    interceptor::{Gate, Interceptor},
    param::{Param, ParamKind, Resolved},
    reply::{IntoReply, Reply},
    response::HttpResponse,
};

// ==============================================================================
// Action
// ==============================================================================

/// A controller method callable with coerced arguments.
///
/// Implemented for closures and functions taking `&mut C` followed by up
/// to eight [`Param`] arguments.
pub trait Action<C, Args>: Send + Sync + 'static {
    type Output: IntoReply;

    /// The kind of each argument, in order.
    fn kinds() -> Vec<ParamKind>;

    /// Converts `args` and invokes the action.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] if an argument has the wrong shape or a struct
    /// argument fails to deserialize.
    fn call(&self, controller: &mut C, args: Vec<Resolved>) -> Result<Self::Output, BindError>;
}

macro_rules! impl_action {
    ($($ty:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<C, F, R, $($ty,)*> Action<C, ($($ty,)*)> for F
        where
            F: Fn(&mut C, $($ty,)*) -> R + Send + Sync + 'static,
            R: IntoReply,
            $($ty: Param,)*
        {
            type Output = R;

            fn kinds() -> Vec<ParamKind> {
                vec![$(<$ty as Param>::kind(),)*]
            }

            fn call(&self, controller: &mut C, args: Vec<Resolved>) -> Result<R, BindError> {
                let mut args = args.into_iter();
                $(
                    let $ty = <$ty as Param>::from_resolved(
                        args.next().ok_or_else(|| BindError::new("missing action argument"))?,
                    )?;
                )*
                Ok((self)(controller, $($ty,)*))
            }
        }
    };
}

impl_action!();
impl_action!(T1);
impl_action!(T1, T2);
impl_action!(T1, T2, T3);
impl_action!(T1, T2, T3, T4);
impl_action!(T1, T2, T3, T4, T5);
impl_action!(T1, T2, T3, T4, T5, T6);
impl_action!(T1, T2, T3, T4, T5, T6, T7);
impl_action!(T1, T2, T3, T4, T5, T6, T7, T8);

// ==============================================================================
// Endpoint
// ==============================================================================

/// What running an endpoint produced.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The interceptor vetoed the action.
    Rejected(Bytes),
    Replied(Reply),
}

/// A type-erased `(factory, action)` pair.
pub(crate) trait Endpoint: Send + Sync + 'static {
    /// Instantiates a controller, hands it `base`, gates it through
    /// `interceptor`, runs `init` and the action, and returns the response
    /// state together with the outcome.
    fn run(
        &self,
        base: Base,
        args: Vec<Resolved>,
        interceptor: Option<&dyn Interceptor>,
    ) -> Result<(HttpResponse, Outcome), DispatchError>;
}

pub(crate) struct Handler<C, A, Args> {
    factory: Arc<dyn Fn() -> C + Send + Sync>,
    action: A,
    _marker: PhantomData<fn() -> Args>,
}

impl<C, A, Args> Handler<C, A, Args> {
    pub(crate) fn new(factory: impl Fn() -> C + Send + Sync + 'static, action: A) -> Self {
        Self {
            factory: Arc::new(factory),
            action,
            _marker: PhantomData,
        }
    }
}

impl<C, A, Args> Endpoint for Handler<C, A, Args>
where
    C: Controller,
    A: Action<C, Args>,
    Args: 'static,
{
    fn run(
        &self,
        base: Base,
        args: Vec<Resolved>,
        interceptor: Option<&dyn Interceptor>,
    ) -> Result<(HttpResponse, Outcome), DispatchError> {
        let mut controller = (self.factory)();
        *controller.base() = base;

        if let Some(interceptor) = interceptor {
            let base = controller.base();
            let gate = interceptor.before(
                &base.route,
                &mut base.service,
                &base.request,
                &mut base.response,
            );
            if let Gate::Reject(body) = gate {
                tracing::debug!(route = %base.route, "interceptor rejected request");
                return Ok((base.take_response(), Outcome::Rejected(body)));
            }
        }

        if C::HAS_INIT {
            controller.init();
        }
        let output = self.action.call(&mut controller, args)?;
        let reply = output.into_reply()?;
        Ok((controller.base().take_response(), Outcome::Replied(reply)))
    }
}
