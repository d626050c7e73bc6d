// ==============================================================================
// Action return values
// ==============================================================================
//
// An action returns one of three shapes: raw bytes, a named template with
// data, or an inline template with data. `IntoReply` converts the Rust
// return type into that closed set; rendering happens in the dispatcher.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::template::InlineTemplate;

/// The rendered outcome of an action, before templates are executed.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// Written as-is.
    Body(Bytes),
    /// Rendered by [`TemplateEngine::execute_by_name`](crate::TemplateEngine::execute_by_name).
    Template { name: String, data: Value },
    /// Rendered by [`TemplateEngine::execute`](crate::TemplateEngine::execute).
    Inline { template: InlineTemplate, data: Value },
}

/// An action broke the return-value contract.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("action returned no body")]
    Missing,
    #[error("template data is not serializable: {0}")]
    Data(#[from] serde_json::Error),
}

/// Converts an action's return value into a [`Reply`].
pub trait IntoReply {
    /// # Errors
    ///
    /// Returns [`ReplyError`] when the value is `None` or template data
    /// cannot be serialized.
    fn into_reply(self) -> Result<Reply, ReplyError>;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, ReplyError> {
        Ok(self)
    }
}

macro_rules! body_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Result<Reply, ReplyError> {
                    Ok(Reply::Body(Bytes::from(self)))
                }
            }
        )*
    };
}

body_reply!(Bytes, Vec<u8>, &'static [u8], String, &'static str);

/// `None` is a contract violation, not an empty body.
impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Reply, ReplyError> {
        self.ok_or(ReplyError::Missing)?.into_reply()
    }
}

impl<T: Serialize> IntoReply for (String, T) {
    fn into_reply(self) -> Result<Reply, ReplyError> {
        Ok(Reply::Template {
            name: self.0,
            data: serde_json::to_value(self.1)?,
        })
    }
}

impl<T: Serialize> IntoReply for (&'static str, T) {
    fn into_reply(self) -> Result<Reply, ReplyError> {
        (self.0.to_owned(), self.1).into_reply()
    }
}

impl<T: Serialize> IntoReply for (InlineTemplate, T) {
    fn into_reply(self) -> Result<Reply, ReplyError> {
        Ok(Reply::Inline {
            template: self.0,
            data: serde_json::to_value(self.1)?,
        })
    }
}
