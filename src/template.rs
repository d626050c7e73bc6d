// ==============================================================================
// Template rendering
// ==============================================================================
//
// No template language ships with the crate. Actions that return a
// `(name, data)` or `(InlineTemplate, data)` pair are rendered through the
// app's `TemplateEngine`.

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("no template engine is configured")]
    Unavailable,
    #[error("template `{0}` not found")]
    NotFound(String),
    #[error("rendering template `{name}`: {message}")]
    Render { name: String, message: String },
}

/// A template supplied as source text rather than by name.
///
/// `key` is derived from the source so engines can cache the parsed form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineTemplate {
    key: String,
    source: Arc<str>,
}

impl InlineTemplate {
    #[must_use]
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        let source = source.into();
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        Self {
            key: format!("{:016x}", hasher.finish()),
            source,
        }
    }

    /// Stable cache key for this source text.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Renders templates to bytes.
pub trait TemplateEngine: Send + Sync + 'static {
    /// Renders the named template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the template is unknown or fails.
    fn execute_by_name(&self, name: &str, data: &Value) -> Result<Vec<u8>, TemplateError>;

    /// Renders an inline template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the source does not parse or fails.
    fn execute(&self, template: &InlineTemplate, data: &Value) -> Result<Vec<u8>, TemplateError>;
}

/// The default engine: every render fails with [`TemplateError::Unavailable`].
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTemplates;

impl TemplateEngine for NoTemplates {
    fn execute_by_name(&self, _name: &str, _data: &Value) -> Result<Vec<u8>, TemplateError> {
        Err(TemplateError::Unavailable)
    }

    fn execute(&self, _template: &InlineTemplate, _data: &Value) -> Result<Vec<u8>, TemplateError> {
        Err(TemplateError::Unavailable)
    }
}
