//! Error types for template rendering

use thiserror::Error;

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur while compiling or rendering a template
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Invalid template syntax
    #[error("invalid template syntax: {message}")]
    Syntax { message: String },

    /// The template touched a value that does not exist yet
    ///
    /// Usually means a referenced entity has not reported a state, which is
    /// common while the runtime is starting.
    #[error("undefined value: {message}")]
    Undefined { message: String },

    /// Any other render failure
    #[error("failed to render template: {message}")]
    Render { message: String },

    /// A timestamp template rendered something that is not a timestamp
    #[error("invalid timestamp '{value}'")]
    InvalidTimestamp { value: String },
}

impl TemplateError {
    /// True when the failure comes from an undefined value
    pub fn is_undefined(&self) -> bool {
        matches!(self, TemplateError::Undefined { .. })
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => TemplateError::Syntax { message },
            minijinja::ErrorKind::UndefinedError => TemplateError::Undefined { message },
            _ => TemplateError::Render { message },
        }
    }
}
