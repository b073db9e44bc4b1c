use thiserror::Error;

/// Template rendering failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// A `{{` without a matching `}}`.
    #[error("unterminated placeholder at byte {offset}")]
    Unterminated { offset: usize },

    /// The campaign URL did not parse after recipient substitution.
    #[error("invalid campaign url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}
