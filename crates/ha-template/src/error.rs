use minijinja::ErrorKind;
use thiserror::Error;

pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// The source does not parse
    #[error("invalid template syntax: {0}")]
    Syntax(String),

    /// The source parsed but rendering failed, e.g. a filter rejected its input
    #[error("error rendering template: {0}")]
    Render(String),
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        let message = err.to_string();
        if err.kind() == ErrorKind::SyntaxError {
            TemplateError::Syntax(message)
        } else {
            TemplateError::Render(message)
        }
    }
}
