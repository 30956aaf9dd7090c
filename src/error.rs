use thiserror::Error;

/// Preconditions known before any I/O begins (`Logic`), and transient
/// backend failures surfaced on the next post-step (`Runtime`).
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("{0}")]
    Logic(String),

    #[error("backend I/O failed: {0}")]
    Runtime(String),
}

impl CoreError {
    pub fn logic(msg: impl Into<String>) -> Self {
        CoreError::Logic(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        CoreError::Runtime(msg.into())
    }

    pub fn is_logic(&self) -> bool {
        matches!(self, CoreError::Logic(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
