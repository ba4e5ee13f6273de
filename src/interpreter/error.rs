use thiserror::Error;

/// Runtime failures surfaced through the voice channel.
///
/// `Raised` errors are catchable by `attempt`; `Terminated` carries the exit
/// code of `terminate(code)` out of the evaluator and is never intercepted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("{message}")]
    Raised { message: String, line: usize },
    #[error("The scenario terminates. Exit code: {code}")]
    Terminated { code: i32 },
}

impl RuntimeError {
    pub fn raised(message: impl Into<String>, line: usize) -> Self {
        Self::Raised {
            message: message.into(),
            line,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Self::Raised { line, .. } => *line,
            Self::Terminated { .. } => 0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Raised { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
