#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// This error typically means that isolated process misbehaved
    Sandbox,
    /// Bug in code, using minion, or in minion itself, or environment problem
    System,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid process options: {0}")]
    InvalidOptions(String),
    #[error("sandbox interaction failed: {0}")]
    Sandbox(String),
    #[error("process supervisor panicked")]
    SupervisorPanicked,
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io { .. } => ErrorKind::System,
            Error::InvalidOptions(_) => ErrorKind::System,
            Error::Sandbox(_) => ErrorKind::Sandbox,
            Error::SupervisorPanicked => ErrorKind::System,
        }
    }

    pub fn is_sandbox(&self) -> bool {
        self.kind() == ErrorKind::Sandbox
    }
}
