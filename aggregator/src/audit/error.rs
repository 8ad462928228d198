use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type of the robustness audit and its stores.
pub type Result<T> = std::result::Result<T, AuditErr>;

/// Error returned when a round couldn't be audited or its record couldn't be persisted.
#[derive(Debug)]
pub enum AuditErr {
    InsufficientContributors { got: usize },
    DuplicateVersion(u64),
    Io(io::Error),
    Json(serde_json::Error),
}

impl Display for AuditErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditErr::InsufficientContributors { got } => write!(
                f,
                "leave-one-out needs at least 2 contributors, the round had {got}"
            ),
            AuditErr::DuplicateVersion(version) => {
                write!(f, "a record for model version {version} already exists")
            }
            AuditErr::Io(e) => write!(f, "io error: {e}"),
            AuditErr::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for AuditErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AuditErr::Io(e) => Some(e),
            AuditErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for AuditErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for AuditErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
