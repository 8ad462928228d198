use std::{
    error::Error,
    fmt::{self, Display},
};

use comms::{CodecErr, ShapeErr};

use crate::{audit::AuditErr, registry::WorkerId};

/// The result type used across the coordinator.
pub type Result<T> = std::result::Result<T, CoordinatorErr>;

/// The coordinator's error type.
#[derive(Debug)]
pub enum CoordinatorErr {
    AlreadyRegistered(WorkerId),
    NotRegistered(WorkerId),
    IncompatibleModelShape {
        worker_id: WorkerId,
        source: ShapeErr,
    },
    NoContributors,
    Serialization(CodecErr),
    Audit(AuditErr),
    Config(String),
}

impl Display for CoordinatorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorErr::AlreadyRegistered(id) => {
                write!(f, "worker {} is already registered", id.short())
            }
            CoordinatorErr::NotRegistered(id) => write!(f, "worker {} is not registered", id.short()),
            CoordinatorErr::IncompatibleModelShape { worker_id, source } => write!(
                f,
                "the model submitted by worker {} doesn't match the global model: {source}",
                worker_id.short()
            ),
            CoordinatorErr::NoContributors => {
                f.write_str("there are no updates newer than the last aggregation")
            }
            CoordinatorErr::Serialization(e) => write!(f, "serialization failure: {e}"),
            CoordinatorErr::Audit(e) => write!(f, "audit failure: {e}"),
            CoordinatorErr::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl Error for CoordinatorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CoordinatorErr::IncompatibleModelShape { source, .. } => Some(source),
            CoordinatorErr::Serialization(e) => Some(e),
            CoordinatorErr::Audit(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecErr> for CoordinatorErr {
    fn from(value: CodecErr) -> Self {
        Self::Serialization(value)
    }
}

impl From<AuditErr> for CoordinatorErr {
    fn from(value: AuditErr) -> Self {
        Self::Audit(value)
    }
}
