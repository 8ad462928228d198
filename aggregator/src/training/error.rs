use std::{
    error::Error,
    fmt::{self, Display},
    time::Duration,
};

/// Error returned when a model couldn't be evaluated.
///
/// An evaluation failure is always local to the model being evaluated, it never aborts an
/// aggregation nor the evaluation of other models.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalErr {
    Failed(String),
    TimedOut(Duration),
    Aborted(String),
}

impl Display for EvalErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalErr::Failed(msg) => write!(f, "evaluation failed: {msg}"),
            EvalErr::TimedOut(limit) => write!(f, "evaluation timed out after {limit:?}"),
            EvalErr::Aborted(msg) => write!(f, "evaluation aborted: {msg}"),
        }
    }
}

impl Error for EvalErr {}
