use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type for every shape check performed over tensors and model states.
pub type Result<T> = std::result::Result<T, ShapeErr>;

/// Error returned whenever two tensors or two model states don't describe the same architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeErr {
    MissingParam(String),
    UnexpectedParam(String),
    ShapeMismatch {
        param: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    Incompatible {
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    DataLength {
        got: usize,
        expected: usize,
    },
}

impl Display for ShapeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeErr::MissingParam(param) => write!(f, "parameter `{param}` is missing"),
            ShapeErr::UnexpectedParam(param) => write!(f, "parameter `{param}` is not expected"),
            ShapeErr::ShapeMismatch {
                param,
                got,
                expected,
            } => write!(
                f,
                "parameter `{param}` has shape {got:?}, expected {expected:?}"
            ),
            ShapeErr::Incompatible { got, expected } => {
                write!(f, "tensor has shape {got:?}, expected {expected:?}")
            }
            ShapeErr::DataLength { got, expected } => write!(
                f,
                "tensor data has {got} elements but its shape requires {expected}"
            ),
        }
    }
}

impl Error for ShapeErr {}
