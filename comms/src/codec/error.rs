use std::{
    error::Error,
    fmt::{self, Display},
    str::Utf8Error,
};

use crate::state::ShapeErr;

/// The result type of every codec operation.
pub type Result<T> = std::result::Result<T, CodecErr>;

/// Error returned when a payload can't be encoded or decoded.
#[derive(Debug)]
pub enum CodecErr {
    Truncated { needed: usize, remaining: usize },
    TrailingBytes(usize),
    UnexpectedKind { got: u32, expected: u32 },
    InvalidName(Utf8Error),
    DuplicateParam(String),
    ZeroSampleCount,
    TooLarge(&'static str),
    Shape(ShapeErr),
}

impl Display for CodecErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecErr::Truncated { needed, remaining } => write!(
                f,
                "the payload is truncated, needed {needed} more bytes but only {remaining} remain"
            ),
            CodecErr::TrailingBytes(n) => write!(f, "the payload has {n} unread trailing bytes"),
            CodecErr::UnexpectedKind { got, expected } => {
                write!(f, "received payload kind {got}, expected {expected}")
            }
            CodecErr::InvalidName(e) => write!(f, "a parameter name is not valid utf-8: {e}"),
            CodecErr::DuplicateParam(name) => write!(f, "parameter `{name}` appears twice"),
            CodecErr::ZeroSampleCount => f.write_str("an update must be trained on at least one sample"),
            CodecErr::TooLarge(what) => write!(f, "the {what} is too large to be encoded"),
            CodecErr::Shape(e) => write!(f, "invalid tensor: {e}"),
        }
    }
}

impl Error for CodecErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CodecErr::InvalidName(e) => Some(e),
            CodecErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Utf8Error> for CodecErr {
    fn from(value: Utf8Error) -> Self {
        Self::InvalidName(value)
    }
}

impl From<ShapeErr> for CodecErr {
    fn from(value: ShapeErr) -> Self {
        Self::Shape(value)
    }
}
