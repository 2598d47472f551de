use std::io;

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Matrices, vectors or arrays whose dimensions don't line up
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// NaN or infinity found in parameters, gradients or error signals
    #[error("non-finite value in {0}")]
    NonFinite(String),

    #[error("unknown activation function tag {0}")]
    UnknownActivation(u64),

    /// Bytes that don't follow the network, data set or IDX layout
    #[error("malformed data: {0}")]
    Format(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("data set pass contained no items")]
    EmptyDataSet,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Maps a short read onto a format error, passing other IO errors through.
    pub(crate) fn from_read(e: io::Error, what: &str) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Format(format!("unexpected end of input while reading {what}"))
        } else {
            Error::Io(e)
        }
    }
}
