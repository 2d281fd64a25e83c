use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    MalformedInput,
    CapacityExceeded,
    NotFound,
    InvalidQuery,
    ShuttingDown,
    InvalidArgument,
    Internal,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn malformed(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::MalformedInput, context.into())
    }

    pub fn invalid_query(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidQuery, context.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error {
            kind: ErrorKind::InvalidQuery,
            context: format!("bad wildcard pattern: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
