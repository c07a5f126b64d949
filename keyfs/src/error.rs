//! Store-level error taxonomy.
//!
//! Every store, transaction and the fetch backend report failures through
//! [`StoreError`]. Variants map one-to-one onto errno identifiers so the
//! filesystem layer above can surface them unchanged.

use std::fmt;
use std::io::{self, ErrorKind};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathHint(Option<String>);

impl PathHint {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn some(path: impl Into<String>) -> Self {
        Self(Some(path.into()))
    }

    pub fn is_none(&self) -> bool {
        self.0.as_deref().is_none_or(str::is_empty)
    }
}

impl fmt::Display for PathHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(path) if !path.is_empty() => write!(f, ": {path}"),
            _ => Ok(()),
        }
    }
}

impl From<String> for PathHint {
    fn from(value: String) -> Self {
        Self::some(value)
    }
}

impl From<&str> for PathHint {
    fn from(value: &str) -> Self {
        Self::some(value)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// Key or path absent from the store or index.
    #[error("not found{path}")]
    NotFound { path: PathHint },

    /// Local medium failure, undecodable buffer or a client-side status.
    #[error("I/O error{path}: {message}")]
    Io { path: PathHint, message: String },

    /// The origin could not be reached or answered with a server-side status.
    #[error("remote I/O error{path}: {message}")]
    RemoteIo { path: PathHint, message: String },

    /// Byte count inconsistent with the requested range or declared size.
    #[error("bad exchange{path}: {message}")]
    BadExchange { path: PathHint, message: String },

    #[error("no data available{path}")]
    NoData { path: PathHint },

    /// A synchronous read missed the cache; retry once the queued fetch settles.
    #[error("resource temporarily unavailable, try again{path}")]
    TryAgain { path: PathHint },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    pub fn not_found(path: impl Into<PathHint>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            path: PathHint::none(),
            message: message.into(),
        }
    }

    pub fn remote_io(message: impl Into<String>) -> Self {
        Self::RemoteIo {
            path: PathHint::none(),
            message: message.into(),
        }
    }

    pub fn bad_exchange(message: impl Into<String>) -> Self {
        Self::BadExchange {
            path: PathHint::none(),
            message: message.into(),
        }
    }

    pub fn no_data(path: impl Into<PathHint>) -> Self {
        Self::NoData { path: path.into() }
    }

    pub fn try_again(path: impl Into<PathHint>) -> Self {
        Self::TryAgain { path: path.into() }
    }

    /// Attach `path` to the error unless it already names one.
    pub fn with_path(self, path: impl Into<String>) -> Self {
        let path = path.into();
        match self {
            Self::NotFound { path: p } if p.is_none() => Self::not_found(path),
            Self::Io { path: p, message } if p.is_none() => Self::Io {
                path: path.into(),
                message,
            },
            Self::RemoteIo { path: p, message } if p.is_none() => Self::RemoteIo {
                path: path.into(),
                message,
            },
            Self::BadExchange { path: p, message } if p.is_none() => Self::BadExchange {
                path: path.into(),
                message,
            },
            Self::NoData { path: p } if p.is_none() => Self::no_data(path),
            Self::TryAgain { path: p } if p.is_none() => Self::try_again(path),
            other => other,
        }
    }

    /// errno equivalent of this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound { .. } => libc::ENOENT,
            Self::Io { .. } => libc::EIO,
            Self::RemoteIo { .. } => libc::EREMOTEIO,
            Self::BadExchange { .. } => libc::EBADE,
            Self::NoData { .. } => libc::ENODATA,
            Self::TryAgain { .. } => libc::EAGAIN,
            Self::InvalidInput(_) => libc::EINVAL,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_try_again(&self) -> bool {
        matches!(self, Self::TryAgain { .. })
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            ErrorKind::NotFound => StoreError::NotFound {
                path: PathHint::none(),
            },
            ErrorKind::InvalidInput => StoreError::InvalidInput(value.to_string()),
            _ => StoreError::io(value.to_string()),
        }
    }
}

impl From<StoreError> for io::Error {
    fn from(value: StoreError) -> Self {
        let errno = value.errno();
        let os = io::Error::from_raw_os_error(errno);
        io::Error::new(os.kind(), value)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
