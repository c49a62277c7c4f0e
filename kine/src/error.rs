//! Error taxonomy for the revision-log engine.
//!
//! Every fallible operation in `kine` returns `CResult<T>`. Errors are
//! classified at the driver boundary (see `crate::driver::translate`) into
//! the taxonomy below; callers match on the variant rather than on
//! engine-specific SQL error codes.

use std::fmt;

pub type CResult<T> = std::result::Result<T, Error>;

/// The error taxonomy visible at the boundary (spec.md §6, §7).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The underlying SQL call failed for a reason `retryable()` considers
    /// transient (e.g. "database is locked"), and retries were exhausted.
    #[error("unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// A unique/foreign-key constraint was violated (e.g. `Fill` colliding
    /// with an existing id).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The requested row/key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A read specified a revision below the compact watermark.
    #[error("required revision has been compacted")]
    Compacted,

    /// The connection pool or a subscription has been closed.
    #[error("closed: {0}")]
    Closed(String),

    /// A caller-supplied argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A subscription's delivery buffer overflowed; the caller must rewatch.
    #[error("slow consumer, rewatch at a later revision")]
    SlowConsumer,

    /// Catch-all for SQL engine errors that don't fit the taxonomy above.
    #[error("internal error: {0}")]
    Internal(String),

    /// Unclassified driver error, kept for forwards compatibility with
    /// engine-specific codes `translate()` doesn't yet recognize.
    #[error("unknown driver error: {0}")]
    Unknown(String),
}

impl Error {
    /// Whether `retryable()` should be consulted again for this error, i.e.
    /// whether it originated from a SQL call as opposed to being a
    /// programming/validation error.
    pub fn is_sql_error(&self) -> bool {
        !matches!(self, Error::InvalidArgument(_) | Error::SlowConsumer)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        crate::driver::translate(&err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

/// A lightweight display helper used in log lines where the full `Debug`
/// chain would be noisy.
pub(crate) struct Short<'a>(pub &'a Error);

impl fmt::Display for Short<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
