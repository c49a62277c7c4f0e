//! Error translation and the retry-without-backoff loop shared by `query`
//! and `execute` (spec.md §4.1, §7).

use std::future::Future;

use crate::error::{CResult, Error};
use crate::telemetry::{Outcome, Telemetry};

/// Bound on retries for a single `query`/`execute` call (spec.md §4.1).
pub const MAX_RETRIES: u32 = 500;

/// Bound on retries of the initial open+ping handshake (spec.md §4.1).
pub const MAX_OPEN_RETRIES: u32 = 300;

/// Maps a raw `sqlx::Error` to the taxonomy in spec.md §6. Pluggable in
/// principle (different backends surface different codes under the same
/// SQLSTATE-ish buckets); kept as a free function here since `kine` only
/// ships one translation table today.
pub fn translate(err: &sqlx::Error) -> Error {
    match err {
        sqlx::Error::RowNotFound => Error::NotFound("no matching row".to_string()),
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            Error::Closed("connection pool closed".to_string())
        }
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation() {
                Error::ConstraintViolation(db_err.message().to_string())
            } else if is_transient_db_error(db_err.as_ref()) {
                Error::Internal(format!("transient: {}", db_err.message()))
            } else {
                Error::Internal(db_err.message().to_string())
            }
        }
        sqlx::Error::Io(io_err) => Error::Internal(format!("io: {io_err}")),
        sqlx::Error::PoolTimedOut => Error::Internal("timed out waiting for a connection".to_string()),
        other => Error::Unknown(other.to_string()),
    }
}

/// Engine-specific "busy"/"locked"/deadlock codes that justify a bare retry
/// with no backoff, trusting the SQL engine's own admission control
/// (spec.md §4.1, §9 REDESIGN FLAGS).
fn is_transient_db_error(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    match db_err.code() {
        Some(code) => matches!(
            code.as_ref(),
            // SQLite: SQLITE_BUSY / SQLITE_LOCKED.
            "5" | "6"
            // Postgres: serialization_failure / deadlock_detected.
            | "40001" | "40P01"
            // MySQL: ER_LOCK_WAIT_TIMEOUT / ER_LOCK_DEADLOCK.
            | "1205" | "1213"
        ),
        None => false,
    }
}

/// Whether `err` is worth retrying at all (as opposed to a permanent
/// constraint/argument error). Consulted before the transient-code check so
/// that non-SQL, non-transient errors never loop.
pub fn retryable(err: &Error) -> bool {
    match err {
        Error::Internal(msg) => msg.starts_with("transient:") || msg.contains("locked") || msg.contains("busy"),
        Error::Closed(_) => true,
        _ => false,
    }
}

/// Runs `attempt` up to `MAX_RETRIES` times, retrying whenever the resulting
/// error is [`retryable`]. No backoff: the SQL engine is expected to enforce
/// its own admission control (spec.md §4.4). On exhaustion the last error is
/// wrapped in [`Error::Unavailable`] annotated with the attempt count.
pub async fn with_retry<T, F, Fut>(telemetry: &Telemetry, tag: &'static str, mut attempt: F) -> CResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CResult<T>>,
{
    let mut tries = 0u32;
    loop {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(err) if retryable(&err) && tries < MAX_RETRIES => {
                tries += 1;
                telemetry.record_retry();
                if tries % 50 == 0 {
                    tracing::debug!(tag, tries, "retrying transient SQL error");
                } else {
                    tracing::trace!(tag, tries, "retrying transient SQL error");
                }
            }
            Err(err) if retryable(&err) => {
                telemetry.record_op(tag, Outcome::Err);
                return Err(Error::Unavailable { attempts: tries, source: Box::new(err) });
            }
            Err(err) => {
                telemetry.record_op(tag, Outcome::Err);
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let telemetry = Telemetry::new();
        let calls = AtomicU32::new(0);
        let result: CResult<u32> = with_retry(&telemetry, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(Error::Closed("retry me".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(telemetry.snapshot().sql_retries, 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let telemetry = Telemetry::new();
        let result: CResult<()> = with_retry(&telemetry, "test", || async { Err(Error::InvalidArgument("nope".into())) }).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(telemetry.snapshot().sql_retries, 0);
    }
}
