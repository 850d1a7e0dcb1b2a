//! Error types for the table rebuild engine.
//!
//! All fallible operations in this crate return `Result<T, RebuildError>`. Errors
//! are classified into kinds (see [`RebuildErrorKind`]) that determine whether the
//! swap coordinator retries or gives up.
//!
//! # Error Classification
//!
//! - **LockContention** — `lock_timeout` elapsed waiting for the delta trigger or
//!   the final exclusive lock. Retried forever with a fixed backoff.
//! - **StatementTimeout** — `statement_timeout` elapsed mid-chunk. The caller may
//!   safely re-attempt the chunk.
//! - **Precondition** — the source table can't enter the protocol at all (no PK,
//!   partition parent). Not retried.
//! - **Config** — caller-supplied arguments are inconsistent. Not retried.
//! - **ConstraintValidation** — a post-swap `VALIDATE CONSTRAINT` failed. Logged
//!   and skipped, never fatal.
//! - **Database** — any other error surfaced by the driver. Fatal.
//! - **Internal** — invariant violation in this crate. Fatal, indicates a bug.

use std::fmt;

/// Primary error type for the rebuild engine.
#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    /// `lock_timeout` elapsed acquiring a lock (trigger install or final swap).
    #[error("lock not available: {0}")]
    LockNotAvailable(String),

    /// `statement_timeout` elapsed executing a statement.
    #[error("statement timeout: {0}")]
    StatementTimeout(String),

    /// The source table cannot be rebuilt as given (no primary key, is a
    /// partition parent, etc.).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Caller-supplied configuration is invalid (e.g. `set_column_order` names
    /// a different set of columns than the table has).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A `VALIDATE CONSTRAINT` statement failed during the post-swap phase.
    #[error("constraint validation failed: {0}")]
    ValidateConstraintFailed(String),

    /// Any other error returned by the database driver.
    #[error("database error: {0}")]
    Database(String),

    /// An invariant of this crate was violated. Indicates a bug, not bad input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio_postgres::Error> for RebuildError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            let code = db.code().code();
            // 55P03 = lock_not_available, 57014 = query_canceled (statement_timeout)
            if code == "55P03" {
                return RebuildError::LockNotAvailable(db.message().to_string());
            }
            if code == "57014" {
                return RebuildError::StatementTimeout(db.message().to_string());
            }
        }
        RebuildError::Database(err.to_string())
    }
}

impl RebuildError {
    /// Whether the swap coordinator should retry this error after a backoff.
    ///
    /// Only lock contention is retried; everything else is either a
    /// non-retryable precondition or a fatal error that must bubble up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RebuildError::LockNotAvailable(_))
    }

    /// Whether this error should abort the whole run rather than be warned
    /// about and skipped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RebuildError::ValidateConstraintFailed(_))
    }
}

/// Classification of error severity for logging and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildErrorKind {
    Lock,
    Precondition,
    Config,
    ConstraintValidation,
    Database,
    Internal,
}

impl fmt::Display for RebuildErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildErrorKind::Lock => write!(f, "LOCK"),
            RebuildErrorKind::Precondition => write!(f, "PRECONDITION"),
            RebuildErrorKind::Config => write!(f, "CONFIG"),
            RebuildErrorKind::ConstraintValidation => write!(f, "CONSTRAINT_VALIDATION"),
            RebuildErrorKind::Database => write!(f, "DATABASE"),
            RebuildErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl RebuildError {
    pub fn kind(&self) -> RebuildErrorKind {
        match self {
            RebuildError::LockNotAvailable(_) => RebuildErrorKind::Lock,
            RebuildError::StatementTimeout(_) => RebuildErrorKind::Database,
            RebuildError::PreconditionFailed(_) => RebuildErrorKind::Precondition,
            RebuildError::ConfigInvalid(_) => RebuildErrorKind::Config,
            RebuildError::ValidateConstraintFailed(_) => RebuildErrorKind::ConstraintValidation,
            RebuildError::Database(_) => RebuildErrorKind::Database,
            RebuildError::Internal(_) => RebuildErrorKind::Internal,
        }
    }
}

// ── Lock retry policy ───────────────────────────────────────────────────────

/// Fixed-interval retry for lock contention.
///
/// The original tool sleeps a flat 20 seconds and retries forever rather than
/// backing off exponentially — a rebuild is a foreground, operator-initiated
/// run, not a background job competing for attention, so there's no reason to
/// widen the interval and no attempt budget to exhaust. See `DESIGN.md` for
/// why this diverges from an exponential policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { delay_ms: 20_000 }
    }
}

impl RetryPolicy {
    /// This policy never gives up on lock contention.
    pub fn should_retry(&self, _attempt: u32) -> bool {
        true
    }
}

/// Tracks retry attempts for a single blocking phase (trigger install, swap).
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self { attempts: 0 }
    }

    /// Record a retryable failure. Always returns `true` under [`RetryPolicy`]'s
    /// unbounded attempt count; the return value mirrors the bounded-policy
    /// shape so callers read the same either way.
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> bool {
        self.attempts += 1;
        policy.should_retry(self.attempts - 1)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_errors_are_retryable() {
        assert!(RebuildError::LockNotAvailable("x".into()).is_retryable());
        assert!(!RebuildError::StatementTimeout("x".into()).is_retryable());
        assert!(!RebuildError::Internal("x".into()).is_retryable());
    }

    #[test]
    fn constraint_validation_failure_is_not_fatal() {
        assert!(!RebuildError::ValidateConstraintFailed("x".into()).is_fatal());
        assert!(RebuildError::Database("x".into()).is_fatal());
        assert!(RebuildError::PreconditionFailed("x".into()).is_fatal());
    }

    #[test]
    fn error_classification() {
        assert_eq!(
            RebuildError::LockNotAvailable("x".into()).kind(),
            RebuildErrorKind::Lock
        );
        assert_eq!(
            RebuildError::PreconditionFailed("x".into()).kind(),
            RebuildErrorKind::Precondition
        );
        assert_eq!(
            RebuildError::ValidateConstraintFailed("x".into()).kind(),
            RebuildErrorKind::ConstraintValidation
        );
    }

    #[test]
    fn retry_state_never_exhausts() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::new();
        for _ in 0..50 {
            assert!(state.record_failure(&policy));
        }
        assert_eq!(state.attempts, 50);
        state.reset();
        assert_eq!(state.attempts, 0);
    }
}
