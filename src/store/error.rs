use std::fmt;

/// SQLSTATE raised when concurrent transactions cannot be serialized.
pub const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE raised when the store breaks a lock cycle.
pub const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    ConflictAbort,
    Timeout,
    Connection,
    Query,
    Invariant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    pub code: Option<String>,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Serialization failure or deadlock. Expected under contention and
    /// recovered by retrying the whole transaction.
    pub fn is_conflict_abort(&self) -> bool {
        matches!(self.kind, StoreErrorKind::ConflictAbort)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (sqlstate={})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for StoreError {}

/// Maps a SQLSTATE to the error kind the claim protocol branches on.
pub fn classify_sqlstate(code: &str, message: impl Into<String>) -> StoreError {
    let kind = match code {
        SERIALIZATION_FAILURE | DEADLOCK_DETECTED => StoreErrorKind::ConflictAbort,
        code if code.starts_with("08") => StoreErrorKind::Connection,
        "57014" => StoreErrorKind::Timeout,
        _ => StoreErrorKind::Query,
    };
    StoreError::new(kind, message).with_code(code)
}

pub fn conflict_abort(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::ConflictAbort, message).with_code(SERIALIZATION_FAILURE)
}

pub fn timeout(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::Timeout, message)
}

pub fn connection_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::Connection, message)
}

pub fn query_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::Query, message)
}

pub fn invariant_violation(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::Invariant, message)
}
