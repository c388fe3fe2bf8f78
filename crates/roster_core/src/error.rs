//! Error taxonomy for repository and unit-of-work operations.
//!
//! # Invariants
//! - Absence of a row on lookup is `Ok(None)`, never an error; `NotFound` is
//!   reserved for mandatory single results and deletes of absent ids.
//! - Nothing in this crate retries on any of these errors.

use crate::db::DbError;
use crate::engine::lock::LockWaitTimeout;
use crate::query::spec::Operator;
use rusqlite::ErrorCode;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} {id} was modified concurrently (expected version {expected_version})")]
    Conflict {
        entity: &'static str,
        id: String,
        expected_version: i64,
    },
    #[error("timed out waiting for lock on {resource}")]
    LockTimeout { resource: String },
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("expected at most one {entity}, found {count}")]
    NonUniqueResult { entity: &'static str, count: usize },
    #[error("operation cancelled")]
    Cancelled,
    #[error("unit of work was rolled back after a failed write")]
    TransactionAborted,
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Db(DbError),
}

impl RepoError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => {
                return Self::InvalidData(value.to_string());
            }
            rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
                ErrorCode::ConstraintViolation => {
                    return Self::ConstraintViolation(
                        message.clone().unwrap_or_else(|| failure.to_string()),
                    );
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Self::LockTimeout {
                        resource: "sqlite write lock".to_string(),
                    };
                }
                ErrorCode::OperationInterrupted => return Self::Cancelled,
                _ => {}
            },
            _ => {}
        }
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<LockWaitTimeout> for RepoError {
    fn from(value: LockWaitTimeout) -> Self {
        Self::LockTimeout {
            resource: value.key.to_string(),
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

/// Rejected query intent, operand, assignment or entity state.
///
/// Always raised before any SQL is executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown field `{field}` on {entity}")]
    UnknownField { entity: &'static str, field: String },
    #[error("operator {op:?} is not valid for field `{field}`")]
    InvalidOperator { field: &'static str, op: Operator },
    #[error("operator {op:?} on `{field}` got the wrong operand shape")]
    OperandShape { field: &'static str, op: Operator },
    #[error("operand for `{field}` must be {expected}, got {actual}")]
    OperandType {
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("query expects {expected} parameters, got {actual}")]
    ParameterCount { expected: usize, actual: usize },
    #[error("cannot assign `{field}`: {reason}")]
    InvalidAssignment {
        field: &'static str,
        reason: &'static str,
    },
    #[error("bulk update needs at least one assignment")]
    EmptyAssignments,
    #[error("page size must be greater than zero")]
    ZeroPageSize,
    #[error("{0}")]
    InvalidEntity(String),
}
