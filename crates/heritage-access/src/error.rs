//! Error types for the access core.
//!
//! Absence of a row is never an error here: store reads return `Option` or an
//! empty `Vec`, and "no embargo", "no rule" or "no grant" simply mean that no
//! restriction of that kind applies. Only infrastructure failures surface as
//! [`StoreError`].

use std::fmt::{self, Display};

use thiserror::Error;

/// The persisted tables the access core reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    TrustLevel,
    UserTrustGrant,
    Embargo,
    AccessRule,
    SensitivityFlag,
    AccessRequest,
    AuditLog,
    Catalog,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrustLevel => "trust_level",
            Self::UserTrustGrant => "user_trust_grant",
            Self::Embargo => "embargo",
            Self::AccessRule => "access_rule",
            Self::SensitivityFlag => "sensitivity_flag",
            Self::AccessRequest => "access_request",
            Self::AuditLog => "audit_log",
            Self::Catalog => "catalog",
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of the backing datastore.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not answer (unreachable, query failure, poisoned lock).
    #[error("{table} store unavailable: {reason}")]
    Unavailable { table: Table, reason: String },

    /// An optimistic version check failed; another writer got there first.
    #[error("concurrent modification of {table} row {id}")]
    Conflict { table: Table, id: u64 },

    /// The store rejected a write that violates one of its constraints.
    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl StoreError {
    pub fn unavailable(table: Table, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            table,
            reason: reason.into(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from the administrative operations of the access services.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// System-seeded rows cannot be modified or deleted.
    #[error("{kind} {id} is a system resource and cannot be modified")]
    ImmutableResource { kind: &'static str, id: u64 },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("validation failed: {0}")]
    Validation(String),
}

impl AccessError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, AccessError>;
