//! Unified error type for the matching engine.
//!
//! Pure components (matcher, timing, clues) only fail on malformed input. Everything
//! that touches the store funnels through `Error::Database` or, when a specific step of a
//! multi-step write fails, `Error::Persistence` so callers know exactly what broke.

use crate::entities::Course;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Every way an engine operation can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// `config.toml` could not be read or parsed
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong with the configuration
        message: String,
    },

    /// Any store failure outside a labelled step
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Reading a file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An environment variable was unreadable
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// A JSON column or blob did not parse
    #[error("Malformed stored data: {0}")]
    Json(#[from] serde_json::Error),

    /// Another rematch holds the event lock. Retry later, never queue.
    #[error("Rematch already in progress for event {event_id} (locked until {locked_until:?})")]
    Conflict {
        /// Event whose lock is held
        event_id: i64,
        /// When the current holder's lease runs out
        locked_until: Option<DateTime<Utc>>,
    },

    /// Rejected before any mutation happened.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Why the operation was refused
        message: String,
        /// Course involved, if any
        course: Option<Course>,
        /// Couple involved, if any
        couple_id: Option<i64>,
    },

    /// Lookup by id found nothing
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record looked up
        entity: &'static str,
        /// Id that was not found
        id: i64,
    },

    /// Caller-supplied values are malformed
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input
        message: String,
    },

    /// A write inside a cascade or rematch failed; the whole operation was abandoned.
    #[error("Write failed during {step}: {source}")]
    Persistence {
        /// Name of the step that failed
        step: &'static str,
        /// Underlying store error
        #[source]
        source: sea_orm::DbErr,
    },
}

impl Error {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
            course: None,
            couple_id: None,
        }
    }

    pub(crate) fn invalid_state_for(
        message: impl Into<String>,
        course: Option<Course>,
        couple_id: i64,
    ) -> Self {
        Self::InvalidState {
            message: message.into(),
            course,
            couple_id: Some(couple_id),
        }
    }

    /// True when the caller should simply try again later.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Tags a database error with the rematch/cascade step it happened in.
pub(crate) trait StepContext<T> {
    fn step(self, step: &'static str) -> Result<T>;
}

impl<T> StepContext<T> for std::result::Result<T, sea_orm::DbErr> {
    fn step(self, step: &'static str) -> Result<T> {
        self.map_err(|source| Error::Persistence { step, source })
    }
}

impl<T> StepContext<T> for Result<T> {
    fn step(self, step: &'static str) -> Result<T> {
        self.map_err(|error| match error {
            Error::Database(source) => Error::Persistence { step, source },
            other => other,
        })
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
