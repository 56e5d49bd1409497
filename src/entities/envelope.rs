//! Envelope entity - the time-gated reveal record telling a couple where to go.
//!
//! The six reveal timestamps form a non-decreasing ladder
//! (`teasing_at <= clue_1_at <= clue_2_at <= street_at <= number_at <= opened_at`).
//! Once `activated_at` is set the envelope is frozen: destination and timestamps
//! may no longer change, it can only be cancelled.

use super::Course;
use crate::core::timing::RevealSchedule;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of an envelope, derived from `activated_at` and `cancelled_at`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeState {
    /// Nothing revealed yet, may still be rescheduled
    Scheduled,
    /// First reveal fired, frozen
    Activated {
        /// When the first reveal fired
        at: DateTimeUtc,
    },
    /// Withdrawn; `activated` remembers whether it had been shown
    Cancelled {
        /// When it was cancelled
        at: DateTimeUtc,
        /// When it had been activated, if ever
        activated: Option<DateTimeUtc>,
    },
}

/// Envelope database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "envelopes")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning plan
    pub plan_id: i64,
    /// Couple receiving the envelope
    pub couple_id: i64,
    /// Course the envelope leads to
    pub course: Course,
    /// Host the couple travels to, `None` for the afterparty
    pub host_couple_id: Option<i64>,
    /// Destination address
    pub destination: String,
    /// Free-form notes for the guest
    pub notes: Option<String>,
    /// First clue text
    pub clue_1: Option<String>,
    /// Second clue text
    pub clue_2: Option<String>,
    /// Scheduled course time
    pub course_at: DateTimeUtc,
    /// Teaser reveal
    pub teasing_at: DateTimeUtc,
    /// First clue reveal
    pub clue_1_at: DateTimeUtc,
    /// Second clue reveal
    pub clue_2_at: DateTimeUtc,
    /// Street reveal
    pub street_at: DateTimeUtc,
    /// House number reveal
    pub number_at: DateTimeUtc,
    /// Fully opened
    pub opened_at: DateTimeUtc,
    /// Freeze marker, set when the first reveal fires
    pub activated_at: Option<DateTimeUtc>,
    /// Cancellation marker
    pub cancelled_at: Option<DateTimeUtc>,
}

impl Model {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EnvelopeState {
        match (self.activated_at, self.cancelled_at) {
            (activated, Some(at)) => EnvelopeState::Cancelled { at, activated },
            (Some(at), None) => EnvelopeState::Activated { at },
            (None, None) => EnvelopeState::Scheduled,
        }
    }

    /// Frozen envelopes must never be edited, only cancelled.
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.activated_at.is_some()
    }

    /// The six-stage reveal ladder stored on this envelope.
    #[must_use]
    pub const fn schedule(&self) -> RevealSchedule {
        RevealSchedule {
            teasing_at: self.teasing_at,
            clue_1_at: self.clue_1_at,
            clue_2_at: self.clue_2_at,
            street_at: self.street_at,
            number_at: self.number_at,
            opened_at: self.opened_at,
        }
    }
}

/// Defines relationships between Envelope and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each envelope belongs to one plan
    #[sea_orm(
        belongs_to = "super::match_plan::Entity",
        from = "Column::PlanId",
        to = "super::match_plan::Column::Id"
    )]
    MatchPlan,
}

impl Related<super::match_plan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MatchPlan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
