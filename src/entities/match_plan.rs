//! Match plan entity - one versioned snapshot of an event's pairing state.
//!
//! At most one plan per event is `active`. Superseded plans are kept for audit.
//! `version`, `status` and `frozen_courses` are read and written by external
//! tooling, so their shape must stay stable.

use super::Course;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle of a match plan
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Being written by a rematch
    #[sea_orm(string_value = "draft")]
    Draft,
    /// The plan guests currently follow
    #[sea_orm(string_value = "active")]
    Active,
    /// Replaced by a newer version
    #[sea_orm(string_value = "superseded")]
    Superseded,
}

/// Match plan database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "match_plans")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event this plan belongs to
    pub event_id: i64,
    /// Monotonically increasing per event, starting at 1
    pub version: i32,
    /// `draft`, `active` or `superseded`
    pub status: PlanStatus,
    /// JSON array of courses whose reveals have begun
    pub frozen_courses: String,
    /// JSON-encoded `MatchStats`
    pub stats: Option<String>,
    /// When the plan was created
    pub created_at: DateTimeUtc,
    /// When the plan was replaced
    pub superseded_at: Option<DateTimeUtc>,
}

impl Model {
    /// Parses the stored frozen course list.
    pub fn frozen(&self) -> crate::errors::Result<BTreeSet<Course>> {
        if self.frozen_courses.trim().is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(serde_json::from_str(&self.frozen_courses)?)
    }
}

/// Defines relationships between `MatchPlan` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each plan belongs to one event
    #[sea_orm(
        belongs_to = "super::event::Entity",
        from = "Column::EventId",
        to = "super::event::Column::Id"
    )]
    Event,
    /// One plan owns many pairings
    #[sea_orm(has_many = "super::course_pairing::Entity")]
    CoursePairings,
    /// One plan owns many envelopes
    #[sea_orm(has_many = "super::envelope::Entity")]
    Envelopes,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl Related<super::course_pairing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CoursePairings.def()
    }
}

impl Related<super::envelope::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Envelopes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
