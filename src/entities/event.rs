//! Event entity - one progressive dinner evening.
//!
//! Holds the course timeline, the JSON timing overrides and the advisory
//! rematch lock (`rematch_locked_until`), which is the single point of mutual
//! exclusion for rematches on this event.

use super::Course;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Event database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "events")]
pub struct Model {
    /// Unique identifier for the event
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Human-readable event name
    pub name: String,
    /// Scheduled start of the starter course
    pub starter_at: DateTimeUtc,
    /// Scheduled start of the main course
    pub main_at: DateTimeUtc,
    /// Scheduled start of the dessert course
    pub dessert_at: DateTimeUtc,
    /// Optional afterparty start
    pub afterparty_at: Option<DateTimeUtc>,
    /// Where the afterparty takes place
    pub afterparty_location: Option<String>,
    /// JSON-encoded `TimingOverrides` (event level + per course)
    pub timing_overrides: Option<String>,
    /// Rematch lock; set only if absent or expired
    pub rematch_locked_until: Option<DateTimeUtc>,
}

impl Model {
    /// Start time of the given course, `None` if the event has no afterparty.
    #[must_use]
    pub const fn course_start(&self, course: Course) -> Option<DateTimeUtc> {
        match course {
            Course::Starter => Some(self.starter_at),
            Course::Main => Some(self.main_at),
            Course::Dessert => Some(self.dessert_at),
            Course::Afterparty => self.afterparty_at,
        }
    }
}

/// Defines relationships between Event and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One event has many couples
    #[sea_orm(has_many = "super::couple::Entity")]
    Couples,
    /// One event has many match plans
    #[sea_orm(has_many = "super::match_plan::Entity")]
    MatchPlans,
}

impl Related<super::couple::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Couples.def()
    }
}

impl Related<super::match_plan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MatchPlans.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
