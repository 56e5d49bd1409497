//! Course pairing entity - a directed host -> guest edge for one course of one plan.

use super::Course;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Course pairing database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "course_pairings")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning plan
    pub plan_id: i64,
    /// Course of the pairing
    pub course: Course,
    /// Couple hosting at home
    pub host_couple_id: i64,
    /// Couple travelling to the host
    pub guest_couple_id: i64,
    /// When the pairing was written
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `CoursePairing` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each pairing belongs to one plan
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
