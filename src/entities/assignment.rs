//! Assignment entity - whether a couple hosts a given course, and for how many guests.

use super::Course;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Assignment database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assignments")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the assignment belongs to
    pub event_id: i64,
    /// Couple being assigned
    pub couple_id: i64,
    /// Course the assignment is for
    pub course: Course,
    /// Whether the couple hosts this course
    pub is_host: bool,
    /// Guest couples this host can receive (0 when not hosting)
    pub max_guests: i32,
}

/// Defines relationships between Assignment and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each assignment belongs to one couple
    #[sea_orm(
        belongs_to = "super::couple::Entity",
        from = "Column::CoupleId",
        to = "super::couple::Column::Id"
    )]
    Couple,
}

impl Related<super::couple::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Couple.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
