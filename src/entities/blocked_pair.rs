//! Blocked pair entity - two couples that must never be matched together.
//! Stored normalised so that `couple_low < couple_high`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Blocked pair database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blocked_pairs")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the block applies to
    pub event_id: i64,
    /// Smaller couple id of the pair
    pub couple_low: i64,
    /// Larger couple id of the pair
    pub couple_high: i64,
    /// Optional organizer note
    pub reason: Option<String>,
}

/// `BlockedPair` has no navigable relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
