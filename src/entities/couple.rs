//! Couple entity - one registered participating unit (one or two people).
//!
//! Couples are never physically removed. A dropout stamps `cancelled_at`; use
//! [`Model::status`] instead of reading the column directly.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Whether a couple takes part in matching
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum CoupleRole {
    /// Regular participant
    #[sea_orm(string_value = "normal")]
    Normal,
    /// Registered but excluded from matching until an organizer activates them
    #[sea_orm(string_value = "reserve")]
    Reserve,
}

/// Lifecycle of a couple, derived from the soft-delete column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoupleStatus {
    /// Still participating
    Active,
    /// Dropped out
    Cancelled {
        /// When the dropout was recorded
        at: DateTimeUtc,
    },
}

/// Couple database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "couples")]
pub struct Model {
    /// Unique identifier for the couple
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event this couple registered for
    pub event_id: i64,
    /// Display name, e.g. "Anna & Ben"
    pub name: String,
    /// `normal` or `reserve`
    pub role: CoupleRole,
    /// Number of people in this unit (1 or 2)
    pub person_count: i32,
    /// Home address shown to guests
    pub address: String,
    /// Home latitude, if geocoded
    pub latitude: Option<f64>,
    /// Home longitude, if geocoded
    pub longitude: Option<f64>,
    /// JSON array of shareable personal facts, both partners combined
    pub fun_facts: Option<String>,
    /// Age of the first person
    pub age_first: Option<i32>,
    /// Age of the second person
    pub age_second: Option<i32>,
    /// Registration this solo entry was split from
    pub split_from: Option<i64>,
    /// Soft delete marker
    pub cancelled_at: Option<DateTimeUtc>,
}

impl Model {
    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> CoupleStatus {
        self.cancelled_at
            .map_or(CoupleStatus::Active, |at| CoupleStatus::Cancelled { at })
    }

    /// Active, non-reserve couples take part in matching.
    #[must_use]
    pub fn is_matchable(&self) -> bool {
        self.status() == CoupleStatus::Active && self.role == CoupleRole::Normal
    }

    /// Geocoded home location, when both coordinates are known.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// Parses the stored fact list. Malformed JSON is an error, absent means empty.
    pub fn facts(&self) -> crate::errors::Result<Vec<String>> {
        match self.fun_facts.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => Ok(serde_json::from_str(raw)?),
        }
    }

    /// Initials of each person in the display name, e.g. "A. & B." for "Anna & Ben".
    #[must_use]
    pub fn initials(&self) -> String {
        self.name
            .split(['&', ',', '+'])
            .filter_map(|part| part.trim().chars().next())
            .map(|c| format!("{}.", c.to_uppercase()))
            .collect::<Vec<_>>()
            .join(" & ")
    }

    /// Known ages of the people in this unit.
    #[must_use]
    pub fn ages(&self) -> Vec<i32> {
        [self.age_first, self.age_second].into_iter().flatten().collect()
    }
}

/// Defines relationships between Couple and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each couple belongs to one event
    #[sea_orm(
        belongs_to = "super::event::Entity",
        from = "Column::EventId",
        to = "super::event::Column::Id"
    )]
    Event,
    /// One couple has many assignments
    #[sea_orm(has_many = "super::assignment::Entity")]
    Assignments,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl Related<super::assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assignments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn couple(name: &str) -> Model {
        Model {
            id: 1,
            event_id: 1,
            name: name.to_string(),
            role: CoupleRole::Normal,
            person_count: 2,
            address: "Elm Street 5".to_string(),
            latitude: None,
            longitude: None,
            fun_facts: Some(r#"["climbed Kilimanjaro","owns 3 cats"]"#.to_string()),
            age_first: Some(31),
            age_second: None,
            split_from: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn test_initials_and_facts() {
        let c = couple("anna & Ben");
        assert_eq!(c.initials(), "A. & B.");
        assert_eq!(c.facts().unwrap().len(), 2);
        assert_eq!(c.ages(), vec![31]);
    }

    #[test]
    fn test_status_tracks_cancellation() {
        let mut c = couple("Anna & Ben");
        assert!(c.is_matchable());
        let now = chrono::Utc::now();
        c.cancelled_at = Some(now);
        assert_eq!(c.status(), CoupleStatus::Cancelled { at: now });
        assert!(!c.is_matchable());

        let mut reserve = couple("Cleo");
        reserve.role = CoupleRole::Reserve;
        assert!(!reserve.is_matchable());
    }

    #[test]
    fn test_malformed_facts_are_rejected() {
        let mut c = couple("Anna");
        c.fun_facts = Some("not json".to_string());
        assert!(c.facts().is_err());
    }
}
