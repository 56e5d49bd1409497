//! Course enum shared by assignments, pairings, envelopes and plan metadata.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One stage of the evening. The three meals are matched; the afterparty only gets envelopes.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum Course {
    /// First meal
    #[sea_orm(string_value = "starter")]
    Starter,
    /// Second meal
    #[sea_orm(string_value = "main")]
    Main,
    /// Third meal
    #[sea_orm(string_value = "dessert")]
    Dessert,
    /// Non-meal closing stage, everyone meets at one location
    #[sea_orm(string_value = "afterparty")]
    Afterparty,
}

impl Course {
    /// The courses that get host/guest pairings, in serving order.
    pub const MEALS: [Self; 3] = [Self::Starter, Self::Main, Self::Dessert];

    /// Position among the meals, `None` for the afterparty.
    #[must_use]
    pub const fn meal_index(self) -> Option<usize> {
        match self {
            Self::Starter => Some(0),
            Self::Main => Some(1),
            Self::Dessert => Some(2),
            Self::Afterparty => None,
        }
    }

    /// True for starter, main and dessert.
    #[must_use]
    pub const fn is_meal(self) -> bool {
        self.meal_index().is_some()
    }

    /// Name as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Main => "main",
            Self::Dessert => "dessert",
            Self::Afterparty => "afterparty",
        }
    }
}

impl fmt::Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Course {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starter" | "appetizer" => Ok(Self::Starter),
            "main" => Ok(Self::Main),
            "dessert" => Ok(Self::Dessert),
            "afterparty" => Ok(Self::Afterparty),
            other => Err(format!("unknown course `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_course_parsing_and_order() {
        assert_eq!("Main".parse::<Course>().unwrap(), Course::Main);
        assert_eq!(" appetizer ".parse::<Course>().unwrap(), Course::Starter);
        assert!("brunch".parse::<Course>().is_err());
        assert!(Course::Starter < Course::Main && Course::Main < Course::Dessert);
        assert!(!Course::Afterparty.is_meal());
        assert_eq!(Course::Dessert.meal_index(), Some(2));
    }

    #[test]
    fn test_course_serde_is_lowercase() {
        let json = serde_json::to_string(&Course::Dessert).unwrap();
        assert_eq!(json, "\"dessert\"");
    }
}
