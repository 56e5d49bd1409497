//! Shared test utilities for the matching engine.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    config::AppConfig,
    core::{
        assignment::set_host,
        couple::{NewCouple, register_couple},
        event::{EventTimeline, create_event},
        rematch::run_rematch,
        travel::NoTravelData,
    },
    entities::{self, Course},
    errors::Result,
};
use chrono::{DateTime, TimeZone, Utc};
use sea_orm::DatabaseConnection;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

fn evening(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 13, hour, minute, 0)
        .single()
        .unwrap_or_default()
}

/// Starter 18:00, main 19:30, dessert 21:00, afterparty 23:00 at "Club Vogue".
#[must_use]
pub fn test_timeline() -> EventTimeline {
    EventTimeline {
        starter_at: evening(18, 0),
        main_at: evening(19, 30),
        dessert_at: evening(21, 0),
        afterparty: Some((evening(23, 0), "Club Vogue, Hafenweg 1".to_string())),
    }
}

/// Creates a test event with the default timeline and no timing overrides.
pub async fn create_test_event(db: &DatabaseConnection) -> Result<entities::event::Model> {
    create_event(db, "Summer Dinner Hop", test_timeline(), None).await
}

/// Registration data with sensible defaults.
///
/// # Defaults
/// * `person_count`: 2
/// * `address`: "<name> Street 1"
/// * no coordinates, fun facts or ages
#[must_use]
pub fn test_new_couple(name: &str) -> NewCouple {
    NewCouple {
        name: name.to_string(),
        person_count: 2,
        address: format!("{name} Street 1"),
        ..NewCouple::default()
    }
}

/// Registers a test couple with the defaults of [`test_new_couple`].
pub async fn create_test_couple(
    db: &DatabaseConnection,
    event_id: i64,
    name: &str,
) -> Result<entities::couple::Model> {
    register_couple(db, event_id, &test_new_couple(name)).await
}

/// A seeded event: seven couples, the first six hosting.
pub struct SeededEvent {
    pub event: entities::event::Model,
    /// `couples[0..2]` host the starter, `[2..4]` the main, `[4..6]` the dessert;
    /// `couples[6]` only ever visits
    pub couples: Vec<entities::couple::Model>,
}

/// Seeds an event with seven couples. Each of the first six hosts one meal for up
/// to three guest couples, so every meal has five guests and six seats.
pub async fn seed_event(db: &DatabaseConnection) -> Result<SeededEvent> {
    let event = create_test_event(db).await?;
    let names = ["Anna & Ben", "Cleo & Dan", "Eva & Finn", "Gina & Hugo", "Ida & Jan", "Kim & Lou", "Mia & Noah"];

    let mut couples = Vec::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        let mut new = test_new_couple(name);
        new.fun_facts = vec![format!("{name} met at a salsa class")];
        new.ages = vec![30 + i32::try_from(index).unwrap_or(0), 31];
        couples.push(register_couple(db, event.id, &new).await?);
    }
    for (couple, course) in couples.iter().zip(
        Course::MEALS
            .iter()
            .flat_map(|course| [*course, *course]),
    ) {
        set_host(db, couple.id, course, 3).await?;
    }
    Ok(SeededEvent { event, couples })
}

/// A seeded event with its first plan already active.
pub struct ActiveScenario {
    pub event: entities::event::Model,
    pub couples: Vec<entities::couple::Model>,
    pub plan: entities::match_plan::Model,
    pub pairings: Vec<entities::course_pairing::Model>,
    pub envelopes: Vec<entities::envelope::Model>,
}

impl ActiveScenario {
    /// First host of a meal.
    #[must_use]
    pub fn host_of(&self, course: Course) -> i64 {
        let index = course.meal_index().unwrap_or(0) * 2;
        self.couples[index].id
    }

    /// The couple that hosts nothing.
    #[must_use]
    pub fn guest_only(&self) -> i64 {
        self.couples[6].id
    }
}

/// Seeds an event (see [`seed_event`]) and runs the first rematch on it.
pub async fn seed_active_plan(db: &DatabaseConnection) -> Result<ActiveScenario> {
    let SeededEvent { event, couples } = seed_event(db).await?;
    let outcome = run_rematch(db, &AppConfig::default(), event.id, &NoTravelData, Utc::now()).await?;
    Ok(ActiveScenario {
        event,
        couples,
        plan: outcome.plan,
        pairings: outcome.pairings,
        envelopes: outcome.envelopes,
    })
}
