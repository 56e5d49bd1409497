//! Event operations - creating an evening and reading its timeline.

use crate::{
    core::timing::TimingOverrides,
    entities::{Course, Event, event},
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{Set, prelude::*};
use tracing::info;

/// Course start times for a new event.
#[derive(Debug, Clone)]
pub struct EventTimeline {
    /// Starter begins
    pub starter_at: DateTime<Utc>,
    /// Main course begins
    pub main_at: DateTime<Utc>,
    /// Dessert begins
    pub dessert_at: DateTime<Utc>,
    /// Afterparty start and location, if there is one
    pub afterparty: Option<(DateTime<Utc>, String)>,
}

/// Creates an event, validating that the courses are in serving order and the
/// timing overrides are well-formed.
pub async fn create_event<C>(
    db: &C,
    name: &str,
    timeline: EventTimeline,
    overrides: Option<&TimingOverrides>,
) -> Result<event::Model>
where
    C: ConnectionTrait,
{
    if name.trim().is_empty() {
        return Err(Error::InvalidInput {
            message: "Event name cannot be empty".to_string(),
        });
    }
    if !(timeline.starter_at < timeline.main_at && timeline.main_at < timeline.dessert_at) {
        return Err(Error::InvalidInput {
            message: "Courses must be scheduled starter < main < dessert".to_string(),
        });
    }
    if let Some((afterparty_at, _)) = &timeline.afterparty {
        if *afterparty_at <= timeline.dessert_at {
            return Err(Error::InvalidInput {
                message: "Afterparty must start after dessert".to_string(),
            });
        }
    }

    let (afterparty_at, afterparty_location) = timeline.afterparty.unzip();
    let event = event::ActiveModel {
        name: Set(name.trim().to_string()),
        starter_at: Set(timeline.starter_at),
        main_at: Set(timeline.main_at),
        dessert_at: Set(timeline.dessert_at),
        afterparty_at: Set(afterparty_at),
        afterparty_location: Set(afterparty_location),
        timing_overrides: Set(overrides.map(serde_json::to_string).transpose()?),
        rematch_locked_until: Set(None),
        ..Default::default()
    };

    let event = event.insert(db).await?;
    info!("Created event {} ({})", event.id, event.name);
    Ok(event)
}

/// Loads an event or fails with `NotFound`.
pub async fn get_event<C>(db: &C, event_id: i64) -> Result<event::Model>
where
    C: ConnectionTrait,
{
    Event::find_by_id(event_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "Event",
            id: event_id,
        })
}

/// Replaces the event's timing overrides.
pub async fn set_timing_overrides<C>(
    db: &C,
    event_id: i64,
    overrides: &TimingOverrides,
) -> Result<event::Model>
where
    C: ConnectionTrait,
{
    let event = get_event(db, event_id).await?;
    let mut active: event::ActiveModel = event.into();
    active.timing_overrides = Set(Some(serde_json::to_string(overrides)?));
    active.update(db).await.map_err(Into::into)
}

/// Moves the start of the given courses by `delta`, keeping serving order intact.
pub async fn shift_course_times<C>(
    db: &C,
    event_id: i64,
    courses: &[Course],
    delta: Duration,
) -> Result<event::Model>
where
    C: ConnectionTrait,
{
    let event = get_event(db, event_id).await?;
    let shift = |course: Course, at: DateTime<Utc>| {
        if courses.contains(&course) { at + delta } else { at }
    };
    let starter_at = shift(Course::Starter, event.starter_at);
    let main_at = shift(Course::Main, event.main_at);
    let dessert_at = shift(Course::Dessert, event.dessert_at);
    let afterparty_at = event.afterparty_at.map(|at| shift(Course::Afterparty, at));

    let ordered = starter_at < main_at
        && main_at < dessert_at
        && afterparty_at.is_none_or(|at| dessert_at < at);
    if !ordered {
        return Err(Error::InvalidInput {
            message: format!(
                "Shifting {courses:?} by {} minutes would break the serving order",
                delta.num_minutes()
            ),
        });
    }

    let mut active: event::ActiveModel = event.into();
    active.starter_at = Set(starter_at);
    active.main_at = Set(main_at);
    active.dessert_at = Set(dessert_at);
    active.afterparty_at = Set(afterparty_at);
    active.update(db).await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_create_and_get_event() -> Result<()> {
        let db = setup_test_db().await?;
        let event = create_test_event(&db).await?;
        let loaded = get_event(&db, event.id).await?;
        assert_eq!(loaded, event);
        assert_eq!(loaded.course_start(Course::Main), Some(loaded.main_at));
        assert!(loaded.rematch_locked_until.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_create_event_rejects_unordered_courses() -> Result<()> {
        let db = setup_test_db().await?;
        let mut timeline = test_timeline();
        timeline.main_at = timeline.dessert_at;
        let result = create_event(&db, "Broken", timeline, None).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));

        let result = create_event(&db, "  ", test_timeline(), None).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_event() -> Result<()> {
        let db = setup_test_db().await?;
        let result = get_event(&db, 42).await;
        assert!(matches!(
            result,
            Err(Error::NotFound {
                entity: "Event",
                id: 42
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_timing_overrides_are_stored_as_json() -> Result<()> {
        let db = setup_test_db().await?;
        let event = create_test_event(&db).await?;
        let mut overrides = TimingOverrides::default();
        overrides.travel_adjustment = Some(true);
        let updated = set_timing_overrides(&db, event.id, &overrides).await?;
        let parsed = TimingOverrides::parse(updated.timing_overrides.as_deref())?;
        assert_eq!(parsed, overrides);
        Ok(())
    }

    #[tokio::test]
    async fn test_shift_course_times_keeps_order() -> Result<()> {
        let db = setup_test_db().await?;
        let event = create_test_event(&db).await?;

        let shifted =
            shift_course_times(&db, event.id, &[Course::Dessert], Duration::minutes(20)).await?;
        assert_eq!(shifted.dessert_at, event.dessert_at + Duration::minutes(20));
        assert_eq!(shifted.main_at, event.main_at);

        let result =
            shift_course_times(&db, event.id, &[Course::Main], Duration::hours(2)).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
        Ok(())
    }
}
