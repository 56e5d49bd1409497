//! Assignment operations - who hosts which course, and for how many guests.

use crate::{
    core::{couple::get_couple, matcher::HostSlot},
    entities::{Assignment, Course, assignment},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::info;

async fn find_assignment<C>(db: &C, couple_id: i64, course: Course) -> Result<Option<assignment::Model>>
where
    C: ConnectionTrait,
{
    Assignment::find()
        .filter(assignment::Column::CoupleId.eq(couple_id))
        .filter(assignment::Column::Course.eq(course))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Makes a couple host a meal for up to `max_guests` guest couples. Updates an
/// existing assignment for the same course instead of duplicating it.
pub async fn set_host<C>(
    db: &C,
    couple_id: i64,
    course: Course,
    max_guests: u32,
) -> Result<assignment::Model>
where
    C: ConnectionTrait,
{
    if !course.is_meal() {
        return Err(Error::InvalidInput {
            message: "Only the three meals can be hosted".to_string(),
        });
    }
    if max_guests == 0 {
        return Err(Error::InvalidInput {
            message: format!("Couple {couple_id} must accept at least one guest couple"),
        });
    }
    let couple = get_couple(db, couple_id).await?;
    if !couple.is_matchable() {
        return Err(Error::invalid_state_for(
            format!("Couple {couple_id} is cancelled or a reserve and cannot host"),
            Some(course),
            couple_id,
        ));
    }
    let max_guests = i32::try_from(max_guests).map_err(|_| Error::InvalidInput {
        message: format!("Capacity {max_guests} is out of range"),
    })?;

    let saved = match find_assignment(db, couple_id, course).await? {
        Some(existing) => {
            let mut active: assignment::ActiveModel = existing.into();
            active.is_host = Set(true);
            active.max_guests = Set(max_guests);
            active.update(db).await?
        }
        None => {
            assignment::ActiveModel {
                event_id: Set(couple.event_id),
                couple_id: Set(couple_id),
                course: Set(course),
                is_host: Set(true),
                max_guests: Set(max_guests),
                ..Default::default()
            }
            .insert(db)
            .await?
        }
    };
    info!("Couple {couple_id} hosts {course} for up to {max_guests} guest couples");
    Ok(saved)
}

/// Withdraws a hosting assignment. Returns whether the couple was hosting.
pub async fn clear_host<C>(db: &C, couple_id: i64, course: Course) -> Result<bool>
where
    C: ConnectionTrait,
{
    match find_assignment(db, couple_id, course).await? {
        Some(existing) if existing.is_host => {
            let mut active: assignment::ActiveModel = existing.into();
            active.is_host = Set(false);
            active.max_guests = Set(0);
            active.update(db).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Moves a hosting assignment to another couple, keeping its capacity.
pub async fn transfer_host_assignment<C>(
    db: &C,
    from_couple_id: i64,
    to_couple_id: i64,
    course: Course,
) -> Result<assignment::Model>
where
    C: ConnectionTrait,
{
    let existing = find_assignment(db, from_couple_id, course)
        .await?
        .filter(|a| a.is_host)
        .ok_or_else(|| {
            Error::invalid_state_for(
                format!("Couple {from_couple_id} does not host {course}"),
                Some(course),
                from_couple_id,
            )
        })?;
    let capacity = u32::try_from(existing.max_guests).unwrap_or(0).max(1);
    clear_host(db, from_couple_id, course).await?;
    set_host(db, to_couple_id, course, capacity).await
}

/// All assignments of an event.
pub async fn get_assignments<C>(db: &C, event_id: i64) -> Result<Vec<assignment::Model>>
where
    C: ConnectionTrait,
{
    Assignment::find()
        .filter(assignment::Column::EventId.eq(event_id))
        .order_by_asc(assignment::Column::CoupleId)
        .order_by_asc(assignment::Column::Course)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Hosting assignments in matcher form.
pub async fn get_host_slots<C>(db: &C, event_id: i64) -> Result<Vec<HostSlot>>
where
    C: ConnectionTrait,
{
    Ok(get_assignments(db, event_id)
        .await?
        .into_iter()
        .filter(|a| a.is_host)
        .map(|a| HostSlot {
            couple_id: a.couple_id,
            course: a.course,
            max_guests: u32::try_from(a.max_guests).unwrap_or(0),
        })
        .collect())
}

/// Meals the couple currently hosts.
pub async fn hosted_courses<C>(db: &C, couple_id: i64) -> Result<Vec<Course>>
where
    C: ConnectionTrait,
{
    let mut courses: Vec<Course> = Assignment::find()
        .filter(assignment::Column::CoupleId.eq(couple_id))
        .filter(assignment::Column::IsHost.eq(true))
        .all(db)
        .await?
        .into_iter()
        .map(|a| a.course)
        .collect();
    courses.sort();
    Ok(courses)
}
