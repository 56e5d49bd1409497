//! Envelope business logic - building, persisting and releasing reveal envelopes.
//!
//! Every guest gets one envelope per meal pointing at the host's door, plus one for
//! the afterparty. Once an envelope has been activated it is frozen: only its
//! cancellation marker may still change (the manual course activation may pull
//! its remaining reveals earlier, never later).

use crate::{
    core::{
        clues::{HostProfile, allocate_clues},
        matcher::PairingDraft,
        timing::{EventTiming, RevealSchedule, compute_envelope_times},
        travel::{Coordinates, TravelTimes},
    },
    entities::{Course, Envelope, EnvelopeState, couple, envelope, event},
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{Set, prelude::*, sea_query::Expr};
use std::collections::HashMap;
use tracing::{debug, info};

/// An envelope that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeDraft {
    /// Couple receiving the envelope
    pub couple_id: i64,
    /// Course it leads to
    pub course: Course,
    /// Host visited, `None` for the afterparty
    pub host_couple_id: Option<i64>,
    /// Address revealed at the end
    pub destination: String,
    /// Free-form notes for the guest
    pub notes: Option<String>,
    /// First clue text
    pub clue_1: Option<String>,
    /// Second clue text
    pub clue_2: Option<String>,
    /// When the course starts
    pub course_at: DateTime<Utc>,
    /// Reveal times
    pub schedule: RevealSchedule,
}

/// How many envelopes a delay touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayReport {
    /// Scheduled envelopes that moved
    pub shifted: usize,
    /// Already activated, left exactly as they were
    pub skipped_frozen: usize,
}

fn coordinates_of(couple: &couple::Model) -> Option<Coordinates> {
    couple.coordinates().map(Coordinates::from)
}

/// Where a guest sets off from for `course`: the previous meal's host, or home.
fn origin_for(
    guest: &couple::Model,
    course: Course,
    visits: &HashMap<(i64, Course), i64>,
    couples: &HashMap<i64, &couple::Model>,
) -> Option<Coordinates> {
    let previous = course
        .meal_index()
        .and_then(|index| index.checked_sub(1))
        .map(|index| Course::MEALS[index]);
    previous
        .and_then(|prev| visits.get(&(guest.id, prev)))
        .and_then(|host_id| couples.get(host_id))
        .map_or_else(|| coordinates_of(guest), |host| coordinates_of(host))
}

/// Builds one guest envelope per pairing: destination, clues and reveal times.
///
/// Travel times are looked up from where the guest was for the previous meal;
/// when they are unknown the event's plain offsets apply.
pub fn build_guest_envelopes(
    event: &event::Model,
    timing: &EventTiming,
    couples: &[couple::Model],
    pairings: &[PairingDraft],
    travel: &dyn TravelTimes,
) -> Result<Vec<EnvelopeDraft>> {
    let by_id: HashMap<i64, &couple::Model> = couples.iter().map(|c| (c.id, c)).collect();
    let visits: HashMap<(i64, Course), i64> = pairings
        .iter()
        .map(|p| ((p.guest_couple_id, p.course), p.host_couple_id))
        .collect();
    let lookup = |id: i64| {
        by_id.get(&id).copied().ok_or(Error::NotFound {
            entity: "Couple",
            id,
        })
    };

    let mut drafts = Vec::with_capacity(pairings.len());
    for pairing in pairings {
        let host = lookup(pairing.host_couple_id)?;
        let guest = lookup(pairing.guest_couple_id)?;
        let course_at = event.course_start(pairing.course).ok_or_else(|| Error::InvalidInput {
            message: format!("Event {} has no {} scheduled", event.id, pairing.course),
        })?;

        let travel_minutes = origin_for(guest, pairing.course, &visits, &by_id)
            .zip(coordinates_of(host))
            .and_then(|(from, to)| travel.travel_minutes(from, to));

        let facts = host.facts()?;
        let profile = HostProfile {
            facts,
            ages: host.ages(),
            initials: host.initials(),
            travel_minutes,
        };
        let mut clues = allocate_clues(&profile)
            .remove(&pairing.course)
            .unwrap_or_default()
            .into_iter()
            .map(|clue| clue.render(&profile.facts));

        drafts.push(EnvelopeDraft {
            couple_id: guest.id,
            course: pairing.course,
            host_couple_id: Some(host.id),
            destination: host.address.clone(),
            notes: None,
            clue_1: clues.next(),
            clue_2: clues.next(),
            course_at,
            schedule: compute_envelope_times(course_at, timing, pairing.course, travel_minutes),
        });
    }
    debug!("Built {} guest envelopes for event {}", drafts.len(), event.id);
    Ok(drafts)
}

/// Afterparty envelopes for every matchable couple. Empty if the event has no afterparty.
#[must_use]
pub fn build_afterparty_envelopes(
    event: &event::Model,
    timing: &EventTiming,
    couples: &[couple::Model],
) -> Vec<EnvelopeDraft> {
    let (Some(course_at), Some(location)) = (event.afterparty_at, event.afterparty_location.as_ref())
    else {
        return Vec::new();
    };
    let schedule = compute_envelope_times(course_at, timing, Course::Afterparty, None);
    couples
        .iter()
        .filter(|c| c.is_matchable())
        .map(|c| EnvelopeDraft {
            couple_id: c.id,
            course: Course::Afterparty,
            host_couple_id: None,
            destination: location.clone(),
            notes: None,
            clue_1: None,
            clue_2: None,
            course_at,
            schedule,
        })
        .collect()
}

/// Writes drafts into a plan.
pub async fn insert_envelopes<C>(
    db: &C,
    plan_id: i64,
    drafts: Vec<EnvelopeDraft>,
) -> Result<Vec<envelope::Model>>
where
    C: ConnectionTrait,
{
    let mut saved = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let schedule = draft.schedule;
        let model = envelope::ActiveModel {
            plan_id: Set(plan_id),
            couple_id: Set(draft.couple_id),
            course: Set(draft.course),
            host_couple_id: Set(draft.host_couple_id),
            destination: Set(draft.destination),
            notes: Set(draft.notes),
            clue_1: Set(draft.clue_1),
            clue_2: Set(draft.clue_2),
            course_at: Set(draft.course_at),
            teasing_at: Set(schedule.teasing_at),
            clue_1_at: Set(schedule.clue_1_at),
            clue_2_at: Set(schedule.clue_2_at),
            street_at: Set(schedule.street_at),
            number_at: Set(schedule.number_at),
            opened_at: Set(schedule.opened_at),
            activated_at: Set(None),
            cancelled_at: Set(None),
            ..Default::default()
        };
        saved.push(model.insert(db).await?);
    }
    Ok(saved)
}

/// Copies envelopes into another plan unchanged, activation and cancellation included.
pub async fn copy_envelopes<C>(
    db: &C,
    plan_id: i64,
    envelopes: &[envelope::Model],
) -> Result<Vec<envelope::Model>>
where
    C: ConnectionTrait,
{
    let mut copies = Vec::with_capacity(envelopes.len());
    for original in envelopes {
        let copy = envelope::ActiveModel {
            plan_id: Set(plan_id),
            couple_id: Set(original.couple_id),
            course: Set(original.course),
            host_couple_id: Set(original.host_couple_id),
            destination: Set(original.destination.clone()),
            notes: Set(original.notes.clone()),
            clue_1: Set(original.clue_1.clone()),
            clue_2: Set(original.clue_2.clone()),
            course_at: Set(original.course_at),
            teasing_at: Set(original.teasing_at),
            clue_1_at: Set(original.clue_1_at),
            clue_2_at: Set(original.clue_2_at),
            street_at: Set(original.street_at),
            number_at: Set(original.number_at),
            opened_at: Set(original.opened_at),
            activated_at: Set(original.activated_at),
            cancelled_at: Set(original.cancelled_at),
            ..Default::default()
        };
        copies.push(copy.insert(db).await?);
    }
    Ok(copies)
}

/// Loads an envelope or fails with `NotFound`.
pub async fn get_envelope<C>(db: &C, envelope_id: i64) -> Result<envelope::Model>
where
    C: ConnectionTrait,
{
    Envelope::find_by_id(envelope_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "Envelope",
            id: envelope_id,
        })
}

/// Refuses any edit of an envelope that is frozen or withdrawn.
pub fn ensure_editable(envelope: &envelope::Model) -> Result<()> {
    let message = match envelope.state() {
        EnvelopeState::Scheduled => return Ok(()),
        EnvelopeState::Activated { at } => {
            format!("Envelope {} was activated at {at} and is frozen", envelope.id)
        }
        EnvelopeState::Cancelled { at, .. } => {
            format!("Envelope {} was cancelled at {at}", envelope.id)
        }
    };
    Err(Error::invalid_state_for(
        message,
        Some(envelope.course),
        envelope.couple_id,
    ))
}

/// Replaces the reveal times and course time of a scheduled envelope.
pub async fn reschedule_envelope<C>(
    db: &C,
    envelope: envelope::Model,
    course_at: DateTime<Utc>,
    schedule: RevealSchedule,
) -> Result<envelope::Model>
where
    C: ConnectionTrait,
{
    ensure_editable(&envelope)?;
    if !schedule.is_monotonic() {
        return Err(Error::InvalidInput {
            message: format!("Reveal times for envelope {} are out of order", envelope.id),
        });
    }
    let mut active: envelope::ActiveModel = envelope.into();
    active.course_at = Set(course_at);
    active.teasing_at = Set(schedule.teasing_at);
    active.clue_1_at = Set(schedule.clue_1_at);
    active.clue_2_at = Set(schedule.clue_2_at);
    active.street_at = Set(schedule.street_at);
    active.number_at = Set(schedule.number_at);
    active.opened_at = Set(schedule.opened_at);
    active.update(db).await.map_err(Into::into)
}

/// Points a scheduled envelope at a different host.
pub async fn redirect_envelope<C>(
    db: &C,
    envelope: envelope::Model,
    host_couple_id: i64,
    destination: &str,
) -> Result<envelope::Model>
where
    C: ConnectionTrait,
{
    ensure_editable(&envelope)?;
    let mut active: envelope::ActiveModel = envelope.into();
    active.host_couple_id = Set(Some(host_couple_id));
    active.destination = Set(destination.to_string());
    active.update(db).await.map_err(Into::into)
}

/// Withdraws an envelope. Only `cancelled_at` changes, frozen or not. Idempotent.
pub async fn cancel_envelope<C>(
    db: &C,
    envelope: envelope::Model,
    now: DateTime<Utc>,
) -> Result<envelope::Model>
where
    C: ConnectionTrait,
{
    if envelope.cancelled_at.is_some() {
        return Ok(envelope);
    }
    let mut active: envelope::ActiveModel = envelope.into();
    active.cancelled_at = Set(Some(now));
    active.update(db).await.map_err(Into::into)
}

/// Marks every envelope whose teaser time has come as activated. Returns how many fired.
pub async fn fire_due_envelopes<C>(db: &C, plan_id: i64, now: DateTime<Utc>) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = Envelope::update_many()
        .col_expr(envelope::Column::ActivatedAt, Expr::value(Some(now)))
        .filter(envelope::Column::PlanId.eq(plan_id))
        .filter(envelope::Column::ActivatedAt.is_null())
        .filter(envelope::Column::CancelledAt.is_null())
        .filter(envelope::Column::TeasingAt.lte(now))
        .exec(db)
        .await?;
    if result.rows_affected > 0 {
        info!("Activated {} envelopes of plan {plan_id}", result.rows_affected);
    }
    Ok(result.rows_affected)
}

/// Pushes every still-scheduled envelope of a plan (optionally one course only)
/// back by `delay`. Activated envelopes are counted and left untouched.
pub async fn delay_envelopes<C>(
    db: &C,
    plan_id: i64,
    delay: Duration,
    course: Option<Course>,
) -> Result<DelayReport>
where
    C: ConnectionTrait,
{
    let mut query = Envelope::find()
        .filter(envelope::Column::PlanId.eq(plan_id))
        .filter(envelope::Column::CancelledAt.is_null());
    if let Some(course) = course {
        query = query.filter(envelope::Column::Course.eq(course));
    }

    let mut report = DelayReport::default();
    for envelope in query.all(db).await? {
        if envelope.is_frozen() {
            report.skipped_frozen += 1;
            continue;
        }
        let course_at = envelope.course_at + delay;
        let schedule = envelope.schedule().shifted(delay);
        reschedule_envelope(db, envelope, course_at, schedule).await?;
        report.shifted += 1;
    }
    info!(
        "Delayed {} envelopes of plan {plan_id} by {} minutes ({} frozen left alone)",
        report.shifted,
        delay.num_minutes(),
        report.skipped_frozen
    );
    Ok(report)
}

/// Manual "activate course": pulls the remaining reveals of every live envelope of
/// `course` forward so they fire `step` apart from `now`, and activates them.
pub async fn activate_course<C>(
    db: &C,
    plan_id: i64,
    course: Course,
    now: DateTime<Utc>,
    step: Duration,
) -> Result<usize>
where
    C: ConnectionTrait,
{
    let envelopes = Envelope::find()
        .filter(envelope::Column::PlanId.eq(plan_id))
        .filter(envelope::Column::Course.eq(course))
        .filter(envelope::Column::CancelledAt.is_null())
        .all(db)
        .await?;

    let count = envelopes.len();
    for envelope in envelopes {
        let schedule = envelope.schedule().forced_open(now, step);
        let activated_at = envelope.activated_at.unwrap_or(now);
        let mut active: envelope::ActiveModel = envelope.into();
        active.teasing_at = Set(schedule.teasing_at);
        active.clue_1_at = Set(schedule.clue_1_at);
        active.clue_2_at = Set(schedule.clue_2_at);
        active.street_at = Set(schedule.street_at);
        active.number_at = Set(schedule.number_at);
        active.opened_at = Set(schedule.opened_at);
        active.activated_at = Set(Some(activated_at));
        active.update(db).await?;
    }
    info!("Force-activated {count} {course} envelopes of plan {plan_id}");
    Ok(count)
}
