//! Match plan operations - versioning, activation and the frozen-course set.
//!
//! Each rematch writes a new plan at `previous version + 1`. Flipping the new plan
//! to `active` supersedes the old one; superseded plans are never deleted.

use crate::{
    core::matcher::{MatchStats, PairingDraft},
    entities::{
        Course, CoursePairing, Envelope, MatchPlan, PlanStatus, course_pairing, envelope,
        match_plan,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*};
use std::collections::BTreeSet;
use tracing::info;

/// Loads a plan or fails with `NotFound`.
pub async fn get_plan<C>(db: &C, plan_id: i64) -> Result<match_plan::Model>
where
    C: ConnectionTrait,
{
    MatchPlan::find_by_id(plan_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "MatchPlan",
            id: plan_id,
        })
}

/// The plan guests currently follow, if any.
pub async fn get_active_plan<C>(db: &C, event_id: i64) -> Result<Option<match_plan::Model>>
where
    C: ConnectionTrait,
{
    MatchPlan::find()
        .filter(match_plan::Column::EventId.eq(event_id))
        .filter(match_plan::Column::Status.eq(PlanStatus::Active))
        .order_by_desc(match_plan::Column::Version)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Audit trail: every plan of the event, oldest first.
pub async fn list_plans<C>(db: &C, event_id: i64) -> Result<Vec<match_plan::Model>>
where
    C: ConnectionTrait,
{
    MatchPlan::find()
        .filter(match_plan::Column::EventId.eq(event_id))
        .order_by_asc(match_plan::Column::Version)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Version the next plan of this event gets.
pub async fn next_version<C>(db: &C, event_id: i64) -> Result<i32>
where
    C: ConnectionTrait,
{
    let latest = MatchPlan::find()
        .filter(match_plan::Column::EventId.eq(event_id))
        .order_by_desc(match_plan::Column::Version)
        .limit(1)
        .one(db)
        .await?;
    Ok(latest.map_or(1, |plan| plan.version + 1))
}

/// Creates an empty draft plan at the next version.
pub async fn create_draft_plan<C>(
    db: &C,
    event_id: i64,
    now: DateTime<Utc>,
) -> Result<match_plan::Model>
where
    C: ConnectionTrait,
{
    let version = next_version(db, event_id).await?;
    let plan = match_plan::ActiveModel {
        event_id: Set(event_id),
        version: Set(version),
        status: Set(PlanStatus::Draft),
        frozen_courses: Set("[]".to_string()),
        stats: Set(None),
        created_at: Set(now),
        superseded_at: Set(None),
        ..Default::default()
    };
    plan.insert(db).await.map_err(Into::into)
}

/// Pairings of a plan in serving order, then by host and guest.
pub async fn get_plan_pairings<C>(db: &C, plan_id: i64) -> Result<Vec<course_pairing::Model>>
where
    C: ConnectionTrait,
{
    let mut pairings = CoursePairing::find()
        .filter(course_pairing::Column::PlanId.eq(plan_id))
        .all(db)
        .await?;
    // course is stored as text, so order by serving order here
    pairings.sort_by_key(|p| (p.course, p.host_couple_id, p.guest_couple_id));
    Ok(pairings)
}

/// Writes matcher output into a plan.
pub async fn insert_pairings<C>(
    db: &C,
    plan_id: i64,
    pairings: &[PairingDraft],
    now: DateTime<Utc>,
) -> Result<Vec<course_pairing::Model>>
where
    C: ConnectionTrait,
{
    let mut saved = Vec::with_capacity(pairings.len());
    for pairing in pairings {
        let model = course_pairing::ActiveModel {
            plan_id: Set(plan_id),
            course: Set(pairing.course),
            host_couple_id: Set(pairing.host_couple_id),
            guest_couple_id: Set(pairing.guest_couple_id),
            created_at: Set(now),
            ..Default::default()
        };
        saved.push(model.insert(db).await?);
    }
    Ok(saved)
}

/// Pairings of a plan in matcher form.
#[must_use]
pub fn as_drafts(pairings: &[course_pairing::Model]) -> Vec<PairingDraft> {
    pairings
        .iter()
        .map(|p| PairingDraft {
            course: p.course,
            host_couple_id: p.host_couple_id,
            guest_couple_id: p.guest_couple_id,
        })
        .collect()
}

/// Envelopes of a plan, cancelled ones included.
pub async fn get_plan_envelopes<C>(db: &C, plan_id: i64) -> Result<Vec<envelope::Model>>
where
    C: ConnectionTrait,
{
    let mut envelopes = Envelope::find()
        .filter(envelope::Column::PlanId.eq(plan_id))
        .all(db)
        .await?;
    envelopes.sort_by_key(|e| (e.course, e.couple_id, e.id));
    Ok(envelopes)
}

/// Courses whose reveals have begun: the plan's stored list plus every course
/// that has at least one activated envelope (cancelled ones count too).
pub async fn frozen_courses<C>(db: &C, plan: &match_plan::Model) -> Result<BTreeSet<Course>>
where
    C: ConnectionTrait,
{
    let mut frozen = plan.frozen()?;
    let activated = Envelope::find()
        .filter(envelope::Column::PlanId.eq(plan.id))
        .filter(envelope::Column::ActivatedAt.is_not_null())
        .all(db)
        .await?;
    frozen.extend(activated.into_iter().map(|e| e.course));
    Ok(frozen)
}

/// Adds courses to a plan's stored frozen list.
pub async fn record_frozen_courses<C>(
    db: &C,
    plan: match_plan::Model,
    courses: &BTreeSet<Course>,
) -> Result<match_plan::Model>
where
    C: ConnectionTrait,
{
    let mut frozen = plan.frozen()?;
    if courses.is_subset(&frozen) {
        return Ok(plan);
    }
    frozen.extend(courses.iter().copied());
    let mut active: match_plan::ActiveModel = plan.into();
    active.frozen_courses = Set(serde_json::to_string(&frozen)?);
    active.update(db).await.map_err(Into::into)
}

/// Parsed statistics of a plan.
pub fn plan_stats(plan: &match_plan::Model) -> Result<Option<MatchStats>> {
    plan.stats
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(Into::into)
}

/// Makes a draft plan the active one and supersedes whatever was active before.
pub async fn activate_plan<C>(
    db: &C,
    plan: match_plan::Model,
    frozen: &BTreeSet<Course>,
    stats: &MatchStats,
    now: DateTime<Utc>,
) -> Result<(match_plan::Model, Option<match_plan::Model>)>
where
    C: ConnectionTrait,
{
    if plan.status != PlanStatus::Draft {
        return Err(Error::invalid_state(format!(
            "Plan {} is {:?}, only drafts can be activated",
            plan.id, plan.status
        )));
    }

    let previous = match get_active_plan(db, plan.event_id).await? {
        Some(old) => {
            let mut active: match_plan::ActiveModel = old.into();
            active.status = Set(PlanStatus::Superseded);
            active.superseded_at = Set(Some(now));
            Some(active.update(db).await?)
        }
        None => None,
    };

    let event_id = plan.event_id;
    let mut active: match_plan::ActiveModel = plan.into();
    active.status = Set(PlanStatus::Active);
    active.frozen_courses = Set(serde_json::to_string(frozen)?);
    active.stats = Set(Some(serde_json::to_string(stats)?));
    let activated = active.update(db).await?;

    info!(
        "Plan v{} is now active for event {event_id}{}",
        activated.version,
        previous
            .as_ref()
            .map(|p| format!(", superseding v{}", p.version))
            .unwrap_or_default()
    );
    Ok((activated, previous))
}

/// Formats a plan into a human-readable summary for organisers.
#[must_use]
pub fn format_plan_summary(
    plan: &match_plan::Model,
    pairings: &[course_pairing::Model],
    stats: Option<&MatchStats>,
) -> String {
    use std::fmt::Write;

    let mut summary = format!(
        "Plan v{} ({:?}) - {} pairings\n",
        plan.version,
        plan.status,
        pairings.len()
    );
    if let Ok(frozen) = plan.frozen() {
        if !frozen.is_empty() {
            let names: Vec<&str> = frozen.iter().map(|c| c.as_str()).collect();
            // write! is infallible when writing to String
            let _ = writeln!(summary, "  Frozen: {}", names.join(", "));
        }
    }

    for course in Course::MEALS {
        let course_pairings: Vec<_> = pairings.iter().filter(|p| p.course == course).collect();
        let _ = write!(summary, "  {course}: {} pairings", course_pairings.len());
        if let Some(course_stats) = stats.and_then(|s| s.courses.get(&course)) {
            let _ = write!(
                summary,
                " | {}/{} seats ({:.0}%) | {} unplaced",
                course_stats.guests_placed,
                course_stats.capacity,
                course_stats.utilization() * 100.0,
                course_stats.unplaced
            );
        }
        summary.push('\n');
    }

    if let Some(stats) = stats {
        let _ = writeln!(
            summary,
            "  Repeats accepted: {} | Unplaced total: {}",
            stats.repeat_pairs, stats.total_unplaced
        );
    }
    summary
}
