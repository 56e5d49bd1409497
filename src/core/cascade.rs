//! Cascade resolver - keeps the active plan consistent after one couple changes.
//!
//! A cascade only ever removes or copies rows of the active plan; it never computes
//! new placements. Displaced guests are reported so a rematch can place them.
//! All writes of one cascade run in a single transaction: either every step lands
//! or none does, and the report lists the step that failed.

use crate::{
    core::{
        assignment::{clear_host, get_host_slots, hosted_courses, transfer_host_assignment},
        couple::get_couple,
        envelope::{cancel_envelope, redirect_envelope},
        plan::get_plan,
    },
    entities::{
        Course, CoursePairing, Envelope, EnvelopeState, PlanStatus, course_pairing, couple,
        envelope,
    },
    errors::{Error, Result, StepContext},
};
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, PaginatorTrait, Set, TransactionTrait, prelude::*};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// What happened to the couple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeEvent {
    /// The couple no longer attends as a guest
    GuestDropout,
    /// The couple stops hosting some or all of its meals
    HostResign {
        /// Meals to give up, `None` for every meal it hosts
        courses: Option<Vec<Course>>,
    },
    /// The couple split into two entries
    Split {
        /// Solo entry created for the partner
        new_couple_id: i64,
    },
}

/// A step of the cascade that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeStepError {
    /// Step that failed
    pub step: &'static str,
    /// Store error text
    pub message: String,
}

/// Outcome of one cascade. Empty apart from `errors` when the run was rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Plan the cascade ran against
    pub plan_id: i64,
    /// Couple the change was about
    pub couple_id: i64,
    /// Every pairing deleted from the plan, as it was before deletion
    pub pairings_removed: Vec<course_pairing::Model>,
    /// Pairings copied for a split-off entry
    pub pairings_added: usize,
    /// Envelopes withdrawn
    pub envelopes_cancelled: usize,
    /// Envelopes copied for a split-off entry
    pub envelopes_created: usize,
    /// Meals the couple no longer hosts
    pub courses_resigned: Vec<Course>,
    /// (couple, course) combinations that now need a new placement
    pub unplaced: Vec<(i64, Course)>,
    /// Activated envelopes that were cancelled (their contents stay untouched)
    pub frozen_cancelled: Vec<i64>,
    /// Tables left empty or over their limit
    pub capacity_warnings: Vec<String>,
    /// Failed step; non-empty means nothing was written
    pub errors: Vec<CascadeStepError>,
}

impl CascadeReport {
    /// True when the cascade was committed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    fn failed(plan_id: i64, couple_id: i64, step: &'static str, message: String) -> Self {
        Self {
            plan_id,
            couple_id,
            errors: vec![CascadeStepError { step, message }],
            ..Self::default()
        }
    }
}

/// Result of handing a hosted meal over to another couple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Pairings now pointing at the new host
    pub pairings_moved: usize,
    /// Envelopes now leading to the new host's address
    pub envelopes_redirected: usize,
    /// (couple, course) left without a placement: the old host no longer cooks that meal
    pub unplaced: Vec<(i64, Course)>,
    /// Guest placements of the new host in that meal that were dropped (it now stays home)
    pub own_visits_cancelled: usize,
}

/// Loads the plan and checks that cascades may run against it.
async fn active_plan_for<C>(db: &C, event_id: i64, plan_id: i64) -> Result<crate::entities::match_plan::Model>
where
    C: ConnectionTrait,
{
    let plan = get_plan(db, plan_id).await?;
    if plan.event_id != event_id {
        return Err(Error::InvalidInput {
            message: format!("Plan {plan_id} does not belong to event {event_id}"),
        });
    }
    if plan.status != PlanStatus::Active {
        return Err(Error::invalid_state(format!(
            "Plan {plan_id} is {:?}; cascades only run against the active plan",
            plan.status
        )));
    }
    Ok(plan)
}

async fn event_couple<C>(db: &C, event_id: i64, couple_id: i64) -> Result<couple::Model>
where
    C: ConnectionTrait,
{
    let couple = get_couple(db, couple_id).await?;
    if couple.event_id != event_id {
        return Err(Error::InvalidInput {
            message: format!("Couple {couple_id} is not registered for event {event_id}"),
        });
    }
    Ok(couple)
}

/// Validated, ready-to-apply cascade.
enum Validated {
    Guest,
    Resign(Vec<Course>),
    Split(i64),
}

async fn validate<C>(db: &C, event_id: i64, couple_id: i64, cascade: &CascadeEvent) -> Result<Validated>
where
    C: ConnectionTrait,
{
    event_couple(db, event_id, couple_id).await?;
    match cascade {
        CascadeEvent::GuestDropout => Ok(Validated::Guest),
        CascadeEvent::HostResign { courses } => {
            let hosted = hosted_courses(db, couple_id).await?;
            let requested: Vec<Course> = match courses {
                Some(courses) => courses.iter().copied().collect::<BTreeSet<_>>().into_iter().collect(),
                None => hosted.clone(),
            };
            if let Some(course) = requested.iter().find(|c| !hosted.contains(c)) {
                return Err(Error::invalid_state_for(
                    format!("Couple {couple_id} does not host {course}"),
                    Some(*course),
                    couple_id,
                ));
            }
            if requested.is_empty() {
                return Err(Error::invalid_state_for(
                    format!("Couple {couple_id} does not host any course"),
                    None,
                    couple_id,
                ));
            }
            Ok(Validated::Resign(requested))
        }
        CascadeEvent::Split { new_couple_id } => {
            let solo = event_couple(db, event_id, *new_couple_id).await?;
            if solo.split_from != Some(couple_id) {
                return Err(Error::invalid_state_for(
                    format!("Couple {new_couple_id} was not split off couple {couple_id}"),
                    None,
                    *new_couple_id,
                ));
            }
            Ok(Validated::Split(*new_couple_id))
        }
    }
}

/// Applies a cascade to the active plan.
///
/// Problems with the request itself (unknown couple, superseded plan, couple not
/// hosting) come back as `Err` before anything is written. A failed write rolls
/// the whole cascade back and is reported in `CascadeReport::errors`.
pub async fn resolve_cascade(
    db: &DatabaseConnection,
    event_id: i64,
    plan_id: i64,
    couple_id: i64,
    cascade: &CascadeEvent,
    now: DateTime<Utc>,
) -> Result<CascadeReport> {
    active_plan_for(db, event_id, plan_id).await?;
    let validated = validate(db, event_id, couple_id, cascade).await?;

    let txn = db.begin().await?;
    let mut report = CascadeReport {
        plan_id,
        couple_id,
        ..CascadeReport::default()
    };
    let applied = match validated {
        Validated::Guest => apply_guest_dropout(&txn, event_id, &mut report, now).await,
        Validated::Resign(courses) => apply_host_resign(&txn, event_id, courses, &mut report, now).await,
        Validated::Split(new_couple_id) => {
            apply_split(&txn, event_id, new_couple_id, &mut report).await
        }
    };

    match applied {
        Ok(()) => {
            if let Err(source) = txn.commit().await {
                warn!("Cascade for couple {couple_id} could not be committed: {source}");
                return Ok(CascadeReport::failed(plan_id, couple_id, "commit", source.to_string()));
            }
        }
        Err(Error::Persistence { step, source }) => {
            warn!("Cascade for couple {couple_id} failed during {step}: {source}");
            if let Err(rollback) = txn.rollback().await {
                warn!("Rolling back cascade for couple {couple_id} failed: {rollback}");
            }
            return Ok(CascadeReport::failed(plan_id, couple_id, step, source.to_string()));
        }
        Err(other) => return Err(other),
    }

    for warning in &report.capacity_warnings {
        warn!("{warning}");
    }
    info!(
        "Cascade {cascade:?} for couple {couple_id}: {} pairings removed, {} added, {} envelopes cancelled, {} unplaced",
        report.pairings_removed.len(),
        report.pairings_added,
        report.envelopes_cancelled,
        report.unplaced.len()
    );
    Ok(report)
}

async fn remove_pairings<C>(db: &C, pairings: &[course_pairing::Model]) -> Result<()>
where
    C: ConnectionTrait,
{
    if pairings.is_empty() {
        return Ok(());
    }
    CoursePairing::delete_many()
        .filter(course_pairing::Column::Id.is_in(pairings.iter().map(|p| p.id)))
        .exec(db)
        .await
        .step("remove pairings")?;
    Ok(())
}

async fn cancel_all<C>(
    db: &C,
    envelopes: Vec<envelope::Model>,
    report: &mut CascadeReport,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    for envelope in envelopes {
        let frozen =
            matches!(envelope.state(), EnvelopeState::Activated { .. }).then_some(envelope.id);
        cancel_envelope(db, envelope, now).await.step("cancel envelopes")?;
        report.envelopes_cancelled += 1;
        report.frozen_cancelled.extend(frozen);
    }
    Ok(())
}

fn live_envelopes(plan_id: i64) -> sea_orm::Select<Envelope> {
    Envelope::find()
        .filter(envelope::Column::PlanId.eq(plan_id))
        .filter(envelope::Column::CancelledAt.is_null())
}

async fn apply_guest_dropout<C>(
    db: &C,
    event_id: i64,
    report: &mut CascadeReport,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let (plan_id, couple_id) = (report.plan_id, report.couple_id);
    let visits = CoursePairing::find()
        .filter(course_pairing::Column::PlanId.eq(plan_id))
        .filter(course_pairing::Column::GuestCoupleId.eq(couple_id))
        .all(db)
        .await
        .step("load pairings")?;
    remove_pairings(db, &visits).await?;

    let envelopes = live_envelopes(plan_id)
        .filter(envelope::Column::CoupleId.eq(couple_id))
        .all(db)
        .await
        .step("load envelopes")?;
    cancel_all(db, envelopes, report, now).await?;

    // hosts that now cook for nobody
    for visit in &visits {
        let remaining = CoursePairing::find()
            .filter(course_pairing::Column::PlanId.eq(plan_id))
            .filter(course_pairing::Column::HostCoupleId.eq(visit.host_couple_id))
            .filter(course_pairing::Column::Course.eq(visit.course))
            .count(db)
            .await
            .step("count guests")?;
        if remaining == 0 {
            report.capacity_warnings.push(format!(
                "Host {} has no guests left for {} in event {event_id}",
                visit.host_couple_id, visit.course
            ));
        }
    }
    report.pairings_removed.extend(visits);
    Ok(())
}

async fn apply_host_resign<C>(
    db: &C,
    event_id: i64,
    courses: Vec<Course>,
    report: &mut CascadeReport,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let (plan_id, couple_id) = (report.plan_id, report.couple_id);
    for course in &courses {
        let hosted = CoursePairing::find()
            .filter(course_pairing::Column::PlanId.eq(plan_id))
            .filter(course_pairing::Column::HostCoupleId.eq(couple_id))
            .filter(course_pairing::Column::Course.eq(*course))
            .all(db)
            .await
            .step("load pairings")?;
        remove_pairings(db, &hosted).await?;
        report
            .unplaced
            .extend(hosted.iter().map(|p| (p.guest_couple_id, p.course)));
        report.pairings_removed.extend(hosted);

        let envelopes = live_envelopes(plan_id)
            .filter(envelope::Column::HostCoupleId.eq(couple_id))
            .filter(envelope::Column::Course.eq(*course))
            .all(db)
            .await
            .step("load envelopes")?;
        cancel_all(db, envelopes, report, now).await?;

        clear_host(db, couple_id, *course).await.step("clear host")?;
    }
    report.courses_resigned = courses;

    // can the remaining hosts absorb the displaced guests?
    let slots = get_host_slots(db, event_id).await.step("load host slots")?;
    let mut displaced: BTreeMap<Course, usize> = BTreeMap::new();
    for (_, course) in &report.unplaced {
        *displaced.entry(*course).or_default() += 1;
    }
    for (course, count) in displaced {
        let capacity: usize = slots
            .iter()
            .filter(|s| s.course == course)
            .map(|s| s.max_guests as usize)
            .sum();
        let seated = CoursePairing::find()
            .filter(course_pairing::Column::PlanId.eq(plan_id))
            .filter(course_pairing::Column::Course.eq(course))
            .count(db)
            .await
            .step("count guests")?;
        let free = capacity.saturating_sub(usize::try_from(seated).unwrap_or(usize::MAX));
        if free < count {
            report.capacity_warnings.push(format!(
                "{count} guests lost their {course} host but only {free} seats are free"
            ));
        }
    }
    Ok(())
}

async fn apply_split<C>(
    db: &C,
    event_id: i64,
    new_couple_id: i64,
    report: &mut CascadeReport,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let (plan_id, couple_id) = (report.plan_id, report.couple_id);
    let visits = CoursePairing::find()
        .filter(course_pairing::Column::PlanId.eq(plan_id))
        .filter(course_pairing::Column::GuestCoupleId.eq(couple_id))
        .all(db)
        .await
        .step("load pairings")?;
    for visit in &visits {
        course_pairing::ActiveModel {
            plan_id: Set(plan_id),
            course: Set(visit.course),
            host_couple_id: Set(visit.host_couple_id),
            guest_couple_id: Set(new_couple_id),
            created_at: Set(visit.created_at),
            ..Default::default()
        }
        .insert(db)
        .await
        .step("copy pairings")?;
        report.pairings_added += 1;
    }

    // the solo entry tags along, which may push a table past its limit
    let slots = get_host_slots(db, event_id).await.step("load host slots")?;
    for visit in &visits {
        let limit = slots
            .iter()
            .find(|s| s.couple_id == visit.host_couple_id && s.course == visit.course)
            .map_or(0, |s| u64::from(s.max_guests));
        let seated = CoursePairing::find()
            .filter(course_pairing::Column::PlanId.eq(plan_id))
            .filter(course_pairing::Column::HostCoupleId.eq(visit.host_couple_id))
            .filter(course_pairing::Column::Course.eq(visit.course))
            .count(db)
            .await
            .step("count guests")?;
        if seated > limit {
            report.capacity_warnings.push(format!(
                "Host {} now seats {seated} guest units for {}, above its limit of {limit}",
                visit.host_couple_id, visit.course
            ));
        }
    }

    let envelopes = live_envelopes(plan_id)
        .filter(envelope::Column::CoupleId.eq(couple_id))
        .all(db)
        .await
        .step("load envelopes")?;
    let solo_copies: Vec<envelope::Model> = envelopes
        .into_iter()
        .map(|e| envelope::Model {
            couple_id: new_couple_id,
            ..e
        })
        .collect();
    let created = crate::core::envelope::copy_envelopes(db, plan_id, &solo_copies)
        .await
        .step("copy envelopes")?;
    report.envelopes_created += created.len();

    // the original keeps its hosting duties; the solo entry must be seated there anew
    let hosted = hosted_courses(db, couple_id).await.step("load host slots")?;
    report
        .unplaced
        .extend(hosted.into_iter().map(|course| (new_couple_id, course)));
    Ok(())
}

/// Hands a hosted meal over to another couple of the same event.
///
/// Pairings move to the new host and the guests' envelopes are redirected to the
/// new address. Refused with `InvalidState` once any guest has seen a reveal for
/// that meal. The old host is reported as unplaced for the meal.
pub async fn transfer_host(
    db: &DatabaseConnection,
    event_id: i64,
    plan_id: i64,
    from_couple_id: i64,
    to_couple_id: i64,
    course: Course,
    now: DateTime<Utc>,
) -> Result<TransferReport> {
    active_plan_for(db, event_id, plan_id).await?;
    event_couple(db, event_id, from_couple_id).await?;
    let to = event_couple(db, event_id, to_couple_id).await?;
    if from_couple_id == to_couple_id {
        return Err(Error::InvalidInput {
            message: "A host cannot be transferred to itself".to_string(),
        });
    }
    if !to.is_matchable() {
        return Err(Error::invalid_state_for(
            format!("Couple {to_couple_id} is cancelled or a reserve and cannot host"),
            Some(course),
            to_couple_id,
        ));
    }
    if hosted_courses(db, to_couple_id).await?.contains(&course) {
        return Err(Error::invalid_state_for(
            format!("Couple {to_couple_id} already hosts {course}"),
            Some(course),
            to_couple_id,
        ));
    }
    let revealed: Vec<i64> = live_envelopes(plan_id)
        .filter(envelope::Column::HostCoupleId.eq(from_couple_id))
        .filter(envelope::Column::Course.eq(course))
        .all(db)
        .await?
        .into_iter()
        .filter(envelope::Model::is_frozen)
        .map(|e| e.id)
        .collect();
    if !revealed.is_empty() {
        return Err(Error::invalid_state_for(
            format!(
                "Guests of couple {from_couple_id} already started revealing {course} (envelopes {revealed:?})"
            ),
            Some(course),
            from_couple_id,
        ));
    }

    let txn = db.begin().await?;
    let mut report = TransferReport::default();

    transfer_host_assignment(&txn, from_couple_id, to_couple_id, course)
        .await
        .step("move assignment")?;

    // the new host stays home for this meal
    let own_visits = CoursePairing::find()
        .filter(course_pairing::Column::PlanId.eq(plan_id))
        .filter(course_pairing::Column::GuestCoupleId.eq(to_couple_id))
        .filter(course_pairing::Column::Course.eq(course))
        .all(&txn)
        .await
        .step("load pairings")?;
    remove_pairings(&txn, &own_visits).await?;
    report.own_visits_cancelled = own_visits.len();
    let own_envelopes = live_envelopes(plan_id)
        .filter(envelope::Column::CoupleId.eq(to_couple_id))
        .filter(envelope::Column::Course.eq(course))
        .all(&txn)
        .await
        .step("load envelopes")?;
    for envelope in own_envelopes {
        cancel_envelope(&txn, envelope, now).await.step("cancel envelopes")?;
    }

    let moved = CoursePairing::update_many()
        .col_expr(
            course_pairing::Column::HostCoupleId,
            sea_orm::sea_query::Expr::value(to_couple_id),
        )
        .filter(course_pairing::Column::PlanId.eq(plan_id))
        .filter(course_pairing::Column::HostCoupleId.eq(from_couple_id))
        .filter(course_pairing::Column::Course.eq(course))
        .exec(&txn)
        .await
        .step("move pairings")?;
    report.pairings_moved = usize::try_from(moved.rows_affected).unwrap_or(usize::MAX);

    let envelopes = live_envelopes(plan_id)
        .filter(envelope::Column::HostCoupleId.eq(from_couple_id))
        .filter(envelope::Column::Course.eq(course))
        .all(&txn)
        .await
        .step("load envelopes")?;
    for envelope in envelopes {
        redirect_envelope(&txn, envelope, to_couple_id, &to.address)
            .await
            .step("redirect envelopes")?;
        report.envelopes_redirected += 1;
    }
    report.unplaced.push((from_couple_id, course));

    txn.commit().await.step("commit")?;
    info!(
        "Moved {course} of event {event_id} from couple {from_couple_id} to {to_couple_id}: {} pairings, {} envelopes redirected",
        report.pairings_moved, report.envelopes_redirected
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::{
            couple::register_split,
            envelope::{fire_due_envelopes, get_envelope},
            plan::{get_plan_envelopes, get_plan_pairings},
        },
        test_utils::*,
    };
    use chrono::Duration;

    #[tokio::test]
    async fn test_guest_dropout_removes_visits_and_envelopes() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let guest = scenario.guest_only();

        let report = resolve_cascade(
            &db,
            scenario.event.id,
            scenario.plan.id,
            guest,
            &CascadeEvent::GuestDropout,
            Utc::now(),
        )
        .await?;

        assert!(report.success());
        let mut expected: Vec<_> = scenario
            .pairings
            .iter()
            .filter(|p| p.guest_couple_id == guest)
            .cloned()
            .collect();
        expected.sort_by_key(|p| p.id);
        let mut removed = report.pairings_removed.clone();
        removed.sort_by_key(|p| p.id);
        assert_eq!(removed.len(), 3);
        assert_eq!(removed, expected);
        assert!(report.unplaced.is_empty());
        let pairings = get_plan_pairings(&db, scenario.plan.id).await?;
        assert!(pairings.iter().all(|p| p.guest_couple_id != guest));
        let envelopes = get_plan_envelopes(&db, scenario.plan.id).await?;
        assert!(
            envelopes
                .iter()
                .filter(|e| e.couple_id == guest)
                .all(|e| e.cancelled_at.is_some())
        );
        // three meals and the afterparty
        assert_eq!(report.envelopes_cancelled, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_host_resign_reports_displaced_guests() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let host = scenario.host_of(Course::Dessert);
        let hosted: Vec<course_pairing::Model> = get_plan_pairings(&db, scenario.plan.id)
            .await?
            .into_iter()
            .filter(|p| p.host_couple_id == host && p.course == Course::Dessert)
            .collect();
        let mut before: Vec<i64> = hosted.iter().map(|p| p.guest_couple_id).collect();
        before.sort_unstable();
        assert!(!before.is_empty());

        let report = resolve_cascade(
            &db,
            scenario.event.id,
            scenario.plan.id,
            host,
            &CascadeEvent::HostResign { courses: None },
            Utc::now(),
        )
        .await?;

        assert!(report.success());
        assert_eq!(report.courses_resigned, vec![Course::Dessert]);
        let mut unplaced: Vec<i64> = report.unplaced.iter().map(|(id, _)| *id).collect();
        unplaced.sort_unstable();
        assert_eq!(unplaced, before);
        let removed: BTreeSet<i64> = report.pairings_removed.iter().map(|p| p.id).collect();
        assert_eq!(removed, hosted.iter().map(|p| p.id).collect::<BTreeSet<i64>>());
        assert!(hosted_courses(&db, host).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_host_resign_cancels_frozen_without_editing() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let host = scenario.host_of(Course::Starter);

        let envelopes = get_plan_envelopes(&db, scenario.plan.id).await?;
        let starter = envelopes
            .iter()
            .find(|e| e.course == Course::Starter && e.host_couple_id == Some(host))
            .unwrap()
            .clone();
        let now = starter.teasing_at + Duration::minutes(1);
        fire_due_envelopes(&db, scenario.plan.id, now).await?;
        let activated = get_envelope(&db, starter.id).await?;

        let report = resolve_cascade(
            &db,
            scenario.event.id,
            scenario.plan.id,
            host,
            &CascadeEvent::HostResign {
                courses: Some(vec![Course::Starter]),
            },
            now,
        )
        .await?;

        assert!(report.frozen_cancelled.contains(&starter.id));
        let after = get_envelope(&db, starter.id).await?;
        assert_eq!(after.cancelled_at, Some(now));
        assert_eq!(
            envelope::Model {
                cancelled_at: None,
                ..after
            },
            activated
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_non_host_and_superseded_plan() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let main_host = scenario.host_of(Course::Main);

        let result = resolve_cascade(
            &db,
            scenario.event.id,
            scenario.plan.id,
            main_host,
            &CascadeEvent::HostResign {
                courses: Some(vec![Course::Starter]),
            },
            Utc::now(),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidState { .. })));

        let next = crate::core::plan::create_draft_plan(&db, scenario.event.id, Utc::now()).await?;
        crate::core::plan::activate_plan(
            &db,
            next,
            &BTreeSet::new(),
            &crate::core::matcher::MatchStats::default(),
            Utc::now(),
        )
        .await?;
        let result = resolve_cascade(
            &db,
            scenario.event.id,
            scenario.plan.id,
            main_host,
            &CascadeEvent::GuestDropout,
            Utc::now(),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidState { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_split_copies_visits_to_solo_entry() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let original = scenario.host_of(Course::Main);
        let (_, solo) = register_split(&db, original, &test_new_couple("Ben")).await?;

        let report = resolve_cascade(
            &db,
            scenario.event.id,
            scenario.plan.id,
            original,
            &CascadeEvent::Split {
                new_couple_id: solo.id,
            },
            Utc::now(),
        )
        .await?;

        assert!(report.success());
        assert_eq!(report.pairings_added, 2);
        assert_eq!(report.envelopes_created, 3);
        assert_eq!(report.unplaced, vec![(solo.id, Course::Main)]);
        let pairings = get_plan_pairings(&db, scenario.plan.id).await?;
        assert_eq!(
            pairings.iter().filter(|p| p.guest_couple_id == solo.id).count(),
            2
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_transfer_host_redirects_scheduled_envelopes() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let from = scenario.host_of(Course::Dessert);
        let to = scenario.host_of(Course::Starter);

        let report = transfer_host(
            &db,
            scenario.event.id,
            scenario.plan.id,
            from,
            to,
            Course::Dessert,
            Utc::now(),
        )
        .await?;

        assert!(report.pairings_moved > 0);
        assert_eq!(report.unplaced, vec![(from, Course::Dessert)]);
        assert_eq!(report.own_visits_cancelled, 1);
        let to_address = get_couple(&db, to).await?.address;
        let envelopes = get_plan_envelopes(&db, scenario.plan.id).await?;
        let live_dessert: Vec<_> = envelopes
            .iter()
            .filter(|e| e.course == Course::Dessert && e.cancelled_at.is_none())
            .collect();
        assert!(live_dessert.iter().all(|e| e.host_couple_id != Some(from)));
        let redirected: Vec<_> = live_dessert
            .iter()
            .filter(|e| e.host_couple_id == Some(to))
            .collect();
        assert_eq!(redirected.len(), report.envelopes_redirected);
        assert!(redirected.iter().all(|e| e.destination == to_address));
        assert_eq!(hosted_courses(&db, to).await?, vec![Course::Starter, Course::Dessert]);
        Ok(())
    }

    #[tokio::test]
    async fn test_transfer_host_refused_once_revealed() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let from = scenario.host_of(Course::Starter);
        let to = scenario.host_of(Course::Dessert);

        let starter = scenario
            .envelopes
            .iter()
            .find(|e| e.course == Course::Starter && e.host_couple_id == Some(from))
            .unwrap();
        let now = starter.teasing_at + Duration::minutes(1);
        fire_due_envelopes(&db, scenario.plan.id, now).await?;

        let result = transfer_host(
            &db,
            scenario.event.id,
            scenario.plan.id,
            from,
            to,
            Course::Starter,
            now,
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::InvalidState {
                course: Some(Course::Starter),
                couple_id: Some(id),
                ..
            }) if id == from
        ));

        // nothing moved
        let pairings = get_plan_pairings(&db, scenario.plan.id).await?;
        assert_eq!(pairings.len(), scenario.pairings.len());
        assert!(
            pairings
                .iter()
                .filter(|p| p.course == Course::Starter)
                .all(|p| p.host_couple_id != to)
        );
        assert_eq!(hosted_courses(&db, from).await?, vec![Course::Starter]);
        assert_eq!(hosted_courses(&db, to).await?, vec![Course::Dessert]);
        let envelopes = get_plan_envelopes(&db, scenario.plan.id).await?;
        assert!(envelopes.iter().all(|e| e.cancelled_at.is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_step_rolls_back_whole_cascade() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let guest = scenario.guest_only();
        db.execute_unprepared("DROP TABLE envelopes").await?;

        let report = resolve_cascade(
            &db,
            scenario.event.id,
            scenario.plan.id,
            guest,
            &CascadeEvent::GuestDropout,
            Utc::now(),
        )
        .await?;

        assert!(!report.success());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].step, "load envelopes");
        assert!(report.pairings_removed.is_empty());
        // the pairing delete that ran before the failure was rolled back
        let pairings = get_plan_pairings(&db, scenario.plan.id).await?;
        assert_eq!(pairings.len(), scenario.pairings.len());
        assert_eq!(
            pairings.iter().filter(|p| p.guest_couple_id == guest).count(),
            3
        );
        Ok(())
    }
}
