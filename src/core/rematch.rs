//! Rematch orchestrator - the entry points organisers actually call.
//!
//! A rematch takes the event lock, computes a fresh plan around the frozen
//! courses and writes it in one transaction before superseding the previous plan.
//! The lock is released afterwards whatever happened. Envelope-time operations
//! (firing due reveals, delays, forced course activation) take the same lock so
//! they never interleave with a rematch.

use crate::{
    config::AppConfig,
    core::{
        assignment::{clear_host, get_host_slots, hosted_courses},
        cascade::{CascadeEvent, CascadeReport, resolve_cascade},
        couple::{
            NewCouple, as_match_couple, cancel_couple, get_blocked_pairs, get_couple,
            get_event_couples, register_split,
        },
        envelope::{
            DelayReport, activate_course, build_afterparty_envelopes, build_guest_envelopes,
            copy_envelopes, delay_envelopes, fire_due_envelopes, insert_envelopes,
        },
        event::{get_event, shift_course_times},
        lock::with_rematch_lock,
        matcher::{MatchInput, MatchStats, PairingDraft, UnplacedGuest, generate_pairings},
        plan::{
            activate_plan, as_drafts, create_draft_plan, frozen_courses, get_active_plan,
            get_plan_envelopes, get_plan_pairings, insert_pairings, record_frozen_courses,
        },
        timing::EventTiming,
        travel::TravelTimes,
    },
    entities::{Course, couple, course_pairing, envelope, match_plan},
    errors::{Error, Result, StepContext},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument, warn};

/// Everything a finished rematch wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct RematchOutcome {
    /// The plan now active
    pub plan: match_plan::Model,
    /// The plan it replaced, if any
    pub superseded: Option<match_plan::Model>,
    /// All pairings of the new plan, frozen ones included
    pub pairings: Vec<course_pairing::Model>,
    /// All envelopes of the new plan, copied frozen ones included
    pub envelopes: Vec<envelope::Model>,
    /// Per-course statistics
    pub stats: MatchStats,
    /// Guests the matcher could not seat
    pub unplaced: Vec<UnplacedGuest>,
}

/// What a dropout triggered.
#[derive(Debug, Clone, PartialEq)]
pub struct DropoutOutcome {
    /// The cancelled couple
    pub couple: couple::Model,
    /// `None` when the event has no active plan yet
    pub guest_cascade: Option<CascadeReport>,
    /// Only for couples that were hosting
    pub host_cascade: Option<CascadeReport>,
    /// Only after a successful host cascade
    pub rematch: Option<RematchOutcome>,
}

impl DropoutOutcome {
    /// True when every step that ran completed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.guest_cascade.as_ref().is_none_or(CascadeReport::success)
            && self.host_cascade.as_ref().is_none_or(CascadeReport::success)
    }
}

/// Recomputes the event's plan under the event lock.
///
/// Fails with `Conflict` if another rematch holds the lock. A failed write comes
/// back as `Persistence` naming the step; nothing of the new plan is kept then.
#[instrument(skip(db, config, travel))]
pub async fn run_rematch(
    db: &DatabaseConnection,
    config: &AppConfig,
    event_id: i64,
    travel: &dyn TravelTimes,
    now: DateTime<Utc>,
) -> Result<RematchOutcome> {
    with_rematch_lock(db, event_id, now, config.rematch.lock_ttl(), || {
        rematch_locked(db, config, event_id, travel, now)
    })
    .await
}

/// `run_rematch`, retrying a held lock a few times with a fixed back-off.
pub async fn run_rematch_with_retry(
    db: &DatabaseConnection,
    config: &AppConfig,
    event_id: i64,
    travel: &dyn TravelTimes,
    now: DateTime<Utc>,
) -> Result<RematchOutcome> {
    let delay = config.rematch.retry_delay();
    let step = Duration::from_std(delay).unwrap_or_else(|_| Duration::zero());
    let mut attempt = 0;
    loop {
        let attempt_at = now + step * i32::try_from(attempt).unwrap_or(i32::MAX);
        match run_rematch(db, config, event_id, travel, attempt_at).await {
            Err(error) if error.is_conflict() && attempt < config.rematch.retry_attempts => {
                attempt += 1;
                warn!(
                    "Rematch for event {event_id} is locked, retry {attempt}/{} in {delay:?}",
                    config.rematch.retry_attempts
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

async fn rematch_locked(
    db: &DatabaseConnection,
    config: &AppConfig,
    event_id: i64,
    travel: &dyn TravelTimes,
    now: DateTime<Utc>,
) -> Result<RematchOutcome> {
    let event = get_event(db, event_id).await?;
    let timing = EventTiming::for_event(&config.timing, &event)?;

    let txn = db.begin().await.step("begin transaction")?;

    // carry over whatever guests have already started seeing
    let previous = get_active_plan(&txn, event_id).await.step("load active plan")?;
    let (frozen, kept_pairings, kept_envelopes) = match &previous {
        Some(plan) => {
            let frozen = frozen_courses(&txn, plan).await.step("load frozen courses")?;
            let pairings = get_plan_pairings(&txn, plan.id).await.step("load pairings")?;
            let envelopes = get_plan_envelopes(&txn, plan.id).await.step("load envelopes")?;
            (
                frozen.clone(),
                pairings
                    .into_iter()
                    .filter(|p| frozen.contains(&p.course))
                    .collect::<Vec<_>>(),
                envelopes
                    .into_iter()
                    .filter(|e| frozen.contains(&e.course) && e.cancelled_at.is_none())
                    .collect::<Vec<_>>(),
            )
        }
        None => (BTreeSet::new(), Vec::new(), Vec::new()),
    };

    let couples = get_event_couples(&txn, event_id).await.step("load couples")?;
    let match_couples: Vec<_> = couples.iter().map(as_match_couple).collect();
    let slots = get_host_slots(&txn, event_id).await.step("load host slots")?;
    let blocked = get_blocked_pairs(&txn, event_id).await.step("load blocked pairs")?;

    let mut frozen_pairings: BTreeMap<Course, Vec<PairingDraft>> = frozen
        .iter()
        .filter(|c| c.is_meal())
        .map(|c| (*c, Vec::new()))
        .collect();
    for pairing in as_drafts(&kept_pairings) {
        frozen_pairings.entry(pairing.course).or_default().push(pairing);
    }

    let outcome = generate_pairings(&MatchInput {
        couples: &match_couples,
        host_slots: &slots,
        blocked: &blocked,
        frozen: &frozen_pairings,
    })?;

    let draft = create_draft_plan(&txn, event_id, now).await.step("create plan")?;
    let pairings = insert_pairings(&txn, draft.id, &outcome.pairings, now)
        .await
        .step("insert pairings")?;

    let mut envelopes = copy_envelopes(&txn, draft.id, &kept_envelopes)
        .await
        .step("copy frozen envelopes")?;
    let fresh: Vec<PairingDraft> = outcome
        .pairings
        .iter()
        .filter(|p| !frozen.contains(&p.course))
        .copied()
        .collect();
    let mut drafts = build_guest_envelopes(&event, &timing, &couples, &fresh, travel)?;
    if !frozen.contains(&Course::Afterparty) {
        drafts.extend(build_afterparty_envelopes(&event, &timing, &couples));
    }
    envelopes.extend(
        insert_envelopes(&txn, draft.id, drafts)
            .await
            .step("insert envelopes")?,
    );

    let (plan, superseded) = activate_plan(&txn, draft, &frozen, &outcome.stats, now)
        .await
        .step("activate plan")?;
    txn.commit().await.step("commit")?;

    info!(
        "Rematch for event {event_id} wrote plan v{}: {} pairings, {} envelopes, {} unplaced, frozen {:?}",
        plan.version,
        pairings.len(),
        envelopes.len(),
        outcome.unplaced.len(),
        frozen
    );
    for guest in &outcome.unplaced {
        warn!(
            "Couple {} has no {} placement ({:?})",
            guest.couple_id, guest.course, guest.reason
        );
    }

    Ok(RematchOutcome {
        plan,
        superseded,
        pairings,
        envelopes,
        stats: outcome.stats,
        unplaced: outcome.unplaced,
    })
}

/// A couple cancels. Their own visits are withdrawn; if they were hosting, their
/// guests are displaced and a rematch places them again. A plain guest dropout
/// never triggers a rematch.
#[instrument(skip(db, config, travel))]
pub async fn handle_dropout(
    db: &DatabaseConnection,
    config: &AppConfig,
    event_id: i64,
    couple_id: i64,
    travel: &dyn TravelTimes,
    now: DateTime<Utc>,
) -> Result<DropoutOutcome> {
    let couple = get_couple(db, couple_id).await?;
    if couple.event_id != event_id {
        return Err(Error::InvalidInput {
            message: format!("Couple {couple_id} is not registered for event {event_id}"),
        });
    }
    let hosted = hosted_courses(db, couple_id).await?;
    let couple = cancel_couple(db, couple_id, now).await?;

    let Some(plan) = get_active_plan(db, event_id).await? else {
        // nothing planned yet; the next rematch simply leaves them out
        for course in &hosted {
            clear_host(db, couple_id, *course).await?;
        }
        return Ok(DropoutOutcome {
            couple,
            guest_cascade: None,
            host_cascade: None,
            rematch: None,
        });
    };

    let guest_cascade =
        resolve_cascade(db, event_id, plan.id, couple_id, &CascadeEvent::GuestDropout, now).await?;
    let mut outcome = DropoutOutcome {
        couple,
        guest_cascade: Some(guest_cascade),
        host_cascade: None,
        rematch: None,
    };
    if !outcome.success() || hosted.is_empty() {
        return Ok(outcome);
    }

    let host_cascade = resolve_cascade(
        db,
        event_id,
        plan.id,
        couple_id,
        &CascadeEvent::HostResign { courses: None },
        now,
    )
    .await?;
    let resolved = host_cascade.success();
    outcome.host_cascade = Some(host_cascade);
    if resolved {
        outcome.rematch = Some(run_rematch_with_retry(db, config, event_id, travel, now).await?);
    }
    Ok(outcome)
}

/// A couple splits into two entries. The partner gets a solo entry that follows
/// the original's guest route; the meals the original hosts are reported as
/// unplaced for the new entry.
#[instrument(skip(db, solo))]
pub async fn split_couple(
    db: &DatabaseConnection,
    event_id: i64,
    couple_id: i64,
    solo: &NewCouple,
    now: DateTime<Utc>,
) -> Result<(couple::Model, Option<CascadeReport>)> {
    let original = get_couple(db, couple_id).await?;
    if original.event_id != event_id {
        return Err(Error::InvalidInput {
            message: format!("Couple {couple_id} is not registered for event {event_id}"),
        });
    }
    let (_, created) = register_split(db, couple_id, solo).await?;
    let report = match get_active_plan(db, event_id).await? {
        Some(plan) => Some(
            resolve_cascade(
                db,
                event_id,
                plan.id,
                couple_id,
                &CascadeEvent::Split {
                    new_couple_id: created.id,
                },
                now,
            )
            .await?,
        ),
        None => None,
    };
    Ok((created, report))
}

async fn require_active_plan<C>(db: &C, event_id: i64) -> Result<match_plan::Model>
where
    C: ConnectionTrait,
{
    get_active_plan(db, event_id).await?.ok_or_else(|| {
        Error::invalid_state(format!("Event {event_id} has no active plan yet"))
    })
}

/// Activates every envelope of the active plan whose teaser time has come.
pub async fn fire_due(
    db: &DatabaseConnection,
    config: &AppConfig,
    event_id: i64,
    now: DateTime<Utc>,
) -> Result<u64> {
    with_rematch_lock(db, event_id, now, config.rematch.lock_ttl(), || async move {
        let plan = require_active_plan(db, event_id).await?;
        let txn = db.begin().await?;
        let fired = fire_due_envelopes(&txn, plan.id, now).await?;
        let frozen = frozen_courses(&txn, &plan).await?;
        record_frozen_courses(&txn, plan, &frozen).await?;
        txn.commit().await?;
        Ok(fired)
    })
    .await
}

/// Shifts the still-scheduled envelopes of the active plan by `minutes`
/// (negative to bring them forward). Activated envelopes are left alone.
pub async fn delay_course(
    db: &DatabaseConnection,
    config: &AppConfig,
    event_id: i64,
    minutes: i64,
    course: Option<Course>,
    now: DateTime<Utc>,
) -> Result<DelayReport> {
    if minutes == 0 {
        return Err(Error::InvalidInput {
            message: "Delay must be a non-zero number of minutes".to_string(),
        });
    }
    let delay = Duration::minutes(minutes);
    with_rematch_lock(db, event_id, now, config.rematch.lock_ttl(), || async move {
        let plan = require_active_plan(db, event_id).await?;
        let txn = db.begin().await?;
        // later rematches rebuild envelopes from the event's course times
        let frozen = frozen_courses(&txn, &plan).await?;
        let scope: Vec<Course> = course.map_or_else(
            || vec![Course::Starter, Course::Main, Course::Dessert, Course::Afterparty],
            |course| vec![course],
        );
        let movable: Vec<Course> = scope.into_iter().filter(|c| !frozen.contains(c)).collect();
        if !movable.is_empty() {
            shift_course_times(&txn, event_id, &movable, delay).await?;
        }
        let report = delay_envelopes(&txn, plan.id, delay, course).await?;
        txn.commit().await?;
        Ok(report)
    })
    .await
}

/// Force-opens a course right now: its remaining reveals fire a few seconds apart.
pub async fn force_open_course(
    db: &DatabaseConnection,
    config: &AppConfig,
    event_id: i64,
    course: Course,
    now: DateTime<Utc>,
) -> Result<usize> {
    with_rematch_lock(db, event_id, now, config.rematch.lock_ttl(), || async move {
        let plan = require_active_plan(db, event_id).await?;
        let txn = db.begin().await?;
        let count =
            activate_course(&txn, plan.id, course, now, config.timing.activation_step()).await?;
        record_frozen_courses(&txn, plan, &BTreeSet::from([course])).await?;
        txn.commit().await?;
        Ok(count)
    })
    .await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::{lock::acquire_rematch_lock, travel::NoTravelData},
        entities::PlanStatus,
        test_utils::*,
    };

    #[tokio::test]
    async fn test_first_rematch_places_everyone() -> Result<()> {
        let db = setup_test_db().await?;
        let seeded = seed_event(&db).await?;
        let outcome =
            run_rematch(&db, &AppConfig::default(), seeded.event.id, &NoTravelData, Utc::now())
                .await?;

        assert_eq!(outcome.plan.version, 1);
        assert_eq!(outcome.plan.status, PlanStatus::Active);
        assert!(outcome.superseded.is_none());
        assert!(outcome.unplaced.is_empty());
        // 7 couples, 2 hosts per meal, 5 guests per meal
        assert_eq!(outcome.pairings.len(), 15);
        // 15 guest envelopes plus 7 afterparty envelopes
        assert_eq!(outcome.envelopes.len(), 22);
        assert_eq!(outcome.stats.total_pairings, 15);
        assert!(get_event(&db, seeded.event.id).await?.rematch_locked_until.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_rematch_conflict_leaves_foreign_lock() -> Result<()> {
        let db = setup_test_db().await?;
        let seeded = seed_event(&db).await?;
        let now = Utc::now();
        let held = acquire_rematch_lock(&db, seeded.event.id, now, Duration::minutes(5)).await?;

        let mut config = AppConfig::default();
        config.rematch.retry_attempts = 1;
        config.rematch.retry_delay_ms = 1;
        let result = run_rematch_with_retry(&db, &config, seeded.event.id, &NoTravelData, now).await;
        assert!(matches!(result, Err(Error::Conflict { .. })));

        let event = get_event(&db, seeded.event.id).await?;
        assert_eq!(event.rematch_locked_until, Some(held.locked_until));
        Ok(())
    }

    #[tokio::test]
    async fn test_guest_dropout_does_not_rematch() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let guest = scenario.guest_only();

        let outcome = handle_dropout(
            &db,
            &AppConfig::default(),
            scenario.event.id,
            guest,
            &NoTravelData,
            Utc::now(),
        )
        .await?;
        assert!(outcome.success());
        assert!(outcome.guest_cascade.is_some());
        assert!(outcome.host_cascade.is_none());
        assert!(outcome.rematch.is_none());
        assert_eq!(
            get_active_plan(&db, scenario.event.id).await?.unwrap().id,
            scenario.plan.id
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_host_dropout_rematches_and_keeps_frozen_course() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let config = AppConfig::default();

        // starter reveals have begun
        let starter_teaser = scenario
            .envelopes
            .iter()
            .find(|e| e.course == Course::Starter)
            .unwrap()
            .teasing_at;
        let now = starter_teaser + Duration::minutes(1);
        fire_due(&db, &config, scenario.event.id, now).await?;
        let host = scenario.host_of(Course::Main);
        let frozen_before: Vec<envelope::Model> = get_plan_envelopes(&db, scenario.plan.id)
            .await?
            .into_iter()
            .filter(|e| e.course == Course::Starter && e.couple_id != host)
            .collect();
        assert!(frozen_before.iter().all(|e| e.activated_at == Some(now)));

        let outcome =
            handle_dropout(&db, &config, scenario.event.id, host, &NoTravelData, now).await?;
        assert!(outcome.success());
        let rematch = outcome.rematch.unwrap();
        assert_eq!(rematch.plan.version, 2);
        assert_eq!(rematch.superseded.unwrap().id, scenario.plan.id);
        assert!(rematch.plan.frozen()?.contains(&Course::Starter));

        // nobody is sent to the cancelled host
        assert!(rematch.pairings.iter().all(|p| p.host_couple_id != host && p.guest_couple_id != host));

        // frozen starter envelopes carried over unchanged
        for before in &frozen_before {
            let copy = rematch
                .envelopes
                .iter()
                .find(|e| e.course == Course::Starter && e.couple_id == before.couple_id)
                .unwrap();
            assert_eq!(copy.schedule(), before.schedule());
            assert_eq!(copy.destination, before.destination);
            assert_eq!(copy.activated_at, before.activated_at);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_delay_and_force_open() -> Result<()> {
        let db = setup_test_db().await?;
        let scenario = seed_active_plan(&db).await?;
        let config = AppConfig::default();
        let now = scenario.event.starter_at - Duration::hours(8);

        let report = delay_course(&db, &config, scenario.event.id, 10, Some(Course::Dessert), now)
            .await?;
        assert_eq!(report.shifted, 5);
        assert_eq!(report.skipped_frozen, 0);
        let event = get_event(&db, scenario.event.id).await?;
        assert_eq!(event.dessert_at, scenario.event.dessert_at + Duration::minutes(10));

        let opened = force_open_course(&db, &config, scenario.event.id, Course::Main, now).await?;
        assert_eq!(opened, 5);
        let plan = get_active_plan(&db, scenario.event.id).await?.unwrap();
        assert!(plan.frozen()?.contains(&Course::Main));

        let result = delay_course(&db, &config, scenario.event.id, 0, None, now).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
        Ok(())
    }
}
