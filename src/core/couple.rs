//! Couple operations - registration, roles, dropouts, splits and blocked pairs.
//!
//! Couples are never deleted. Dropouts are recorded with `cancelled_at` and the
//! row stays referenced by old pairings and envelopes.

use crate::{
    core::matcher::{BlockedPairs, MatchCouple},
    entities::{BlockedPair, Couple, CoupleRole, CoupleStatus, blocked_pair, couple},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::info;

/// Registration data for a couple or solo entry.
#[derive(Debug, Clone, Default)]
pub struct NewCouple {
    /// Display name
    pub name: String,
    /// 1 for a solo entry, 2 for a couple
    pub person_count: i32,
    /// Home address guests are sent to
    pub address: String,
    /// (latitude, longitude) of the home, used for travel estimates
    pub coordinates: Option<(f64, f64)>,
    /// Material for clues
    pub fun_facts: Vec<String>,
    /// Partner ages, used for clues
    pub ages: Vec<i32>,
    /// Register as reserve instead of a regular participant
    pub reserve: bool,
}

fn validate_new_couple(new: &NewCouple) -> Result<()> {
    if new.name.trim().is_empty() {
        return Err(Error::InvalidInput {
            message: "Couple name cannot be empty".to_string(),
        });
    }
    if !(1..=2).contains(&new.person_count) {
        return Err(Error::InvalidInput {
            message: format!("A couple has 1 or 2 people, got {}", new.person_count),
        });
    }
    if new.address.trim().is_empty() {
        return Err(Error::InvalidInput {
            message: format!("Couple {} needs a home address", new.name.trim()),
        });
    }
    Ok(())
}

fn couple_active_model(
    event_id: i64,
    new: &NewCouple,
    split_from: Option<i64>,
) -> Result<couple::ActiveModel> {
    let facts = if new.fun_facts.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&new.fun_facts)?)
    };
    Ok(couple::ActiveModel {
        event_id: Set(event_id),
        name: Set(new.name.trim().to_string()),
        role: Set(if new.reserve {
            CoupleRole::Reserve
        } else {
            CoupleRole::Normal
        }),
        person_count: Set(new.person_count),
        address: Set(new.address.trim().to_string()),
        latitude: Set(new.coordinates.map(|(lat, _)| lat)),
        longitude: Set(new.coordinates.map(|(_, lng)| lng)),
        fun_facts: Set(facts),
        age_first: Set(new.ages.first().copied()),
        age_second: Set(new.ages.get(1).copied()),
        split_from: Set(split_from),
        cancelled_at: Set(None),
        ..Default::default()
    })
}

/// Registers a couple for an event.
pub async fn register_couple<C>(db: &C, event_id: i64, new: &NewCouple) -> Result<couple::Model>
where
    C: ConnectionTrait,
{
    validate_new_couple(new)?;
    let couple = couple_active_model(event_id, new, None)?.insert(db).await?;
    info!("Registered couple {} ({}) for event {event_id}", couple.id, couple.name);
    Ok(couple)
}

/// Loads a couple or fails with `NotFound`.
pub async fn get_couple<C>(db: &C, couple_id: i64) -> Result<couple::Model>
where
    C: ConnectionTrait,
{
    Couple::find_by_id(couple_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "Couple",
            id: couple_id,
        })
}

/// All couples of an event, cancelled and reserves included, ordered by id.
pub async fn get_event_couples<C>(db: &C, event_id: i64) -> Result<Vec<couple::Model>>
where
    C: ConnectionTrait,
{
    Couple::find()
        .filter(couple::Column::EventId.eq(event_id))
        .order_by_asc(couple::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// The matcher's view of one couple.
#[must_use]
pub fn as_match_couple(couple: &couple::Model) -> MatchCouple {
    MatchCouple {
        id: couple.id,
        person_count: u32::try_from(couple.person_count.max(1)).unwrap_or(1),
        matchable: couple.is_matchable(),
    }
}

/// Moves a couple between `normal` and `reserve`.
pub async fn set_couple_role<C>(db: &C, couple_id: i64, role: CoupleRole) -> Result<couple::Model>
where
    C: ConnectionTrait,
{
    let couple = get_couple(db, couple_id).await?;
    if let CoupleStatus::Cancelled { .. } = couple.status() {
        return Err(Error::invalid_state_for(
            format!("Couple {couple_id} has dropped out and cannot change role"),
            None,
            couple_id,
        ));
    }
    if couple.role == role {
        return Ok(couple);
    }
    let mut active: couple::ActiveModel = couple.into();
    active.role = Set(role);
    let updated = active.update(db).await?;
    info!("Couple {couple_id} is now {:?}", updated.role);
    Ok(updated)
}

/// Records a dropout. Idempotent: an already cancelled couple keeps its original timestamp.
pub async fn cancel_couple<C>(db: &C, couple_id: i64, now: DateTime<Utc>) -> Result<couple::Model>
where
    C: ConnectionTrait,
{
    let couple = get_couple(db, couple_id).await?;
    if couple.cancelled_at.is_some() {
        return Ok(couple);
    }
    let mut active: couple::ActiveModel = couple.into();
    active.cancelled_at = Set(Some(now));
    let updated = active.update(db).await?;
    info!("Couple {couple_id} dropped out");
    Ok(updated)
}

/// Registers the solo entry created when a couple splits up. The original
/// registration keeps its id and shrinks to one person.
pub async fn register_split<C>(
    db: &C,
    couple_id: i64,
    solo: &NewCouple,
) -> Result<(couple::Model, couple::Model)>
where
    C: ConnectionTrait,
{
    let original = get_couple(db, couple_id).await?;
    if !original.is_matchable() {
        return Err(Error::invalid_state_for(
            format!("Couple {couple_id} is cancelled or a reserve and cannot be split"),
            None,
            couple_id,
        ));
    }
    if original.person_count < 2 {
        return Err(Error::invalid_state_for(
            format!("Couple {couple_id} is already a solo entry"),
            None,
            couple_id,
        ));
    }
    let solo = NewCouple {
        person_count: 1,
        reserve: false,
        ..solo.clone()
    };
    validate_new_couple(&solo)?;

    let created = couple_active_model(original.event_id, &solo, Some(original.id))?
        .insert(db)
        .await?;
    let mut shrunk: couple::ActiveModel = original.into();
    shrunk.person_count = Set(1);
    let original = shrunk.update(db).await?;
    info!(
        "Couple {} split; new solo entry {} ({})",
        original.id, created.id, created.name
    );
    Ok((original, created))
}

/// Forbids two couples from ever being matched. Idempotent.
pub async fn block_pair<C>(
    db: &C,
    event_id: i64,
    a: i64,
    b: i64,
    reason: Option<String>,
) -> Result<blocked_pair::Model>
where
    C: ConnectionTrait,
{
    if a == b {
        return Err(Error::InvalidInput {
            message: format!("Couple {a} cannot be blocked from itself"),
        });
    }
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    for id in [low, high] {
        let couple = get_couple(db, id).await?;
        if couple.event_id != event_id {
            return Err(Error::InvalidInput {
                message: format!("Couple {id} does not belong to event {event_id}"),
            });
        }
    }

    if let Some(existing) = BlockedPair::find()
        .filter(blocked_pair::Column::EventId.eq(event_id))
        .filter(blocked_pair::Column::CoupleLow.eq(low))
        .filter(blocked_pair::Column::CoupleHigh.eq(high))
        .one(db)
        .await?
    {
        return Ok(existing);
    }

    let pair = blocked_pair::ActiveModel {
        event_id: Set(event_id),
        couple_low: Set(low),
        couple_high: Set(high),
        reason: Set(reason),
        ..Default::default()
    };
    pair.insert(db).await.map_err(Into::into)
}

/// Blocked pairs of an event in matcher form.
pub async fn get_blocked_pairs<C>(db: &C, event_id: i64) -> Result<BlockedPairs>
where
    C: ConnectionTrait,
{
    Ok(BlockedPair::find()
        .filter(blocked_pair::Column::EventId.eq(event_id))
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.couple_low, p.couple_high))
        .collect())
}
