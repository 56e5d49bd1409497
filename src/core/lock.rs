//! Event-scoped advisory rematch lock.
//!
//! The lock is the `rematch_locked_until` column of the event row. Acquiring is a
//! single conditional UPDATE (compare-and-swap): it only succeeds if the column is
//! empty or already expired. A crashed holder's lock simply runs out.

use crate::{
    core::event::get_event,
    entities::{Event, event},
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{Condition, prelude::*, sea_query::Expr};
use std::future::Future;
use tracing::{debug, error, warn};

/// Proof that the caller holds the rematch lock for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a held lock must be released"]
pub struct RematchLock {
    /// Locked event
    pub event_id: i64,
    /// End of the lease
    pub locked_until: DateTime<Utc>,
}

/// Tries to take the lock for `ttl`. Fails with `Conflict` if someone else holds it.
pub async fn acquire_rematch_lock<C>(
    db: &C,
    event_id: i64,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<RematchLock>
where
    C: ConnectionTrait,
{
    let locked_until = now + ttl;
    let result = Event::update_many()
        .col_expr(
            event::Column::RematchLockedUntil,
            Expr::value(Some(locked_until)),
        )
        .filter(event::Column::Id.eq(event_id))
        .filter(
            Condition::any()
                .add(event::Column::RematchLockedUntil.is_null())
                .add(event::Column::RematchLockedUntil.lte(now)),
        )
        .exec(db)
        .await?;

    if result.rows_affected == 1 {
        debug!("Acquired rematch lock for event {event_id} until {locked_until}");
        return Ok(RematchLock {
            event_id,
            locked_until,
        });
    }

    // either the event does not exist or the lock is held
    let event = get_event(db, event_id).await?;
    warn!(
        "Rematch lock for event {event_id} is held until {:?}",
        event.rematch_locked_until
    );
    Err(Error::Conflict {
        event_id,
        locked_until: event.rematch_locked_until,
    })
}

/// Clears the lock, but only if it is still ours (an expired lock may have been
/// taken over by another rematch in the meantime).
pub async fn release_rematch_lock<C>(db: &C, lock: RematchLock) -> Result<bool>
where
    C: ConnectionTrait,
{
    let result = Event::update_many()
        .col_expr(
            event::Column::RematchLockedUntil,
            Expr::value(Option::<DateTime<Utc>>::None),
        )
        .filter(event::Column::Id.eq(lock.event_id))
        .filter(event::Column::RematchLockedUntil.eq(lock.locked_until))
        .exec(db)
        .await?;

    let released = result.rows_affected == 1;
    if released {
        debug!("Released rematch lock for event {}", lock.event_id);
    } else {
        warn!(
            "Rematch lock for event {} was no longer ours on release",
            lock.event_id
        );
    }
    Ok(released)
}

/// Runs `work` while holding the event lock. The lock is released whether or
/// not `work` succeeds; a failed release only surfaces if `work` itself succeeded.
pub async fn with_rematch_lock<C, F, Fut, T>(
    db: &C,
    event_id: i64,
    now: DateTime<Utc>,
    ttl: Duration,
    work: F,
) -> Result<T>
where
    C: ConnectionTrait,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let lock = acquire_rematch_lock(db, event_id, now, ttl).await?;
    let outcome = work().await;

    match release_rematch_lock(db, lock).await {
        Ok(_) => outcome,
        Err(release_error) => {
            error!("Failed to release rematch lock for event {event_id}: {release_error}");
            outcome.and(Err(release_error))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_lock_is_exclusive() -> Result<()> {
        let db = setup_test_db().await?;
        let event = create_test_event(&db).await?;
        let now = Utc::now();

        let lock = acquire_rematch_lock(&db, event.id, now, Duration::minutes(5)).await?;
        let second = acquire_rematch_lock(&db, event.id, now, Duration::minutes(5)).await;
        assert!(matches!(second, Err(Error::Conflict { .. })));
        assert!(second.unwrap_err().is_conflict());

        assert!(release_rematch_lock(&db, lock).await?);
        let again = acquire_rematch_lock(&db, event.id, now, Duration::minutes(5)).await?;
        assert!(release_rematch_lock(&db, again).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken_over() -> Result<()> {
        let db = setup_test_db().await?;
        let event = create_test_event(&db).await?;
        let now = Utc::now();

        let stale = acquire_rematch_lock(&db, event.id, now, Duration::minutes(5)).await?;
        let later = now + Duration::minutes(6);
        let fresh = acquire_rematch_lock(&db, event.id, later, Duration::minutes(5)).await?;

        // the crashed owner must not clear the new holder's lock
        assert!(!release_rematch_lock(&db, stale).await?);
        let stored = get_event(&db, event.id).await?;
        assert_eq!(stored.rematch_locked_until, Some(fresh.locked_until));
        assert!(release_rematch_lock(&db, fresh).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_on_missing_event() -> Result<()> {
        let db = setup_test_db().await?;
        let result = acquire_rematch_lock(&db, 99, Utc::now(), Duration::minutes(5)).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_failure() -> Result<()> {
        let db = setup_test_db().await?;
        let event = create_test_event(&db).await?;
        let now = Utc::now();

        let result: Result<()> = with_rematch_lock(&db, event.id, now, Duration::minutes(5), || async {
            Err(Error::invalid_state("boom"))
        })
        .await;
        assert!(matches!(result, Err(Error::InvalidState { .. })));
        assert!(get_event(&db, event.id).await?.rematch_locked_until.is_none());

        let value = with_rematch_lock(&db, event.id, now, Duration::minutes(5), || async { Ok(7) })
            .await?;
        assert_eq!(value, 7);
        assert!(get_event(&db, event.id).await?.rematch_locked_until.is_none());
        Ok(())
    }
}
