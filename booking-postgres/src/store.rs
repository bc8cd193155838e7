//! `PostgreSQL`-backed `BookingStore` (C2): the aggregate is persisted whole
//! as JSONB, versioned with optimistic concurrency via a conditional
//! `ON CONFLICT ... WHERE` upsert, and queried directly for reads — there is
//! no separate denormalized projection, since the aggregate already is the
//! read model `GetBooking` needs.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use booking_core::booking::{Booking, Status};
use booking_core::ids::{BookingId, Version};
use booking_core::ledger::Phase;
use booking_core::store::{BookingStore, StoreError};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// `BookingStore` implementation backed by a `PgPool`. Safe to share across
/// a worker pool: all operations are single round-trip statements relying on
/// Postgres row-level locking implicit in `UPDATE ... WHERE`.
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Wrap an existing pool. Migrations are not run automatically; call
    /// [`PostgresBookingStore::migrate`] once at startup.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations from this crate's `migrations/` directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails to apply.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }

    fn status_str(status: Status) -> &'static str {
        match status {
            Status::Pending => "pending",
            Status::Confirmed => "confirmed",
            Status::Cancelled => "cancelled",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    fn phase_str(phase: Phase) -> &'static str {
        match phase {
            Phase::Forward => "forward",
            Phase::Compensating => "compensating",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        }
    }
}

impl BookingStore for PostgresBookingStore {
    fn load(
        &self,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<(Booking, Version), StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT version, payload FROM bookings WHERE booking_id = $1")
                .bind(booking_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .ok_or(StoreError::NotFound(booking_id))?;

            let version: i64 = row.get("version");
            let payload: serde_json::Value = row.get("payload");
            let booking: Booking = serde_json::from_value(payload).map_err(|e| StoreError::Serialization(e.to_string()))?;

            #[allow(clippy::cast_sign_loss)]
            let version = Version::new(version as u64);
            Ok((booking, version))
        })
    }

    fn persist(
        &self,
        booking: &Booking,
        expected_version: Version,
    ) -> Pin<Box<dyn Future<Output = Result<Version, StoreError>> + Send + '_>> {
        let booking_id = booking.booking_id();
        let payload = serde_json::to_value(booking);
        let status = Self::status_str(booking.status());
        let phase = Self::phase_str(booking.ledger().phase());
        let lease = booking.ledger().lease().cloned();
        let hold_expires_at = booking.earliest_hold_expiry();

        Box::pin(async move {
            let payload = payload.map_err(|e| StoreError::Serialization(e.to_string()))?;
            #[allow(clippy::cast_possible_wrap)]
            let new_version = expected_version.next().value() as i64;
            #[allow(clippy::cast_possible_wrap)]
            let expected = expected_version.value() as i64;

            let updated = sqlx::query(
                r"
                INSERT INTO bookings (booking_id, version, status, phase, payload, lease_owner, lease_expires_at, hold_expires_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
                ON CONFLICT (booking_id) DO UPDATE
                SET version = $2, status = $3, phase = $4, payload = $5, lease_owner = $6, lease_expires_at = $7, hold_expires_at = $8, updated_at = NOW()
                WHERE bookings.version = $9
                RETURNING version
                ",
            )
            .bind(booking_id.as_uuid())
            .bind(new_version)
            .bind(status)
            .bind(phase)
            .bind(&payload)
            .bind(lease.as_ref().map(|l| l.owner_id.clone()))
            .bind(lease.as_ref().map(|l| l.expires_at))
            .bind(hold_expires_at)
            .bind(expected)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            match updated {
                Some(_) => {
                    #[allow(clippy::cast_sign_loss)]
                    let persisted = Version::new(new_version as u64);
                    Ok(persisted)
                }
                None => {
                    let found: i64 = sqlx::query_scalar("SELECT version FROM bookings WHERE booking_id = $1")
                        .bind(booking_id.as_uuid())
                        .fetch_one(&self.pool)
                        .await
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                    metrics::counter!("booking_postgres_version_conflicts_total").increment(1);
                    #[allow(clippy::cast_sign_loss)]
                    let found_version = Version::new(found as u64);
                    Err(StoreError::VersionConflict {
                        booking_id,
                        expected: expected_version,
                        found: found_version,
                    })
                }
            }
        })
    }

    fn scan_stranded(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingId>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT booking_id FROM bookings
                WHERE phase IN ('forward', 'compensating')
                  AND lease_expires_at IS NOT NULL
                  AND lease_expires_at < $1
                ",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            Ok(rows
                .into_iter()
                .map(|row| BookingId::from_uuid(row.get("booking_id")))
                .collect())
        })
    }

    fn scan_expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingId>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT booking_id FROM bookings
                WHERE phase = 'forward'
                  AND hold_expires_at IS NOT NULL
                  AND hold_expires_at < $1
                ",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            Ok(rows
                .into_iter()
                .map(|row| BookingId::from_uuid(row.get("booking_id")))
                .collect())
        })
    }

    fn scan_pending_outbox(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingId>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT booking_id FROM bookings WHERE has_pending_outbox")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            Ok(rows
                .into_iter()
                .map(|row| BookingId::from_uuid(row.get("booking_id")))
                .collect())
        })
    }

    fn acquire_lease(
        &self,
        booking_id: BookingId,
        owner: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let owner = owner.to_string();
        Box::pin(async move {
            let expires_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
            let acquired = sqlx::query(
                r"
                UPDATE bookings
                SET lease_owner = $2, lease_expires_at = $3
                WHERE booking_id = $1
                  AND (lease_owner IS NULL OR lease_expires_at < NOW() OR lease_owner = $2)
                RETURNING booking_id
                ",
            )
            .bind(booking_id.as_uuid())
            .bind(&owner)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            if acquired.is_some() {
                Ok(())
            } else {
                Err(StoreError::LeaseHeld(booking_id))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_phase_strings_are_lowercase_and_stable() {
        assert_eq!(PostgresBookingStore::status_str(Status::Confirmed), "confirmed");
        assert_eq!(PostgresBookingStore::phase_str(Phase::Compensating), "compensating");
    }
}
