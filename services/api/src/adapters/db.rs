//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `RideStore`, `PresenceStore` and `IdentityProvider` ports from the core
//! crate. It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use ride_share_core::domain::ParseEnumError;
use ride_share_core::{
    Actor, ActorId, DriverPresence, GeoPoint, IdentityProvider, LocationUpdates, PortError,
    PortResult, PresenceStore, Ride, RideDraft, RideId, RidePatch, RideQuery, RideSnapshots,
    RideStatus, RideStore, Role, SortOrder,
};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use super::listener::{live_query, ChannelEvent, NotificationHub};
use super::queries;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the store and identity ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    listener_retry: Duration,
    /// Started on the first live query; shared by every subscription.
    notifications: Arc<OnceLock<NotificationHub>>,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`. `listener_retry` is the back-off before a
    /// failed live query or listener connection is retried.
    pub fn new(pool: PgPool, listener_retry: Duration) -> Self {
        Self {
            pool,
            listener_retry,
            notifications: Arc::new(OnceLock::new()),
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Subscribes to `channel`. The listener connection is opened with the
    /// pool's connect options but outside the pool, so live queries never
    /// hold request connections.
    fn events(&self, channel: &str) -> PortResult<broadcast::Receiver<ChannelEvent>> {
        self.notifications
            .get_or_init(|| {
                NotificationHub::start(
                    self.pool.connect_options().as_ref().clone(),
                    &[queries::RIDE_CHANGES_CHANNEL, queries::PRESENCE_CHANGES_CHANNEL],
                    self.listener_retry,
                )
            })
            .subscribe(channel)
    }
}

/// Pool and transport failures are transient; everything else is not.
pub(crate) fn map_sqlx_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("Row not found".to_string()),
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => PortError::Connectivity(e.to_string()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn parse_status(raw: &str) -> PortResult<RideStatus> {
    raw.parse()
        .map_err(|e: ParseEnumError| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct RideRecord {
    id: Uuid,
    poster_id: Uuid,
    poster_display_name: String,
    pickup: String,
    drop_location: String,
    ride_date: String,
    ride_time: String,
    price: f64,
    car_type: Option<String>,
    trip_type: String,
    description: Option<String>,
    status: String,
    assigned_to: Option<Uuid>,
    assigned_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl RideRecord {
    /// Rows are checked by table constraints, but a bad enum value still
    /// fails loudly instead of being coerced.
    fn to_domain(self) -> PortResult<Ride> {
        Ok(Ride {
            id: self.id,
            poster_id: self.poster_id,
            poster_display_name: self.poster_display_name,
            pickup: self.pickup,
            drop: self.drop_location,
            date: self.ride_date,
            time: self.ride_time,
            price: self.price,
            car_type: self.car_type,
            trip_type: self
                .trip_type
                .parse()
                .map_err(|e: ParseEnumError| PortError::Unexpected(e.to_string()))?,
            description: self.description,
            status: parse_status(&self.status)?,
            assigned_to: self.assigned_to,
            assigned_name: self.assigned_name,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct PresenceRecord {
    driver_id: Uuid,
    display_name: Option<String>,
    is_online: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
    last_seen_at: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    fn to_domain(self) -> DriverPresence {
        let location = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        };
        DriverPresence {
            driver_id: self.driver_id,
            display_name: self.display_name,
            is_online: self.is_online,
            location,
            last_seen_at: self.last_seen_at,
        }
    }
}

#[derive(FromRow)]
struct ActorRecord {
    user_id: Uuid,
    name: String,
    role: Option<String>,
}

impl ActorRecord {
    fn to_domain(self) -> Actor {
        // Unrecognised roles leave the actor without one.
        let role = self.role.as_deref().and_then(|r| r.parse::<Role>().ok());
        Actor {
            id: self.user_id,
            display_name: self.name,
            role,
        }
    }
}

//=========================================================================================
// Query translation
//=========================================================================================

/// Translates a `RideQuery` into a parameterised `SELECT`.
fn build_ride_query(query: &RideQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(queries::SELECT_RIDES);
    let filter = &query.filter;
    if let Some(ride_id) = filter.ride_id {
        builder.push(" AND id = ").push_bind(ride_id);
    }
    if let Some(poster_id) = filter.poster_id {
        builder.push(" AND poster_id = ").push_bind(poster_id);
    }
    if let Some(driver_id) = filter.assigned_to {
        builder.push(" AND assigned_to = ").push_bind(driver_id);
    }
    if let Some(statuses) = &filter.statuses {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        builder.push(" AND status = ANY(").push_bind(names).push(")");
    }
    builder.push(match query.order {
        SortOrder::NewestFirst => " ORDER BY created_at DESC, id DESC",
        SortOrder::OldestFirst => " ORDER BY created_at ASC, id ASC",
    });
    if let Some(limit) = query.limit {
        builder.push(" LIMIT ").push_bind(limit as i64);
    }
    builder
}

async fn fetch_rides(pool: &PgPool, query: &RideQuery) -> PortResult<Vec<Ride>> {
    let mut builder = build_ride_query(query);
    let records: Vec<RideRecord> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_error)?;
    records.into_iter().map(RideRecord::to_domain).collect()
}

async fn fetch_presence(pool: &PgPool, driver_id: ActorId) -> PortResult<Option<DriverPresence>> {
    let record: Option<PresenceRecord> = sqlx::query_as(queries::SELECT_PRESENCE)
        .bind(driver_id)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(record.map(PresenceRecord::to_domain))
}

//=========================================================================================
// `RideStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl RideStore for DbAdapter {
    async fn create_ride(&self, draft: RideDraft) -> PortResult<Ride> {
        let record: RideRecord = sqlx::query_as(queries::INSERT_RIDE)
            .bind(Uuid::new_v4())
            .bind(draft.poster_id)
            .bind(&draft.poster_display_name)
            .bind(&draft.pickup)
            .bind(&draft.drop)
            .bind(&draft.date)
            .bind(&draft.time)
            .bind(draft.price)
            .bind(&draft.car_type)
            .bind(draft.trip_type.as_str())
            .bind(&draft.description)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        record.to_domain()
    }

    async fn get_ride(&self, ride_id: RideId) -> PortResult<Ride> {
        let record: RideRecord = sqlx::query_as(queries::SELECT_RIDE_BY_ID)
            .bind(ride_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("Ride {} not found", ride_id)),
                _ => map_sqlx_error(e),
            })?;
        record.to_domain()
    }

    async fn update_ride_fields(
        &self,
        ride_id: RideId,
        patch: RidePatch,
        expected_status: Option<RideStatus>,
    ) -> PortResult<Ride> {
        let writes_assignment = patch.assignment.is_some();
        let assignee = patch.assignment.flatten();
        let updated: Option<RideRecord> = sqlx::query_as(queries::UPDATE_RIDE_FIELDS)
            .bind(ride_id)
            .bind(patch.status.map(RideStatus::as_str))
            .bind(writes_assignment)
            .bind(assignee.as_ref().map(|a| a.driver_id))
            .bind(assignee.as_ref().map(|a| a.display_name.clone()))
            .bind(expected_status.map(RideStatus::as_str))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if let Some(record) = updated {
            return record.to_domain();
        }

        // Nothing matched: either the ride is gone or the precondition lost.
        let current: Option<String> = sqlx::query_scalar(queries::SELECT_RIDE_STATUS)
            .bind(ride_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        match (current, expected_status) {
            (None, _) => Err(PortError::NotFound(format!("Ride {} not found", ride_id))),
            (Some(actual), Some(expected)) => Err(PortError::PreconditionFailed {
                expected,
                actual: parse_status(&actual)?,
            }),
            (Some(_), None) => {
                warn!(%ride_id, "Unconditional ride update matched no row");
                Err(PortError::Unexpected(format!(
                    "Update of ride {} matched no row",
                    ride_id
                )))
            }
        }
    }

    async fn fetch_rides(&self, query: &RideQuery) -> PortResult<Vec<Ride>> {
        fetch_rides(&self.pool, query).await
    }

    async fn subscribe_rides(&self, query: RideQuery) -> PortResult<RideSnapshots> {
        let events = self.events(queries::RIDE_CHANGES_CHANNEL)?;
        let pool = self.pool.clone();
        // A single-ride view only wakes for its own id; any other query can
        // gain or lose members on every change.
        let watched = query.filter.ride_id.map(|id| id.to_string());
        let relevant = move |payload: &str| watched.as_deref().map_or(true, |id| id == payload);
        let load = move || {
            let pool = pool.clone();
            let query = query.clone();
            async move { fetch_rides(&pool, &query).await }.boxed()
        };
        Ok(live_query(
            events,
            self.listener_retry,
            relevant,
            load,
        ))
    }
}

//=========================================================================================
// `PresenceStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl PresenceStore for DbAdapter {
    async fn set_online(&self, driver_id: ActorId, display_name: &str) -> PortResult<()> {
        sqlx::query(queries::UPSERT_PRESENCE_ONLINE)
            .bind(driver_id)
            .bind(display_name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn set_offline(&self, driver_id: ActorId) -> PortResult<()> {
        sqlx::query(queries::UPSERT_PRESENCE_OFFLINE)
            .bind(driver_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn report_location(&self, driver_id: ActorId, location: GeoPoint) -> PortResult<()> {
        sqlx::query(queries::UPSERT_PRESENCE_LOCATION)
            .bind(driver_id)
            .bind(location.latitude)
            .bind(location.longitude)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_presence(&self, driver_id: ActorId) -> PortResult<DriverPresence> {
        fetch_presence(&self.pool, driver_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Driver {} not found", driver_id)))
    }

    async fn subscribe_location(&self, driver_id: ActorId) -> PortResult<LocationUpdates> {
        let events = self.events(queries::PRESENCE_CHANGES_CHANNEL)?;
        let pool = self.pool.clone();
        let watched = driver_id.to_string();
        let relevant = move |payload: &str| payload == watched;
        let load = move || {
            let pool = pool.clone();
            async move {
                Ok(fetch_presence(&pool, driver_id)
                    .await?
                    .and_then(|presence| presence.location))
            }
            .boxed()
        };
        Ok(live_query(
            events,
            self.listener_retry,
            relevant,
            load,
        ))
    }
}

//=========================================================================================
// `IdentityProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl IdentityProvider for DbAdapter {
    async fn resolve_actor(&self, credential: &str) -> PortResult<Actor> {
        let record: Option<ActorRecord> = sqlx::query_as(queries::SELECT_SESSION_ACTOR)
            .bind(credential)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        record
            .map(ActorRecord::to_domain)
            .ok_or(PortError::Unauthorized)
    }
}
