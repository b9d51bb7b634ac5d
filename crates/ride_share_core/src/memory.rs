//! crates/ride_share_core/src/memory.rs
//!
//! In-process implementations of the store and identity ports. Writes are
//! serialized by a `tokio::sync::RwLock`, so the conditional update is a single
//! critical section. Every write bumps a `watch` channel that live
//! subscriptions wait on before re-reading their query.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{
    Actor, ActorId, DriverPresence, GeoPoint, Ride, RideDraft, RideId, RidePatch, RideStatus,
};
use crate::ports::{
    IdentityProvider, LocationUpdates, PortError, PortResult, PresenceStore, RideSnapshots,
    RideStore,
};
use crate::query::RideQuery;
use crate::subscription::Subscription;

//=========================================================================================
// Rides
//=========================================================================================

#[derive(Default)]
struct RideTable {
    rides: HashMap<RideId, Ride>,
    last_created_at: Option<DateTime<Utc>>,
}

impl RideTable {
    /// Creation stamps strictly increase so feed order is stable.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(stamp);
        stamp
    }
}

pub struct InMemoryRideStore {
    table: Arc<RwLock<RideTable>>,
    changes: watch::Sender<u64>,
}

impl InMemoryRideStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            table: Arc::new(RwLock::new(RideTable::default())),
            changes,
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

impl Default for InMemoryRideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RideStore for InMemoryRideStore {
    async fn create_ride(&self, draft: RideDraft) -> PortResult<Ride> {
        let ride = {
            let mut table = self.table.write().await;
            let created_at = table.next_created_at();
            let ride = Ride::from_draft(draft, Uuid::new_v4(), created_at);
            table.rides.insert(ride.id, ride.clone());
            ride
        };
        self.notify();
        Ok(ride)
    }

    async fn get_ride(&self, ride_id: RideId) -> PortResult<Ride> {
        self.table
            .read()
            .await
            .rides
            .get(&ride_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Ride {} not found", ride_id)))
    }

    async fn update_ride_fields(
        &self,
        ride_id: RideId,
        patch: RidePatch,
        expected_status: Option<RideStatus>,
    ) -> PortResult<Ride> {
        let updated = {
            let mut table = self.table.write().await;
            let ride = table
                .rides
                .get_mut(&ride_id)
                .ok_or_else(|| PortError::NotFound(format!("Ride {} not found", ride_id)))?;
            if let Some(expected) = expected_status {
                if ride.status != expected {
                    return Err(PortError::PreconditionFailed {
                        expected,
                        actual: ride.status,
                    });
                }
            }
            patch.apply_to(ride);
            ride.clone()
        };
        self.notify();
        Ok(updated)
    }

    async fn fetch_rides(&self, query: &RideQuery) -> PortResult<Vec<Ride>> {
        Ok(query.apply(self.table.read().await.rides.values()))
    }

    async fn subscribe_rides(&self, query: RideQuery) -> PortResult<RideSnapshots> {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let table = self.table.clone();
        let mut changes = self.changes.subscribe();

        let snapshots = async_stream::stream! {
            let mut last: Option<Vec<Ride>> = None;
            loop {
                changes.borrow_and_update();
                let snapshot = query.apply(table.read().await.rides.values());
                if last.as_ref() != Some(&snapshot) {
                    last = Some(snapshot.clone());
                    yield Ok(snapshot);
                }
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        };
        Ok(Subscription::new(snapshots, token))
    }
}

//=========================================================================================
// Driver presence
//=========================================================================================

pub struct InMemoryPresenceStore {
    drivers: Arc<RwLock<HashMap<ActorId, DriverPresence>>>,
    changes: watch::Sender<u64>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            drivers: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    async fn merge(&self, driver_id: ActorId, update: impl FnOnce(&mut DriverPresence)) {
        {
            let mut drivers = self.drivers.write().await;
            let entry = drivers
                .entry(driver_id)
                .or_insert_with(|| DriverPresence::offline(driver_id));
            update(entry);
        }
        self.changes.send_modify(|version| *version += 1);
    }
}

impl Default for InMemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn set_online(&self, driver_id: ActorId, display_name: &str) -> PortResult<()> {
        let name = display_name.to_string();
        self.merge(driver_id, |p| {
            p.display_name = Some(name);
            p.is_online = true;
            p.last_seen_at = Some(Utc::now());
        })
        .await;
        Ok(())
    }

    async fn set_offline(&self, driver_id: ActorId) -> PortResult<()> {
        self.merge(driver_id, |p| p.is_online = false).await;
        Ok(())
    }

    async fn report_location(&self, driver_id: ActorId, location: GeoPoint) -> PortResult<()> {
        self.merge(driver_id, |p| {
            p.location = Some(location);
            p.last_seen_at = Some(Utc::now());
        })
        .await;
        Ok(())
    }

    async fn get_presence(&self, driver_id: ActorId) -> PortResult<DriverPresence> {
        self.drivers
            .read()
            .await
            .get(&driver_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Driver {} not found", driver_id)))
    }

    async fn subscribe_location(&self, driver_id: ActorId) -> PortResult<LocationUpdates> {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let drivers = self.drivers.clone();
        let mut changes = self.changes.subscribe();

        let locations = async_stream::stream! {
            let mut last: Option<Option<GeoPoint>> = None;
            loop {
                changes.borrow_and_update();
                let location = drivers
                    .read()
                    .await
                    .get(&driver_id)
                    .and_then(|p| p.location);
                if last != Some(location) {
                    last = Some(location);
                    yield Ok(location);
                }
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        };
        Ok(Subscription::new(locations, token))
    }
}

//=========================================================================================
// Identity
//=========================================================================================

/// Maps fixed credentials to actors. Useful for tests and local runs.
#[derive(Default, Clone)]
pub struct InMemoryIdentityProvider {
    sessions: HashMap<String, Actor>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, credential: impl Into<String>, actor: Actor) -> Self {
        self.sessions.insert(credential.into(), actor);
        self
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn resolve_actor(&self, credential: &str) -> PortResult<Actor> {
        self.sessions
            .get(credential)
            .cloned()
            .ok_or(PortError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Assignee, TripType};
    use crate::query::RideFilter;
    use futures::StreamExt;
    use std::time::Duration as StdDuration;

    fn draft(poster_id: ActorId) -> RideDraft {
        RideDraft {
            poster_id,
            poster_display_name: "Asha".to_string(),
            pickup: "Vadodara".to_string(),
            drop: "Bhavnagar".to_string(),
            date: "2024-07-01".to_string(),
            time: "18:00".to_string(),
            price: 320.0,
            car_type: Some("Hatchback".to_string()),
            trip_type: TripType::OneWay,
            description: None,
        }
    }

    #[tokio::test]
    async fn creation_stamps_strictly_increase() {
        let store = InMemoryRideStore::new();
        let poster = Uuid::new_v4();
        let mut stamps = Vec::new();
        for _ in 0..20 {
            stamps.push(store.create_ride(draft(poster)).await.unwrap().created_at);
        }
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn conditional_update_reports_actual_status() {
        let store = InMemoryRideStore::new();
        let ride = store.create_ride(draft(Uuid::new_v4())).await.unwrap();

        let err = store
            .update_ride_fields(
                ride.id,
                RidePatch::status(RideStatus::Completed),
                Some(RideStatus::Accepted),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PortError::PreconditionFailed {
                expected: RideStatus::Accepted,
                actual: RideStatus::Pending
            }
        ));
        assert_eq!(store.get_ride(ride.id).await.unwrap().status, RideStatus::Pending);
    }

    #[tokio::test]
    async fn unconditional_update_of_missing_ride_is_not_found() {
        let store = InMemoryRideStore::new();
        let err = store
            .update_ride_fields(Uuid::new_v4(), RidePatch::status(RideStatus::Cancelled), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn subscription_emits_after_each_matching_change() {
        let store = InMemoryRideStore::new();
        let poster = Uuid::new_v4();
        let mut live = store
            .subscribe_rides(RideQuery::new(RideFilter::all().posted_by(poster)))
            .await
            .unwrap();
        let wait = StdDuration::from_secs(1);

        let first = tokio::time::timeout(wait, live.next()).await.unwrap().unwrap().unwrap();
        assert!(first.is_empty());

        let ride = store.create_ride(draft(poster)).await.unwrap();
        let second = tokio::time::timeout(wait, live.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(second, vec![ride.clone()]);

        let driver = Assignee {
            driver_id: Uuid::new_v4(),
            display_name: "Ravi".to_string(),
        };
        store
            .update_ride_fields(
                ride.id,
                RidePatch::assign(RideStatus::Accepted, driver),
                Some(RideStatus::Pending),
            )
            .await
            .unwrap();
        let third = tokio::time::timeout(wait, live.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(third[0].status, RideStatus::Accepted);
    }

    #[tokio::test]
    async fn unrelated_writes_do_not_produce_duplicate_snapshots() {
        let store = InMemoryRideStore::new();
        let me = Uuid::new_v4();
        let mut live = store
            .subscribe_rides(RideQuery::new(RideFilter::all().posted_by(me)))
            .await
            .unwrap();
        let wait = StdDuration::from_millis(200);
        tokio::time::timeout(wait, live.next()).await.unwrap();

        store.create_ride(draft(Uuid::new_v4())).await.unwrap();
        assert!(tokio::time::timeout(wait, live.next()).await.is_err());
    }

    #[tokio::test]
    async fn presence_merges_preserve_location() {
        let store = InMemoryPresenceStore::new();
        let driver = Uuid::new_v4();
        let point = GeoPoint {
            latitude: 22.3,
            longitude: 73.1,
        };

        store.report_location(driver, point).await.unwrap();
        store.set_online(driver, "Ravi").await.unwrap();
        store.set_offline(driver).await.unwrap();

        let presence = store.get_presence(driver).await.unwrap();
        assert!(!presence.is_online);
        assert_eq!(presence.location, Some(point));
        assert_eq!(presence.display_name.as_deref(), Some("Ravi"));
    }

    #[tokio::test]
    async fn unknown_credentials_are_unauthorized() {
        let actor = Actor {
            id: Uuid::new_v4(),
            display_name: "Ravi".to_string(),
            role: None,
        };
        let identity = InMemoryIdentityProvider::new().with_session("token-1", actor.clone());

        assert_eq!(identity.resolve_actor("token-1").await.unwrap(), actor);
        assert!(matches!(
            identity.resolve_actor("token-2").await,
            Err(PortError::Unauthorized)
        ));
    }
}
