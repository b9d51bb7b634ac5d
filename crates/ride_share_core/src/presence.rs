//! crates/ride_share_core/src/presence.rs
//!
//! Driver online/offline state and location reporting, plus the rider-side
//! view of the assigned driver's location.

use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{Actor, ActorId, AuthContext, DriverPresence, RideId, RideStatus};
use crate::error::{CoreError, CoreResult};
use crate::ports::{LocationUpdates, PresenceStore, RideStore};
use crate::query::{RideFilter, RideQuery};
use crate::validation::validate_location;

#[derive(Clone)]
pub struct PresenceService {
    presence: Arc<dyn PresenceStore>,
    rides: Arc<dyn RideStore>,
}

/// Handle for a driver who is online and sharing location.
pub struct TrackingSession {
    service: PresenceService,
    driver_id: ActorId,
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("driver_id", &self.driver_id)
            .finish_non_exhaustive()
    }
}

impl TrackingSession {
    pub fn driver_id(&self) -> ActorId {
        self.driver_id
    }

    pub async fn report(&self, latitude: f64, longitude: f64) -> CoreResult<()> {
        self.service
            .record_location(self.driver_id, latitude, longitude)
            .await
    }

    /// Ends the session and marks the driver offline.
    pub async fn stop(self) -> CoreResult<()> {
        self.service.presence.set_offline(self.driver_id).await?;
        info!(driver_id = %self.driver_id, "Driver went offline");
        Ok(())
    }
}

fn require_driver(ctx: &AuthContext) -> CoreResult<&Actor> {
    let actor = ctx.require_actor()?;
    if !actor.is_driver() {
        return Err(CoreError::Forbidden(
            "only drivers can share their location".to_string(),
        ));
    }
    Ok(actor)
}

impl PresenceService {
    pub fn new(presence: Arc<dyn PresenceStore>, rides: Arc<dyn RideStore>) -> Self {
        Self { presence, rides }
    }

    /// Marks the calling driver online and opens a tracking session.
    pub async fn start_tracking(&self, ctx: &AuthContext) -> CoreResult<TrackingSession> {
        let driver = require_driver(ctx)?;
        self.presence
            .set_online(driver.id, &driver.display_name)
            .await?;
        info!(driver_id = %driver.id, "Driver went online");
        Ok(TrackingSession {
            service: self.clone(),
            driver_id: driver.id,
        })
    }

    pub async fn go_offline(&self, ctx: &AuthContext) -> CoreResult<()> {
        let driver = require_driver(ctx)?;
        TrackingSession {
            service: self.clone(),
            driver_id: driver.id,
        }
        .stop()
        .await
    }

    /// Stores a location report for the calling driver. The driver must be online.
    pub async fn report_location(
        &self,
        ctx: &AuthContext,
        latitude: f64,
        longitude: f64,
    ) -> CoreResult<()> {
        let driver = require_driver(ctx)?;
        self.record_location(driver.id, latitude, longitude).await
    }

    async fn record_location(&self, driver_id: ActorId, latitude: f64, longitude: f64) -> CoreResult<()> {
        let point = validate_location(latitude, longitude)?;
        let online = match self.presence.get_presence(driver_id).await {
            Ok(presence) => presence.is_online,
            Err(crate::ports::PortError::NotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        if !online {
            return Err(CoreError::TrackingInactive);
        }
        self.presence.report_location(driver_id, point).await?;
        debug!(%driver_id, latitude, longitude, "Location recorded");
        Ok(())
    }

    /// Online state of any driver. The position is left out unless the
    /// caller may track the driver.
    pub async fn get_presence(&self, ctx: &AuthContext, driver_id: ActorId) -> CoreResult<DriverPresence> {
        let viewer = ctx.require_actor()?;
        let mut presence = self.presence.get_presence(driver_id).await?;
        if presence.location.is_some() && !self.may_see_location(viewer.id, driver_id).await? {
            presence.location = None;
        }
        Ok(presence)
    }

    /// Drivers see themselves; posters see the driver of their accepted or started ride.
    async fn may_see_location(&self, viewer: ActorId, driver_id: ActorId) -> CoreResult<bool> {
        if viewer == driver_id {
            return Ok(true);
        }
        let shared = RideQuery::new(
            RideFilter::all()
                .posted_by(viewer)
                .assigned_to(driver_id)
                .with_statuses([RideStatus::Accepted, RideStatus::InProgress]),
        )
        .limit(1);
        Ok(!self.rides.fetch_rides(&shared).await?.is_empty())
    }

    /// Live location of the driver assigned to `ride_id`, for the ride's poster
    /// or the driver themselves.
    pub async fn track_assigned_driver(
        &self,
        ctx: &AuthContext,
        ride_id: RideId,
    ) -> CoreResult<LocationUpdates> {
        let actor = ctx.require_actor()?;
        let ride = self.rides.get_ride(ride_id).await?;
        if !ride.is_participant(actor.id) {
            return Err(CoreError::Forbidden(
                "only the ride's participants can track its driver".to_string(),
            ));
        }
        let driver_id = ride.assigned_to.ok_or(CoreError::InvalidState(ride.status))?;
        Ok(self.presence.subscribe_location(driver_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::{AssignmentPolicy, AssignmentService};
    use crate::domain::GeoPoint;
    use crate::memory::{InMemoryPresenceStore, InMemoryRideStore};
    use crate::test_support::{actor_id, driver, passenger, post_ride};
    use futures::StreamExt;
    use std::time::Duration;

    struct Harness {
        rides: Arc<InMemoryRideStore>,
        presence: Arc<InMemoryPresenceStore>,
        service: PresenceService,
    }

    fn harness() -> Harness {
        let rides = Arc::new(InMemoryRideStore::new());
        let presence = Arc::new(InMemoryPresenceStore::new());
        let service = PresenceService::new(presence.clone(), rides.clone());
        Harness {
            rides,
            presence,
            service,
        }
    }

    #[tokio::test]
    async fn online_driver_reports_location() {
        let h = harness();
        let ravi = driver("Ravi");

        let session = h.service.start_tracking(&ravi).await.unwrap();
        session.report(23.02, 72.57).await.unwrap();

        let presence = h.presence.get_presence(actor_id(&ravi)).await.unwrap();
        assert!(presence.is_online);
        assert_eq!(presence.display_name.as_deref(), Some("Ravi"));
        assert_eq!(
            presence.location,
            Some(GeoPoint {
                latitude: 23.02,
                longitude: 72.57
            })
        );
        assert!(presence.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn reports_are_refused_without_a_session() {
        let h = harness();
        let ravi = driver("Ravi");

        let err = h.service.report_location(&ravi, 23.0, 72.0).await.unwrap_err();
        assert!(matches!(err, CoreError::TrackingInactive));

        let session = h.service.start_tracking(&ravi).await.unwrap();
        session.stop().await.unwrap();
        let err = h.service.report_location(&ravi, 23.0, 72.0).await.unwrap_err();
        assert!(matches!(err, CoreError::TrackingInactive));
    }

    #[tokio::test]
    async fn going_offline_keeps_the_last_location() {
        let h = harness();
        let ravi = driver("Ravi");
        let session = h.service.start_tracking(&ravi).await.unwrap();
        session.report(21.17, 72.83).await.unwrap();

        h.service.go_offline(&ravi).await.unwrap();
        h.service.start_tracking(&ravi).await.unwrap();

        let presence = h.presence.get_presence(actor_id(&ravi)).await.unwrap();
        assert!(presence.is_online);
        assert_eq!(presence.location.map(|p| p.latitude), Some(21.17));
    }

    #[tokio::test]
    async fn passengers_cannot_go_online() {
        let h = harness();
        let err = h
            .service
            .start_tracking(&passenger("Asha"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn poster_tracks_the_assigned_driver() {
        let h = harness();
        let asha = passenger("Asha");
        let ravi = driver("Ravi");
        let ride = post_ride(&h.rides, &asha).await;

        let err = h
            .service
            .track_assigned_driver(&asha, ride.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(RideStatus::Pending)));

        AssignmentService::new(h.rides.clone(), AssignmentPolicy::default())
            .accept_ride(&ravi, ride.id)
            .await
            .unwrap();
        let session = h.service.start_tracking(&ravi).await.unwrap();

        let mut updates = h.service.track_assigned_driver(&asha, ride.id).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), updates.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first, None);

        session.report(22.30, 70.80).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), updates.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.map(|p| p.longitude), Some(70.80));
    }

    #[tokio::test]
    async fn presence_hides_location_from_unrelated_callers() {
        let h = harness();
        let asha = passenger("Asha");
        let ravi = driver("Ravi");
        let ride = post_ride(&h.rides, &asha).await;
        h.service
            .start_tracking(&ravi)
            .await
            .unwrap()
            .report(22.30, 70.80)
            .await
            .unwrap();
        let driver_id = actor_id(&ravi);

        let own = h.service.get_presence(&ravi, driver_id).await.unwrap();
        assert!(own.location.is_some());

        let before = h.service.get_presence(&asha, driver_id).await.unwrap();
        assert!(before.is_online);
        assert_eq!(before.location, None);

        AssignmentService::new(h.rides.clone(), AssignmentPolicy::default())
            .accept_ride(&ravi, ride.id)
            .await
            .unwrap();
        let assigned = h.service.get_presence(&asha, driver_id).await.unwrap();
        assert_eq!(assigned.location.map(|p| p.latitude), Some(22.30));

        let stranger = h
            .service
            .get_presence(&passenger("Stranger"), driver_id)
            .await
            .unwrap();
        assert_eq!(stranger.location, None);
    }

    #[tokio::test]
    async fn strangers_cannot_track_a_driver() {
        let h = harness();
        let ride = post_ride(&h.rides, &passenger("Asha")).await;

        let err = h
            .service
            .track_assigned_driver(&passenger("Stranger"), ride.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }
}
