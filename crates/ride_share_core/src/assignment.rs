//! crates/ride_share_core/src/assignment.rs
//!
//! The ride state machine.
//!
//! ```text
//! pending --accept--> accepted --start--> in_progress --complete--> completed
//!    |                   |  \______________complete_______________/
//!    +------cancel-------+--cancel--> cancelled
//! ```
//!
//! Every transition is a conditional write on the status the guard read, so two
//! actors acting on the same ride cannot both win.

use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Assignee, AuthContext, Ride, RideId, RidePatch, RideStatus};
use crate::error::{CoreError, CoreResult};
use crate::ports::{PortError, RideStore};

/// Policy switches for the ride state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignmentPolicy {
    /// Lets a driver accept a ride they posted themselves.
    pub allow_self_acceptance: bool,
}

#[derive(Clone)]
pub struct AssignmentService {
    store: Arc<dyn RideStore>,
    policy: AssignmentPolicy,
}

impl AssignmentService {
    pub fn new(store: Arc<dyn RideStore>, policy: AssignmentPolicy) -> Self {
        Self { store, policy }
    }

    /// Claims a pending ride for the calling driver.
    ///
    /// At most one concurrent caller succeeds; the rest get `AlreadyTaken` and
    /// should refresh the ride rather than retry.
    pub async fn accept_ride(&self, ctx: &AuthContext, ride_id: RideId) -> CoreResult<Ride> {
        let driver = ctx.require_actor()?;
        if !driver.is_driver() {
            return Err(CoreError::Forbidden(
                "only drivers can accept rides".to_string(),
            ));
        }

        let ride = self.store.get_ride(ride_id).await?;
        if ride.status != RideStatus::Pending || ride.assigned_to.is_some() {
            info!(%ride_id, driver_id = %driver.id, status = %ride.status, "Ride no longer available");
            return Err(CoreError::AlreadyTaken);
        }
        if ride.poster_id == driver.id && !self.policy.allow_self_acceptance {
            return Err(CoreError::Forbidden(
                "drivers cannot accept their own rides".to_string(),
            ));
        }

        let patch = RidePatch::assign(
            RideStatus::Accepted,
            Assignee {
                driver_id: driver.id,
                display_name: driver.display_name.clone(),
            },
        );
        match self
            .store
            .update_ride_fields(ride_id, patch, Some(RideStatus::Pending))
            .await
        {
            Ok(accepted) => {
                info!(%ride_id, driver_id = %driver.id, "Ride accepted");
                Ok(accepted)
            }
            Err(PortError::PreconditionFailed { actual, .. }) => {
                info!(%ride_id, driver_id = %driver.id, status = %actual, "Lost acceptance race");
                Err(CoreError::AlreadyTaken)
            }
            Err(e) => {
                warn!(%ride_id, driver_id = %driver.id, error = %e, "Accept failed");
                Err(e.into())
            }
        }
    }

    /// Marks an accepted ride as under way. Only the assigned driver may do this.
    pub async fn start_ride(&self, ctx: &AuthContext, ride_id: RideId) -> CoreResult<Ride> {
        let driver = ctx.require_actor()?;
        let ride = self.store.get_ride(ride_id).await?;
        if ride.assigned_to != Some(driver.id) {
            return Err(CoreError::Forbidden(
                "only the assigned driver can start this ride".to_string(),
            ));
        }
        if ride.status != RideStatus::Accepted {
            return Err(CoreError::InvalidState(ride.status));
        }

        self.transition(ride, RidePatch::status(RideStatus::InProgress))
            .await
    }

    pub async fn complete_ride(&self, ctx: &AuthContext, ride_id: RideId) -> CoreResult<Ride> {
        let driver = ctx.require_actor()?;
        let ride = self.store.get_ride(ride_id).await?;
        if ride.assigned_to != Some(driver.id) {
            return Err(CoreError::Forbidden(
                "only the assigned driver can complete this ride".to_string(),
            ));
        }
        if !matches!(ride.status, RideStatus::Accepted | RideStatus::InProgress) {
            return Err(CoreError::InvalidState(ride.status));
        }

        self.transition(ride, RidePatch::status(RideStatus::Completed))
            .await
    }

    /// Cancels a pending ride (poster only) or an accepted one (poster or
    /// assignee). Cancelling releases the assignment.
    pub async fn cancel_ride(&self, ctx: &AuthContext, ride_id: RideId) -> CoreResult<Ride> {
        let actor = ctx.require_actor()?;
        let ride = self.store.get_ride(ride_id).await?;
        if ride.status.is_terminal() {
            return Err(CoreError::InvalidState(ride.status));
        }

        let allowed = match ride.status {
            RideStatus::Pending => ride.poster_id == actor.id,
            _ => ride.is_participant(actor.id),
        };
        if !allowed {
            return Err(CoreError::Forbidden(
                "only the ride's poster or assigned driver can cancel it".to_string(),
            ));
        }

        let patch = match ride.status {
            RideStatus::Pending => RidePatch::status(RideStatus::Cancelled),
            RideStatus::Accepted => RidePatch::release(RideStatus::Cancelled),
            other => return Err(CoreError::InvalidState(other)),
        };
        self.transition(ride, patch).await
    }

    async fn transition(&self, ride: Ride, patch: RidePatch) -> CoreResult<Ride> {
        let from = ride.status;
        let updated = self
            .store
            .update_ride_fields(ride.id, patch, Some(from))
            .await
            .map_err(|e| {
                let err = CoreError::from(e);
                if err.is_conflict() {
                    info!(ride_id = %ride.id, %from, error = %err, "Ride changed concurrently");
                } else {
                    warn!(ride_id = %ride.id, %from, error = %err, "Ride transition rejected");
                }
                err
            })?;
        info!(ride_id = %updated.id, %from, to = %updated.status, "Ride transitioned");
        Ok(updated)
    }
}
