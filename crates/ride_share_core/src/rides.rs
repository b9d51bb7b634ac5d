//! crates/ride_share_core/src/rides.rs
//!
//! Ride posting and point reads.

use std::sync::Arc;
use tracing::info;

use crate::domain::{AuthContext, NewRide, Ride, RideId};
use crate::error::CoreResult;
use crate::ports::RideStore;
use crate::validation::validate_new_ride;

#[derive(Clone)]
pub struct RideService {
    store: Arc<dyn RideStore>,
}

impl RideService {
    pub fn new(store: Arc<dyn RideStore>) -> Self {
        Self { store }
    }

    /// Posts a ride as the current actor. Any authenticated actor may post.
    pub async fn create_ride(&self, ctx: &AuthContext, input: NewRide) -> CoreResult<Ride> {
        let poster = ctx.require_actor()?;
        let draft = validate_new_ride(&input, poster)?;
        let ride = self.store.create_ride(draft).await?;
        info!(ride_id = %ride.id, poster_id = %ride.poster_id, "Ride posted");
        Ok(ride)
    }

    pub async fn get_ride(&self, ctx: &AuthContext, ride_id: RideId) -> CoreResult<Ride> {
        ctx.require_actor()?;
        Ok(self.store.get_ride(ride_id).await?)
    }
}
