//! Shared fixtures for the core unit tests.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Actor, AuthContext, NewRide, Ride, Role};
use crate::memory::InMemoryRideStore;
use crate::rides::RideService;

pub fn actor(name: &str, role: Option<Role>) -> AuthContext {
    AuthContext::authenticated(Actor {
        id: Uuid::new_v4(),
        display_name: name.to_string(),
        role,
    })
}

pub fn driver(name: &str) -> AuthContext {
    actor(name, Some(Role::Driver))
}

pub fn passenger(name: &str) -> AuthContext {
    actor(name, Some(Role::Passenger))
}

pub fn actor_id(ctx: &AuthContext) -> Uuid {
    ctx.actor().map(|a| a.id).unwrap_or_default()
}

pub fn new_ride(pickup: &str, drop: &str, price: &str) -> NewRide {
    NewRide {
        pickup: pickup.to_string(),
        drop: drop.to_string(),
        date: "2024-05-01".to_string(),
        time: "09:30".to_string(),
        price: price.to_string(),
        ..NewRide::default()
    }
}

pub async fn post_ride(store: &Arc<InMemoryRideStore>, poster: &AuthContext) -> Ride {
    RideService::new(store.clone())
        .create_ride(poster, new_ride("Ahmedabad", "Surat", "500"))
        .await
        .unwrap()
}
