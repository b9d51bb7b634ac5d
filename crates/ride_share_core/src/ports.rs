//! crates/ride_share_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of a specific document store or identity provider.

use async_trait::async_trait;

use crate::domain::{
    Actor, ActorId, DriverPresence, GeoPoint, Ride, RideDraft, RideId, RidePatch, RideStatus,
};
use crate::query::RideQuery;
use crate::subscription::Subscription;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A conditional write found a different status than the caller expected.
    #[error("Precondition failed: expected status {expected}, found {actual}")]
    PreconditionFailed {
        expected: RideStatus,
        actual: RideStatus,
    },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Backend unreachable: {0}")]
    Connectivity(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Live ride snapshots. Every item is the full matching set at that moment.
pub type RideSnapshots = Subscription<PortResult<Vec<Ride>>>;

/// Live location of one driver; `None` until the first report arrives.
pub type LocationUpdates = Subscription<PortResult<Option<GeoPoint>>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait RideStore: Send + Sync {
    /// Stores a new ride as `pending` and unassigned, stamping id and `created_at`.
    async fn create_ride(&self, draft: RideDraft) -> PortResult<Ride>;

    async fn get_ride(&self, ride_id: RideId) -> PortResult<Ride>;

    /// Applies `patch` atomically. With `expected_status` set, the write only
    /// happens if the stored status still equals it at write time.
    async fn update_ride_fields(
        &self,
        ride_id: RideId,
        patch: RidePatch,
        expected_status: Option<RideStatus>,
    ) -> PortResult<Ride>;

    async fn fetch_rides(&self, query: &RideQuery) -> PortResult<Vec<Ride>>;

    /// Starts with the current snapshot and emits a new one after every change.
    async fn subscribe_rides(&self, query: RideQuery) -> PortResult<RideSnapshots>;
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Merges name, online flag and `last_seen_at`; keeps any stored location.
    async fn set_online(&self, driver_id: ActorId, display_name: &str) -> PortResult<()>;

    /// Merges only the online flag.
    async fn set_offline(&self, driver_id: ActorId) -> PortResult<()>;

    /// Merges only the location and `last_seen_at`.
    async fn report_location(&self, driver_id: ActorId, location: GeoPoint) -> PortResult<()>;

    async fn get_presence(&self, driver_id: ActorId) -> PortResult<DriverPresence>;

    async fn subscribe_location(&self, driver_id: ActorId) -> PortResult<LocationUpdates>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves a session credential issued by the external auth system.
    /// Unknown or expired credentials yield `PortError::Unauthorized`.
    async fn resolve_actor(&self, credential: &str) -> PortResult<Actor>;
}
