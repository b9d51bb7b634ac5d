pub mod assignment;
pub mod domain;
pub mod error;
pub mod feeds;
pub mod memory;
pub mod ports;
pub mod presence;
pub mod query;
pub mod rides;
pub mod subscription;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use assignment::{AssignmentPolicy, AssignmentService};
pub use domain::{
    Actor, ActorId, Assignee, AuthContext, DriverPresence, GeoPoint, NewRide, Ride, RideDraft,
    RideId, RidePatch, RideStatus, Role, TripType,
};
pub use error::{CoreError, CoreResult};
pub use feeds::{AvailableScope, FeedKind, RideFeeds};
pub use ports::{
    IdentityProvider, LocationUpdates, PortError, PortResult, PresenceStore, RideSnapshots,
    RideStore,
};
pub use presence::{PresenceService, TrackingSession};
pub use query::{RideFilter, RideQuery, SortOrder};
pub use rides::RideService;
pub use subscription::Subscription;
