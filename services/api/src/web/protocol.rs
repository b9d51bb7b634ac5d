//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between a client and the API server
//! for live ride feeds and driver tracking.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::web::presence::LocationDto;
use crate::web::rest::RideResponse;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// A live feed a client can open. Unit feeds are plain strings
/// (`"available"`); feeds about one ride carry its id
/// (`{"ride": {"ride_id": "..."}}`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedRequest {
    Available,
    Accepted,
    Upcoming,
    Ride { ride_id: Uuid },
    /// Location of the driver assigned to the ride.
    DriverLocation { ride_id: Uuid },
}

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a live feed. The server answers with `subscribed` followed by the
    /// current snapshot.
    Subscribe { feed: FeedRequest },

    /// Closes a feed opened on this connection.
    Unsubscribe { subscription_id: Uuid },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms a feed is open and names it for later `unsubscribe`.
    Subscribed {
        subscription_id: Uuid,
        feed: FeedRequest,
    },

    /// The complete current contents of a ride feed.
    RideSnapshot {
        subscription_id: Uuid,
        rides: Vec<RideResponse>,
    },

    /// The tracked driver's last known position, `null` until one is reported.
    DriverLocation {
        subscription_id: Uuid,
        location: Option<LocationDto>,
    },

    Unsubscribed { subscription_id: Uuid },

    /// A failed request, or a transient error on an open feed. Feeds keep
    /// running after transient errors.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        subscription_id: Option<Uuid>,
        code: String,
        message: String,
    },
}
