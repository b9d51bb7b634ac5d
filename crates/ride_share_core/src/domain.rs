//! crates/ride_share_core/src/domain.rs
//!
//! Defines the pure, core data structures for the ride lifecycle.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

pub type RideId = Uuid;
pub type ActorId = Uuid;

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Lowercases and folds spaces/dashes so "Round Trip" and "round-trip" parse alike.
fn normalize_token(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

//=========================================================================================
// Ride Status
//=========================================================================================

/// Lifecycle state of a ride.
///
/// `Pending` is initial; `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RideStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub const ALL: [RideStatus; 5] = [
        RideStatus::Pending,
        RideStatus::Accepted,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses in which a ride must carry an assigned driver.
    pub fn is_assigned(self) -> bool {
        matches!(
            self,
            RideStatus::Accepted | RideStatus::InProgress | RideStatus::Completed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "pending" => Ok(RideStatus::Pending),
            "accepted" => Ok(RideStatus::Accepted),
            "in_progress" => Ok(RideStatus::InProgress),
            "completed" => Ok(RideStatus::Completed),
            "cancelled" => Ok(RideStatus::Cancelled),
            _ => Err(ParseEnumError {
                kind: "ride status",
                value: s.to_string(),
            }),
        }
    }
}

//=========================================================================================
// Roles and Trip Types
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Driver,
    Passenger,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::Passenger => "passenger",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "driver" => Ok(Role::Driver),
            "passenger" => Ok(Role::Passenger),
            _ => Err(ParseEnumError {
                kind: "role",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TripType {
    #[default]
    OneWay,
    RoundTrip,
}

impl TripType {
    pub fn as_str(self) -> &'static str {
        match self {
            TripType::OneWay => "one_way",
            TripType::RoundTrip => "round_trip",
        }
    }
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "one_way" => Ok(TripType::OneWay),
            "round_trip" => Ok(TripType::RoundTrip),
            _ => Err(ParseEnumError {
                kind: "trip type",
                value: s.to_string(),
            }),
        }
    }
}

//=========================================================================================
// Rides
//=========================================================================================

/// The driver holding a ride, with their name as it was when they claimed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignee {
    pub driver_id: ActorId,
    pub display_name: String,
}

/// A posted ride as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Ride {
    pub id: RideId,
    pub poster_id: ActorId,
    /// Poster's name at creation time. Not re-synced with later profile edits.
    pub poster_display_name: String,
    pub pickup: String,
    pub drop: String,
    pub date: String,
    pub time: String,
    pub price: f64,
    pub car_type: Option<String>,
    pub trip_type: TripType,
    pub description: Option<String>,
    pub status: RideStatus,
    pub assigned_to: Option<ActorId>,
    pub assigned_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Ride {
    /// Materializes a freshly stored ride from a validated draft.
    pub fn from_draft(draft: RideDraft, id: RideId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            poster_id: draft.poster_id,
            poster_display_name: draft.poster_display_name,
            pickup: draft.pickup,
            drop: draft.drop,
            date: draft.date,
            time: draft.time,
            price: draft.price,
            car_type: draft.car_type,
            trip_type: draft.trip_type,
            description: draft.description,
            status: RideStatus::Pending,
            assigned_to: None,
            assigned_name: None,
            created_at,
        }
    }

    /// `assigned_to` is set exactly when the status is one of the assigned states.
    pub fn assignment_is_consistent(&self) -> bool {
        self.assigned_to.is_some() == self.status.is_assigned()
    }

    pub fn is_participant(&self, actor_id: ActorId) -> bool {
        self.poster_id == actor_id || self.assigned_to == Some(actor_id)
    }
}

/// Raw ride fields as submitted by a poster, before validation.
#[derive(Debug, Clone, Default)]
pub struct NewRide {
    pub pickup: String,
    pub drop: String,
    pub date: String,
    pub time: String,
    pub price: String,
    pub car_type: Option<String>,
    pub trip_type: Option<String>,
    pub description: Option<String>,
}

/// Validated ride fields ready to be handed to a `RideStore`.
#[derive(Debug, Clone, PartialEq)]
pub struct RideDraft {
    pub poster_id: ActorId,
    pub poster_display_name: String,
    pub pickup: String,
    pub drop: String,
    pub date: String,
    pub time: String,
    pub price: f64,
    pub car_type: Option<String>,
    pub trip_type: TripType,
    pub description: Option<String>,
}

/// A field-level change to a ride. Only status and assignment are ever patched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RidePatch {
    pub status: Option<RideStatus>,
    /// `Some(None)` clears the assignment, `None` leaves it untouched.
    pub assignment: Option<Option<Assignee>>,
}

impl RidePatch {
    pub fn status(status: RideStatus) -> Self {
        Self {
            status: Some(status),
            assignment: None,
        }
    }

    pub fn assign(status: RideStatus, assignee: Assignee) -> Self {
        Self {
            status: Some(status),
            assignment: Some(Some(assignee)),
        }
    }

    pub fn release(status: RideStatus) -> Self {
        Self {
            status: Some(status),
            assignment: Some(None),
        }
    }

    pub fn apply_to(&self, ride: &mut Ride) {
        if let Some(status) = self.status {
            ride.status = status;
        }
        if let Some(assignment) = &self.assignment {
            match assignment {
                Some(assignee) => {
                    ride.assigned_to = Some(assignee.driver_id);
                    ride.assigned_name = Some(assignee.display_name.clone());
                }
                None => {
                    ride.assigned_to = None;
                    ride.assigned_name = None;
                }
            }
        }
    }
}

//=========================================================================================
// Driver Presence
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A driver's online flag and last-known location.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverPresence {
    pub driver_id: ActorId,
    pub display_name: Option<String>,
    pub is_online: bool,
    pub location: Option<GeoPoint>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl DriverPresence {
    pub fn offline(driver_id: ActorId) -> Self {
        Self {
            driver_id,
            display_name: None,
            is_online: false,
            location: None,
            last_seen_at: None,
        }
    }
}

//=========================================================================================
// Actors and the per-call auth context
//=========================================================================================

// Represents an authenticated account - resolved by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub display_name: String,
    /// `None` when the profile has no role, or one this service does not recognise.
    pub role: Option<Role>,
}

impl Actor {
    pub fn is_driver(&self) -> bool {
        self.role == Some(Role::Driver)
    }
}

/// The caller of a core operation. Passed explicitly into every service call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    actor: Option<Actor>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self { actor: None }
    }

    pub fn authenticated(actor: Actor) -> Self {
        Self { actor: Some(actor) }
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    pub fn require_actor(&self) -> Result<&Actor, CoreError> {
        self.actor.as_ref().ok_or(CoreError::AuthRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pending", RideStatus::Pending)]
    #[case("in_progress", RideStatus::InProgress)]
    #[case("In Progress", RideStatus::InProgress)]
    #[case("CANCELLED", RideStatus::Cancelled)]
    fn ride_status_parses_loose_spellings(#[case] raw: &str, #[case] expected: RideStatus) {
        assert_eq!(raw.parse::<RideStatus>(), Ok(expected));
    }

    #[rstest]
    fn ride_status_rejects_unknown_values() {
        let err = "archived".parse::<RideStatus>().unwrap_err();
        assert_eq!(err.kind, "ride status");
        assert_eq!(err.value, "archived");
    }

    #[rstest]
    #[case("One Way", TripType::OneWay)]
    #[case("round_trip", TripType::RoundTrip)]
    #[case("Round-Trip", TripType::RoundTrip)]
    fn trip_type_accepts_form_labels(#[case] raw: &str, #[case] expected: TripType) {
        assert_eq!(raw.parse::<TripType>(), Ok(expected));
    }

    #[rstest]
    fn only_assigned_statuses_require_a_driver() {
        let assigned: Vec<_> = RideStatus::ALL
            .into_iter()
            .filter(|s| s.is_assigned())
            .collect();
        assert_eq!(
            assigned,
            vec![
                RideStatus::Accepted,
                RideStatus::InProgress,
                RideStatus::Completed
            ]
        );
    }

    #[rstest]
    fn release_patch_clears_assignment() {
        let draft = RideDraft {
            poster_id: Uuid::new_v4(),
            poster_display_name: "Asha".to_string(),
            pickup: "Ahmedabad".to_string(),
            drop: "Surat".to_string(),
            date: "2024-05-01".to_string(),
            time: "09:00".to_string(),
            price: 500.0,
            car_type: None,
            trip_type: TripType::OneWay,
            description: None,
        };
        let mut ride = Ride::from_draft(draft, Uuid::new_v4(), Utc::now());
        let driver = Assignee {
            driver_id: Uuid::new_v4(),
            display_name: "Ravi".to_string(),
        };

        RidePatch::assign(RideStatus::Accepted, driver.clone()).apply_to(&mut ride);
        assert_eq!(ride.assigned_to, Some(driver.driver_id));
        assert_eq!(ride.assigned_name, Some(driver.display_name));
        assert!(ride.assignment_is_consistent());

        RidePatch::release(RideStatus::Cancelled).apply_to(&mut ride);
        assert_eq!(ride.assigned_to, None);
        assert_eq!(ride.assigned_name, None);
        assert!(ride.assignment_is_consistent());
    }

    #[rstest]
    fn anonymous_context_requires_login() {
        let ctx = AuthContext::anonymous();
        assert!(matches!(ctx.require_actor(), Err(CoreError::AuthRequired)));
    }
}
