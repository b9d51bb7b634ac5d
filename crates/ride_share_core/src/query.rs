//! crates/ride_share_core/src/query.rs
//!
//! Filter and ordering descriptions for ride reads. Store adapters translate a
//! `RideQuery` into their native query language; the in-memory adapter and the
//! tests evaluate it directly with [`RideQuery::apply`].

use std::cmp::Ordering;

use crate::domain::{ActorId, Ride, RideId, RideStatus};

/// Conjunctive equality/membership predicates. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RideFilter {
    pub ride_id: Option<RideId>,
    pub poster_id: Option<ActorId>,
    pub assigned_to: Option<ActorId>,
    pub statuses: Option<Vec<RideStatus>>,
}

impl RideFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ride(mut self, ride_id: RideId) -> Self {
        self.ride_id = Some(ride_id);
        self
    }

    pub fn posted_by(mut self, poster_id: ActorId) -> Self {
        self.poster_id = Some(poster_id);
        self
    }

    pub fn assigned_to(mut self, driver_id: ActorId) -> Self {
        self.assigned_to = Some(driver_id);
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = RideStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn matches(&self, ride: &Ride) -> bool {
        self.ride_id.map_or(true, |id| ride.id == id)
            && self.poster_id.map_or(true, |id| ride.poster_id == id)
            && self.assigned_to.map_or(true, |id| ride.assigned_to == Some(id))
            && self
                .statuses
                .as_ref()
                .map_or(true, |statuses| statuses.contains(&ride.status))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// A filtered, `created_at`-ordered, optionally limited read over the ride store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RideQuery {
    pub filter: RideFilter,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl RideQuery {
    pub fn new(filter: RideFilter) -> Self {
        Self {
            filter,
            order: SortOrder::NewestFirst,
            limit: None,
        }
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Ties on `created_at` are broken by id so the order is total.
    pub fn compare(&self, a: &Ride, b: &Ride) -> Ordering {
        let oldest_first = a
            .created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id));
        match self.order {
            SortOrder::OldestFirst => oldest_first,
            SortOrder::NewestFirst => oldest_first.reverse(),
        }
    }

    pub fn apply<'a>(&self, rides: impl IntoIterator<Item = &'a Ride>) -> Vec<Ride> {
        let mut matched: Vec<Ride> = rides
            .into_iter()
            .filter(|ride| self.filter.matches(ride))
            .cloned()
            .collect();
        matched.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RideDraft, TripType};
    use chrono::{Duration, TimeZone, Utc};
    use rstest::rstest;
    use uuid::Uuid;

    fn ride_at(minutes: i64, poster_id: ActorId, status: RideStatus) -> Ride {
        let draft = RideDraft {
            poster_id,
            poster_display_name: "Poster".to_string(),
            pickup: "Rajkot".to_string(),
            drop: "Jamnagar".to_string(),
            date: "2024-06-01".to_string(),
            time: "10:00".to_string(),
            price: 250.0,
            car_type: None,
            trip_type: TripType::OneWay,
            description: None,
        };
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let mut ride = Ride::from_draft(draft, Uuid::new_v4(), base + Duration::minutes(minutes));
        ride.status = status;
        ride
    }

    #[rstest]
    fn newest_first_is_the_default_order() {
        let poster = Uuid::new_v4();
        let rides = vec![
            ride_at(1, poster, RideStatus::Pending),
            ride_at(3, poster, RideStatus::Pending),
            ride_at(2, poster, RideStatus::Pending),
        ];

        let out = RideQuery::new(RideFilter::all()).apply(&rides);
        let minutes: Vec<_> = out.iter().map(|r| r.created_at).collect();
        let mut expected = minutes.clone();
        expected.sort_by(|a, b| b.cmp(a));
        assert_eq!(minutes, expected);
    }

    #[rstest]
    fn oldest_first_with_limit_keeps_the_earliest() {
        let poster = Uuid::new_v4();
        let rides = vec![
            ride_at(5, poster, RideStatus::Pending),
            ride_at(1, poster, RideStatus::Pending),
            ride_at(3, poster, RideStatus::Pending),
        ];

        let out = RideQuery::new(RideFilter::all())
            .order(SortOrder::OldestFirst)
            .limit(2)
            .apply(&rides);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, rides[1].id);
        assert_eq!(out[1].id, rides[2].id);
    }

    #[rstest]
    fn filters_are_conjunctive() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let rides = vec![
            ride_at(1, me, RideStatus::Pending),
            ride_at(2, me, RideStatus::Cancelled),
            ride_at(3, other, RideStatus::Pending),
        ];

        let out = RideQuery::new(
            RideFilter::all()
                .posted_by(me)
                .with_statuses([RideStatus::Pending]),
        )
        .apply(&rides);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, rides[0].id);
    }
}
