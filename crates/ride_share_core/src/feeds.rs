//! crates/ride_share_core/src/feeds.rs
//!
//! Read-side projections over the ride store. Each feed is a `RideQuery`
//! derived from the caller; live feeds are ride-store subscriptions, the
//! rest are point-in-time reads.

use futures::{future, stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{Actor, AuthContext, Ride, RideId, RideStatus, Role};
use crate::error::CoreResult;
use crate::ports::{RideSnapshots, RideStore};
use crate::query::{RideFilter, RideQuery, SortOrder};
use crate::subscription::Subscription;

/// How many rides the upcoming panel shows.
pub const UPCOMING_LIMIT: usize = 2;

/// Which statuses the "available rides" feed shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvailableScope {
    #[default]
    PendingOnly,
    /// Every ride regardless of status.
    AllStatuses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Available,
    Posted,
    Accepted,
    Upcoming,
    Ride(RideId),
}

#[derive(Clone)]
pub struct RideFeeds {
    store: Arc<dyn RideStore>,
    available_scope: AvailableScope,
}

impl RideFeeds {
    pub fn new(store: Arc<dyn RideStore>, available_scope: AvailableScope) -> Self {
        Self {
            store,
            available_scope,
        }
    }

    /// The query behind `kind` for `actor`, or `None` when the feed is empty by
    /// definition (an actor without a role has no upcoming rides).
    pub fn query_for(&self, actor: &Actor, kind: FeedKind) -> Option<RideQuery> {
        match kind {
            FeedKind::Available => {
                let filter = match self.available_scope {
                    AvailableScope::PendingOnly => {
                        RideFilter::all().with_statuses([RideStatus::Pending])
                    }
                    AvailableScope::AllStatuses => RideFilter::all(),
                };
                Some(RideQuery::new(filter))
            }
            FeedKind::Posted => Some(RideQuery::new(RideFilter::all().posted_by(actor.id))),
            FeedKind::Accepted => Some(RideQuery::new(
                RideFilter::all()
                    .assigned_to(actor.id)
                    .with_statuses([RideStatus::Accepted, RideStatus::Completed]),
            )),
            FeedKind::Upcoming => {
                let statuses: &[RideStatus] = match actor.role? {
                    Role::Passenger => &[RideStatus::Accepted, RideStatus::InProgress],
                    Role::Driver => &[RideStatus::Pending],
                };
                Some(
                    RideQuery::new(
                        RideFilter::all()
                            .posted_by(actor.id)
                            .with_statuses(statuses.iter().copied()),
                    )
                    .order(SortOrder::OldestFirst)
                    .limit(UPCOMING_LIMIT),
                )
            }
            FeedKind::Ride(ride_id) => Some(RideQuery::new(RideFilter::all().ride(ride_id))),
        }
    }

    /// Point-in-time read of a feed.
    pub async fn snapshot(&self, ctx: &AuthContext, kind: FeedKind) -> CoreResult<Vec<Ride>> {
        let actor = ctx.require_actor()?;
        match self.query_for(actor, kind) {
            Some(query) => Ok(self.store.fetch_rides(&query).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Live feed. The first item is the current state.
    pub async fn subscribe(&self, ctx: &AuthContext, kind: FeedKind) -> CoreResult<RideSnapshots> {
        let actor = ctx.require_actor()?;
        if let FeedKind::Ride(ride_id) = kind {
            self.store.get_ride(ride_id).await?;
        }
        debug!(actor_id = %actor.id, ?kind, "Opening ride feed");
        match self.query_for(actor, kind) {
            Some(query) => Ok(self.store.subscribe_rides(query).await?),
            None => Ok(empty_feed()),
        }
    }

    pub async fn available_rides(&self, ctx: &AuthContext) -> CoreResult<RideSnapshots> {
        self.subscribe(ctx, FeedKind::Available).await
    }

    /// Staleness is tolerable here, so this is a one-shot read.
    pub async fn my_posted_rides(&self, ctx: &AuthContext) -> CoreResult<Vec<Ride>> {
        self.snapshot(ctx, FeedKind::Posted).await
    }

    pub async fn my_accepted_rides(&self, ctx: &AuthContext) -> CoreResult<RideSnapshots> {
        self.subscribe(ctx, FeedKind::Accepted).await
    }

    pub async fn upcoming_rides(&self, ctx: &AuthContext) -> CoreResult<RideSnapshots> {
        self.subscribe(ctx, FeedKind::Upcoming).await
    }

    pub async fn ride_detail(&self, ctx: &AuthContext, ride_id: RideId) -> CoreResult<RideSnapshots> {
        self.subscribe(ctx, FeedKind::Ride(ride_id)).await
    }
}

/// A feed that is empty and stays open like any other subscription.
fn empty_feed() -> RideSnapshots {
    let token = CancellationToken::new();
    let items = stream::once(future::ready(Ok(Vec::new()))).chain(stream::pending());
    Subscription::new(items, token)
}
