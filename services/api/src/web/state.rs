//! services/api/src/web/state.rs
//!
//! Defines the application's shared and connection-specific states.

use crate::config::Config;
use ride_share_core::{
    AssignmentService, IdentityProvider, PresenceService, PresenceStore, RideFeeds, RideService,
    RideStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub identity: Arc<dyn IdentityProvider>,
    pub rides: RideService,
    pub assignments: AssignmentService,
    pub feeds: RideFeeds,
    pub presence: PresenceService,
}

impl AppState {
    /// Wires the core services over the given ports, applying the policy
    /// switches from `config`.
    pub fn new(
        config: Arc<Config>,
        ride_store: Arc<dyn RideStore>,
        presence_store: Arc<dyn PresenceStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            rides: RideService::new(ride_store.clone()),
            assignments: AssignmentService::new(ride_store.clone(), config.assignment_policy()),
            feeds: RideFeeds::new(ride_store.clone(), config.available_scope()),
            presence: PresenceService::new(presence_store, ride_store),
            identity,
            config,
        }
    }
}

//=========================================================================================
// ConnectionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The live subscriptions opened on one WebSocket connection, keyed by the id
/// handed to the client.
#[derive(Default)]
pub struct ConnectionState {
    subscriptions: HashMap<Uuid, CancellationToken>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a forwarder's token and returns the id the client uses to cancel it.
    pub fn register(&mut self, token: CancellationToken) -> Uuid {
        let id = Uuid::new_v4();
        self.subscriptions.insert(id, token);
        id
    }

    /// Cancels one subscription. Returns `false` if the id is unknown.
    pub fn cancel(&mut self, subscription_id: Uuid) -> bool {
        match self.subscriptions.remove(&subscription_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops the bookkeeping for a forwarder that ended on its own.
    pub fn forget(&mut self, subscription_id: Uuid) {
        self.subscriptions.remove(&subscription_id);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Cancels everything; called when the socket closes.
    pub fn cancel_all(&mut self) {
        for (_, token) in self.subscriptions.drain() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_only_touches_the_named_subscription() {
        let mut state = ConnectionState::new();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        let first_id = state.register(first.clone());
        state.register(second.clone());

        assert!(state.cancel(first_id));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(state.len(), 1);
        assert!(!state.cancel(first_id));
    }

    #[test]
    fn cancel_all_releases_every_subscription() {
        let mut state = ConnectionState::new();
        let tokens: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();
        for token in &tokens {
            state.register(token.clone());
        }

        state.cancel_all();

        assert!(state.is_empty());
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }
}
