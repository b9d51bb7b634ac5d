//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Every `subscribe` spawns a forwarder task that relays one live feed into the
//! connection's outbox; a single writer task drains the outbox into the socket.

use crate::web::{
    presence::LocationDto,
    protocol::{ClientMessage, FeedRequest, ServerMessage},
    rest::ride_responses,
    state::{AppState, ConnectionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{SinkExt, StreamExt};
use ride_share_core::{
    AuthContext, CoreError, LocationUpdates, PortResult, RideSnapshots, Subscription,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Messages queued for one client before forwarders start waiting.
const OUTBOX_CAPACITY: usize = 64;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, ctx))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, ctx: AuthContext) {
    let actor_id = ctx.actor().map(|a| a.id);
    info!(?actor_id, "New WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut outgoing) = mpsc::channel::<ServerMessage>(OUTBOX_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outgoing.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                debug!("Client went away while sending");
                break;
            }
        }
    });

    let session = Session::new(app_state, ctx, outbox);

    // --- Main Message Loop ---
    while let Some(received) = receiver.next().await {
        match received {
            Ok(Message::Text(text)) => session.handle_text_message(text.as_str()).await,
            Ok(Message::Close(_)) => {
                info!("Client sent close message.");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive failed: {}", e);
                break;
            }
        }
    }

    // --- Cleanup ---
    session.close().await;
    writer.abort();
    info!(?actor_id, "WebSocket connection closed.");
}

/// A live feed opened on behalf of a client.
enum OpenFeed {
    Rides(RideSnapshots),
    Location(LocationUpdates),
}

/// Per-connection context shared with the forwarder tasks.
#[derive(Clone)]
pub(crate) struct Session {
    app_state: Arc<AppState>,
    ctx: AuthContext,
    subscriptions: Arc<Mutex<ConnectionState>>,
    outbox: mpsc::Sender<ServerMessage>,
}

impl Session {
    pub(crate) fn new(
        app_state: Arc<AppState>,
        ctx: AuthContext,
        outbox: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            app_state,
            ctx,
            subscriptions: Arc::new(Mutex::new(ConnectionState::new())),
            outbox,
        }
    }

    async fn send(&self, msg: ServerMessage) {
        if self.outbox.send(msg).await.is_err() {
            debug!("Outbox closed, dropping message");
        }
    }

    async fn send_error(&self, subscription_id: Option<Uuid>, err: &CoreError) {
        self.send(ServerMessage::Error {
            subscription_id,
            code: err.code().to_string(),
            message: err.to_string(),
        })
        .await;
    }

    /// Helper function to handle the logic for different `ClientMessage` variants.
    pub(crate) async fn handle_text_message(&self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { feed }) => self.subscribe(feed).await,
            Ok(ClientMessage::Unsubscribe { subscription_id }) => {
                if self.subscriptions.lock().await.cancel(subscription_id) {
                    debug!(%subscription_id, "Subscription cancelled by client");
                    self.send(ServerMessage::Unsubscribed { subscription_id })
                        .await;
                } else {
                    self.send_error(
                        Some(subscription_id),
                        &CoreError::NotFound(format!("Subscription {} not found", subscription_id)),
                    )
                    .await;
                }
            }
            Err(e) => {
                warn!("Failed to deserialize client message: {}", e);
                self.send(ServerMessage::Error {
                    subscription_id: None,
                    code: "bad_request".to_string(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn open(&self, feed: FeedRequest) -> Result<OpenFeed, CoreError> {
        let state = &self.app_state;
        let ctx = &self.ctx;
        Ok(match feed {
            FeedRequest::Available => OpenFeed::Rides(state.feeds.available_rides(ctx).await?),
            FeedRequest::Accepted => OpenFeed::Rides(state.feeds.my_accepted_rides(ctx).await?),
            FeedRequest::Upcoming => OpenFeed::Rides(state.feeds.upcoming_rides(ctx).await?),
            FeedRequest::Ride { ride_id } => {
                OpenFeed::Rides(state.feeds.ride_detail(ctx, ride_id).await?)
            }
            FeedRequest::DriverLocation { ride_id } => {
                OpenFeed::Location(state.presence.track_assigned_driver(ctx, ride_id).await?)
            }
        })
    }

    async fn subscribe(&self, feed: FeedRequest) {
        let opened = match self.open(feed).await {
            Ok(opened) => opened,
            Err(e) => {
                debug!(?feed, error = %e, "Subscription refused");
                self.send_error(None, &e).await;
                return;
            }
        };

        let token = CancellationToken::new();
        let subscription_id = self.subscriptions.lock().await.register(token.clone());
        // `subscribed` is queued before the forwarder can queue a snapshot.
        self.send(ServerMessage::Subscribed {
            subscription_id,
            feed,
        })
        .await;
        info!(%subscription_id, ?feed, "Feed opened");

        let session = self.clone();
        match opened {
            OpenFeed::Rides(rides) => {
                tokio::spawn(session.forward(subscription_id, rides, token, |subscription_id, rides| {
                    ServerMessage::RideSnapshot {
                        subscription_id,
                        rides: ride_responses(rides),
                    }
                }));
            }
            OpenFeed::Location(locations) => {
                tokio::spawn(session.forward(
                    subscription_id,
                    locations,
                    token,
                    |subscription_id, location| ServerMessage::DriverLocation {
                        subscription_id,
                        location: location.map(LocationDto::from),
                    },
                ));
            }
        }
    }

    /// Relays one feed until the client unsubscribes, the connection closes or
    /// the feed ends. Feed errors are passed on and the feed keeps running.
    async fn forward<T, F>(
        self,
        subscription_id: Uuid,
        mut feed: Subscription<PortResult<T>>,
        token: CancellationToken,
        render: F,
    ) where
        T: Send + 'static,
        F: Fn(Uuid, T) -> ServerMessage + Send + 'static,
    {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = feed.next() => next,
            };
            let msg = match next {
                None => break,
                Some(Ok(item)) => render(subscription_id, item),
                Some(Err(e)) => {
                    let err = CoreError::from(e);
                    warn!(%subscription_id, error = %err, "Live feed reported an error");
                    ServerMessage::Error {
                        subscription_id: Some(subscription_id),
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }
                }
            };
            if self.outbox.send(msg).await.is_err() {
                break;
            }
        }
        feed.unsubscribe();
        self.subscriptions.lock().await.forget(subscription_id);
        debug!(%subscription_id, "Forwarder stopped");
    }

    /// Cancels every feed opened on this connection.
    pub(crate) async fn close(&self) {
        self.subscriptions.lock().await.cancel_all();
    }

    #[cfg(test)]
    pub(crate) async fn open_subscriptions(&self) -> usize {
        self.subscriptions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use ride_share_core::memory::{
        InMemoryIdentityProvider, InMemoryPresenceStore, InMemoryRideStore,
    };
    use ride_share_core::{Actor, NewRide, Role};
    use std::time::Duration;

    struct Harness {
        state: Arc<AppState>,
        session: Session,
        outgoing: mpsc::Receiver<ServerMessage>,
    }

    fn config() -> Arc<Config> {
        Arc::new(
            Config::from_lookup(|key| match key {
                "DATABASE_URL" => Some("postgres://localhost/rides".to_string()),
                _ => None,
            })
            .unwrap(),
        )
    }

    fn actor(name: &str, role: Role) -> Actor {
        Actor {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            role: Some(role),
        }
    }

    fn harness(ctx: AuthContext) -> Harness {
        let rides = Arc::new(InMemoryRideStore::new());
        let state = Arc::new(AppState::new(
            config(),
            rides,
            Arc::new(InMemoryPresenceStore::new()),
            Arc::new(InMemoryIdentityProvider::new()),
        ));
        let (outbox, outgoing) = mpsc::channel(OUTBOX_CAPACITY);
        Harness {
            session: Session::new(state.clone(), ctx, outbox),
            state,
            outgoing,
        }
    }

    async fn next_message(outgoing: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), outgoing.recv())
            .await
            .expect("timed out waiting for a server message")
            .expect("outbox closed")
    }

    fn ahmedabad_to_surat() -> NewRide {
        NewRide {
            pickup: "Ahmedabad".into(),
            drop: "Surat".into(),
            date: "2024-06-01".into(),
            time: "09:30".into(),
            price: "500".into(),
            ..NewRide::default()
        }
    }

    #[tokio::test]
    async fn available_feed_streams_snapshots_until_unsubscribed() {
        let driver = AuthContext::authenticated(actor("Dev", Role::Driver));
        let poster = AuthContext::authenticated(actor("Priya", Role::Passenger));
        let mut h = harness(driver);

        h.session
            .handle_text_message(r#"{"type":"subscribe","feed":"available"}"#)
            .await;
        let subscription_id = match next_message(&mut h.outgoing).await {
            ServerMessage::Subscribed {
                subscription_id,
                feed: FeedRequest::Available,
            } => subscription_id,
            other => panic!("expected subscribed, got {other:?}"),
        };
        match next_message(&mut h.outgoing).await {
            ServerMessage::RideSnapshot { rides, .. } => assert!(rides.is_empty()),
            other => panic!("expected empty snapshot, got {other:?}"),
        }

        let ride = h
            .state
            .rides
            .create_ride(&poster, ahmedabad_to_surat())
            .await
            .unwrap();
        match next_message(&mut h.outgoing).await {
            ServerMessage::RideSnapshot {
                subscription_id: id,
                rides,
            } => {
                assert_eq!(id, subscription_id);
                assert_eq!(rides.len(), 1);
                assert_eq!(rides[0].id, ride.id);
            }
            other => panic!("expected snapshot with the new ride, got {other:?}"),
        }

        let unsubscribe = format!(
            r#"{{"type":"unsubscribe","subscription_id":"{}"}}"#,
            subscription_id
        );
        h.session.handle_text_message(&unsubscribe).await;
        assert!(matches!(
            next_message(&mut h.outgoing).await,
            ServerMessage::Unsubscribed { subscription_id: id } if id == subscription_id
        ));
        assert_eq!(h.session.open_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn anonymous_subscribe_is_refused() {
        let mut h = harness(AuthContext::anonymous());
        h.session
            .handle_text_message(r#"{"type":"subscribe","feed":"accepted"}"#)
            .await;
        match next_message(&mut h.outgoing).await {
            ServerMessage::Error {
                subscription_id: None,
                code,
                ..
            } => assert_eq!(code, "auth_required"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_subscription_and_garbage_are_reported() {
        let mut h = harness(AuthContext::authenticated(actor("Dev", Role::Driver)));

        h.session
            .handle_text_message(&format!(
                r#"{{"type":"unsubscribe","subscription_id":"{}"}}"#,
                Uuid::new_v4()
            ))
            .await;
        assert!(matches!(
            next_message(&mut h.outgoing).await,
            ServerMessage::Error { code, .. } if code == "not_found"
        ));

        h.session.handle_text_message("not json").await;
        assert!(matches!(
            next_message(&mut h.outgoing).await,
            ServerMessage::Error { code, .. } if code == "bad_request"
        ));
    }

    #[tokio::test]
    async fn tracking_an_unassigned_ride_is_an_invalid_state() {
        let poster = AuthContext::authenticated(actor("Priya", Role::Passenger));
        let mut h = harness(poster.clone());
        let ride = h
            .state
            .rides
            .create_ride(&poster, ahmedabad_to_surat())
            .await
            .unwrap();

        h.session
            .handle_text_message(&format!(
                r#"{{"type":"subscribe","feed":{{"driver_location":{{"ride_id":"{}"}}}}}}"#,
                ride.id
            ))
            .await;
        assert!(matches!(
            next_message(&mut h.outgoing).await,
            ServerMessage::Error { code, .. } if code == "invalid_state"
        ));
    }

    #[tokio::test]
    async fn close_cancels_every_open_feed() {
        let mut h = harness(AuthContext::authenticated(actor("Dev", Role::Driver)));
        for feed in ["available", "accepted", "upcoming"] {
            h.session
                .handle_text_message(&format!(r#"{{"type":"subscribe","feed":"{feed}"}}"#))
                .await;
            // Earlier forwarders may interleave their first snapshots.
            loop {
                if let ServerMessage::Subscribed { .. } = next_message(&mut h.outgoing).await {
                    break;
                }
            }
        }
        assert_eq!(h.session.open_subscriptions().await, 3);

        h.session.close().await;

        assert_eq!(h.session.open_subscriptions().await, 0);
    }
}
