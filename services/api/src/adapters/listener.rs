//! services/api/src/adapters/listener.rs
//!
//! Live queries on top of PostgreSQL `LISTEN/NOTIFY`. A single hub task owns
//! the only listener connection, taken from its own one-connection pool so it
//! never competes with requests, and fans notifications out to every open
//! subscription over broadcast channels. Each subscription re-runs its query
//! when a relevant notification or a resync arrives and only emits snapshots
//! that differ from the last one.

use futures::future::BoxFuture;
use ride_share_core::{PortError, PortResult, Subscription};
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::db::map_sqlx_error;

const EVENT_BUFFER: usize = 256;

/// What the hub reports to the subscribers of one channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A NOTIFY arrived with this payload.
    Notified(String),
    /// LISTEN is in place again. Changes made while it was down sent no
    /// notification, so every subscriber re-reads.
    Resync,
    /// The listener connection failed. A `Resync` follows once it is back.
    Failed(PortError),
}

/// Owner of the shared listener connection.
pub struct NotificationHub {
    senders: HashMap<&'static str, broadcast::Sender<ChannelEvent>>,
    shutdown: CancellationToken,
}

impl NotificationHub {
    /// Spawns the listener task for `channels`. Must be called inside a tokio runtime.
    pub fn start(options: PgConnectOptions, channels: &[&'static str], retry: Duration) -> Self {
        let senders: HashMap<&'static str, broadcast::Sender<ChannelEvent>> = channels
            .iter()
            .map(|channel| (*channel, broadcast::channel(EVENT_BUFFER).0))
            .collect();
        let shutdown = CancellationToken::new();
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(options);
        tokio::spawn(run_listener(pool, senders.clone(), retry, shutdown.clone()));
        Self { senders, shutdown }
    }

    /// Events for `channel`, starting from now.
    pub fn subscribe(&self, channel: &str) -> PortResult<broadcast::Receiver<ChannelEvent>> {
        self.senders
            .get(channel)
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| PortError::Unexpected(format!("Channel {} is not listened to", channel)))
    }
}

impl Drop for NotificationHub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Sleeps for `retry` unless `cancelled` fires first. Returns `true` when cancelled.
async fn back_off(cancelled: &CancellationToken, retry: Duration) -> bool {
    tokio::select! {
        _ = cancelled.cancelled() => true,
        _ = tokio::time::sleep(retry) => false,
    }
}

fn broadcast_all(senders: &HashMap<&'static str, broadcast::Sender<ChannelEvent>>, event: ChannelEvent) {
    for sender in senders.values() {
        // No receivers is fine; nobody is watching that channel yet.
        let _ = sender.send(event.clone());
    }
}

async fn connect(pool: &PgPool, channels: &[&'static str]) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen_all(channels.iter().copied()).await?;
    Ok(listener)
}

async fn run_listener(
    pool: PgPool,
    senders: HashMap<&'static str, broadcast::Sender<ChannelEvent>>,
    retry: Duration,
    shutdown: CancellationToken,
) {
    let channels: Vec<&'static str> = senders.keys().copied().collect();
    'connect: loop {
        let mut listener = match connect(&pool, &channels).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "Failed to start notification listener");
                broadcast_all(&senders, ChannelEvent::Failed(map_sqlx_error(e)));
                if back_off(&shutdown, retry).await {
                    break 'connect;
                }
                continue 'connect;
            }
        };
        info!(?channels, "Listening for notifications");
        broadcast_all(&senders, ChannelEvent::Resync);

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => None,
                received = listener.try_recv() => Some(received),
            };
            let Some(received) = received else {
                break 'connect;
            };
            match received {
                Ok(Some(notification)) => {
                    if let Some(sender) = senders.get(notification.channel()) {
                        let _ = sender.send(ChannelEvent::Notified(notification.payload().to_string()));
                    }
                }
                Ok(None) => {
                    // Reconnect explicitly so the resync is only sent once LISTEN is back.
                    debug!("Notification connection lost, reconnecting");
                    continue 'connect;
                }
                Err(e) => {
                    warn!(error = %e, "Notification listener failed");
                    broadcast_all(&senders, ChannelEvent::Failed(map_sqlx_error(e)));
                    if back_off(&shutdown, retry).await {
                        break 'connect;
                    }
                    continue 'connect;
                }
            }
        }
    }
    debug!("Notification listener stopped");
}

/// Streams `load()` results, re-loading after every event whose payload
/// passes `relevant` and after every resync. Listener failures are emitted as
/// errors and the stream keeps waiting for the resync that follows. A failed
/// reload is emitted, then retried after `retry`.
pub fn live_query<T, R, L>(
    mut events: broadcast::Receiver<ChannelEvent>,
    retry: Duration,
    relevant: R,
    load: L,
) -> Subscription<PortResult<T>>
where
    T: PartialEq + Clone + Send + 'static,
    R: Fn(&str) -> bool + Send + 'static,
    L: Fn() -> BoxFuture<'static, PortResult<T>> + Send + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let snapshots = async_stream::stream! {
        let mut last: Option<T> = None;
        // `events` was subscribed before the first read, so no change can
        // fall between the snapshot and the wait.
        'reload: loop {
            match load().await {
                Ok(value) => {
                    if last.as_ref() != Some(&value) {
                        last = Some(value.clone());
                        yield Ok(value);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Live query reload failed");
                    yield Err(e);
                    if back_off(&cancelled, retry).await {
                        break 'reload;
                    }
                    continue 'reload;
                }
            }

            loop {
                let received = tokio::select! {
                    _ = cancelled.cancelled() => None,
                    received = events.recv() => Some(received),
                };
                match received {
                    None => break 'reload,
                    Some(Ok(ChannelEvent::Notified(payload))) => {
                        if relevant(&payload) {
                            continue 'reload;
                        }
                    }
                    Some(Ok(ChannelEvent::Resync)) => continue 'reload,
                    Some(Ok(ChannelEvent::Failed(e))) => {
                        yield Err(e);
                    }
                    Some(Err(RecvError::Lagged(skipped))) => {
                        debug!(skipped, "Live query fell behind notifications, reloading");
                        continue 'reload;
                    }
                    Some(Err(RecvError::Closed)) => {
                        yield Err(PortError::Connectivity(
                            "notification listener stopped".to_string(),
                        ));
                        break 'reload;
                    }
                }
            }
        }
        debug!("Live query closed");
    };

    Subscription::new(snapshots, token)
}
