//! crates/ride_share_core/src/subscription.rs
//!
//! A live query handle. Each item is a complete snapshot, never a diff.
//! The producer observes the handle's cancellation token and stops once the
//! subscriber calls [`Subscription::unsubscribe`] or drops the handle.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, DropGuard};

pub struct Subscription<T> {
    stream: Pin<Box<dyn Stream<Item = T> + Send>>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl<T> Subscription<T> {
    /// Wraps a producer stream. `token` must be the one the producer watches.
    pub fn new<S>(stream: S, token: CancellationToken) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Releases the producer. Dropping the handle has the same effect.
    pub fn unsubscribe(self) {
        self.token.cancel();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.stream.as_mut().poll_next(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
