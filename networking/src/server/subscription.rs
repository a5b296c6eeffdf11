/// Push subscriptions.
///
/// A subscription is a lazy, unbounded, non-restartable sequence of items
/// pushed by a backend. The consumer holds a `Subscription` and reads it as a
/// `Stream`; the producer holds the matching `SubscriptionSender`. Cancelling
/// either side, or dropping the consumer, ends the stream promptly.
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<T> Subscription<T> {
    /// Create a connected sender and subscription pair.
    pub fn channel() -> (SubscriptionSender<T>, Subscription<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        (
            SubscriptionSender {
                sender,
                token: token.clone(),
            },
            Subscription {
                receiver,
                cancelled: Box::pin(token.clone().cancelled_owned()),
                token,
            },
        )
    }

    /// Stop the subscription. Items already queued are discarded.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that cancels this subscription.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        this.receiver.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Producer half of a subscription.
#[derive(Debug)]
pub struct SubscriptionSender<T> {
    sender: mpsc::UnboundedSender<T>,
    token: CancellationToken,
}

impl<T> Clone for SubscriptionSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            token: self.token.clone(),
        }
    }
}

impl<T> SubscriptionSender<T> {
    /// Deliver an item. Returns `false` once the subscription is gone.
    pub fn send(&self, item: T) -> bool {
        !self.token.is_cancelled() && self.sender.send(item).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.sender.is_closed()
    }

    /// Resolves when the consumer cancels or drops the subscription.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.sender.closed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn delivers_items_in_order() {
        let (sender, mut subscription) = Subscription::channel();
        assert!(sender.send(1));
        assert!(sender.send(2));

        assert_eq!(subscription.next().await, Some(1));
        assert_eq!(subscription.next().await, Some(2));
    }

    #[tokio::test]
    async fn cancel_ends_stream() {
        let (sender, mut subscription) = Subscription::channel();
        assert!(sender.send(1));
        subscription.cancel();

        assert_eq!(subscription.next().await, None);
        assert!(!sender.send(2));
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn cancel_wakes_pending_reader() {
        let (_sender, mut subscription) = Subscription::<u32>::channel();
        let token = subscription.cancellation_token();

        let reader = tokio::spawn(async move { subscription.next().await });
        tokio::task::yield_now().await;
        token.cancel();

        assert_eq!(reader.await.unwrap(), None);
    }

    #[tokio::test]
    async fn dropping_consumer_closes_sender() {
        let (sender, subscription) = Subscription::<u32>::channel();
        drop(subscription);

        sender.closed().await;
        assert!(!sender.send(1));
    }

    #[tokio::test]
    async fn dropping_sender_ends_stream() {
        let (sender, mut subscription) = Subscription::<u32>::channel();
        drop(sender);

        assert_eq!(subscription.next().await, None);
    }
}
