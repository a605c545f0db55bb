//! Single-shot deferred results for pushes.

use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::error::PushError;

type Settled<T> = Result<T, PushError>;

/// Future resolving to the result of one push.
///
/// Settles exactly once. A reply whose sending side is dropped without
/// settling resolves to [`PushError::Closed`].
#[must_use = "a reply does nothing unless awaited or inspected"]
pub struct Reply<T> {
    inner: ReplyInner<T>,
}

enum ReplyInner<T> {
    Pending(oneshot::Receiver<Settled<T>>),
    Ready(Option<Settled<T>>),
}

impl<T> Reply<T> {
    /// A reply that is already settled, for operations that need no network call.
    pub fn ready(result: Settled<T>) -> Self {
        Self {
            inner: ReplyInner::Ready(Some(result)),
        }
    }

    /// Take the result if it has already settled, without awaiting.
    pub fn try_take(&mut self) -> Option<Settled<T>> {
        match &mut self.inner {
            ReplyInner::Ready(result) => result.take(),
            ReplyInner::Pending(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(Err(PushError::Closed)),
            },
        }
    }
}

impl<T> Unpin for Reply<T> {}

impl<T> Future for Reply<T> {
    type Output = Settled<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            ReplyInner::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(PushError::Closed))),
            ReplyInner::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(PushError::Closed)))
            }
        }
    }
}

/// Sending side of a [`Reply`].
pub struct ReplySlot<T> {
    sender: RefCell<Option<oneshot::Sender<Settled<T>>>>,
}

impl<T> ReplySlot<T> {
    pub fn is_settled(&self) -> bool {
        self.sender.borrow().is_none()
    }

    /// Settle the reply. Returns `false` when it was already settled.
    pub fn settle(&self, result: Settled<T>) -> bool {
        let Some(sender) = self.sender.borrow_mut().take() else {
            return false;
        };
        // The consumer may have dropped the reply; settling still counts.
        let _ = sender.send(result);
        true
    }
}

/// Type-erased view of a pending reply, used to fail it on disconnect.
pub trait PendingReply {
    fn is_settled(&self) -> bool;
    fn close(&self);
}

impl<T> PendingReply for ReplySlot<T> {
    fn is_settled(&self) -> bool {
        ReplySlot::is_settled(self)
    }

    fn close(&self) {
        self.settle(Err(PushError::Closed));
    }
}

/// Create a connected slot/reply pair.
pub fn reply_pair<T>() -> (Rc<ReplySlot<T>>, Reply<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Rc::new(ReplySlot {
            sender: RefCell::new(Some(tx)),
        }),
        Reply {
            inner: ReplyInner::Pending(rx),
        },
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn settles_exactly_once() {
        let (slot, reply) = reply_pair::<u64>();
        assert!(slot.settle(Ok(7)));
        assert!(!slot.settle(Err(PushError::Timeout)));
        assert!(slot.is_settled());

        assert_eq!(reply.await, Ok(7));
    }

    #[tokio::test]
    async fn dropped_slot_resolves_closed() {
        let (slot, reply) = reply_pair::<u64>();
        drop(slot);
        assert_eq!(reply.await, Err(PushError::Closed));
    }

    #[test]
    fn close_through_type_erased_handle() {
        let (slot, mut reply) = reply_pair::<String>();
        let pending: Rc<dyn PendingReply> = slot;
        assert_eq!(reply.try_take(), None);

        pending.close();
        assert!(pending.is_settled());
        assert_eq!(reply.try_take(), Some(Err(PushError::Closed)));
    }

    #[tokio::test]
    async fn ready_reply_needs_no_sender() {
        let reply = Reply::ready(Ok(json!([])));
        assert_eq!(reply.await, Ok(json!([])));
    }
}
