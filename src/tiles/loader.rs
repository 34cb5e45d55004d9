use std::future::Future;
use std::task::{Context, Poll};

use fxhash::FxHashMap;
use futures::future::{AbortHandle, Abortable, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::task::noop_waker_ref;
use futures::FutureExt;

use crate::tiles::source::{TileLoadError, TileLoadFuture, TilePayload};

/// A settled load, identified by the uid of the tile it was issued for
#[derive(Debug)]
pub struct LoadOutcome {
    pub uid: u64,
    pub result: Result<TilePayload, TileLoadError>,
}

/// In-flight tile loads.
///
/// Each load is wrapped in an [`Abortable`] so removing a tile cancels it
/// cooperatively. At most one load per tile uid is in flight; issuing another
/// aborts the previous one.
pub struct TileLoadQueue {
    in_flight: FuturesUnordered<LocalBoxFuture<'static, Option<LoadOutcome>>>,
    handles: FxHashMap<u64, AbortHandle>,
}

impl Default for TileLoadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TileLoadQueue {
    pub fn new() -> Self {
        Self {
            in_flight: FuturesUnordered::new(),
            handles: FxHashMap::default(),
        }
    }

    /// Start a load. The future is polled once on the spot; a load that is
    /// already complete is returned instead of being queued.
    pub fn submit(
        &mut self,
        uid: u64,
        mut future: TileLoadFuture,
    ) -> Option<Result<TilePayload, TileLoadError>> {
        self.cancel(uid);

        let mut cx = Context::from_waker(noop_waker_ref());
        if let Poll::Ready(result) = future.as_mut().poll(&mut cx) {
            return Some(result);
        }

        let (handle, registration) = AbortHandle::new_pair();
        let load = Abortable::new(future, registration);
        self.in_flight.push(
            async move {
                load.await
                    .ok()
                    .map(|result| LoadOutcome { uid, result })
            }
            .boxed_local(),
        );
        self.handles.insert(uid, handle);
        None
    }

    /// Abort the pending load for `uid`. Returns whether one was pending.
    pub fn cancel(&mut self, uid: u64) -> bool {
        match self.handles.remove(&uid) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, uid: u64) -> bool {
        self.handles.contains_key(&uid)
    }

    /// Number of loads still in flight
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Next settled load. Aborted loads are skipped. `Ready(None)` once
    /// nothing is in flight.
    pub fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Option<LoadOutcome>> {
        loop {
            match self.in_flight.poll_next_unpin(cx) {
                Poll::Ready(Some(Some(outcome))) => {
                    self.handles.remove(&outcome.uid);
                    return Poll::Ready(Some(outcome));
                }
                Poll::Ready(Some(None)) => continue,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use futures::future::{self, poll_fn};

    fn deferred() -> (oneshot::Sender<TilePayload>, TileLoadFuture) {
        let (tx, rx) = oneshot::channel::<TilePayload>();
        let fut = async move { rx.await.map_err(|_| TileLoadError::transient("dropped")) };
        (tx, fut.boxed_local())
    }

    #[test]
    fn test_ready_load_returns_immediately() {
        let mut queue = TileLoadQueue::new();
        let result = queue.submit(1, future::ready(Ok(TilePayload::new(vec![7]))).boxed_local());
        assert_eq!(result.unwrap().unwrap().data.as_slice(), &[7]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pending_load_completes() {
        let mut queue = TileLoadQueue::new();
        let (tx, fut) = deferred();
        assert!(queue.submit(5, fut).is_none());
        assert!(queue.is_pending(5));

        tx.send(TilePayload::new(vec![1])).unwrap();
        let outcome = block_on(poll_fn(|cx| queue.poll_next(cx))).unwrap();
        assert_eq!(outcome.uid, 5);
        assert!(outcome.result.is_ok());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancelled_load_is_skipped() {
        let mut queue = TileLoadQueue::new();
        let (tx, fut) = deferred();
        queue.submit(5, fut);
        assert!(queue.cancel(5));
        assert!(!queue.cancel(5));

        let _ = tx.send(TilePayload::default());
        assert!(block_on(poll_fn(|cx| queue.poll_next(cx))).is_none());
    }

    #[test]
    fn test_resubmit_aborts_previous() {
        let mut queue = TileLoadQueue::new();
        let (first_tx, first) = deferred();
        let (second_tx, second) = deferred();
        queue.submit(3, first);
        queue.submit(3, second);
        assert_eq!(queue.len(), 1);

        let _ = first_tx.send(TilePayload::new(vec![1]));
        second_tx.send(TilePayload::new(vec![2])).unwrap();
        let outcome = block_on(poll_fn(|cx| queue.poll_next(cx))).unwrap();
        assert_eq!(outcome.result.unwrap().data.as_slice(), &[2]);
        assert!(block_on(poll_fn(|cx| queue.poll_next(cx))).is_none());
    }
}
