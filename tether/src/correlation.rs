//! Request/response correlation.
//!
//! A request expecting a reply is registered under its request id before it
//! is written to the link. The caller awaits a [`ResponseFuture`]; the entry
//! leaves the table through exactly one of four doors:
//!
//! ```text
//!   register(id) ──► pending ──┬─ resolve(id)       → Ok(payload)
//!                              ├─ per-request timer → Err(Timeout)
//!                              ├─ sweep(now)        → Err(Expired)
//!                              └─ fail_all(err)     → Err(err)
//! ```
//!
//! Whichever path removes the entry from the map owns its sender, so a
//! request can never be completed twice.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tether_core::{Providers, TaskProvider, TimeProvider};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::RequestError;

/// Outcome delivered to the request caller.
pub type RequestResult = Result<Value, RequestError>;

/// State held for one outstanding request.
struct PendingResponse {
    sender: oneshot::Sender<RequestResult>,
    created_at: Duration,
    timeout: Duration,
    /// Distinguishes this registration from a later one reusing the id.
    token: u64,
    timer: Option<JoinHandle<()>>,
}

impl PendingResponse {
    fn complete(mut self, result: RequestResult) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // The caller may have stopped waiting; that is fine.
        let _ = self.sender.send(result);
    }
}

/// Future resolving to the response of a correlated request.
#[derive(Debug)]
pub struct ResponseFuture {
    request_id: String,
    receiver: oneshot::Receiver<RequestResult>,
}

impl ResponseFuture {
    /// Request id this future waits on.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Future for ResponseFuture {
    type Output = RequestResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without completing: the table itself is gone.
            Poll::Ready(Err(_)) => Poll::Ready(Err(RequestError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Generates request ids unique within a client's lifetime.
///
/// Ids combine the wall-clock time with a process-local counter so that
/// ids from a restarted client do not collide with late responses addressed
/// to the previous run.
#[derive(Debug, Default)]
pub struct RequestIdFactory {
    counter: Cell<u64>,
}

impl RequestIdFactory {
    /// Create a factory starting at counter 1.
    pub fn new() -> Self {
        Self {
            counter: Cell::new(1),
        }
    }

    /// Produce the next request id.
    pub fn next_id(&self, unix_time: Duration) -> String {
        let n = self.counter.get();
        self.counter.set(n + 1);
        format!("req-{}-{}", unix_time.as_millis(), n)
    }
}

/// Table of outstanding requests.
///
/// Always held in an `Rc`: per-request timers keep a `Weak` back-reference
/// so that dropping the table cancels nothing but also leaks nothing.
pub struct CorrelationTable<P: Providers> {
    providers: P,
    pending: RefCell<HashMap<String, PendingResponse>>,
    next_token: Cell<u64>,
    ids: RequestIdFactory,
}

impl<P: Providers> CorrelationTable<P> {
    /// Create an empty table.
    pub fn new(providers: P) -> Rc<Self> {
        Rc::new(Self {
            providers,
            pending: RefCell::new(HashMap::new()),
            next_token: Cell::new(0),
            ids: RequestIdFactory::new(),
        })
    }

    /// Produce a fresh request id.
    pub fn next_request_id(&self) -> String {
        self.ids.next_id(self.providers.time().unix_time())
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Whether no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Whether `request_id` is outstanding.
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.borrow().contains_key(request_id)
    }

    /// Register a request and start its timeout.
    ///
    /// Fails with [`RequestError::DuplicateId`] if the id is already pending;
    /// the existing registration is left untouched.
    pub fn register(
        self: &Rc<Self>,
        request_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<ResponseFuture, RequestError> {
        let request_id = request_id.into();
        if self.is_pending(&request_id) {
            return Err(RequestError::DuplicateId(request_id));
        }

        let token = self.next_token.get();
        self.next_token.set(token + 1);

        let (sender, receiver) = oneshot::channel();
        let created_at = self.providers.time().now();

        let weak: Weak<Self> = Rc::downgrade(self);
        let time = self.providers.time().clone();
        let timer_id = request_id.clone();
        let timer = self.providers.task().spawn_task("response_timeout", async move {
            if time.sleep(timeout).await.is_err() {
                return;
            }
            if let Some(table) = weak.upgrade() {
                table.expire(&timer_id, token);
            }
        });

        self.pending.borrow_mut().insert(
            request_id.clone(),
            PendingResponse {
                sender,
                created_at,
                timeout,
                token,
                timer: Some(timer),
            },
        );
        tracing::debug!("Registered request {} (timeout {:?})", request_id, timeout);

        Ok(ResponseFuture {
            request_id,
            receiver,
        })
    }

    /// Complete `request_id` with a response payload.
    ///
    /// Returns `false` for ids that are unknown, typically a response that
    /// arrived after its request timed out.
    pub fn resolve(&self, request_id: &str, payload: Value) -> bool {
        let entry = self.pending.borrow_mut().remove(request_id);
        match entry {
            Some(entry) => {
                tracing::debug!("Resolved request {}", request_id);
                entry.complete(Ok(payload));
                true
            }
            None => {
                tracing::debug!("Dropping response for unknown request {}", request_id);
                false
            }
        }
    }

    /// Withdraw a request without completing it.
    ///
    /// Used when the request could not be handed to the link at all; the
    /// caller gets its error directly instead of through the future.
    pub fn cancel(&self, request_id: &str) -> bool {
        let entry = self.pending.borrow_mut().remove(request_id);
        match entry {
            Some(mut entry) => {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Fail every request older than its timeout plus `grace`.
    ///
    /// Per-request timers normally get there first; the sweep catches
    /// entries whose timer stalled. Returns the ids that were expired.
    pub fn sweep(&self, grace: Duration) -> Vec<String> {
        let now = self.providers.time().now();
        let expired: Vec<(String, PendingResponse)> = {
            let mut pending = self.pending.borrow_mut();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| now.saturating_sub(p.created_at) > p.timeout + grace)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        let ids: Vec<String> = expired.iter().map(|(id, _)| id.clone()).collect();
        for (id, entry) in expired {
            tracing::warn!("Sweep expired request {}", id);
            entry.complete(Err(RequestError::Expired(id)));
        }
        ids
    }

    /// Fail every outstanding request with `error`. Returns how many failed.
    pub fn fail_all(&self, error: RequestError) -> usize {
        let drained: Vec<(String, PendingResponse)> =
            self.pending.borrow_mut().drain().collect();
        let count = drained.len();
        if count > 0 {
            tracing::debug!("Failing {} pending requests: {}", count, error);
        }
        for (_, entry) in drained {
            entry.complete(Err(error.clone()));
        }
        count
    }

    fn expire(&self, request_id: &str, token: u64) {
        let entry = {
            let mut pending = self.pending.borrow_mut();
            match pending.get(request_id) {
                Some(p) if p.token == token => pending.remove(request_id),
                _ => None,
            }
        };
        if let Some(mut entry) = entry {
            // Called from the timer itself; nothing to abort.
            entry.timer = None;
            tracing::debug!("Request {} timed out", request_id);
            entry.complete(Err(RequestError::Timeout(request_id.to_string())));
        }
    }
}

impl<P: Providers> Drop for CorrelationTable<P> {
    fn drop(&mut self) {
        for (_, entry) in self.pending.get_mut().drain() {
            entry.complete(Err(RequestError::Shutdown));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::TokioProviders;
    use tokio::task::LocalSet;

    fn table() -> Rc<CorrelationTable<TokioProviders>> {
        CorrelationTable::new(TokioProviders::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_completes_once() {
        LocalSet::new()
            .run_until(async {
                let table = table();
                let future = table.register("r1", Duration::from_secs(30)).expect("register");

                assert!(table.resolve("r1", json!({"ok": true})));
                assert!(!table.resolve("r1", json!({"ok": false})));

                assert_eq!(future.await, Ok(json!({"ok": true})));
                assert!(table.is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_request() {
        LocalSet::new()
            .run_until(async {
                let table = table();
                let future = table.register("r1", Duration::from_secs(30)).expect("register");

                let result = future.await;
                assert_eq!(result, Err(RequestError::Timeout("r1".into())));
                assert!(table.is_empty());

                // A late response is ignored.
                assert!(!table.resolve("r1", json!(null)));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_rejected() {
        LocalSet::new()
            .run_until(async {
                let table = table();
                let _first = table.register("r1", Duration::from_secs(30)).expect("register");
                let second = table.register("r1", Duration::from_secs(30));
                assert_eq!(second.err(), Some(RequestError::DuplicateId("r1".into())));
                assert_eq!(table.len(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_fail_reused_id() {
        LocalSet::new()
            .run_until(async {
                let table = table();
                let first = table.register("r1", Duration::from_secs(10)).expect("register");
                assert!(table.resolve("r1", json!(1)));
                assert_eq!(first.await, Ok(json!(1)));

                // Reuse the id with a longer timeout; the first timer must not touch it.
                let second = table.register("r1", Duration::from_secs(60)).expect("register");
                tokio::time::sleep(Duration::from_secs(20)).await;
                assert!(table.is_pending("r1"));

                assert!(table.resolve("r1", json!(2)));
                assert_eq!(second.await, Ok(json!(2)));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expires_overdue_entries() {
        LocalSet::new()
            .run_until(async {
                let table = table();
                let future = table.register("r1", Duration::from_secs(30)).expect("register");

                // Stall the per-request timer by cancelling it, then let time pass.
                if let Some(entry) = table.pending.borrow_mut().get_mut("r1") {
                    if let Some(timer) = entry.timer.take() {
                        timer.abort();
                    }
                }
                tokio::time::advance(Duration::from_secs(34)).await;
                assert!(table.sweep(Duration::from_secs(5)).is_empty());

                tokio::time::advance(Duration::from_secs(2)).await;
                assert_eq!(table.sweep(Duration::from_secs(5)), vec!["r1".to_string()]);
                assert_eq!(future.await, Err(RequestError::Expired("r1".into())));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_all_on_teardown() {
        LocalSet::new()
            .run_until(async {
                let table = table();
                let a = table.register("a", Duration::from_secs(30)).expect("register");
                let b = table.register("b", Duration::from_secs(30)).expect("register");

                assert_eq!(table.fail_all(RequestError::ConnectionClosed), 2);
                assert_eq!(a.await, Err(RequestError::ConnectionClosed));
                assert_eq!(b.await, Err(RequestError::ConnectionClosed));
                assert_eq!(table.fail_all(RequestError::ConnectionClosed), 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_withdraws_silently() {
        LocalSet::new()
            .run_until(async {
                let table = table();
                let future = table.register("r1", Duration::from_secs(30)).expect("register");
                assert!(table.cancel("r1"));
                assert!(!table.cancel("r1"));
                // Sender dropped without a result.
                assert_eq!(future.await, Err(RequestError::ConnectionClosed));
            })
            .await;
    }

    #[test]
    fn test_request_ids_are_distinct() {
        let ids = RequestIdFactory::new();
        let t = Duration::from_millis(1_700_000_000_000);
        let a = ids.next_id(t);
        let b = ids.next_id(t);
        assert_ne!(a, b);
        assert_eq!(a, "req-1700000000000-1");
    }
}
