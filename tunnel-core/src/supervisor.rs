//! Resource registry and orderly teardown (§4.1).
//!
//! Generalizes the teacher's `Vec<JoinHandle<()>>` + `drain_handlers`
//! idiom (`tunnel/dispatcher.rs`) into a registry keyed by identity: every
//! resource is a spawned task paired with a one-shot "please terminate"
//! signal. `stop()` fires every signal, then joins every handle, so it
//! only resolves once every resource has actually finished (not just been
//! asked to finish).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::state::{EndpointState, StateBroadcaster};

struct Registered {
    trigger: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// The common supervisory base shared by `TunnelServer` and `TunnelClient`
/// (§2). One instance per endpoint process.
pub struct Supervisor {
    aborted: AtomicBool,
    state: StateBroadcaster,
    next_id: AtomicU64,
    closeables: Mutex<HashMap<u64, Registered>>,
    destroyables: Mutex<HashMap<u64, Registered>>,
    timers: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    session_generation: AtomicU64,
    active_streams: Mutex<HashSet<u64>>,
    stream_counter: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    streams_opened: AtomicU64,
    streams_closed: AtomicU64,
}

/// A snapshot of the supervisor's ambient traffic counters (not part of
/// the spec's data model; mirrors the teacher's `ProxyMetrics`), reported
/// once at `stopped` rather than exported to any external system.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub streams_opened: u64,
    pub streams_closed: u64,
}

impl Supervisor {
    pub fn new() -> (std::sync::Arc<Self>, tokio::sync::watch::Receiver<EndpointState>) {
        let (state, rx) = StateBroadcaster::new(EndpointState::Stopped);
        let sup = std::sync::Arc::new(Self {
            aborted: AtomicBool::new(false),
            state,
            next_id: AtomicU64::new(1),
            closeables: Mutex::new(HashMap::new()),
            destroyables: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            session_generation: AtomicU64::new(0),
            active_streams: Mutex::new(HashSet::new()),
            stream_counter: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            streams_opened: AtomicU64::new(0),
            streams_closed: AtomicU64::new(0),
        });
        (sup, rx)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EndpointState {
        self.state.current()
    }

    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<EndpointState> {
        self.state.subscribe()
    }

    pub async fn wait_until(&self, target: EndpointState) {
        self.state.wait_until(target).await;
    }

    /// The single call site that updates observable state (§9).
    pub fn set_state(&self, state: EndpointState) {
        self.state.set(state);
    }

    /// Register a graceful-close resource (listener, H2 session). `task`
    /// receives the "please close" signal and must act on it; it is run
    /// to completion either way. Returns the resource id.
    pub fn spawn_closeable<Fut>(
        self: &std::sync::Arc<Self>,
        task: impl FnOnce(oneshot::Receiver<()>) -> Fut + Send + 'static,
    ) -> u64
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_registered(task, true)
    }

    /// Register a forceful-destroy resource (socket, stream). Same
    /// contract as [`spawn_closeable`], distinguished only by which
    /// registry (and therefore which half of §8's I1) it belongs to.
    pub fn spawn_destroyable<Fut>(
        self: &std::sync::Arc<Self>,
        task: impl FnOnce(oneshot::Receiver<()>) -> Fut + Send + 'static,
    ) -> u64
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_registered(task, false)
    }

    fn spawn_registered<Fut>(
        self: &std::sync::Arc<Self>,
        task: impl FnOnce(oneshot::Receiver<()>) -> Fut + Send + 'static,
        closeable: bool,
    ) -> u64
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (trigger, rx) = oneshot::channel();
        let aborted_on_arrival = self.is_aborted();
        if aborted_on_arrival {
            // Invariant 4: a late arrival after stop() is destroyed
            // immediately — drop the trigger so `rx` resolves right away
            // and never register it in a registry `stop()` already drained.
            drop(trigger);
            tokio::spawn(task(rx));
            return id;
        }

        let sup = std::sync::Arc::clone(self);
        let handle = tokio::spawn(async move {
            task(rx).await;
            sup.deregister(id, closeable);
        });

        let registry = if closeable {
            &self.closeables
        } else {
            &self.destroyables
        };
        registry
            .lock()
            .unwrap()
            .insert(id, Registered { trigger, handle });
        id
    }

    fn deregister(&self, id: u64, closeable: bool) {
        let registry = if closeable {
            &self.closeables
        } else {
            &self.destroyables
        };
        registry.lock().unwrap().remove(&id);
    }

    /// Enroll a one-shot timer (§4.1 `schedule`). Suppressed entirely
    /// once `aborted` (I7) rather than scheduled-then-cancelled.
    pub fn schedule<F, Fut>(self: &std::sync::Arc<Self>, delay: std::time::Duration, f: F) -> u64
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.is_aborted() {
            return id;
        }
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let sup = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    sup.timers.lock().unwrap().remove(&id);
                    f().await;
                }
                _ = &mut cancel_rx => {
                    sup.timers.lock().unwrap().remove(&id);
                }
            }
        });
        self.timers.lock().unwrap().insert(id, cancel_tx);
        id
    }

    pub fn cancel_timer(&self, id: u64) {
        if let Some(tx) = self.timers.lock().unwrap().remove(&id) {
            let _ = tx.send(());
        }
    }

    /// Bump the session generation and return the new token. A writer
    /// that holds a stale token knows its session has been preempted
    /// (§4.5 latest-wins) or torn down, without needing a shared lock.
    pub fn begin_session(&self) -> u64 {
        self.session_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn end_session(&self, generation: u64) {
        // Only clear if nothing newer has already preempted it.
        let _ = self.session_generation.compare_exchange(
            generation,
            generation,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn is_current_session(&self, generation: u64) -> bool {
        self.session_generation.load(Ordering::Acquire) == generation
    }

    pub fn next_stream_id(&self) -> u64 {
        self.stream_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn track_stream(&self, id: u64) {
        self.active_streams.lock().unwrap().insert(id);
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn untrack_stream(&self, id: u64) {
        self.active_streams.lock().unwrap().remove(&id);
        self.streams_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_stream_count(&self) -> usize {
        self.active_streams.lock().unwrap().len()
    }

    pub fn record_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_closed: self.streams_closed.load(Ordering::Relaxed),
        }
    }

    /// Ask every registered resource to terminate and wait for all of
    /// them to actually do so. Idempotent (§4.1, L2): a second call just
    /// waits for the first to finish.
    pub async fn stop(self: &std::sync::Arc<Self>) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            self.wait_until(EndpointState::Stopped).await;
            return;
        }
        self.set_state(EndpointState::Stopping);

        let timers: Vec<_> = self.timers.lock().unwrap().drain().collect();
        for (_, cancel) in timers {
            let _ = cancel.send(());
        }

        let closeables: Vec<_> = self.closeables.lock().unwrap().drain().collect();
        let destroyables: Vec<_> = self.destroyables.lock().unwrap().drain().collect();

        let mut handles = Vec::with_capacity(closeables.len() + destroyables.len());
        for (_, r) in closeables.into_iter().chain(destroyables.into_iter()) {
            let _ = r.trigger.send(());
            handles.push(r.handle);
        }
        for h in handles {
            let _ = h.await;
        }

        self.set_state(EndpointState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_drains_both_registries() {
        let (supervisor, _rx) = Supervisor::new();
        supervisor.spawn_closeable(|mut stop| async move {
            let _ = (&mut stop).await;
        });
        supervisor.spawn_destroyable(|mut stop| async move {
            let _ = (&mut stop).await;
        });

        supervisor.stop().await;

        assert!(supervisor.closeables.lock().unwrap().is_empty());
        assert!(supervisor.destroyables.lock().unwrap().is_empty());
        assert_eq!(supervisor.state(), EndpointState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (supervisor, _rx) = Supervisor::new();
        supervisor.stop().await;
        supervisor.stop().await;
        assert_eq!(supervisor.state(), EndpointState::Stopped);
    }

    #[tokio::test]
    async fn late_arrival_after_stop_is_not_registered() {
        let (supervisor, _rx) = Supervisor::new();
        supervisor.stop().await;

        let (ran_tx, ran_rx) = tokio::sync::oneshot::channel();
        supervisor.spawn_closeable(move |_stop| async move {
            let _ = ran_tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(1), ran_rx)
            .await
            .expect("late task should still run to completion")
            .unwrap();
        assert!(supervisor.closeables.lock().unwrap().is_empty());
    }

    #[test]
    fn session_generation_tracks_latest_wins() {
        let (supervisor, _rx) = Supervisor::new();
        let first = supervisor.begin_session();
        assert!(supervisor.is_current_session(first));

        let second = supervisor.begin_session();
        assert!(!supervisor.is_current_session(first));
        assert!(supervisor.is_current_session(second));
    }

    #[test]
    fn stream_tracking() {
        let (supervisor, _rx) = Supervisor::new();
        supervisor.track_stream(1);
        supervisor.track_stream(2);
        assert_eq!(supervisor.active_stream_count(), 2);
        supervisor.untrack_stream(1);
        assert_eq!(supervisor.active_stream_count(), 1);
    }

    #[test]
    fn metrics_accumulate() {
        let (supervisor, _rx) = Supervisor::new();
        supervisor.track_stream(1);
        supervisor.record_sent(3);
        supervisor.record_received(7);
        supervisor.untrack_stream(1);

        let metrics = supervisor.metrics();
        assert_eq!(metrics.streams_opened, 1);
        assert_eq!(metrics.streams_closed, 1);
        assert_eq!(metrics.bytes_sent, 3);
        assert_eq!(metrics.bytes_received, 7);
    }
}
