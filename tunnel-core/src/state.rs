//! Observable endpoint state machine (§4.1, §9 "event-driven to explicit
//! state machine"). A single `watch` channel is the one call site that
//! updates state; everything else only ever reads or awaits it, so there
//! is no `updateHook`-style fan-out to get out of sync.

use tokio::sync::watch;

/// The lifecycle of one endpoint (`TunnelServer` or `TunnelClient`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// `start()` has not completed yet, or `stop()` has fully drained.
    Stopped,
    /// Listening for inbound connections; no live tunnel/session yet, or
    /// the previous one was lost (server-side "idle wait").
    Listening,
    /// A tunnel TLS socket exists but the HTTP/2 session has not yet
    /// exchanged a SETTINGS frame with the peer.
    Disconnected,
    /// The HTTP/2 session is up (remote SETTINGS observed) and proxy
    /// traffic may be bridged.
    Connected,
    /// `stop()` has been invoked and resources are draining.
    Stopping,
}

impl EndpointState {
    fn token(self) -> &'static str {
        match self {
            EndpointState::Stopped => "stopped",
            EndpointState::Listening => "listening",
            EndpointState::Disconnected => "disconnected",
            EndpointState::Connected => "connected",
            EndpointState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Broadcasts `EndpointState` transitions and lets late subscribers
/// observe a state already reached without missing it (§5 "late
/// subscribers... return immediately").
#[derive(Clone)]
pub struct StateBroadcaster {
    tx: watch::Sender<EndpointState>,
}

impl StateBroadcaster {
    pub fn new(initial: EndpointState) -> (Self, watch::Receiver<EndpointState>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }

    pub fn set(&self, state: EndpointState) {
        // `send` only errors if every receiver has been dropped, which is
        // fine during shutdown — there is nothing left to notify.
        let _ = self.tx.send(state);
    }

    pub fn current(&self) -> EndpointState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EndpointState> {
        self.tx.subscribe()
    }

    /// Resolve as soon as `target` is (or was already) reached.
    pub async fn wait_until(&self, target: EndpointState) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() == target {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() == target {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn token_round_trips_for_log_lines() {
        assert_eq!(EndpointState::Listening.to_string(), "listening");
        assert_eq!(EndpointState::Connected.to_string(), "connected");
        assert_eq!(EndpointState::Disconnected.to_string(), "disconnected");
        assert_eq!(EndpointState::Stopping.to_string(), "stopping");
        assert_eq!(EndpointState::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn wait_until_already_reached_state_returns_immediately() {
        let (broadcaster, _rx) = StateBroadcaster::new(EndpointState::Connected);
        tokio::time::timeout(
            Duration::from_millis(50),
            broadcaster.wait_until(EndpointState::Connected),
        )
        .await
        .expect("should not block on an already-reached state");
    }

    #[tokio::test]
    async fn wait_until_observes_a_later_transition() {
        let (broadcaster, _rx) = StateBroadcaster::new(EndpointState::Listening);
        let waiter = tokio::spawn({
            let broadcaster = broadcaster.clone();
            async move { broadcaster.wait_until(EndpointState::Connected).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        broadcaster.set(EndpointState::Disconnected);
        broadcaster.set(EndpointState::Connected);

        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("wait_until should resolve once Connected is reached")
            .unwrap();
    }
}
