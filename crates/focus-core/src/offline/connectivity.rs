//! Connectivity tracking and reconnect-triggered replay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::transport::SyncTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

/// Current reachability of the sync server, observable by subscribers
pub struct ConnectivityMonitor {
    state: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Online
    }

    /// Feed one reachability observation; returns the transition it caused
    pub fn observe(&self, reachable: bool) -> Option<Transition> {
        let next = if reachable {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        };

        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        changed.then(|| {
            let transition = if reachable {
                Transition::WentOnline
            } else {
                Transition::WentOffline
            };
            tracing::info!(?transition, "Connectivity changed");
            transition
        })
    }

    /// Probe the server once and record the result
    pub async fn probe<T: SyncTransport + ?Sized>(&self, transport: &T) -> Option<Transition> {
        let reachable = match transport.ping().await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!("Sync server probe failed: {error}");
                false
            }
        };
        self.observe(reachable)
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }
}

/// Reacts to the offline-to-online edge
#[async_trait]
pub trait ReconnectHandler: Send + Sync {
    async fn on_reconnect(&self);
}

/// Run `handler` every time the monitor goes from offline to online.
///
/// The worker exits when the monitor is dropped.
pub fn spawn_reconnect_worker<H>(monitor: &ConnectivityMonitor, handler: Arc<H>) -> JoinHandle<()>
where
    H: ReconnectHandler + ?Sized + 'static,
{
    let mut receiver = monitor.subscribe();
    tokio::spawn(async move {
        let mut previous = *receiver.borrow_and_update();
        while receiver.changed().await.is_ok() {
            let current = *receiver.borrow_and_update();
            if previous == ConnectivityState::Offline && current == ConnectivityState::Online {
                handler.on_reconnect().await;
            }
            previous = current;
        }
    })
}

/// Probe the server on a fixed interval until the monitor is dropped
pub fn spawn_probe_loop<T>(
    monitor: Arc<ConnectivityMonitor>,
    transport: Arc<T>,
    interval: Duration,
) -> JoinHandle<()>
where
    T: SyncTransport + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if Arc::strong_count(&monitor) == 1 {
                break;
            }
            monitor.probe(transport.as_ref()).await;
        }
    })
}
