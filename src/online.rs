//! Host connectivity signal.
//!
//! The host integration calls [`OnlineMonitor::report`] from its own
//! connectivity notifications; consumers read the latest value or follow
//! every transition.

use futures_util::stream::{self, Stream};
use std::net::UdpSocket;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone)]
pub struct OnlineMonitor {
    tx: watch::Sender<bool>,
}

impl OnlineMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    /// Seed from the host's current network state
    pub fn detect() -> Self {
        let online = host_has_route();
        info!(online, "Detected initial network state");
        Self::new(online)
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a connectivity change. Repeating the current value emits nothing.
    pub fn report(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(online, "Network state changed");
        }
    }

    /// Latest-value receiver
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// The current state followed by every transition.
    ///
    /// Ends only when the monitor itself is dropped.
    pub fn observe(&self) -> impl Stream<Item = bool> + Send + 'static {
        let rx = self.tx.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let online = *rx.borrow_and_update();
            Some((online, (rx, false)))
        })
    }
}

/// Whether the routing table has a default route.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn host_has_route() -> bool {
    let Ok(socket) = UdpSocket::bind("0.0.0.0:0") else {
        return false;
    };
    socket.connect("8.8.8.8:80").is_ok()
        && socket
            .local_addr()
            .map(|addr| !addr.ip().is_unspecified())
            .unwrap_or(false)
}
