use super::node::{StorageNode, Topology};
use super::session::Session;
use log::{debug, warn};
use std::{sync::Weak, time::Duration};
use tokio::{
    select,
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Shortest accepted refresh period.
pub const MIN_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Background task refreshing peer counts from a session's node.
///
/// Ticks while the consumer is hidden or the session has shut its node down
/// are skipped, not treated as errors. The loop ends only when cancelled.
pub struct TopologyPoller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    updates: watch::Receiver<Topology>,
}

impl TopologyPoller {
    /// The first refresh happens one `period` after spawning. Periods below
    /// [`MIN_POLL_PERIOD`] are raised to it.
    pub fn spawn(session: &Session, period: Duration, visible: watch::Receiver<bool>) -> Self {
        if period < MIN_POLL_PERIOD {
            warn!("topology poll period {:?} raised to {:?}", period, MIN_POLL_PERIOD);
        }
        let period = period.max(MIN_POLL_PERIOD);
        let (sender, updates) = watch::channel(Topology::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            session.watch_node(),
            session.released(),
            period,
            visible,
            sender,
            cancel.clone(),
        ));
        Self {
            cancel,
            handle,
            updates,
        }
    }

    pub fn updates(&self) -> watch::Receiver<Topology> {
        self.updates.clone()
    }

    pub fn latest(&self) -> Topology {
        *self.updates.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the loop and waits for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("topology poller exited abnormally: {}", e);
        }
    }
}

async fn run(
    node: Option<Weak<dyn StorageNode>>,
    released: CancellationToken,
    period: Duration,
    visible: watch::Receiver<bool>,
    sender: watch::Sender<Topology>,
    cancel: CancellationToken,
) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            _ = cancel.cancelled() => {
                debug!("topology poller cancelled");
                return;
            }
            _ = interval.tick() => {
                if released.is_cancelled() || !*visible.borrow() {
                    continue;
                }
                let node = match node.as_ref().and_then(|node| node.upgrade()) {
                    Some(node) => node,
                    None => continue,
                };
                match node.topology().await {
                    Ok(topology) => {
                        debug!(
                            "connected with {} peers of {}",
                            topology.connected, topology.population
                        );
                        let _ = sender.send(topology);
                    }
                    Err(e) => warn!("failed to refresh topology: {}", e),
                }
            }
        }
    }
}
