//! Periodic tick scheduler
//!
//! External-collaborator seam for timed work: callers register named
//! periods and receive ticks over a channel. The cluster node uses it to
//! publish statistics snapshots; monitor implementations live outside
//! this crate.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One named tick delivered to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub name: String,
}

/// Hands out named periodic ticks over a single channel
pub struct TickScheduler {
    tx: mpsc::Sender<Tick>,
}

impl TickScheduler {
    /// Create a scheduler and the receiving end for its ticks
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Tick>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Start delivering a named tick every `period`. The task ends when the
    /// receiver goes away.
    pub fn schedule(&self, name: impl Into<String>, period: Duration) -> JoinHandle<()> {
        let name = name.into();
        let tx = self.tx.clone();
        log::debug!("Scheduling tick {:?} every {:?}", name, period);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick of tokio's interval fires immediately; skip it
            // so a period means "after period, then every period"
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(Tick { name: name.clone() }).await.is_err() {
                    break;
                }
            }
        })
    }
}
