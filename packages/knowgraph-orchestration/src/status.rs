//! Status fan-out: phase events to subscribers.
//!
//! Phases push events over an unbounded mpsc the orchestrator owns, so the
//! orchestrator itself is never dropped. Subscribers hang off a per-job
//! broadcast channel with a bounded backlog; a subscriber that lags past
//! the backlog is disconnected by the broadcast semantics.

use dashmap::DashMap;
use knowgraph_ir::progress::ProgressEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const SUBSCRIBER_BACKLOG: usize = 256;

#[derive(Default)]
pub struct StatusChannel {
    channels: DashMap<Uuid, broadcast::Sender<ProgressEvent>>,
}

impl StatusChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, job_id: Uuid) -> broadcast::Sender<ProgressEvent> {
        self.channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_BACKLOG).0)
            .clone()
    }

    /// Subscribe to one job's progress stream.
    pub fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        self.sender(job_id).subscribe()
    }

    /// Fan an event out to current subscribers. Events to jobs nobody is
    /// watching are dropped silently.
    pub fn publish(&self, event: ProgressEvent) {
        if let Some(sender) = self.channels.get(&event.job_id) {
            let _ = sender.send(event);
        }
    }

    /// Tear down a finished job's channel.
    pub fn close(&self, job_id: Uuid) {
        self.channels.remove(&job_id);
    }
}
