//! Progress events emitted by long-running phases.
//!
//! Each phase is handed a [`ProgressSender`] and reports at its suspension
//! points (per file, per batch). The orchestrator consumes the events,
//! updates the job record, and fans them out to subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Started,
    Progress,
    StepCompleted,
    Warning,
    Error,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub phase: String,
    pub kind: ProgressKind,
    pub current: u64,
    pub total: u64,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Handle a phase uses to publish progress. A sender constructed with
/// [`ProgressSender::null`] swallows everything, so library callers that
/// do not care about progress pay nothing.
#[derive(Clone)]
pub struct ProgressSender {
    job_id: Uuid,
    phase: &'static str,
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSender {
    pub fn new(
        job_id: Uuid,
        phase: &'static str,
        tx: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            job_id,
            phase,
            tx: Some(tx),
        }
    }

    pub fn null(job_id: Uuid, phase: &'static str) -> Self {
        Self {
            job_id,
            phase,
            tx: None,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn phase(&self) -> &'static str {
        self.phase
    }

    fn send(&self, kind: ProgressKind, current: u64, total: u64, message: String) {
        self.send_with_metadata(kind, current, total, message, serde_json::Value::Null);
    }

    pub fn send_with_metadata(
        &self,
        kind: ProgressKind,
        current: u64,
        total: u64,
        message: String,
        metadata: serde_json::Value,
    ) {
        if let Some(tx) = &self.tx {
            // Receiver gone means the job was torn down; nothing to do.
            let _ = tx.send(ProgressEvent {
                job_id: self.job_id,
                phase: self.phase.to_string(),
                kind,
                current,
                total,
                message,
                metadata,
            });
        }
    }

    pub fn started(&self, total: u64, message: impl Into<String>) {
        self.send(ProgressKind::Started, 0, total, message.into());
    }

    pub fn progress(&self, current: u64, total: u64, message: impl Into<String>) {
        self.send(ProgressKind::Progress, current, total, message.into());
    }

    pub fn step_completed(&self, current: u64, total: u64, message: impl Into<String>) {
        self.send(ProgressKind::StepCompleted, current, total, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.send(ProgressKind::Warning, 0, 0, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(ProgressKind::Error, 0, 0, message.into());
    }

    pub fn finished(&self, total: u64, message: impl Into<String>, metadata: serde_json::Value) {
        self.send_with_metadata(ProgressKind::Finished, total, total, message.into(), metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job_id = Uuid::new_v4();
        let sender = ProgressSender::new(job_id, "extract", tx);

        sender.started(3, "discovered 3 files");
        sender.progress(1, 3, "a.py");
        sender.finished(3, "done", serde_json::json!({"parsed": 3}));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, ProgressKind::Started);
        assert_eq!(first.total, 3);
        assert_eq!(first.phase, "extract");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, ProgressKind::Progress);
        assert_eq!(second.current, 1);

        let third = rx.recv().await.unwrap();
        assert_eq!(third.kind, ProgressKind::Finished);
        assert_eq!(third.current, third.total);
    }

    #[test]
    fn test_null_sender_is_silent() {
        let sender = ProgressSender::null(Uuid::new_v4(), "extract");
        sender.started(1, "no-op");
        sender.finished(1, "no-op", serde_json::Value::Null);
    }
}
