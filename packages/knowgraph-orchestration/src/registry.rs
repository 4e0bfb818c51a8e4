//! In-memory job registry behind a single owning task.
//!
//! All access goes through request/response messages, so the map itself is
//! never shared. Records do not survive a process restart; jobs pending at
//! shutdown are reported as unknown afterwards.

use crate::artifacts::ArtifactKind;
use crate::error::{JobError, OrchestratorError, Result};
use crate::job::{Job, JobPhase};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::error;
use uuid::Uuid;

/// Mutations the owning task applies to a job record.
#[derive(Debug)]
pub enum JobUpdate {
    Advance { phase: JobPhase, message: String },
    Progress { percent: u8, message: String },
    Artifact { kind: ArtifactKind, path: PathBuf },
    Fail(JobError),
    Cancel { reason: String },
}

enum Command {
    Insert(Job, oneshot::Sender<()>),
    Get(Uuid, oneshot::Sender<Option<Job>>),
    List(oneshot::Sender<Vec<Job>>),
    Apply(Uuid, JobUpdate, oneshot::Sender<Result<Job>>),
}

#[derive(Clone)]
pub struct JobRegistry {
    tx: mpsc::UnboundedSender<Command>,
}

impl JobRegistry {
    /// Spawn the owning task and return a handle.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        tokio::spawn(async move {
            let mut jobs: HashMap<Uuid, Job> = HashMap::new();
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Insert(job, reply) => {
                        jobs.insert(job.job_id, job);
                        let _ = reply.send(());
                    }
                    Command::Get(job_id, reply) => {
                        let _ = reply.send(jobs.get(&job_id).cloned());
                    }
                    Command::List(reply) => {
                        let mut all: Vec<Job> = jobs.values().cloned().collect();
                        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                        let _ = reply.send(all);
                    }
                    Command::Apply(job_id, update, reply) => {
                        let result = match jobs.get_mut(&job_id) {
                            None => Err(OrchestratorError::UnknownJob(job_id)),
                            Some(job) => apply_update(job, update).map(|_| job.clone()),
                        };
                        let _ = reply.send(result);
                    }
                }
            }
        });
        Self { tx }
    }

    async fn send<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| OrchestratorError::Registry("registry task gone".into()))?;
        reply_rx
            .await
            .map_err(|_| OrchestratorError::Registry("registry dropped reply".into()))
    }

    pub async fn insert(&self, job: Job) -> Result<()> {
        self.send(|reply| Command::Insert(job, reply)).await
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job> {
        self.send(move |reply| Command::Get(job_id, reply))
            .await?
            .ok_or(OrchestratorError::UnknownJob(job_id))
    }

    pub async fn list(&self) -> Result<Vec<Job>> {
        self.send(Command::List).await
    }

    pub async fn apply(&self, job_id: Uuid, update: JobUpdate) -> Result<Job> {
        self.send(move |reply| Command::Apply(job_id, update, reply))
            .await?
    }
}

fn apply_update(job: &mut Job, update: JobUpdate) -> Result<()> {
    match update {
        JobUpdate::Advance { phase, message } => job.advance(phase, message),
        JobUpdate::Progress { percent, message } => {
            job.set_progress(percent, message);
            Ok(())
        }
        JobUpdate::Artifact { kind, path } => {
            if job.is_terminal() {
                error!(job_id = %job.job_id, "artifact registered after terminal state");
                return Err(OrchestratorError::AlreadyTerminal(job.job_id));
            }
            job.add_artifact(kind, path);
            Ok(())
        }
        JobUpdate::Fail(job_error) => job.fail(job_error),
        JobUpdate::Cancel { reason } => job.cancel(reason),
    }
}
