//! Artifact kinds, naming, and the per-job artifact directory.
//!
//! Every artifact filename embeds the owning job id; the download path
//! re-verifies that before serving bytes, so one job can never serve
//! another's files.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Extraction,
    Cypher,
    Tuples,
    UploadResult,
    Backup,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::Extraction,
        ArtifactKind::Cypher,
        ArtifactKind::Tuples,
        ArtifactKind::UploadResult,
        ArtifactKind::Backup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Extraction => "extraction",
            ArtifactKind::Cypher => "cypher",
            ArtifactKind::Tuples => "tuples",
            ArtifactKind::UploadResult => "upload_result",
            ArtifactKind::Backup => "backup",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "extraction" => Ok(ArtifactKind::Extraction),
            "cypher" => Ok(ArtifactKind::Cypher),
            "tuples" => Ok(ArtifactKind::Tuples),
            "upload_result" => Ok(ArtifactKind::UploadResult),
            "backup" => Ok(ArtifactKind::Backup),
            other => Err(OrchestratorError::UnknownArtifactKind(other.to_string())),
        }
    }

    /// Canonical filename for one (job, kind) pair.
    pub fn file_name(&self, job_id: Uuid) -> String {
        match self {
            ArtifactKind::Extraction => format!("extraction_{job_id}.json"),
            ArtifactKind::Cypher => format!("cypher_{job_id}.script"),
            ArtifactKind::Tuples => format!("tuples_{job_id}.json"),
            ArtifactKind::UploadResult => format!("upload_result_{job_id}.json"),
            ArtifactKind::Backup => format!("backup_{job_id}.tar.gz"),
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Filesystem layout: `<root>/<job_id>/<kind>_<job_id>.<ext>`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    pub fn path_for(&self, job_id: Uuid, kind: ArtifactKind) -> PathBuf {
        self.job_dir(job_id).join(kind.file_name(job_id))
    }

    pub fn ensure_job_dir(&self, job_id: Uuid) -> Result<PathBuf> {
        let dir = self.job_dir(job_id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Read an artifact's bytes, verifying the path really belongs to the
    /// job. Returns the bytes and the suggested download filename.
    pub fn read(
        &self,
        job_id: Uuid,
        kind: ArtifactKind,
        registered_path: &Path,
    ) -> Result<(Vec<u8>, String)> {
        let file_name = registered_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !file_name.contains(&job_id.to_string()) {
            return Err(OrchestratorError::ArtifactMissing {
                job_id,
                kind: kind.as_str().to_string(),
            });
        }
        let bytes = std::fs::read(registered_path).map_err(|_| {
            OrchestratorError::ArtifactMissing {
                job_id,
                kind: kind.as_str().to_string(),
            }
        })?;
        Ok((bytes, file_name))
    }
}
