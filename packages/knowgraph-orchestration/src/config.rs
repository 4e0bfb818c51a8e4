//! Orchestrator configuration, sourced from the environment.
//!
//! Unknown variables are ignored; malformed values fail startup.

use crate::error::{OrchestratorError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PhaseTimeouts {
    pub extract: Duration,
    pub transform: Duration,
    pub load: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            extract: Duration::from_secs(3600),
            transform: Duration::from_secs(3600),
            load: Duration::from_secs(7200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bind address for the HTTP front door (consumed by the front door,
    /// not by this crate).
    pub http_addr: Option<SocketAddr>,
    pub artifact_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub parse_max_file_bytes: Option<u64>,
    pub worker_min: Option<usize>,
    pub worker_max: Option<usize>,
    pub memory_soft_cap_mb: Option<u64>,
    /// Destructive loads snapshot the store, then clear it before loading.
    pub clear_before_load: bool,
    pub phase_timeouts: PhaseTimeouts,
    /// Retries per phase for retryable failures.
    pub max_phase_retries: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            http_addr: None,
            artifact_dir: PathBuf::from("artifacts"),
            cache_dir: None,
            backup_dir: None,
            parse_max_file_bytes: None,
            worker_min: None,
            worker_max: None,
            memory_soft_cap_mb: None,
            clear_before_load: false,
            phase_timeouts: PhaseTimeouts::default(),
            max_phase_retries: 1,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| OrchestratorError::Config(format!("malformed {name}: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.http_addr = env_parse::<SocketAddr>("ORCH_HTTP_ADDR")?;
        if let Ok(dir) = std::env::var("ARTIFACT_DIR") {
            config.artifact_dir = PathBuf::from(dir);
        }
        config.cache_dir = std::env::var("CACHE_DIR").ok().map(PathBuf::from);
        config.backup_dir = std::env::var("BACKUP_DIR").ok().map(PathBuf::from);
        config.parse_max_file_bytes = env_parse("PARSE_MAX_FILE_BYTES")?;
        config.worker_min = env_parse("PARSE_WORKER_MIN")?;
        config.worker_max = env_parse("PARSE_WORKER_MAX")?;
        config.memory_soft_cap_mb = env_parse("MEMORY_SOFT_CAP_MB")?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them serialized.
    static ENV_GUARD: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_phase_retries, 1);
        assert!(!config.clear_before_load);
        assert_eq!(config.phase_timeouts.load, Duration::from_secs(7200));
    }

    #[test]
    fn test_from_env_reads_values() {
        let _guard = ENV_GUARD.lock();
        std::env::set_var("ORCH_HTTP_ADDR", "127.0.0.1:8080");
        std::env::set_var("PARSE_MAX_FILE_BYTES", "1024");
        std::env::set_var("MEMORY_SOFT_CAP_MB", "512");

        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config.http_addr.unwrap().port(), 8080);
        assert_eq!(config.parse_max_file_bytes, Some(1024));
        assert_eq!(config.memory_soft_cap_mb, Some(512));

        std::env::remove_var("ORCH_HTTP_ADDR");
        std::env::remove_var("PARSE_MAX_FILE_BYTES");
        std::env::remove_var("MEMORY_SOFT_CAP_MB");
    }

    #[test]
    fn test_malformed_value_fails() {
        let _guard = ENV_GUARD.lock();
        std::env::set_var("PARSE_WORKER_MAX", "lots");
        let result = OrchestratorConfig::from_env();
        std::env::remove_var("PARSE_WORKER_MAX");
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }
}
