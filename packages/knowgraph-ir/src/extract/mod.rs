//! The extract phase: discovery, adaptive parallel parsing, artifact write.

mod discovery;
mod engine;
mod memory;

pub use discovery::{discover, DiscoveredFile, DiscoveryConfig, DEFAULT_EXCLUDED_DIRS};
pub use engine::{default_worker_max, ExtractionEngine, ExtractionSummary, ExtractorConfig};
pub use memory::MemoryMonitor;
