//! knowgraph-ir: intermediate representation of a Python source tree.
//!
//! Walks a directory of Python files, parses each with tree-sitter into a
//! [`ParsedModule`], and assembles an [`ExtractionDocument`] artifact. Parsed
//! results are memoized in a content-addressed disk cache so unchanged files
//! are never re-parsed.
//!
//! The extraction pipeline:
//!
//! ```text
//! source_path ──► discovery ──► worker pool ──► ParsedModule per file
//!                                   │ (cache-aware, memory-adaptive)
//!                                   ▼
//!                           extraction_<job_id>.json
//! ```

pub mod cache;
pub mod errors;
pub mod extract;
pub mod ir;
pub mod parser;
pub mod progress;

pub use cache::{CacheConfig, CacheStats, ParseCache};
pub use errors::{IrError, Result};
pub use extract::{ExtractionEngine, ExtractionSummary, ExtractorConfig};
pub use ir::{
    ClassInfo, ExtractionDocument, ExtractionMetadata, ExtractionStatistics, FunctionInfo,
    ImportInfo, ParameterInfo, ParameterKind, ParseErrorInfo, ParsedModule, VariableInfo,
    VariableScope,
};
pub use parser::{PythonParser, PARSER_VERSION};
pub use progress::{ProgressEvent, ProgressKind, ProgressSender};
