//! External conversion pipeline.
//!
//! ## Data Flow
//!
//! ```text
//! content root ──▶ conversion tool ──▶ extraction tool
//!                  (json + excel1)     (excel2)
//! ```
//!
//! 1. [`stage`]: run one external tool with captured output and a timeout
//! 2. [`runner`]: sequence both stages and verify their artifacts

pub mod runner;
pub mod stage;

use serde::Serialize;
use std::fmt;

pub use runner::{Artifacts, PipelineRun, PipelineRunner, EXCEL1, EXCEL2, JSON_OUTPUT_DIR};
pub use stage::{run_stage, StageResult};

/// Which of the two external stages a result or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Bundle → JSON directory + first spreadsheet.
    Conversion,
    /// JSON directory → second spreadsheet.
    Extraction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Conversion => "conversion",
            Stage::Extraction => "extraction",
        })
    }
}
