//! Two-stage conversion of a validated bundle into spreadsheet artifacts.
//!
//! ```text
//! content root ──▶ conversion ──▶ json_output/ + excel1.xlsx
//!                                    │
//!                                    └──▶ extraction ──▶ excel2.xlsx
//! ```
//!
//! Extraction only runs when conversion exited zero and left at least one
//! file in `json_output/`. A zero exit code is not taken as proof of output:
//! after both stages the runner checks that both spreadsheets exist.

use super::stage::{run_stage, StageResult};
use super::Stage;
use crate::config::{GatewayConfig, ToolCommand};
use crate::error::{GatewayError, StageError, StageFailure};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Subdirectory of the result workspace receiving conversion output.
pub const JSON_OUTPUT_DIR: &str = "json_output";
/// Spreadsheet produced by the conversion stage.
pub const EXCEL1: &str = "excel1.xlsx";
/// Spreadsheet produced by the extraction stage.
pub const EXCEL2: &str = "excel2.xlsx";

/// Where a run's outputs live inside a result workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub json_dir: PathBuf,
    pub excel1: PathBuf,
    pub excel2: PathBuf,
}

impl Artifacts {
    pub fn in_workspace(workspace: &Path) -> Self {
        Self {
            json_dir: workspace.join(JSON_OUTPUT_DIR),
            excel1: workspace.join(EXCEL1),
            excel2: workspace.join(EXCEL2),
        }
    }
}

/// Everything one pipeline run produced, stage by stage.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub conversion: StageResult,
    /// `None` when conversion failed and extraction never ran.
    pub extraction: Option<StageResult>,
    pub artifacts: Artifacts,
}

impl PipelineRun {
    /// `Ok(artifacts)` when both stages succeeded, otherwise the first
    /// failing stage's error.
    pub fn into_result(self) -> Result<Artifacts, StageError> {
        if let Some(failure) = self.conversion.failure {
            return Err(StageError::new(Stage::Conversion, failure));
        }
        match self.extraction {
            Some(StageResult {
                failure: Some(failure),
                ..
            }) => Err(StageError::new(Stage::Extraction, failure)),
            Some(_) => Ok(self.artifacts),
            // Without an extraction run there is no excel2 to hand out.
            None => Err(StageError::new(
                Stage::Extraction,
                StageFailure::MissingArtifact {
                    path: self.artifacts.excel2,
                },
            )),
        }
    }
}

/// Sequences the conversion and extraction tools.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    conversion_tool: ToolCommand,
    extraction_tool: ToolCommand,
    stage_timeout: Duration,
}

impl PipelineRunner {
    pub fn new(conversion_tool: ToolCommand, extraction_tool: ToolCommand, stage_timeout: Duration) -> Self {
        Self {
            conversion_tool,
            extraction_tool,
            stage_timeout,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.conversion_tool.clone(),
            config.extraction_tool.clone(),
            config.stage_timeout,
        )
    }

    /// Run both stages for `content_root`, writing into `workspace`.
    ///
    /// Stage failures are reported inside the returned [`PipelineRun`];
    /// `Err` means the workspace itself could not be prepared.
    pub async fn run(
        &self,
        content_root: &Path,
        metadata: &Path,
        workspace: &Path,
    ) -> Result<PipelineRun, GatewayError> {
        let artifacts = Artifacts::in_workspace(workspace);
        reset_workspace(&artifacts).map_err(|e| {
            GatewayError::Internal(format!(
                "Failed to prepare result workspace '{}': {e}",
                workspace.display()
            ))
        })?;
        info!(
            "Pipeline start: {} (metadata {})",
            content_root.display(),
            metadata.display()
        );

        // ── Stage 1: conversion ──────────────────────────────────────────
        let mut conversion = run_stage(
            Stage::Conversion,
            &self.conversion_tool,
            &[content_root, &artifacts.json_dir, &artifacts.excel1],
            self.stage_timeout,
        )
        .await;

        if conversion.succeeded() && !has_entries(&artifacts.json_dir) {
            warn!("Conversion exited 0 but {} is empty", artifacts.json_dir.display());
            conversion.failure = Some(StageFailure::EmptyOutput {
                dir: artifacts.json_dir.clone(),
            });
        }
        if !conversion.succeeded() {
            return Ok(PipelineRun {
                conversion,
                extraction: None,
                artifacts,
            });
        }

        // ── Stage 2: extraction ──────────────────────────────────────────
        let mut extraction = run_stage(
            Stage::Extraction,
            &self.extraction_tool,
            &[&artifacts.json_dir, &artifacts.excel2],
            self.stage_timeout,
        )
        .await;

        // ── Verify artifacts ─────────────────────────────────────────────
        if extraction.succeeded() {
            if !artifacts.excel1.is_file() {
                conversion.failure = Some(StageFailure::MissingArtifact {
                    path: artifacts.excel1.clone(),
                });
            } else if !artifacts.excel2.is_file() {
                extraction.failure = Some(StageFailure::MissingArtifact {
                    path: artifacts.excel2.clone(),
                });
            }
        }

        info!(
            "Pipeline done: conversion {}ms, extraction {}ms, ok={}",
            conversion.duration_ms,
            extraction.duration_ms,
            conversion.succeeded() && extraction.succeeded()
        );
        Ok(PipelineRun {
            conversion,
            extraction: Some(extraction),
            artifacts,
        })
    }
}

/// Clear a previous run's outputs and create an empty `json_output/`.
fn reset_workspace(artifacts: &Artifacts) -> io::Result<()> {
    match fs::remove_dir_all(&artifacts.json_dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    for file in [&artifacts.excel1, &artifacts.excel2] {
        match fs::remove_file(file) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }
    fs::create_dir_all(&artifacts.json_dir)
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut read| read.next().is_some())
        .unwrap_or(false)
}
