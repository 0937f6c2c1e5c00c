//! # dita-gateway
//!
//! Upload, validate and convert zipped DITA documentation bundles.
//!
//! ## Why this crate?
//!
//! Authors zip a DITA folder and upload it from whatever tool they have at
//! hand. By the time it arrives the bundle may be wrapped in extra folders
//! or littered with empty directories. This crate finds the real content
//! root, checks its shape before any expensive work starts, runs the two
//! external conversion tools with isolated failure reporting, and evicts
//! all intermediate state on a fixed retention policy.
//!
//! ## Pipeline Overview
//!
//! ```text
//! zip upload
//!  │
//!  ├─ 1. Intake     persist + unpack into temp/<token>/extracted
//!  ├─ 2. Discover   first non-empty dir holding *.dita, then infotree.xml
//!  ├─ 3. Validate   *.dita in root, infotree.xml in root or out/
//!  ├─ 4. Convert    tool A → json_output/ + excel1.xlsx
//!  ├─ 5. Extract    tool B → excel2.xlsx
//!  └─ 6. Download   output/<token>/<file>
//!
//!  (background) Sweep  temp/ after 1h, output/ after 24h
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dita_gateway::{serve, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::builder()
//!         .intake_root("temp")
//!         .results_root("output")
//!         .build()?;
//!     serve(config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `dita-gateway` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bundle;
pub mod config;
pub mod download;
pub mod error;
pub mod intake;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod store;
pub mod sweeper;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bundle::{find_content_root, locate_metadata, validate, Discovery, ValidationResult};
pub use config::{BundleLayout, GatewayConfig, GatewayConfigBuilder, ToolCommand};
pub use download::DownloadGateway;
pub use error::{GatewayError, StageError, StageFailure};
pub use intake::ArchiveIntake;
pub use pipeline::{PipelineRun, PipelineRunner, Stage, StageResult};
pub use server::{router, serve, serve_on, AppState};
pub use session::{SessionGates, SessionToken};
pub use store::{EphemeralStore, Namespace};
pub use sweeper::{RetentionSweeper, SweeperHandle, SweeperState};
