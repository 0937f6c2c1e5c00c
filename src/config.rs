//! Configuration types for the gateway service.
//!
//! All service behaviour is controlled through [`GatewayConfig`], built via
//! its [`GatewayConfigBuilder`]. The bundle shape itself lives in
//! [`BundleLayout`]: discovery and validation never hard-code the content
//! extension or the metadata filename, they read them from here.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// The structural shape a document bundle must have.
///
/// The defaults describe a DITA bundle: `.dita` topics in the content root
/// and an `infotree.xml` beside them or under `out/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleLayout {
    /// Extension of the primary content files, without the leading dot.
    pub content_extension: String,
    /// Fixed filename of the bundle's metadata file.
    pub metadata_filename: String,
    /// Subdirectory of the content root checked first for the metadata file.
    pub metadata_subdir: String,
}

impl Default for BundleLayout {
    fn default() -> Self {
        Self {
            content_extension: "dita".to_string(),
            metadata_filename: "infotree.xml".to_string(),
            metadata_subdir: "out".to_string(),
        }
    }
}

impl BundleLayout {
    /// `true` when `name` has the primary content extension.
    pub fn is_content_file(&self, name: &str) -> bool {
        name.len() > self.content_extension.len() + 1
            && name.ends_with(&self.content_extension)
            && name[..name.len() - self.content_extension.len()].ends_with('.')
    }

    /// Reject extensions and names that could not appear as a single path
    /// component.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let ext = &self.content_extension;
        if ext.is_empty() || ext.contains('.') || has_separator(ext) {
            return Err(GatewayError::InvalidConfig(format!(
                "content extension must be a bare extension like 'dita', got '{ext}'"
            )));
        }
        for (what, value) in [
            ("metadata filename", &self.metadata_filename),
            ("metadata subdirectory", &self.metadata_subdir),
        ] {
            if value.is_empty() || value == "." || value == ".." || has_separator(value) {
                return Err(GatewayError::InvalidConfig(format!(
                    "{what} must be a single path component, got '{value}'"
                )));
            }
        }
        Ok(())
    }
}

fn has_separator(s: &str) -> bool {
    s.contains('/') || s.contains('\\')
}

/// An external tool invocation: a program plus leading arguments.
///
/// Stage-specific positional paths are appended after `args`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Parse a whitespace-separated command line such as `"python dita2json.py"`.
    ///
    /// Returns `None` for a blank string.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }
}

/// Configuration for the gateway service.
///
/// Built via [`GatewayConfig::builder()`] or using
/// [`GatewayConfig::default()`].
///
/// # Example
/// ```rust
/// use dita_gateway::GatewayConfig;
/// use std::time::Duration;
///
/// let config = GatewayConfig::builder()
///     .intake_root("/var/tmp/dita/temp")
///     .results_root("/var/tmp/dita/output")
///     .stage_timeout(Duration::from_secs(120))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Root of the intake namespace (uploads and extracted archives). Default: `temp`.
    pub intake_root: PathBuf,

    /// Root of the results namespace (pipeline outputs). Default: `output`.
    pub results_root: PathBuf,

    /// Directory holding `index.html` for the landing page. Default: `static`.
    pub static_dir: PathBuf,

    /// Address the HTTP server listens on. Default: `0.0.0.0:8000`.
    pub bind_addr: SocketAddr,

    /// Shape of an acceptable bundle.
    pub layout: BundleLayout,

    /// Age after which an intake workspace is evicted. Default: 1 hour.
    ///
    /// Uploads are only needed until `/api/validate` has run, so they are
    /// reclaimed aggressively.
    pub intake_ttl: Duration,

    /// Age after which a result workspace is evicted. Default: 24 hours.
    pub results_ttl: Duration,

    /// Pause between two retention sweeps. Default: 10 minutes.
    pub sweep_interval: Duration,

    /// Stage 1: bundle → JSON directory + first spreadsheet.
    pub conversion_tool: ToolCommand,

    /// Stage 2: JSON directory → second spreadsheet.
    pub extraction_tool: ToolCommand,

    /// Wall-clock limit for each external stage. Default: 600 seconds.
    ///
    /// A stage that overruns is killed and reported as timed out, so one
    /// wedged tool cannot hold a request forever.
    pub stage_timeout: Duration,

    /// Maximum size of an uploaded archive in bytes. Default: 512 MiB.
    pub max_upload_bytes: u64,

    /// Maximum total decompressed size of an archive in bytes. Default: 2 GiB.
    pub max_extracted_bytes: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            intake_root: PathBuf::from("temp"),
            results_root: PathBuf::from("output"),
            static_dir: PathBuf::from("static"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            layout: BundleLayout::default(),
            intake_ttl: Duration::from_secs(60 * 60),
            results_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            conversion_tool: ToolCommand::new("python").arg("dita2json.py"),
            extraction_tool: ToolCommand::new("python").arg("e_extract.py"),
            stage_timeout: Duration::from_secs(600),
            max_upload_bytes: 512 * 1024 * 1024,
            max_extracted_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    /// Create a new builder for `GatewayConfig`.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn intake_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.intake_root = path.into();
        self
    }

    pub fn results_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.results_root = path.into();
        self
    }

    pub fn static_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.static_dir = path.into();
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn layout(mut self, layout: BundleLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn intake_ttl(mut self, ttl: Duration) -> Self {
        self.config.intake_ttl = ttl;
        self
    }

    pub fn results_ttl(mut self, ttl: Duration) -> Self {
        self.config.results_ttl = ttl;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn conversion_tool(mut self, tool: ToolCommand) -> Self {
        self.config.conversion_tool = tool;
        self
    }

    pub fn extraction_tool(mut self, tool: ToolCommand) -> Self {
        self.config.extraction_tool = tool;
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.config.stage_timeout = timeout;
        self
    }

    pub fn max_upload_bytes(mut self, n: u64) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn max_extracted_bytes(mut self, n: u64) -> Self {
        self.config.max_extracted_bytes = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GatewayConfig, GatewayError> {
        let c = &self.config;
        c.layout.validate()?;

        for (what, d) in [
            ("intake TTL", c.intake_ttl),
            ("results TTL", c.results_ttl),
            ("sweep interval", c.sweep_interval),
            ("stage timeout", c.stage_timeout),
        ] {
            if d.is_zero() {
                return Err(GatewayError::InvalidConfig(format!("{what} must be > 0")));
            }
        }
        for (what, tool) in [
            ("conversion tool", &c.conversion_tool),
            ("extraction tool", &c.extraction_tool),
        ] {
            if tool.program.trim().is_empty() {
                return Err(GatewayError::InvalidConfig(format!(
                    "{what} program must not be empty"
                )));
            }
        }
        if c.max_upload_bytes == 0 || c.max_extracted_bytes == 0 {
            return Err(GatewayError::InvalidConfig(
                "Size limits must be ≥ 1 byte".into(),
            ));
        }
        if c.intake_root == c.results_root {
            return Err(GatewayError::InvalidConfig(
                "intake and results roots must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = GatewayConfig::default();
        assert_eq!(c.intake_ttl, Duration::from_secs(3600));
        assert_eq!(c.results_ttl, Duration::from_secs(86_400));
        assert_eq!(c.sweep_interval, Duration::from_secs(600));
        assert_eq!(c.layout.content_extension, "dita");
        assert_eq!(c.layout.metadata_filename, "infotree.xml");
        assert_eq!(c.layout.metadata_subdir, "out");
        assert!(GatewayConfig::builder().build().is_ok());
    }

    #[test]
    fn content_file_matching() {
        let layout = BundleLayout::default();
        assert!(layout.is_content_file("a.dita"));
        assert!(layout.is_content_file("DTA1000.dita"));
        assert!(!layout.is_content_file(".dita"));
        assert!(!layout.is_content_file("a.ditamap"));
        assert!(!layout.is_content_file("adita"));
        assert!(!layout.is_content_file("a.dita.bak"));
    }

    #[test]
    fn rejects_bad_layout() {
        let bad = BundleLayout {
            content_extension: ".dita".into(),
            ..BundleLayout::default()
        };
        assert!(GatewayConfig::builder().layout(bad).build().is_err());

        let bad = BundleLayout {
            metadata_subdir: "../up".into(),
            ..BundleLayout::default()
        };
        assert!(GatewayConfig::builder().layout(bad).build().is_err());
    }

    #[test]
    fn rejects_zero_durations_and_shared_roots() {
        assert!(GatewayConfig::builder()
            .stage_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(GatewayConfig::builder()
            .intake_root("same")
            .results_root("same")
            .build()
            .is_err());
    }

    #[test]
    fn tool_command_parse() {
        let t = ToolCommand::parse("python  dita2json.py ").unwrap();
        assert_eq!(t.program, "python");
        assert_eq!(t.args, vec!["dita2json.py".to_string()]);
        assert!(ToolCommand::parse("   ").is_none());
    }
}
