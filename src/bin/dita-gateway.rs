//! CLI binary for dita-gateway.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `GatewayConfig`, then either runs the HTTP service or checks a local
//! bundle directory.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dita_gateway::{
    find_content_root, serve, validate, BundleLayout, GatewayConfig, ToolCommand,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port with the stock tools
  dita-gateway

  # Serve with custom tool commands and a shorter intake TTL
  dita-gateway serve --conversion-tool "python3 tools/dita2json.py" \
                     --intake-ttl-secs 900

  # Check an unpacked bundle without starting the server
  dita-gateway check ./manual --json

TOOLS:
  Conversion is invoked as   <conversion-tool> <content-root> <json-dir> <excel1>
  Extraction is invoked as   <extraction-tool> <json-dir> <excel2>
  Exit code 0 is success; stderr is reported verbatim on failure.
"#;

/// Upload, validate and convert zipped DITA bundles.
#[derive(Parser, Debug)]
#[command(
    name = "dita-gateway",
    version,
    about = "Upload, validate and convert zipped DITA bundles",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Debug logging.
    #[arg(short, long, global = true, env = "DITA_GATEWAY_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true, env = "DITA_GATEWAY_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default).
    Serve(ServeArgs),

    /// Check a local bundle directory and print the verdict.
    Check {
        /// Directory to search for the content root.
        dir: PathBuf,

        /// Print the verdict as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        layout: LayoutArgs,
    },
}

/// Bundle shape, shared by `serve` and `check`.
#[derive(Args, Debug, Clone)]
struct LayoutArgs {
    /// Extension of the content files, without the dot.
    #[arg(long, env = "DITA_GATEWAY_CONTENT_EXTENSION", default_value = "dita")]
    content_extension: String,

    /// Filename of the bundle metadata file.
    #[arg(long, env = "DITA_GATEWAY_METADATA_FILENAME", default_value = "infotree.xml")]
    metadata_filename: String,

    /// Subfolder of the content root searched first for the metadata file.
    #[arg(long, env = "DITA_GATEWAY_METADATA_SUBDIR", default_value = "out")]
    metadata_subdir: String,
}

impl LayoutArgs {
    fn into_layout(self) -> BundleLayout {
        BundleLayout {
            content_extension: self.content_extension,
            metadata_filename: self.metadata_filename,
            metadata_subdir: self.metadata_subdir,
        }
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    layout: LayoutArgs,

    /// Address to listen on.
    #[arg(long, env = "DITA_GATEWAY_BIND", default_value = "0.0.0.0:8000")]
    bind: Option<SocketAddr>,

    /// Root of the intake namespace (uploads).
    #[arg(long, env = "DITA_GATEWAY_TEMP_DIR", default_value = "temp")]
    temp_dir: Option<PathBuf>,

    /// Root of the results namespace (artifacts).
    #[arg(long, env = "DITA_GATEWAY_OUTPUT_DIR", default_value = "output")]
    output_dir: Option<PathBuf>,

    /// Directory holding index.html and its assets.
    #[arg(long, env = "DITA_GATEWAY_STATIC_DIR", default_value = "static")]
    static_dir: Option<PathBuf>,

    /// Conversion command line; paths are appended.
    #[arg(long, env = "DITA_GATEWAY_CONVERSION_TOOL", value_parser = parse_tool)]
    conversion_tool: Option<ToolCommand>,

    /// Extraction command line; paths are appended.
    #[arg(long, env = "DITA_GATEWAY_EXTRACTION_TOOL", value_parser = parse_tool)]
    extraction_tool: Option<ToolCommand>,

    /// Seconds before an untouched upload is evicted.
    #[arg(long, env = "DITA_GATEWAY_INTAKE_TTL_SECS")]
    intake_ttl_secs: Option<u64>,

    /// Seconds before an untouched result is evicted.
    #[arg(long, env = "DITA_GATEWAY_RESULTS_TTL_SECS")]
    results_ttl_secs: Option<u64>,

    /// Seconds between retention sweeps.
    #[arg(long, env = "DITA_GATEWAY_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Seconds before a running stage is killed.
    #[arg(long, env = "DITA_GATEWAY_STAGE_TIMEOUT_SECS")]
    stage_timeout_secs: Option<u64>,

    /// Largest accepted upload, in MiB.
    #[arg(long, env = "DITA_GATEWAY_MAX_UPLOAD_MB")]
    max_upload_mb: Option<u64>,

    /// Largest total size an archive may unpack to, in MiB.
    #[arg(long, env = "DITA_GATEWAY_MAX_EXTRACTED_MB")]
    max_extracted_mb: Option<u64>,
}

fn parse_tool(line: &str) -> Result<ToolCommand, String> {
    ToolCommand::parse(line).ok_or_else(|| "tool command must not be empty".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Some(Command::Check { dir, json, layout }) => check(&dir, json, layout.into_layout()),
        Some(Command::Serve(args)) => run_server(args).await,
        None => run_server(ServeArgs::parse_defaults()).await,
    }
}

impl ServeArgs {
    /// `serve` flags as if the subcommand had been given with no arguments,
    /// so environment variables still apply.
    fn parse_defaults() -> Self {
        #[derive(Parser)]
        struct Only {
            #[command(flatten)]
            args: ServeArgs,
        }
        Only::parse_from(["dita-gateway"]).args
    }
}

async fn run_server(args: ServeArgs) -> Result<()> {
    let config = build_config(args)?;
    serve(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl-C received, shutting down");
    })
    .await
    .context("Server failed")
}

/// Map CLI args to `GatewayConfig`.
fn build_config(args: ServeArgs) -> Result<GatewayConfig> {
    let mut builder = GatewayConfig::builder().layout(args.layout.into_layout());
    if let Some(bind) = args.bind {
        builder = builder.bind_addr(bind);
    }
    if let Some(dir) = args.temp_dir {
        builder = builder.intake_root(dir);
    }
    if let Some(dir) = args.output_dir {
        builder = builder.results_root(dir);
    }
    if let Some(dir) = args.static_dir {
        builder = builder.static_dir(dir);
    }
    if let Some(tool) = args.conversion_tool {
        builder = builder.conversion_tool(tool);
    }
    if let Some(tool) = args.extraction_tool {
        builder = builder.extraction_tool(tool);
    }
    if let Some(s) = args.intake_ttl_secs {
        builder = builder.intake_ttl(Duration::from_secs(s));
    }
    if let Some(s) = args.results_ttl_secs {
        builder = builder.results_ttl(Duration::from_secs(s));
    }
    if let Some(s) = args.sweep_interval_secs {
        builder = builder.sweep_interval(Duration::from_secs(s));
    }
    if let Some(s) = args.stage_timeout_secs {
        builder = builder.stage_timeout(Duration::from_secs(s));
    }
    if let Some(mb) = args.max_upload_mb {
        builder = builder.max_upload_bytes(mb.saturating_mul(1024 * 1024));
    }
    if let Some(mb) = args.max_extracted_mb {
        builder = builder.max_extracted_bytes(mb.saturating_mul(1024 * 1024));
    }
    builder.build().context("Invalid configuration")
}

/// Run discovery and validation against a local directory.
fn check(dir: &std::path::Path, json: bool, layout: BundleLayout) -> Result<()> {
    layout.validate().context("Invalid bundle layout")?;
    let discovery = find_content_root(dir, &layout);
    let verdict = discovery
        .clone()
        .into_result(&layout)
        .map(|(root, _)| validate(&root, &layout));

    let ok = matches!(verdict, Ok(ref v) if v.valid);
    let message = match &verdict {
        Ok(v) => v.message.clone(),
        Err(e) => e.to_string(),
    };

    if json {
        let report = serde_json::json!({
            "valid": ok,
            "message": message,
            "discovery": discovery,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise verdict")?
        );
    } else {
        let mark = if ok { green("✔") } else { red("✘") };
        println!("{mark}  {message}");
        if let Some(root) = &discovery.content_root {
            println!("   {}", dim(&format!("content root: {}", root.display())));
        }
        if let Some(meta) = &discovery.metadata {
            println!("   {}", dim(&format!("metadata:     {}", meta.display())));
        }
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_args(argv: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Some(Command::Serve(args)) => args,
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn layout_flags_reach_the_config() {
        let args = serve_args(&[
            "dita-gateway",
            "serve",
            "--content-extension",
            "xml",
            "--metadata-filename",
            "map.xml",
            "--metadata-subdir",
            "meta",
        ]);
        let config = build_config(args).unwrap();
        assert_eq!(config.layout.content_extension, "xml");
        assert_eq!(config.layout.metadata_filename, "map.xml");
        assert_eq!(config.layout.metadata_subdir, "meta");
    }

    #[test]
    fn layout_defaults_to_dita() {
        let config = build_config(serve_args(&["dita-gateway", "serve"])).unwrap();
        assert_eq!(config.layout, BundleLayout::default());
    }

    #[test]
    fn check_takes_the_same_layout_flags() {
        let cli = Cli::try_parse_from([
            "dita-gateway",
            "check",
            "./manual",
            "--metadata-subdir",
            "meta",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Check { layout, .. }) => {
                assert_eq!(layout.into_layout().metadata_subdir, "meta");
            }
            other => panic!("expected check, got {other:?}"),
        }
    }

    #[test]
    fn bad_layout_is_rejected() {
        let args = serve_args(&["dita-gateway", "serve", "--metadata-subdir", "a/b"]);
        assert!(build_config(args).is_err());
    }
}
