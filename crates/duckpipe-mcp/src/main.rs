use anyhow::Result;
use clap::{Parser, Subcommand};
use duckpipe_core::{SafeSearch, ToolOutput};
use duckpipe_local::{DuckDuckGoTools, EnvConfig, SearchArgs, ToolContext};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "stdio")]
mod mcp;

#[derive(Parser, Debug)]
#[command(name = "duckpipe")]
#[command(about = "DuckDuckGo web and image search (CLI + MCP stdio server)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server (for Cursor / MCP clients).
    #[cfg(feature = "stdio")]
    McpStdio(McpStdioCmd),
    /// Search the web and print `{ links, count }` (or a message).
    WebSearch(WebSearchCmd),
    /// Search images. With --download-dir, save them and print local paths.
    ImageSearch(ImageSearchCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct McpStdioCmd {
    /// Directory image_search downloads into. Unset: image URLs are returned instead.
    #[arg(long, env = "DUCKPIPE_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct SearchOpts {
    /// Search query.
    query: String,
    /// Results per page (1-10). DUCKPIPE_PAGE_SIZE, when set and not "auto", wins.
    #[arg(long)]
    page_size: Option<usize>,
    /// strict|moderate|off. DUCKPIPE_SAFE_SEARCH, when set and not "auto", wins.
    #[arg(long)]
    safe_search: Option<SafeSearch>,
    /// 1-based result page (1-100).
    #[arg(long)]
    page: Option<u32>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

impl SearchOpts {
    fn args(&self) -> SearchArgs {
        SearchArgs {
            query: self.query.clone(),
            page_size: self.page_size,
            safe_search: self.safe_search,
            page: self.page,
        }
    }
}

#[derive(clap::Args, Debug)]
struct WebSearchCmd {
    #[command(flatten)]
    opts: SearchOpts,
}

#[derive(clap::Args, Debug)]
struct ImageSearchCmd {
    #[command(flatten)]
    opts: SearchOpts,
    /// Save images here and print local paths instead of URLs.
    #[arg(long, env = "DUCKPIPE_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

/// `KEY=VALUE` lines; blanks and `#` comments are skipped.
fn parse_env_file(txt: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        out.push((k.to_string(), v.trim().to_string()));
    }
    out
}

/// Opt-in (DUCKPIPE_ENV_FILE). Never overrides the process environment; never logs values.
fn load_env_file() {
    let Ok(p) = std::env::var("DUCKPIPE_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for (k, v) in parse_env_file(&txt) {
        if std::env::var_os(&k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

fn init_tracing() {
    // stdout belongs to MCP framing; logs go to stderr.
    let filter = std::env::var("DUCKPIPE_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
        });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancels the returned token on the first Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            c.cancel();
        }
    });
    cancel
}

fn render_text(out: &ToolOutput) -> String {
    match out {
        ToolOutput::Links { links, .. } => links
            .iter()
            .map(|l| format!("{}\n  {}", l.label, l.url))
            .collect::<Vec<_>>()
            .join("\n"),
        ToolOutput::Images(items) => items.join("\n"),
        ToolOutput::Message(s) => s.clone(),
    }
}

fn print_output(out: &ToolOutput, format: &str) -> Result<()> {
    match format.to_ascii_lowercase().as_str() {
        "text" => println!("{}", render_text(out)),
        "json" => println!("{}", serde_json::to_string(out)?),
        other => anyhow::bail!("unknown output format {other:?} (expected json|text)"),
    }
    Ok(())
}

fn cli_context(download_dir: Option<PathBuf>) -> ToolContext {
    ToolContext::new()
        .with_config(Arc::new(EnvConfig))
        .with_cancel(ctrl_c_token())
        .with_working_dir(download_dir)
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();

    let cli = Cli::parse();

    let (out, format) = match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio(args) => {
            mcp::serve_stdio(args.download_dir)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            return Ok(());
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "duckpipe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("duckpipe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
            return Ok(());
        }
        Commands::WebSearch(cmd) => {
            let tools = DuckDuckGoTools::from_env()?;
            let out = tools.web_search(cmd.opts.args(), &cli_context(None)).await;
            (out, cmd.opts.output)
        }
        Commands::ImageSearch(cmd) => {
            let tools = DuckDuckGoTools::from_env()?;
            let ctx = cli_context(cmd.download_dir);
            let out = tools.image_search(cmd.opts.args(), &ctx).await;
            (out, cmd.opts.output)
        }
    };

    print_output(&out, &format)?;
    if out.is_error() {
        std::process::exit(1);
    }
    Ok(())
}
