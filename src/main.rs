use std::fs::{self, File};
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use coalesce::app::{self, App, Note};
use coalesce::host::{ChannelNavigator, SharedSettings};
use coalesce::render::TerminalMarkdownRenderer;
use coalesce::vault::Vault;
use coalesce::{BoundaryStrategyKind, CoalesceManager};

const PLAIN_BACKLINKS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(
    name = "coalesce",
    version,
    about = "Read a markdown note with its backlinks shown in context"
)]
struct Cli {
    /// Note path. Use '-' to read from stdin.
    input: Option<String>,

    /// Vault directory. Defaults to the note's folder.
    #[arg(long)]
    vault: Option<PathBuf>,

    /// How much text around each backlink to show.
    #[arg(long, value_enum, default_value_t = BoundaryStrategyKind::Default)]
    strategy: BoundaryStrategyKind,

    /// Force interactive pager mode.
    #[arg(short, long, conflicts_with = "plain")]
    interactive: bool,

    /// Force plain stdout rendering.
    #[arg(long)]
    plain: bool,

    /// Reload when notes in the vault change (file input only).
    #[arg(long)]
    watch: bool,

    /// Write logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

enum InputSource {
    File(PathBuf),
    Stdin,
}

fn detect_input(cli: &Cli) -> Result<InputSource> {
    match cli.input.as_deref() {
        Some("-") => Ok(InputSource::Stdin),
        Some(path) => Ok(InputSource::File(PathBuf::from(path))),
        None if io::stdin().is_terminal() => Err(anyhow!(
            "No input provided. Pass a markdown file or pipe markdown into stdin."
        )),
        None => Ok(InputSource::Stdin),
    }
}

fn read_input(source: &InputSource, vault: &Vault) -> Result<Note> {
    match source {
        InputSource::File(path) => Note::load(vault, path),
        InputSource::Stdin => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read markdown from stdin")?;
            Ok(Note {
                path: None,
                file: None,
                source: buf,
            })
        }
    }
}

fn vault_root(cli: &Cli, input: &InputSource) -> PathBuf {
    if let Some(root) = &cli.vault {
        return root.clone();
    }
    match input {
        InputSource::File(path) => path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        InputSource::Stdin => PathBuf::from("."),
    }
}

/// The pager owns the terminal, so it only logs when given a file.
fn init_logging(cli: &Cli, interactive: bool) -> Result<()> {
    if interactive && cli.log_file.is_none() {
        return Ok(());
    }
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .with_context(|| format!("Invalid log level {}", cli.log_level))?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(path) = &cli.log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
    Ok(())
}

fn print_plain(
    vault: Arc<Vault>,
    settings: Arc<SharedSettings>,
    renderer: Arc<TerminalMarkdownRenderer>,
    note: &Note,
) -> Result<()> {
    let rendered = renderer.render_text(&note.source, &note.context());
    let mut out = rendered
        .lines
        .iter()
        .map(|line| line.plain.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let (nav_tx, _nav_rx) = mpsc::channel();
    let navigator = Arc::new(ChannelNavigator::new(nav_tx));
    let mut manager =
        CoalesceManager::new(app::collaborators(vault, settings, renderer, navigator));
    if let Some(message) = app::open_backlinks(&mut manager, note) {
        warn!(error = %message, "backlinks unavailable");
    }
    if manager.is_active() && !manager.wait_for_backlinks(PLAIN_BACKLINKS_TIMEOUT) {
        warn!("timed out waiting for backlinks");
    }
    if let Some(panel) = manager.panel() {
        let lines = panel.surface().plain_lines();
        if !lines.is_empty() {
            out.push_str("\n\n");
            out.push_str(&lines.join("\n"));
        }
    }
    manager.clear_backlinks();

    println!("{out}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let input = detect_input(&cli)?;
    if cli.watch && matches!(input, InputSource::Stdin) {
        return Err(anyhow!("--watch requires file input"));
    }

    let interactive = if cli.interactive {
        true
    } else if cli.plain {
        false
    } else {
        matches!(input, InputSource::File(_)) && io::stdout().is_terminal()
    };
    init_logging(&cli, interactive)?;

    let vault = Arc::new(Vault::open(vault_root(&cli, &input))?);
    let note = read_input(&input, &vault)?;
    info!(
        vault = %vault.root().display(),
        note = note.file.as_ref().map_or("<none>", |file| file.as_str()),
        strategy = %cli.strategy,
        interactive,
        "starting"
    );

    let settings = Arc::new(SharedSettings::new(cli.strategy));
    let renderer = Arc::new(TerminalMarkdownRenderer::new());

    if !interactive {
        return print_plain(vault, settings, renderer, &note);
    }

    let app = App::new(vault, settings, renderer, note, cli.watch);
    app::run_interactive(app)
}
