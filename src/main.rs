use anyhow::{Context, Result};
use background_patcher::config::{load_or_default, BackgroundOverrides, FileConfig};
use background_patcher::engine::{LegacyClear, PatchEngine, PatchReport};
use background_patcher::escalate::{Escalator, NoopEscalator, Platform, SystemEscalator};
use background_patcher::store::{ContextStore, JsonFileStore, IMAGE_PATH_KEY};
use background_patcher::{image, BackupState, ContentBuilder, EngineConfig, Markers, PatchSpec};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "background-patcher")]
#[command(about = "Install or remove a background image patch in the editor's workbench", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.background-patcher/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State file holding preferences and counters
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inject the background patch, replacing any previous one
    Install {
        /// Directory holding the workbench assets
        #[arg(short = 'd', long)]
        install_dir: Option<PathBuf>,

        #[command(flatten)]
        background: BackgroundArgs,

        /// Embed local images as data: URIs
        #[arg(long)]
        inline_image: bool,

        /// Show unified diff of changes
        #[arg(long)]
        diff: bool,

        /// Fail instead of prompting for elevated rights
        #[arg(long)]
        no_escalate: bool,
    },

    /// Remove the background patch and restore the original asset
    Uninstall {
        /// Directory holding the workbench assets
        #[arg(short = 'd', long)]
        install_dir: Option<PathBuf>,

        /// Show unified diff of changes
        #[arg(long)]
        diff: bool,

        /// Fail instead of prompting for elevated rights
        #[arg(long)]
        no_escalate: bool,
    },

    /// Report whether the patch is installed, without changing anything
    Status {
        /// Directory holding the workbench assets
        #[arg(short = 'd', long)]
        install_dir: Option<PathBuf>,
    },

    /// Print the patch block that install would inject
    Render {
        #[command(flatten)]
        background: BackgroundArgs,
    },

    /// Find workbench directories under an editor installation
    Locate {
        /// Installation root to search
        root: PathBuf,

        /// Maximum directory depth to descend
        #[arg(long, default_value_t = 10)]
        max_depth: usize,
    },
}

#[derive(Args, Debug, Default)]
struct BackgroundArgs {
    /// Image path, https:// URL or data: URI
    #[arg(short, long)]
    image: Option<String>,

    /// Overlay opacity (rendered at most 0.8)
    #[arg(short, long)]
    opacity: Option<f64>,

    /// Blur radius in pixels, 0-100
    #[arg(short, long)]
    blur: Option<f64>,

    /// cover, contain, repeat, noop_center, noop_left, noop_right, noop_top,
    /// noop_bottom, noop_right_top or noop_right_bottom
    #[arg(short, long)]
    size_mode: Option<String>,

    /// CSS mix-blend-mode (derived from --theme when omitted)
    #[arg(long)]
    blend_mode: Option<String>,

    /// light, dark or high-contrast
    #[arg(long)]
    theme: Option<String>,
}

impl From<BackgroundArgs> for BackgroundOverrides {
    fn from(args: BackgroundArgs) -> Self {
        Self {
            image: args.image,
            opacity: args.opacity,
            blur: args.blur,
            size_mode: args.size_mode,
            blend_mode: args.blend_mode,
            theme: args.theme,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loaded = load_or_default(cli.config.as_deref())?;
    tracing::debug!(origin = %loaded.origin, "configuration loaded");
    let config = loaded.config;
    let state = cli.state.unwrap_or_else(JsonFileStore::default_path);

    match cli.command {
        Commands::Install {
            install_dir,
            background,
            inline_image,
            diff,
            no_escalate,
        } => cmd_install(
            &config,
            &state,
            install_dir,
            background.into(),
            inline_image,
            diff,
            no_escalate,
        ),

        Commands::Uninstall {
            install_dir,
            diff,
            no_escalate,
        } => cmd_uninstall(&config, &state, install_dir, diff, no_escalate),

        Commands::Status { install_dir } => cmd_status(&config, &state, install_dir),

        Commands::Render { background } => cmd_render(&config, background.into()),

        Commands::Locate { root, max_depth } => cmd_locate(&config, &root, max_depth),
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("background_patcher=debug,info"),
        _ => EnvFilter::new("background_patcher=trace,debug"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolve the install directory
///
/// Priority order:
/// 1. Explicit --install-dir flag
/// 2. BACKGROUND_PATCHER_INSTALL_DIR environment variable
/// 3. `[engine].install_dir` from the config file
fn resolve_engine_config(config: &FileConfig, cli_dir: Option<PathBuf>) -> Result<EngineConfig> {
    let dir = cli_dir.or_else(|| {
        env::var_os("BACKGROUND_PATCHER_INSTALL_DIR")
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
    });

    config
        .engine
        .to_engine_config(dir.as_deref())
        .context("could not resolve the workbench directory")
}

fn open_store(state: &Path) -> Result<JsonFileStore> {
    JsonFileStore::open(state)
        .with_context(|| format!("failed to open state file {}", state.display()))
}

fn select_escalator(no_escalate: bool) -> Box<dyn Escalator> {
    if no_escalate {
        Box::new(NoopEscalator::default())
    } else {
        Box::new(SystemEscalator::new(Platform::current()))
    }
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (before)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (after)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let line = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => continue,
        };
        print!("{}", line);
        if change.missing_newline() {
            println!();
        }
    }
}

fn print_report(report: &PatchReport) {
    let verb = match report.operation {
        background_patcher::OperationKind::Install => "Installed",
        background_patcher::OperationKind::Uninstall => "Removed",
    };
    if report.changed {
        println!("{} {} {}", "✓".green(), verb, report.target.display());
    } else {
        println!(
            "{} {}: already up to date",
            "⊙".yellow(),
            report.target.display()
        );
    }

    if report.escalated {
        println!("  {}", "Elevated rights were used".dimmed());
    }

    match &report.backup {
        BackupState::Created { .. } => println!("  Backup: {}", "captured".green()),
        BackupState::AlreadyPresent => println!("  Backup: {}", "present".dimmed()),
        BackupState::Failed { reason } => {
            println!("  Backup: {} ({})", "not captured".yellow(), reason)
        }
        BackupState::NotAttempted => {}
    }

    match &report.legacy {
        LegacyClear::Cleared => println!("  Legacy style block: {}", "cleared".green()),
        LegacyClear::Failed { reason } => {
            println!("  Legacy style block: {} ({})", "not cleared".yellow(), reason)
        }
        LegacyClear::NotFound { .. } | LegacyClear::Skipped => {}
    }

    for warning in &report.warnings {
        eprintln!("{} {}", "Warning:".yellow(), warning);
    }
}

fn run_engine(
    engine_config: EngineConfig,
    store: &mut JsonFileStore,
    no_escalate: bool,
    show_diff: bool,
    spec: Option<&PatchSpec>,
) -> Result<()> {
    let script = engine_config.script_path.clone();
    let before = if show_diff {
        fs::read_to_string(&script).ok()
    } else {
        None
    };

    let escalator = select_escalator(no_escalate);
    let mut engine = PatchEngine::new(engine_config, &mut *store, escalator.as_ref());
    let result = match spec {
        Some(spec) => engine.install(spec),
        None => engine.uninstall(),
    };

    match result {
        Ok(report) => {
            print_report(&report);
            if let (Some(before), true) = (before, report.changed) {
                if let Ok(after) = fs::read_to_string(&script) {
                    display_diff(&script, &before, &after);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            if e.is_cancelled() {
                eprintln!("  {}", "The elevation prompt was dismissed; nothing was changed.".dimmed());
            } else if e.is_retryable() {
                eprintln!("  {}", "Another window is patching; try again in a moment.".dimmed());
            }
            std::process::exit(1);
        }
    }
}

fn cmd_install(
    config: &FileConfig,
    state: &Path,
    install_dir: Option<PathBuf>,
    overrides: BackgroundOverrides,
    inline_image: bool,
    show_diff: bool,
    no_escalate: bool,
) -> Result<()> {
    let engine_config = resolve_engine_config(config, install_dir)?;
    let spec = config.background.to_spec(&overrides)?;
    let preference = spec.image().to_string();

    // The macOS host refuses its file scheme for images outside the app bundle.
    let spec = if spec.image().is_local() && (inline_image || Platform::current() == Platform::MacOs)
    {
        let inlined = image::inline_local(spec.image())
            .with_context(|| format!("failed to read image {}", spec.image()))?;
        spec.with_image(inlined)
    } else {
        spec
    };

    let mut store = open_store(state)?;
    run_engine(engine_config, &mut store, no_escalate, show_diff, Some(&spec))?;
    store.set(IMAGE_PATH_KEY, json!(preference))?;
    Ok(())
}

fn cmd_uninstall(
    config: &FileConfig,
    state: &Path,
    install_dir: Option<PathBuf>,
    show_diff: bool,
    no_escalate: bool,
) -> Result<()> {
    let engine_config = resolve_engine_config(config, install_dir)?;
    let mut store = open_store(state)?;
    run_engine(engine_config, &mut store, no_escalate, show_diff, None)
}

fn cmd_status(config: &FileConfig, state: &Path, install_dir: Option<PathBuf>) -> Result<()> {
    let engine_config = resolve_engine_config(config, install_dir)?;
    let store = open_store(state)?;
    let engine = PatchEngine::new(engine_config, store, NoopEscalator::default());
    let status = engine.status()?;

    println!("{}", "Background Patch Status".bold());
    println!("Target: {}", status.script_path.display());
    println!();

    if status.patched {
        println!("{} {}", "✓".green(), "INSTALLED".green().bold());
        if status.blocks > 1 {
            println!(
                "  {}",
                format!("{} blocks found (expected 1); reinstall to repair", status.blocks)
                    .yellow()
            );
        }
    } else {
        println!("{} {}", "⊙".yellow(), "NOT INSTALLED".yellow().bold());
    }

    let backup = if status.backup_present {
        "present".green()
    } else {
        "missing".yellow()
    };
    println!("  Backup: {}", backup);
    println!(
        "  Legacy checks: {}/{}",
        status.legacy_attempts, status.legacy_cap
    );
    if let Some(image) = &status.image {
        println!("  Image: {}", image);
    }
    println!("  Content hash: {}", format!("{:016x}", status.content_hash).dimmed());

    Ok(())
}

fn cmd_render(config: &FileConfig, overrides: BackgroundOverrides) -> Result<()> {
    let spec = config.background.to_spec(&overrides)?;
    let builder = ContentBuilder::new(Markers::new(config.engine.extension_id.trim()))
        .with_host_file_urls(config.engine.host_file_urls);
    println!("{}", builder.build(&spec));
    Ok(())
}

fn cmd_locate(config: &FileConfig, root: &Path, max_depth: usize) -> Result<()> {
    let script_name = config.engine.script_name.as_str();
    let mut found = Vec::new();

    for entry in WalkDir::new(root).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && entry.file_name() == script_name {
            if let Some(parent) = entry.path().parent() {
                found.push(parent.to_path_buf());
            }
        }
    }

    if found.is_empty() {
        anyhow::bail!(
            "No {} found under {} (searched {} levels deep)",
            script_name,
            root.display(),
            max_depth
        );
    }

    found.sort();
    for dir in found {
        println!("{}", dir.display());
    }
    Ok(())
}
