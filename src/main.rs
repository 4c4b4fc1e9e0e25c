use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pmkv::backend::{KvBackend, MemoryBackend};
use pmkv::backup;
use pmkv::cleanup::{CleanupEngine, CleanupOptions, CleanupReport};
use pmkv::config::{BackendConfig, Settings};
use pmkv::kv::KvRepository;
use pmkv::local::LocalRepository;
use pmkv::migrate::{MigrationEngine, MigrationOptions, MigrationReport, NodeCounts, Scope};
use pmkv::proxy::{self, ProxyState};
use pmkv::repository::Repository;
use pmkv::select::{EpicSelector, PromptSelection, StaticSelection};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[allow(dead_code)]
mod build_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Parser)]
#[command(
    name = "pmkv",
    about = "Move a project tracker between local files and a key-value store",
    version
)]
struct Cli {
    /// Local data directory (default: ./data, or data_dir from the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Settings file (default: <data-dir>/pmkv.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the local tree into the key-value store
    Migrate {
        /// Report what would be written without writing
        #[arg(long)]
        dry_run: bool,

        /// Overwrite documents that already exist in the store
        #[arg(long)]
        force: bool,

        /// Only this project
        #[arg(long)]
        project: Option<String>,
    },

    /// Copy the key-value store into the local tree
    Pull {
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        project: Option<String>,
    },

    /// Copy selected epics of one local project into the store
    Export {
        project: String,

        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        force: bool,

        /// Snapshot the selected epics from the store before writing
        #[arg(long)]
        backup: bool,

        /// Comma-separated epic names, or "all"; prompts when omitted
        #[arg(long, value_delimiter = ',')]
        epics: Option<Vec<String>>,
    },

    /// Write a read-only snapshot of one project from the store
    Backup {
        project: String,

        #[arg(long, value_delimiter = ',')]
        epics: Option<Vec<String>>,
    },

    /// Delete every key of one project from the store
    Cleanup {
        project: String,

        /// Show the keys that would be deleted
        #[arg(long)]
        dry_run: bool,

        /// Required for a destructive run
        #[arg(long)]
        confirm: bool,
    },

    /// Run the REST command proxy
    Serve {
        /// Listen address (overrides `listen` in the settings file)
        #[arg(long)]
        listen: Option<String>,

        /// Serve an in-process store instead of the configured backend
        #[arg(long)]
        memory: bool,
    },

    /// Check the connection to the configured store
    Health,

    /// Show build information
    Version,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new("info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Returns `Ok(false)` when the command ran but something in it failed
async fn run(cli: Cli) -> Result<bool> {
    let settings = Settings::resolve(cli.config.as_deref(), cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Migrate {
            dry_run,
            force,
            project,
        } => {
            let local = LocalRepository::open(&settings.data_dir);
            let kv = connect_kv(&settings).await?;
            let options = MigrationOptions {
                dry_run,
                force,
                scope: scope(project),
                epics: None,
            };
            let report = run_migration(&local, &kv, options, &settings).await?;
            print_migration(&report, cli.json)?;
            Ok(dry_run || !report.has_failures())
        }

        Commands::Pull {
            dry_run,
            force,
            project,
        } => {
            let local = LocalRepository::open(&settings.data_dir);
            let kv = connect_kv(&settings).await?;
            let options = MigrationOptions {
                dry_run,
                force,
                scope: scope(project),
                epics: None,
            };
            let report = run_migration(&kv, &local, options, &settings).await?;
            print_migration(&report, cli.json)?;
            Ok(dry_run || !report.has_failures())
        }

        Commands::Export {
            project,
            dry_run,
            force,
            backup: take_backup,
            epics,
        } => {
            let local = LocalRepository::open(&settings.data_dir);
            let available = local
                .epic_ids(&project)
                .await
                .with_context(|| format!("Failed to list epics of {}", project))?;

            let selected = match epics {
                Some(names) => StaticSelection(names).select(&project, &available)?,
                None => {
                    let stdin = io::stdin();
                    PromptSelection::new(stdin.lock(), io::stderr()).select(&project, &available)?
                }
            };

            let kv = connect_kv(&settings).await?;
            if take_backup && !dry_run {
                let snapshot = backup::capture(&kv, &project, Some(selected.as_slice())).await;
                let path = backup::write_snapshot(&settings.backup_path(), &snapshot)?;
                if !cli.json {
                    println!("Backup written to {}", path.display());
                }
            }

            let options = MigrationOptions {
                dry_run,
                force,
                scope: Scope::Project(project),
                epics: Some(selected),
            };
            let report = run_migration(&local, &kv, options, &settings).await?;
            print_migration(&report, cli.json)?;
            Ok(dry_run || !report.has_failures())
        }

        Commands::Backup { project, epics } => {
            let kv = connect_kv(&settings).await?;
            let snapshot = backup::capture(&kv, &project, epics.as_deref()).await;
            let path = backup::write_snapshot(&settings.backup_path(), &snapshot)?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "path": path,
                        "epics": snapshot.epics.len(),
                        "stories": snapshot.story_count(),
                        "omitted": snapshot.omitted,
                    }))?
                );
            } else {
                println!(
                    "Backup of {} written to {} ({} epics, {} stories)",
                    project,
                    path.display(),
                    snapshot.epics.len(),
                    snapshot.story_count()
                );
                for line in &snapshot.omitted {
                    println!("  omitted {}", line);
                }
            }
            Ok(true)
        }

        Commands::Cleanup {
            project,
            dry_run,
            confirm,
        } => {
            let options = CleanupOptions { dry_run, confirm };
            options.check()?;

            let kv = connect_kv(&settings).await?;
            let report = CleanupEngine::new(&kv, options)
                .with_lock_dir(settings.lock_dir())
                .run(&project)
                .await?;
            print_cleanup(&report, cli.json)?;
            Ok(dry_run || !report.has_failures())
        }

        Commands::Serve { listen, memory } => {
            let backend: Arc<dyn KvBackend> = if memory {
                Arc::new(MemoryBackend::new())
            } else {
                let config = BackendConfig::from_env()?;
                info!(backend = %config.describe(), "connecting");
                config.connect(settings.request_timeout()).await?
            };

            let addr = listen.unwrap_or_else(|| settings.listen.clone());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to listen on {}", addr))?;
            info!(addr = %addr, backend = backend.name(), "proxy listening");

            let app = proxy::router(ProxyState::new(backend), settings.max_body_bytes);
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("shutting down");
                })
                .await
                .context("Proxy server failed")?;
            Ok(true)
        }

        Commands::Health => {
            let config = BackendConfig::from_env()?;
            let backend = config.connect(settings.request_timeout()).await;
            let status = match &backend {
                Ok(backend) => backend.ping().await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            if cli.json {
                let body = match &status {
                    Ok(()) => serde_json::json!({"status": "connected", "backend": config.describe()}),
                    Err(e) => serde_json::json!({
                        "status": "disconnected",
                        "backend": config.describe(),
                        "error": e,
                    }),
                };
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                match &status {
                    Ok(()) => println!("connected: {}", config.describe()),
                    Err(e) => println!("disconnected: {} ({})", config.describe(), e),
                }
            }
            Ok(status.is_ok())
        }

        Commands::Version => {
            println!("pmkv {}", build_info::PKG_VERSION);
            if let Some(hash) = build_info::GIT_COMMIT_HASH_SHORT {
                println!("commit {}", hash);
            }
            println!("built {}", env!("BUILD_DATE"));
            println!("target {}", build_info::TARGET);
            Ok(true)
        }
    }
}

fn scope(project: Option<String>) -> Scope {
    project.map(Scope::Project).unwrap_or(Scope::All)
}

async fn connect_kv(settings: &Settings) -> Result<KvRepository> {
    let config = BackendConfig::from_env()?;
    info!(backend = %config.describe(), "connecting");
    let backend = config
        .connect(settings.request_timeout())
        .await
        .with_context(|| format!("Failed to connect to {}", config.describe()))?;
    Ok(KvRepository::new(backend))
}

/// Ctrl-C stops the walk before the next project
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping after the current project");
            handle.store(true, Ordering::SeqCst);
        }
    });
    flag
}

async fn run_migration(
    source: &dyn Repository,
    dest: &dyn Repository,
    options: MigrationOptions,
    settings: &Settings,
) -> Result<MigrationReport> {
    let report = MigrationEngine::new(source, dest, options)
        .with_lock_dir(settings.lock_dir())
        .with_cancel(cancel_on_ctrl_c())
        .run()
        .await
        .context("Migration failed")?;
    Ok(report)
}

#[derive(Serialize)]
struct MigrationOutput<'a> {
    #[serde(flatten)]
    report: &'a MigrationReport,
    totals: pmkv::migrate::Totals,
}

fn counts_line(label: &str, counts: &NodeCounts, dry_run: bool) -> String {
    if dry_run {
        format!(
            "{}: {} planned, {} skipped, {} failed",
            label, counts.planned, counts.skipped, counts.failed
        )
    } else {
        format!(
            "{}: {} written, {} skipped, {} failed",
            label, counts.written, counts.skipped, counts.failed
        )
    }
}

fn print_migration(report: &MigrationReport, json: bool) -> Result<()> {
    let totals = report.totals();
    if json {
        let output = MigrationOutput { report, totals };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for line in &report.plan {
        println!("{}", line);
    }
    if !report.plan.is_empty() {
        println!();
    }

    println!("{}", counts_line("People", &report.people, report.dry_run));
    println!("{}", counts_line("Projects", &totals.projects, report.dry_run));
    println!("{}", counts_line("Epics", &totals.epics, report.dry_run));
    println!("{}", counts_line("Stories", &totals.stories, report.dry_run));

    if report.cancelled {
        println!("\nCancelled before all projects were processed");
    }
    if !report.errors.is_empty() {
        println!("\nErrors:");
        for error in &report.errors {
            println!("  {}", error);
        }
    }
    Ok(())
}

fn print_cleanup(report: &CleanupReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let plan = &report.plan;
    if plan.used_fallback {
        println!(
            "Project document for {} not found, epics taken from the epics list",
            plan.project
        );
    }

    if report.dry_run {
        for key in &plan.keys {
            println!("[DRY RUN] Would delete {}", key);
        }
        println!(
            "\n{} keys ({} epics, {} stories, {} unlisted)",
            plan.keys.len(),
            plan.epics.len(),
            plan.stories,
            plan.orphans
        );
        if plan.index_contains_project {
            println!("{} would be removed from the projects index", plan.project);
        }
    } else {
        println!(
            "Deleted {} keys of {} ({} already absent, {} failed)",
            report.deleted, plan.project, report.missing, report.failed
        );
        if report.index_updated {
            println!("Removed {} from the projects index", plan.project);
        }
    }
    if !report.errors.is_empty() {
        println!("\nErrors:");
        for error in &report.errors {
            println!("  {}", error);
        }
    }
    Ok(())
}
