//! Termbridge CLI
//!
//! Command-line interface for:
//! - Proposing vocabulary terms (saved locally, mirrored as tracker tickets)
//! - Looking terms up by any of their identities, refreshed from the tracker
//! - Searching the local store
//! - Running reconciliation passes, once or on an interval
//!
//! Configuration lives in a JSON file (`termbridge.json` by default); the
//! tracker token can also come from the `TERMBRIDGE_TOKEN` environment
//! variable so it stays out of the file.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use termbridge_core::{TermEntity, TermStatus};
use termbridge_store::StoreConfig;
use termbridge_sync::{ServiceConfig, SyncReport, TermService, TrackerConfig};

#[derive(Parser)]
#[command(name = "termbridge")]
#[command(
    author,
    version,
    about = "Vocabulary term proposals, bridged between a local store and a tracker"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "termbridge.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration file and create the local store.
    Init {
        /// Tracker repository as owner/repo.
        #[arg(long)]
        repo: Option<String>,
    },

    /// Propose a term: saved locally first, then submitted as a ticket.
    ///
    /// A proposal matching an existing term (by any label) is merged into it
    /// instead of opening a second ticket.
    Create {
        /// Primary label.
        #[arg(short, long)]
        name: String,
        /// Alternate label; repeatable.
        #[arg(short, long = "synonym")]
        synonyms: Vec<String>,
        /// Broader-term id; repeatable.
        #[arg(short, long = "parent")]
        parents: Vec<String>,
        /// Free-text definition.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show one term by REQ_n, VOC_n, or ticket number, refreshed from the
    /// tracker on the way.
    Get { id: String },

    /// Search the local store. Every word must match.
    Search { text: String },

    /// Reconcile all pending proposals with the tracker.
    Sync {
        /// Repeat every N seconds instead of running once.
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    store: StoreConfig,
    tracker: TrackerConfig,
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?
    } else {
        AppConfig::default()
    };
    // Keep the token out of the file when the environment provides one.
    if let Ok(token) = env::var("TERMBRIDGE_TOKEN") {
        if !token.is_empty() {
            config.tracker.token = Some(token);
        }
    }
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn service_config(config: &AppConfig) -> ServiceConfig {
    ServiceConfig {
        store: config.store.clone(),
        tracker: config.tracker.clone(),
    }
}

fn parse_repo(value: &str) -> Result<(String, String)> {
    match value.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(anyhow!("--repo expects owner/repo, got {value:?}")),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Commands::Init { repo: Some(repo) } = &cli.command {
        let (owner, name) = parse_repo(repo)?;
        config.tracker.owner = owner;
        config.tracker.repo = name;
    }

    let service = TermService::new(service_config(&config));
    service.init()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    let result = rt.block_on(async {
        match &cli.command {
            Commands::Init { .. } => cmd_init(&cli.config, &config),
            Commands::Create {
                name,
                synonyms,
                parents,
                description,
            } => cmd_create(&service, name, synonyms, parents, description.as_deref()).await,
            Commands::Get { id } => cmd_get(&service, id).await,
            Commands::Search { text } => cmd_search(&service, text),
            Commands::Sync { every } => cmd_sync(&service, *every).await,
        }
    });

    let closed = service.shutdown();
    result?;
    closed?;
    Ok(())
}

fn cmd_init(path: &Path, config: &AppConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("cannot serialize config")?;
    fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
    eprintln!(
        "{} {}",
        "wrote".green().bold(),
        path.display().to_string().bold()
    );
    eprintln!("{} {}", "store".green().bold(), config.store.home.display());
    if config.tracker.owner.is_empty() || config.tracker.repo.is_empty() {
        eprintln!(
            "{} set tracker.owner and tracker.repo in {} (or pass --repo owner/repo)",
            "info:".yellow().bold(),
            path.display()
        );
    }
    Ok(())
}

async fn cmd_create(
    service: &TermService,
    name: &str,
    synonyms: &[String],
    parents: &[String],
    description: Option<&str>,
) -> Result<()> {
    let mut candidate = TermEntity::new(name)?;
    for synonym in synonyms {
        candidate.add_synonym(synonym);
    }
    for parent in parents {
        candidate.add_parent(parent.as_str());
    }
    if let Some(description) = description {
        candidate.set_description(description);
    }

    let outcome = service.create(candidate).await?;
    let verb = if outcome.is_new { "created" } else { "merged" };
    eprintln!(
        "{} {}",
        verb.green().bold(),
        outcome.entity.local_id().unwrap_or("?").bold()
    );
    print_term(&outcome.entity);
    Ok(())
}

async fn cmd_get(service: &TermService, id: &str) -> Result<()> {
    match service.get(id).await? {
        Some(entity) => {
            print_term(&entity);
            Ok(())
        }
        None => Err(anyhow!("no term found for {id}")),
    }
}

fn cmd_search(service: &TermService, text: &str) -> Result<()> {
    let hits = service.search(text)?;
    if hits.is_empty() {
        eprintln!("{} no matches", "info:".yellow().bold());
        return Ok(());
    }
    for entity in &hits {
        println!(
            "{}  {}  {}",
            entity.local_id().unwrap_or("-"),
            status_label(entity.status()),
            entity.name()
        );
    }
    eprintln!("{} {} matches", "ok".green().bold(), hits.len());
    Ok(())
}

async fn cmd_sync(service: &TermService, every: Option<u64>) -> Result<()> {
    let Some(secs) = every else {
        report_pass(&service.sync_all().await?);
        return Ok(());
    };
    let period = Duration::from_secs(secs.max(1));
    eprintln!(
        "{} reconciling every {}s; ctrl-c to stop",
        "info:".yellow().bold(),
        period.as_secs()
    );
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        match service.sync_all().await {
            Ok(report) => report_pass(&report),
            Err(e) => eprintln!("{} reconciliation failed: {e}", "error:".red().bold()),
        }
    }
}

fn report_pass(report: &SyncReport) {
    eprintln!(
        "{} scanned {} updated {} merged {} in {}ms",
        "synced".green().bold(),
        report.scanned,
        report.updated,
        report.merged,
        report.duration_ms
    );
}

fn print_term(entity: &TermEntity) {
    println!(
        "{} {}",
        entity.local_id().unwrap_or("-").bold(),
        entity.name()
    );
    println!("  status:    {}", status_label(entity.status()));
    if let Some(ticket) = entity.ticket_id() {
        println!("  ticket:    #{ticket}");
    }
    if let Some(authority) = entity.authority_id() {
        println!("  authority: {authority}");
    }
    if !entity.synonyms().is_empty() {
        println!("  synonyms:  {}", join(entity.synonyms().iter()));
    }
    if !entity.parent_ids().is_empty() {
        println!("  parents:   {}", join(entity.parent_ids().iter()));
    }
    if !entity.description().is_empty() {
        println!("  {}", entity.description());
    }
    if let Some(at) = entity.modified_at() {
        println!("  modified:  {}", at.to_rfc3339());
    }
}

fn join<'a>(items: impl Iterator<Item = &'a String>) -> String {
    items.map(String::as_str).collect::<Vec<_>>().join("; ")
}

fn status_label(status: TermStatus) -> ColoredString {
    match status {
        TermStatus::Unsubmitted => "UNSUBMITTED".normal(),
        TermStatus::Submitted => "SUBMITTED".cyan(),
        TermStatus::Accepted => "ACCEPTED".green(),
        TermStatus::Rejected => "REJECTED".red(),
        TermStatus::Synonym => "SYNONYM".yellow(),
        TermStatus::Published => "PUBLISHED".green().bold(),
    }
}
