//! openEvo CLI.
//!
//! - `serve`: boot the agent on stdin/stdout with a configured provider
//! - `validate <path>`: run the static package safety scan
//! - `install <repo> <name>`: install a skill from the marketplace
//! - `list`: print the active registry
//!
//! Exit codes: 0 success, 2 validation failure, 3 network/IO failure,
//! 4 configuration error.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use openevo::agent::events::AgentEvent;
use openevo::builtin::{register_builtins, MarketContext};
use openevo::config::RuntimeConfig;
use openevo::market::{install_skill, validate_skill_dir, CodeHostClient, MarketError};
use openevo::{Agent, AgentInput, SkillRegistry, SkillStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_VALIDATION: u8 = 2;
const EXIT_NETWORK: u8 = 3;
const EXIT_CONFIG: u8 = 4;

#[derive(Parser)]
#[command(name = "openevo")]
#[command(about = "openEvo skill execution runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (defaults to ~/.openevo/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skills base directory
    #[arg(long, env = "OPENEVO_SKILLS_DIR")]
    skills_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent, reading utterances from stdin
    Serve {
        /// Provider dialect: anthropic or openai
        #[arg(long)]
        provider: Option<String>,

        /// Model identifier
        #[arg(long)]
        model: Option<String>,

        /// Provider base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Watch the custom layer for hot reload
        #[arg(long)]
        watch: bool,
    },

    /// Validate a skill package on disk
    Validate {
        /// Path to the package directory
        path: PathBuf,
    },

    /// Install a skill from a repository
    Install {
        /// Repository (owner/repo)
        repo: String,

        /// Name to install the skill under
        name: String,

        /// Git ref (branch, tag, or commit)
        #[arg(long)]
        git_ref: Option<String>,
    },

    /// List registered skills
    #[command(visible_alias = "ls")]
    List {
        /// JSON output
        #[arg(short, long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

async fn run(cli: Cli) -> Result<(), u8> {
    let config = RuntimeConfig::load(cli.config.as_deref()).map_err(|e| {
        error!("Configuration error: {}", e);
        EXIT_CONFIG
    })?;

    let base = cli
        .skills_dir
        .or_else(|| config.skills_dir.clone())
        .unwrap_or_else(SkillStore::default_base);

    match cli.command {
        Commands::Serve {
            provider,
            model,
            base_url,
            watch,
        } => serve(config, base, provider, model, base_url, watch).await,
        Commands::Validate { path } => validate(&path),
        Commands::Install {
            repo,
            name,
            git_ref,
        } => install(base, &repo, &name, git_ref.as_deref()).await,
        Commands::List { json } => list(base, json),
    }
}

fn build_runtime(
    base: PathBuf,
) -> Result<(Arc<SkillRegistry>, Arc<SkillStore>, MarketContext), u8> {
    let store = Arc::new(SkillStore::new(&base).map_err(|e| {
        error!("Cannot open skill store at {:?}: {}", base, e);
        EXIT_NETWORK
    })?);
    let registry = Arc::new(SkillRegistry::new());
    let market = MarketContext {
        host: Arc::new(CodeHostClient::github()),
        store: store.clone(),
    };

    register_builtins(&registry, &market).map_err(|e| {
        error!("Builtin registration failed: {}", e);
        EXIT_CONFIG
    })?;
    store.load_layered(&registry);

    Ok((registry, store, market))
}

async fn serve(
    config: RuntimeConfig,
    base: PathBuf,
    provider: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    watch: bool,
) -> Result<(), u8> {
    let mut provider_config = config.provider.clone();
    if let Some(dialect) = provider {
        provider_config.dialect = dialect;
    }
    if let Some(model) = model {
        provider_config.model = model;
    }
    if let Some(url) = base_url {
        provider_config.base_url = Some(url);
    }

    let client = provider_config.build_client().map_err(|e| {
        error!("Provider configuration error: {}", e);
        EXIT_CONFIG
    })?;

    let (registry, store, _market) = build_runtime(base)?;

    // Keep the watcher handle alive for the process lifetime.
    let _watcher = if watch {
        match openevo::storage::watch::spawn_custom_watcher(store.clone(), registry.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                error!("Cannot watch custom layer: {}", e);
                None
            }
        }
    } else {
        None
    };

    let agent = Agent::new(registry, Arc::new(client));
    info!(
        "Serving with {} skill(s); type a message, Ctrl-D to exit",
        agent.registry().len()
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let message = line.trim();
        if message.is_empty() {
            continue;
        }

        let mut events = agent.run(AgentInput::message(message));
        while let Some(event) = events.next().await {
            match event {
                AgentEvent::Token { content, .. } => {
                    print!("{}", content);
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::SkillCall { skill, .. } => info!("-> {}", skill),
                AgentEvent::SkillResult {
                    skill, duration_ms, ..
                } => info!("<- {} ({}ms)", skill, duration_ms),
                AgentEvent::SkillValidationRetry { skill, attempt, .. } => {
                    info!("retry {} (attempt {})", skill, attempt)
                }
                AgentEvent::Error { message, .. } => error!("{}", message),
                AgentEvent::Done { .. } => println!(),
            }
        }
    }

    Ok(())
}

fn validate(path: &Path) -> Result<(), u8> {
    let report = validate_skill_dir(path).map_err(|e| {
        error!("Validation could not run: {}", e);
        EXIT_NETWORK
    })?;

    for issue in &report.issues {
        println!("issue: {}", issue);
    }
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    println!(
        "{}: skill.json {}",
        if report.safe { "SAFE" } else { "UNSAFE" },
        if report.skill_json_valid {
            "valid"
        } else {
            "invalid"
        }
    );

    if report.safe {
        Ok(())
    } else {
        Err(EXIT_VALIDATION)
    }
}

async fn install(base: PathBuf, repo: &str, name: &str, git_ref: Option<&str>) -> Result<(), u8> {
    let (registry, store, market) = build_runtime(base)?;

    match install_skill(&market.host, &store, &registry, repo, name, git_ref).await {
        Ok(outcome) => {
            println!(
                "Installed {} at {}",
                outcome.skill_name,
                outcome.installed_path.display()
            );
            for warning in &outcome.report.warnings {
                println!("warning: {}", warning);
            }
            Ok(())
        }
        Err(MarketError::Unsafe(detail)) => {
            error!("Package rejected: {}", detail);
            Err(EXIT_VALIDATION)
        }
        Err(e) => {
            error!("Install failed: {}", e);
            Err(EXIT_NETWORK)
        }
    }
}

fn list(base: PathBuf, json: bool) -> Result<(), u8> {
    let (registry, _store, _market) = build_runtime(base)?;
    let mut skills = registry.list();
    skills.sort_by(|a, b| {
        a.meta
            .category
            .cmp(&b.meta.category)
            .then_with(|| a.meta.name.cmp(&b.meta.name))
    });

    if json {
        let summaries: Vec<serde_json::Value> = skills
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.meta.name,
                    "description": s.meta.description,
                    "category": s.meta.category,
                    "mode": s.meta.mode,
                    "version": s.meta.version,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&summaries).unwrap_or_default()
        );
        return Ok(());
    }

    let mut current_category = String::new();
    for skill in &skills {
        if skill.meta.category != current_category {
            current_category = skill.meta.category.clone();
            println!("[{}]", current_category);
        }
        println!(
            "  {} v{} ({}) - {}",
            skill.meta.name, skill.meta.version, skill.meta.mode, skill.meta.description
        );
    }
    Ok(())
}
