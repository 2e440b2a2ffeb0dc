//! Partyline CLI
//!
//! Thin wrapper around partyline-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Generate session codes for an app
//! partyline code --app quiz --count 3
//!
//! # List sessions kept in the client-local store
//! partyline local list
//!
//! # Show one local session with its participants
//! partyline local show K3PQ7M --app quiz
//!
//! # Close a local session
//! partyline local close K3PQ7M --app quiz
//!
//! # Run a host and some participants against an in-process store
//! partyline demo --participants 3 --flaky
//!
//! # Print the effective client configuration
//! partyline config
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use partyline_core::{
    AppType, ClientConfig, CodeGenerator, LiveSession, LocalStore, MemoryBackend, Role, Session,
    SessionAdapter, SessionClient, SessionView, StoreClient, SubscriptionState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

/// Partyline - realtime sessions for party apps
#[derive(Parser)]
#[command(name = "partyline")]
#[command(version)]
#[command(about = "Partyline - realtime sessions for party apps")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: <data dir>/partyline)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Client configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate session codes
    Code {
        /// App type (quiz, bingo, group-order, ...)
        #[arg(short, long)]
        app: AppType,
        /// How many codes to print
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Seed for reproducible codes
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Client-local session store
    Local {
        #[command(subcommand)]
        action: LocalAction,
    },

    /// Run a host and participants against an in-process store
    Demo {
        /// Number of participants to join
        #[arg(short, long, default_value_t = 3)]
        participants: usize,
        /// Drop the host's change channel mid-demo and refuse one resubscribe
        #[arg(long)]
        flaky: bool,
    },

    /// Print the effective client configuration
    Config,
}

#[derive(Subcommand)]
enum LocalAction {
    /// List local sessions
    List,
    /// Show a local session and its participants
    Show {
        /// Session code
        code: String,
        /// App type
        #[arg(short, long)]
        app: AppType,
    },
    /// Close a local session
    Close {
        /// Session code
        code: String,
        /// App type
        #[arg(short, long)]
        app: AppType,
    },
}

// ═══════════════════════════════════════════════════════════════════════════
// Demo quiz payloads
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
struct QuizConfig {
    questions: Vec<String>,
    seconds_per_question: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QuizMetadata {
    #[serde(default)]
    score: u32,
}

struct Quiz;

impl SessionAdapter for Quiz {
    const APP_TYPE: AppType = AppType::Quiz;
    type Config = QuizConfig;
    type Metadata = QuizMetadata;
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory (<platform data dir>/partyline)
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("partyline")
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(ClientConfig::default()),
    }
}

fn open_local(data_dir: &Path) -> Result<LocalStore> {
    let path = data_dir.join("local.redb");
    debug!(path = %path.display(), "Opening local store");
    LocalStore::open(&path).with_context(|| format!("Failed to open {}", path.display()))
}

fn find_local(local: &LocalStore, code: &str, app: AppType) -> Result<Session> {
    let code = partyline_core::normalize_code(code);
    local
        .list_sessions()?
        .into_iter()
        .filter(|s| s.code == code && s.app_type == app)
        // Prefer the active one if a closed session reused the code
        .max_by_key(|s| (s.is_active, s.created_at))
        .ok_or_else(|| anyhow!("No local session {} for {}", code, app))
}

fn status_label(session: &Session) -> &'static str {
    if session.is_active {
        "active"
    } else {
        "closed"
    }
}

fn print_view(view: &SessionView) {
    println!("Host sees {} participants:", view.participants.len());
    for (i, p) in view.participants.iter().enumerate() {
        println!("  {}. {} {}", i + 1, p.display_name, p.metadata);
    }
    println!("  Subscription: {}", view.subscription);
    if let Some(err) = &view.last_error {
        println!("  Last error: {}", err);
    }
}

async fn wait_for_view(
    session: &LiveSession,
    check: impl Fn(&SessionView) -> bool,
) -> Result<SessionView> {
    let mut rx = session.watch();
    let view = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|v| check(v)))
        .await
        .context("Timed out waiting for the host view")?
        .context("Session view closed")?
        .clone();
    Ok(view)
}

// ═══════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════

fn run_code(app: AppType, count: usize, seed: Option<u64>) {
    let mut generator = match seed {
        Some(seed) => CodeGenerator::seeded(seed),
        None => CodeGenerator::from_entropy(),
    };
    for _ in 0..count {
        println!("{}", generator.generate(app.code_length()));
    }
}

fn run_local(action: LocalAction, data_dir: &Path) -> Result<()> {
    let local = open_local(data_dir)?;

    match action {
        LocalAction::List => {
            let sessions = local.list_sessions()?;
            if sessions.is_empty() {
                println!("No local sessions");
                return Ok(());
            }
            println!("Local sessions ({}):", sessions.len());
            for session in sessions {
                let participants = local.participants(&session.id)?.len();
                println!(
                    "  {} {:<14} {:<7} {:>3} participants  {}",
                    session.code,
                    session.app_type,
                    status_label(&session),
                    participants,
                    session.title
                );
            }
        }
        LocalAction::Show { code, app } => {
            let session = find_local(&local, &code, app)?;
            let participants = local.participants(&session.id)?;
            println!("Session {}", session.code);
            println!("  ID: {}", session.id);
            println!("  App: {}", session.app_type);
            println!("  Title: {}", session.title);
            println!("  Status: {}", status_label(&session));
            println!("  Config: {}", session.config);
            println!("Participants ({}):", participants.len());
            for p in participants {
                println!("  {} {} {}", p.id, p.display_name, p.metadata);
            }
        }
        LocalAction::Close { code, app } => {
            let session = find_local(&local, &code, app)?;
            if !session.is_active {
                println!("Session {} is already closed", session.code);
                return Ok(());
            }
            local.close_session(&session.id)?;
            println!("Closed session {}", session.code);
        }
    }

    Ok(())
}

async fn run_demo(
    participants: usize,
    flaky: bool,
    config: ClientConfig,
    data_dir: &Path,
) -> Result<()> {
    let backend = MemoryBackend::new();
    let store = StoreClient::new(Arc::new(backend.clone()));
    let local = open_local(data_dir)?;
    let client = SessionClient::new(store, local, config);

    let quiz = QuizConfig {
        questions: vec![
            "Which planet is closest to the sun?".into(),
            "How many strings does a violin have?".into(),
        ],
        seconds_per_question: 20,
    };
    let host = client
        .create(partyline_core::new_session::<Quiz>("Demo quiz", &quiz)?)
        .await?;
    println!("Session code: {}", host.code());
    wait_for_view(&host, |v| v.subscription.is_subscribed()).await?;

    let mut expected = 0;
    let mut joined = Vec::new();
    for i in 0..participants {
        let device = client
            .load(host.code(), AppType::Quiz, Role::Participant)
            .await?;
        let me = device
            .join_as::<Quiz>(&format!("Player {}", i + 1), &QuizMetadata::default())
            .await?;
        info!(participant_id = %me.id, "Demo participant joined");
        joined.push((device, me));
        expected += 1;
    }

    if flaky {
        let mut transitions = host
            .subscription_transitions()
            .context("Host has no subscription")?;
        backend.refuse_next_subscriptions(1);
        let dropped = backend.disconnect_channels("demo network drop");
        println!("Dropped {} change channel(s); next resubscribe is refused", dropped);
        loop {
            let transition = transitions.recv().await?;
            if matches!(transition.to, SubscriptionState::Degraded { .. }) {
                println!("Host subscription: {}", transition.to);
                break;
            }
        }

        // Written while the host is degraded; picked up on resubscribe
        let late = client
            .load(host.code(), AppType::Quiz, Role::Participant)
            .await?;
        let me = late.join("Late arrival", json!({})).await?;
        joined.push((late, me));
        expected += 1;
    }

    if let Some((device, me)) = joined.first() {
        device
            .modify_metadata::<Quiz, _>(&me.id, |m| m.score += 10)
            .await?;
    }

    let view = wait_for_view(&host, |v| {
        v.subscription.is_subscribed()
            && v.participants.len() == expected
            && (expected == 0 || v.participants[0].metadata.get("score") == Some(&json!(10)))
    })
    .await?;
    print_view(&view);

    host.close().await?;
    println!("Closed session {}", host.code());
    println!(
        "Backend: {} change channel(s) opened",
        backend.stats().channels_opened
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Code { app, count, seed } => run_code(app, count, seed),
        Commands::Local { action } => run_local(action, &data_dir)?,
        Commands::Demo {
            participants,
            flaky,
        } => run_demo(participants, flaky, config, &data_dir).await?,
        Commands::Config => print!("{}", config.to_toml_string()?),
    }

    Ok(())
}
