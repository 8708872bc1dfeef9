//! # Ragdock CLI (`ragdock`)
//!
//! The `ragdock` binary provides commands for database initialization,
//! one-shot question answering, session inspection, and starting the
//! HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! ragdock --config ./config/ragdock.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragdock init` | Create the SQLite database and run schema migrations |
//! | `ragdock ask "<question>"` | Ask a question from the command line |
//! | `ragdock sessions` | List a user's chat sessions |
//! | `ragdock serve` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ragdock::orchestrator::AskRequest;
use ragdock::stream::StreamEvent;
use ragdock::{config, migrate, server};

/// Ragdock — retrieval-augmented question answering over ingested documents.
#[derive(Parser)]
#[command(
    name = "ragdock",
    about = "Ragdock — retrieval-augmented question answering over ingested documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragdock.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent.
    Init,

    /// Ask a question and print the answer with its sources.
    ///
    /// Creates a fresh session unless `--session` continues an existing one.
    Ask {
        /// The question to ask.
        question: String,

        /// User the question is asked as.
        #[arg(long, default_value = "cli")]
        user: String,

        /// Continue an existing session instead of creating a new one.
        #[arg(long)]
        session: Option<String>,

        /// Restrict retrieval to these file ids (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,

        /// Print the answer incrementally as it streams.
        #[arg(long)]
        stream: bool,
    },

    /// List a user's active chat sessions.
    Sessions {
        /// User whose sessions to list.
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// search API endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragdock=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ask {
            question,
            user,
            session,
            files,
            stream,
        } => {
            run_ask(&cfg, &question, &user, session, files, stream).await?;
        }
        Commands::Sessions { user } => {
            run_sessions(&cfg, &user).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_ask(
    cfg: &config::Config,
    question: &str,
    user: &str,
    session: Option<String>,
    files: Vec<String>,
    stream: bool,
) -> anyhow::Result<()> {
    migrate::run_migrations(cfg).await?;
    let service = server::build_service(cfg).await?;

    let session_id = match session {
        Some(id) => id,
        None => service.sessions().create_session(user, None).await?.id,
    };

    let request = AskRequest {
        session_id: session_id.clone(),
        user_id: user.to_string(),
        query: question.to_string(),
        file_ids: if files.is_empty() { None } else { Some(files) },
    };

    if stream {
        return run_ask_stream(&service, request).await;
    }

    let response = service.ask(&request).await.map_err(anyhow::Error::from)?;

    println!("{}", response.answer.content);
    print_sources(&response.answer.sources);

    println!(
        "\n[session {} | {} results | {} entities | {} ms]",
        session_id,
        response.results.len(),
        response.answer.entity_count,
        response.latency_ms
    );

    Ok(())
}

async fn run_ask_stream(
    service: &std::sync::Arc<ragdock::orchestrator::AskService>,
    request: AskRequest,
) -> anyhow::Result<()> {
    use std::io::Write;

    let session_id = request.session_id.clone();
    let mut rx = service.ask_stream(request);

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Content { text } => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            StreamEvent::Sources { sources, .. } => {
                println!();
                print_sources(&sources);
            }
            StreamEvent::Done { latency_ms } => {
                println!("\n[session {} | {} ms]", session_id, latency_ms);
            }
            StreamEvent::Error { code, message } => {
                anyhow::bail!("{}: {}", code, message);
            }
            StreamEvent::Start { .. } | StreamEvent::Progress { .. } => {}
        }
    }

    Ok(())
}

fn print_sources(sources: &[ragdock::models::SourceCitation]) {
    if sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for source in sources {
        let pages: Vec<String> = source.pages.iter().map(|p| p.to_string()).collect();
        println!("  {} (pages {})", source.file_name, pages.join(", "));
    }
}

async fn run_sessions(cfg: &config::Config, user: &str) -> anyhow::Result<()> {
    migrate::run_migrations(cfg).await?;
    let service = server::build_service(cfg).await?;

    let sessions = service.sessions().list_sessions(user).await?;
    if sessions.is_empty() {
        println!("No sessions for user '{}'.", user);
        return Ok(());
    }

    for session in sessions {
        println!("{}  {}", session.id, session.name);
    }

    Ok(())
}
