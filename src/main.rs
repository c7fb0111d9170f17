//! Thinkflow command line client

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use thinkflow::api::{create_router, AppState};
use thinkflow::channel::WebSocketConnector;
use thinkflow::config::ClientConfig;
use thinkflow::flow::{FlowObserver, TextTarget, Turn};
use thinkflow::replay::replay_thread;
use thinkflow::runtime::{start_session, SessionHandle, TerminalPresenter};
use thinkflow::store::{Database, DatabaseStore, InMemoryStore, TurnStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "thinkflow", version)]
#[command(about = "Streaming chat client with structured thinking flows")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat interactively; `/new` starts a fresh session, `/quit` exits
    Chat,
    /// Print a stored thread as it was streamed
    Replay {
        session_id: String,
        /// Restrict to one conversation thread
        #[arg(long)]
        conversation: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Serve the read-only share API
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the chat transcript
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thinkflow=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    let store = open_store(&config)?;

    match cli.command {
        Command::Chat => chat(config, store).await,
        Command::Replay {
            session_id,
            conversation,
            limit,
        } => replay(store, &session_id, conversation, limit).await,
        Command::Serve => serve(config, store).await,
    }
}

fn open_store(config: &ClientConfig) -> Result<Arc<dyn TurnStore>, Box<dyn std::error::Error>> {
    let Some(path) = &config.db_path else {
        tracing::warn!("THINKFLOW_DB_PATH is empty, turns are kept in memory only");
        return Ok(Arc::new(InMemoryStore::new()));
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %path.display(), "Opening database");
    let db = Database::open(path)?;
    Ok(Arc::new(DatabaseStore::new(db)))
}

async fn chat(
    config: ClientConfig,
    store: Arc<dyn TurnStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    let presenter = TerminalPresenter::new(std::io::stdout());
    let (handle, task) = start_session(config.channel, WebSocketConnector, presenter, store);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !dispatch_line(&handle, line.trim()).await {
            break;
        }
    }

    handle.shutdown().await;
    let conversation = task.await?;
    tracing::info!(turns = conversation.turns().len(), "Chat ended");
    Ok(())
}

/// Returns false once the session should end
async fn dispatch_line(handle: &SessionHandle, line: &str) -> bool {
    match line {
        "" => true,
        "/quit" | "/exit" => false,
        "/new" => handle.new_chat().await,
        _ => {
            if let Some(turn_id) = line.strip_prefix("/toggle ") {
                match turn_id.trim().parse() {
                    Ok(turn_id) => handle.toggle_collapse(turn_id).await,
                    Err(_) => true,
                }
            } else {
                handle.send_message(line).await
            }
        }
    }
}

async fn replay(
    store: Arc<dyn TurnStore>,
    session_id: &str,
    conversation: Option<i64>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = store.load_thread(session_id, conversation, limit).await?;
    if records.is_empty() {
        return Err(format!("no stored turns for session {session_id}").into());
    }

    let mut presenter = TerminalPresenter::new(std::io::stdout());
    for turn in replay_thread(&records)? {
        println!("> {}", turn.user_input);
        present(&mut presenter, &turn);
    }
    Ok(())
}

/// Show a finished turn in one pass
fn present(presenter: &mut impl FlowObserver, turn: &Turn) {
    let flow = turn.flow();
    for iteration in flow.iterations() {
        presenter.on_text_update(turn, TextTarget::Iteration(iteration.iteration));
    }
    for tool in flow.tools() {
        presenter.on_tool_update(turn, &tool.tool_id);
    }
    presenter.on_text_update(turn, TextTarget::Answer);
    presenter.on_stage_change(turn);
}

async fn serve(
    config: ClientConfig,
    store: Arc<dyn TurnStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::new(store);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Share API listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
