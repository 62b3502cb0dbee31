#![forbid(unsafe_code)]

//! `agent-tether`: process supervision, worker RPC and session sharing.
//!
//! Subcommands:
//! - `shell`: print the resolved shells.
//! - `exec`: run a command through the preferred shell, tearing down its
//!   whole process tree on Ctrl-C / `SIGTERM`.
//! - `worker`: serve the built-in RPC methods over stdio NDJSON.
//! - `call`: spawn a worker, call one method, print the result.
//! - `share`: create, remove, resync or fetch a session share.
//!
//! Logs go to stderr so stdout stays free for the worker channel.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_tether::channel::stream::spawn_stream_channel;
use agent_tether::channel::worker::spawn_worker;
use agent_tether::persistence::{db, record_repo::RecordRepo};
use agent_tether::process::{shell, spawn_supervised, ShellResolver, SpawnSpec};
use agent_tether::rpc::{MethodTable, RpcClient, RpcServer};
use agent_tether::share::{
    HttpShareClient, RecordSessionSource, ShareService, ShareStore, SyncQueue,
};
use agent_tether::{AppError, Result, TetherConfig};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-tether", about = "Agent coordination toolkit", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the preferred and acceptable shells.
    Shell,
    /// Run a command through the preferred shell.
    Exec {
        /// Command line passed to the shell.
        command: String,
    },
    /// Serve RPC methods over stdin/stdout.
    Worker,
    /// Call a method on a freshly spawned worker.
    Call {
        /// Method name.
        method: String,
        /// JSON input (defaults to `null`).
        input: Option<String>,
    },
    /// Manage session shares.
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },
}

#[derive(Debug, Subcommand)]
enum ShareAction {
    /// Share a session and push its full state.
    Create { session_id: String },
    /// Unshare a session.
    Remove { session_id: String },
    /// Push the full state of a shared session again.
    Sync { session_id: String },
    /// Print the remote state of a shared session.
    Fetch { session_id: String },
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let outcome = runtime.block_on(run(args));
    // A blocking stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    outcome
}

async fn run(args: Cli) -> Result<ExitCode> {
    // ── Load configuration ──────────────────────────────
    let config = match &args.config {
        Some(path) => TetherConfig::load_from_path(path)?,
        None => TetherConfig::from_env()?,
    };

    match args.command {
        Command::Shell => print_shells(),
        Command::Exec { command } => exec(&config, &command).await,
        Command::Worker => serve_worker().await,
        Command::Call { method, input } => call(&config, &method, input.as_deref()).await,
        Command::Share { action } => share(&config, action).await,
    }
}

fn print_shells() -> Result<ExitCode> {
    let resolver = ShellResolver::from_env();
    println!("preferred:  {}", resolver.preferred()?.display());
    println!("acceptable: {}", resolver.acceptable()?.display());
    Ok(ExitCode::SUCCESS)
}

async fn exec(config: &TetherConfig, command: &str) -> Result<ExitCode> {
    let shell = shell::preferred()?;
    let spec = SpawnSpec::shell(&shell, command).grace(config.process.grace());
    let mut child = spawn_supervised(&spec)?;

    let mut pumps = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(async move {
            let mut out = tokio::io::stdout();
            let _ = tokio::io::copy(&mut stdout, &mut out).await;
            let _ = out.flush().await;
        }));
    }
    if let Some(mut stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(async move {
            let mut err = tokio::io::stderr();
            let _ = tokio::io::copy(&mut stderr, &mut err).await;
        }));
    }

    let exit = tokio::select! {
        exit = child.wait() => exit,
        () = shutdown_signal() => {
            info!(pid = child.pid(), "shutdown signal received, terminating process tree");
            child.shutdown().await
        }
    };

    for pump in pumps {
        let _ = pump.await;
    }

    Ok(exit
        .code
        .and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from))
}

// ── Worker ─────────────────────────────────────────────

fn worker_methods() -> MethodTable {
    MethodTable::new()
        .register("ping", |_input| async { Ok::<_, AppError>(json!("pong")) })
        .register("echo", |input| async move { Ok::<_, AppError>(input) })
        .register("shell", |_input| async {
            let resolver = ShellResolver::from_env();
            Ok::<_, AppError>(json!({
                "preferred": resolver.preferred()?,
                "acceptable": resolver.acceptable()?,
            }))
        })
}

async fn serve_worker() -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let (channel, tasks) =
        spawn_stream_channel("stdio", tokio::io::stdin(), tokio::io::stdout(), &cancel);
    let (server, serving) = RpcServer::listen(channel, worker_methods());
    server
        .emit("ready", &json!({ "pid": std::process::id() }))
        .await?;
    info!("worker ready");

    let outcome = serving
        .await
        .map_err(|err| AppError::Rpc(format!("worker loop panicked: {err}")))?;
    cancel.cancel();
    let _ = tasks.writer.await;
    outcome?;
    Ok(ExitCode::SUCCESS)
}

async fn call(config: &TetherConfig, method: &str, input: Option<&str>) -> Result<ExitCode> {
    let input: Value = match input {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| AppError::Rpc(format!("invalid input json: {err}")))?,
        None => Value::Null,
    };

    let exe = std::env::current_exe()?;
    let spec = SpawnSpec::new(exe, vec!["worker".into()]).grace(config.process.grace());
    let (channel, worker) = spawn_worker(spec)?;
    let (client, reader) = RpcClient::connect(channel);
    let _ready = client.on("ready", |data| info!(%data, "worker ready"));

    let result = tokio::select! {
        result = client.call(method, input) => result,
        () = shutdown_signal() => Err(AppError::Rpc("interrupted".into())),
    };

    drop(client);
    let exit = worker.shutdown().await;
    reader.abort();
    info!(reason = %exit.reason, "worker stopped");

    let value = result?;
    let rendered = serde_json::to_string_pretty(&value)?;
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

// ── Share ──────────────────────────────────────────────

async fn share(config: &TetherConfig, action: ShareAction) -> Result<ExitCode> {
    let db = Arc::new(db::connect(&config.storage.db_path).await?);
    let repo = RecordRepo::new(db);
    let store = ShareStore::new(repo.clone());
    let transport = Arc::new(HttpShareClient::new(
        &config.share.url,
        config.share.request_timeout(),
    )?);
    let queue = SyncQueue::new(transport.clone(), store.clone(), config.share.debounce());
    let service = ShareService::new(
        transport,
        store,
        Arc::new(RecordSessionSource::new(repo)),
        queue,
    );

    let outcome = match action {
        ShareAction::Create { session_id } => service.create(&session_id).await.map(|record| {
            println!("{}", record.url);
        }),
        ShareAction::Remove { session_id } => service.remove(&session_id).await,
        ShareAction::Sync { session_id } => service.full_sync(&session_id).await,
        ShareAction::Fetch { session_id } => {
            service.fetch(&session_id).await.and_then(|items| {
                println!("{}", serde_json::to_string_pretty(&items)?);
                Ok(())
            })
        }
    };

    service.shutdown().await;
    if let Err(err) = &outcome {
        error!(%err, "share command failed");
    }
    outcome.map(|()| ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
