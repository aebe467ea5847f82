use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::io::AsyncBufReadExt;

use relay_core::errors::DispatchError;
use relay_core::payloads::RunResult;
use relay_core::session::SessionKey;
use relay_engine::{
    QueueConfig, QueueMode, QueuedMessage, ReplyDispatcher, RunExecutor, RunnerConfig,
    SessionRunner,
};
use relay_gateway::{
    ExecutionMode, GatewayDispatcher, HttpGatewayClient, LocalExecutor, RetryConfig, RunParams,
};
use relay_store::{install_termination_cleanup, SessionLockManager, TranscriptStore};
use relay_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "relay", about = "Conversational agent gateway control plane")]
struct Args {
    /// Base directory for relay state (transcripts, lock files, logs).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Remote execution gateway endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8790/rpc")]
    gateway_url: String,

    /// Skip the remote gateway and execute everything locally.
    #[arg(long)]
    local_only: bool,

    /// Reply queue mode: collect, followup, or parallel.
    #[arg(long, default_value = "collect")]
    queue_mode: String,
}

/// Local execution seam of this build. The embedded agent runtime ships in
/// the full product; this daemon surfaces its absence as an explicit
/// dispatch error instead of pretending to run.
struct LocalRuntimeUnavailable;

#[async_trait]
impl LocalExecutor for LocalRuntimeUnavailable {
    async fn execute(&self, _params: &RunParams) -> Result<RunResult, DispatchError> {
        Err(DispatchError::LocalExecution(
            "embedded agent runtime is not linked into this build".into(),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let _telemetry = init_telemetry(TelemetryConfig {
        log_db_path: data_dir.join("logs.db"),
        ..TelemetryConfig::default()
    });

    tracing::info!(data_dir = %data_dir.display(), "starting relay control plane");

    let store = Arc::new(TranscriptStore::new(data_dir.join("transcripts"))?);
    let locks = Arc::new(SessionLockManager::new());
    install_termination_cleanup(&locks);

    let transport = HttpGatewayClient::new(args.gateway_url.clone());
    let gateway = GatewayDispatcher::new(transport, LocalRuntimeUnavailable, RetryConfig::default());

    let runner_config = RunnerConfig {
        execution_mode: if args.local_only {
            ExecutionMode::LocalOnly
        } else {
            ExecutionMode::RemoteFirst
        },
        ..RunnerConfig::default()
    };
    let runner = Arc::new(SessionRunner::new(gateway, store, locks.clone(), runner_config));

    let queue_config = QueueConfig {
        mode: parse_queue_mode(&args.queue_mode)?,
        ..QueueConfig::default()
    };
    let dispatcher = ReplyDispatcher::new(runner.clone() as Arc<dyn RunExecutor>, queue_config);

    tracing::info!(gateway_url = %args.gateway_url, "relay ready, reading messages from stdin");

    // Console lane: each stdin line is one inbound message. Real channel
    // adapters live outside this crate and feed the same submit path.
    let console_key = SessionKey::direct("console", "operator");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match dispatcher.submit(&console_key, QueuedMessage::new(line)).await {
                    Ok(Some(payloads)) => {
                        for p in payloads {
                            if let Some(text) = p.text {
                                println!("{text}");
                            }
                        }
                    }
                    Ok(None) => println!("(queued: agent is busy)"),
                    Err(e) => tracing::error!(error = %e, "dispatch failed"),
                }
            }
        }
    }

    let released = locks.release_all();
    tracing::info!(released, "relay shut down");
    Ok(())
}

fn parse_queue_mode(s: &str) -> anyhow::Result<QueueMode> {
    match s {
        "collect" => Ok(QueueMode::Collect),
        "followup" => Ok(QueueMode::Followup),
        "parallel" => Ok(QueueMode::Parallel),
        other => anyhow::bail!("unknown queue mode: {other}"),
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".relay")
}
