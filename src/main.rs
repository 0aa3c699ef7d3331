#![forbid(unsafe_code)]

//! `stallguard`: stream a URL to stdout and abort it if it stalls.
//!
//! Loads detector thresholds and the optional health probe from a TOML file,
//! issues a streaming GET, and exits with an error naming the stall reason
//! when the request goes silent while the service keeps answering probes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use stallguard::config::GlobalConfig;
use stallguard::guard::guard_stream;
use stallguard::probe::http::HttpHealthProbe;
use stallguard::probe::HealthProbe;
use stallguard::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "stallguard", about = "Stream a URL with stall detection", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (defaults apply when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Streaming endpoint to GET.
    #[arg(long)]
    url: String,

    /// Extra request header as `Name: value` (repeatable).
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.load_credentials().await?;
    info!(provider = %config.provider, "configuration loaded");

    let probe = match config.probe {
        Some(ref probe_config) => {
            let probe = HttpHealthProbe::from_config(probe_config)?;
            info!(url = probe.url(), "health probe enabled");
            Some(Arc::new(probe) as Arc<dyn HealthProbe>)
        }
        None => None,
    };

    // ── Issue the request ───────────────────────────────
    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("request", %request_id, provider = %config.provider);
    stream_to_stdout(&args, &config, probe).instrument(span).await
}

async fn stream_to_stdout(
    args: &Cli,
    config: &GlobalConfig,
    probe: Option<Arc<dyn HealthProbe>>,
) -> Result<()> {
    let client = reqwest::Client::new();
    let mut request = client.get(&args.url);
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value);
    }

    let response = request.send().await?.error_for_status()?;
    info!(status = %response.status(), "streaming response");

    let mut stream = guard_stream(
        response.bytes_stream(),
        config.detector,
        config.provider.clone(),
        probe,
    );

    // ── Copy chunks until completion, stall, or shutdown ──
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                warn!("shutdown signal received; abandoning request");
                break;
            }
            item = stream.next() => match item {
                Some(Ok(chunk)) => stdout.write_all(&chunk).await?,
                Some(Err(err)) => return Err(err),
                None => {
                    info!("stream complete");
                    break;
                }
            },
        }
    }

    stdout.flush().await?;
    Ok(())
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| AppError::Config(format!("invalid header (expected `Name: value`): {raw}")))
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
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr; stdout carries the streamed body.
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
