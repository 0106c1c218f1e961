//! Validator Monitor CLI
//!
//! 监控一个 systemd 服务，把降级状态变化上报给远程 collector

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use validator_monitor::shutdown::spawn_signal_handler;
use validator_monitor::{
    AgentConfig, DeliveryChannel, IdentityProbe, LastValueFile, LoopTiming, MonitorAgent,
    ProcessManager, SamplingMode, StatusSampler, SystemctlClient, TcpTransport,
};

#[derive(Parser)]
#[command(name = "vmon")]
#[command(about = "Validator Monitor - report service status transitions to a remote collector")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/validator-monitor/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor loop
    Run {
        /// systemd unit to watch
        #[arg(long, short)]
        service: Option<String>,
        /// Collector URL (tcp://host:port)
        #[arg(long)]
        collector: Option<String>,
        /// Poll interval in milliseconds
        #[arg(long, short)]
        interval_ms: Option<u64>,
        /// Sampling mode
        #[arg(long, value_enum)]
        mode: Option<SamplingMode>,
        /// Last-known-value file
        #[arg(long)]
        state_file: Option<PathBuf>,
        /// Reconnect in the background after a dropped connection
        #[arg(long)]
        reconnect: bool,
    },
    /// Sample the service once and print it
    Sample {
        #[arg(long, short)]
        service: Option<String>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the validator identity
    Identity,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug vmon run
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("validator_monitor=info,vmon=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let mut config = exit_on_fatal(AgentConfig::load(cli.config.as_deref()));

    match cli.command {
        Commands::Run {
            service,
            collector,
            interval_ms,
            mode,
            state_file,
            reconnect,
        } => {
            if let Some(service) = service {
                config.service_name = service;
            }
            if let Some(collector) = collector {
                config.collector_url = collector;
            }
            if let Some(interval_ms) = interval_ms {
                config.poll_interval_ms = interval_ms;
            }
            if let Some(mode) = mode {
                config.sampling_mode = mode;
            }
            if state_file.is_some() {
                config.state_file = state_file;
            }
            config.reconnect |= reconnect;
            config.apply_env();
            exit_on_fatal(config.validate());

            run(config).await?;
        }
        Commands::Sample { service, json } => {
            if let Some(service) = service {
                config.service_name = service;
            }
            let manager: Arc<dyn ProcessManager> =
                Arc::new(exit_on_fatal(SystemctlClient::locate(config.command_timeout())));
            let sampler = StatusSampler::new(config.service_name.clone(), manager);
            let sample = sampler.sample().await;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "service": config.service_name,
                        "status": sample.status,
                        "error": sample.failure.map(|e| e.to_string()),
                    }))?
                );
            } else {
                println!("{}: {}", config.service_name, sample.status);
            }
        }
        Commands::Identity => {
            let probe = IdentityProbe::new(config.identity_command.clone(), config.command_timeout());
            println!("{}", probe.query().await?);
        }
    }

    Ok(())
}

async fn run(config: AgentConfig) -> Result<()> {
    let manager: Arc<dyn ProcessManager> =
        Arc::new(exit_on_fatal(SystemctlClient::locate(config.command_timeout())));

    IdentityProbe::new(config.identity_command.clone(), config.command_timeout())
        .log_identity()
        .await;

    let transport = Arc::new(
        TcpTransport::new(config.handshake_timeout()).with_write_timeout(config.write_timeout()),
    );
    let channel = Arc::new(
        DeliveryChannel::new(
            config.service_name.clone(),
            config.collector_url.clone(),
            config.auth_token.clone(),
            transport,
            config.retry.policy(),
        )
        .with_reconnect(config.reconnect),
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    info!(
        service = %config.service_name,
        collector = %config.collector_url,
        mode = ?config.sampling_mode,
        "Validator monitor starting"
    );

    tokio::select! {
        result = channel.connect_with_retry() => exit_on_fatal(result),
        _ = cancel.cancelled() => {
            info!("Shutdown requested before collector connection");
            return Ok(());
        }
    }

    let sampler = StatusSampler::new(config.service_name.clone(), manager);
    let agent = MonitorAgent::new(
        sampler,
        channel,
        config.sampling_mode,
        config.state_file.clone().map(LastValueFile::new),
        LoopTiming {
            poll_interval: config.poll_interval(),
            unknown_backoff: config.unknown_backoff(),
        },
    );

    agent.run(cancel).await?;
    info!("Validator monitor stopped");
    Ok(())
}

/// 以错误对应的退出码终止进程，只用于致命错误
fn exit_on_fatal<T>(result: validator_monitor::Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!(error = %e, "Fatal error");
            std::process::exit(e.exit_code());
        }
    }
}
