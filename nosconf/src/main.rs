//! nosconf: converge one declared entity on a device and print the result.
//!
//! The declared intent is a JSON object read from `--params` (or stdin with
//! `-`). The result goes to stdout as JSON; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nosconf::config::{ConnectionConfig, DEFAULT_PORT};
use nosconf::params::RawParams;
use nosconf::probe::SshProbe;
use nosconf::transport::{HttpTransport, Platform};
use nosconf::{apply, EntityKind, Error};

/// Declarative configuration for a network OS management API
#[derive(Parser, Debug)]
#[command(name = "nosconf", version, about)]
struct Args {
    /// Device management address
    #[arg(long, env = "NOSCONF_HOST")]
    host: String,

    /// Management API port
    #[arg(long, env = "NOSCONF_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, env = "NOSCONF_USER", default_value = "admin")]
    user: String,

    #[arg(long, env = "NOSCONF_PASSWORD", hide_env_values = true)]
    password: String,

    /// Verify the device TLS certificate
    #[arg(long, env = "NOSCONF_VALIDATE_CERTS")]
    validate_certs: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "NOSCONF_REQUEST_TIMEOUT", default_value = "120")]
    request_timeout: u64,

    /// Skip platform discovery
    #[arg(long, env = "NOSCONF_PLATFORM")]
    platform: Option<PlatformArg>,

    /// Seconds to wait for an SSH handshake when probing
    #[arg(long, default_value = "10")]
    ssh_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Link aggregation group
    Lag {
        /// JSON file with the declared intent, `-` for stdin
        #[arg(long, default_value = "-")]
        params: PathBuf,
    },

    /// Tenant image import, wait or removal
    TenantImage {
        /// JSON file with the declared intent, `-` for stdin
        #[arg(long, default_value = "-")]
        params: PathBuf,
    },

    /// Wait for a chassis partition to be running or reachable over SSH
    PartitionWait {
        /// JSON file with the declared intent, `-` for stdin
        #[arg(long, default_value = "-")]
        params: PathBuf,
    },
}

impl Command {
    fn split(&self) -> (EntityKind, &PathBuf) {
        match self {
            Command::Lag { params } => (EntityKind::Lag, params),
            Command::TenantImage { params } => (EntityKind::TenantImage, params),
            Command::PartitionWait { params } => (EntityKind::PartitionWait, params),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PlatformArg {
    Controller,
    Partition,
    Appliance,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Controller => Platform::Controller,
            PlatformArg::Partition => Platform::Partition,
            PlatformArg::Appliance => Platform::Appliance,
        }
    }
}

async fn read_params(path: &PathBuf) -> Result<RawParams> {
    let text = if path.as_os_str() == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read parameters from stdin")?;
        text
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&text).context("Parameters must be a JSON object")
}

async fn run(args: Args) -> Result<serde_json::Value> {
    let (kind, params_path) = args.command.split();
    let raw = read_params(params_path).await?;

    let config = ConnectionConfig {
        port: args.port,
        validate_certs: args.validate_certs,
        request_timeout: Duration::from_secs(args.request_timeout),
        platform: args.platform.map(Platform::from),
        ..ConnectionConfig::new(&args.host, &args.user, &args.password)
    };
    info!(host = %config.host, port = config.port, entity = %kind, "Connecting");

    let transport = HttpTransport::new(&config).context("Failed to build HTTP client")?;
    let probe = SshProbe::new(Duration::from_secs(args.ssh_timeout));

    let report = apply(kind, &raw, &transport, &probe).await?;
    Ok(report.to_json())
}

fn failure(err: &anyhow::Error) -> serde_json::Value {
    let mut out = json!({ "failed": true, "msg": err.to_string() });
    if let Some(Error::Timeout { elapsed, .. }) = err.downcast_ref::<Error>() {
        out["elapsed"] = json!(elapsed);
    }
    out
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nosconf=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(result) => {
            println!("{}", result);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            println!("{}", failure(&e));
            ExitCode::FAILURE
        }
    }
}
