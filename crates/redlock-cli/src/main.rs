use std::{process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use redlock_common::time::now;
use redlock_distributed::{CallContext, Redlock, ServerSetConfig};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "redlock", about = "Majority-vote distributed lock client")]
struct Cli {
    /// Comma separated lock servers, e.g. `redis://10.0.0.1:6379,10.0.0.2:6379`.
    #[arg(long, env = "REDLOCK_SERVERS")]
    servers: String,

    /// Deadline applied to every server call, in milliseconds.
    #[arg(long, env = "REDLOCK_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire `key` for `token` on a majority of servers.
    Acquire {
        key: String,
        token: String,
        #[arg(long, default_value_t = 60)]
        ttl: u64,
    },
    /// Release `key` if it is held by `token`.
    Release { key: String, token: String },
    /// Remaining lifetime of `key` held by `token`.
    Ttl { key: String, token: String },
    /// Whether a majority of servers hold any record for `key`.
    Probe { key: String },
}

#[derive(Serialize)]
struct Report {
    operation: &'static str,
    key: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    at: String,
}

impl Report {
    fn new(operation: &'static str, key: &str) -> Self {
        Self {
            operation,
            key: key.to_string(),
            ok: true,
            elapsed_seconds: None,
            ttl_seconds: None,
            locked: None,
            error: None,
            at: now().to_rfc3339(),
        }
    }

    fn failed(mut self, err: impl ToString) -> Self {
        self.ok = false;
        self.error = Some(err.to_string());
        self
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::from_default_env().add_directive("redlock=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = ServerSetConfig::parse_list(&cli.servers)?;
    let redlock = Redlock::connect(&config).await?;
    info!(servers = ?redlock.endpoints(), quorum = redlock.quorum(), "using lock servers");
    let mut ctx = CallContext::background();
    if let Some(timeout_ms) = cli.timeout_ms {
        ctx = ctx.with_timeout(Duration::from_millis(timeout_ms));
    }

    let report = match &cli.command {
        Command::Acquire { key, token, ttl } => {
            match redlock.acquire(&ctx, key, token, *ttl).await {
                Ok(elapsed) => Report {
                    elapsed_seconds: Some(elapsed),
                    ..Report::new("acquire", key)
                },
                Err(err) => Report::new("acquire", key).failed(err),
            }
        }
        Command::Release { key, token } => match redlock.release(&ctx, key, token).await {
            Ok(elapsed) => Report {
                elapsed_seconds: Some(elapsed),
                ..Report::new("release", key)
            },
            Err(err) => Report::new("release", key).failed(err),
        },
        Command::Ttl { key, token } => match redlock.query_ttl(&ctx, key, token).await {
            Ok(ttl) => Report {
                ttl_seconds: Some(ttl),
                ..Report::new("ttl", key)
            },
            Err(err) => Report::new("ttl", key).failed(err),
        },
        Command::Probe { key } => Report {
            locked: Some(redlock.probe(&ctx, key).await),
            ..Report::new("probe", key)
        },
    };

    print_report(&report, cli.json)?;

    if let Some(err) = &report.error {
        error!(operation = report.operation, key = %report.key, error = %err, "lock operation failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    match (report.elapsed_seconds, report.ttl_seconds, report.locked, &report.error) {
        (_, _, _, Some(err)) => println!("{} {}: {err}", report.operation, report.key),
        (Some(elapsed), _, _, _) => {
            println!("{} {}: ok in {elapsed:.2}s", report.operation, report.key)
        }
        (_, Some(ttl), _, _) => println!("{} {}: {ttl}s remaining", report.operation, report.key),
        (_, _, Some(locked), _) => println!(
            "{} {}: {}",
            report.operation,
            report.key,
            if locked { "locked" } else { "free" }
        ),
        _ => println!("{} {}: ok", report.operation, report.key),
    }
    Ok(())
}
