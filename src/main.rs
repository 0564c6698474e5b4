//! anzen - policy decisions and audit trails for LLM payloads
//!
//! Runs the decision pipeline from the command line: one-shot checks,
//! a JSON-lines stream mode for embedding behind another process, and
//! inspection of policies and stored audit records.

use anyhow::{Context, Result};
use anzen_core::audit::{
    AuditPersistence, AuditQueryFilter, ComplianceReport, MemorySink, ReportScope, TraceId,
};
use anzen_core::config::{load_config, AnzenConfig};
use anzen_core::gateway::{Direction, Gateway};
use anzen_core::policy::Route;
use anzen_core::watch::ConfigWatcher;
use anzen_core::wire::{CheckRequest, CheckResponse, DEFAULT_LANGUAGE, DEFAULT_ROUTE};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "anzen")]
#[command(version)]
#[command(about = "Route-scoped PII policy decisions with hash-only audit trails")]
struct Cli {
    /// Configuration file path (.hcl or .json)
    #[arg(short, long, env = "ANZEN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Input,
    Output,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Input => Direction::Input,
            DirectionArg::Output => Direction::Output,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check a single payload and print the response
    Check {
        /// Payload text; `-` reads it from stdin
        text: String,

        #[arg(short, long, default_value = DEFAULT_ROUTE)]
        route: String,

        #[arg(short, long, default_value = DEFAULT_LANGUAGE)]
        language: String,

        #[arg(short, long, value_enum, default_value = "input")]
        direction: DirectionArg,

        /// Correlate with an earlier check
        #[arg(long)]
        trace_id: Option<String>,
    },

    /// Read check requests as JSON lines on stdin, answer on stdout
    Stream {
        /// Reload policies when the configuration file changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Show the policy that governs a route
    Resolve {
        route: String,
    },

    /// Compliance report over persisted audit records
    Report {
        /// Route filter; a trailing `*` matches by prefix
        #[arg(short, long)]
        route: Option<String>,

        /// Only records from the last N hours
        #[arg(long)]
        since_hours: Option<i64>,

        /// List the N most recent matching records instead of a report
        #[arg(long)]
        recent: Option<usize>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("anzen_core={log_level},anzen={log_level}").into());
    tracing_subscriber::registry()
        .with(filter)
        .with(
            cli.log_json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.log_json)
                .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let (config, config_path) =
        load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Check {
            text,
            route,
            language,
            direction,
            trace_id,
        } => {
            let text = if text == "-" {
                let mut buf = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut buf)
                    .await
                    .context("Failed to read payload from stdin")?;
                buf
            } else {
                text
            };

            let gateway = Gateway::from_config(&config)?;
            let sinks = spawn_sinks(&gateway, &config).await?;
            let assessment = gateway
                .check(
                    &text,
                    &route,
                    &language,
                    direction.into(),
                    trace_id.map(TraceId::from_string),
                )
                .await;
            let response = CheckResponse::from_assessment(&assessment, &language);
            println!("{}", serde_json::to_string_pretty(&response)?);

            drop(gateway);
            drain(sinks).await;
        }

        Commands::Stream { watch } => {
            let gateway = Gateway::from_config(&config)?;
            let mut sinks = spawn_sinks(&gateway, &config).await?;
            let session = Arc::new(MemorySink::from_config(&config.audit));
            sinks.push(
                gateway
                    .trail()
                    .spawn_sink(session.clone(), config.audit.retry_policy()),
            );

            let _watcher = match (watch, &config_path) {
                (true, Some(path)) => Some(
                    ConfigWatcher::spawn(path.clone(), Arc::clone(gateway.resolver()))
                        .context("Failed to watch configuration")?,
                ),
                (true, None) => {
                    tracing::warn!("--watch ignored: no configuration file in use");
                    None
                }
                (false, _) => None,
            };

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut stdout = tokio::io::stdout();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let output = match serde_json::from_str::<CheckRequest>(&line) {
                    Ok(request) => {
                        let assessment = gateway
                            .check(
                                &request.text,
                                &request.route,
                                &request.language,
                                request.direction,
                                request.trace_id,
                            )
                            .await;
                        serde_json::to_string(&CheckResponse::from_assessment(
                            &assessment,
                            &request.language,
                        ))?
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed request line");
                        serde_json::json!({ "error": format!("invalid request: {e}") }).to_string()
                    }
                };
                stdout.write_all(output.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }

            let stats = gateway.normalizer_stats();
            tracing::info!(
                dropped = stats.dropped,
                clamped = stats.clamped,
                "Input closed, draining audit sinks"
            );
            drop(gateway);
            drain(sinks).await;

            let log = session.log().read().await;
            let summary = ComplianceReport::build(log.iter(), &ReportScope::default());
            tracing::info!(
                total = summary.total_requests,
                allowed = summary.allowed_requests,
                redacted = summary.redacted_requests,
                blocked = summary.blocked_requests,
                "Stream session summary"
            );
        }

        Commands::Resolve { route } => {
            let gateway = Gateway::from_config(&config)?;
            let policy = gateway.resolver().resolve(&Route::parse(&route));
            println!("{}", serde_json::to_string_pretty(policy.as_ref())?);
        }

        Commands::Report {
            route,
            since_hours,
            recent,
        } => {
            let persistence =
                AuditPersistence::new(&config.audit.storage_dir, config.audit.persistence.clone())
                    .await
                    .context("Failed to open audit storage")?;
            let from = since_hours.map(|h| chrono::Utc::now() - chrono::Duration::hours(h));

            match recent {
                Some(limit) => {
                    let filter = AuditQueryFilter {
                        route,
                        from,
                        limit: Some(limit),
                        ..Default::default()
                    };
                    for record in persistence.query(&filter).await.iter().rev() {
                        println!("{}", serde_json::to_string(record)?);
                    }
                }
                None => {
                    let records = persistence.export_all().await;
                    let scope = ReportScope {
                        from,
                        to: None,
                        route,
                    };
                    let report = ComplianceReport::build(&records, &scope);
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }

        Commands::Config { default } => {
            let mut shown = if default {
                AnzenConfig::default()
            } else {
                if let Some(path) = &config_path {
                    eprintln!("# loaded from {}", path.display());
                }
                config
            };
            if shown.audit.hash_key.is_some() {
                shown.audit.hash_key = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

/// Spawn the configured audit sinks on the gateway's trail.
async fn spawn_sinks(gateway: &Gateway, config: &AnzenConfig) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();
    if config.audit.persistence.enabled {
        let persistence =
            AuditPersistence::new(&config.audit.storage_dir, config.audit.persistence.clone())
                .await
                .context("Failed to open audit storage")?;
        tracing::info!(dir = %persistence.dir().display(), "Persisting audit records");
        handles.push(
            gateway
                .trail()
                .spawn_sink(Arc::new(persistence), config.audit.retry_policy()),
        );
    }
    Ok(handles)
}

/// Wait for sink tasks to write what is still buffered.
async fn drain(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Audit sink task failed");
        }
    }
}
