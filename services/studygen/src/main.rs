//! studygen operator CLI
//!
//! Loads the service configuration and API keys the same way the generation
//! service does and reports on them:
//! - `health`: key pool status, dispatcher capacity and model settings
//! - `classify`: how a given upstream error text would be treated

mod config;
mod service;

use anyhow::{Context, Result, bail};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::service::{Runtime, classification_report};

const USAGE: &str =
    "usage: studygen [--config <path>] [health | classify [--status <code>] <error text>]";

#[derive(Debug, PartialEq)]
enum Command {
    Health { config: Option<String> },
    Classify {
        status: Option<u16>,
        message: String,
    },
}

impl Command {
    /// Parse arguments after the program name. No subcommand means `health`.
    fn parse(args: &[String]) -> Result<Self> {
        let mut config = None;
        let mut status = None;
        let mut rest = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    config = Some(iter.next().context("--config needs a path")?.clone());
                }
                "--status" => {
                    let code = iter.next().context("--status needs a code")?;
                    status = Some(
                        code.parse::<u16>()
                            .with_context(|| format!("invalid status code: {code}"))?,
                    );
                }
                "-h" | "--help" => bail!("{USAGE}"),
                _ => rest.push(arg.as_str()),
            }
        }

        match rest.split_first() {
            None | Some((&"health", [])) => Ok(Command::Health { config }),
            Some((&"classify", message)) if !message.is_empty() => Ok(Command::Classify {
                status,
                message: message.join(" "),
            }),
            _ => bail!("{USAGE}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr; stdout carries the report
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let report = match Command::parse(&args)? {
        Command::Health { config } => {
            let config_path = Config::resolve_path(config.as_deref());
            info!(path = %config_path.display(), "loading configuration");

            let config = Config::load(&config_path).with_context(|| {
                format!("failed to load config from {}", config_path.display())
            })?;

            info!(
                sources = ?config.keys.sources,
                concurrency = config.dispatch.concurrency,
                model = %config.generation.model,
                "configuration loaded"
            );

            Runtime::from_config(&config).health().await
        }
        Command::Classify { status, message } => classification_report(status, &message),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
