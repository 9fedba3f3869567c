use anyhow::Error;
use clap::Parser;

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use vimeoq::db::DbHandle;
use vimeoq::server::{self, RunOptions};
use vimeoq::telemetry::{self, TelemetryConfig};
use vimeoq::uploader::RetryPolicy;
use vimeoq::vimeo::{VimeoClient, VimeoConfig, DEFAULT_API_BASE};
use vimeoq::RunSummary;

#[derive(Parser, Clone, Debug, PartialEq)]
#[command(author, version, about)]
pub struct ConfigContext {
    #[arg(
        short = 'd',
        long = "db_path",
        env = "DB_PATH",
        help = "SQLite Database Holding the Videos Table"
    )]
    db_path: PathBuf,

    #[arg(
        long = "access_token",
        env = "ACCESS_TOKEN",
        hide_env_values = true,
        help = "Vimeo API Access Token"
    )]
    access_token: String,

    #[arg(
        long = "api_base",
        env = "VIMEO_API_BASE",
        help = "Vimeo API Base URL",
        default_value = DEFAULT_API_BASE
    )]
    api_base: String,

    #[arg(
        short = 'b',
        long = "batch_size",
        help = "Number of Pending Videos Fetched per Batch",
        default_value = "10",
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    batch_size: i64,

    #[arg(
        long = "max_attempts",
        help = "Attempts per Upload Step within a Run",
        default_value = "1",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_attempts: u32,

    #[arg(
        long = "retry_backoff_ms",
        help = "Delay in Milliseconds before the First Retry",
        default_value = "1000"
    )]
    retry_backoff_ms: u64,

    #[arg(
        long = "request_timeout_secs",
        help = "Timeout in Seconds for Vimeo API Calls",
        default_value = "5"
    )]
    request_timeout_secs: u64,

    #[arg(
        long = "transfer_timeout_secs",
        help = "Timeout in Seconds for Transferring a Single File",
        default_value = "3600"
    )]
    transfer_timeout_secs: u64,

    #[arg(
        long = "sweep_below_resume",
        help = "Also Process Pending Videos below the Resume Point"
    )]
    sweep_below_resume: bool,

    #[arg(
        long = "log_file",
        env = "LOG_FILE",
        help = "File Receiving a Copy of the Log",
        default_value = "video_processing.log"
    )]
    log_file: PathBuf,

    #[arg(
        long = "jaeger_endpoint",
        env = "JAEGER_ENDPOINT",
        help = "Jaeger Collector Endpoint for Traces"
    )]
    jaeger_endpoint: Option<String>,
}

#[instrument(skip_all)]
async fn setup(
    config: ConfigContext,
    cancel_token: CancellationToken,
) -> Result<RunSummary, Error> {
    let db = DbHandle::new(&config.db_path).await?;

    let uploader = VimeoClient::new(VimeoConfig {
        api_base: config.api_base,
        access_token: config.access_token,
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        transfer_timeout: Duration::from_secs(config.transfer_timeout_secs),
        retry: RetryPolicy {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            ..RetryPolicy::default()
        },
    })?
    .with_cancel_token(cancel_token.clone());

    let options = RunOptions {
        batch_size: config.batch_size,
        sweep_below_resume: config.sweep_below_resume,
    };

    server::run(cancel_token, &db, &uploader, &options).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "vimeoq=DEBUG");
    }

    let config = ConfigContext::parse();

    telemetry::init(&TelemetryConfig {
        log_file: Some(config.log_file.clone()),
        jaeger_endpoint: config.jaeger_endpoint.clone(),
    })?;

    let token = CancellationToken::new();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let cloned_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, finishing current video"),
            _ = sigint.recv() => info!("Received SIGINT, finishing current video"),
        }
        cloned_token.cancel();
    });

    let app = tokio::spawn(setup(config, token));
    let summary = app.await??;

    println!("Done: {summary}");
    telemetry::shutdown();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const LOWERCASE_WORDS: &[&str] = &[
        "a", "the", "of", "per", "for", "in", "within", "below", "before",
    ];

    #[test]
    fn command_is_well_formed() {
        ConfigContext::command().debug_assert();
    }

    #[test]
    fn help_strings_are_title_case() {
        for arg in ConfigContext::command().get_arguments() {
            if matches!(arg.get_id().as_str(), "help" | "version") {
                continue;
            }
            let Some(help) = arg.get_help() else { continue };
            for word in help.to_string().split_whitespace() {
                if LOWERCASE_WORDS.contains(&word) {
                    continue;
                }
                assert!(
                    word.starts_with(|c: char| !c.is_lowercase()),
                    "`{word}` in help of --{}",
                    arg.get_id()
                );
            }
        }
    }

    #[test]
    fn defaults_match_a_single_attempt_run() {
        let config = ConfigContext::try_parse_from([
            "vimeoq",
            "--db_path",
            "videos.db",
            "--access_token",
            "token",
        ])
        .unwrap();

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.request_timeout_secs, 5);
        assert!(!config.sweep_below_resume);
        assert!(ConfigContext::try_parse_from([
            "vimeoq",
            "--db_path",
            "videos.db",
            "--access_token",
            "token",
            "--batch_size",
            "0",
        ])
        .is_err());
    }
}
