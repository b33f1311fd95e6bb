use anyhow::{anyhow, Context, Result};
use clap::Parser;
use meta_check::{
    AvailabilityChecker, BatchOutcome, CheckerConfig, HarnessConfig, ProxyDescriptor,
    ReqwestTransport, TelegramNotifier,
};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Check which proxies in a batch are alive via an HTTP META harness
#[derive(Parser)]
#[command(name = "meta-check")]
#[command(about = "Check which proxies in a batch are alive via an HTTP META harness")]
struct Cli {
    /// Input JSON file containing an array of proxy descriptors
    input: PathBuf,

    /// Output file for surviving proxies (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// URL probed through each proxy
    #[arg(long, default_value = "http://www.apple.com/library/test/success.html")]
    url: String,

    /// HTTP method for the probe
    #[arg(long, default_value = "head")]
    method: String,

    /// Status code a probe must answer with
    #[arg(long, default_value = "200")]
    status: u16,

    /// Per-probe timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout: u64,

    /// Retries per request after the first attempt
    #[arg(long, default_value = "1")]
    retries: u32,

    /// Base retry delay in milliseconds
    #[arg(long, default_value = "1000")]
    retry_delay: u64,

    /// Number of probes in flight at once
    #[arg(short = 'n', long, default_value = "10")]
    concurrency: usize,

    /// Reuse cached probe results
    #[arg(long)]
    cache: bool,

    /// Pass incompatible proxies through untested
    #[arg(long)]
    keep_incompatible: bool,

    /// Prefix surviving proxy names with their latency
    #[arg(long)]
    show_latency: bool,

    /// Harness host
    #[arg(long, default_value = "127.0.0.1")]
    harness_host: String,

    /// Harness control port
    #[arg(long, default_value = "9876")]
    harness_port: u16,

    /// Harness protocol (http or https)
    #[arg(long, default_value = "http")]
    harness_protocol: String,

    /// Authorization header for the harness control API
    #[arg(long, default_value = "")]
    harness_authorization: String,

    /// Harness warm-up delay in milliseconds
    #[arg(long, default_value = "3000")]
    harness_start_delay: u64,

    /// Per-proxy harness timeout budget in milliseconds
    #[arg(long, default_value = "10000")]
    harness_proxy_timeout: u64,

    /// Telegram bot token for failure notifications
    #[arg(long)]
    telegram_bot_token: Option<String>,

    /// Telegram chat id for failure notifications
    #[arg(long)]
    telegram_chat_id: Option<String>,

    /// Batch label used in notifications
    #[arg(long)]
    batch_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let content = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("could not read {:?}", cli.input))?;
    let proxies: Vec<ProxyDescriptor> =
        serde_json::from_str(&content).with_context(|| format!("could not parse {:?}", cli.input))?;
    println!("Loaded {} proxies from {:?}", proxies.len(), cli.input);

    let method = Method::from_bytes(cli.method.to_uppercase().as_bytes())
        .map_err(|_| anyhow!("invalid HTTP method: {}", cli.method))?;

    let mut config = CheckerConfig::new()
        .with_probe_url(cli.url)
        .with_method(method)
        .with_expected_status(cli.status)
        .with_timeout(Duration::from_millis(cli.timeout))
        .with_retries(cli.retries)
        .with_retry_delay(Duration::from_millis(cli.retry_delay))
        .with_concurrency(cli.concurrency)
        .with_cache(cli.cache)
        .with_keep_incompatible(cli.keep_incompatible)
        .with_show_latency(cli.show_latency);
    if let Some(name) = cli.batch_name {
        config = config.with_batch_name(name);
    }
    let keep_incompatible = config.keep_incompatible;

    let harness_config = HarnessConfig {
        host: cli.harness_host,
        port: cli.harness_port,
        protocol: cli.harness_protocol,
        authorization: cli.harness_authorization,
        start_delay: Duration::from_millis(cli.harness_start_delay),
        proxy_timeout: Duration::from_millis(cli.harness_proxy_timeout),
    };

    let mut checker = AvailabilityChecker::new(config, harness_config);
    if let (Some(token), Some(chat_id)) = (cli.telegram_bot_token, cli.telegram_chat_id) {
        let transport = Arc::new(ReqwestTransport::new());
        checker = checker.with_notifier(TelegramNotifier::new(token, chat_id, transport));
    }

    let total = {
        let outcome = checker.check_batch(proxies).await?;
        match outcome {
            BatchOutcome::Untested(proxies) => {
                println!("No harness-compatible proxies, batch returned untested");
                proxies
            }
            BatchOutcome::Tested(report) => {
                println!(
                    "Results: {} valid, {} failed, {} incompatible",
                    report.valid.len(),
                    report.failed.len(),
                    report.incompatible.len()
                );
                if !report.valid.is_empty() {
                    println!("\nValid proxies:");
                    for proxy in &report.valid {
                        println!("  {proxy}");
                    }
                }
                let mut output = report.valid;
                if keep_incompatible {
                    output.extend(report.incompatible);
                }
                output
            }
        }
    };

    let serialized = serde_json::to_string_pretty(&total)?;
    match cli.output {
        Some(path) => {
            std::fs::write(&path, serialized)
                .with_context(|| format!("could not write {path:?}"))?;
            println!("Saved {} proxies to {path:?}", total.len());
        }
        None => println!("{serialized}"),
    }

    Ok(())
}
