//! Command surface of the `moonwatch` binary.

use crate::client::ClientError;
use crate::extrinsic::{Extrinsic, ExtrinsicFilter};
use crate::moonbeam::MoonbeamClient;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Parser)]
#[command(name = "moonwatch", version, about = "Query and watch Moonbeam-family parachains")]
pub struct Cli {
    /// Chain to connect to (moonbase, moonbeam, moonriver).
    pub chain: String,

    /// Verbose logging.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Directory for the on-disk result cache.
    #[arg(long, default_value = "/tmp/moonwatch-cache")]
    pub cache_path: PathBuf,

    /// Run without the on-disk cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Directory holding the precompile ABI files.
    #[arg(long, default_value = "abis")]
    pub abi_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Dump a block's temporal position relative to the chain head.
    Block {
        /// Block to query, the chain head when omitted.
        #[arg(short, long)]
        block: Option<u64>,
    },
    /// Print decoded extrinsics matching a filter.
    EventWatch {
        /// Address pattern to look for.
        #[arg(short, long)]
        address: Option<String>,

        /// Method pattern to look for, e.g. "Balances.Transfer".
        #[arg(short = 'e', long)]
        method: Option<String>,

        /// Minimum amount in token units.
        #[arg(short, long)]
        min_amount: Option<f64>,

        /// Keep polling after the initial lookback window.
        #[arg(short = 'f', long)]
        tail: bool,

        /// How many blocks to look back.
        #[arg(short, long, default_value_t = 300)]
        count: u64,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub async fn run(client: &MoonbeamClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Block { block } => run_block(client, block).await,
        Command::EventWatch {
            address,
            method,
            min_amount,
            tail,
            count,
            format,
        } => {
            let filter =
                ExtrinsicFilter::new(address.as_deref(), method.as_deref(), min_amount, true)?;
            run_event_watch(client, filter, tail, count, format).await
        }
    }
}

async fn run_block(client: &MoonbeamClient, block: Option<u64>) -> anyhow::Result<()> {
    let chain = client.chain();
    let last_block = chain.last_block_number().await?;
    let block = block.unwrap_or(last_block);
    let delta = last_block.saturating_sub(block) as f64 * chain.block_duration();
    let at = chrono::Local::now() - chrono::Duration::milliseconds((delta * 1000.0) as i64);
    let result = json!({
        "block": block,
        "block_current": last_block,
        "delta_seconds": delta as i64,
        "delta_time": humanize_duration(delta),
        "delta_date": at.format("%Y-%m-%d %H:%M:%S").to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_event_watch(
    client: &MoonbeamClient,
    filter: ExtrinsicFilter,
    tail: bool,
    count: u64,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if filter.is_flood_filter() {
        warn!("filter {filter} barely narrows the stream, expect a lot of output");
    }
    let chain = client.chain();
    let mut start_block = chain.last_block_number().await?.saturating_sub(count);
    loop {
        let end_block = chain.last_block_number().await?;
        for block in start_block..end_block {
            // One bad block must not kill a watch session.
            if let Err(e) = watch_block(client, &filter, block, format).await {
                error!("scan of block {block} failed: {e:#}");
            }
        }
        if !tail {
            return Ok(());
        }
        start_block = end_block;
        tokio::time::sleep(Duration::from_secs_f64(chain.block_duration())).await;
    }
}

async fn watch_block(
    client: &MoonbeamClient,
    filter: &ExtrinsicFilter,
    block: u64,
    format: OutputFormat,
) -> anyhow::Result<()> {
    for extrinsic in client.get_extrinsics(Some(block), Some(block), false).await? {
        if !filter.matches(&extrinsic) {
            debug!("{extrinsic} does not match {filter}");
            continue;
        }
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&extrinsic)?),
            OutputFormat::Text => println!("{}", render_text(client, &extrinsic).await?),
        }
    }
    Ok(())
}

/// One-line rendering with amounts in token units and addresses
/// resolved to on-chain identities.
async fn render_text(client: &MoonbeamClient, ex: &Extrinsic) -> Result<String, ClientError> {
    let symbol = client.chain().symbol().await?;
    let mut parts = Vec::with_capacity(ex.params.len());
    for param in &ex.params {
        let value = if param.is_amount() {
            format!("{:.2}{symbol}", param.value.parse::<f64>().unwrap_or(0.0))
        } else if param.is_address() {
            client.chain().get_identity(&param.value).await?.to_string()
        } else {
            param.value.clone()
        };
        parts.push(format!("{}=\"{value}\"", param.name));
    }
    Ok(format!(
        "#{}:{}:{}({})",
        ex.id,
        ex.kind,
        ex.method(),
        parts.join(",")
    ))
}

fn humanize_duration(total_seconds: f64) -> String {
    let mut seconds = total_seconds.round() as u64;
    let days = seconds / 86400;
    seconds %= 86400;
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    seconds %= 60;

    let mut parts = Vec::new();
    for (value, unit) in [
        (days, "day"),
        (hours, "hour"),
        (minutes, "minute"),
        (seconds, "second"),
    ] {
        if value > 0 {
            parts.push(format!(
                "{value} {unit}{}",
                if value == 1 { "" } else { "s" }
            ));
        }
    }
    match parts.len() {
        0 => "0 seconds".to_string(),
        1 => parts.remove(0),
        _ => {
            let last = parts.pop().unwrap_or_default();
            format!("{} and {last}", parts.join(", "))
        }
    }
}
