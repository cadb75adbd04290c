//! # Router CLI
//!
//! Read-only inspection of a configured router against an RPC node: registered
//! venues, expanded routes and quotes.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin router_cli -- venues
//! cargo run --bin router_cli -- route --from 0x.. --to 0x..
//! cargo run --bin router_cli -- quote --token-in 0x.. --token-out 0x.. --amount 1000000 --venue uniswap_v3
//! cargo run --bin router_cli -- quote-path --path 0x..,0x..,0x.. --amount 1000000
//! cargo run --bin router_cli -- --json route --from 0x.. --to 0x..
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ethers::types::Address;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vault_router_sdk::{
    chain::{rpc::EthersChain, Erc20Api},
    logging,
    settings::Settings,
    utils::{format_units, parse_amount},
    SwapRouter, VenueId,
};

#[derive(Parser)]
#[command(name = "router_cli")]
#[command(about = "Inspect vault router venues, routes and quotes")]
struct Cli {
    /// Config file (defaults to ./Config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered venues and their endpoints
    Venues,

    /// Show the leaf hops a routed swap would execute
    Route {
        #[arg(long, value_parser = parse_address)]
        from: Address,
        #[arg(long, value_parser = parse_address)]
        to: Address,
    },

    /// Quote a single conversion
    Quote {
        #[arg(long, value_parser = parse_address)]
        token_in: Address,
        #[arg(long, value_parser = parse_address)]
        token_out: Address,
        /// Raw amount (decimal or 0x hex)
        #[arg(long)]
        amount: String,
        /// Venue name or index; the default venue when omitted
        #[arg(long, value_parser = parse_venue)]
        venue: Option<VenueId>,
    },

    /// Quote along an explicit token path
    #[command(name = "quote-path")]
    QuotePath {
        /// Comma-separated token addresses
        #[arg(long, value_delimiter = ',', value_parser = parse_address)]
        path: Vec<Address>,
        #[arg(long)]
        amount: String,
        #[arg(long, value_parser = parse_venue)]
        venue: Option<VenueId>,
    },
}

fn parse_address(raw: &str) -> Result<Address, String> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| format!("invalid address {}: {}", raw, e))
}

fn parse_venue(raw: &str) -> Result<VenueId, String> {
    raw.parse::<VenueId>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::new(),
    }
    .context("failed to load settings")?;
    logging::init(&settings.log)?;
    logging::init_metrics(&settings.log)?;

    let account = settings.rpc.account.unwrap_or(settings.router.operator);
    let chain = Arc::new(EthersChain::new(
        &settings.rpc.url,
        account,
        Duration::from_millis(settings.rpc.timeout_ms),
    )?);
    let router = settings.build_router(Arc::clone(&chain))?;

    match cli.command {
        Commands::Venues if cli.json => {
            let venues: Vec<_> = router
                .registry()
                .venues()
                .into_iter()
                .map(|(venue, endpoints)| json!({ "venue": venue, "index": venue.index(), "endpoints": endpoints }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&venues)?);
        }
        Commands::Venues => {
            let default_venue = router.registry().default_venue()?;
            for (venue, endpoints) in router.registry().venues() {
                let marker = if venue == default_venue { " (default)".green().to_string() } else { String::new() };
                println!("{} [{}]{}", venue.to_string().bold(), venue.index(), marker);
                println!("  execution:        {:?}", endpoints.execution);
                if let Some(factory) = endpoints.factory {
                    println!("  factory:          {:?}", factory);
                }
                if let Some(query) = endpoints.query {
                    println!("  query:            {:?}", query);
                }
                if let Some(preview) = endpoints.preview {
                    println!("  preview:          {:?}", preview);
                }
                if let Some(position_manager) = endpoints.position_manager {
                    println!("  position manager: {:?}", position_manager);
                }
            }
        }
        Commands::Route { from, to } => {
            let hops = router.expand_route(from, to)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&hops)?);
                return Ok(());
            }
            println!("{} {:?} -> {:?} ({} hops)", "Route".bold(), from, to, hops.len());
            for (i, hop) in hops.iter().enumerate() {
                let pool = hop
                    .pinned_pool
                    .map(|pool| format!(" pool {:?}", pool))
                    .unwrap_or_default();
                println!("  {}. {:?} -> {:?} on {}{}", i + 1, hop.token_in, hop.token_out, hop.venue.to_string().cyan(), pool);
            }
        }
        Commands::Quote {
            token_in,
            token_out,
            amount,
            venue,
        } => {
            let amount_in = parse_amount(&amount)?;
            let amount_out = match venue {
                Some(venue) => router.get_quote(token_in, token_out, amount_in, venue).await?,
                None => router.get_quote_with_default_venue(token_in, token_out, amount_in).await?,
            };
            print_quote(&router, token_out, amount_out, cli.json).await?;
        }
        Commands::QuotePath { path, amount, venue } => {
            let amount_in = parse_amount(&amount)?;
            let token_out = *path.last().ok_or_else(|| anyhow!("empty path"))?;
            let amount_out = match venue {
                Some(venue) => router.get_quote_with_path(&path, amount_in, venue).await?,
                None => router.get_quote_with_path_with_default_venue(&path, amount_in).await?,
            };
            print_quote(&router, token_out, amount_out, cli.json).await?;
        }
    }
    Ok(())
}

async fn print_quote(router: &SwapRouter<EthersChain>, token_out: Address, amount_out: ethers::types::U256, as_json: bool) -> Result<()> {
    let decimals = router.chain().decimals(token_out).await?;
    if as_json {
        let quote = json!({
            "token_out": token_out,
            "amount_out": amount_out.to_string(),
            "formatted": format_units(amount_out, decimals),
        });
        println!("{}", serde_json::to_string_pretty(&quote)?);
        return Ok(());
    }
    println!(
        "{} {} ({} raw) of {:?}",
        "Quote:".bold(),
        format_units(amount_out, decimals).green(),
        amount_out,
        token_out
    );
    Ok(())
}
