//! Gateway probe: attach one venue, print every normalised event.
//!
//! Smoke tool for the gateway layer; credentials and pair come from the
//! environment, flags mirror the bot's own switches.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quotebot_gateway::{new_gateway, Command, GatewayConfig, VENUES};

#[derive(Parser, Debug)]
#[command(name = "gateway-probe", about = "Attach a venue and stream its events")]
struct Args {
    /// Venue name; see --list
    #[arg(long)]
    exchange: Option<String>,
    #[arg(long)]
    base: Option<String>,
    #[arg(long)]
    quote: Option<String>,
    /// Skip the handshake cache
    #[arg(long)]
    nocache: bool,
    /// Leave open orders alone on shutdown
    #[arg(long)]
    dustybot: bool,
    /// Run the connectivity latency check before streaming
    #[arg(long)]
    latency: bool,
    /// Print the accepted venue names and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.list {
        for venue in VENUES {
            println!("{venue}");
        }
        return Ok(());
    }

    if let Some(exchange) = &args.exchange {
        std::env::set_var("QUOTEBOT_EXCHANGE", exchange);
    }
    if let Some(base) = &args.base {
        std::env::set_var("QUOTEBOT_BASE", base);
    }
    if let Some(quote) = &args.quote {
        std::env::set_var("QUOTEBOT_QUOTE", quote);
    }
    let cfg = GatewayConfig::from_env()?;
    let exchange = cfg.exchange.clone();

    let mut gateway =
        new_gateway(cfg).with_context(|| format!("unknown venue {exchange}, try --list"))?;
    gateway
        .handshake(args.nocache)
        .await
        .context("handshake failed, refusing to start")?;
    gateway.report(
        vec![("pair".to_string(), format!("{}/{}", gateway.cfg.base, gateway.cfg.quote))],
        args.nocache,
    );
    gateway.disclaimer();

    if args.latency {
        let http = gateway.cfg.http.clone();
        gateway
            .latency("HTTP read/write handshake", || async move {
                let _ = reqwest::get(&http).await;
            })
            .await;
    }

    let tag = exchange.clone();
    gateway.on_connectivity(move |c| info!(gw = %tag, "connectivity: {c:?}"));
    let tag = exchange.clone();
    gateway.on_levels(move |levels| {
        info!(
            gw = %tag,
            bids = levels.bids.len(),
            asks = levels.asks.len(),
            best_bid = levels.bids.first().map(|l| l.price).unwrap_or(0.0),
            best_ask = levels.asks.first().map(|l| l.price).unwrap_or(0.0),
            "levels"
        );
    });
    let tag = exchange.clone();
    gateway.on_trade(move |trade| {
        info!(gw = %tag, side = ?trade.side, price = trade.price, quantity = trade.quantity, "trade");
    });
    let tag = exchange.clone();
    gateway.on_wallets(move |wallets| {
        info!(
            gw = %tag,
            base_total = wallets.base.total,
            quote_total = wallets.quote.total,
            "wallets"
        );
    });
    let tag = exchange.clone();
    gateway.on_order(move |order| {
        info!(
            gw = %tag,
            order_id = %order.order_id,
            exchange_id = %order.exchange_id,
            status = ?order.status,
            latency = order.latency,
            "order"
        );
    });

    let (commands, rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(gateway.run(rx));

    tokio::signal::ctrl_c().await?;
    info!(gw = %exchange, "shutting down");
    let _ = commands.send(Command::Purge(args.dustybot));
    let _ = commands.send(Command::End);
    driver.await?;
    Ok(())
}
