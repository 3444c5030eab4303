//! Static gateway configuration. Filled from the environment, refined once
//! by the handshake, then read-only for the life of the session.

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::models::Future;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Venue name as accepted by the factory, e.g. `binance`.
    pub exchange: String,
    pub apikey: String,
    pub secret: String,
    /// Passphrase, for venues that require one.
    pub pass: String,
    pub base: String,
    pub quote: String,
    /// Venue-formatted symbol, resolved by the handshake.
    pub symbol: String,
    pub http: String,
    pub ws: String,
    pub fix: String,
    pub web_market: String,
    pub web_orders: String,
    /// Non-empty enables the licensing disclaimer.
    pub unlock: String,
    pub tick_price: f64,
    pub tick_size: f64,
    pub min_size: f64,
    pub min_value: f64,
    pub make_fee: f64,
    pub take_fee: f64,
    /// Book depth cap per side; 0 keeps whatever the venue sends.
    pub max_level: usize,
    pub leverage: f64,
    pub margin: Future,
    pub debug: bool,
    pub admin_agreement: bool,
    /// Root for the handshake cache (`QUOTEBOT_HOME`).
    pub home: PathBuf,
}

impl GatewayConfig {
    pub fn new(exchange: &str, base: &str, quote: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            apikey: String::new(),
            secret: String::new(),
            pass: String::new(),
            base: base.to_string(),
            quote: quote.to_string(),
            symbol: String::new(),
            http: String::new(),
            ws: String::new(),
            fix: String::new(),
            web_market: String::new(),
            web_orders: String::new(),
            unlock: String::new(),
            tick_price: 0.0,
            tick_size: 0.0,
            min_size: 0.0,
            min_value: 0.0,
            make_fee: 0.0,
            take_fee: 0.0,
            max_level: 0,
            leverage: 0.0,
            margin: Future::Spot,
            debug: false,
            admin_agreement: false,
            home: PathBuf::from("."),
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let var = |name: &str| std::env::var(name).unwrap_or_default();
        let exchange = var("QUOTEBOT_EXCHANGE");
        let base = var("QUOTEBOT_BASE");
        let quote = var("QUOTEBOT_QUOTE");
        if exchange.is_empty() || base.is_empty() || quote.is_empty() {
            bail!("QUOTEBOT_EXCHANGE, QUOTEBOT_BASE and QUOTEBOT_QUOTE are required");
        }

        let mut config = Self::new(&exchange, &base.to_uppercase(), &quote.to_uppercase());
        config.apikey = var("QUOTEBOT_APIKEY");
        config.secret = var("QUOTEBOT_SECRET");
        config.pass = var("QUOTEBOT_PASSPHRASE");
        config.unlock = var("QUOTEBOT_UNLOCK");
        config.min_size = var("QUOTEBOT_MIN_SIZE").parse().unwrap_or(0.0);
        config.make_fee = var("QUOTEBOT_MAKE_FEE").parse().unwrap_or(0.0);
        config.take_fee = var("QUOTEBOT_TAKE_FEE").parse().unwrap_or(0.0);
        config.max_level = var("QUOTEBOT_MAX_LEVEL").parse().unwrap_or(0);
        config.leverage = var("QUOTEBOT_LEVERAGE").parse().unwrap_or(0.0);
        config.debug = matches!(var("QUOTEBOT_DEBUG").as_str(), "1" | "true" | "on");
        config.home = std::env::var("QUOTEBOT_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_is_incomplete_until_handshake() {
        let config = GatewayConfig::new("binance", "BTC", "USDT");
        assert_eq!(config.tick_price, 0.0);
        assert_eq!(config.tick_size, 0.0);
        assert!(config.symbol.is_empty());
        assert_eq!(config.margin, Future::Spot);
    }
}
