//! Venue registry: a configured name becomes a fully wired gateway.

use std::sync::Arc;

use super::{Gateway, GatewayConfig};
use crate::venues::binance::Binance;
use crate::venues::bitfinex::Bitfinex;
use crate::venues::bitmex::Bitmex;
use crate::venues::coinbase::Coinbase;
use crate::venues::hitbtc::HitBtc;
use crate::venues::kraken::Kraken;
use crate::venues::kucoin::KuCoin;
use crate::venues::poloniex::Poloniex;
use crate::venues::Venue;

/// Every venue name the factory accepts.
pub const VENUES: &[&str] = &[
    "binance", "bitmex", "coinbase", "hitbtc", "bequant", "bitfinex", "ethfinex", "kucoin",
    "kraken", "poloniex",
];

/// Build the gateway for a venue name, or None when the name is unknown.
pub fn new_gateway(cfg: GatewayConfig) -> Option<Gateway> {
    let venue: Arc<dyn Venue> = match cfg.exchange.to_lowercase().as_str() {
        "binance" => Arc::new(Binance::new()),
        "bitmex" => Arc::new(Bitmex::new()),
        "coinbase" => Arc::new(Coinbase::new()),
        "hitbtc" => Arc::new(HitBtc::new()),
        "bequant" => Arc::new(HitBtc::bequant()),
        "bitfinex" => Arc::new(Bitfinex::new()),
        "ethfinex" => Arc::new(Bitfinex::ethfinex()),
        "kucoin" => Arc::new(KuCoin::new()),
        "kraken" => Arc::new(Kraken::new()),
        "poloniex" => Arc::new(Poloniex::new()),
        _ => return None,
    };
    Some(Gateway::new(cfg, venue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_venue_constructs() {
        for name in VENUES {
            let cfg = GatewayConfig::new(name, "BTC", "USD");
            let gateway = new_gateway(cfg);
            assert!(gateway.is_some(), "venue {name}");
            let gateway = gateway.unwrap();
            assert!(!gateway.cfg.ws.is_empty(), "venue {name} has a socket url");
        }
    }

    #[test]
    fn unknown_names_are_refused() {
        assert!(new_gateway(GatewayConfig::new("mtgox", "BTC", "USD")).is_none());
    }

    #[test]
    fn sibling_venues_share_the_engine_but_not_endpoints() {
        let hitbtc = new_gateway(GatewayConfig::new("hitbtc", "BTC", "USD")).unwrap();
        let bequant = new_gateway(GatewayConfig::new("bequant", "BTC", "USD")).unwrap();
        assert_ne!(hitbtc.cfg.http, bequant.cfg.http);

        let bitfinex = new_gateway(GatewayConfig::new("bitfinex", "BTC", "USD")).unwrap();
        let ethfinex = new_gateway(GatewayConfig::new("ethfinex", "BTC", "USD")).unwrap();
        assert_ne!(bitfinex.cfg.ws, ethfinex.cfg.ws);
    }
}
