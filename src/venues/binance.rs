//! Binance spot adapter.
//!
//! Market data rides the combined stream socket as depth snapshots plus raw
//! trade prints; orders are REST with the query-string HMAC scheme.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use super::{
    auth, num, pair_levels, send, tif_str, Outbound, PlaceRequest, Venue, VenueProfile,
};
use crate::gateway::handshake::HandshakeReply;
use crate::gateway::{EventSink, VenueCtx};
use crate::models::{
    Connectivity, Levels, Order, OrderType, Side, Status, Trade, Wallet, Wallets,
};

pub struct Binance;

impl Binance {
    pub fn new() -> Self {
        Self
    }

    fn signed(&self, ctx: &VenueCtx, query: String) -> String {
        format!(
            "{query}&signature={}",
            auth::hmac_sha256_hex(&query, &ctx.cfg.secret)
        )
    }

    /// The tradeFee call needs a signature even though it only reads.
    async fn fees(&self, ctx: &VenueCtx) -> Value {
        let query = format!(
            "symbol={}{}&timestamp={}",
            ctx.cfg.base,
            ctx.cfg.quote,
            ctx.now_ms()
        );
        let url = format!(
            "{}/wapi/v3/tradeFee.html?{}",
            ctx.cfg.http,
            self.signed(ctx, query)
        );
        let reply = match send(ctx.http.get(&url).header("X-MBX-APIKEY", &ctx.cfg.apikey)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(gw = %ctx.cfg.exchange, "Error while reading fees: {e:#}");
                return Value::Null;
            }
        };
        let ok = reply.get("success").and_then(Value::as_bool).unwrap_or(false)
            && reply
                .get("tradeFee")
                .and_then(Value::as_array)
                .map_or(false, |fees| !fees.is_empty());
        if !ok {
            warn!(gw = %ctx.cfg.exchange, "Error while reading fees: {reply}");
            return reply;
        }
        reply["tradeFee"][0].clone()
    }
}

#[async_trait]
impl Venue for Binance {
    fn profile(&self) -> VenueProfile {
        let mut profile = VenueProfile::ws_only(
            "binance",
            "https://api.binance.com",
            "wss://stream.binance.com:9443/ws",
        );
        profile.web_market = "https://www.binance.com/en/trade/".into();
        profile.web_orders = "https://www.binance.com/en/my/orders/exchange/tradeorder".into();
        profile.ask_for_cancel_all = true;
        profile
    }

    async fn handshake(&self, ctx: &VenueCtx) -> Result<HandshakeReply> {
        let cfg = &ctx.cfg;
        let symbol = format!("{}{}", cfg.base, cfg.quote);
        let info = send(ctx.http.get(format!("{}/api/v3/exchangeInfo", cfg.http))).await?;

        let mut market = Value::Null;
        let (mut tick_price, mut tick_size, mut min_size, mut min_value) = (0.0, 0.0, 0.0, 0.0);
        if let Some(symbols) = info.get("symbols").and_then(Value::as_array) {
            for it in symbols {
                if it.get("symbol").and_then(Value::as_str) != Some(symbol.as_str()) {
                    continue;
                }
                if let Some(filters) = it.get("filters").and_then(Value::as_array) {
                    for filter in filters {
                        match filter.get("filterType").and_then(Value::as_str) {
                            Some("PRICE_FILTER") => tick_price = num(&filter["tickSize"]),
                            Some("MIN_NOTIONAL") => min_value = num(&filter["minNotional"]),
                            Some("LOT_SIZE") => {
                                tick_size = num(&filter["stepSize"]);
                                min_size = num(&filter["minQty"]);
                            }
                            _ => {}
                        }
                    }
                }
                market = it.clone();
                break;
            }
        }
        let fees = self.fees(ctx).await;

        Ok(HandshakeReply {
            base: cfg.base.clone(),
            quote: cfg.quote.clone(),
            symbol,
            web_market: format!(
                "{}{}_{}?layout=pro",
                cfg.web_market, cfg.base, cfg.quote
            ),
            web_orders: cfg.web_orders.clone(),
            tick_price,
            tick_size,
            min_size,
            min_value,
            make_fee: num(&fees["maker"]),
            take_fee: num(&fees["taker"]),
            margin: None,
            reply: json!([market, fees]),
        })
    }

    fn subscribe(&self, ctx: &VenueCtx) -> Vec<Outbound> {
        let stream = ctx.cfg.symbol.to_lowercase();
        vec![Outbound::Public(
            json!({
                "method": "SUBSCRIBE",
                "params": [format!("{stream}@depth20@100ms"), format!("{stream}@trade")],
                "id": 1,
            })
            .to_string(),
        )]
    }

    fn consume(&self, msg: &Value, ctx: &VenueCtx, sink: &EventSink) -> Vec<Outbound> {
        if msg.get("id").is_some() && msg.get("result").map_or(false, Value::is_null) {
            // Subscription ack.
            sink.online(Connectivity::Connected);
        } else if msg.get("lastUpdateId").is_some() {
            sink.levels(Levels {
                bids: pair_levels(msg.get("bids")),
                asks: pair_levels(msg.get("asks")),
            });
        } else if msg.get("e").and_then(Value::as_str) == Some("trade") {
            sink.trade(Trade {
                side: if msg["m"].as_bool().unwrap_or(false) {
                    Side::Bid
                } else {
                    Side::Ask
                },
                price: num(&msg["p"]),
                quantity: num(&msg["q"]),
                time: msg["T"].as_i64().unwrap_or_else(|| ctx.now_ms()),
            });
        }
        Vec::new()
    }

    async fn place(
        &self,
        req: &PlaceRequest,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let cfg = &ctx.cfg;
        let side = match req.side {
            Side::Bid => "BUY",
            Side::Ask => "SELL",
        };
        let mut query = format!(
            "symbol={}&side={side}&newClientOrderId={}&quantity={}",
            cfg.symbol, req.order_id, req.quantity
        );
        match req.order_type {
            OrderType::Limit => query.push_str(&format!(
                "&type=LIMIT&price={}&timeInForce={}",
                req.price,
                tif_str(req.time_in_force)
            )),
            OrderType::Market => query.push_str("&type=MARKET"),
        }
        query.push_str(&format!("&timestamp={}", ctx.now_ms()));

        let url = format!("{}/api/v3/order?{}", cfg.http, self.signed(ctx, query));
        let ack = send(ctx.http.post(&url).header("X-MBX-APIKEY", &cfg.apikey)).await?;
        sink.order(Order {
            order_id: req.order_id.clone(),
            exchange_id: ack["orderId"]
                .as_i64()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            side: req.side,
            status: Status::Working,
            time: ack["transactTime"].as_i64().unwrap_or_else(|| ctx.now_ms()),
            ..Order::default()
        });
        Ok(Vec::new())
    }

    async fn cancel(
        &self,
        order_id: &str,
        exchange_id: &str,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let cfg = &ctx.cfg;
        let query = format!(
            "symbol={}&origClientOrderId={}&timestamp={}",
            cfg.symbol,
            order_id,
            ctx.now_ms()
        );
        let url = format!("{}/api/v3/order?{}", cfg.http, self.signed(ctx, query));
        send(ctx.http.delete(&url).header("X-MBX-APIKEY", &cfg.apikey)).await?;
        sink.order(Order {
            order_id: order_id.to_string(),
            exchange_id: exchange_id.to_string(),
            status: Status::Terminated,
            time: ctx.now_ms(),
            ..Order::default()
        });
        Ok(Vec::new())
    }

    async fn sync_wallet(&self, ctx: &VenueCtx) -> Result<Vec<Wallets>> {
        let cfg = &ctx.cfg;
        let query = format!("timestamp={}", ctx.now_ms());
        let url = format!("{}/api/v3/account?{}", cfg.http, self.signed(ctx, query));
        let reply = send(ctx.http.get(&url).header("X-MBX-APIKEY", &cfg.apikey)).await?;

        let mut wallets = Wallets::default();
        if let Some(balances) = reply.get("balances").and_then(Value::as_array) {
            for balance in balances {
                let asset = balance["asset"].as_str().unwrap_or("");
                let wallet = if asset == cfg.base {
                    &mut wallets.base
                } else if asset == cfg.quote {
                    &mut wallets.quote
                } else {
                    continue;
                };
                wallet.currency = asset.to_string();
                Wallet::reset(num(&balance["free"]), num(&balance["locked"]), wallet);
            }
        }
        Ok(vec![wallets])
    }

    async fn sync_cancel_all(&self, ctx: &VenueCtx) -> Result<Vec<Order>> {
        let cfg = &ctx.cfg;
        let query = format!("symbol={}&timestamp={}", cfg.symbol, ctx.now_ms());
        let url = format!("{}/api/v3/openOrders?{}", cfg.http, self.signed(ctx, query));
        let reply = send(ctx.http.delete(&url).header("X-MBX-APIKEY", &cfg.apikey)).await?;

        let now = ctx.now_ms();
        Ok(reply
            .as_array()
            .map(|orders| {
                orders
                    .iter()
                    .map(|order| Order {
                        order_id: order["clientOrderId"].as_str().unwrap_or("").to_string(),
                        exchange_id: order["orderId"]
                            .as_i64()
                            .map(|id| id.to_string())
                            .unwrap_or_default(),
                        status: Status::Terminated,
                        time: now,
                        ..Order::default()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::testutil::{ctx_for, sink_pair};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn signed_query_appends_hmac() {
        let binance = Binance::new();
        let ctx = ctx_for("binance", "BTCUSDT");
        let signed = binance.signed(&ctx, "symbol=BTCUSDT&timestamp=1000".to_string());
        assert!(signed.starts_with("symbol=BTCUSDT&timestamp=1000&signature="));
        // HMAC-SHA256 as lowercase hex.
        let signature = signed.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn subscribe_targets_both_streams() {
        let ctx = ctx_for("binance", "BTCUSDT");
        let frames = Binance::new().subscribe(&ctx);
        assert_eq!(frames.len(), 1);
        let Outbound::Public(frame) = &frames[0] else {
            panic!("public frame expected");
        };
        assert!(frame.contains("btcusdt@depth20@100ms"));
        assert!(frame.contains("btcusdt@trade"));
    }

    #[test]
    fn depth_snapshot_becomes_levels() {
        let ctx = ctx_for("binance", "BTCUSDT");
        let (events, sink) = sink_pair();
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        events.levels.write(move |l: &Levels| *captured.lock() = Some(l.clone()));

        let msg = serde_json::json!({
            "lastUpdateId": 160,
            "bids": [["0.0024", "10"], ["0.0022", "5"]],
            "asks": [["0.0026", "100"]],
        });
        Binance::new().consume(&msg, &ctx, &sink);
        events.drain();

        let levels = seen.lock().clone().unwrap();
        assert_eq!(levels.bids.len(), 2);
        assert_eq!(levels.bids[0].price, 0.0024);
        assert_eq!(levels.asks[0].size, 100.0);
    }

    #[test]
    fn trade_print_keeps_maker_side() {
        let ctx = ctx_for("binance", "BTCUSDT");
        let (events, sink) = sink_pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        events.trades.write(move |t: &Trade| captured.lock().push(*t));

        let msg = serde_json::json!({
            "e": "trade", "p": "42000.5", "q": "0.25", "m": true, "T": 1_700_000_000_000i64,
        });
        Binance::new().consume(&msg, &ctx, &sink);
        events.drain();

        let trades = seen.lock();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Bid);
        assert_eq!(trades[0].price, 42000.5);
        assert_eq!(trades[0].time, 1_700_000_000_000);
    }
}
