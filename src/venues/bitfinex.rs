//! Bitfinex adapter, doubling as Ethfinex which fronts the same engine.
//!
//! Channel-number frames: a subscription ack maps the channel id to its
//! name, then every array frame is routed by that map. Book rows carry a
//! count; a count of zero deletes the price.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{auth, num, send, url_path, Outbound, PlaceRequest, RandId, Venue, VenueProfile};
use crate::gateway::handshake::HandshakeReply;
use crate::gateway::{EventSink, VenueCtx};
use crate::models::{Connectivity, Level, Levels, Order, Side, Status, Trade, Wallet, Wallets};

pub struct Bitfinex {
    exchange: &'static str,
    http: &'static str,
    ws: &'static str,
    web_market: &'static str,
    web_orders: &'static str,
    channels: Mutex<HashMap<i64, String>>,
    levels: Mutex<Levels>,
}

impl Bitfinex {
    pub fn new() -> Self {
        Self {
            exchange: "bitfinex",
            http: "https://api.bitfinex.com/v2",
            ws: "wss://api.bitfinex.com/ws/2",
            web_market: "https://www.bitfinex.com/trading/",
            web_orders: "https://www.bitfinex.com/reports/orders",
            channels: Mutex::new(HashMap::new()),
            levels: Mutex::new(Levels::default()),
        }
    }

    pub fn ethfinex() -> Self {
        Self {
            exchange: "ethfinex",
            http: "https://api.ethfinex.com/v1",
            ws: "wss://api.ethfinex.com/ws/2",
            web_market: "https://www.ethfinex.com/trading/",
            web_orders: "https://www.ethfinex.com/reports/orders",
            channels: Mutex::new(HashMap::new()),
            levels: Mutex::new(Levels::default()),
        }
    }

    async fn authed(&self, ctx: &VenueCtx, endpoint: &str, body: Value) -> Result<Value> {
        let nonce = (ctx.now_ms() * 1000).to_string();
        let body_text = body.to_string();
        let payload = format!(
            "/api{}{nonce}{body_text}",
            url_path(&ctx.cfg.http, endpoint)
        );
        send(
            ctx.http
                .post(format!("{}{endpoint}", ctx.cfg.http))
                .header("Content-Type", "application/json")
                .header("bfx-apikey", &ctx.cfg.apikey)
                .header("bfx-nonce", nonce)
                .header("bfx-signature", auth::hmac_sha384_hex(&payload, &ctx.cfg.secret))
                .body(body_text),
        )
        .await
    }

    /// Apply one `[price, count, amount]` row to the resident book.
    fn book_row(&self, levels: &mut Levels, row: &[Value]) {
        let price = row.first().map(num).unwrap_or(0.0);
        let count = row.get(1).map(num).unwrap_or(0.0);
        let amount = row.get(2).map(num).unwrap_or(0.0);
        let side = if amount >= 0.0 { Side::Bid } else { Side::Ask };
        let rows = match side {
            Side::Bid => &mut levels.bids,
            Side::Ask => &mut levels.asks,
        };
        if count == 0.0 {
            rows.retain(|level| level.price != price);
            return;
        }
        let size = amount.abs();
        match rows.iter_mut().find(|level| level.price == price) {
            Some(level) => level.size = size,
            None => {
                rows.push(Level::new(price, size));
                super::book::sort(levels);
            }
        }
    }
}

#[async_trait]
impl Venue for Bitfinex {
    fn profile(&self) -> VenueProfile {
        let mut profile = VenueProfile::ws_only(self.exchange, self.http, self.ws);
        profile.web_market = self.web_market.into();
        profile.web_orders = self.web_orders.into();
        profile.rand_id = RandId::Int45;
        profile.ask_for_replace = true;
        profile.ask_for_cancel_all = true;
        profile
    }

    async fn handshake(&self, ctx: &VenueCtx) -> Result<HandshakeReply> {
        let cfg = &ctx.cfg;
        let pair = format!("{}{}", cfg.base, cfg.quote);
        let ticker = send(ctx.http.get(format!("{}/ticker/t{pair}", cfg.http))).await?;

        // Price tick follows the magnitude of the last trade: Bitfinex quotes
        // five significant digits, floored at 1e-4 of a 1e-4.
        let mut tick_price = 0.0;
        if let Some(last) = ticker.as_array().and_then(|t| t.get(6)).and_then(Value::as_f64) {
            if last > 0.0 {
                let magnitude = (last.log10().trunc() as i32).max(-4);
                tick_price = 10f64.powi(magnitude - 4);
            }
        }

        let conf = send(ctx.http.get(format!("{}/conf/pub:info:pair", cfg.http))).await?;
        let mut min_size = 0.0;
        let mut pair_info = Value::Null;
        for it in conf
            .as_array()
            .and_then(|outer| outer.first())
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let row = it.as_array();
            if row.and_then(|r| r.first()).and_then(Value::as_str) == Some(pair.as_str()) {
                if let Some(raw) = row
                    .and_then(|r| r.get(1))
                    .and_then(Value::as_array)
                    .and_then(|detail| detail.get(3))
                {
                    min_size = num(raw);
                }
                pair_info = it.clone();
                break;
            }
        }

        Ok(HandshakeReply {
            base: cfg.base.clone(),
            quote: cfg.quote.clone(),
            symbol: pair.clone(),
            web_market: format!("{}{pair}", cfg.web_market),
            web_orders: cfg.web_orders.clone(),
            tick_price,
            tick_size: 1e-8,
            min_size,
            reply: json!([ticker, pair_info]),
            ..HandshakeReply::default()
        })
    }

    fn subscribe(&self, ctx: &VenueCtx) -> Vec<Outbound> {
        let symbol = format!("t{}", ctx.cfg.symbol);
        vec![
            Outbound::Public(
                json!({"event": "subscribe", "channel": "book", "symbol": symbol, "prec": "P0", "freq": "F0", "len": "25"})
                    .to_string(),
            ),
            Outbound::Public(
                json!({"event": "subscribe", "channel": "trades", "symbol": symbol}).to_string(),
            ),
        ]
    }

    fn consume(&self, msg: &Value, ctx: &VenueCtx, sink: &EventSink) -> Vec<Outbound> {
        if msg.get("event").and_then(Value::as_str) == Some("subscribed") {
            if let (Some(id), Some(channel)) = (
                msg["chanId"].as_i64(),
                msg["channel"].as_str(),
            ) {
                self.channels.lock().insert(id, channel.to_string());
                if channel == "book" {
                    sink.online(Connectivity::Connected);
                }
            }
            return Vec::new();
        }

        let Some(frame) = msg.as_array() else {
            return Vec::new();
        };
        let Some(channel) = frame
            .first()
            .and_then(Value::as_i64)
            .and_then(|id| self.channels.lock().get(&id).cloned())
        else {
            return Vec::new();
        };
        // Heartbeats keep the channel map warm, nothing else.
        if frame.get(1).and_then(Value::as_str) == Some("hb") {
            return Vec::new();
        }

        match channel.as_str() {
            "book" => {
                let Some(payload) = frame.get(1).and_then(Value::as_array) else {
                    return Vec::new();
                };
                let mut levels = self.levels.lock();
                if payload.first().map_or(false, Value::is_array) {
                    // Snapshot: replace the resident book wholesale.
                    *levels = Levels::default();
                    for row in payload {
                        if let Some(row) = row.as_array() {
                            self.book_row(&mut levels, row);
                        }
                    }
                } else {
                    self.book_row(&mut levels, payload);
                }
                sink.levels(levels.clone());
            }
            "trades" => {
                if frame.get(1).and_then(Value::as_str) == Some("te") {
                    if let Some(print) = frame.get(2).and_then(Value::as_array) {
                        let amount = print.get(2).map(num).unwrap_or(0.0);
                        sink.trade(Trade {
                            side: if amount >= 0.0 { Side::Bid } else { Side::Ask },
                            price: print.get(3).map(num).unwrap_or(0.0),
                            quantity: amount.abs(),
                            time: print
                                .get(1)
                                .and_then(Value::as_i64)
                                .unwrap_or_else(|| ctx.now_ms()),
                        });
                    }
                }
            }
            _ => {}
        }
        Vec::new()
    }

    async fn place(
        &self,
        req: &PlaceRequest,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let amount = match req.side {
            Side::Bid => req.quantity.clone(),
            Side::Ask => format!("-{}", req.quantity),
        };
        let body = json!({
            "type": "EXCHANGE LIMIT",
            "symbol": format!("t{}", ctx.cfg.symbol),
            "price": req.price,
            "amount": amount,
            "cid": req.order_id.parse::<i64>().unwrap_or(0),
        });
        let ack = self.authed(ctx, "/auth/w/order/submit", body).await?;
        let exchange_id = ack
            .as_array()
            .and_then(|n| n.get(4))
            .and_then(Value::as_array)
            .and_then(|orders| orders.first())
            .and_then(Value::as_array)
            .and_then(|order| order.first())
            .and_then(Value::as_i64)
            .map(|id| id.to_string())
            .unwrap_or_default();
        sink.order(Order {
            order_id: req.order_id.clone(),
            exchange_id,
            side: req.side,
            status: Status::Working,
            time: ctx.now_ms(),
            ..Order::default()
        });
        Ok(Vec::new())
    }

    async fn replace(
        &self,
        exchange_id: &str,
        price: &str,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let body = json!({"id": exchange_id.parse::<i64>().unwrap_or(0), "price": price});
        self.authed(ctx, "/auth/w/order/update", body).await?;
        sink.order(Order {
            exchange_id: exchange_id.to_string(),
            price: price.parse().unwrap_or(0.0),
            status: Status::Working,
            time: ctx.now_ms(),
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
        let body = json!({"id": exchange_id.parse::<i64>().unwrap_or(0)});
        self.authed(ctx, "/auth/w/order/cancel", body).await?;
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
        let reply = self.authed(ctx, "/auth/r/wallets", json!({})).await?;
        let mut wallets = Wallets::default();
        for row in reply.as_array().into_iter().flatten() {
            let Some(row) = row.as_array() else { continue };
            if row.first().and_then(Value::as_str) != Some("exchange") {
                continue;
            }
            let currency = row.get(1).and_then(Value::as_str).unwrap_or("");
            let wallet = if currency == ctx.cfg.base {
                &mut wallets.base
            } else if currency == ctx.cfg.quote {
                &mut wallets.quote
            } else {
                continue;
            };
            let balance = row.get(2).map(num).unwrap_or(0.0);
            let available = row.get(4).map(num).unwrap_or(balance);
            wallet.currency = currency.to_string();
            Wallet::reset(available, (balance - available).max(0.0), wallet);
        }
        Ok(vec![wallets])
    }

    async fn sync_cancel_all(&self, ctx: &VenueCtx) -> Result<Vec<Order>> {
        self.authed(ctx, "/auth/w/order/cancel/multi", json!({"all": 1}))
            .await?;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::testutil::{ctx_for, sink_pair};
    use std::sync::Arc;

    fn subscribed(bitfinex: &Bitfinex, ctx: &VenueCtx, sink: &EventSink, id: i64, channel: &str) {
        bitfinex.consume(
            &json!({"event": "subscribed", "channel": channel, "chanId": id}),
            ctx,
            sink,
        );
    }

    #[test]
    fn channel_map_routes_frames() {
        let ctx = ctx_for("bitfinex", "BTCUSD");
        let (events, sink) = sink_pair();
        let trades = Arc::new(Mutex::new(Vec::new()));
        let captured = trades.clone();
        events.trades.write(move |t: &Trade| captured.lock().push(*t));

        let bitfinex = Bitfinex::new();
        subscribed(&bitfinex, &ctx, &sink, 17, "trades");
        bitfinex.consume(&json!([17, "te", [1, 1_700_000_000_000i64, -0.5, 9400.0]]), &ctx, &sink);
        // Unknown channel ids are dropped.
        bitfinex.consume(&json!([99, "te", [2, 0, 1.0, 1.0]]), &ctx, &sink);
        events.drain();

        let trades = trades.lock();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Ask);
        assert_eq!(trades[0].quantity, 0.5);
    }

    #[test]
    fn count_zero_removes_the_price() {
        let ctx = ctx_for("bitfinex", "BTCUSD");
        let (events, sink) = sink_pair();
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        events.levels.write(move |l: &Levels| *captured.lock() = Some(l.clone()));

        let bitfinex = Bitfinex::new();
        subscribed(&bitfinex, &ctx, &sink, 5, "book");
        bitfinex.consume(
            &json!([5, [[9400.0, 2, 1.5], [9401.0, 1, -2.0]]]),
            &ctx,
            &sink,
        );
        bitfinex.consume(&json!([5, [9400.0, 0, 1]]), &ctx, &sink);
        events.drain();

        let levels = seen.lock().clone().unwrap();
        assert!(levels.bids.is_empty());
        assert_eq!(levels.asks[0].price, 9401.0);
        assert_eq!(levels.asks[0].size, 2.0);
    }

    #[test]
    fn heartbeats_are_ignored() {
        let ctx = ctx_for("bitfinex", "BTCUSD");
        let (events, sink) = sink_pair();
        let seen = Arc::new(Mutex::new(0u32));
        let captured = seen.clone();
        events.levels.write(move |_: &Levels| *captured.lock() += 1);

        let bitfinex = Bitfinex::new();
        subscribed(&bitfinex, &ctx, &sink, 5, "book");
        events.drain();
        *seen.lock() = 0;
        bitfinex.consume(&json!([5, "hb"]), &ctx, &sink);
        events.drain();
        assert_eq!(*seen.lock(), 0);
    }
}
