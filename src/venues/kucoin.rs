//! KuCoin adapter.
//!
//! Version-2 key auth: the signature and the passphrase are both
//! HMAC-SHA256-then-base64. Level2 pushes per-price changes with a
//! sequence column; a zero size deletes the row.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

use super::{auth, book, num, send, tif_str, Outbound, PlaceRequest, Venue, VenueProfile};
use crate::gateway::handshake::HandshakeReply;
use crate::gateway::{EventSink, VenueCtx};
use crate::models::{Connectivity, Levels, Order, OrderType, Side, Status, Trade, Wallet, Wallets};

pub struct KuCoin {
    levels: Mutex<Levels>,
}

impl KuCoin {
    pub fn new() -> Self {
        Self {
            levels: Mutex::new(Levels::default()),
        }
    }

    fn auth_headers(
        &self,
        ctx: &VenueCtx,
        method: &str,
        path: &str,
        body: &str,
    ) -> [(&'static str, String); 5] {
        let timestamp = ctx.now_ms().to_string();
        let payload = format!("{timestamp}{method}{path}{body}");
        [
            ("KC-API-KEY", ctx.cfg.apikey.clone()),
            ("KC-API-SIGN", auth::hmac_sha256_b64(&payload, &ctx.cfg.secret)),
            (
                "KC-API-PASSPHRASE",
                auth::hmac_sha256_b64(&ctx.cfg.pass, &ctx.cfg.secret),
            ),
            ("KC-API-TIMESTAMP", timestamp),
            ("KC-API-KEY-VERSION", "2".to_string()),
        ]
    }

    async fn request(
        &self,
        ctx: &VenueCtx,
        method: &str,
        path: &str,
        body: Value,
    ) -> Result<Value> {
        let body_text = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        let url = format!("{}{path}", ctx.cfg.http);
        let mut builder = match method {
            "POST" => ctx.http.post(&url),
            "DELETE" => ctx.http.delete(&url),
            _ => ctx.http.get(&url),
        };
        for (name, value) in self.auth_headers(ctx, method, path, &body_text) {
            builder = builder.header(name, value);
        }
        if !body_text.is_empty() {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body_text);
        }
        send(builder).await
    }

    async fn fees(&self, ctx: &VenueCtx) -> Value {
        let reply = match self.request(ctx, "GET", "/api/v1/base-fee", Value::Null).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(gw = %ctx.cfg.exchange, "Error while reading fees: {e:#}");
                return Value::Null;
            }
        };
        if reply["code"].as_str() != Some("200000") || !reply["data"].is_object() {
            warn!(gw = %ctx.cfg.exchange, "Error while reading fees: {reply}");
            return reply;
        }
        reply["data"].clone()
    }

    fn apply_changes(&self, levels: &mut Levels, changes: &Value, side: Side) {
        let key = match side {
            Side::Bid => "bids",
            Side::Ask => "asks",
        };
        for row in changes[key].as_array().into_iter().flatten() {
            let Some(row) = row.as_array() else { continue };
            let price = row.first().map(num).unwrap_or(0.0);
            let size = row.get(1).map(num).unwrap_or(0.0);
            if price > 0.0 {
                book::apply(levels, side, price, size);
            }
        }
    }
}

#[async_trait]
impl Venue for KuCoin {
    fn profile(&self) -> VenueProfile {
        let mut profile = VenueProfile::ws_only(
            "kucoin",
            "https://api.kucoin.com",
            "wss://push-private.kucoin.com/endpoint",
        );
        profile.web_market = "https://trade.kucoin.com/".into();
        profile.web_orders = "https://www.kucoin.com/order/trade".into();
        profile.ask_for_cancel_all = true;
        profile
    }

    async fn handshake(&self, ctx: &VenueCtx) -> Result<HandshakeReply> {
        let cfg = &ctx.cfg;
        let symbol = format!("{}-{}", cfg.base, cfg.quote);
        let listed = send(ctx.http.get(format!("{}/api/v1/symbols", cfg.http))).await?;

        let mut market = Value::Null;
        if let Some(rows) = listed.get("data").and_then(Value::as_array) {
            for it in rows {
                if it.get("symbol").and_then(Value::as_str) == Some(symbol.as_str()) {
                    market = it.clone();
                    break;
                }
            }
        }
        let fees = self.fees(ctx).await;

        Ok(HandshakeReply {
            base: cfg.base.clone(),
            quote: cfg.quote.clone(),
            symbol: symbol.clone(),
            web_market: format!("{}{symbol}", cfg.web_market),
            web_orders: cfg.web_orders.clone(),
            tick_price: num(&market["priceIncrement"]),
            tick_size: num(&market["baseIncrement"]),
            min_size: num(&market["baseMinSize"]),
            make_fee: num(&fees["makerFeeRate"]),
            take_fee: num(&fees["takerFeeRate"]),
            reply: json!([market, fees]),
            ..HandshakeReply::default()
        })
    }

    fn subscribe(&self, ctx: &VenueCtx) -> Vec<Outbound> {
        let symbol = &ctx.cfg.symbol;
        vec![
            Outbound::Public(
                json!({"id": 1, "type": "subscribe", "topic": format!("/market/level2:{symbol}"), "response": true})
                    .to_string(),
            ),
            Outbound::Public(
                json!({"id": 2, "type": "subscribe", "topic": format!("/market/match:{symbol}"), "response": true})
                    .to_string(),
            ),
        ]
    }

    fn consume(&self, msg: &Value, ctx: &VenueCtx, sink: &EventSink) -> Vec<Outbound> {
        match msg.get("type").and_then(Value::as_str) {
            Some("welcome") => {
                sink.online(Connectivity::Connected);
                return Vec::new();
            }
            Some("message") => {}
            _ => return Vec::new(),
        }

        let topic = msg.get("topic").and_then(Value::as_str).unwrap_or("");
        let data = &msg["data"];
        if topic.starts_with("/market/level2") {
            let mut levels = self.levels.lock();
            self.apply_changes(&mut levels, &data["changes"], Side::Bid);
            self.apply_changes(&mut levels, &data["changes"], Side::Ask);
            sink.levels(levels.clone());
        } else if topic.starts_with("/market/match") {
            // Match times are nanoseconds.
            let time = num(&data["time"]) as i64 / 1_000_000;
            sink.trade(Trade {
                side: if data["side"].as_str() == Some("buy") {
                    Side::Bid
                } else {
                    Side::Ask
                },
                price: num(&data["price"]),
                quantity: num(&data["size"]),
                time: if time > 0 { time } else { ctx.now_ms() },
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
        let mut body = json!({
            "clientOid": req.order_id,
            "symbol": ctx.cfg.symbol,
            "side": match req.side { Side::Bid => "buy", Side::Ask => "sell" },
            "type": match req.order_type { OrderType::Limit => "limit", OrderType::Market => "market" },
            "size": req.quantity,
        });
        if req.order_type == OrderType::Limit {
            body["price"] = json!(req.price);
            body["timeInForce"] = json!(tif_str(req.time_in_force));
        }
        let ack = self.request(ctx, "POST", "/api/v1/orders", body).await?;
        sink.order(Order {
            order_id: req.order_id.clone(),
            exchange_id: ack["data"]["orderId"].as_str().unwrap_or("").to_string(),
            side: req.side,
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
        let path = format!("/api/v1/orders/{exchange_id}");
        self.request(ctx, "DELETE", &path, Value::Null).await?;
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
        let reply = self
            .request(ctx, "GET", "/api/v1/accounts?type=trade", Value::Null)
            .await?;
        let mut wallets = Wallets::default();
        for account in reply["data"].as_array().into_iter().flatten() {
            let currency = account["currency"].as_str().unwrap_or("");
            let wallet = if currency == ctx.cfg.base {
                &mut wallets.base
            } else if currency == ctx.cfg.quote {
                &mut wallets.quote
            } else {
                continue;
            };
            wallet.currency = currency.to_string();
            Wallet::reset(num(&account["available"]), num(&account["holds"]), wallet);
        }
        Ok(vec![wallets])
    }

    async fn sync_cancel_all(&self, ctx: &VenueCtx) -> Result<Vec<Order>> {
        let path = format!("/api/v1/orders?symbol={}", ctx.cfg.symbol);
        let reply = self.request(ctx, "DELETE", &path, Value::Null).await?;
        let now = ctx.now_ms();
        Ok(reply["data"]["cancelledOrderIds"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .map(|id| Order {
                        exchange_id: id.as_str().unwrap_or("").to_string(),
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
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::sync::Arc;

    #[test]
    fn v2_headers_sign_passphrase_and_payload() {
        let kucoin = KuCoin::new();
        let mut ctx = ctx_for("kucoin", "BTC-USDT");
        let mut cfg = (*ctx.cfg).clone();
        cfg.pass = "kucoin-pass".into();
        ctx.cfg = Arc::new(cfg);

        let headers = kucoin.auth_headers(&ctx, "GET", "/api/v1/base-fee", "");
        assert_eq!(headers[4].1, "2");
        assert!(BASE64.decode(&headers[1].1).is_ok(), "signature is base64");
        assert!(BASE64.decode(&headers[2].1).is_ok(), "passphrase is base64");
        assert_ne!(headers[2].1, "kucoin-pass", "passphrase never travels raw");
    }

    #[test]
    fn level2_changes_update_the_book() {
        let ctx = ctx_for("kucoin", "BTC-USDT");
        let (events, sink) = sink_pair();
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        events.levels.write(move |l: &Levels| *captured.lock() = Some(l.clone()));

        let kucoin = KuCoin::new();
        kucoin.consume(
            &json!({
                "type": "message",
                "topic": "/market/level2:BTC-USDT",
                "data": {"changes": {"bids": [["9400", "1", "10"]], "asks": [["9401", "2", "11"]]}},
            }),
            &ctx,
            &sink,
        );
        kucoin.consume(
            &json!({
                "type": "message",
                "topic": "/market/level2:BTC-USDT",
                "data": {"changes": {"bids": [["9400", "0", "12"]], "asks": []}},
            }),
            &ctx,
            &sink,
        );
        events.drain();

        let levels = seen.lock().clone().unwrap();
        assert!(levels.bids.is_empty());
        assert_eq!(levels.asks.len(), 1);
    }

    #[test]
    fn match_time_converts_from_nanos() {
        let ctx = ctx_for("kucoin", "BTC-USDT");
        let (events, sink) = sink_pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        events.trades.write(move |t: &Trade| captured.lock().push(*t));

        KuCoin::new().consume(
            &json!({
                "type": "message",
                "topic": "/market/match:BTC-USDT",
                "data": {"side": "sell", "price": "9400.5", "size": "0.1", "time": "1700000000000000000"},
            }),
            &ctx,
            &sink,
        );
        events.drain();
        let trades = seen.lock();
        assert_eq!(trades[0].time, 1_700_000_000_000);
        assert_eq!(trades[0].side, Side::Ask);
    }
}
