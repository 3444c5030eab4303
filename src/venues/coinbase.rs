//! Coinbase adapter: public WebSocket feed plus a FIX order session.
//!
//! The level2 channel sends one snapshot then per-price changes, so a
//! resident book lives here; a change to size zero removes the row.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

use super::{
    auth, book, num, pair_levels, send, Outbound, PlaceRequest, TransportKind, Venue, VenueProfile,
};
use crate::gateway::handshake::HandshakeReply;
use crate::gateway::{EventSink, VenueCtx};
use crate::models::{
    Connectivity, Levels, Order, OrderType, Side, Status, TimeInForce, Trade, Wallet, Wallets,
};

const FIX_TARGET: &str = "Coinbase";

pub struct Coinbase {
    levels: Mutex<Levels>,
}

impl Coinbase {
    pub fn new() -> Self {
        Self {
            levels: Mutex::new(Levels::default()),
        }
    }

    /// CB-ACCESS headers; the signature is HMAC-SHA256 over
    /// timestamp + method + path + body with the base64-decoded secret.
    fn auth_headers(
        &self,
        ctx: &VenueCtx,
        method: &str,
        path: &str,
        body: &str,
    ) -> [(&'static str, String); 4] {
        let timestamp = (ctx.now_ms() / 1000).to_string();
        let payload = format!("{timestamp}{method}{path}{body}");
        let signature = auth::hmac_sha256_b64_secret(&payload, &ctx.cfg.secret).unwrap_or_else(|e| {
            warn!(gw = %ctx.cfg.exchange, "cannot sign request: {e:#}");
            String::new()
        });
        [
            ("CB-ACCESS-KEY", ctx.cfg.apikey.clone()),
            ("CB-ACCESS-SIGN", signature),
            ("CB-ACCESS-TIMESTAMP", timestamp),
            ("CB-ACCESS-PASSPHRASE", ctx.cfg.pass.clone()),
        ]
    }

    async fn request(&self, ctx: &VenueCtx, method: &str, path: &str) -> Result<Value> {
        let url = format!("{}{path}", ctx.cfg.http);
        let mut builder = match method {
            "DELETE" => ctx.http.delete(&url),
            _ => ctx.http.get(&url),
        };
        for (name, value) in self.auth_headers(ctx, method, path, "") {
            builder = builder.header(name, value);
        }
        send(builder).await
    }

    fn fix_side(side: Side) -> &'static str {
        match side {
            Side::Bid => "1",
            Side::Ask => "2",
        }
    }
}

#[async_trait]
impl Venue for Coinbase {
    fn profile(&self) -> VenueProfile {
        let mut profile = VenueProfile::ws_only(
            "coinbase",
            "https://api.pro.coinbase.com",
            "wss://ws-feed.pro.coinbase.com",
        );
        profile.fix = "fix.pro.coinbase.com:4198".into();
        profile.transport = TransportKind::WsFix;
        profile.web_market = "https://pro.coinbase.com/trade/".into();
        profile.web_orders = "https://pro.coinbase.com/orders/".into();
        profile.ask_for_cancel_all = true;
        profile
    }

    async fn handshake(&self, ctx: &VenueCtx) -> Result<HandshakeReply> {
        let cfg = &ctx.cfg;
        let product = send(ctx.http.get(format!(
            "{}/products/{}-{}",
            cfg.http, cfg.base, cfg.quote
        )))
        .await?;

        Ok(HandshakeReply {
            base: cfg.base.clone(),
            quote: cfg.quote.clone(),
            symbol: format!("{}-{}", cfg.base, cfg.quote),
            web_market: format!("{}{}{}", cfg.web_market, cfg.base, cfg.quote),
            web_orders: format!("{}{}{}", cfg.web_orders, cfg.base, cfg.quote),
            tick_price: num(&product["quote_increment"]),
            tick_size: num(&product["base_increment"]),
            min_size: num(&product["base_min_size"]),
            reply: product,
            ..HandshakeReply::default()
        })
    }

    fn subscribe(&self, ctx: &VenueCtx) -> Vec<Outbound> {
        vec![Outbound::Public(
            json!({
                "type": "subscribe",
                "product_ids": [ctx.cfg.symbol],
                "channels": ["level2", "matches"],
            })
            .to_string(),
        )]
    }

    fn consume(&self, msg: &Value, ctx: &VenueCtx, sink: &EventSink) -> Vec<Outbound> {
        // FIX execution reports arrive as tag-keyed objects.
        if let Some(exec_type) = msg.get("35").and_then(Value::as_str) {
            if exec_type == "8" {
                let status = match msg["39"].as_str().unwrap_or("") {
                    "0" | "1" => Status::Working,
                    _ => Status::Terminated,
                };
                sink.order(Order {
                    order_id: msg["11"].as_str().unwrap_or("").to_string(),
                    exchange_id: msg["37"].as_str().unwrap_or("").to_string(),
                    price: num(&msg["44"]),
                    quantity: num(&msg["38"]),
                    filled: num(&msg["14"]),
                    status,
                    time: ctx.now_ms(),
                    ..Order::default()
                });
            }
            return Vec::new();
        }

        match msg.get("type").and_then(Value::as_str) {
            Some("subscriptions") => sink.online(Connectivity::Connected),
            Some("snapshot") => {
                let mut levels = Levels {
                    bids: pair_levels(msg.get("bids")),
                    asks: pair_levels(msg.get("asks")),
                };
                book::sort(&mut levels);
                *self.levels.lock() = levels.clone();
                sink.levels(levels);
            }
            Some("l2update") => {
                let mut levels = self.levels.lock();
                for change in msg["changes"].as_array().into_iter().flatten() {
                    let row = change.as_array();
                    let side = if row.and_then(|r| r.first()).and_then(Value::as_str)
                        == Some("buy")
                    {
                        Side::Bid
                    } else {
                        Side::Ask
                    };
                    let price = row.and_then(|r| r.get(1)).map(num).unwrap_or(0.0);
                    let size = row.and_then(|r| r.get(2)).map(num).unwrap_or(0.0);
                    book::apply(&mut levels, side, price, size);
                }
                sink.levels(levels.clone());
            }
            Some("match") => sink.trade(Trade {
                side: if msg["side"].as_str() == Some("buy") {
                    Side::Bid
                } else {
                    Side::Ask
                },
                price: num(&msg["price"]),
                quantity: num(&msg["size"]),
                time: msg["time"]
                    .as_str()
                    .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                    .map(|ts| ts.timestamp_millis())
                    .unwrap_or_else(|| ctx.now_ms()),
            }),
            _ => {}
        }
        Vec::new()
    }

    async fn place(
        &self,
        req: &PlaceRequest,
        ctx: &VenueCtx,
        _sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let mut fields = vec![
            (11, req.order_id.clone()),
            (55, ctx.cfg.symbol.clone()),
            (54, Self::fix_side(req.side).to_string()),
            (38, req.quantity.clone()),
            (
                40,
                match req.order_type {
                    OrderType::Limit => "2".to_string(),
                    OrderType::Market => "1".to_string(),
                },
            ),
            (
                59,
                match req.time_in_force {
                    TimeInForce::Gtc => "1".to_string(),
                    TimeInForce::Ioc => "3".to_string(),
                    TimeInForce::Fok => "4".to_string(),
                },
            ),
        ];
        if req.order_type == OrderType::Limit {
            fields.push((44, req.price.clone()));
        }
        Ok(vec![Outbound::Fix("D".to_string(), fields)])
    }

    async fn cancel(
        &self,
        order_id: &str,
        exchange_id: &str,
        ctx: &VenueCtx,
        _sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        Ok(vec![Outbound::Fix(
            "F".to_string(),
            vec![
                (41, order_id.to_string()),
                (37, exchange_id.to_string()),
                (55, ctx.cfg.symbol.clone()),
            ],
        )])
    }

    async fn sync_wallet(&self, ctx: &VenueCtx) -> Result<Vec<Wallets>> {
        let accounts = self.request(ctx, "GET", "/accounts").await?;
        let mut wallets = Wallets::default();
        for account in accounts.as_array().into_iter().flatten() {
            let currency = account["currency"].as_str().unwrap_or("");
            let wallet = if currency == ctx.cfg.base {
                &mut wallets.base
            } else if currency == ctx.cfg.quote {
                &mut wallets.quote
            } else {
                continue;
            };
            wallet.currency = currency.to_string();
            Wallet::reset(num(&account["available"]), num(&account["hold"]), wallet);
        }
        Ok(vec![wallets])
    }

    async fn sync_cancel_all(&self, ctx: &VenueCtx) -> Result<Vec<Order>> {
        let path = format!("/orders?product_id={}", ctx.cfg.symbol);
        let cancelled = self.request(ctx, "DELETE", &path).await?;
        let now = ctx.now_ms();
        Ok(cancelled
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

    fn fix_target(&self) -> String {
        FIX_TARGET.to_string()
    }

    /// Logon fields with the pre-signed prefix Coinbase verifies.
    fn fix_logon(&self, ctx: &VenueCtx, seq: u32, sending_time: &str) -> Vec<(u32, String)> {
        let presign = [
            sending_time,
            "A",
            &seq.to_string(),
            &ctx.cfg.apikey,
            FIX_TARGET,
            &ctx.cfg.pass,
        ]
        .join("\u{1}");
        let signature = auth::hmac_sha256_b64_secret(&presign, &ctx.cfg.secret).unwrap_or_else(|e| {
            warn!(gw = %ctx.cfg.exchange, "cannot sign logon: {e:#}");
            String::new()
        });
        vec![
            (98, "0".to_string()),
            (108, "30".to_string()),
            (554, ctx.cfg.pass.clone()),
            (96, signature),
            (8013, "S".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::testutil::{ctx_for, sink_pair};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::sync::Arc;

    fn ctx_with_b64_secret() -> VenueCtx {
        let mut ctx = ctx_for("coinbase", "BTC-USD");
        let mut cfg = (*ctx.cfg).clone();
        cfg.secret = BASE64.encode(b"coinbase shared secret");
        cfg.pass = "passphrase".into();
        ctx.cfg = Arc::new(cfg);
        ctx
    }

    #[test]
    fn snapshot_then_update_maintains_the_book() {
        let ctx = ctx_with_b64_secret();
        let (events, sink) = sink_pair();
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        events.levels.write(move |l: &Levels| *captured.lock() = Some(l.clone()));

        let coinbase = Coinbase::new();
        coinbase.consume(
            &json!({
                "type": "snapshot",
                "bids": [["9400.00", "2"], ["9399.00", "1"]],
                "asks": [["9401.00", "3"]],
            }),
            &ctx,
            &sink,
        );
        coinbase.consume(
            &json!({
                "type": "l2update",
                "changes": [["buy", "9400.00", "0"], ["sell", "9402.00", "4"]],
            }),
            &ctx,
            &sink,
        );
        events.drain();

        let levels = seen.lock().clone().unwrap();
        assert_eq!(levels.bids.len(), 1, "zero size removed the bid");
        assert_eq!(levels.bids[0].price, 9399.0);
        assert_eq!(levels.asks.len(), 2);
        assert_eq!(levels.asks[1].price, 9402.0);
    }

    #[test]
    fn fix_execution_report_becomes_an_order_event() {
        let ctx = ctx_with_b64_secret();
        let (events, sink) = sink_pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        events.orders.write(move |o: &Order| captured.lock().push(o.clone()));

        Coinbase::new().consume(
            &json!({"35": "8", "11": "oid-3", "37": "ex-3", "39": "0", "44": "9400.5", "38": "2"}),
            &ctx,
            &sink,
        );
        events.drain();

        let orders = seen.lock();
        assert_eq!(orders[0].order_id, "oid-3");
        assert_eq!(orders[0].exchange_id, "ex-3");
        assert_eq!(orders[0].status, Status::Working);
        assert_eq!(orders[0].price, 9400.5);
    }

    #[test]
    fn logon_fields_are_signed() {
        let ctx = ctx_with_b64_secret();
        let fields = Coinbase::new().fix_logon(&ctx, 1, "20260801-10:00:00.000");
        let signature = fields.iter().find(|(tag, _)| *tag == 96).unwrap();
        assert!(!signature.1.is_empty());
        assert!(BASE64.decode(&signature.1).is_ok());
        assert!(fields.iter().any(|(tag, value)| *tag == 554 && value == "passphrase"));
    }
}
