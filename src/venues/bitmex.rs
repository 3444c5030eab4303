//! BitMEX derivatives adapter.
//!
//! The realtime socket pushes top-10 book snapshots and executions; orders
//! are REST with the expiring-signature scheme, and the venue can modify an
//! order in place.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{auth, num, pair_levels, send, url_path, Outbound, PlaceRequest, Venue, VenueProfile};
use crate::gateway::handshake::HandshakeReply;
use crate::gateway::{EventSink, VenueCtx};
use crate::models::{
    Connectivity, Future, Levels, Order, OrderType, Side, Status, TimeInForce, Trade, Wallet,
    Wallets,
};

pub struct Bitmex;

impl Bitmex {
    pub fn new() -> Self {
        Self
    }

    /// Signature over verb + path + expiry + body, expiring in a minute.
    fn auth_headers(
        &self,
        ctx: &VenueCtx,
        verb: &str,
        endpoint: &str,
        body: &str,
    ) -> [(&'static str, String); 3] {
        let expires = (ctx.now_ms() / 1000 + 60).to_string();
        let payload = format!("{verb}{}{expires}{body}", url_path(&ctx.cfg.http, endpoint));
        [
            ("api-expires", expires),
            ("api-key", ctx.cfg.apikey.clone()),
            ("api-signature", auth::hmac_sha256_hex(&payload, &ctx.cfg.secret)),
        ]
    }

    async fn request(
        &self,
        ctx: &VenueCtx,
        verb: &str,
        endpoint: &str,
        body: Value,
    ) -> Result<Value> {
        let body_text = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        let url = format!("{}{endpoint}", ctx.cfg.http);
        let mut builder = match verb {
            "POST" => ctx.http.post(&url),
            "PUT" => ctx.http.put(&url),
            "DELETE" => ctx.http.delete(&url),
            _ => ctx.http.get(&url),
        };
        for (name, value) in self.auth_headers(ctx, verb, endpoint, &body_text) {
            builder = builder.header(name, value);
        }
        if !body_text.is_empty() {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body_text);
        }
        send(builder).await
    }

    fn order_from(&self, raw: &Value, now: i64) -> Order {
        let status = match raw["ordStatus"].as_str().unwrap_or("") {
            "New" | "PartiallyFilled" => Status::Working,
            "Filled" | "Canceled" | "Rejected" => Status::Terminated,
            _ => Status::Waiting,
        };
        Order {
            order_id: raw["clOrdID"].as_str().unwrap_or("").to_string(),
            exchange_id: raw["orderID"].as_str().unwrap_or("").to_string(),
            price: num(&raw["price"]),
            quantity: num(&raw["orderQty"]),
            filled: num(&raw["cumQty"]),
            status,
            time: raw["timestamp"]
                .as_str()
                .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.timestamp_millis())
                .unwrap_or(now),
            ..Order::default()
        }
    }
}

#[async_trait]
impl Venue for Bitmex {
    fn profile(&self) -> VenueProfile {
        let mut profile = VenueProfile::ws_only(
            "bitmex",
            "https://www.bitmex.com/api/v1",
            "wss://www.bitmex.com/realtime",
        );
        profile.web_market = "https://www.bitmex.com/app/trade/".into();
        profile.web_orders = "https://www.bitmex.com/app/orderHistory".into();
        profile.ask_for_replace = true;
        profile.ask_for_cancel_all = true;
        profile
    }

    async fn handshake(&self, ctx: &VenueCtx) -> Result<HandshakeReply> {
        let cfg = &ctx.cfg;
        let listed = send(
            ctx.http
                .get(format!("{}/instrument?symbol=XBT{}", cfg.http, cfg.quote)),
        )
        .await?;
        let instrument = listed
            .as_array()
            .and_then(|rows| rows.first())
            .cloned()
            .unwrap_or(Value::Null);

        Ok(HandshakeReply {
            base: "XBT".to_string(),
            quote: cfg.quote.clone(),
            symbol: format!("{}{}", cfg.base, cfg.quote),
            margin: Some(if instrument["isInverse"].as_bool().unwrap_or(false) {
                Future::Inverse
            } else {
                Future::Linear
            }),
            web_market: format!("{}{}{}", cfg.web_market, cfg.base, cfg.quote),
            web_orders: cfg.web_orders.clone(),
            tick_price: num(&instrument["tickSize"]),
            tick_size: num(&instrument["lotSize"]),
            min_size: num(&instrument["lotSize"]),
            min_value: 0.0,
            make_fee: num(&instrument["makerFee"]),
            take_fee: num(&instrument["takerFee"]),
            reply: instrument,
        })
    }

    fn subscribe(&self, ctx: &VenueCtx) -> Vec<Outbound> {
        let symbol = &ctx.cfg.symbol;
        let mut frames = Vec::new();
        let mut args = vec![format!("orderBook10:{symbol}"), format!("trade:{symbol}")];
        if !ctx.cfg.apikey.is_empty() {
            // Socket login must precede the private tables: the signature is
            // HMAC-SHA256 over "GET/realtime" plus the expiry.
            let expires = ctx.now_ms() / 1000 + 60;
            let signature =
                auth::hmac_sha256_hex(&format!("GET/realtime{expires}"), &ctx.cfg.secret);
            frames.push(Outbound::Public(
                json!({
                    "op": "authKeyExpires",
                    "args": [ctx.cfg.apikey, expires, signature],
                })
                .to_string(),
            ));
            args.push("order".to_string());
            args.push("execution".to_string());
        }
        frames.push(Outbound::Public(
            json!({"op": "subscribe", "args": args}).to_string(),
        ));
        frames
    }

    fn consume(&self, msg: &Value, ctx: &VenueCtx, sink: &EventSink) -> Vec<Outbound> {
        if msg.get("subscribe").is_some() && msg["success"].as_bool().unwrap_or(false) {
            sink.online(Connectivity::Connected);
            return Vec::new();
        }
        let data = msg.get("data").and_then(Value::as_array);
        match msg.get("table").and_then(Value::as_str) {
            Some("orderBook10") => {
                if let Some(book) = data.and_then(|rows| rows.last()) {
                    sink.levels(Levels {
                        bids: pair_levels(book.get("bids")),
                        asks: pair_levels(book.get("asks")),
                    });
                }
            }
            Some("trade") => {
                for print in data.into_iter().flatten() {
                    sink.trade(Trade {
                        side: if print["side"].as_str() == Some("Buy") {
                            Side::Bid
                        } else {
                            Side::Ask
                        },
                        price: num(&print["price"]),
                        quantity: num(&print["size"]),
                        time: print["timestamp"]
                            .as_str()
                            .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                            .map(|ts| ts.timestamp_millis())
                            .unwrap_or_else(|| ctx.now_ms()),
                    });
                }
            }
            Some("order") | Some("execution") => {
                for raw in data.into_iter().flatten() {
                    sink.order(self.order_from(raw, ctx.now_ms()));
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
        let mut body = json!({
            "symbol": ctx.cfg.symbol,
            "side": match req.side { Side::Bid => "Buy", Side::Ask => "Sell" },
            "orderQty": req.quantity,
            "clOrdID": req.order_id,
            "ordType": match req.order_type { OrderType::Limit => "Limit", OrderType::Market => "Market" },
            "timeInForce": match req.time_in_force {
                TimeInForce::Gtc => "GoodTillCancel",
                TimeInForce::Ioc => "ImmediateOrCancel",
                TimeInForce::Fok => "FillOrKill",
            },
        });
        if req.order_type == OrderType::Limit {
            body["price"] = json!(req.price);
        }
        let ack = self.request(ctx, "POST", "/order", body).await?;
        sink.order(self.order_from(&ack, ctx.now_ms()));
        Ok(Vec::new())
    }

    async fn replace(
        &self,
        exchange_id: &str,
        price: &str,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let body = json!({ "orderID": exchange_id, "price": price });
        let ack = self.request(ctx, "PUT", "/order", body).await?;
        sink.order(self.order_from(&ack, ctx.now_ms()));
        Ok(Vec::new())
    }

    async fn cancel(
        &self,
        _order_id: &str,
        exchange_id: &str,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let body = json!({ "orderID": exchange_id });
        let ack = self.request(ctx, "DELETE", "/order", body).await?;
        for raw in ack.as_array().into_iter().flatten() {
            sink.order(self.order_from(raw, ctx.now_ms()));
        }
        Ok(Vec::new())
    }

    async fn sync_wallet(&self, ctx: &VenueCtx) -> Result<Vec<Wallets>> {
        let margin = self
            .request(ctx, "GET", "/user/margin?currency=XBt", Value::Null)
            .await?;
        // Balances arrive in satoshis.
        let total = num(&margin["walletBalance"]) * 1e-8;
        let available = num(&margin["availableMargin"]) * 1e-8;
        let mut wallets = Wallets::default();
        wallets.base.currency = "XBT".to_string();
        Wallet::reset(available, (total - available).max(0.0), &mut wallets.base);
        Ok(vec![wallets])
    }

    async fn sync_cancel_all(&self, ctx: &VenueCtx) -> Result<Vec<Order>> {
        let body = json!({ "symbol": ctx.cfg.symbol });
        let ack = self.request(ctx, "DELETE", "/order/all", body).await?;
        let now = ctx.now_ms();
        Ok(ack
            .as_array()
            .map(|orders| orders.iter().map(|raw| self.order_from(raw, now)).collect())
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
    fn signature_covers_verb_path_expiry_and_body() {
        let ctx = ctx_for("bitmex", "XBTUSD");
        let headers = Bitmex::new().auth_headers(&ctx, "POST", "/order", "{}");
        assert_eq!(headers[0].0, "api-expires");
        assert_eq!(headers[1].1, "test-key");
        assert_eq!(headers[2].1.len(), 64);

        // Same inputs, same signature: the scheme is deterministic.
        let again = Bitmex::new().auth_headers(&ctx, "POST", "/order", "{}");
        assert_eq!(headers[2].1, again[2].1);
    }

    #[test]
    fn sign_path_includes_the_api_prefix() {
        assert_eq!(
            url_path("https://www.bitmex.com/api/v1", "/order"),
            "/api/v1/order"
        );
        assert_eq!(url_path("https://api.kraken.com", "/0/private/Balance"), "/0/private/Balance");
    }

    #[test]
    fn private_tables_ride_behind_the_socket_login() {
        let ctx = ctx_for("bitmex", "XBTUSD");
        let frames = Bitmex::new().subscribe(&ctx);
        assert_eq!(frames.len(), 2);
        let Outbound::Public(login) = &frames[0] else {
            panic!("login frame expected");
        };
        assert!(login.contains("authKeyExpires"));
        assert!(login.contains("test-key"));
        let Outbound::Public(subs) = &frames[1] else {
            panic!("subscribe frame expected");
        };
        assert!(subs.contains("\"order\""));
        assert!(subs.contains("\"execution\""));

        // Without credentials only the public feeds are requested.
        let mut anon = ctx_for("bitmex", "XBTUSD");
        let mut cfg = (*anon.cfg).clone();
        cfg.apikey.clear();
        anon.cfg = Arc::new(cfg);
        let frames = Bitmex::new().subscribe(&anon);
        assert_eq!(frames.len(), 1);
        let Outbound::Public(subs) = &frames[0] else {
            panic!("subscribe frame expected");
        };
        assert!(subs.contains("orderBook10:XBTUSD"));
        assert!(!subs.contains("\"order\""));
        assert!(!subs.contains("\"execution\""));
    }

    #[test]
    fn order_book_snapshot_and_executions() {
        let ctx = ctx_for("bitmex", "XBTUSD");
        let (events, sink) = sink_pair();
        let books = Arc::new(Mutex::new(None));
        let orders = Arc::new(Mutex::new(Vec::new()));
        let seen_books = books.clone();
        let seen_orders = orders.clone();
        events.levels.write(move |l: &Levels| *seen_books.lock() = Some(l.clone()));
        events.orders.write(move |o: &Order| seen_orders.lock().push(o.clone()));

        let bitmex = Bitmex::new();
        bitmex.consume(
            &json!({
                "table": "orderBook10",
                "data": [{"bids": [[9400.5, 100]], "asks": [[9401.0, 50]]}],
            }),
            &ctx,
            &sink,
        );
        bitmex.consume(
            &json!({
                "table": "order",
                "data": [{"clOrdID": "c-1", "orderID": "E-1", "ordStatus": "New", "price": 9400.5, "orderQty": 100}],
            }),
            &ctx,
            &sink,
        );
        events.drain();

        assert_eq!(books.lock().as_ref().unwrap().bids[0].price, 9400.5);
        let orders = orders.lock();
        assert_eq!(orders[0].exchange_id, "E-1");
        assert_eq!(orders[0].status, Status::Working);
    }
}
