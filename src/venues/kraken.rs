//! Kraken adapter.
//!
//! Market data on the public socket, own-order stream on the authenticated
//! twin (`ws.` rewritten to `ws-auth.`). REST signatures hash the nonce and
//! body before the HMAC, per Kraken's scheme.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{auth, book, num, send, url_path, Outbound, PlaceRequest, RandId, Venue, VenueProfile};
use crate::gateway::handshake::HandshakeReply;
use crate::gateway::{EventSink, VenueCtx};
use crate::models::{Connectivity, Levels, Order, Side, Status, Trade, Wallet, Wallets};

pub struct Kraken {
    levels: Mutex<Levels>,
}

impl Kraken {
    pub fn new() -> Self {
        Self {
            levels: Mutex::new(Levels::default()),
        }
    }

    async fn private_request(
        &self,
        ctx: &VenueCtx,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<Value> {
        let nonce = ctx.now_ms().to_string();
        let mut post = format!("nonce={nonce}");
        for (key, value) in params {
            post.push_str(&format!("&{key}={value}"));
        }
        let path = url_path(&ctx.cfg.http, endpoint);
        let signature = auth::kraken_sign(&path, &nonce, &post, &ctx.cfg.secret)?;
        let reply = send(
            ctx.http
                .post(format!("{}{endpoint}", ctx.cfg.http))
                .header("API-Key", &ctx.cfg.apikey)
                .header("API-Sign", signature)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(post),
        )
        .await?;
        if let Some(errors) = reply["error"].as_array() {
            if !errors.is_empty() {
                bail!("API error: {errors:?}");
            }
        }
        Ok(reply["result"].clone())
    }

    fn apply_rows(&self, levels: &mut Levels, payload: &Value, key: &str, side: Side) {
        for row in payload[key].as_array().into_iter().flatten() {
            let Some(row) = row.as_array() else { continue };
            let price = row.first().map(num).unwrap_or(0.0);
            let volume = row.get(1).map(num).unwrap_or(0.0);
            if price > 0.0 {
                book::apply(levels, side, price, volume);
            }
        }
    }

    fn orders_from(&self, payload: &Value, now: i64) -> Vec<Order> {
        let mut orders = Vec::new();
        for entry in payload.as_array().into_iter().flatten() {
            let Some(map) = entry.as_object() else { continue };
            for (exchange_id, raw) in map {
                let status = match raw["status"].as_str().unwrap_or("") {
                    "pending" | "open" => Status::Working,
                    "" => Status::Waiting,
                    _ => Status::Terminated,
                };
                orders.push(Order {
                    order_id: raw["userref"]
                        .as_i64()
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                    exchange_id: exchange_id.clone(),
                    price: num(&raw["descr"]["price"]),
                    quantity: num(&raw["vol"]),
                    filled: num(&raw["vol_exec"]),
                    status,
                    time: now,
                    ..Order::default()
                });
            }
        }
        orders
    }
}

#[async_trait]
impl Venue for Kraken {
    fn profile(&self) -> VenueProfile {
        let mut profile =
            VenueProfile::ws_only("kraken", "https://api.kraken.com", "wss://ws.kraken.com");
        profile.transport = super::TransportKind::WsTwin;
        profile.web_market = "https://www.kraken.com/charts".into();
        profile.web_orders = "https://www.kraken.com/u/trade".into();
        profile.rand_id = RandId::Int32;
        profile.ask_for_cancel_all = true;
        profile
    }

    async fn handshake(&self, ctx: &VenueCtx) -> Result<HandshakeReply> {
        let cfg = &ctx.cfg;
        let listed = send(ctx.http.get(format!(
            "{}/0/public/AssetPairs?pair={}{}",
            cfg.http, cfg.base, cfg.quote
        )))
        .await?;

        let mut pair = Value::Null;
        if let Some(result) = listed.get("result").and_then(Value::as_object) {
            for candidate in result.values() {
                if candidate.get("pair_decimals").is_some() {
                    pair = candidate.clone();
                    break;
                }
            }
        }

        let pair_decimals = pair["pair_decimals"].as_i64().unwrap_or(0) as i32;
        let lot_decimals = pair["lot_decimals"].as_i64().unwrap_or(0) as i32;
        Ok(HandshakeReply {
            base: pair["base"].as_str().unwrap_or("").to_string(),
            quote: pair["quote"].as_str().unwrap_or("").to_string(),
            symbol: pair["wsname"].as_str().unwrap_or("").to_string(),
            web_market: cfg.web_market.clone(),
            web_orders: cfg.web_orders.clone(),
            tick_price: if pair.is_null() {
                0.0
            } else {
                10f64.powi(-pair_decimals)
            },
            tick_size: if pair.is_null() {
                0.0
            } else {
                10f64.powi(-lot_decimals)
            },
            min_size: if pair.is_null() {
                0.0
            } else {
                10f64.powi(-lot_decimals)
            },
            reply: pair,
            ..HandshakeReply::default()
        })
    }

    /// `wss://ws.kraken.com` becomes `wss://ws-auth.kraken.com`.
    fn twin(&self, ws: &str) -> String {
        match ws.find("ws.") {
            Some(at) => {
                let mut twin = ws.to_string();
                twin.insert_str(at + 2, "-auth");
                twin
            }
            None => ws.to_string(),
        }
    }

    fn subscribe(&self, ctx: &VenueCtx) -> Vec<Outbound> {
        let pair = &ctx.cfg.symbol;
        vec![
            Outbound::Public(
                json!({"event": "subscribe", "pair": [pair], "subscription": {"name": "book", "depth": 25}})
                    .to_string(),
            ),
            Outbound::Public(
                json!({"event": "subscribe", "pair": [pair], "subscription": {"name": "trade"}})
                    .to_string(),
            ),
            // The websocket token is provisioned out of band and supplied as
            // the gateway passphrase.
            Outbound::Private(
                json!({"event": "subscribe", "subscription": {"name": "openOrders", "token": ctx.cfg.pass}})
                    .to_string(),
            ),
        ]
    }

    fn consume(&self, msg: &Value, ctx: &VenueCtx, sink: &EventSink) -> Vec<Outbound> {
        if msg.get("event").and_then(Value::as_str) == Some("subscriptionStatus") {
            if msg["status"].as_str() == Some("subscribed") {
                sink.online(Connectivity::Connected);
            }
            return Vec::new();
        }
        let Some(frame) = msg.as_array() else {
            return Vec::new();
        };
        let channel = frame
            .iter()
            .filter_map(Value::as_str)
            .find(|name| {
                name.starts_with("book") || *name == "trade" || *name == "openOrders"
            })
            .unwrap_or("");

        if channel.starts_with("book") {
            let Some(payload) = frame.get(1) else {
                return Vec::new();
            };
            let mut levels = self.levels.lock();
            if payload.get("as").is_some() || payload.get("bs").is_some() {
                *levels = Levels::default();
                self.apply_rows(&mut levels, payload, "bs", Side::Bid);
                self.apply_rows(&mut levels, payload, "as", Side::Ask);
            } else {
                self.apply_rows(&mut levels, payload, "b", Side::Bid);
                self.apply_rows(&mut levels, payload, "a", Side::Ask);
            }
            sink.levels(levels.clone());
        } else if channel == "trade" {
            for print in frame
                .get(1)
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let Some(print) = print.as_array() else { continue };
                sink.trade(Trade {
                    side: if print.get(3).and_then(Value::as_str) == Some("b") {
                        Side::Bid
                    } else {
                        Side::Ask
                    },
                    price: print.first().map(num).unwrap_or(0.0),
                    quantity: print.get(1).map(num).unwrap_or(0.0),
                    time: print
                        .get(2)
                        .map(|ts| (num(ts) * 1e3) as i64)
                        .filter(|ms| *ms > 0)
                        .unwrap_or_else(|| ctx.now_ms()),
                });
            }
        } else if channel == "openOrders" {
            for order in self.orders_from(frame.first().unwrap_or(&Value::Null), ctx.now_ms()) {
                sink.order(order);
            }
        }
        Vec::new()
    }

    async fn place(
        &self,
        req: &PlaceRequest,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let result = self
            .private_request(
                ctx,
                "/0/private/AddOrder",
                vec![
                    ("pair", format!("{}{}", ctx.cfg.base, ctx.cfg.quote)),
                    (
                        "type",
                        match req.side {
                            Side::Bid => "buy".to_string(),
                            Side::Ask => "sell".to_string(),
                        },
                    ),
                    ("ordertype", "limit".to_string()),
                    ("price", req.price.clone()),
                    ("volume", req.quantity.clone()),
                    ("userref", req.order_id.clone()),
                ],
            )
            .await?;
        sink.order(Order {
            order_id: req.order_id.clone(),
            exchange_id: result["txid"]
                .as_array()
                .and_then(|ids| ids.first())
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
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
        self.private_request(
            ctx,
            "/0/private/CancelOrder",
            vec![("txid", exchange_id.to_string())],
        )
        .await?;
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
        let result = self
            .private_request(ctx, "/0/private/Balance", Vec::new())
            .await?;
        let mut wallets = Wallets::default();
        if let Some(balances) = result.as_object() {
            for (code, amount) in balances {
                // Kraken prefixes assets with X or Z.
                let plain = if code.len() == ctx.cfg.base.len() + 1
                    || code.len() == ctx.cfg.quote.len() + 1
                {
                    &code[1..]
                } else {
                    code.as_str()
                };
                let wallet = if plain == ctx.cfg.base {
                    &mut wallets.base
                } else if plain == ctx.cfg.quote {
                    &mut wallets.quote
                } else {
                    continue;
                };
                wallet.currency = plain.to_string();
                Wallet::reset(num(amount), 0.0, wallet);
            }
        }
        Ok(vec![wallets])
    }

    async fn sync_cancel_all(&self, ctx: &VenueCtx) -> Result<Vec<Order>> {
        self.private_request(ctx, "/0/private/CancelAll", Vec::new())
            .await?;
        Ok(Vec::new())
    }
}
