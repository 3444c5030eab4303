//! Poloniex adapter.
//!
//! The api2 socket multiplexes one channel per pair: an `i` frame carries
//! the initial book, `o` frames are per-price updates (zero size deletes),
//! `t` frames are trades. Trading is the classic form-encoded POST with an
//! HMAC-SHA512 `Sign` header. Ticks are fixed: 1e-8 price and size, 1e-3
//! minimum order.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{auth, book, num, send, Outbound, PlaceRequest, RandId, Venue, VenueProfile};
use crate::gateway::handshake::HandshakeReply;
use crate::gateway::{EventSink, VenueCtx};
use crate::models::{
    Connectivity, Level, Levels, Order, Side, Status, TimeInForce, Trade, Wallet, Wallets,
};

pub struct Poloniex {
    levels: Mutex<Levels>,
}

impl Poloniex {
    pub fn new() -> Self {
        Self {
            levels: Mutex::new(Levels::default()),
        }
    }

    async fn trading_api(
        &self,
        ctx: &VenueCtx,
        command: &str,
        params: Vec<(&str, String)>,
    ) -> Result<Value> {
        let mut post = format!("command={command}&nonce={}", ctx.now_ms());
        for (key, value) in params {
            post.push_str(&format!("&{key}={value}"));
        }
        send(
            ctx.http
                .post(format!("{}/tradingApi", ctx.cfg.http))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .header("Key", &ctx.cfg.apikey)
                .header("Sign", auth::hmac_sha512_hex(&post, &ctx.cfg.secret))
                .body(post),
        )
        .await
    }

    fn side_levels(map: Option<&Value>) -> Vec<Level> {
        map.and_then(Value::as_object)
            .map(|rows| {
                rows.iter()
                    .map(|(price, size)| {
                        Level::new(price.parse().unwrap_or(0.0), num(size))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Venue for Poloniex {
    fn profile(&self) -> VenueProfile {
        let mut profile = VenueProfile::ws_only(
            "poloniex",
            "https://poloniex.com",
            "wss://api2.poloniex.com",
        );
        profile.web_market = "https://poloniex.com/exchange".into();
        profile.web_orders = "https://poloniex.com/tradeHistory".into();
        profile.rand_id = RandId::Int45;
        profile.ask_for_cancel_all = true;
        profile
    }

    async fn handshake(&self, ctx: &VenueCtx) -> Result<HandshakeReply> {
        let cfg = &ctx.cfg;
        let symbol = format!("{}_{}", cfg.quote, cfg.base);
        let ticker = send(
            ctx.http
                .get(format!("{}/public?command=returnTicker", cfg.http)),
        )
        .await?;
        let pair = ticker.get(&symbol).cloned().unwrap_or(json!({}));

        Ok(HandshakeReply {
            base: cfg.base.clone(),
            quote: cfg.quote.clone(),
            symbol,
            web_market: cfg.web_market.clone(),
            web_orders: cfg.web_orders.clone(),
            tick_price: if pair.as_object().map_or(true, |p| p.is_empty()) {
                0.0
            } else {
                1e-8
            },
            tick_size: 1e-8,
            min_size: 1e-3,
            reply: pair,
            ..HandshakeReply::default()
        })
    }

    fn subscribe(&self, ctx: &VenueCtx) -> Vec<Outbound> {
        vec![Outbound::Public(
            json!({"command": "subscribe", "channel": ctx.cfg.symbol}).to_string(),
        )]
    }

    fn consume(&self, msg: &Value, ctx: &VenueCtx, sink: &EventSink) -> Vec<Outbound> {
        let Some(frame) = msg.as_array() else {
            return Vec::new();
        };
        let Some(entries) = frame.get(2).and_then(Value::as_array) else {
            return Vec::new();
        };
        for entry in entries {
            let Some(entry) = entry.as_array() else { continue };
            match entry.first().and_then(Value::as_str) {
                Some("i") => {
                    let detail = entry.get(1).cloned().unwrap_or(Value::Null);
                    let order_book = &detail["orderBook"];
                    let mut levels = Levels {
                        asks: Self::side_levels(order_book.get(0)),
                        bids: Self::side_levels(order_book.get(1)),
                    };
                    book::sort(&mut levels);
                    *self.levels.lock() = levels.clone();
                    sink.online(Connectivity::Connected);
                    sink.levels(levels);
                }
                Some("o") => {
                    let side = if entry.get(1).map(num).unwrap_or(0.0) == 1.0 {
                        Side::Bid
                    } else {
                        Side::Ask
                    };
                    let price = entry.get(2).map(num).unwrap_or(0.0);
                    let size = entry.get(3).map(num).unwrap_or(0.0);
                    let mut levels = self.levels.lock();
                    book::apply(&mut levels, side, price, size);
                    sink.levels(levels.clone());
                }
                Some("t") => {
                    sink.trade(Trade {
                        side: if entry.get(2).map(num).unwrap_or(0.0) == 1.0 {
                            Side::Bid
                        } else {
                            Side::Ask
                        },
                        price: entry.get(3).map(num).unwrap_or(0.0),
                        quantity: entry.get(4).map(num).unwrap_or(0.0),
                        time: entry
                            .get(5)
                            .and_then(Value::as_i64)
                            .map(|secs| secs * 1000)
                            .unwrap_or_else(|| ctx.now_ms()),
                    });
                }
                _ => {}
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
        let command = match req.side {
            Side::Bid => "buy",
            Side::Ask => "sell",
        };
        let mut params = vec![
            ("currencyPair", ctx.cfg.symbol.clone()),
            ("rate", req.price.clone()),
            ("amount", req.quantity.clone()),
            ("clientOrderId", req.order_id.clone()),
        ];
        match req.time_in_force {
            TimeInForce::Fok => params.push(("fillOrKill", "1".to_string())),
            TimeInForce::Ioc => params.push(("immediateOrCancel", "1".to_string())),
            TimeInForce::Gtc => {}
        }
        let ack = self.trading_api(ctx, command, params).await?;
        sink.order(Order {
            order_id: req.order_id.clone(),
            exchange_id: ack["orderNumber"].as_str().unwrap_or("").to_string(),
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
        self.trading_api(
            ctx,
            "cancelOrder",
            vec![("orderNumber", exchange_id.to_string())],
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
        let balances = self
            .trading_api(ctx, "returnCompleteBalances", Vec::new())
            .await?;
        let mut wallets = Wallets::default();
        for currency in [&ctx.cfg.base, &ctx.cfg.quote] {
            let raw = &balances[currency.as_str()];
            if raw.is_null() {
                continue;
            }
            let wallet = if currency == &ctx.cfg.base {
                &mut wallets.base
            } else {
                &mut wallets.quote
            };
            wallet.currency = currency.to_string();
            Wallet::reset(num(&raw["available"]), num(&raw["onOrders"]), wallet);
        }
        Ok(vec![wallets])
    }

    async fn sync_cancel_all(&self, ctx: &VenueCtx) -> Result<Vec<Order>> {
        let reply = self
            .trading_api(
                ctx,
                "cancelAllOrders",
                vec![("currencyPair", ctx.cfg.symbol.clone())],
            )
            .await?;
        let now = ctx.now_ms();
        Ok(reply["orderNumbers"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .map(|id| Order {
                        exchange_id: id
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| id.to_string()),
                        status: Status::Terminated,
                        time: now,
                        ..Order::default()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
