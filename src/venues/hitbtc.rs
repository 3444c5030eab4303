//! HitBtc adapter, doubling as Bequant which runs the same engine behind
//! different endpoints.
//!
//! Auth is plain HTTP basic; the socket pushes one book snapshot followed by
//! incremental updates where a zero size removes the row.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{auth, book, num, send, tif_str, Outbound, PlaceRequest, RandId, Venue, VenueProfile};
use crate::gateway::handshake::HandshakeReply;
use crate::gateway::{EventSink, VenueCtx};
use crate::models::{
    Connectivity, Level, Levels, Order, OrderType, Side, Status, Trade, Wallet, Wallets,
};

pub struct HitBtc {
    exchange: &'static str,
    http: &'static str,
    ws: &'static str,
    web_market: &'static str,
    web_orders: &'static str,
    levels: Mutex<Levels>,
}

impl HitBtc {
    pub fn new() -> Self {
        Self {
            exchange: "hitbtc",
            http: "https://api.hitbtc.com/api/2",
            ws: "wss://api.hitbtc.com/api/2/ws",
            web_market: "https://hitbtc.com/exchange/",
            web_orders: "https://hitbtc.com/reports/orders",
            levels: Mutex::new(Levels::default()),
        }
    }

    pub fn bequant() -> Self {
        Self {
            exchange: "bequant",
            http: "https://api.bequant.io/api/2",
            ws: "wss://api.bequant.io/api/2/ws",
            web_market: "https://bequant.io/exchange/",
            web_orders: "https://bequant.io/reports/orders",
            levels: Mutex::new(Levels::default()),
        }
    }

    fn basic(&self, ctx: &VenueCtx) -> String {
        auth::basic(&ctx.cfg.apikey, &ctx.cfg.secret)
    }

    fn order_from(raw: &Value, now: i64) -> Order {
        let status = match raw["status"].as_str().unwrap_or("") {
            "new" | "partiallyFilled" => Status::Working,
            "" => Status::Waiting,
            _ => Status::Terminated,
        };
        Order {
            order_id: raw["clientOrderId"].as_str().unwrap_or("").to_string(),
            exchange_id: raw["id"]
                .as_i64()
                .map(|id| id.to_string())
                .unwrap_or_else(|| raw["id"].as_str().unwrap_or("").to_string()),
            price: num(&raw["price"]),
            quantity: num(&raw["quantity"]),
            filled: num(&raw["cumQuantity"]),
            status,
            time: now,
            ..Order::default()
        }
    }
}

fn obj_levels(rows: Option<&Value>) -> Vec<Level> {
    rows.and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| Level::new(num(&row["price"]), num(&row["size"])))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Venue for HitBtc {
    fn profile(&self) -> VenueProfile {
        let mut profile = VenueProfile::ws_only(self.exchange, self.http, self.ws);
        profile.web_market = self.web_market.into();
        profile.web_orders = self.web_orders.into();
        profile.rand_id = RandId::Uuid32;
        profile.ask_for_cancel_all = true;
        profile
    }

    async fn handshake(&self, ctx: &VenueCtx) -> Result<HandshakeReply> {
        let cfg = &ctx.cfg;
        let symbol = send(ctx.http.get(format!(
            "{}/public/symbol/{}{}",
            cfg.http, cfg.base, cfg.quote
        )))
        .await?;

        let alias = |currency: &str| {
            if currency == "USDT" {
                "USD".to_string()
            } else {
                currency.to_string()
            }
        };
        Ok(HandshakeReply {
            base: alias(&cfg.base),
            quote: alias(&cfg.quote),
            symbol: format!("{}{}", cfg.base, cfg.quote),
            web_market: format!("{}{}-to-{}", cfg.web_market, cfg.base, cfg.quote),
            web_orders: cfg.web_orders.clone(),
            tick_price: num(&symbol["tickSize"]),
            tick_size: num(&symbol["quantityIncrement"]),
            min_size: num(&symbol["quantityIncrement"]),
            make_fee: num(&symbol["provideLiquidityRate"]),
            take_fee: num(&symbol["takeLiquidityRate"]),
            reply: symbol,
            ..HandshakeReply::default()
        })
    }

    fn subscribe(&self, ctx: &VenueCtx) -> Vec<Outbound> {
        let symbol = &ctx.cfg.symbol;
        vec![
            Outbound::Public(
                json!({"method": "subscribeOrderbook", "params": {"symbol": symbol}, "id": 1})
                    .to_string(),
            ),
            Outbound::Public(
                json!({"method": "subscribeTrades", "params": {"symbol": symbol}, "id": 2})
                    .to_string(),
            ),
        ]
    }

    fn consume(&self, msg: &Value, ctx: &VenueCtx, sink: &EventSink) -> Vec<Outbound> {
        if msg.get("result").and_then(Value::as_bool) == Some(true) {
            sink.online(Connectivity::Connected);
            return Vec::new();
        }
        let params = &msg["params"];
        match msg.get("method").and_then(Value::as_str) {
            Some("snapshotOrderbook") => {
                let mut levels = Levels {
                    bids: obj_levels(params.get("bid")),
                    asks: obj_levels(params.get("ask")),
                };
                book::sort(&mut levels);
                *self.levels.lock() = levels.clone();
                sink.levels(levels);
            }
            Some("updateOrderbook") => {
                let mut levels = self.levels.lock();
                for row in obj_levels(params.get("bid")) {
                    book::apply(&mut levels, Side::Bid, row.price, row.size);
                }
                for row in obj_levels(params.get("ask")) {
                    book::apply(&mut levels, Side::Ask, row.price, row.size);
                }
                sink.levels(levels.clone());
            }
            Some("updateTrades") => {
                for print in params["data"].as_array().into_iter().flatten() {
                    sink.trade(Trade {
                        side: if print["side"].as_str() == Some("buy") {
                            Side::Bid
                        } else {
                            Side::Ask
                        },
                        price: num(&print["price"]),
                        quantity: num(&print["quantity"]),
                        time: print["timestamp"]
                            .as_str()
                            .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                            .map(|ts| ts.timestamp_millis())
                            .unwrap_or_else(|| ctx.now_ms()),
                    });
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
        let cfg = &ctx.cfg;
        let mut form = vec![
            ("symbol", cfg.symbol.clone()),
            (
                "side",
                match req.side {
                    Side::Bid => "buy".to_string(),
                    Side::Ask => "sell".to_string(),
                },
            ),
            ("quantity", req.quantity.clone()),
            (
                "type",
                match req.order_type {
                    OrderType::Limit => "limit".to_string(),
                    OrderType::Market => "market".to_string(),
                },
            ),
            ("timeInForce", tif_str(req.time_in_force).to_string()),
        ];
        if req.order_type == OrderType::Limit {
            form.push(("price", req.price.clone()));
        }
        let url = format!("{}/order/{}", cfg.http, req.order_id);
        let ack = send(
            ctx.http
                .put(&url)
                .header("Authorization", self.basic(ctx))
                .form(&form),
        )
        .await?;
        sink.order(Self::order_from(&ack, ctx.now_ms()));
        Ok(Vec::new())
    }

    async fn cancel(
        &self,
        order_id: &str,
        _exchange_id: &str,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let url = format!("{}/order/{}", ctx.cfg.http, order_id);
        let ack = send(ctx.http.delete(&url).header("Authorization", self.basic(ctx))).await?;
        sink.order(Self::order_from(&ack, ctx.now_ms()));
        Ok(Vec::new())
    }

    async fn sync_wallet(&self, ctx: &VenueCtx) -> Result<Vec<Wallets>> {
        let url = format!("{}/trading/balance", ctx.cfg.http);
        let balances = send(ctx.http.get(&url).header("Authorization", self.basic(ctx))).await?;

        let mut wallets = Wallets::default();
        for balance in balances.as_array().into_iter().flatten() {
            let currency = balance["currency"].as_str().unwrap_or("");
            let wallet = if currency == ctx.cfg.base {
                &mut wallets.base
            } else if currency == ctx.cfg.quote {
                &mut wallets.quote
            } else {
                continue;
            };
            wallet.currency = currency.to_string();
            Wallet::reset(num(&balance["available"]), num(&balance["reserved"]), wallet);
        }
        Ok(vec![wallets])
    }

    /// One DELETE kills every open order on the account.
    async fn sync_cancel_all(&self, ctx: &VenueCtx) -> Result<Vec<Order>> {
        let url = format!("{}/order", ctx.cfg.http);
        let cancelled = send(ctx.http.delete(&url).header("Authorization", self.basic(ctx))).await?;
        let now = ctx.now_ms();
        Ok(cancelled
            .as_array()
            .map(|orders| orders.iter().map(|raw| Self::order_from(raw, now)).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::testutil::{ctx_for, sink_pair};
    use std::sync::Arc;

    #[test]
    fn bequant_is_the_same_engine_elsewhere() {
        let hitbtc = HitBtc::new().profile();
        let bequant = HitBtc::bequant().profile();
        assert_eq!(hitbtc.rand_id, bequant.rand_id);
        assert_ne!(hitbtc.http, bequant.http);
        assert!(bequant.ws.contains("bequant.io"));
    }

    #[test]
    fn incremental_update_deletes_on_zero_size() {
        let ctx = ctx_for("hitbtc", "BTCUSD");
        let (events, sink) = sink_pair();
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        events.levels.write(move |l: &Levels| *captured.lock() = Some(l.clone()));

        let hitbtc = HitBtc::new();
        hitbtc.consume(
            &json!({
                "method": "snapshotOrderbook",
                "params": {
                    "bid": [{"price": "9400", "size": "1"}],
                    "ask": [{"price": "9401", "size": "2"}, {"price": "9402", "size": "1"}],
                },
            }),
            &ctx,
            &sink,
        );
        hitbtc.consume(
            &json!({
                "method": "updateOrderbook",
                "params": {"bid": [], "ask": [{"price": "9401", "size": "0"}]},
            }),
            &ctx,
            &sink,
        );
        events.drain();

        let levels = seen.lock().clone().unwrap();
        assert_eq!(levels.asks.len(), 1);
        assert_eq!(levels.asks[0].price, 9402.0);
        assert_eq!(levels.bids.len(), 1);
    }

    #[test]
    fn order_status_mapping() {
        let working = HitBtc::order_from(
            &json!({"clientOrderId": "c", "id": 42, "status": "partiallyFilled", "price": "9", "quantity": "2"}),
            5,
        );
        assert_eq!(working.status, Status::Working);
        assert_eq!(working.exchange_id, "42");

        let done = HitBtc::order_from(&json!({"status": "canceled"}), 5);
        assert_eq!(done.status, Status::Terminated);
    }
}
