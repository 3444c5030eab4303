//! Venue-agnostic market and order data model.
//!
//! Every adapter normalises venue payloads into these records before they
//! reach the event channels, so the upper layers never see venue JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway connectivity as seen by the upper layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    Disconnected,
    Connected,
}

impl Connectivity {
    pub fn is_connected(&self) -> bool {
        matches!(self, Connectivity::Connected)
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Not acknowledged by the venue, or cancellation in flight.
    Waiting,
    Working,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Bid,
    Ask,
}

impl<'de> Deserialize<'de> for Side {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(match String::deserialize(d)?.as_str() {
            "Bid" => Side::Bid,
            _ => Side::Ask,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl<'de> Deserialize<'de> for OrderType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(match String::deserialize(d)?.as_str() {
            "Limit" => OrderType::Limit,
            _ => OrderType::Market,
        })
    }
}

/// Unknown inbound values fall back to IOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Fok,
    Ioc,
}

impl<'de> Deserialize<'de> for TimeInForce {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(match String::deserialize(d)?.as_str() {
            "GTC" => TimeInForce::Gtc,
            "FOK" => TimeInForce::Fok,
            _ => TimeInForce::Ioc,
        })
    }
}

/// Contract style of the traded symbol: Inverse is coin-margined,
/// Linear is quote-margined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Future {
    Spot,
    Inverse,
    Linear,
}

impl Future {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Future::Inverse,
            2 => Future::Linear,
            _ => Future::Spot,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Future::Spot => 0,
            Future::Inverse => 1,
            Future::Linear => 2,
        }
    }
}

impl Serialize for Future {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Future {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Future::from_u8(u8::deserialize(d)?))
    }
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// A single price point. A size of zero marks a deletion on push updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: f64,
}

impl Level {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

/// Top-of-book ladder: bids descending, asks ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl Levels {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Per-currency balance. `amount` is free, `held` is locked in orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(default, skip_serializing)]
    pub currency: String,
    pub amount: f64,
    pub held: f64,
    #[serde(default, skip_serializing)]
    pub total: f64,
    pub value: f64,
    pub profit: f64,
}

impl Wallet {
    /// The only way `amount`/`held`/`total` are set together.
    pub fn reset(amount: f64, held: f64, wallet: &mut Wallet) {
        wallet.amount = amount;
        wallet.held = held;
        wallet.total = amount + held;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wallets {
    pub base: Wallet,
    pub quote: Wallet,
}

/// A public trade print, time in milliseconds since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub time: i64,
}

/// One working or in-flight order.
///
/// `order_id` is assigned by us before the order leaves the gateway and never
/// changes; `exchange_id` stays empty until the venue acks and is never
/// cleared afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub exchange_id: String,
    pub side: Side,
    pub quantity: f64,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub is_pong: bool,
    pub price: f64,
    pub time_in_force: TimeInForce,
    pub status: Status,
    pub time: i64,
    pub latency: i64,
    #[serde(skip)]
    pub filled: f64,
    pub manual: bool,
}

impl Default for Side {
    fn default() -> Self {
        Side::Bid
    }
}

impl Default for OrderType {
    fn default() -> Self {
        OrderType::Limit
    }
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::Gtc
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Waiting
    }
}

impl Order {
    /// Fold a raw venue order event into a tracked order.
    ///
    /// The first transition to Working stamps `latency` with the
    /// place-to-ack round trip; later Working events leave it alone.
    /// A Terminated order is read-only.
    pub fn update(raw: &Order, order: &mut Order) {
        if order.status == Status::Terminated {
            return;
        }
        order.status = raw.status;
        if order.status == Status::Working && order.latency == 0 {
            order.latency = raw.time - order.time;
        }
        order.time = raw.time;
        if !raw.exchange_id.is_empty() {
            order.exchange_id = raw.exchange_id.clone();
        }
        if raw.price != 0.0 {
            order.price = raw.price;
        }
        if raw.quantity != 0.0 {
            order.quantity = raw.quantity;
        }
    }

    /// In-place price move, only possible once the venue knows the order.
    pub fn replace(price: f64, is_pong: bool, now: i64, order: &mut Order) -> bool {
        if order.exchange_id.is_empty() || order.status == Status::Terminated {
            return false;
        }
        order.price = price;
        order.is_pong = is_pong;
        order.time = now;
        true
    }

    /// Flag a cancellation in flight. Refused while one already is.
    pub fn cancel(now: i64, order: &mut Order) -> bool {
        if order.exchange_id.is_empty()
            || order.status == Status::Waiting
            || order.status == Status::Terminated
        {
            return false;
        }
        order.status = Status::Waiting;
        order.time = now;
        true
    }

    /// Tolerant decode of an order sent down from the upper layer.
    pub fn from_json(j: &Value, now: i64) -> Order {
        let s = |key: &str| j.get(key).and_then(Value::as_str).unwrap_or("");
        let f = |key: &str| j.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        Order {
            order_id: s("orderId").to_string(),
            price: f("price"),
            quantity: f("quantity"),
            time: j.get("time").and_then(Value::as_i64).unwrap_or(now),
            side: if s("side") == "Bid" { Side::Bid } else { Side::Ask },
            order_type: if s("type") == "Limit" {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            time_in_force: match s("timeInForce") {
                "GTC" => TimeInForce::Gtc,
                "FOK" => TimeInForce::Fok,
                _ => TimeInForce::Ioc,
            },
            manual: j.get("manual").and_then(Value::as_bool).unwrap_or(false),
            ..Order::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn working_ack(exchange_id: &str, time: i64) -> Order {
        Order {
            exchange_id: exchange_id.to_string(),
            status: Status::Working,
            time,
            ..Order::default()
        }
    }

    #[test]
    fn update_measures_ack_latency_once() {
        let mut order = Order {
            order_id: "a1".into(),
            time: 1_000,
            ..Order::default()
        };

        Order::update(&working_ack("E-1", 1_250), &mut order);
        assert_eq!(order.latency, 250);
        assert_eq!(order.exchange_id, "E-1");
        assert_eq!(order.time, 1_250);

        // A second Working event must not re-measure.
        Order::update(&working_ack("", 9_000), &mut order);
        assert_eq!(order.latency, 250);
        assert_eq!(order.exchange_id, "E-1");
    }

    #[test]
    fn update_keeps_known_fields_on_empty_raw() {
        let mut order = Order {
            exchange_id: "E-2".into(),
            price: 101.5,
            quantity: 0.25,
            status: Status::Working,
            latency: 10,
            ..Order::default()
        };
        Order::update(
            &Order {
                status: Status::Working,
                time: 5,
                ..Order::default()
            },
            &mut order,
        );
        assert_eq!(order.exchange_id, "E-2");
        assert_eq!(order.price, 101.5);
        assert_eq!(order.quantity, 0.25);
    }

    #[test]
    fn terminated_is_absorbing() {
        let mut order = Order {
            exchange_id: "E-3".into(),
            status: Status::Terminated,
            time: 77,
            ..Order::default()
        };
        Order::update(&working_ack("E-9", 99), &mut order);
        assert_eq!(order.status, Status::Terminated);
        assert_eq!(order.exchange_id, "E-3");
        assert_eq!(order.time, 77);

        assert!(!Order::replace(5.0, false, 100, &mut order));
        assert!(!Order::cancel(100, &mut order));
    }

    #[test]
    fn replace_requires_exchange_id() {
        let mut order = Order::default();
        assert!(!Order::replace(10.0, true, 42, &mut order));

        order.exchange_id = "E-4".into();
        assert!(Order::replace(10.0, true, 42, &mut order));
        assert_eq!(order.price, 10.0);
        assert!(order.is_pong);
        assert_eq!(order.time, 42);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut order = Order {
            exchange_id: "E-5".into(),
            status: Status::Working,
            time: 1,
            ..Order::default()
        };
        assert!(Order::cancel(50, &mut order));
        assert_eq!(order.status, Status::Waiting);
        assert_eq!(order.time, 50);

        // Second cancel is refused and leaves time untouched.
        assert!(!Order::cancel(60, &mut order));
        assert_eq!(order.time, 50);
    }

    #[test]
    fn wallet_reset_total_is_exact() {
        let mut wallet = Wallet::default();
        Wallet::reset(0.1, 0.2, &mut wallet);
        assert_eq!(wallet.total, 0.1 + 0.2);
        assert_eq!(wallet.amount, 0.1);
        assert_eq!(wallet.held, 0.2);
    }

    #[test]
    fn order_json_round_trip() {
        let sent = json!({
            "orderId": "oid-7",
            "price": 420.25,
            "quantity": 0.5,
            "side": "Bid",
            "type": "Limit",
            "timeInForce": "GTC",
            "manual": true,
        });
        let order = Order::from_json(&sent, 1_234);
        let back = serde_json::to_value(&order).unwrap();
        for key in ["orderId", "price", "quantity", "side", "type", "timeInForce", "manual"] {
            assert_eq!(back[key], sent[key], "field {key}");
        }
        assert_eq!(order.time, 1_234);
    }

    #[test]
    fn unknown_time_in_force_defaults_to_ioc() {
        let order = Order::from_json(&json!({"timeInForce": "GTD"}), 0);
        assert_eq!(order.time_in_force, TimeInForce::Ioc);
        let tif: TimeInForce = serde_json::from_value(json!("DAY")).unwrap();
        assert_eq!(tif, TimeInForce::Ioc);
    }

    #[test]
    fn level_serializes_zero_size_as_deletion_marker() {
        let j = serde_json::to_value(Level::new(9.5, 0.0)).unwrap();
        assert!(j.get("size").is_none());
        let j = serde_json::to_value(Level::new(9.5, 2.0)).unwrap();
        assert_eq!(j["size"], 2.0);
    }
}
