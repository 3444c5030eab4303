//! Behaviour of a whole gateway through its public surface: event ordering
//! around connectivity changes, handshake caching, and the order-command
//! preconditions that must never reach the wire.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use quotebot_gateway::clock::{Clock, ManualClock};
use quotebot_gateway::gateway::handshake::{cache_path, store, HandshakeReply};
use quotebot_gateway::gateway::{EventSink, VenueCtx};
use quotebot_gateway::venues::{Outbound, PlaceRequest, Venue, VenueProfile};
use quotebot_gateway::{new_gateway, Connectivity, Gateway, GatewayConfig, Order, Status};

/// Venue double that counts what the gateway actually sends its way and
/// acks orders the way a venue would.
#[derive(Default)]
struct CountingVenue {
    handshakes: AtomicUsize,
    places: AtomicUsize,
    cancels: AtomicUsize,
}

#[async_trait]
impl Venue for CountingVenue {
    fn profile(&self) -> VenueProfile {
        VenueProfile::ws_only("counting", "http://localhost:1", "ws://localhost:1")
    }

    async fn handshake(&self, _ctx: &VenueCtx) -> Result<HandshakeReply> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        Ok(complete_reply())
    }

    fn subscribe(&self, _ctx: &VenueCtx) -> Vec<Outbound> {
        Vec::new()
    }

    fn consume(&self, _msg: &Value, _ctx: &VenueCtx, _sink: &EventSink) -> Vec<Outbound> {
        Vec::new()
    }

    async fn place(
        &self,
        req: &PlaceRequest,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        let n = self.places.fetch_add(1, Ordering::SeqCst) + 1;
        sink.order(Order {
            order_id: req.order_id.clone(),
            exchange_id: format!("E-{n}"),
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
        self.cancels.fetch_add(1, Ordering::SeqCst);
        sink.order(Order {
            order_id: order_id.to_string(),
            exchange_id: exchange_id.to_string(),
            status: Status::Terminated,
            time: ctx.now_ms(),
            ..Order::default()
        });
        Ok(Vec::new())
    }
}

fn complete_reply() -> HandshakeReply {
    HandshakeReply {
        base: "BTC".into(),
        quote: "USD".into(),
        symbol: "BTCUSD".into(),
        tick_price: 0.5,
        tick_size: 0.001,
        min_size: 0.002,
        make_fee: 0.0008,
        take_fee: 0.0016,
        reply: serde_json::json!({"source": "test"}),
        ..HandshakeReply::default()
    }
}

fn counting_gateway(
    home: &std::path::Path,
) -> (Gateway, Arc<CountingVenue>, Arc<ManualClock>) {
    let mut cfg = GatewayConfig::new("counting", "BTC", "USD");
    cfg.home = home.to_path_buf();
    let venue = Arc::new(CountingVenue::default());
    let clock = ManualClock::at(chrono::Utc::now().timestamp_millis());
    (
        Gateway::new(cfg, venue.clone()).with_clock(clock.clone()),
        venue,
        clock,
    )
}

#[test]
fn disconnect_blanks_the_book_and_orders_the_transitions() {
    let home = tempfile::tempdir().unwrap();
    let (gateway, _venue, _clock) = counting_gateway(home.path());

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let books = Arc::new(Mutex::new(Vec::new()));
    let seen_transitions = transitions.clone();
    let seen_books = books.clone();
    gateway.on_connectivity(move |c| seen_transitions.lock().push(*c));
    gateway.on_levels(move |levels| seen_books.lock().push(levels.clone()));

    gateway.online(Connectivity::Connected);
    gateway.drain_events();
    gateway.online(Connectivity::Disconnected);
    gateway.drain_events();
    gateway.online(Connectivity::Connected);
    gateway.drain_events();

    assert_eq!(
        *transitions.lock(),
        vec![
            Connectivity::Connected,
            Connectivity::Disconnected,
            Connectivity::Connected
        ],
        "a Disconnected always lands before the next Connected"
    );
    let books = books.lock();
    assert_eq!(books.len(), 1, "only the transition down publishes a book");
    assert!(books[0].is_empty());
}

#[tokio::test]
async fn fresh_cache_answers_without_the_venue() {
    let home = tempfile::tempdir().unwrap();
    let path = cache_path(home.path(), "counting", "BTC", "USD");
    store(&path, &complete_reply()).unwrap();

    let (mut gateway, venue, _clock) = counting_gateway(home.path());
    let reply = gateway.handshake(false).await.unwrap();

    assert_eq!(venue.handshakes.load(Ordering::SeqCst), 0);
    assert_eq!(reply["source"], "test");
    assert_eq!(gateway.cfg.tick_price, 0.5);
    assert_eq!(gateway.decimal.price.step(), 0.5);
}

#[tokio::test]
async fn nocache_goes_to_the_venue_and_persists() {
    let home = tempfile::tempdir().unwrap();
    let (mut gateway, venue, _clock) = counting_gateway(home.path());

    gateway.handshake(true).await.unwrap();
    assert_eq!(venue.handshakes.load(Ordering::SeqCst), 1);

    let path = cache_path(home.path(), "counting", "BTC", "USD");
    assert!(path.exists(), "complete metadata is persisted");

    // The rewritten cache now satisfies a fresh gateway without a call.
    let (mut second, second_venue, _clock) = counting_gateway(home.path());
    second.handshake(false).await.unwrap();
    assert_eq!(second_venue.handshakes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn place_ack_measures_latency_on_the_live_path() {
    let home = tempfile::tempdir().unwrap();
    let (mut gateway, _venue, clock) = counting_gateway(home.path());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    gateway.on_order(move |order| captured.lock().push(order.clone()));

    let mut order = Order {
        order_id: "p-1".into(),
        price: 9_400.0,
        quantity: 1.0,
        time: clock.now_ms(),
        ..Order::default()
    };
    clock.advance(250);
    gateway.place(&order).await.unwrap();

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, Status::Working);
        assert_eq!(seen[0].exchange_id, "E-1");
        assert_eq!(seen[0].latency, 250, "first Working ack stamps the round trip");
        assert_eq!(seen[0].price, 9_400.0, "retained fields survive the ack");
    }

    // Adopt the venue id and cancel; the terminal event keeps the one-shot
    // measurement.
    order.exchange_id = "E-1".into();
    order.status = Status::Working;
    clock.advance(50);
    assert!(gateway.cancel(&mut order).await);
    let seen = seen.lock();
    let last = seen.last().unwrap();
    assert_eq!(last.status, Status::Terminated);
    assert_eq!(last.latency, 250);
}

#[tokio::test]
async fn cancel_preconditions_never_reach_the_wire() {
    let home = tempfile::tempdir().unwrap();
    let (mut gateway, venue, _clock) = counting_gateway(home.path());

    // Unacked order: no exchange id yet.
    let mut order = Order {
        order_id: "c-1".into(),
        status: Status::Working,
        ..Order::default()
    };
    assert!(!gateway.cancel(&mut order).await);
    assert_eq!(venue.cancels.load(Ordering::SeqCst), 0);

    order.exchange_id = "E-1".into();
    assert!(gateway.cancel(&mut order).await);
    assert_eq!(venue.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(order.status, Status::Waiting);

    // Double cancel is refused locally.
    assert!(!gateway.cancel(&mut order).await);
    assert_eq!(venue.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn replace_needs_venue_support() {
    // Binance has no modify endpoint; the gateway refuses locally.
    let mut binance = new_gateway(GatewayConfig::new("binance", "BTC", "USDT")).unwrap();
    let mut order = Order {
        order_id: "r-1".into(),
        exchange_id: "E-9".into(),
        status: Status::Working,
        price: 100.0,
        ..Order::default()
    };
    assert!(!binance.replace(&mut order, 101.0, false).await);
    assert_eq!(order.price, 100.0, "refused replace leaves the order alone");

    // BitMEX advertises replace, but an unacked order is still refused.
    let mut bitmex = new_gateway(GatewayConfig::new("bitmex", "XBT", "USD")).unwrap();
    let mut unacked = Order {
        order_id: "r-2".into(),
        ..Order::default()
    };
    assert!(!bitmex.replace(&mut unacked, 5.0, false).await);
}
