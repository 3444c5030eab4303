//! The gateway core: one venue adapter plus one transport variant behind a
//! uniform event contract.
//!
//! A driver task owns all socket state. Reader tasks only forward raw frames
//! into its queue, so frame handling, the 1 Hz tick and order commands never
//! race each other. The upper layer talks to a running gateway through
//! [`Command`]s and receives everything back through the typed event
//! channels.

pub mod config;
pub mod factory;
pub mod handshake;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::channel::AsyncEvent;
use crate::clock::{Clock, SystemClock};
use crate::decimal::Decimals;
use crate::models::{Connectivity, Levels, Order, Status, Trade, Wallets};
use crate::transport::fix::FixLink;
use crate::transport::gate::{SocketGate, SubscriptionFlip};
use crate::transport::ws::WsLink;
use crate::transport::{Frame, FrameSource};
use crate::venues::{Outbound, PlaceRequest, RandId, TransportKind, Venue};

pub use config::GatewayConfig;

/// The five typed event channels of one gateway.
pub struct Events {
    pub connectivity: AsyncEvent<Connectivity>,
    pub wallets: AsyncEvent<Wallets>,
    pub levels: AsyncEvent<Levels>,
    pub orders: AsyncEvent<Order>,
    pub cancel_all: AsyncEvent<Order>,
    pub trades: AsyncEvent<Trade>,
}

impl Events {
    pub(crate) fn new() -> Self {
        Self {
            // Freshness beats history for connectivity and the book.
            connectivity: AsyncEvent::latest(),
            levels: AsyncEvent::latest(),
            wallets: AsyncEvent::queue(),
            orders: AsyncEvent::queue(),
            cancel_all: AsyncEvent::queue(),
            trades: AsyncEvent::queue(),
        }
    }

    /// Deliver everything buffered to the installed handlers.
    pub fn drain(&self) {
        self.connectivity.drain();
        self.wallets.drain();
        self.levels.drain();
        self.trades.drain();
        self.orders.drain();
        self.cancel_all.drain();
    }

    fn close(&self) {
        self.connectivity.close();
        self.wallets.close();
        self.levels.close();
        self.trades.close();
        self.orders.close();
        self.cancel_all.close();
    }
}

/// Which polls this tick owes: wallets every 15 s (or right now when the
/// fees latch is set), bulk-cancel refresh every 300 s, and neither when
/// the venue pushes that data itself.
pub(crate) fn poll_plan(
    tick: u32,
    fees_due: bool,
    ask_for_cancel_all: bool,
    async_wallet: bool,
    async_cancel_all: bool,
) -> (bool, bool) {
    let wallet = (fees_due || tick % 15 == 0) && !async_wallet;
    let cancel_all = ask_for_cancel_all && tick % 300 == 0 && !async_cancel_all;
    (wallet, cancel_all)
}

/// Truncate both book sides to at most `max_level` rows.
pub fn reduce(levels: &mut Levels, max_level: usize) {
    if max_level > 0 {
        levels.bids.truncate(max_level);
        levels.asks.truncate(max_level);
    }
}

/// Publish side handed to venue adapters.
///
/// Order events do not pass through raw: the sink keeps every order the
/// gateway placed and folds each venue ack or push into it with
/// [`Order::update`], which is where the one-shot place-to-ack latency and
/// the monotonic lifecycle rules are enforced on the live path.
#[derive(Clone)]
pub struct EventSink {
    events: Arc<Events>,
    max_level: usize,
    orders: Arc<Mutex<HashMap<String, Order>>>,
}

impl EventSink {
    pub(crate) fn with_events(events: Arc<Events>, max_level: usize) -> Self {
        Self {
            events,
            max_level,
            orders: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Connectivity transition; going down also blanks the book.
    pub fn online(&self, connectivity: Connectivity) {
        self.events.connectivity.try_write(connectivity);
        if !connectivity.is_connected() {
            self.events.levels.try_write(Levels::default());
        }
    }

    pub fn levels(&self, mut levels: Levels) {
        reduce(&mut levels, self.max_level);
        self.events.levels.try_write(levels);
    }

    pub fn wallets(&self, wallets: Wallets) {
        self.events.wallets.try_write(wallets);
    }

    /// Start following an order so venue events fold into it.
    pub fn track(&self, order: Order) {
        if !order.order_id.is_empty() {
            self.orders.lock().insert(order.order_id.clone(), order);
        }
    }

    /// Fold a raw venue order event into the order it belongs to, then
    /// publish the result. Events for orders the gateway never placed pass
    /// through unchanged; a terminal event ends the tracking.
    pub fn order(&self, raw: Order) {
        let mut tracked = self.orders.lock();
        let key = if !raw.order_id.is_empty() && tracked.contains_key(&raw.order_id) {
            Some(raw.order_id.clone())
        } else if !raw.exchange_id.is_empty() {
            // Venue pushes often only echo their own id.
            tracked
                .values()
                .find(|order| order.exchange_id == raw.exchange_id)
                .map(|order| order.order_id.clone())
        } else {
            None
        };
        let event = match key.and_then(|key| tracked.remove_entry(&key)) {
            Some((key, mut order)) => {
                Order::update(&raw, &mut order);
                if order.status != Status::Terminated {
                    tracked.insert(key, order.clone());
                }
                order
            }
            None => raw,
        };
        drop(tracked);
        self.events.orders.try_write(event);
    }

    pub fn trade(&self, trade: Trade) {
        self.events.trades.try_write(trade);
    }
}

/// Read-only context venue adapters get for REST calls and signing.
#[derive(Clone)]
pub struct VenueCtx {
    pub cfg: Arc<GatewayConfig>,
    pub http: reqwest::Client,
    pub clock: Arc<dyn Clock>,
}

impl VenueCtx {
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}

/// Commands accepted by a running gateway driver.
#[derive(Debug)]
pub enum Command {
    Place(Order),
    Cancel(Order),
    Purge(bool),
    End,
}

pub struct Gateway {
    pub cfg: GatewayConfig,
    pub decimal: Decimals,
    venue: Arc<dyn Venue>,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    events: Arc<Events>,
    orders: Arc<Mutex<HashMap<String, Order>>>,
    transport: TransportKind,
    gate: SocketGate,
    public: Option<WsLink>,
    twin: Option<WsLink>,
    fix: Option<FixLink>,
    public_up: bool,
    private_up: bool,
    frames_tx: mpsc::UnboundedSender<Frame>,
    frames_rx: Option<mpsc::UnboundedReceiver<Frame>>,
    rand_id: RandId,
    ask_for_fees: bool,
    pub ask_for_replace: bool,
    pub ask_for_cancel_all: bool,
}

impl Gateway {
    pub fn new(mut cfg: GatewayConfig, venue: Arc<dyn Venue>) -> Self {
        let profile = venue.profile();
        if cfg.http.is_empty() {
            cfg.http = profile.http.clone();
        }
        if cfg.ws.is_empty() {
            cfg.ws = profile.ws.clone();
        }
        if cfg.fix.is_empty() {
            cfg.fix = profile.fix.clone();
        }
        if cfg.web_market.is_empty() {
            cfg.web_market = profile.web_market.clone();
        }
        if cfg.web_orders.is_empty() {
            cfg.web_orders = profile.web_orders.clone();
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("quotebot-gateway/0.1")
            .build()
            .expect("reqwest client");
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        Self {
            cfg,
            decimal: Decimals::default(),
            venue,
            clock: Arc::new(SystemClock),
            http,
            events: Arc::new(Events::new()),
            orders: Arc::new(Mutex::new(HashMap::new())),
            transport: profile.transport,
            gate: SocketGate::default(),
            public: None,
            twin: None,
            fix: None,
            public_up: false,
            private_up: false,
            frames_tx,
            frames_rx: Some(frames_rx),
            rand_id: profile.rand_id,
            ask_for_fees: false,
            ask_for_replace: profile.ask_for_replace,
            ask_for_cancel_all: profile.ask_for_cancel_all,
        }
    }

    /// Swap in a deterministic clock; used by tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Generate a client order id in the venue's accepted shape.
    pub fn rand_id(&self) -> String {
        self.rand_id.generate()
    }

    // ------------------------------------------------------------------
    // Event wiring
    // ------------------------------------------------------------------

    pub fn on_connectivity<F: Fn(&Connectivity) + Send + Sync + 'static>(&self, cb: F) {
        self.events.connectivity.write(cb);
    }

    pub fn on_wallets<F: Fn(&Wallets) + Send + Sync + 'static>(&self, cb: F) {
        self.events.wallets.write(cb);
    }

    pub fn on_levels<F: Fn(&Levels) + Send + Sync + 'static>(&self, cb: F) {
        self.events.levels.write(cb);
    }

    /// One handler covers both the order channel and bulk-cancel results.
    pub fn on_order<F: Fn(&Order) + Send + Sync + 'static>(&self, cb: F) {
        let cb = Arc::new(cb);
        let first = cb.clone();
        self.events.orders.write(move |order| first(order));
        self.events.cancel_all.write(move |order| cb(order));
    }

    pub fn on_trade<F: Fn(&Trade) + Send + Sync + 'static>(&self, cb: F) {
        self.events.trades.write(cb);
    }

    pub fn drain_events(&self) {
        self.events.drain();
    }

    pub(crate) fn sink(&self) -> EventSink {
        EventSink {
            events: self.events.clone(),
            max_level: self.cfg.max_level,
            orders: self.orders.clone(),
        }
    }

    pub(crate) fn ctx(&self) -> VenueCtx {
        VenueCtx {
            cfg: Arc::new(self.cfg.clone()),
            http: self.http.clone(),
            clock: self.clock.clone(),
        }
    }

    pub(crate) fn venue(&self) -> &Arc<dyn Venue> {
        &self.venue
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(crate) fn print(&self, reason: &str) {
        info!(gw = %self.cfg.exchange, "{reason}");
    }

    pub fn online(&self, connectivity: Connectivity) {
        self.sink().online(connectivity);
    }

    // ------------------------------------------------------------------
    // Connectivity state machine
    // ------------------------------------------------------------------

    /// Connected means every channel the transport needs is up.
    pub fn connected(&self) -> bool {
        match self.transport {
            TransportKind::Ws => self.public_up,
            TransportKind::WsTwin | TransportKind::WsFix => self.public_up && self.private_up,
        }
    }

    async fn connect(&mut self) {
        let frames = self.frames_tx.clone();
        match WsLink::open(&self.cfg.ws, FrameSource::Public, frames.clone()).await {
            Ok(link) => {
                self.public = Some(link);
                self.public_up = true;
            }
            Err(e) => {
                self.reconnect(&format!("connect error: {e:#}")).await;
                return;
            }
        }
        match self.transport {
            TransportKind::Ws => {}
            TransportKind::WsTwin => {
                let url = self.venue.twin(&self.cfg.ws);
                match WsLink::open(&url, FrameSource::Private, frames).await {
                    Ok(link) => {
                        self.twin = Some(link);
                        self.private_up = true;
                        self.print("WS Streaming orders");
                    }
                    Err(e) => self.reconnect(&format!("connect error: {e:#}")).await,
                }
            }
            TransportKind::WsFix => {
                let ctx = self.ctx();
                let venue = self.venue.clone();
                let target = venue.fix_target();
                let now = self.clock.now_ms();
                match FixLink::open(
                    &self.cfg.fix,
                    &self.cfg.apikey,
                    &target,
                    now,
                    |seq, time| venue.fix_logon(&ctx, seq, time),
                    frames,
                )
                .await
                {
                    Ok(link) => {
                        self.fix = Some(link);
                        self.private_up = true;
                        self.print("FIX Logon, streaming orders");
                    }
                    Err(e) => self.reconnect(&format!("connect FIX error: {e:#}")).await,
                }
            }
        }
    }

    /// Order channel goes first, public socket last.
    async fn disconnect(&mut self) {
        if let Some(fix) = self.fix.take() {
            if self.private_up {
                self.print("FIX Logout");
            }
            fix.close(self.clock.now_ms()).await;
        }
        if let Some(twin) = self.twin.take() {
            twin.close().await;
        }
        if let Some(public) = self.public.take() {
            public.close().await;
        }
        self.public_up = false;
        self.private_up = false;
    }

    async fn reconnect(&mut self, reason: &str) {
        self.disconnect().await;
        let countdown = self.gate.arm();
        self.print(&format!("WS {reason}, reconnecting in {countdown}s."));
    }

    async fn subscribe(&mut self) {
        let outbound = self.venue.subscribe(&self.ctx());
        self.send_outbound(outbound).await;
    }

    async fn send_outbound(&mut self, frames: Vec<Outbound>) {
        for frame in frames {
            let sent = match frame {
                Outbound::Public(msg) => match &mut self.public {
                    Some(link) => link.emit(&msg).await,
                    None => Ok(()),
                },
                Outbound::Private(msg) => match &mut self.twin {
                    Some(link) => link.emit(&msg).await,
                    None => Ok(()),
                },
                Outbound::Fix(msg_type, fields) => {
                    let now = self.clock.now_ms();
                    match &mut self.fix {
                        Some(link) => link.beam(&msg_type, &fields, now).await,
                        None => Ok(()),
                    }
                }
            };
            if let Err(e) = sent {
                self.print(&format!("WS send error: {e:#}"));
            }
        }
    }

    // ------------------------------------------------------------------
    // Tick driver
    // ------------------------------------------------------------------

    /// The loop's 1 Hz re-entry point.
    pub async fn ask_for_data(&mut self, tick: u32) {
        if self.gate.tick() {
            self.connect().await;
        }
        match self.gate.poll_subscription(self.connected()) {
            SubscriptionFlip::Subscribe => self.subscribe().await,
            SubscriptionFlip::Lost => {
                self.online(Connectivity::Disconnected);
                self.reconnect("Disconnected").await;
            }
            SubscriptionFlip::None => {}
        }
        if self.gate.is_subscribed() {
            self.ask_for_never_async_data(tick);
        }
    }

    /// Arm polls for data the venue will not push on its own.
    fn ask_for_never_async_data(&mut self, tick: u32) {
        let fees_due = std::mem::take(&mut self.ask_for_fees);
        let (wallet, cancel_all) = poll_plan(
            tick,
            fees_due,
            self.ask_for_cancel_all,
            self.venue.async_wallet(),
            self.venue.async_cancel_all(),
        );
        if wallet {
            self.events.wallets.ask_for();
        }
        if cancel_all {
            self.events.cancel_all.ask_for();
        }
    }

    /// Register the venue's poll fallbacks behind the armed channels.
    pub fn wait_for_data(&self) {
        let ctx = self.ctx();
        let venue = self.venue.clone();
        self.events.wallets.wait_for(move || {
            let venue = venue.clone();
            let ctx = ctx.clone();
            Box::pin(async move {
                match venue.sync_wallet(&ctx).await {
                    Ok(wallets) => wallets,
                    Err(e) => {
                        warn!(gw = %ctx.cfg.exchange, "wallet poll failed: {e:#}");
                        Vec::new()
                    }
                }
            })
        });
        let ctx = self.ctx();
        let venue = self.venue.clone();
        self.events.cancel_all.wait_for(move || {
            let venue = venue.clone();
            let ctx = ctx.clone();
            Box::pin(async move {
                match venue.sync_cancel_all(&ctx).await {
                    Ok(orders) => orders,
                    Err(e) => {
                        warn!(gw = %ctx.cfg.exchange, "cancel-all poll failed: {e:#}");
                        Vec::new()
                    }
                }
            })
        });
    }

    pub(crate) fn fees_unknown(&mut self, latch: bool) {
        self.ask_for_fees = latch;
    }

    async fn on_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Text(_, msg) => {
                if msg.is_empty() {
                    return;
                }
                match serde_json::from_str::<Value>(&msg) {
                    Ok(json) => {
                        let outbound = self.venue.consume(&json, &self.ctx(), &self.sink());
                        self.send_outbound(outbound).await;
                    }
                    Err(_) => self.print("WS Error: Unsupported data format"),
                }
            }
            Frame::Closed(source, reason) => {
                match source {
                    FrameSource::Public => self.public_up = false,
                    FrameSource::Private => self.private_up = false,
                }
                // A death before the first subscribe would never flip the
                // subscription latch, so re-arm here instead.
                if !self.gate.is_subscribed() {
                    self.reconnect(&reason).await;
                } else {
                    self.print(&format!("WS {reason}"));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Order commands
    // ------------------------------------------------------------------

    pub async fn place(&mut self, order: &Order) -> Result<()> {
        // Retain the order so the venue's ack folds into it; the retained
        // copy's time is what the first Working event measures latency
        // against.
        let mut tracked = order.clone();
        if tracked.time == 0 {
            tracked.time = self.clock.now_ms();
        }
        self.sink().track(tracked);

        let req = PlaceRequest {
            order_id: order.order_id.clone(),
            side: order.side,
            price: self.decimal.price.str(order.price),
            quantity: self.decimal.amount.str(order.quantity),
            order_type: order.order_type,
            time_in_force: order.time_in_force,
        };
        let outbound = self.venue.place(&req, &self.ctx(), &self.sink()).await?;
        self.send_outbound(outbound).await;
        self.events.drain();
        Ok(())
    }

    /// False when the venue has no modify endpoint or the order cannot be
    /// replaced yet; nothing is sent in that case.
    pub async fn replace(&mut self, order: &mut Order, price: f64, is_pong: bool) -> bool {
        if !self.ask_for_replace {
            return false;
        }
        if !Order::replace(price, is_pong, self.clock.now_ms(), order) {
            return false;
        }
        {
            let mut tracked = self.orders.lock();
            if let Some(entry) = tracked.get_mut(&order.order_id) {
                Order::replace(price, is_pong, order.time, entry);
            }
        }
        let formatted = self.decimal.price.str(order.price);
        match self
            .venue
            .replace(&order.exchange_id, &formatted, &self.ctx(), &self.sink())
            .await
        {
            Ok(outbound) => {
                self.send_outbound(outbound).await;
                self.events.drain();
                true
            }
            Err(e) => {
                self.print(&format!("replace error: {e:#}"));
                false
            }
        }
    }

    /// False when the order is unknown to the venue or a cancellation is
    /// already in flight; nothing is sent in that case.
    pub async fn cancel(&mut self, order: &mut Order) -> bool {
        if !Order::cancel(self.clock.now_ms(), order) {
            return false;
        }
        {
            let mut tracked = self.orders.lock();
            if let Some(entry) = tracked.get_mut(&order.order_id) {
                Order::cancel(order.time, entry);
            }
        }
        match self
            .venue
            .cancel(&order.order_id, &order.exchange_id, &self.ctx(), &self.sink())
            .await
        {
            Ok(outbound) => {
                self.send_outbound(outbound).await;
                self.events.drain();
                true
            }
            Err(e) => {
                self.print(&format!("cancel error: {e:#}"));
                false
            }
        }
    }

    /// Shutdown bulk cancel, skipped in dusty-bot mode.
    pub async fn purge(&mut self, dustybot: bool) {
        if dustybot {
            self.print("--dustybot is enabled, remember to cancel manually any open order.");
            return;
        }
        self.print("Attempting to cancel all open orders, please wait.");
        if !self.venue.async_cancel_all() {
            match self.venue.sync_cancel_all(&self.ctx()).await {
                Ok(orders) => {
                    let sink = self.sink();
                    for order in orders {
                        sink.order(order);
                    }
                    self.events.drain();
                }
                Err(e) => self.print(&format!("cancel all error: {e:#}")),
            }
        }
        self.print("cancel all open orders OK");
    }

    /// Publish Disconnected, close every socket, tear the channels down.
    pub async fn end(&mut self) {
        self.online(Connectivity::Disconnected);
        self.events.drain();
        self.disconnect().await;
        self.events.close();
        self.orders.lock().clear();
    }

    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    /// Run until `Command::End` (or the command channel closes).
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.wait_for_data();
        let mut frames_rx = self.frames_rx.take().expect("driver runs once");
        let mut timer = tokio::time::interval(Duration::from_secs(1));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut tick: u32 = 0;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    tick = tick.wrapping_add(1);
                    self.ask_for_data(tick).await;
                    self.events.wallets.service().await;
                    self.events.cancel_all.service().await;
                    self.events.drain();
                }
                Some(frame) = frames_rx.recv() => {
                    self.on_frame(frame).await;
                    self.events.drain();
                }
                command = commands.recv() => match command {
                    Some(Command::Place(order)) => {
                        if let Err(e) = self.place(&order).await {
                            self.print(&format!("place error: {e:#}"));
                        }
                    }
                    Some(Command::Cancel(mut order)) => {
                        self.cancel(&mut order).await;
                    }
                    Some(Command::Purge(dustybot)) => self.purge(dustybot).await,
                    Some(Command::End) | None => break,
                },
            }
        }
        self.end().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Level;

    #[test]
    fn wallet_polls_every_fifteen_ticks() {
        let asked: Vec<u32> = (1..=60)
            .filter(|tick| poll_plan(*tick, false, false, false, false).0)
            .collect();
        assert_eq!(asked, vec![15, 30, 45, 60]);
    }

    #[test]
    fn fees_latch_forces_an_immediate_wallet_poll() {
        assert!(poll_plan(7, true, false, false, false).0);
        // A venue that pushes wallets is never polled.
        assert!(!poll_plan(7, true, false, true, false).0);
        assert!(!poll_plan(15, false, false, true, false).0);
    }

    #[test]
    fn cancel_all_polls_every_three_hundred_ticks() {
        let asked: Vec<u32> = (1..=900)
            .filter(|tick| poll_plan(*tick, false, true, false, false).1)
            .collect();
        assert_eq!(asked, vec![300, 600, 900]);
        // Only when the venue advertises a bulk cancel.
        assert!(!poll_plan(300, false, false, false, false).1);
        assert!(!poll_plan(300, false, true, false, true).1);
    }

    #[test]
    fn acks_fold_through_the_tracked_order() {
        let events = Arc::new(Events::new());
        let sink = EventSink::with_events(events.clone(), 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        events.orders.write(move |o: &Order| captured.lock().push(o.clone()));

        sink.track(Order {
            order_id: "a-1".into(),
            price: 10.0,
            quantity: 2.0,
            time: 1_000,
            ..Order::default()
        });

        // The venue ack carries its id and the ack time.
        sink.order(Order {
            order_id: "a-1".into(),
            exchange_id: "E-1".into(),
            status: Status::Working,
            time: 1_250,
            ..Order::default()
        });
        // Later pushes key on the venue id alone and must not re-measure.
        sink.order(Order {
            exchange_id: "E-1".into(),
            status: Status::Working,
            time: 9_000,
            ..Order::default()
        });
        sink.order(Order {
            exchange_id: "E-1".into(),
            status: Status::Terminated,
            time: 9_500,
            ..Order::default()
        });
        events.drain();

        {
            let seen = seen.lock();
            assert_eq!(seen[0].latency, 250);
            assert_eq!(seen[0].exchange_id, "E-1");
            assert_eq!(seen[0].price, 10.0, "retained fields survive the ack");
            assert_eq!(seen[1].latency, 250, "latency is measured once");
            assert_eq!(seen[1].order_id, "a-1");
            assert_eq!(seen[2].status, Status::Terminated);
        }

        // Terminal events end the tracking; later ones pass through raw.
        sink.order(Order {
            exchange_id: "E-1".into(),
            status: Status::Working,
            time: 9_900,
            ..Order::default()
        });
        events.drain();
        let seen = seen.lock();
        assert_eq!(seen[3].order_id, "");
        assert_eq!(seen[3].latency, 0);
    }

    #[test]
    fn reduce_caps_both_sides() {
        let mut levels = Levels {
            bids: (0..10).map(|i| Level::new(100.0 - i as f64, 1.0)).collect(),
            asks: (0..4).map(|i| Level::new(101.0 + i as f64, 1.0)).collect(),
        };
        reduce(&mut levels, 5);
        assert_eq!(levels.bids.len(), 5);
        assert_eq!(levels.asks.len(), 4);

        let mut untouched = levels.clone();
        reduce(&mut untouched, 0);
        assert_eq!(untouched, levels);
    }
}
