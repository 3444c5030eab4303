//! Per-venue adapters behind one trait.
//!
//! The gateway owns transport and scheduling; an adapter contributes what is
//! genuinely venue-specific: endpoints, the handshake, authenticated request
//! headers, subscription frames, frame decoding, and the order calls.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::gateway::handshake::HandshakeReply;
use crate::gateway::{EventSink, VenueCtx};
use crate::models::{Order, OrderType, Side, TimeInForce, Wallets};

pub mod binance;
pub mod bitfinex;
pub mod bitmex;
pub mod coinbase;
pub mod hitbtc;
pub mod kraken;
pub mod kucoin;
pub mod poloniex;

/// How the authenticated order channel rides next to the market data socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// One WebSocket for everything.
    Ws,
    /// Public WebSocket plus an authenticated twin.
    WsTwin,
    /// Public WebSocket plus a FIX session.
    WsFix,
}

/// Client order-id flavour a venue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandId {
    Uuid36,
    Uuid32,
    Int45,
    Int32,
}

impl RandId {
    pub fn generate(&self) -> String {
        match self {
            RandId::Uuid36 => uuid::Uuid::new_v4().to_string(),
            RandId::Uuid32 => uuid::Uuid::new_v4().simple().to_string(),
            RandId::Int45 => (rand::random::<u64>() & ((1 << 45) - 1)).to_string(),
            RandId::Int32 => rand::random::<u32>().to_string(),
        }
    }
}

/// Static facts about a venue, fixed at construction.
#[derive(Debug, Clone)]
pub struct VenueProfile {
    pub exchange: String,
    pub http: String,
    pub ws: String,
    pub fix: String,
    pub web_market: String,
    pub web_orders: String,
    pub transport: TransportKind,
    pub rand_id: RandId,
    /// Venue supports in-place modify, no cancel/new round trip.
    pub ask_for_replace: bool,
    /// Venue supports a bulk cancel.
    pub ask_for_cancel_all: bool,
}

impl VenueProfile {
    pub fn ws_only(exchange: &str, http: &str, ws: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            http: http.to_string(),
            ws: ws.to_string(),
            fix: String::new(),
            web_market: String::new(),
            web_orders: String::new(),
            transport: TransportKind::Ws,
            rand_id: RandId::Uuid36,
            ask_for_replace: false,
            ask_for_cancel_all: false,
        }
    }
}

/// A frame the adapter wants on the wire, routed by the gateway.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Text frame on the market-data socket.
    Public(String),
    /// Text frame on the authenticated twin socket.
    Private(String),
    /// Typed message on the FIX session.
    Fix(String, Vec<(u32, String)>),
}

/// An order already formatted at the venue's ticks, ready to serialise.
#[derive(Debug, Clone)]
pub struct PlaceRequest {
    pub order_id: String,
    pub side: Side,
    pub price: String,
    pub quantity: String,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
}

#[async_trait]
pub trait Venue: Send + Sync {
    fn profile(&self) -> VenueProfile;

    /// Venue-specific REST calls resolving the symbol's metadata.
    async fn handshake(&self, ctx: &VenueCtx) -> Result<HandshakeReply>;

    /// Channel subscriptions to emit once the socket opens.
    fn subscribe(&self, ctx: &VenueCtx) -> Vec<Outbound>;

    /// Decode one inbound frame into event writes; may answer on the wire.
    fn consume(&self, msg: &Value, ctx: &VenueCtx, sink: &EventSink) -> Vec<Outbound>;

    async fn place(
        &self,
        req: &PlaceRequest,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>>;

    async fn replace(
        &self,
        _exchange_id: &str,
        _price: &str,
        _ctx: &VenueCtx,
        _sink: &EventSink,
    ) -> Result<Vec<Outbound>> {
        Ok(Vec::new())
    }

    async fn cancel(
        &self,
        order_id: &str,
        exchange_id: &str,
        ctx: &VenueCtx,
        sink: &EventSink,
    ) -> Result<Vec<Outbound>>;

    /// True when the venue pushes wallet snapshots on its own.
    fn async_wallet(&self) -> bool {
        false
    }

    /// True when the venue pushes bulk-cancel results on its own.
    fn async_cancel_all(&self) -> bool {
        false
    }

    /// Poll fallback when `async_wallet` is false.
    async fn sync_wallet(&self, _ctx: &VenueCtx) -> Result<Vec<Wallets>> {
        Ok(Vec::new())
    }

    /// Poll fallback when `async_cancel_all` is false.
    async fn sync_cancel_all(&self, _ctx: &VenueCtx) -> Result<Vec<Order>> {
        Ok(Vec::new())
    }

    /// Rewrite the public WebSocket URL into the authenticated twin's.
    fn twin(&self, ws: &str) -> String {
        ws.to_string()
    }

    /// FIX TargetCompID, for venues with a FIX order channel.
    fn fix_target(&self) -> String {
        String::new()
    }

    /// Signed logon fields for the FIX session about to start.
    fn fix_logon(&self, _ctx: &VenueCtx, _seq: u32, _sending_time: &str) -> Vec<(u32, String)> {
        Vec::new()
    }
}

/// Execute a prepared request, mapping venue errors to one shape.
pub(crate) async fn send(builder: reqwest::RequestBuilder) -> Result<Value> {
    use anyhow::{bail, Context};

    let response = builder.send().await.context("http send")?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        bail!("API error {status}: {text}");
    }
    if text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).context("invalid JSON reply")
}

/// Path component to sign: whatever follows the host in `http`, plus the
/// endpoint. `https://x.com/api/v1` + `/order` gives `/api/v1/order`.
pub(crate) fn url_path(http: &str, endpoint: &str) -> String {
    let base_path = http
        .splitn(4, '/')
        .nth(3)
        .map(|path| format!("/{path}"))
        .unwrap_or_default();
    format!("{base_path}{endpoint}")
}

pub(crate) fn tif_str(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::Fok => "FOK",
    }
}

/// Tolerant number: venues send floats as strings as often as not.
pub(crate) fn num(v: &Value) -> f64 {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0.0)
}

/// Decode `[["price","size"], ...]` rows.
pub(crate) fn pair_levels(rows: Option<&Value>) -> Vec<crate::models::Level> {
    rows.and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    Some(crate::models::Level::new(num(row.first()?), num(row.get(1)?)))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Resident-book maintenance for venues that push incremental updates.
pub(crate) mod book {
    use crate::models::{Level, Levels, Side};

    /// Upsert one price row; a size of zero deletes it.
    pub fn apply(levels: &mut Levels, side: Side, price: f64, size: f64) {
        let rows = match side {
            Side::Bid => &mut levels.bids,
            Side::Ask => &mut levels.asks,
        };
        match rows.iter().position(|level| level.price == price) {
            Some(i) if size == 0.0 => {
                rows.remove(i);
            }
            Some(i) => rows[i].size = size,
            None if size > 0.0 => {
                rows.push(Level::new(price, size));
                sort_side(rows, side);
            }
            None => {}
        }
    }

    /// Bids descending, asks ascending.
    pub fn sort(levels: &mut Levels) {
        sort_side(&mut levels.bids, Side::Bid);
        sort_side(&mut levels.asks, Side::Ask);
    }

    fn sort_side(rows: &mut [Level], side: Side) {
        rows.sort_by(|a, b| {
            let ordering = a
                .price
                .partial_cmp(&b.price)
                .unwrap_or(std::cmp::Ordering::Equal);
            match side {
                Side::Bid => ordering.reverse(),
                Side::Ask => ordering,
            }
        });
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn zero_size_deletes_the_row() {
            let mut levels = Levels::default();
            apply(&mut levels, Side::Bid, 10.0, 1.0);
            apply(&mut levels, Side::Bid, 11.0, 2.0);
            apply(&mut levels, Side::Ask, 12.0, 3.0);
            assert_eq!(levels.bids[0].price, 11.0, "bids descend");

            apply(&mut levels, Side::Bid, 11.0, 0.0);
            assert_eq!(levels.bids.len(), 1);
            assert_eq!(levels.bids[0].price, 10.0);

            // Deleting an unknown price is a no-op.
            apply(&mut levels, Side::Ask, 99.0, 0.0);
            assert_eq!(levels.asks.len(), 1);
        }
    }
}

/// HMAC and encoding helpers shared by the venue auth schemes.
pub(crate) mod auth {
    use anyhow::{anyhow, Context, Result};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use hmac::{Hmac, Mac};
    use sha2::{Digest, Sha256, Sha384, Sha512};

    type HmacSha256 = Hmac<Sha256>;
    type HmacSha384 = Hmac<Sha384>;
    type HmacSha512 = Hmac<Sha512>;

    pub fn hmac_sha256_hex(payload: &str, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn hmac_sha256_b64(payload: &str, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key");
        mac.update(payload.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// HMAC-SHA256 where the secret itself is base64, base64 output.
    pub fn hmac_sha256_b64_secret(payload: &str, secret_b64: &str) -> Result<String> {
        let secret = BASE64
            .decode(secret_b64)
            .context("secret is not valid base64")?;
        let mut mac =
            HmacSha256::new_from_slice(&secret).map_err(|e| anyhow!("hmac key: {e}"))?;
        mac.update(payload.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    pub fn hmac_sha384_hex(payload: &str, secret: &str) -> String {
        let mut mac = HmacSha384::new_from_slice(secret.as_bytes()).expect("hmac accepts any key");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn hmac_sha512_hex(payload: &str, secret: &str) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).expect("hmac accepts any key");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Kraken REST signature: base64 HMAC-SHA512 over the URI path plus
    /// SHA256(nonce + post body), keyed with the base64-decoded secret.
    pub fn kraken_sign(path: &str, nonce: &str, post: &str, secret_b64: &str) -> Result<String> {
        let secret = BASE64
            .decode(secret_b64)
            .context("secret is not valid base64")?;
        let digest = Sha256::digest(format!("{nonce}{post}").as_bytes());
        let mut mac =
            HmacSha512::new_from_slice(&secret).map_err(|e| anyhow!("hmac key: {e}"))?;
        mac.update(path.as_bytes());
        mac.update(&digest);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// `Authorization: Basic` value for apikey:secret schemes.
    pub fn basic(apikey: &str, secret: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{apikey}:{secret}")))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        // RFC 4231 test case 2.
        #[test]
        fn hmac_sha256_known_vector() {
            assert_eq!(
                hmac_sha256_hex("what do ya want for nothing?", "Jefe"),
                "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
            );
        }

        #[test]
        fn basic_auth_is_base64_of_pair() {
            assert_eq!(basic("user", "pass"), "Basic dXNlcjpwYXNz");
        }

        #[test]
        fn kraken_sign_accepts_base64_secret() {
            let secret = BASE64.encode(b"kraken secret key material");
            let sign = kraken_sign("/0/private/AddOrder", "1616492376594", "nonce=1616492376594", &secret)
                .unwrap();
            assert!(!sign.is_empty());
            assert!(BASE64.decode(&sign).is_ok());
        }

        #[test]
        fn kraken_sign_rejects_bad_secret() {
            assert!(kraken_sign("/p", "1", "n=1", "not-base64!!!").is_err());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_id_shapes() {
        assert_eq!(RandId::Uuid36.generate().len(), 36);
        assert_eq!(RandId::Uuid32.generate().len(), 32);
        let int45: u64 = RandId::Int45.generate().parse().unwrap();
        assert!(int45 < (1 << 45));
        let _int32: u32 = RandId::Int32.generate().parse().unwrap();
    }
}
