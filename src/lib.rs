//! Exchange-gateway core for a market-making trading bot.
//!
//! One uniform contract in front of heterogeneous venue APIs: the upper
//! layer installs typed handlers for connectivity, wallets, book levels,
//! trades and order lifecycle events, and drives orders through a single
//! place/replace/cancel surface, no matter which venue is attached or
//! whether it speaks one WebSocket, two, or FIX alongside.

pub mod channel;
pub mod clock;
pub mod decimal;
pub mod gateway;
pub mod models;
pub mod transport;
pub mod venues;

pub use gateway::factory::{new_gateway, VENUES};
pub use gateway::{Command, Gateway, GatewayConfig};
pub use models::{
    Connectivity, Future, Level, Levels, Order, OrderType, Side, Status, TimeInForce, Trade,
    Wallet, Wallets,
};
