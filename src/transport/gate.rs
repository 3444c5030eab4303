//! Tick-driven connect/subscribe state, kept free of I/O so the reconnect
//! and subscription rules can be exercised directly.

/// Ticks to wait before retrying a dead connection.
pub const RECONNECT_TICKS: u32 = 7;

/// What the gateway should do after reconciling the subscription flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFlip {
    None,
    /// Connectivity just came up: emit the venue's subscribe frames.
    Subscribe,
    /// Connectivity just went down: publish Disconnected and re-arm.
    Lost,
}

/// Connect countdown plus subscription latch for one gateway.
///
/// Fresh gateways are armed with a one-tick countdown so the first tick
/// attempts a connect; failures re-arm with [`RECONNECT_TICKS`].
#[derive(Debug)]
pub struct SocketGate {
    countdown: u32,
    subscription: bool,
}

impl Default for SocketGate {
    fn default() -> Self {
        Self {
            countdown: 1,
            subscription: false,
        }
    }
}

impl SocketGate {
    /// Advance the countdown; true when this tick should attempt a connect.
    pub fn tick(&mut self) -> bool {
        if self.countdown > 0 {
            self.countdown -= 1;
            self.countdown == 0
        } else {
            false
        }
    }

    /// Arm the reconnect backoff.
    pub fn arm(&mut self) -> u32 {
        self.countdown = RECONNECT_TICKS;
        self.countdown
    }

    /// Reconcile the subscription latch with observed connectivity.
    pub fn poll_subscription(&mut self, connected: bool) -> SubscriptionFlip {
        if self.subscription == connected {
            return SubscriptionFlip::None;
        }
        self.subscription = connected;
        if connected {
            SubscriptionFlip::Subscribe
        } else {
            SubscriptionFlip::Lost
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_connects() {
        let mut gate = SocketGate::default();
        assert!(gate.tick());
        assert!(!gate.tick());
    }

    #[test]
    fn reconnect_backs_off_seven_ticks() {
        let mut gate = SocketGate::default();
        assert!(gate.tick());
        gate.arm();

        for tick in 1..RECONNECT_TICKS {
            assert!(!gate.tick(), "tick {tick} must not connect");
        }
        assert!(gate.tick(), "seventh tick reconnects");
        assert!(!gate.tick());
    }

    #[test]
    fn subscription_flips_once_per_transition() {
        let mut gate = SocketGate::default();
        assert_eq!(gate.poll_subscription(false), SubscriptionFlip::None);
        assert_eq!(gate.poll_subscription(true), SubscriptionFlip::Subscribe);
        assert!(gate.is_subscribed());
        assert_eq!(gate.poll_subscription(true), SubscriptionFlip::None);
        assert_eq!(gate.poll_subscription(false), SubscriptionFlip::Lost);
        assert!(!gate.is_subscribed());
        assert_eq!(gate.poll_subscription(false), SubscriptionFlip::None);
    }
}
