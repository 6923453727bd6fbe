use std::{net::IpAddr, num::NonZeroU32, sync::Arc, time::Duration};

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::task::JoinHandle;
use tracing::debug;

type ThrottleKey = (Option<IpAddr>, String);

/// Login attempt quota per (client address, username) pair. Guesses from one
/// client use up only that client's quota for the account.
pub struct LoginThrottle {
    limiter: DefaultKeyedRateLimiter<ThrottleKey>,
}

impl LoginThrottle {
    pub fn per_minute(attempts: NonZeroU32) -> Self {
        Self::with_quota(Quota::per_minute(attempts))
    }

    pub fn with_quota(quota: Quota) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Charges one attempt; `false` once the pair has used up its quota.
    pub fn check(&self, client: Option<IpAddr>, username: &str) -> bool {
        self.limiter
            .check_key(&(client, username.to_owned()))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }

    /// Drops pairs whose quota has fully replenished.
    pub fn prune(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }

    pub fn spawn_pruner(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let pruned = self.prune();
                if pruned > 0 {
                    debug!("Pruned {} idle login throttle entries", pruned);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    #[test]
    fn quota_is_per_client_and_username() {
        let throttle = LoginThrottle::per_minute(NonZeroU32::new(2).unwrap());

        assert!(throttle.check(ip(1), "alice"));
        assert!(throttle.check(ip(1), "alice"));
        assert!(!throttle.check(ip(1), "alice"));

        assert!(throttle.check(ip(2), "alice"));
        assert!(throttle.check(ip(1), "bob"));
        assert!(throttle.check(None, "alice"));
    }

    #[test]
    fn idle_entries_are_pruned() {
        let throttle = LoginThrottle::with_quota(Quota::per_second(NonZeroU32::new(1000).unwrap()));

        for i in 0..500 {
            assert!(throttle.check(ip(1), &format!("ghost{i}")));
        }
        assert_eq!(throttle.len(), 500);

        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(throttle.prune(), 500);
        assert!(throttle.is_empty());
    }

    #[test]
    fn pruning_keeps_exhausted_entries() {
        let throttle = LoginThrottle::per_minute(NonZeroU32::new(1).unwrap());
        assert!(throttle.check(ip(1), "alice"));
        assert!(!throttle.check(ip(1), "alice"));

        assert_eq!(throttle.prune(), 0);
        assert!(!throttle.check(ip(1), "alice"));
    }
}
