//! Per-address ban tracking for the score anti-cheat
//!
//! Bans are keyed by source IP, so every connection from the same address
//! shares one entry. Expiry is evaluated lazily: an entry whose ban has run
//! out stays flagged until the next time that address is checked, which
//! bounds the staleness to the gap between two interactions from it.
//!
//! Entries are never evicted; the table grows with the number of distinct
//! addresses seen during the process lifetime.

use log::info;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Ban state for a single source address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanEntry {
    pub banned: bool,
    /// Set while `banned` is true
    pub banned_at: Option<Instant>,
}

impl BanEntry {
    fn has_expired(&self, now: Instant, ban_duration: Duration) -> bool {
        match self.banned_at {
            Some(at) => now.saturating_duration_since(at) > ban_duration,
            None => true,
        }
    }
}

pub struct BanRegistry {
    entries: HashMap<IpAddr, BanEntry>,
    ban_duration: Duration,
}

impl BanRegistry {
    pub fn new(ban_duration: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ban_duration,
        }
    }

    pub fn ban_duration(&self) -> Duration {
        self.ban_duration
    }

    pub fn is_banned(&mut self, addr: IpAddr) -> bool {
        self.is_banned_at(addr, Instant::now())
    }

    /// Checks the ban for `addr` as of `now`
    ///
    /// Creates a clean entry for addresses seen for the first time. A ban
    /// older than the ban duration is cleared here and reported as lifted.
    pub fn is_banned_at(&mut self, addr: IpAddr, now: Instant) -> bool {
        let ban_duration = self.ban_duration;
        let entry = self.entries.entry(addr).or_default();

        if !entry.banned {
            return false;
        }

        if entry.has_expired(now, ban_duration) {
            *entry = BanEntry::default();
            info!("Ban on {} expired", addr);
            return false;
        }

        true
    }

    pub fn ban(&mut self, addr: IpAddr) {
        self.ban_at(addr, Instant::now());
    }

    /// Bans `addr` starting at `now`; banning again refreshes the start time
    pub fn ban_at(&mut self, addr: IpAddr, now: Instant) {
        info!("Banning {} for {:?}", addr, self.ban_duration);
        self.entries.insert(
            addr,
            BanEntry {
                banned: true,
                banned_at: Some(now),
            },
        );
    }

    pub fn entry(&self, addr: &IpAddr) -> Option<&BanEntry> {
        self.entries.get(addr)
    }

    /// Number of addresses ever observed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ip() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    fn other_ip() -> IpAddr {
        "198.51.100.9".parse().unwrap()
    }

    #[test]
    fn test_first_observation_creates_clean_entry() {
        let mut registry = BanRegistry::new(Duration::from_secs(60));
        assert!(registry.is_empty());

        assert!(!registry.is_banned(test_ip()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entry(&test_ip()), Some(&BanEntry::default()));
    }

    #[test]
    fn test_ban_holds_within_duration() {
        let mut registry = BanRegistry::new(Duration::from_secs(60));
        let start = Instant::now();

        registry.ban_at(test_ip(), start);

        assert!(registry.is_banned_at(test_ip(), start));
        assert!(registry.is_banned_at(test_ip(), start + Duration::from_secs(30)));
        assert!(registry.is_banned_at(test_ip(), start + Duration::from_secs(60)));
    }

    #[test]
    fn test_ban_expires_lazily() {
        let mut registry = BanRegistry::new(Duration::from_secs(60));
        let start = Instant::now();

        registry.ban_at(test_ip(), start);

        // Still flagged until someone asks
        assert!(registry.entry(&test_ip()).unwrap().banned);

        assert!(!registry.is_banned_at(test_ip(), start + Duration::from_secs(61)));
        assert_eq!(registry.entry(&test_ip()), Some(&BanEntry::default()));
    }

    #[test]
    fn test_reban_refreshes_timestamp() {
        let mut registry = BanRegistry::new(Duration::from_secs(60));
        let start = Instant::now();

        registry.ban_at(test_ip(), start);
        registry.ban_at(test_ip(), start + Duration::from_secs(50));

        assert!(registry.is_banned_at(test_ip(), start + Duration::from_secs(100)));
        assert!(!registry.is_banned_at(test_ip(), start + Duration::from_secs(111)));
    }

    #[test]
    fn test_bans_are_per_address() {
        let mut registry = BanRegistry::new(Duration::from_secs(60));
        let start = Instant::now();

        registry.ban_at(test_ip(), start);

        assert!(registry.is_banned_at(test_ip(), start));
        assert!(!registry.is_banned_at(other_ip(), start));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_check_with_earlier_clock_keeps_ban() {
        let mut registry = BanRegistry::new(Duration::from_secs(60));
        let start = Instant::now() + Duration::from_secs(5);

        registry.ban_at(test_ip(), start);

        assert!(registry.is_banned_at(test_ip(), start - Duration::from_secs(5)));
    }
}
