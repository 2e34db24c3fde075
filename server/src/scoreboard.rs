//! Admission of score updates against the ban table and the score cache
//!
//! `Scoreboard` owns both pieces of shared state. It is held by the server
//! event loop only, so every update, ban check and snapshot runs one at a
//! time and a snapshot always reflects a prefix of the admitted updates.

use crate::ban::BanRegistry;
use crate::config::ServerConfig;
use crate::scores::{CountryScore, ScoreCache};
use log::{debug, info};
use shared::{CountryCode, Scores};
use std::net::IpAddr;
use std::time::Instant;

/// Why an update was dropped without a ban notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The cache has not been seeded from the store yet
    NotLoaded,
    NonPositive,
    /// The session has no country to credit
    UnknownCountry,
}

/// Outcome of a single `update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Applied,
    Dropped(DropReason),
    /// Sender was already banned
    Banned,
    /// Delta exceeded the per-tick ceiling; the sender is now banned
    BannedNow,
}

impl Admission {
    /// Whether the sender must receive a `banned` notification
    pub fn notifies_ban(&self) -> bool {
        matches!(self, Admission::Banned | Admission::BannedNow)
    }
}

pub struct Scoreboard {
    scores: ScoreCache,
    bans: BanRegistry,
    max_score_per_tick: i64,
}

impl Scoreboard {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            scores: ScoreCache::new(),
            bans: BanRegistry::new(config.ban_duration),
            max_score_per_tick: config.max_score_per_tick,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.scores.is_loaded()
    }

    pub fn load(&mut self, records: Vec<CountryScore>) {
        self.scores.load(records);
        info!("Scoreboard loaded with {} countries", self.scores.len());
    }

    pub fn snapshot(&self) -> Option<Scores> {
        self.scores.snapshot()
    }

    /// Totals keyed by the record names they were loaded from
    pub fn persist_snapshot(&self) -> Option<Scores> {
        self.scores.persist_snapshot()
    }

    pub fn scores(&self) -> &ScoreCache {
        &self.scores
    }

    pub fn bans(&self) -> &BanRegistry {
        &self.bans
    }

    pub fn is_banned(&mut self, addr: IpAddr) -> bool {
        self.bans.is_banned(addr)
    }

    pub fn submit_update(&mut self, addr: IpAddr, country: &CountryCode, delta: i64) -> Admission {
        self.submit_update_at(addr, country, delta, Instant::now())
    }

    /// Runs one update through the admission steps as of `now`
    ///
    /// Non-positive deltas and updates against an unloaded cache are dropped
    /// before the ban checks. The offending update that triggers a ban is
    /// never credited.
    pub fn submit_update_at(
        &mut self,
        addr: IpAddr,
        country: &CountryCode,
        delta: i64,
        now: Instant,
    ) -> Admission {
        if delta <= 0 {
            return Admission::Dropped(DropReason::NonPositive);
        }
        if !self.scores.is_loaded() {
            return Admission::Dropped(DropReason::NotLoaded);
        }

        if self.bans.is_banned_at(addr, now) {
            debug!("Dropping update of {} from banned {}", delta, addr);
            return Admission::Banned;
        }

        if delta > self.max_score_per_tick {
            info!(
                "Update of {} from {} exceeds the limit of {}",
                delta, addr, self.max_score_per_tick
            );
            self.bans.ban_at(addr, now);
            return Admission::BannedNow;
        }

        if !self.scores.apply_delta(country, delta) {
            return Admission::Dropped(DropReason::UnknownCountry);
        }

        Admission::Applied
    }
}
