//! Runtime parameters for the scoreboard server
//!
//! Every limit the admission path and the background timers rely on lives
//! here so that tests can run the full server with short intervals.

use shared::{
    BAN_DURATION_SECS, BROADCAST_INTERVAL_MS, DEFAULT_PORT, FLUSH_INTERVAL_MS,
    MAX_ALLOWED_SCORE_PER_TICK, SESSION_TIMEOUT_SECS,
};
use std::time::Duration;

pub const MAX_SESSIONS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the UDP socket binds to, e.g. `0.0.0.0:3000`
    pub bind_addr: String,
    /// How long an address stays banned after an implausible update
    pub ban_duration: Duration,
    /// Largest delta a single update may carry before it counts as abuse
    pub max_score_per_tick: i64,
    pub broadcast_interval: Duration,
    pub flush_interval: Duration,
    /// Sessions silent for longer than this are dropped
    pub session_timeout: Duration,
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            ban_duration: Duration::from_secs(BAN_DURATION_SECS),
            max_score_per_tick: MAX_ALLOWED_SCORE_PER_TICK,
            broadcast_interval: Duration::from_millis(BROADCAST_INTERVAL_MS),
            flush_interval: Duration::from_millis(FLUSH_INTERVAL_MS),
            session_timeout: Duration::from_secs(SESSION_TIMEOUT_SECS),
            max_sessions: MAX_SESSIONS,
        }
    }
}

impl ServerConfig {
    /// Value carried by `banned` notifications, rounded up to whole seconds
    pub fn ban_duration_secs(&self) -> u64 {
        let secs = self.ban_duration.as_secs();
        if self.ban_duration.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}
