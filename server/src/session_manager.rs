//! Connection session tracking for the scoreboard server
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Session lifecycle (connect, reconnect, disconnect, timeout)
//! - The country each session was resolved to when it connected
//! - Endpoint lookup for routing inbound datagrams and broadcast fan-out
//!
//! A session is identified by its full socket address, while bans are keyed
//! by IP only, so several sessions behind one address share a ban.

use log::info;
use shared::CountryCode;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected client and the country its scores are credited to
#[derive(Debug)]
pub struct ConnectionSession {
    /// Unique session identifier assigned by the server
    pub id: u32,
    /// Endpoint that sends updates and receives scoreboards
    pub addr: SocketAddr,
    /// Resolved once at connect and kept for the session lifetime
    pub country: CountryCode,
    /// Last time we received any packet from this endpoint
    pub last_seen: Instant,
}

impl ConnectionSession {
    pub fn new(id: u32, addr: SocketAddr, country: CountryCode) -> Self {
        Self {
            id,
            addr,
            country,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing was received within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Registry of live sessions
///
/// Shared between the event loop, which registers and removes sessions, and
/// the outbound sender, which reads endpoints for broadcasts.
pub struct SessionManager {
    sessions: HashMap<u32, ConnectionSession>,
    by_addr: HashMap<SocketAddr, u32>,
    next_session_id: u32,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_addr: HashMap::new(),
            next_session_id: 1,
            max_sessions,
        }
    }

    /// Registers a session for `addr`, replacing any session already there
    ///
    /// Returns None when the server is at capacity.
    pub fn add_session(&mut self, addr: SocketAddr, country: CountryCode) -> Option<u32> {
        if let Some(existing_id) = self.by_addr.get(&addr).copied() {
            self.remove_session(&existing_id);
        }

        if self.sessions.len() >= self.max_sessions {
            return None;
        }

        let session_id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1).max(1);

        info!("Session {} connected from {} ({})", session_id, addr, country);
        self.sessions
            .insert(session_id, ConnectionSession::new(session_id, addr, country));
        self.by_addr.insert(addr, session_id);

        Some(session_id)
    }

    pub fn remove_session(&mut self, session_id: &u32) -> Option<ConnectionSession> {
        let session = self.sessions.remove(session_id)?;
        if self.by_addr.get(&session.addr) == Some(session_id) {
            self.by_addr.remove(&session.addr);
        }
        info!("Session {} from {} disconnected", session.id, session.addr);
        Some(session)
    }

    pub fn find_session_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.by_addr.get(&addr).copied()
    }

    pub fn get(&self, session_id: &u32) -> Option<&ConnectionSession> {
        self.sessions.get(session_id)
    }

    /// Refreshes the liveness timestamp; false if the session is gone
    pub fn touch(&mut self, session_id: &u32) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Removes sessions silent for longer than `timeout` and returns their ids
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for session_id in &timed_out {
            self.remove_session(session_id);
        }

        timed_out
    }

    /// Endpoints of every live session, for broadcast fan-out
    pub fn get_session_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.sessions
            .iter()
            .map(|(id, session)| (*id, session.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn us() -> CountryCode {
        CountryCode::new("US")
    }

    #[test]
    fn test_session_creation() {
        let session = ConnectionSession::new(1, test_addr(), us());

        assert_eq!(session.id, 1);
        assert_eq!(session.addr, test_addr());
        assert_eq!(session.country, us());
        assert!(!session.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_session_timeout() {
        let mut session = ConnectionSession::new(1, test_addr(), us());
        session.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(session.is_timed_out(Duration::from_secs(1)));

        session.touch();
        assert!(!session.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_sessions() {
        let mut manager = SessionManager::new(3);

        let id1 = manager.add_session(test_addr(), us()).unwrap();
        let id2 = manager.add_session(test_addr2(), CountryCode::Unknown).unwrap();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(&id2).unwrap().country, CountryCode::Unknown);
    }

    #[test]
    fn test_add_session_max_capacity() {
        let mut manager = SessionManager::new(1);

        assert!(manager.add_session(test_addr(), us()).is_some());
        assert!(manager.add_session(test_addr2(), us()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_session() {
        let mut manager = SessionManager::new(2);
        let id = manager.add_session(test_addr(), us()).unwrap();

        let removed = manager.remove_session(&id).unwrap();
        assert_eq!(removed.addr, test_addr());
        assert!(manager.is_empty());

        assert!(manager.remove_session(&id).is_none());
    }

    #[test]
    fn test_find_session_by_addr() {
        let mut manager = SessionManager::new(2);
        let id1 = manager.add_session(test_addr(), us()).unwrap();
        manager.add_session(test_addr2(), us()).unwrap();

        assert_eq!(manager.find_session_by_addr(test_addr()), Some(id1));

        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_session_by_addr(unknown), None);
    }

    #[test]
    fn test_check_timeouts_removes_silent_sessions() {
        let mut manager = SessionManager::new(2);
        let id1 = manager.add_session(test_addr(), us()).unwrap();
        let id2 = manager.add_session(test_addr2(), us()).unwrap();

        if let Some(session) = manager.sessions.get_mut(&id1) {
            session.last_seen = Instant::now() - Duration::from_secs(30);
        }

        let timed_out = manager.check_timeouts(Duration::from_secs(15));
        assert_eq!(timed_out, vec![id1]);
        assert!(manager.get(&id1).is_none());
        assert!(manager.touch(&id2));
        assert!(!manager.touch(&id1));
    }

    #[test]
    fn test_addr_index_follows_sessions() {
        let mut manager = SessionManager::new(4);
        let id1 = manager.add_session(test_addr(), us()).unwrap();

        // Same endpoint again replaces the first session
        let id2 = manager.add_session(test_addr(), CountryCode::Unknown).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(manager.len(), 1);
        assert!(manager.get(&id1).is_none());
        assert_eq!(manager.find_session_by_addr(test_addr()), Some(id2));

        manager.remove_session(&id2);
        assert_eq!(manager.find_session_by_addr(test_addr()), None);

        let id3 = manager.add_session(test_addr2(), us()).unwrap();
        if let Some(session) = manager.sessions.get_mut(&id3) {
            session.last_seen = Instant::now() - Duration::from_secs(30);
        }
        manager.check_timeouts(Duration::from_secs(15));
        assert_eq!(manager.find_session_by_addr(test_addr2()), None);
        assert!(manager.by_addr.is_empty());
    }

    #[test]
    fn test_get_session_addrs() {
        let mut manager = SessionManager::new(2);
        manager.add_session(test_addr(), us()).unwrap();
        manager.add_session(test_addr2(), us()).unwrap();

        let mut addrs: Vec<SocketAddr> = manager
            .get_session_addrs()
            .into_iter()
            .map(|(_, addr)| addr)
            .collect();
        addrs.sort();
        assert_eq!(addrs, vec![test_addr(), test_addr2()]);
    }
}
