use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const MAX_ALLOWED_SCORE_PER_TICK: i64 = 30;
pub const BAN_DURATION_SECS: u64 = 60;
pub const BROADCAST_INTERVAL_MS: u64 = 5000;
pub const FLUSH_INTERVAL_MS: u64 = 5000;
pub const SESSION_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_PORT: u16 = 3000;

/// Large enough for a scoreboard covering every ISO country code.
pub const MAX_DATAGRAM_SIZE: usize = 16 * 1024;

/// Label used on the wire and in logs for addresses without a geolocation.
pub const UNKNOWN_COUNTRY: &str = "NO_GEOLOCATION";

/// Full scoreboard as sent to clients, keyed by country code.
pub type Scores = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CountryCode {
    Known(String),
    Unknown,
}

impl CountryCode {
    /// Normalizes a raw code; blank input or the unknown label map to `Unknown`.
    pub fn new(code: &str) -> Self {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() || code == UNKNOWN_COUNTRY {
            CountryCode::Unknown
        } else {
            CountryCode::Known(code)
        }
    }

    pub fn as_known(&self) -> Option<&str> {
        match self {
            CountryCode::Known(code) => Some(code),
            CountryCode::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, CountryCode::Unknown)
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountryCode::Known(code) => f.write_str(code),
            CountryCode::Unknown => f.write_str(UNKNOWN_COUNTRY),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect,
    Update {
        score: i64,
    },
    Heartbeat,
    Disconnect,

    Country {
        country: CountryCode,
    },
    Scoreboard {
        scores: Scores,
    },
    Banned {
        seconds: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_code_normalization() {
        assert_eq!(CountryCode::new("us"), CountryCode::Known("US".to_string()));
        assert_eq!(CountryCode::new("  id "), CountryCode::Known("ID".to_string()));
        assert_eq!(CountryCode::new(""), CountryCode::Unknown);
        assert_eq!(CountryCode::new(UNKNOWN_COUNTRY), CountryCode::Unknown);
    }

    #[test]
    fn test_country_code_display() {
        assert_eq!(CountryCode::new("de").to_string(), "DE");
        assert_eq!(CountryCode::Unknown.to_string(), UNKNOWN_COUNTRY);
        assert_eq!(CountryCode::Unknown.as_known(), None);
        assert!(CountryCode::Unknown.is_unknown());
    }

    #[test]
    fn test_full_scoreboard_fits_in_datagram() {
        let mut scores = Scores::new();
        for a in b'A'..=b'Z' {
            for b in b'A'..=b'Z' {
                if scores.len() == 300 {
                    break;
                }
                let code = String::from_utf8(vec![a, b]).unwrap();
                scores.insert(code, i64::MAX);
            }
        }

        let serialized = bincode::serialize(&Packet::Scoreboard { scores }).unwrap();
        assert!(serialized.len() < MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn test_packet_serialization_update() {
        let serialized = bincode::serialize(&Packet::Update { score: 25 }).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Update { score } => assert_eq!(score, 25),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let serialized = bincode::serialize(&Packet::Banned { seconds: 60 }).unwrap();
        let result: Result<Packet, _> = bincode::deserialize(&serialized[..serialized.len() - 1]);
        assert!(result.is_err());
    }
}
