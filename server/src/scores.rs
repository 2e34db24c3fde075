//! Authoritative in-memory scoreboard
//!
//! The cache starts out unloaded and only accepts deltas once it has been
//! seeded from the store. Until then every update is dropped so a late load
//! cannot overwrite (or double count) points collected in the meantime.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use shared::{CountryCode, Scores};
use std::collections::HashMap;

/// Cumulative score of one country
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryScore {
    pub country_code: String,
    pub score: i64,
}

impl CountryScore {
    pub fn new(country_code: impl Into<String>, score: i64) -> Self {
        Self {
            country_code: country_code.into(),
            score,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScoreCache {
    /// `None` until the initial load completes
    scores: Option<Scores>,
    /// Record name a country was loaded under, where it differs from its code
    stored_names: HashMap<String, String>,
}

impl ScoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.scores.is_some()
    }

    /// Replaces the whole cache with `records` and marks it loaded
    ///
    /// Codes are normalized, but the record name each country was stored
    /// under is kept so later writes land on the same record.
    pub fn load(&mut self, records: impl IntoIterator<Item = CountryScore>) {
        let mut scores = Scores::new();
        let mut stored_names = HashMap::new();
        for record in records {
            let country = CountryCode::new(&record.country_code);
            let Some(code) = country.as_known() else {
                warn!("Skipping stored score without a country code");
                continue;
            };
            if let Some(previous) = scores.insert(code.to_string(), record.score) {
                warn!(
                    "Duplicate stored score for {}, replacing {} with {}",
                    code, previous, record.score
                );
            }
            if record.country_code != code {
                stored_names.insert(code.to_string(), record.country_code);
            } else {
                stored_names.remove(code);
            }
        }
        self.scores = Some(scores);
        self.stored_names = stored_names;
    }

    /// Adds `delta` to the country's total, creating it at `delta`
    ///
    /// Returns whether the delta was applied. Deltas against an unloaded
    /// cache, the unknown country, or non-positive deltas are ignored.
    pub fn apply_delta(&mut self, country: &CountryCode, delta: i64) -> bool {
        let Some(scores) = self.scores.as_mut() else {
            return false;
        };
        let Some(code) = country.as_known() else {
            return false;
        };
        if delta <= 0 {
            return false;
        }

        let total = scores.entry(code.to_string()).or_insert(0);
        *total = total.saturating_add(delta);
        debug!("{} +{} = {}", code, delta, total);
        true
    }

    /// Current totals, or `None` while unloaded
    pub fn snapshot(&self) -> Option<Scores> {
        self.scores.clone()
    }

    /// Current totals keyed by the record name to write them under
    pub fn persist_snapshot(&self) -> Option<Scores> {
        let scores = self.scores.as_ref()?;
        Some(
            scores
                .iter()
                .map(|(code, score)| {
                    let name = self.stored_names.get(code).unwrap_or(code);
                    (name.clone(), *score)
                })
                .collect(),
        )
    }

    pub fn score(&self, country: &CountryCode) -> Option<i64> {
        let code = country.as_known()?;
        self.scores.as_ref()?.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.as_ref().map_or(0, |scores| scores.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
