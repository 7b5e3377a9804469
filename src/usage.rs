//! Per-tier daily usage counters and the clock they are keyed by.

use crate::constants::{KEY_USAGE_PREFIX, QUOTA_ADVANCED, QUOTA_BASIC, QUOTA_UNLIMITED};
use crate::store::{SharedStore, StoreError};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Basic,
    Advanced,
    SuperAdmin,
}

impl Tier {
    /// Daily ceiling; [`QUOTA_UNLIMITED`] means no ceiling.
    pub fn daily_limit(self) -> i64 {
        match self {
            Tier::Basic => QUOTA_BASIC,
            Tier::Advanced => QUOTA_ADVANCED,
            Tier::SuperAdmin => QUOTA_UNLIMITED,
        }
    }

    pub fn is_unlimited(self) -> bool {
        self.daily_limit() == QUOTA_UNLIMITED
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Advanced => "advanced",
            Tier::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of wall-clock time for rate limiting and day keys.
pub trait Clock {
    fn now_millis(&self) -> i64;
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Local::now().timestamp_millis()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Hand-driven clock for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    millis: Cell<i64>,
    day: Cell<NaiveDate>,
}

impl ManualClock {
    pub fn new(millis: i64, day: NaiveDate) -> Self {
        Self {
            millis: Cell::new(millis),
            day: Cell::new(day),
        }
    }

    pub fn advance_millis(&self, delta: i64) {
        self.millis.set(self.millis.get() + delta);
    }

    pub fn set_day(&self, day: NaiveDate) {
        self.day.set(day);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.get()
    }

    fn today(&self) -> NaiveDate {
        self.day.get()
    }
}

/// Counters live under `ai_usage_<tier>_<date>`; a new day simply reads a new key.
pub struct UsageCounter {
    store: SharedStore,
}

impl UsageCounter {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn key(tier: Tier, day: NaiveDate) -> String {
        format!("{}_{}_{}", KEY_USAGE_PREFIX, tier, day.format("%Y-%m-%d"))
    }

    pub fn count(&self, tier: Tier, day: NaiveDate) -> i64 {
        self.store
            .get(&Self::key(tier, day))
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn has_remaining(&self, tier: Tier, day: NaiveDate) -> bool {
        tier.is_unlimited() || self.count(tier, day) < tier.daily_limit()
    }

    /// Remaining uses today, `None` when the tier is unlimited.
    pub fn remaining(&self, tier: Tier, day: NaiveDate) -> Option<i64> {
        if tier.is_unlimited() {
            None
        } else {
            Some((tier.daily_limit() - self.count(tier, day)).max(0))
        }
    }

    pub fn increment(&self, tier: Tier, day: NaiveDate) -> Result<i64, StoreError> {
        let next = self.count(tier, day) + 1;
        self.store.set(&Self::key(tier, day), &next.to_string())?;
        tracing::debug!("Usage for {} on {} is now {}", tier, day, next);
        Ok(next)
    }
}
