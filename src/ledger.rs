//! Durable daily token-usage accounting.
//!
//! [`TokenUsageLedger`] tracks generation token consumption against a fixed
//! daily quota. On every access the stored `last_reset_date` is checked
//! against the current date; a stale date archives the prior day's final
//! usage into the history map and zeroes the counter.
//!
//! The backing record is a versioned JSON file, read-modified-written under
//! a mutex so near-simultaneous generation completions cannot lose updates.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

const LEDGER_VERSION: u32 = 1;

/// The durable ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub version: u32,
    pub last_reset_date: NaiveDate,
    pub daily_usage: u64,
    pub usage_history: BTreeMap<NaiveDate, u64>,
}

impl TokenUsageRecord {
    fn fresh(today: NaiveDate) -> Self {
        Self {
            version: LEDGER_VERSION,
            last_reset_date: today,
            daily_usage: 0,
            usage_history: BTreeMap::new(),
        }
    }
}

/// Snapshot of current usage against the quota.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub current_usage: u64,
    pub daily_quota: u64,
    pub remaining: u64,
    pub usage_percentage: f64,
    pub last_reset_date: NaiveDate,
}

pub struct TokenUsageLedger {
    path: PathBuf,
    quota: u64,
    state: Mutex<TokenUsageRecord>,
}

impl TokenUsageLedger {
    /// Open (or create) the ledger file at `path` with the given daily
    /// quota. A corrupt or version-mismatched record is logged and replaced
    /// with a fresh one rather than failing startup.
    pub fn open(path: impl Into<PathBuf>, quota: u64) -> Result<Self> {
        let path = path.into();
        let today = Utc::now().date_naive();

        let record = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<TokenUsageRecord>(&bytes) {
                Ok(record) if record.version == LEDGER_VERSION => record,
                Ok(record) => {
                    tracing::warn!(
                        version = record.version,
                        "unsupported ledger version; starting fresh"
                    );
                    TokenUsageRecord::fresh(today)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "corrupt token ledger; starting fresh");
                    TokenUsageRecord::fresh(today)
                }
            },
            Err(_) => TokenUsageRecord::fresh(today),
        };

        let ledger = Self {
            path,
            quota,
            state: Mutex::new(record),
        };
        // Roll over (and create the file) eagerly so the record is durable
        // from the start.
        {
            let mut state = ledger.state.lock().unwrap();
            ledger.rollover(&mut state, today);
            ledger.persist(&state)?;
        }
        Ok(ledger)
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Record `tokens` of consumption. Returns `false` — without persisting
    /// anything — when the increment would exceed the daily quota.
    pub fn add(&self, tokens: u64) -> Result<bool> {
        self.add_on(tokens, Utc::now().date_naive())
    }

    fn add_on(&self, tokens: u64, today: NaiveDate) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        self.rollover(&mut state, today);

        let new_usage = state.daily_usage + tokens;
        if new_usage > self.quota {
            tracing::warn!(
                attempted = new_usage,
                quota = self.quota,
                "token usage would exceed daily quota"
            );
            return Ok(false);
        }

        state.daily_usage = new_usage;
        self.persist(&state)?;
        tracing::info!(tokens, total = new_usage, quota = self.quota, "recorded token usage");
        Ok(true)
    }

    /// Current usage against the quota, rollover applied.
    pub fn usage(&self) -> Result<UsageReport> {
        self.usage_on(Utc::now().date_naive())
    }

    fn usage_on(&self, today: NaiveDate) -> Result<UsageReport> {
        let mut state = self.state.lock().unwrap();
        if self.rollover(&mut state, today) {
            self.persist(&state)?;
        }

        Ok(UsageReport {
            current_usage: state.daily_usage,
            daily_quota: self.quota,
            remaining: self.quota.saturating_sub(state.daily_usage),
            usage_percentage: if self.quota > 0 {
                (state.daily_usage as f64 / self.quota as f64) * 100.0
            } else {
                0.0
            },
            last_reset_date: state.last_reset_date,
        })
    }

    /// Per-day usage history (final totals of past days).
    pub fn history(&self) -> BTreeMap<NaiveDate, u64> {
        let state = self.state.lock().unwrap();
        state.usage_history.clone()
    }

    /// Administrative reset: clears history and zeroes today's usage.
    /// Distinct from the automatic daily rollover.
    pub fn reset(&self) -> Result<()> {
        let today = Utc::now().date_naive();
        let mut state = self.state.lock().unwrap();
        *state = TokenUsageRecord::fresh(today);
        self.persist(&state)?;
        tracing::info!("token usage ledger reset");
        Ok(())
    }

    /// Archive the prior day and zero the counter when the stored reset
    /// date is in the past. Returns whether the record changed.
    fn rollover(&self, state: &mut TokenUsageRecord, today: NaiveDate) -> bool {
        if state.last_reset_date >= today {
            return false;
        }
        if state.daily_usage > 0 {
            state
                .usage_history
                .insert(state.last_reset_date, state.daily_usage);
        }
        tracing::info!(
            from = %state.last_reset_date,
            to = %today,
            "daily token usage rollover"
        );
        state.daily_usage = 0;
        state.last_reset_date = today;
        true
    }

    fn persist(&self, state: &TokenUsageRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write token ledger: {}", self.path.display()))
    }
}
