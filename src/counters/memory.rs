//! In-process counter store
//!
//! Mirrors the subset of Redis semantics the aggregator relies on, including
//! lazy key expiry and all-or-nothing batches. Used for local runs
//! (`COUNTER_BACKEND=memory`) and throughout the test suite.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::trait_def::{CounterCommand, CounterError, CounterResult, CounterStore};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    OrderedSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

const WRONG_TYPE: &str = "WRONGTYPE operation against a key holding the wrong kind of value";

pub struct InMemoryCounterStore {
    entries: DashMap<String, Entry>,
    /// Serializes batches against each other so a batch is applied as one unit
    batch_lock: Mutex<()>,
    unavailable: AtomicBool,
    batches: AtomicU64,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            batch_lock: Mutex::new(()),
            unavailable: AtomicBool::new(false),
            batches: AtomicU64::new(0),
        }
    }

    /// Make every subsequent call fail with [`CounterError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of batches successfully applied
    pub fn batches_executed(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    /// Remaining time-to-live of a live key, if it has one
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Members of an ordered set with their scores, lowest score first
    pub fn ordered_set_members(&self, key: &str) -> Vec<(String, f64)> {
        let now = Instant::now();
        let mut members = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::OrderedSet(set) => set
                    .iter()
                    .map(|(member, score)| (member.clone(), *score))
                    .collect::<Vec<_>>(),
                Value::Str(_) => Vec::new(),
            },
            _ => Vec::new(),
        };
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    fn check_available(&self) -> CounterResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CounterError::Unavailable(
                "in-memory counter store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn purge_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
    }

    fn apply(&self, command: &CounterCommand, now: Instant) -> CounterResult<()> {
        match command {
            CounterCommand::Increment { key } => self.increment_at(key, now).map(|_| ()),
            CounterCommand::Expire { key, ttl } => {
                self.expire_at(key, *ttl, now);
                Ok(())
            }
            CounterCommand::AddToOrderedSet { key, score, member } => {
                self.zadd_at(key, *score, member, now)
            }
            CounterCommand::SetString { key, value, ttl } => {
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(value.clone()),
                        expires_at: Some(now + *ttl),
                    },
                );
                Ok(())
            }
        }
    }

    /// Rejects commands that would fail half-way through a batch
    fn validate(&self, command: &CounterCommand, now: Instant) -> CounterResult<()> {
        let Some(entry) = self.entries.get(command.key()) else {
            return Ok(());
        };
        if !entry.is_live(now) {
            return Ok(());
        }
        match (command, &entry.value) {
            (CounterCommand::Increment { .. }, Value::Str(s)) => {
                parse_integer(s).map(|_| ())
            }
            (CounterCommand::Increment { .. }, Value::OrderedSet(_))
            | (CounterCommand::AddToOrderedSet { .. }, Value::Str(_)) => {
                Err(CounterError::Protocol(WRONG_TYPE.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn increment_at(&self, key: &str, now: Instant) -> CounterResult<i64> {
        self.purge_if_expired(key, now);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Str("0".to_string()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Str(s) => {
                let next = parse_integer(s)?
                    .checked_add(1)
                    .ok_or_else(|| CounterError::Protocol("increment would overflow".to_string()))?;
                *s = next.to_string();
                Ok(next)
            }
            Value::OrderedSet(_) => Err(CounterError::Protocol(WRONG_TYPE.to_string())),
        }
    }

    fn expire_at(&self, key: &str, ttl: Duration, now: Instant) {
        self.purge_if_expired(key, now);
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
    }

    fn zadd_at(&self, key: &str, score: f64, member: &str, now: Instant) -> CounterResult<()> {
        self.purge_if_expired(key, now);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::OrderedSet(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::OrderedSet(set) => {
                set.insert(member.to_string(), score);
                Ok(())
            }
            Value::Str(_) => Err(CounterError::Protocol(WRONG_TYPE.to_string())),
        }
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_integer(raw: &str) -> CounterResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| CounterError::Protocol("value is not an integer or out of range".to_string()))
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str) -> CounterResult<i64> {
        self.check_available()?;
        self.increment_at(key, Instant::now())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CounterResult<()> {
        self.check_available()?;
        self.expire_at(key, ttl, Instant::now());
        Ok(())
    }

    async fn add_to_ordered_set(&self, key: &str, score: f64, member: &str) -> CounterResult<()> {
        self.check_available()?;
        self.zadd_at(key, score, member, Instant::now())
    }

    async fn count_in_range(&self, key: &str, min: f64, max: f64) -> CounterResult<u64> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::OrderedSet(set) => Ok(set
                    .values()
                    .filter(|score| **score >= min && **score <= max)
                    .count() as u64),
                Value::Str(_) => Err(CounterError::Protocol(WRONG_TYPE.to_string())),
            },
            _ => Ok(0),
        }
    }

    async fn get_string(&self, key: &str) -> CounterResult<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                Value::OrderedSet(_) => Err(CounterError::Protocol(WRONG_TYPE.to_string())),
            },
            _ => Ok(None),
        }
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<()> {
        self.check_available()?;
        self.apply(
            &CounterCommand::SetString {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
            Instant::now(),
        )
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        self.purge_if_expired(key, now);
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(now + ttl),
                });
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> CounterResult<()> {
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn execute_batch(&self, commands: Vec<CounterCommand>) -> CounterResult<()> {
        self.check_available()?;
        let _guard = self
            .batch_lock
            .lock()
            .map_err(|_| CounterError::Unavailable("batch lock poisoned".to_string()))?;

        // Validated up front, so a rejected batch leaves nothing applied
        let now = Instant::now();
        for command in &commands {
            self.validate(command, now)?;
        }
        for command in &commands {
            self.apply(command, now)?;
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
