//! Hybrid logical clock.
//!
//! Each replica owns one [`Clock`]. It produces timestamps that are strictly
//! increasing locally and, after [`Clock::observe`], strictly greater than
//! anything the replica has seen from its peers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{client_id_from_unique_id, decode_hlc, encode_hlc, MAX_COUNTER, MAX_LOGICAL_TIME};
use crate::error::{CoreError, Result};
use crate::types::Timestamp;

/// Source of wall-clock readings, in milliseconds since the Unix epoch.
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Reads the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A wall clock that only moves when told to. Used to make concurrent-write
/// scenarios deterministic.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(now_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Per-replica HLC state.
pub struct Clock {
    last_logical_time: u64,
    last_counter: u32,
    client_id: String,
    time: Arc<dyn TimeSource>,
}

impl Clock {
    /// Create a clock whose client id is derived from `unique_id`.
    pub fn new(unique_id: &str, time: Arc<dyn TimeSource>) -> Self {
        Self {
            last_logical_time: 0,
            last_counter: 0,
            client_id: client_id_from_unique_id(unique_id),
            time,
        }
    }

    /// Create a clock reading the system time.
    pub fn with_system_time(unique_id: &str) -> Self {
        Self::new(unique_id, Arc::new(SystemTimeSource))
    }

    /// The encoded replica id occupying the last characters of every timestamp.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Produce the next timestamp.
    ///
    /// Fails with [`CoreError::ClockExhausted`] once both the logical time and
    /// the counter are at their maximum; the clock is left unchanged.
    pub fn next(&mut self) -> Result<Timestamp> {
        let now = self.wall_clock();
        if now > self.last_logical_time {
            self.last_logical_time = now;
            self.last_counter = 0;
        } else {
            self.bump_counter()?;
        }
        Ok(encode_hlc(self.last_logical_time, self.last_counter, &self.client_id))
    }

    /// Merge a remote timestamp into the local state without producing one.
    ///
    /// The empty timestamp is ignored. A malformed timestamp is an error and
    /// leaves the clock untouched.
    pub fn observe(&mut self, remote: &Timestamp) -> Result<()> {
        if remote.is_empty() {
            return Ok(());
        }
        let remote = decode_hlc(remote)?;
        let now = self.wall_clock();
        let local_time = self.last_logical_time;
        let merged = local_time.max(remote.logical_time).max(now);

        self.last_counter = if merged == local_time && merged == remote.logical_time {
            self.last_counter.max(remote.counter)
        } else if merged == local_time {
            self.last_counter
        } else if merged == remote.logical_time {
            remote.counter
        } else {
            0
        };
        self.last_logical_time = merged;
        Ok(())
    }

    fn bump_counter(&mut self) -> Result<()> {
        if self.last_counter < MAX_COUNTER {
            self.last_counter += 1;
        } else if self.last_logical_time < MAX_LOGICAL_TIME {
            self.last_logical_time += 1;
            self.last_counter = 0;
        } else {
            return Err(CoreError::ClockExhausted);
        }
        Ok(())
    }

    fn wall_clock(&self) -> u64 {
        self.time.now_millis().min(MAX_LOGICAL_TIME)
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("last_logical_time", &self.last_logical_time)
            .field("last_counter", &self.last_counter)
            .field("client_id", &self.client_id)
            .finish()
    }
}
