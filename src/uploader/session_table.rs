use std::fmt;
use std::str::FromStr;
use tokio::time::{Duration, Instant};

use crate::errors::{AppError, AppResult};

/// Opaque handle to a slot in a [`SessionTable`].
///
/// Renders as a short string (`<index>.<generation>` in hex) small enough for
/// callback data. A token outlives its slot harmlessly: once the slot is
/// reused the generation no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken {
    index: u32,
    generation: u32,
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}.{:x}", self.index, self.generation)
    }
}

impl FromStr for SessionToken {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::validation("session_token", "Malformed session token");

        let (index, generation) = s.split_once('.').ok_or_else(invalid)?;
        Ok(SessionToken {
            index: u32::from_str_radix(index, 16).map_err(|_| invalid())?,
            generation: u32::from_str_radix(generation, 16).map_err(|_| invalid())?,
        })
    }
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Bounded arena of short-lived values keyed by [`SessionToken`].
///
/// Time is always passed in by the caller; the table never reads the clock.
pub struct SessionTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    capacity: usize,
    len: usize,
}

impl<T> SessionTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stores `value` until `now + ttl`. A full table first reclaims expired
    /// slots and only then refuses.
    pub fn insert(&mut self, value: T, now: Instant, ttl: Duration) -> AppResult<SessionToken> {
        if self.free.is_empty() && self.slots.len() >= self.capacity {
            self.evict_expired(now);
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                self.slots.len() - 1
            }
            None => {
                return Err(AppError::validation(
                    "session_table",
                    &format!("All {} session slots are in use", self.capacity),
                ))
            }
        };

        let slot = &mut self.slots[index];
        slot.entry = Some(Entry {
            value,
            expires_at: now + ttl,
        });
        self.len += 1;

        Ok(SessionToken {
            index: index as u32,
            generation: slot.generation,
        })
    }

    /// The live value for `token`, or `None` if it expired or was removed.
    pub fn get(&self, token: SessionToken, now: Instant) -> Option<&T> {
        let slot = self.slots.get(token.index as usize)?;
        if slot.generation != token.generation {
            return None;
        }
        slot.entry
            .as_ref()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| &entry.value)
    }

    /// Removes the entry for `token`. Expired entries are freed but not returned.
    pub fn take(&mut self, token: SessionToken, now: Instant) -> Option<T> {
        let index = token.index as usize;
        match self.slots.get(index) {
            Some(slot) if slot.generation == token.generation && slot.entry.is_some() => {}
            _ => return None,
        }

        let entry = self.release(index)?;
        (entry.expires_at > now).then_some(entry.value)
    }

    /// Frees every expired slot and returns how many were evicted.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.entry
                    .as_ref()
                    .map(|entry| entry.expires_at <= now)
                    .unwrap_or(false)
            })
            .map(|(index, _)| index)
            .collect();

        for &index in &expired {
            self.release(index);
        }

        if !expired.is_empty() {
            log::debug!("Evicted {} expired session(s)", expired.len());
        }
        expired.len()
    }

    fn release(&mut self, index: usize) -> Option<Entry<T>> {
        let slot = &mut self.slots[index];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(entry)
    }
}
