//! Runtime entities: process instances, jobs, incidents, timers and messages.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::record::{IncidentRecord, JobRecord, MessageRecord, ProcessInstanceRecord, TimerRecord};

/// A keyed collection of one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState<V> {
    entries: BTreeMap<i64, V>,
}

impl<V> Default for EntityState<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> EntityState<V> {
    pub fn get(&self, key: i64) -> Option<&V> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: i64) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &V)> {
        self.entries.iter().map(|(key, value)| (*key, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn put(&mut self, key: i64, value: V) {
        self.entries.insert(key, value);
    }

    pub(crate) fn remove(&mut self, key: i64) -> Option<V> {
        self.entries.remove(&key)
    }
}

pub type ProcessInstanceState = EntityState<ProcessInstanceRecord>;
pub type JobState = EntityState<JobRecord>;
pub type IncidentState = EntityState<IncidentRecord>;

/// Timers ordered by key; due timers are found by a full scan.
pub type TimerState = EntityState<TimerRecord>;

impl TimerState {
    /// Timers whose due date is at or before `now_millis`.
    pub fn due_timers(&self, now_millis: i64) -> impl Iterator<Item = (i64, &TimerRecord)> {
        self.iter().filter(move |(_, timer)| timer.due_date <= now_millis)
    }
}

/// Buffered messages plus the ids used to reject duplicate publications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageState {
    messages: BTreeMap<i64, MessageRecord>,
    message_ids: BTreeSet<String>,
}

impl MessageState {
    pub fn get(&self, key: i64) -> Option<&MessageRecord> {
        self.messages.get(&key)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns `true` if a live message with the same id was already published.
    pub fn exists(&self, message: &MessageRecord) -> bool {
        Self::id_key(message).is_some_and(|id| self.message_ids.contains(&id))
    }

    /// Messages whose deadline is at or before `now_millis`.
    pub fn expired(&self, now_millis: i64) -> impl Iterator<Item = (i64, &MessageRecord)> {
        self.messages
            .iter()
            .filter(move |(_, message)| message.deadline <= now_millis)
            .map(|(key, message)| (*key, message))
    }

    pub(crate) fn put(&mut self, key: i64, message: MessageRecord) {
        if let Some(id) = Self::id_key(&message) {
            self.message_ids.insert(id);
        }
        self.messages.insert(key, message);
    }

    pub(crate) fn remove(&mut self, key: i64) {
        let Some(message) = self.messages.remove(&key) else {
            return;
        };
        if let Some(id) = Self::id_key(&message) {
            self.message_ids.remove(&id);
        }
    }

    fn id_key(message: &MessageRecord) -> Option<String> {
        let id = message.message_id.as_deref().filter(|id| !id.is_empty())?;
        Some(format!(
            "{}\u{1f}{}\u{1f}{}",
            message.name, message.correlation_key, id
        ))
    }
}
