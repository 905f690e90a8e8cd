//! Interfaces to systems outside this crate, with small in-process
//! implementations used by the binaries and tests.

use crate::profile::SubjectProfile;
use crate::protocol::{HealthSnapshot, ProtocolError, RiskAssessment, TelemetryMessage};
use heapless::Deque;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

const ARCHIVE_CAPACITY: usize = 128;

/// Source of subject profiles.
pub trait SubjectDirectory: Send + Sync {
    fn profile(&self, subject_id: &str) -> Option<SubjectProfile>;

    /// Up to `limit` subjects in directory order.
    fn subjects(&self, limit: usize) -> Vec<SubjectProfile>;
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    order: Vec<String>,
    profiles: HashMap<String, SubjectProfile>,
}

impl InMemoryDirectory {
    pub fn new(profiles: impl IntoIterator<Item = SubjectProfile>) -> Self {
        let mut directory = Self::default();
        for profile in profiles {
            directory.upsert(profile);
        }
        directory
    }

    pub fn upsert(&mut self, profile: SubjectProfile) {
        if !self.profiles.contains_key(&profile.subject_id) {
            self.order.push(profile.subject_id.clone());
        }
        self.profiles.insert(profile.subject_id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl SubjectDirectory for InMemoryDirectory {
    fn profile(&self, subject_id: &str) -> Option<SubjectProfile> {
        self.profiles.get(subject_id).cloned()
    }

    fn subjects(&self, limit: usize) -> Vec<SubjectProfile> {
        self.order
            .iter()
            .take(limit)
            .filter_map(|id| self.profiles.get(id).cloned())
            .collect()
    }
}

/// Result of one notification channel attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOutcome {
    pub channel: String,
    pub delivered: bool,
    pub detail: Option<String>,
}

/// Out-of-band alert dispatch (SMS, voice, ...). Runs off the delivery path;
/// its outcome never affects live consumer delivery.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, subject_id: &str, message: &str) -> Vec<ChannelOutcome>;
}

/// Dispatcher that only records alerts in the log.
#[derive(Debug, Default)]
pub struct LoggingDispatcher;

impl NotificationDispatcher for LoggingDispatcher {
    fn notify(&self, subject_id: &str, message: &str) -> Vec<ChannelOutcome> {
        info!("ALERT for {}: {}", subject_id, message);
        vec![ChannelOutcome {
            channel: "log".to_string(),
            delivered: true,
            detail: None,
        }]
    }
}

/// Archive of received telemetry, written off the critical path.
pub trait PersistenceStore: Send + Sync {
    fn archive(&self, message: &TelemetryMessage);
}

/// Keeps the most recent messages in a fixed-size ring.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    messages: Mutex<Deque<TelemetryMessage, ARCHIVE_CAPACITY>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Archived messages for one subject, oldest first.
    pub fn for_subject(&self, subject_id: &str) -> Vec<TelemetryMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.subject_id == subject_id)
            .cloned()
            .collect()
    }
}

impl PersistenceStore for MemoryArchive {
    fn archive(&self, message: &TelemetryMessage) {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        if messages.is_full() {
            messages.pop_front();
        }
        if messages.push_back(message.clone()).is_err() {
            warn!("archive full, dropping message for {}", message.subject_id);
        }
    }
}

/// External risk model. Implementations return the model's raw text; callers
/// go through [`score_snapshot`] to get a checked assessment.
pub trait RiskScorer: Send + Sync {
    fn score_raw(&self, snapshot: &HealthSnapshot) -> String;
}

/// Score `snapshot` and parse the model's answer. Malformed output is a
/// recoverable error for the caller.
pub fn score_snapshot(scorer: &dyn RiskScorer, snapshot: &HealthSnapshot) -> Result<RiskAssessment, ProtocolError> {
    let raw = scorer.score_raw(snapshot);
    RiskAssessment::parse(&raw).map_err(|e| {
        warn!("risk scorer returned unusable output for {}: {}", snapshot.subject_id, e);
        e
    })
}
