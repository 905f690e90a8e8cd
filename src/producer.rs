//! Telemetry producer: a bounded set of simulated subjects ticked on a fixed
//! cadence and published through a [`TelemetrySink`].
//!
//! Each subject lives in its own actor task that exclusively owns its
//! [`SubjectSimulator`]. Everything else talks to it through a mailbox, so a
//! subject's state only ever has one writer. The registry of mailboxes sits
//! behind an async `RwLock`; a cycle clones the handles it needs and releases
//! the lock before ticking, so registration never waits on a cycle.

use crate::activity::Activity;
use crate::collaborators::SubjectDirectory;
use crate::config::ProducerConfig;
use crate::generator::{SignalGenerator, SimulationError, SubjectSimulator, SubjectStatus};
use crate::profile::SubjectProfile;
use crate::protocol::TelemetryMessage;
use crate::relay::{LinkError, TelemetrySink};
use chrono::{DateTime, FixedOffset, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProducerError {
    #[error("producer is at capacity ({0} subjects)")]
    AtCapacity(usize),
    #[error("subject {0} is already registered")]
    DuplicateSubject(String),
    #[error("subject {0} is not registered")]
    UnknownSubject(String),
    #[error("actor for subject {0} has stopped")]
    ActorGone(String),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Current wall-clock time with the local offset.
pub fn local_now() -> DateTime<FixedOffset> {
    Local::now().into()
}

enum Command {
    Tick {
        at: DateTime<FixedOffset>,
        duration_seconds: u32,
        reply: oneshot::Sender<Result<TelemetryMessage, SimulationError>>,
    },
    SetActivity(Activity),
    Reset {
        profile: SubjectProfile,
        now: DateTime<FixedOffset>,
        reply: oneshot::Sender<Result<(), SimulationError>>,
    },
    Status {
        now: DateTime<FixedOffset>,
        reply: oneshot::Sender<SubjectStatus>,
    },
}

#[derive(Debug, Clone)]
struct SubjectHandle {
    mailbox: mpsc::Sender<Command>,
}

impl SubjectHandle {
    fn spawn(simulator: SubjectSimulator, capacity: usize) -> Self {
        let (mailbox, commands) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_subject(simulator, commands));
        Self { mailbox }
    }
}

async fn run_subject(mut simulator: SubjectSimulator, mut commands: mpsc::Receiver<Command>) {
    // Ends once the registry drops the last sender; queued commands still run
    while let Some(command) = commands.recv().await {
        match command {
            Command::Tick { at, duration_seconds, reply } => {
                let _ = reply.send(simulator.tick(duration_seconds, at));
            }
            Command::SetActivity(activity) => simulator.set_activity(activity),
            Command::Reset { profile, now, reply } => {
                let _ = reply.send(simulator.reset_profile(profile, now));
            }
            Command::Status { now, reply } => {
                let _ = reply.send(simulator.status(now));
            }
        }
    }
    debug!("actor for {} stopped after {} ticks", simulator.subject_id(), simulator.ticks());
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStats {
    pub subjects: usize,
    pub cycles: u64,
    pub published: u64,
    /// Publishes refused by the sink because the link was down or full.
    pub skipped: u64,
    pub tick_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    published: AtomicU64,
    skipped: AtomicU64,
    tick_errors: AtomicU64,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub ticked: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct TelemetryProducer {
    config: ProducerConfig,
    generator: SignalGenerator,
    sink: Arc<dyn TelemetrySink>,
    subjects: RwLock<HashMap<String, SubjectHandle>>,
    registrations: AtomicU64,
    counters: Counters,
}

impl TelemetryProducer {
    pub fn new(config: ProducerConfig, generator: SignalGenerator, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            config,
            generator,
            sink,
            subjects: RwLock::new(HashMap::new()),
            registrations: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Start simulating `profile`. Must be called inside a tokio runtime.
    pub async fn register(&self, profile: SubjectProfile) -> Result<(), ProducerError> {
        profile.validate().map_err(SimulationError::from)?;

        let mut subjects = self.subjects.write().await;
        if subjects.contains_key(&profile.subject_id) {
            return Err(ProducerError::DuplicateSubject(profile.subject_id));
        }
        if subjects.len() >= self.config.max_subjects {
            warn!("rejecting {}: at capacity", profile.subject_id);
            return Err(ProducerError::AtCapacity(self.config.max_subjects));
        }

        // Offset the base seed per registration so subjects don't mirror each other
        let index = self.registrations.fetch_add(1, Ordering::Relaxed);
        let seed = self.config.seed.map(|base| base.wrapping_add(index));

        let subject_id = profile.subject_id.clone();
        let simulator = SubjectSimulator::new(self.generator.clone(), profile, seed, local_now())?;
        subjects.insert(subject_id.clone(), SubjectHandle::spawn(simulator, self.config.mailbox_capacity));
        info!("subject {} registered ({} active)", subject_id, subjects.len());
        Ok(())
    }

    /// Stop simulating a subject. Its actor finishes any tick already queued
    /// and then exits.
    pub async fn deregister(&self, subject_id: &str) -> Result<(), ProducerError> {
        let mut subjects = self.subjects.write().await;
        if subjects.remove(subject_id).is_none() {
            return Err(ProducerError::UnknownSubject(subject_id.to_string()));
        }
        info!("subject {} removed ({} active)", subject_id, subjects.len());
        Ok(())
    }

    pub async fn set_activity(&self, subject_id: &str, activity: Activity) -> Result<(), ProducerError> {
        let handle = self.handle(subject_id).await?;
        handle
            .mailbox
            .send(Command::SetActivity(activity))
            .await
            .map_err(|_| ProducerError::ActorGone(subject_id.to_string()))
    }

    pub async fn set_activity_named(&self, subject_id: &str, activity: &str) -> Result<(), ProducerError> {
        let activity = activity.parse::<Activity>().map_err(SimulationError::from)?;
        self.set_activity(subject_id, activity).await
    }

    /// Replace a subject's profile and start a new session for it.
    pub async fn reset_profile(&self, profile: SubjectProfile) -> Result<(), ProducerError> {
        let subject_id = profile.subject_id.clone();
        let handle = self.handle(&subject_id).await?;
        let (reply, response) = oneshot::channel();
        handle
            .mailbox
            .send(Command::Reset { profile, now: local_now(), reply })
            .await
            .map_err(|_| ProducerError::ActorGone(subject_id.clone()))?;
        response.await.map_err(|_| ProducerError::ActorGone(subject_id))??;
        Ok(())
    }

    pub async fn status(&self, subject_id: &str) -> Result<SubjectStatus, ProducerError> {
        let handle = self.handle(subject_id).await?;
        let (reply, response) = oneshot::channel();
        handle
            .mailbox
            .send(Command::Status { now: local_now(), reply })
            .await
            .map_err(|_| ProducerError::ActorGone(subject_id.to_string()))?;
        response.await.map_err(|_| ProducerError::ActorGone(subject_id.to_string()))
    }

    pub async fn subject_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.subjects.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.subjects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Register up to capacity subjects from `directory`, skipping ones that
    /// are already present or invalid. Returns how many were added.
    pub async fn load_from_directory(&self, directory: &dyn SubjectDirectory) -> usize {
        let mut added = 0;
        for profile in directory.subjects(self.config.max_subjects) {
            let subject_id = profile.subject_id.clone();
            match self.register(profile).await {
                Ok(()) => added += 1,
                Err(ProducerError::AtCapacity(_)) => break,
                Err(e) => warn!("skipping {} from directory: {}", subject_id, e),
            }
        }
        added
    }

    async fn handle(&self, subject_id: &str) -> Result<SubjectHandle, ProducerError> {
        self.subjects
            .read()
            .await
            .get(subject_id)
            .cloned()
            .ok_or_else(|| ProducerError::UnknownSubject(subject_id.to_string()))
    }

    /// Tick every registered subject once and publish the results.
    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(local_now()).await
    }

    pub async fn run_cycle_at(&self, at: DateTime<FixedOffset>) -> CycleReport {
        let handles: Vec<(String, SubjectHandle)> = {
            let subjects = self.subjects.read().await;
            subjects.iter().map(|(id, h)| (id.clone(), h.clone())).collect()
        };

        // Queue every tick first so subjects advance concurrently
        let mut pending = Vec::with_capacity(handles.len());
        for (subject_id, handle) in handles {
            let (reply, response) = oneshot::channel();
            let command = Command::Tick {
                at,
                duration_seconds: self.config.duration_seconds,
                reply,
            };
            if handle.mailbox.send(command).await.is_err() {
                debug!("{} went away before its tick", subject_id);
                continue;
            }
            pending.push((subject_id, response));
        }

        let mut report = CycleReport::default();
        for (subject_id, response) in pending {
            let message = match response.await {
                Ok(Ok(message)) => message,
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!("tick failed for {}: {}", subject_id, e);
                    continue;
                }
                Err(_) => continue,
            };
            report.ticked += 1;

            match self.sink.publish(&message) {
                Ok(()) => report.published += 1,
                Err(LinkError::TransientLinkFailure(cause)) => {
                    report.skipped += 1;
                    debug!("publish skipped for {}: {:?}", subject_id, cause);
                }
                Err(e) => {
                    report.skipped += 1;
                    warn!("publish failed for {}: {}", subject_id, e);
                }
            }
        }

        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        self.counters.published.fetch_add(report.published as u64, Ordering::Relaxed);
        self.counters.skipped.fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.counters.tick_errors.fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }

    /// Run cycles on the configured cadence until `shutdown` turns true or
    /// its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("producer running every {:?}", self.config.tick_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    debug!("cycle: {:?}", report);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("producer stopped");
    }

    pub async fn stats(&self) -> ProducerStats {
        ProducerStats {
            subjects: self.len().await,
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            tick_errors: self.counters.tick_errors.load(Ordering::Relaxed),
        }
    }
}
