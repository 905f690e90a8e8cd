//! Aggregator side of the pipeline: threshold alerting over incoming
//! telemetry and per-subject live alert channels.
//!
//! Alerts are never queued for absent consumers. If no channel is registered
//! for a subject when its alert is computed, the alert is dropped and the
//! outcome is [`Delivery::ConsumerUnavailable`], which is not an error.
//!
//! Archive and notification hooks run inline unless a hook worker is spawned,
//! in which case both go through one bounded queue and never block
//! [`Aggregator::handle`].

use crate::collaborators::{NotificationDispatcher, PersistenceStore};
use crate::config::AlertPolicy;
use crate::protocol::{AlertMessage, MessageCodec, SubscribeRequest, TelemetryMessage};
use chrono::{DateTime, FixedOffset};
use heapless::Deque;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ALERT_HISTORY_SIZE: usize = 64;

/// What happened to one computed alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Delivery {
    Delivered,
    /// No live channel for the subject; alert dropped.
    ConsumerUnavailable,
    /// The consumer's buffer is full; this alert dropped for it only.
    ConsumerLagging,
}

/// Receiving end of a subject's alert channel.
#[derive(Debug)]
pub struct ConsumerLease {
    subject_id: String,
    token: u64,
    receiver: mpsc::Receiver<AlertMessage>,
}

impl ConsumerLease {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub async fn recv(&mut self) -> Option<AlertMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AlertMessage> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug)]
struct ConsumerSlot {
    token: u64,
    sender: mpsc::Sender<AlertMessage>,
}

/// Subject id to live alert channel. Last registration wins.
#[derive(Debug)]
pub struct ConsumerRegistry {
    channels: RwLock<HashMap<String, ConsumerSlot>>,
    next_token: AtomicU64,
    buffer: usize,
}

impl ConsumerRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a channel for `subject_id`, replacing any existing one. The
    /// replaced consumer sees its channel close.
    pub fn register(&self, subject_id: &str) -> ConsumerLease {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let previous = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subject_id.to_string(), ConsumerSlot { token, sender });
        if previous.is_some() {
            info!("consumer for {} replaced", subject_id);
        } else {
            info!("consumer for {} registered", subject_id);
        }

        ConsumerLease {
            subject_id: subject_id.to_string(),
            token,
            receiver,
        }
    }

    /// Remove whatever channel is registered for `subject_id`. Idempotent.
    pub fn deregister(&self, subject_id: &str) -> bool {
        let removed = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(subject_id)
            .is_some();
        if removed {
            info!("consumer for {} deregistered", subject_id);
        }
        removed
    }

    /// Remove the lease's own registration, leaving a newer one in place.
    pub fn release(&self, lease: &ConsumerLease) -> bool {
        self.remove_if_token(&lease.subject_id, lease.token)
    }

    fn remove_if_token(&self, subject_id: &str, token: u64) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        match channels.get(subject_id) {
            Some(slot) if slot.token == token => {
                channels.remove(subject_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, subject_id: &str) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(subject_id)
    }

    pub fn len(&self) -> usize {
        self.channels.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `alert` to the subject's channel without waiting.
    pub fn deliver(&self, subject_id: &str, alert: AlertMessage) -> Delivery {
        let (token, result) = {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            let Some(slot) = channels.get(subject_id) else {
                return Delivery::ConsumerUnavailable;
            };
            (slot.token, slot.sender.try_send(alert))
        };

        match result {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                warn!("consumer for {} is lagging, alert dropped", subject_id);
                Delivery::ConsumerLagging
            }
            Err(TrySendError::Closed(_)) => {
                // Consumer went away without releasing
                self.remove_if_token(subject_id, token);
                Delivery::ConsumerUnavailable
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub subject_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub heart_rate: u32,
    pub stress_level: u32,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    pub messages_received: u64,
    pub malformed_messages: u64,
    pub alerts_raised: u64,
    pub alerts_delivered: u64,
    pub alerts_dropped: u64,
    /// Archive or notification jobs lost to a full hook queue.
    pub hook_jobs_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages_received: AtomicU64,
    malformed_messages: AtomicU64,
    alerts_raised: AtomicU64,
    alerts_delivered: AtomicU64,
    alerts_dropped: AtomicU64,
    hook_jobs_dropped: AtomicU64,
}

enum HookJob {
    Archive(TelemetryMessage),
    Notify { subject_id: String, text: String },
}

#[derive(Clone, Default)]
struct Hooks {
    dispatcher: Option<Arc<dyn NotificationDispatcher>>,
    archive: Option<Arc<dyn PersistenceStore>>,
}

impl Hooks {
    fn run(&self, job: HookJob) {
        match job {
            HookJob::Archive(message) => {
                if let Some(archive) = &self.archive {
                    archive.archive(&message);
                }
            }
            HookJob::Notify { subject_id, text } => {
                let Some(dispatcher) = &self.dispatcher else {
                    return;
                };
                for outcome in dispatcher.notify(&subject_id, &text) {
                    if !outcome.delivered {
                        warn!("notification via {} failed for {}: {:?}", outcome.channel, subject_id, outcome.detail);
                    }
                }
            }
        }
    }
}

pub struct Aggregator {
    policy: AlertPolicy,
    registry: ConsumerRegistry,
    hooks: Hooks,
    hook_queue: Option<mpsc::Sender<HookJob>>,
    history: Mutex<Deque<AlertRecord, ALERT_HISTORY_SIZE>>,
    counters: Counters,
}

impl Aggregator {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            registry: ConsumerRegistry::new(policy.consumer_buffer),
            policy,
            hooks: Hooks::default(),
            hook_queue: None,
            history: Mutex::new(Deque::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.hooks.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn PersistenceStore>) -> Self {
        self.hooks.archive = Some(archive);
        self
    }

    /// Run archive and notification hooks on one blocking worker fed by a
    /// queue of `policy.hook_queue` jobs. Jobs arriving while the queue is
    /// full are dropped. Set the hooks before calling this. The worker exits
    /// once the aggregator is dropped and the queue drains.
    pub fn spawn_hook_worker(mut self) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel(self.policy.hook_queue.max(1));
        let hooks = self.hooks.clone();
        let worker = tokio::task::spawn_blocking(move || {
            while let Some(job) = receiver.blocking_recv() {
                hooks.run(job);
            }
            debug!("hook worker stopped");
        });
        self.hook_queue = Some(sender);
        (self, worker)
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    pub fn should_alert(&self, message: &TelemetryMessage) -> bool {
        let metrics = &message.physiological_metrics;
        f64::from(metrics.heart_rate) > self.policy.heart_rate_high
            || f64::from(metrics.stress_level) > self.policy.stress_high
    }

    /// Evaluate one reading. Returns `None` when nothing alerts, otherwise
    /// the outcome of live delivery.
    pub fn handle(&self, message: &TelemetryMessage) -> Option<Delivery> {
        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
        let metrics = &message.physiological_metrics;
        debug!(
            "{}: HR={}, Stress={}",
            message.subject_id, metrics.heart_rate, metrics.stress_level
        );

        if self.hooks.archive.is_some() {
            self.submit(HookJob::Archive(message.clone()));
        }

        if !self.should_alert(message) {
            return None;
        }

        self.counters.alerts_raised.fetch_add(1, Ordering::Relaxed);
        let alert = AlertMessage::emergency(metrics.heart_rate, metrics.stress_level);
        if self.hooks.dispatcher.is_some() {
            self.submit(HookJob::Notify {
                subject_id: message.subject_id.clone(),
                text: alert.alert.clone(),
            });
        }

        let delivery = self.registry.deliver(&message.subject_id, alert);
        match delivery {
            Delivery::Delivered => self.counters.alerts_delivered.fetch_add(1, Ordering::Relaxed),
            Delivery::ConsumerUnavailable | Delivery::ConsumerLagging => {
                self.counters.alerts_dropped.fetch_add(1, Ordering::Relaxed)
            }
        };

        self.record(AlertRecord {
            subject_id: message.subject_id.clone(),
            timestamp: message.timestamp,
            heart_rate: metrics.heart_rate,
            stress_level: metrics.stress_level,
            delivery,
        });

        Some(delivery)
    }

    fn submit(&self, job: HookJob) {
        let Some(queue) = &self.hook_queue else {
            self.hooks.run(job);
            return;
        };
        match queue.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters.hook_jobs_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("hook queue full, job dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.hook_jobs_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("hook worker gone, job dropped");
            }
        }
    }

    fn record(&self, record: AlertRecord) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.is_full() {
            history.pop_front();
        }
        let _ = history.push_back(record);
    }

    /// Most recent alerts, oldest first.
    pub fn recent_alerts(&self) -> Vec<AlertRecord> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            malformed_messages: self.counters.malformed_messages.load(Ordering::Relaxed),
            alerts_raised: self.counters.alerts_raised.load(Ordering::Relaxed),
            alerts_delivered: self.counters.alerts_delivered.load(Ordering::Relaxed),
            alerts_dropped: self.counters.alerts_dropped.load(Ordering::Relaxed),
            hook_jobs_dropped: self.counters.hook_jobs_dropped.load(Ordering::Relaxed),
        }
    }

    /// Read newline-delimited telemetry from one producer connection until it
    /// closes. Messages are handled one at a time; malformed lines are
    /// skipped. Returns the number of messages handled.
    pub async fn serve_producer<S>(&self, stream: S) -> io::Result<u64>
    where
        S: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let mut codec = MessageCodec::new();
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            match codec.decode::<TelemetryMessage>(&line) {
                Ok(message) => {
                    self.handle(&message);
                }
                Err(e) => {
                    self.counters.malformed_messages.fetch_add(1, Ordering::Relaxed);
                    warn!("dropping malformed telemetry line: {}", e);
                }
            }
        }

        Ok(codec.decoded_count())
    }

    /// Serve one live consumer: read its subscription line, then stream
    /// alerts as JSON lines until either side closes. Only this connection's
    /// own registration is removed on exit.
    pub async fn serve_consumer<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut codec = MessageCodec::new();
        let mut line = String::new();

        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let request: SubscribeRequest = match codec.decode(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("bad consumer subscription: {}", e);
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
        };

        let mut lease = self.registry.register(&request.subscribe);
        let result = stream_alerts(&mut lease, &mut reader, &mut writer, &mut codec).await;

        self.registry.release(&lease);
        info!("consumer for {} disconnected", request.subscribe);
        result
    }
}

/// Forward alerts from `lease` to `writer` until the consumer hangs up or the
/// lease is replaced.
async fn stream_alerts<R, W>(
    lease: &mut ConsumerLease,
    reader: &mut BufReader<R>,
    writer: &mut W,
    codec: &mut MessageCodec,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        tokio::select! {
            alert = lease.recv() => {
                // Channel closed: a newer consumer took over
                let Some(alert) = alert else { return Ok(()) };
                let encoded = codec
                    .encode(&alert)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                writer.write_all(encoded.as_bytes()).await?;
            }
            read = reader.read_line(&mut line) => {
                if read? == 0 {
                    return Ok(());
                }
            }
        }
    }
}
