use chrono::{DateTime, FixedOffset, TimeZone};
use lifelink::collaborators::InMemoryDirectory;
use lifelink::config::ProducerConfig;
use lifelink::relay::TransientCause;
use lifelink::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Sink that keeps everything it accepts and can be switched into an outage.
#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<TelemetryMessage>>,
    down: AtomicBool,
}

impl RecordingSink {
    fn taken(&self) -> Vec<TelemetryMessage> {
        std::mem::take(&mut *self.messages.lock().unwrap())
    }
}

impl TelemetrySink for RecordingSink {
    fn publish(&self, message: &TelemetryMessage) -> Result<(), LinkError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(LinkError::TransientLinkFailure(TransientCause::Disconnected));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn at(second: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2024, 7, 1, 10, 0, second)
        .unwrap()
}

fn subject(id: &str) -> SubjectProfile {
    SubjectProfile {
        subject_id: id.to_string(),
        ..SubjectProfile::default()
    }
}

fn producer(config: ProducerConfig) -> (TelemetryProducer, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let producer = TelemetryProducer::new(config, SignalGenerator::default(), sink.clone());
    (producer, sink)
}

fn seeded() -> ProducerConfig {
    ProducerConfig {
        seed: Some(42),
        ..ProducerConfig::default()
    }
}

#[tokio::test]
async fn test_registration_limits() {
    let (producer, _sink) = producer(seeded());

    for i in 0..5 {
        producer.register(subject(&format!("S{}", i))).await.unwrap();
    }
    assert_eq!(producer.len().await, 5);

    assert_eq!(
        producer.register(subject("S9")).await,
        Err(ProducerError::AtCapacity(5))
    );

    producer.deregister("S4").await.unwrap();
    assert_eq!(
        producer.register(subject("S0")).await,
        Err(ProducerError::DuplicateSubject("S0".to_string()))
    );

    let mut invalid = subject("BAD");
    invalid.age = 0;
    assert!(matches!(
        producer.register(invalid).await,
        Err(ProducerError::Simulation(SimulationError::InvalidProfile(_)))
    ));

    producer.register(subject("S9")).await.unwrap();
    assert_eq!(producer.subject_ids().await, vec!["S0", "S1", "S2", "S3", "S9"]);
}

#[tokio::test]
async fn test_cycle_publishes_one_message_per_subject() {
    let (producer, sink) = producer(seeded());
    producer.register(subject("A")).await.unwrap();
    producer.register(subject("B")).await.unwrap();

    let report = producer.run_cycle_at(at(1)).await;
    assert_eq!(report.ticked, 2);
    assert_eq!(report.published, 2);

    let mut ids: Vec<_> = sink.taken().into_iter().map(|m| m.subject_id).collect();
    ids.sort();
    assert_eq!(ids, vec!["A", "B"]);

    // A removed subject is skipped from the next cycle on
    producer.deregister("A").await.unwrap();
    assert_eq!(
        producer.deregister("A").await,
        Err(ProducerError::UnknownSubject("A".to_string()))
    );
    producer.run_cycle_at(at(2)).await;
    let messages = sink.taken();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].subject_id, "B");
}

#[tokio::test]
async fn test_activity_change_reaches_next_cycle() {
    let (producer, sink) = producer(seeded());
    producer.register(subject("A")).await.unwrap();

    producer.run_cycle_at(at(1)).await;
    assert_eq!(sink.taken()[0].activity, Activity::Resting);

    producer.set_activity("A", Activity::Sleeping).await.unwrap();
    producer.run_cycle_at(at(2)).await;
    assert_eq!(sink.taken()[0].activity, Activity::Sleeping);

    assert!(matches!(
        producer.set_activity_named("A", "levitating").await,
        Err(ProducerError::Simulation(SimulationError::UnknownActivity(_)))
    ));
    assert_eq!(
        producer.set_activity("nobody", Activity::Running).await,
        Err(ProducerError::UnknownSubject("nobody".to_string()))
    );

    let status = producer.status("A").await.unwrap();
    assert_eq!(status.current_activity, Activity::Sleeping);
}

#[tokio::test]
async fn test_outage_skips_publish_without_stopping_simulation() {
    let (producer, sink) = producer(seeded());
    producer.register(subject("A")).await.unwrap();

    sink.down.store(true, Ordering::SeqCst);
    let report = producer.run_cycle_at(at(1)).await;
    assert_eq!(report.ticked, 1);
    assert_eq!(report.skipped, 1);
    assert!(sink.taken().is_empty());

    sink.down.store(false, Ordering::SeqCst);
    producer.run_cycle_at(at(2)).await;
    assert_eq!(sink.taken().len(), 1);

    let stats = producer.stats().await;
    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.published, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.tick_errors, 0);
}

#[tokio::test]
async fn test_reset_profile_restarts_session() {
    let (producer, sink) = producer(seeded());
    producer.register(subject("A")).await.unwrap();
    producer.set_activity("A", Activity::Running).await.unwrap();
    for second in 1..=5 {
        producer.run_cycle_at(at(second)).await;
    }
    let before = sink.taken();
    assert!(before.last().unwrap().session_totals.total_steps > 0);

    let older = SubjectProfile {
        age: 64,
        ..subject("A")
    };
    producer.reset_profile(older).await.unwrap();
    producer.run_cycle_at(at(6)).await;

    let after = sink.taken();
    assert_eq!(after[0].age, 64);
    assert_eq!(after[0].activity, Activity::Resting);
    assert!(after[0].session_totals.total_steps <= 1);

    let mut broken = subject("A");
    broken.height_cm = f64::NAN;
    assert!(producer.reset_profile(broken).await.is_err());
    assert!(producer.reset_profile(subject("Z")).await.is_err());
}

#[tokio::test]
async fn test_load_from_directory_respects_capacity() {
    let (producer, _sink) = producer(seeded());
    let mut invalid = subject("BROKEN");
    invalid.weight_kg = 0.0;

    let mut profiles = vec![invalid];
    profiles.extend((0..7).map(|i| subject(&format!("D{}", i))));
    let directory = InMemoryDirectory::new(profiles);

    // Directory hands over the first five, one of which is invalid
    assert_eq!(producer.load_from_directory(&directory).await, 4);
    assert_eq!(producer.subject_ids().await, vec!["D0", "D1", "D2", "D3"]);
}

#[tokio::test]
async fn test_seeded_producers_agree() {
    let (first, first_sink) = producer(seeded());
    let (second, second_sink) = producer(seeded());
    for p in [&first, &second] {
        p.register(subject("A")).await.unwrap();
        p.set_activity("A", Activity::Walking).await.unwrap();
        for s in 1..=3 {
            p.run_cycle_at(at(s)).await;
        }
    }
    assert_eq!(first_sink.taken(), second_sink.taken());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registration_churn_during_cycles() {
    let config = ProducerConfig {
        max_subjects: 8,
        ..seeded()
    };
    let (producer, sink) = producer(config);
    let producer = Arc::new(producer);

    let churn = {
        let producer = Arc::clone(&producer);
        tokio::spawn(async move {
            let mut seen = HashSet::new();
            for round in 0..100 {
                let id = format!("C{}", round % 12);
                if producer.register(subject(&id)).await.is_ok() {
                    seen.insert(id.clone());
                }
                if round % 3 == 0 {
                    let _ = producer.deregister(&format!("C{}", (round + 5) % 12)).await;
                }
                if round % 4 == 0 {
                    let _ = producer.set_activity(&id, Activity::ALL[round % 7]).await;
                }
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    let cycles = {
        let producer = Arc::clone(&producer);
        tokio::spawn(async move {
            for second in 0..50 {
                producer.run_cycle_at(at(second)).await;
                tokio::task::yield_now().await;
            }
        })
    };

    let registered = timeout(Duration::from_secs(10), churn).await.unwrap().unwrap();
    timeout(Duration::from_secs(10), cycles).await.unwrap().unwrap();

    let messages = sink.taken();
    for message in &messages {
        assert!(registered.contains(&message.subject_id), "{}", message.subject_id);
        assert_eq!(message.duration_seconds, 1);
    }
    assert!(producer.len().await <= 8);

    let stats = producer.stats().await;
    assert_eq!(stats.cycles, 50);
    assert_eq!(stats.published as usize, messages.len());
    assert_eq!(stats.tick_errors, 0);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let config = ProducerConfig {
        tick_interval_ms: 10,
        ..seeded()
    };
    let (producer, sink) = producer(config);
    let producer = Arc::new(producer);
    producer.register(subject("A")).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = {
        let producer = Arc::clone(&producer);
        tokio::spawn(async move { producer.run(shutdown_rx).await })
    };

    timeout(Duration::from_secs(5), async {
        while producer.stats().await.cycles < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(5), running).await.unwrap().unwrap();

    let cycles = producer.stats().await.cycles;
    assert!(sink.taken().len() as u64 >= 3);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(producer.stats().await.cycles, cycles);
}
