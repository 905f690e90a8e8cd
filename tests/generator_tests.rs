use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use lifelink::*;
use lifelink::config::{EnergyModel, HealthModel, SimulationConfig};
use lifelink::generator::SimulationError;
use lifelink::protocol::{CardioFitness, HealthSnapshot, SessionSummary};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn start() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 3, 10, 6, 0, 0)
        .unwrap()
}

#[test]
fn test_vitals_stay_bounded_for_every_activity() {
    let generator = SignalGenerator::default();
    let subject = SubjectProfile::default();
    let mut rng = StdRng::seed_from_u64(2024);

    for activity in Activity::ALL {
        let mut state = VitalsState::baseline(&subject);
        let mut at = start();

        for tick in 0..10_000 {
            // Walk through the whole day so circadian terms hit both extremes
            at += Duration::seconds(37);
            let (next, message) = generator
                .tick(&state, activity, &subject, 1, at, &mut rng)
                .unwrap();

            assert!(
                next.bound_violations().is_empty(),
                "{} tick {}: {:?} out of bounds in {:?}",
                activity,
                tick,
                next.bound_violations(),
                next
            );
            assert!(next.total_steps >= state.total_steps);
            assert!(next.total_calories >= state.total_calories);
            assert!(message.physiological_metrics.energy_level <= 100);
            assert!(message.physiological_metrics.exertion_level <= 100.0);
            assert!(message.health_indicators.recovery_score <= 100);

            state = next;
        }
    }
}

#[test]
fn test_session_counters_never_decrease() {
    let mut subject = SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(5), start()).unwrap();
    let mut at = start();
    let mut last_steps = 0;
    let mut last_calories = 0.0;

    for (i, activity) in Activity::ALL.iter().cycle().take(200).enumerate() {
        subject.set_activity(*activity);
        at += Duration::seconds(30);
        let message = subject.tick(30, at).unwrap();
        assert!(message.session_totals.total_steps >= last_steps, "tick {}", i);
        assert!(message.session_totals.total_calories >= last_calories, "tick {}", i);
        last_steps = message.session_totals.total_steps;
        last_calories = message.session_totals.total_calories;
    }

    assert!(last_steps > 0);
    assert!(last_calories > 0.0);
}

#[test]
fn test_unknown_activity_leaves_state_unchanged() {
    let mut subject = SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(9), start()).unwrap();
    subject.tick(1, start()).unwrap();

    let state_before = subject.state().clone();
    let activity_before = subject.activity();

    let result = subject.tick_as("juggling", 1, start());
    assert_eq!(
        result.unwrap_err(),
        SimulationError::UnknownActivity(UnknownActivity("juggling".to_string()))
    );
    assert_eq!(subject.state(), &state_before);
    assert_eq!(subject.activity(), activity_before);
    assert_eq!(subject.ticks(), 1);

    assert!(subject.set_activity_named("juggling").is_err());
    assert_eq!(subject.activity(), activity_before);
}

#[test]
fn test_activity_switch_applies_to_next_tick() {
    let mut subject = SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(1), start()).unwrap();

    let first = subject.tick(1, start()).unwrap();
    assert_eq!(first.activity, Activity::Resting);

    subject.set_activity(Activity::Running);
    let second = subject.tick(1, start() + Duration::seconds(1)).unwrap();
    assert_eq!(second.activity, Activity::Running);

    // Smoothed state carries over: one tick of running only closes part of the gap
    assert!(second.physiological_metrics.heart_rate < 120);
    assert!(second.physiological_metrics.heart_rate > first.physiological_metrics.heart_rate);
}

#[test]
fn test_stressed_systolic_scenario() {
    let profile = SubjectProfile::new("BP001", 55, Gender::Male, 85.0, 175.0, FitnessLevel::Average);
    let baseline = VitalsState::baseline(&profile);
    assert!((baseline.systolic_bp - 129.0).abs() < 1e-9);

    let generator = SignalGenerator::default();
    // Target 122..142 plus 0.6 * (55 - 30) / 30, smoothed at 0.15 from 129,
    // then up to 1.8 of noise either way, rounded.
    for seed in 0..500 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (next, message) = generator
            .tick(&baseline, Activity::Stressed, &profile, 1, start(), &mut rng)
            .unwrap();
        assert!(
            (126.0..=133.0).contains(&next.systolic_bp),
            "seed {}: systolic {}",
            seed,
            next.systolic_bp
        );
        assert_eq!(message.physiological_metrics.systolic_bp, next.systolic_bp as u32);
    }
}

#[test]
fn test_same_seed_same_messages() {
    let run = |seed| {
        let mut subject =
            SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(seed), start()).unwrap();
        let mut messages = Vec::new();
        for (i, activity) in Activity::ALL.iter().enumerate() {
            subject.set_activity(*activity);
            messages.push(subject.tick(10, start() + Duration::seconds(10 * (i as i64 + 1))).unwrap());
        }
        messages
    };

    assert_eq!(run(77), run(77));
    assert_ne!(run(77), run(78));
}

#[test]
fn test_message_wire_form() {
    let mut subject = SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(3), start()).unwrap();
    subject.set_activity(Activity::Walking);
    let message = subject.tick(5, start()).unwrap();

    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["subject_id"], "USER001");
    assert_eq!(value["activity"], "walking");
    assert_eq!(value["duration_seconds"], 5);
    assert_eq!(value["gender"], "M");
    assert_eq!(value["timestamp"], "2024-03-10T06:00:00+02:00");
    assert!(value["physiological_metrics"]["vo2_max_estimate"].is_number());
    assert!(value["session_totals"]["total_steps"].is_number());
    assert!(value["health_indicators"]["cardio_fitness"].is_string());

    let decoded: TelemetryMessage = serde_json::from_value(value).unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn test_reset_profile_starts_new_session() {
    let mut subject = SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(4), start()).unwrap();
    subject.set_activity(Activity::Running);
    for i in 1..=5 {
        subject.tick(60, start() + Duration::seconds(60 * i)).unwrap();
    }
    assert!(subject.state().total_steps > 0.0);

    let later = start() + Duration::minutes(10);
    let replacement = SubjectProfile::new("USER001", 45, Gender::Female, 62.0, 168.0, FitnessLevel::High);
    subject.reset_profile(replacement.clone(), later).unwrap();

    assert_eq!(subject.profile(), &replacement);
    assert_eq!(subject.activity(), Activity::Resting);
    assert_eq!(subject.ticks(), 0);
    assert_eq!(subject.state(), &VitalsState::baseline(&replacement));

    let status = subject.status(later + Duration::seconds(30));
    assert_eq!(status.session_duration_seconds, 30);
    assert_eq!(status.total_steps, 0);

    // An invalid replacement is refused and the session continues
    let mut broken = replacement.clone();
    broken.weight_kg = -1.0;
    assert!(subject.reset_profile(broken, later).is_err());
    assert_eq!(subject.profile(), &replacement);
}

#[test]
fn test_session_summary_over_sequence() {
    let mut subject = SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(12), start()).unwrap();
    let sequence = ["resting", "walking", "running", "walking", "resting"];

    let messages: Vec<_> = sequence
        .iter()
        .enumerate()
        .map(|(i, name)| subject.tick_as(name, 60, start() + Duration::minutes(i as i64 + 1)).unwrap())
        .collect();

    let summary = SessionSummary::from_messages(&messages).unwrap();
    assert_eq!(summary.subject_id, "USER001");
    assert_eq!(summary.total_duration, 300);
    assert_eq!(
        summary.activities_covered,
        vec![Activity::Resting, Activity::Walking, Activity::Running]
    );
    let max_stress = messages.iter().map(|m| m.physiological_metrics.stress_level).max().unwrap();
    assert_eq!(summary.max_stress, max_stress);
    assert_eq!(summary.total_calories, messages[4].session_totals.total_calories);

    assert!(SessionSummary::from_messages(&[]).is_none());
}

#[test]
fn test_snapshot_mirrors_message() {
    let mut subject = SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(8), start()).unwrap();
    let message = subject.tick_as("exercising", 1, start()).unwrap();
    let snapshot = HealthSnapshot::from_message(&message);

    let metrics = &message.physiological_metrics;
    assert_eq!(snapshot.activity, Activity::Exercising);
    assert_eq!(snapshot.vital_signs.heart_rate, metrics.heart_rate);
    assert_eq!(
        snapshot.vital_signs.blood_pressure,
        format!("{}/{}", metrics.systolic_bp, metrics.diastolic_bp)
    );
    assert_eq!(snapshot.wellness_scores.cardio_fitness, message.health_indicators.cardio_fitness);
    assert!(snapshot.wellness_scores.cardio_fitness >= CardioFitness::BelowAverage);
}

// Values rounded to one decimal place land within half a step of the formula
const ONE_DECIMAL: f64 = 0.05 + 1e-9;

#[test]
fn test_exertion_and_vo2_follow_heart_rate() {
    for fitness_level in [FitnessLevel::Low, FitnessLevel::Average, FitnessLevel::High] {
        let profile = SubjectProfile::new("DM001", 40, Gender::Female, 60.0, 165.0, fitness_level);
        let mut subject = SubjectSimulator::new(SignalGenerator::default(), profile, Some(31), start()).unwrap();
        let fitness_bonus = match fitness_level {
            FitnessLevel::High => 8.0,
            FitnessLevel::Low => -5.0,
            FitnessLevel::Average => 0.0,
        };
        let mut at = start();

        for (i, activity) in Activity::ALL.iter().cycle().take(140).enumerate() {
            subject.set_activity(*activity);
            at += Duration::seconds(10);
            let message = subject.tick(10, at).unwrap();
            let metrics = &message.physiological_metrics;
            let heart_rate = f64::from(metrics.heart_rate);

            let exertion = (heart_rate / (220.0 - 40.0) * 100.0).min(100.0);
            assert!(
                (metrics.exertion_level - exertion).abs() <= ONE_DECIMAL,
                "tick {}: exertion {} for HR {}",
                i,
                metrics.exertion_level,
                heart_rate
            );

            if activity.profile().aerobic {
                let vo2 = 35.0 + (heart_rate - 70.0) * 0.1 + fitness_bonus;
                assert!(
                    (metrics.vo2_max_estimate - vo2).abs() <= ONE_DECIMAL,
                    "{} tick {}: vo2 {} for HR {}",
                    activity,
                    i,
                    metrics.vo2_max_estimate,
                    heart_rate
                );
            } else {
                assert!(
                    (27.0..=33.0).contains(&metrics.vo2_max_estimate),
                    "{} tick {}: vo2 {}",
                    activity,
                    i,
                    metrics.vo2_max_estimate
                );
            }
        }
    }
}

#[test]
fn test_energy_without_noise_matches_model() {
    let energy = EnergyModel {
        noise: 0.0,
        ..EnergyModel::default()
    };
    let config = SimulationConfig {
        health: HealthModel {
            energy,
            ..HealthModel::default()
        },
        ..SimulationConfig::default()
    };
    let mut subject = SubjectSimulator::new(SignalGenerator::new(config), SubjectProfile::default(), Some(64), start()).unwrap();
    let mut at = start();
    let mut restorative_ticks = 0;

    for (i, activity) in Activity::ALL.iter().cycle().take(70).enumerate() {
        subject.set_activity(*activity);
        at += Duration::seconds(20);
        let message = subject.tick(20, at).unwrap();
        let metrics = &message.physiological_metrics;

        let rest_bonus = if activity.profile().restorative {
            restorative_ticks += 1;
            15.0
        } else {
            0.0
        };
        let expected = (100.0 - 0.8 * f64::from(metrics.stress_level) - 0.3 * metrics.exertion_level + rest_bonus)
            .clamp(0.0, 100.0)
            .round() as u32;
        assert_eq!(metrics.energy_level, expected, "{} tick {}", activity, i);
    }

    // Sleeping and meditation both carry the bonus
    assert_eq!(restorative_ticks, 20);
}

#[test]
fn test_sleep_quality_builds_while_sleeping() {
    let mut subject = SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(21), start()).unwrap();
    subject.set_activity(Activity::Sleeping);
    let initial = subject.state().sleep_quality;
    let mut previous = initial;
    let mut at = start();

    for i in 0..40 {
        at += Duration::minutes(5);
        let message = subject.tick(300, at).unwrap();
        let quality = message.physiological_metrics.sleep_quality;
        assert!(quality >= previous, "tick {}: {} after {}", i, quality, previous);
        assert!(quality <= 100.0);
        previous = quality;
    }

    assert!(previous > initial, "{} did not rise from {}", previous, initial);
}

#[test]
fn test_awake_sleep_quality_reads_as_readiness() {
    let mut subject = SubjectSimulator::new(SignalGenerator::default(), SubjectProfile::default(), Some(55), start()).unwrap();
    let awake = [Activity::Stressed, Activity::Running, Activity::Resting, Activity::Walking];
    let mut at = start();

    for (i, activity) in awake.iter().cycle().take(60).enumerate() {
        subject.set_activity(*activity);
        let previous = subject.state().sleep_quality;
        at += Duration::seconds(30);
        let message = subject.tick(30, at).unwrap();
        let metrics = &message.physiological_metrics;

        let readiness = (100.0 - f64::from(metrics.stress_level)) * 0.3;
        let lowest = ((previous - 0.2).max(50.0) + readiness).min(100.0);
        let highest = ((previous - 0.05).max(50.0) + readiness).min(100.0);
        assert!(
            metrics.sleep_quality >= lowest - ONE_DECIMAL && metrics.sleep_quality <= highest + ONE_DECIMAL,
            "{} tick {}: {} outside {}..={}",
            activity,
            i,
            metrics.sleep_quality,
            lowest,
            highest
        );
    }
}
