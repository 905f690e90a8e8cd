//! Simulation core.
//!
//! [`SignalGenerator::tick`] is a pure step function: it reads the previous
//! [`VitalsState`] and returns a new one together with the reading it
//! produced, or an error with the input untouched. Randomness comes only from
//! the `Rng` the caller passes in, and time of day only from the `at`
//! timestamp, so a seeded source makes every tick reproducible.
//!
//! [`SubjectSimulator`] wraps one subject's profile, state, activity and
//! random source for callers that want a stateful handle.

use crate::activity::{Activity, ActivityProfile, UnknownActivity};
use crate::config::SimulationConfig;
use crate::profile::{FitnessLevel, InvalidProfile, SubjectProfile};
use crate::protocol::{HealthIndicators, PhysiologicalMetrics, SessionTotals, TelemetryMessage};
use crate::vitals::{self, round_to, smooth_clipped, variance, VitalsState};
use chrono::{DateTime, FixedOffset, Timelike};
use core::f64::consts::PI;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    UnknownActivity(#[from] UnknownActivity),
    #[error(transparent)]
    InvalidProfile(#[from] InvalidProfile),
    #[error("tick duration must be at least one second")]
    InvalidDuration,
}

/// Vitals that follow a time-of-day rhythm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircadianVital {
    HeartRate,
    Temperature,
    Stress,
}

/// Additive circadian bias for `vital` at `hour_of_day` (0.0..24.0).
pub fn circadian_adjustment(vital: CircadianVital, hour_of_day: f64) -> f64 {
    match vital {
        // Trough at night, peak mid-afternoon
        CircadianVital::HeartRate => -4.0 * ((hour_of_day - 14.0) * PI / 12.0).cos(),
        // Lowest early morning, highest early evening
        CircadianVital::Temperature => 0.25 * ((hour_of_day - 18.0) * PI / 12.0).cos(),
        // Raised through working hours
        CircadianVital::Stress => 8.0 * (0.5 + 0.5 * ((hour_of_day - 14.0) * PI / 8.0).sin()),
    }
}

/// Vitals that carry demographic offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonalizedVital {
    HeartRate,
    Systolic,
}

/// Age and fitness offset for a (vital, activity) pair. Pairs not listed get
/// zero.
pub fn personalization_adjustment(vital: PersonalizedVital, activity: Activity, subject: &SubjectProfile) -> f64 {
    let age_factor = subject.age_factor();
    let high_fitness = subject.fitness_level == FitnessLevel::High;

    match (vital, activity) {
        (PersonalizedVital::HeartRate, Activity::Resting) => -0.25 * age_factor,
        (PersonalizedVital::HeartRate, Activity::Walking) => {
            -0.15 * age_factor - if high_fitness { 5.0 } else { 0.0 }
        }
        (PersonalizedVital::HeartRate, Activity::Running) => {
            -0.1 * age_factor - if high_fitness { 8.0 } else { 0.0 }
        }
        (PersonalizedVital::Systolic, Activity::Resting) => 0.4 * age_factor,
        (PersonalizedVital::Systolic, Activity::Stressed) => 0.6 * age_factor,
        (PersonalizedVital::Systolic, Activity::Exercising) => 0.3 * age_factor,
        _ => 0.0,
    }
}

/// Steps the simulator state forward. Holds configuration only; the state is
/// passed in and returned.
#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    config: SimulationConfig,
}

impl SignalGenerator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Produce one reading. All-or-nothing: on error nothing is returned and
    /// the caller's state is unchanged.
    pub fn tick<R: Rng + ?Sized>(
        &self,
        state: &VitalsState,
        activity: Activity,
        subject: &SubjectProfile,
        duration_seconds: u32,
        at: DateTime<FixedOffset>,
        rng: &mut R,
    ) -> Result<(VitalsState, TelemetryMessage), SimulationError> {
        subject.validate()?;
        if duration_seconds == 0 {
            return Err(SimulationError::InvalidDuration);
        }

        let profile = activity.profile();
        let k = self.config.smoothing_factor;
        let hour = f64::from(at.hour()) + f64::from(at.minute()) / 60.0;
        let duration = f64::from(duration_seconds);

        let mut next = state.clone();

        let target = profile.heart_rate.draw(rng)
            + circadian_adjustment(CircadianVital::HeartRate, hour)
            + personalization_adjustment(PersonalizedVital::HeartRate, activity, subject);
        next.heart_rate = round_to(
            smooth_clipped(rng, state.heart_rate, target, k, variance::HEART_RATE, vitals::HEART_RATE_BOUNDS),
            0,
        );

        let target = profile.hrv.draw(rng) + profile.hrv_bias.draw(rng);
        next.hrv = round_to(
            smooth_clipped(rng, state.hrv, target, k, variance::HRV, vitals::HRV_BOUNDS),
            1,
        );

        // Cumulative counters never move backwards
        let step_delta = profile.steps_per_second * duration + rng.gen_range(-0.5..=1.5);
        next.total_steps = state.total_steps + step_delta.max(0.0);
        let calorie_delta = subject.bmr_kcal_per_second() * profile.calorie_multiplier * duration
            + rng.gen_range(-0.02..=0.05);
        next.total_calories = state.total_calories + calorie_delta.max(0.0);

        let target = profile.blood_oxygen.draw(rng) + profile.blood_oxygen_bias.draw(rng);
        next.blood_oxygen = round_to(
            smooth_clipped(rng, state.blood_oxygen, target, k, variance::BLOOD_OXYGEN, vitals::BLOOD_OXYGEN_BOUNDS),
            1,
        );

        let target = profile.temperature.draw(rng) + circadian_adjustment(CircadianVital::Temperature, hour);
        next.temperature = round_to(
            smooth_clipped(rng, state.temperature, target, k, variance::TEMPERATURE, vitals::TEMPERATURE_BOUNDS),
            2,
        );

        let target = profile.stress.draw(rng)
            + circadian_adjustment(CircadianVital::Stress, hour)
            + profile.stress_bias.draw(rng);
        next.stress_level = round_to(
            smooth_clipped(rng, state.stress_level, target, k, variance::STRESS, vitals::STRESS_BOUNDS),
            0,
        );

        next.sleep_quality = round_to(
            vitals::SLEEP_QUALITY_BOUNDS.clip(next_sleep_quality(rng, state.sleep_quality, next.stress_level, activity)),
            1,
        );

        let target = profile.systolic.draw(rng)
            + personalization_adjustment(PersonalizedVital::Systolic, activity, subject);
        next.systolic_bp = round_to(
            smooth_clipped(rng, state.systolic_bp, target, k, variance::SYSTOLIC, vitals::SYSTOLIC_BOUNDS),
            0,
        );
        let target = profile.diastolic.draw(rng);
        next.diastolic_bp = round_to(
            smooth_clipped(rng, state.diastolic_bp, target, k, variance::DIASTOLIC, vitals::DIASTOLIC_BOUNDS),
            0,
        );

        let target = profile.respiratory.draw(rng) + profile.respiratory_bias.draw(rng);
        next.respiratory_rate = round_to(
            smooth_clipped(rng, state.respiratory_rate, target, k, variance::RESPIRATORY, vitals::RESPIRATORY_BOUNDS),
            0,
        );

        next.recovery_rate = round_to(
            vitals::RECOVERY_RATE_BOUNDS.clip(state.recovery_rate + profile.recovery_drift.draw(rng)),
            2,
        );

        let metrics = self.derive_metrics(&next, profile, subject, rng);
        let health_indicators = self.health_indicators(&metrics, profile);
        let message = TelemetryMessage {
            subject_id: subject.subject_id.clone(),
            timestamp: at,
            activity,
            duration_seconds,
            age: subject.age,
            gender: subject.gender,
            fitness_level: subject.fitness_level,
            bmr_kcal_day: round_to(subject.bmr_kcal_day(), 1),
            session_totals: SessionTotals {
                total_steps: metrics.steps,
                total_calories: metrics.calories,
            },
            physiological_metrics: metrics,
            health_indicators,
        };

        Ok((next, message))
    }

    fn derive_metrics<R: Rng + ?Sized>(
        &self,
        state: &VitalsState,
        profile: &ActivityProfile,
        subject: &SubjectProfile,
        rng: &mut R,
    ) -> PhysiologicalMetrics {
        let exertion = round_to(
            vitals::PERCENT_BOUNDS.clip(state.heart_rate / subject.max_heart_rate() * 100.0),
            1,
        );

        let vo2_max = if profile.aerobic {
            let fitness_bonus = match subject.fitness_level {
                FitnessLevel::High => 8.0,
                FitnessLevel::Low => -5.0,
                FitnessLevel::Average => 0.0,
            };
            35.0 + (state.heart_rate - 70.0) * 0.1 + fitness_bonus
        } else {
            30.0 + rng.gen_range(-3.0..=3.0)
        };

        let energy_model = &self.config.health.energy;
        let rest_bonus = if profile.restorative { energy_model.rest_bonus } else { 0.0 };
        let noise = vitals::draw_noise(rng, energy_model.noise);
        let energy = vitals::PERCENT_BOUNDS.clip(
            100.0 - energy_model.stress_weight * state.stress_level - energy_model.exertion_weight * exertion
                + rest_bonus
                + noise,
        );

        PhysiologicalMetrics {
            heart_rate: state.heart_rate as u32,
            hrv: state.hrv,
            steps: state.total_steps.floor() as u64,
            calories: round_to(state.total_calories, 2),
            blood_oxygen: state.blood_oxygen,
            temperature: state.temperature,
            stress_level: state.stress_level as u32,
            sleep_quality: state.sleep_quality,
            systolic_bp: state.systolic_bp as u32,
            diastolic_bp: state.diastolic_bp as u32,
            respiratory_rate: state.respiratory_rate as u32,
            recovery_rate: state.recovery_rate,
            exertion_level: exertion,
            vo2_max_estimate: round_to(vo2_max, 1),
            energy_level: energy.round() as u32,
        }
    }

    fn health_indicators(&self, metrics: &PhysiologicalMetrics, profile: &ActivityProfile) -> HealthIndicators {
        HealthIndicators {
            recovery_score: recovery_score(metrics, profile.restorative),
            cardio_fitness: self.config.health.classify_cardio(
                metrics.vo2_max_estimate,
                metrics.hrv,
                metrics.recovery_rate,
            ),
            stress_recovery_balance: round_to(
                metrics.recovery_rate * 100.0 - f64::from(metrics.stress_level) * 0.5,
                1,
            ),
        }
    }
}

fn next_sleep_quality<R: Rng + ?Sized>(rng: &mut R, current: f64, stress_level: f64, activity: Activity) -> f64 {
    if activity == Activity::Sleeping {
        (current + rng.gen_range(0.4..=1.2)).min(100.0)
    } else {
        // Awake: slow decay, read as a readiness score
        let decayed = (current + rng.gen_range(-0.2..=-0.05)).max(50.0);
        (decayed + (100.0 - stress_level) * 0.3).min(100.0)
    }
}

/// Weighted blend of sleep, HRV, stress and recovery, 0..=100.
pub fn recovery_score(metrics: &PhysiologicalMetrics, restorative: bool) -> u32 {
    let mut score = 50.0;
    score += (metrics.sleep_quality * 0.3).min(25.0);
    score += (metrics.hrv * 0.4).min(20.0);
    score -= (f64::from(metrics.stress_level) * 0.2).min(15.0);
    score += (metrics.recovery_rate * 50.0).min(10.0);
    if restorative {
        score += 10.0;
    }
    vitals::PERCENT_BOUNDS.clip(score).round() as u32
}

/// Point-in-time view of a subject without advancing the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectStatus {
    pub subject_id: String,
    pub current_activity: Activity,
    pub session_duration_seconds: i64,
    pub total_steps: u64,
    pub total_calories: f64,
    pub current_heart_rate: u32,
    pub current_stress: u32,
    pub timestamp: DateTime<FixedOffset>,
}

/// One subject's simulation: profile, smoothed state, current activity and
/// its own random source.
#[derive(Debug)]
pub struct SubjectSimulator {
    generator: SignalGenerator,
    profile: SubjectProfile,
    state: VitalsState,
    activity: Activity,
    session_start: DateTime<FixedOffset>,
    rng: StdRng,
    ticks: u64,
}

impl SubjectSimulator {
    pub fn new(
        generator: SignalGenerator,
        profile: SubjectProfile,
        seed: Option<u64>,
        now: DateTime<FixedOffset>,
    ) -> Result<Self, SimulationError> {
        profile.validate()?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            generator,
            state: VitalsState::baseline(&profile),
            profile,
            activity: Activity::Resting,
            session_start: now,
            rng,
            ticks: 0,
        })
    }

    pub fn subject_id(&self) -> &str {
        &self.profile.subject_id
    }

    pub fn profile(&self) -> &SubjectProfile {
        &self.profile
    }

    pub fn state(&self) -> &VitalsState {
        &self.state
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Applies from the next tick on. Smoothed state carries over.
    pub fn set_activity(&mut self, activity: Activity) {
        if activity != self.activity {
            debug!("{}: activity {} -> {}", self.profile.subject_id, self.activity, activity);
        }
        self.activity = activity;
    }

    pub fn set_activity_named(&mut self, name: &str) -> Result<(), SimulationError> {
        let activity = name.parse::<Activity>()?;
        self.set_activity(activity);
        Ok(())
    }

    pub fn tick(&mut self, duration_seconds: u32, at: DateTime<FixedOffset>) -> Result<TelemetryMessage, SimulationError> {
        let (next, message) = self.generator.tick(
            &self.state,
            self.activity,
            &self.profile,
            duration_seconds,
            at,
            &mut self.rng,
        )?;
        self.state = next;
        self.ticks += 1;
        Ok(message)
    }

    /// Switch activity and tick in one call. The switch is validated first;
    /// an unknown name leaves everything untouched.
    pub fn tick_as(
        &mut self,
        activity: &str,
        duration_seconds: u32,
        at: DateTime<FixedOffset>,
    ) -> Result<TelemetryMessage, SimulationError> {
        let activity = activity.parse::<Activity>()?;
        let previous = self.activity;
        self.activity = activity;
        self.tick(duration_seconds, at).map_err(|e| {
            self.activity = previous;
            e
        })
    }

    /// Replace the profile and start a fresh session.
    pub fn reset_profile(&mut self, profile: SubjectProfile, now: DateTime<FixedOffset>) -> Result<(), SimulationError> {
        profile.validate()?;
        self.state = VitalsState::baseline(&profile);
        self.profile = profile;
        self.activity = Activity::Resting;
        self.session_start = now;
        self.ticks = 0;
        Ok(())
    }

    pub fn status(&self, now: DateTime<FixedOffset>) -> SubjectStatus {
        SubjectStatus {
            subject_id: self.profile.subject_id.clone(),
            current_activity: self.activity,
            session_duration_seconds: (now - self.session_start).num_seconds(),
            total_steps: self.state.total_steps.floor() as u64,
            total_calories: round_to(self.state.total_calories, 2),
            current_heart_rate: self.state.heart_rate.round() as u32,
            current_stress: self.state.stress_level.round() as u32,
            timestamp: now,
        }
    }
}
