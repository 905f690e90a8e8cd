use crate::profile::{Gender, SubjectProfile};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fraction of the gap to the target closed per tick.
pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.15;

/// Hard floor/ceiling for a clipped vital.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub floor: f64,
    pub ceiling: f64,
}

impl Bounds {
    const fn new(floor: f64, ceiling: f64) -> Self {
        Self { floor, ceiling }
    }

    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.floor, self.ceiling)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.floor && value <= self.ceiling
    }
}

pub const HEART_RATE_BOUNDS: Bounds = Bounds::new(35.0, 210.0);
pub const HRV_BOUNDS: Bounds = Bounds::new(5.0, 120.0);
pub const BLOOD_OXYGEN_BOUNDS: Bounds = Bounds::new(94.0, 100.0);
pub const TEMPERATURE_BOUNDS: Bounds = Bounds::new(35.0, 39.5);
pub const STRESS_BOUNDS: Bounds = Bounds::new(0.0, 100.0);
pub const SLEEP_QUALITY_BOUNDS: Bounds = Bounds::new(0.0, 100.0);
pub const SYSTOLIC_BOUNDS: Bounds = Bounds::new(80.0, 190.0);
pub const DIASTOLIC_BOUNDS: Bounds = Bounds::new(45.0, 120.0);
pub const RESPIRATORY_BOUNDS: Bounds = Bounds::new(5.0, 60.0);
pub const RECOVERY_RATE_BOUNDS: Bounds = Bounds::new(0.0, 1.0);
pub const PERCENT_BOUNDS: Bounds = Bounds::new(0.0, 100.0);

/// Per-tick noise amplitude for each smoothed vital.
pub mod variance {
    pub const HEART_RATE: f64 = 2.5;
    pub const HRV: f64 = 3.0;
    pub const BLOOD_OXYGEN: f64 = 0.4;
    pub const TEMPERATURE: f64 = 0.08;
    pub const STRESS: f64 = 4.0;
    pub const SYSTOLIC: f64 = 1.8;
    pub const DIASTOLIC: f64 = 1.5;
    pub const RESPIRATORY: f64 = 1.2;
}

/// Smoothed physiological state of one subject, carried between ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsState {
    pub heart_rate: f64,
    pub hrv: f64,
    pub blood_oxygen: f64,
    pub temperature: f64,
    pub stress_level: f64,
    pub sleep_quality: f64,
    pub systolic_bp: f64,
    pub diastolic_bp: f64,
    pub respiratory_rate: f64,
    pub recovery_rate: f64,
    pub total_steps: f64,
    pub total_calories: f64,
}

impl VitalsState {
    /// Demographic baseline for a freshly registered subject.
    pub fn baseline(profile: &SubjectProfile) -> Self {
        let age = f64::from(profile.age);
        let age_adjustment = ((age - 30.0) * 0.3).max(0.0);
        let gender_adjustment = match profile.gender {
            Gender::Female => -3.0,
            Gender::Male => 2.0,
        };

        Self {
            heart_rate: 72.0 + gender_adjustment - age_adjustment,
            hrv: 45.0,
            blood_oxygen: 98.5,
            temperature: 36.7,
            stress_level: 25.0,
            sleep_quality: 85.0,
            systolic_bp: 118.0 + age * 0.2,
            diastolic_bp: 78.0,
            respiratory_rate: 15.5,
            recovery_rate: 0.8,
            total_steps: 0.0,
            total_calories: 0.0,
        }
    }

    /// Violations of the hard bounds, by field name. Empty for a healthy state.
    pub fn bound_violations(&self) -> Vec<&'static str> {
        let checks = [
            ("heart_rate", HEART_RATE_BOUNDS, self.heart_rate),
            ("hrv", HRV_BOUNDS, self.hrv),
            ("blood_oxygen", BLOOD_OXYGEN_BOUNDS, self.blood_oxygen),
            ("temperature", TEMPERATURE_BOUNDS, self.temperature),
            ("stress_level", STRESS_BOUNDS, self.stress_level),
            ("sleep_quality", SLEEP_QUALITY_BOUNDS, self.sleep_quality),
            ("systolic_bp", SYSTOLIC_BOUNDS, self.systolic_bp),
            ("diastolic_bp", DIASTOLIC_BOUNDS, self.diastolic_bp),
            ("respiratory_rate", RESPIRATORY_BOUNDS, self.respiratory_rate),
            ("recovery_rate", RECOVERY_RATE_BOUNDS, self.recovery_rate),
        ];

        checks
            .iter()
            .filter(|(_, bounds, value)| !bounds.contains(*value))
            .map(|(name, _, _)| *name)
            .collect()
    }
}

/// One exponential smoothing step: close `factor` of the gap to `target` and
/// add `noise`. Pure; the caller draws the noise.
pub fn smooth_toward(current: f64, target: f64, factor: f64, noise: f64) -> f64 {
    current + (target - current) * factor + noise
}

/// Uniform noise in `[-variance, variance]`.
pub fn draw_noise<R: Rng + ?Sized>(rng: &mut R, variance: f64) -> f64 {
    if variance <= 0.0 {
        return 0.0;
    }
    rng.gen_range(-variance..=variance)
}

/// Smooth toward `target` with noise drawn from `rng`, then clip.
pub fn smooth_clipped<R: Rng + ?Sized>(
    rng: &mut R,
    current: f64,
    target: f64,
    factor: f64,
    variance: f64,
    bounds: Bounds,
) -> f64 {
    let noise = draw_noise(rng, variance);
    bounds.clip(smooth_toward(current, target, factor, noise))
}

/// Round to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FitnessLevel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_baseline_personalization() {
        let older = SubjectProfile::new("A", 55, Gender::Male, 85.0, 175.0, FitnessLevel::Average);
        let state = VitalsState::baseline(&older);
        assert!((state.systolic_bp - 129.0).abs() < 1e-9);
        assert!((state.heart_rate - (74.0 - 7.5)).abs() < 1e-9);

        // No age penalty below thirty
        let younger = SubjectProfile::new("B", 22, Gender::Female, 60.0, 165.0, FitnessLevel::High);
        let state = VitalsState::baseline(&younger);
        assert!((state.heart_rate - 69.0).abs() < 1e-9);
        assert!(state.bound_violations().is_empty());
    }

    #[test]
    fn test_smoothing_is_pure() {
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(close(smooth_toward(100.0, 120.0, 0.15, 0.0), 103.0));
        assert!(close(smooth_toward(100.0, 120.0, 0.15, -1.0), 102.0));
        assert!(close(smooth_toward(100.0, 80.0, 0.5, 0.0), 90.0));
        // Zero factor only applies noise
        assert!(close(smooth_toward(50.0, 99.0, 0.0, 0.5), 50.5));
    }

    #[test]
    fn test_smoothing_with_seeded_noise_is_reproducible() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let x = smooth_clipped(&mut a, 98.0, 96.0, 0.15, 0.4, BLOOD_OXYGEN_BOUNDS);
            let y = smooth_clipped(&mut b, 98.0, 96.0, 0.15, 0.4, BLOOD_OXYGEN_BOUNDS);
            assert_eq!(x, y);
            assert!(BLOOD_OXYGEN_BOUNDS.contains(x));
        }
    }

    #[test]
    fn test_clip_at_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        // Target far above the ceiling still lands inside
        let value = smooth_clipped(&mut rng, 99.9, 200.0, 1.0, 0.4, BLOOD_OXYGEN_BOUNDS);
        assert_eq!(value, 100.0);
        let value = smooth_clipped(&mut rng, 0.1, -50.0, 1.0, 4.0, STRESS_BOUNDS);
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(36.756, 2), 36.76);
        assert_eq!(round_to(97.04, 1), 97.0);
        assert_eq!(round_to(72.5001, 0), 73.0);
    }
}
