use core::fmt;
use core::str::FromStr;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Activity a subject is performing. The set is closed: anything else is
/// rejected when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Resting,
    Walking,
    Running,
    Exercising,
    Sleeping,
    Stressed,
    Meditation,
}

impl Activity {
    pub const ALL: [Activity; 7] = [
        Activity::Resting,
        Activity::Walking,
        Activity::Running,
        Activity::Exercising,
        Activity::Sleeping,
        Activity::Stressed,
        Activity::Meditation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Resting => "resting",
            Activity::Walking => "walking",
            Activity::Running => "running",
            Activity::Exercising => "exercising",
            Activity::Sleeping => "sleeping",
            Activity::Stressed => "stressed",
            Activity::Meditation => "meditation",
        }
    }

    /// Parameter set for this activity.
    pub fn profile(&self) -> &'static ActivityProfile {
        match self {
            Activity::Resting => &RESTING,
            Activity::Walking => &WALKING,
            Activity::Running => &RUNNING,
            Activity::Exercising => &EXERCISING,
            Activity::Sleeping => &SLEEPING,
            Activity::Stressed => &STRESSED,
            Activity::Meditation => &MEDITATION,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown activity '{0}'")]
pub struct UnknownActivity(pub String);

impl FromStr for Activity {
    type Err = UnknownActivity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Activity::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownActivity(s.to_string()))
    }
}

/// Closed interval a value is drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub const ZERO: Band = Band::new(0.0, 0.0);

    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.high <= self.low {
            return self.low;
        }
        rng.gen_range(self.low..=self.high)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityProfile {
    pub heart_rate: Band,
    pub hrv: Band,
    pub blood_oxygen: Band,
    pub temperature: Band,
    pub stress: Band,
    pub respiratory: Band,
    pub systolic: Band,
    pub diastolic: Band,
    pub steps_per_second: f64,
    /// Multiple of the basal metabolic rate burned per second.
    pub calorie_multiplier: f64,

    // Target biases added after the range draw
    pub hrv_bias: Band,
    pub blood_oxygen_bias: Band,
    pub stress_bias: Band,
    pub respiratory_bias: Band,
    pub recovery_drift: Band,

    /// Running and exercising: VO2 tracks heart rate.
    pub aerobic: bool,
    /// Sleeping and meditation: energy and recovery bonuses.
    pub restorative: bool,
}

const RELAXED_HRV: Band = Band::new(5.0, 15.0);
const ACTIVE_HRV: Band = Band::new(-8.0, -3.0);
const RECOVERING: Band = Band::new(0.05, 0.15);
const DEPLETING: Band = Band::new(-0.08, -0.02);

static RESTING: ActivityProfile = ActivityProfile {
    heart_rate: Band::new(58.0, 76.0),
    hrv: Band::new(40.0, 60.0),
    blood_oxygen: Band::new(97.5, 100.0),
    temperature: Band::new(36.3, 36.8),
    stress: Band::new(15.0, 35.0),
    respiratory: Band::new(12.0, 16.0),
    systolic: Band::new(108.0, 122.0),
    diastolic: Band::new(68.0, 82.0),
    steps_per_second: 0.0,
    calorie_multiplier: 1.1,
    hrv_bias: RELAXED_HRV,
    blood_oxygen_bias: Band::ZERO,
    stress_bias: Band::ZERO,
    respiratory_bias: Band::ZERO,
    recovery_drift: RECOVERING,
    aerobic: false,
    restorative: false,
};

static WALKING: ActivityProfile = ActivityProfile {
    heart_rate: Band::new(88.0, 112.0),
    hrv: Band::new(35.0, 55.0),
    blood_oxygen: Band::new(96.5, 99.5),
    temperature: Band::new(36.6, 37.1),
    stress: Band::new(22.0, 42.0),
    respiratory: Band::new(16.0, 22.0),
    systolic: Band::new(112.0, 128.0),
    diastolic: Band::new(72.0, 86.0),
    steps_per_second: 1.8,
    calorie_multiplier: 3.5,
    hrv_bias: ACTIVE_HRV,
    blood_oxygen_bias: Band::new(-1.0, -0.2),
    stress_bias: Band::ZERO,
    respiratory_bias: Band::ZERO,
    recovery_drift: DEPLETING,
    aerobic: false,
    restorative: false,
};

static RUNNING: ActivityProfile = ActivityProfile {
    heart_rate: Band::new(135.0, 175.0),
    hrv: Band::new(25.0, 45.0),
    blood_oxygen: Band::new(94.5, 98.5),
    temperature: Band::new(36.9, 37.6),
    stress: Band::new(45.0, 75.0),
    respiratory: Band::new(28.0, 48.0),
    systolic: Band::new(125.0, 155.0),
    diastolic: Band::new(78.0, 98.0),
    steps_per_second: 4.2,
    calorie_multiplier: 8.5,
    hrv_bias: ACTIVE_HRV,
    blood_oxygen_bias: Band::new(-2.0, -0.5),
    stress_bias: Band::new(8.0, 20.0),
    respiratory_bias: Band::new(5.0, 15.0),
    recovery_drift: DEPLETING,
    aerobic: true,
    restorative: false,
};

static EXERCISING: ActivityProfile = ActivityProfile {
    heart_rate: Band::new(125.0, 165.0),
    hrv: Band::new(30.0, 50.0),
    blood_oxygen: Band::new(95.5, 99.0),
    temperature: Band::new(37.0, 37.7),
    stress: Band::new(55.0, 85.0),
    respiratory: Band::new(24.0, 42.0),
    systolic: Band::new(120.0, 145.0),
    diastolic: Band::new(75.0, 92.0),
    steps_per_second: 2.8,
    calorie_multiplier: 7.0,
    hrv_bias: ACTIVE_HRV,
    blood_oxygen_bias: Band::new(-1.0, -0.2),
    stress_bias: Band::new(8.0, 20.0),
    respiratory_bias: Band::ZERO,
    recovery_drift: DEPLETING,
    aerobic: true,
    restorative: false,
};

static SLEEPING: ActivityProfile = ActivityProfile {
    heart_rate: Band::new(48.0, 62.0),
    hrv: Band::new(50.0, 70.0),
    blood_oxygen: Band::new(98.0, 100.0),
    temperature: Band::new(36.1, 36.4),
    stress: Band::new(8.0, 22.0),
    respiratory: Band::new(9.0, 13.0),
    systolic: Band::new(102.0, 115.0),
    diastolic: Band::new(62.0, 72.0),
    steps_per_second: 0.0,
    calorie_multiplier: 0.95,
    hrv_bias: RELAXED_HRV,
    blood_oxygen_bias: Band::ZERO,
    stress_bias: Band::ZERO,
    respiratory_bias: Band::ZERO,
    recovery_drift: RECOVERING,
    aerobic: false,
    restorative: true,
};

static STRESSED: ActivityProfile = ActivityProfile {
    heart_rate: Band::new(82.0, 108.0),
    hrv: Band::new(20.0, 40.0),
    blood_oxygen: Band::new(97.0, 99.5),
    temperature: Band::new(36.7, 37.3),
    stress: Band::new(65.0, 95.0),
    respiratory: Band::new(18.0, 26.0),
    systolic: Band::new(122.0, 142.0),
    diastolic: Band::new(80.0, 95.0),
    steps_per_second: 0.3,
    calorie_multiplier: 2.2,
    hrv_bias: ACTIVE_HRV,
    blood_oxygen_bias: Band::ZERO,
    stress_bias: Band::ZERO,
    respiratory_bias: Band::ZERO,
    recovery_drift: DEPLETING,
    aerobic: false,
    restorative: false,
};

static MEDITATION: ActivityProfile = ActivityProfile {
    heart_rate: Band::new(52.0, 68.0),
    hrv: Band::new(55.0, 75.0),
    blood_oxygen: Band::new(98.5, 100.0),
    temperature: Band::new(36.2, 36.5),
    stress: Band::new(3.0, 18.0),
    respiratory: Band::new(7.0, 11.0),
    systolic: Band::new(105.0, 118.0),
    diastolic: Band::new(65.0, 75.0),
    steps_per_second: 0.0,
    calorie_multiplier: 1.05,
    hrv_bias: RELAXED_HRV,
    blood_oxygen_bias: Band::ZERO,
    stress_bias: Band::new(-25.0, -10.0),
    respiratory_bias: Band::new(-4.0, -2.0),
    recovery_drift: RECOVERING,
    aerobic: false,
    restorative: true,
};
