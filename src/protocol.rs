use crate::activity::Activity;
use crate::profile::{FitnessLevel, Gender};
use crate::vitals::round_to;
use arrayvec::ArrayVec;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub const MAX_MESSAGE_SIZE: usize = 2048;

pub type MessageBuffer = ArrayVec<u8, MAX_MESSAGE_SIZE>;

/// Ordered fitness category: `Excellent > Good > Average > BelowAverage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardioFitness {
    BelowAverage,
    Average,
    Good,
    Excellent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysiologicalMetrics {
    pub heart_rate: u32,
    pub hrv: f64,
    pub steps: u64,
    pub calories: f64,
    pub blood_oxygen: f64,
    pub temperature: f64,
    pub stress_level: u32,
    pub sleep_quality: f64,
    pub systolic_bp: u32,
    pub diastolic_bp: u32,
    pub respiratory_rate: u32,
    pub recovery_rate: f64,
    pub exertion_level: f64,
    pub vo2_max_estimate: f64,
    pub energy_level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub total_steps: u64,
    pub total_calories: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIndicators {
    pub recovery_score: u32,
    pub cardio_fitness: CardioFitness,
    pub stress_recovery_balance: f64,
}

/// One tick's reading for one subject. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub subject_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub activity: Activity,
    pub duration_seconds: u32,
    pub age: u32,
    pub gender: Gender,
    pub fitness_level: FitnessLevel,
    pub bmr_kcal_day: f64,
    pub physiological_metrics: PhysiologicalMetrics,
    pub session_totals: SessionTotals,
    pub health_indicators: HealthIndicators,
}

/// Live alert pushed to a subject's consumer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub alert: String,
}

impl AlertMessage {
    pub fn emergency(heart_rate: u32, stress_level: u32) -> Self {
        Self {
            alert: format!("Emergency! HR={}, Stress={}", heart_rate, stress_level),
        }
    }
}

/// First line a consumer sends to bind its connection to one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub subscribe: String,
}

/// Compact view of one reading, handed to risk scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<FixedOffset>,
    pub subject_id: String,
    pub activity: Activity,
    pub vital_signs: VitalSigns,
    pub wellness_scores: WellnessScores,
    pub performance_metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalSigns {
    pub heart_rate: u32,
    /// "systolic/diastolic"
    pub blood_pressure: String,
    pub blood_oxygen: f64,
    pub temperature: f64,
    pub respiratory_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellnessScores {
    pub stress_level: u32,
    pub energy_level: u32,
    pub recovery_score: u32,
    pub cardio_fitness: CardioFitness,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub steps_today: u64,
    pub calories_burned: f64,
    pub exertion_level: f64,
    pub vo2_max: f64,
}

impl HealthSnapshot {
    pub fn from_message(message: &TelemetryMessage) -> Self {
        let metrics = &message.physiological_metrics;
        Self {
            timestamp: message.timestamp,
            subject_id: message.subject_id.clone(),
            activity: message.activity,
            vital_signs: VitalSigns {
                heart_rate: metrics.heart_rate,
                blood_pressure: format!("{}/{}", metrics.systolic_bp, metrics.diastolic_bp),
                blood_oxygen: metrics.blood_oxygen,
                temperature: metrics.temperature,
                respiratory_rate: metrics.respiratory_rate,
            },
            wellness_scores: WellnessScores {
                stress_level: metrics.stress_level,
                energy_level: metrics.energy_level,
                recovery_score: message.health_indicators.recovery_score,
                cardio_fitness: message.health_indicators.cardio_fitness,
            },
            performance_metrics: PerformanceMetrics {
                steps_today: message.session_totals.total_steps,
                calories_burned: message.session_totals.total_calories,
                exertion_level: metrics.exertion_level,
                vo2_max: metrics.vo2_max_estimate,
            },
        }
    }
}

/// Roll-up of a monitored activity sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub subject_id: String,
    pub total_duration: u64,
    /// In first-seen order.
    pub activities_covered: Vec<Activity>,
    pub avg_heart_rate: f64,
    pub max_stress: u32,
    pub total_calories: f64,
}

impl SessionSummary {
    /// `None` for an empty sequence.
    pub fn from_messages(messages: &[TelemetryMessage]) -> Option<Self> {
        let last = messages.last()?;

        let mut activities_covered = Vec::new();
        for message in messages {
            if !activities_covered.contains(&message.activity) {
                activities_covered.push(message.activity);
            }
        }

        let heart_rate_sum: f64 = messages
            .iter()
            .map(|m| f64::from(m.physiological_metrics.heart_rate))
            .sum();

        Some(Self {
            subject_id: last.subject_id.clone(),
            total_duration: messages.iter().map(|m| u64::from(m.duration_seconds)).sum(),
            activities_covered,
            avg_heart_rate: round_to(heart_rate_sum / messages.len() as f64, 1),
            max_stress: messages
                .iter()
                .map(|m| m.physiological_metrics.stress_level)
                .max()
                .unwrap_or(0),
            total_calories: last.session_totals.total_calories,
        })
    }
}

/// Output of the external risk-scoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk: f64,
    pub short_report: String,
}

impl RiskAssessment {
    /// Parse raw model output. Accepts bare JSON or JSON inside a ```json
    /// fence with surrounding prose.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let body = extract_fenced_json(raw).unwrap_or(raw).trim();
        let value: serde_json::Value = serde_json::from_str(body).map_err(|_| ProtocolError::InvalidJson)?;

        let risk = value
            .get("risk")
            .ok_or(ProtocolError::MissingField("risk"))?
            .as_f64()
            .ok_or(ProtocolError::InvalidField("risk"))?;
        let short_report = value
            .get("short_report")
            .ok_or(ProtocolError::MissingField("short_report"))?
            .as_str()
            .ok_or(ProtocolError::InvalidField("short_report"))?
            .to_string();

        if !(0.0..=1.0).contains(&risk) {
            return Err(ProtocolError::InvalidField("risk"));
        }

        Ok(Self { risk, short_report })
    }
}

fn extract_fenced_json(raw: &str) -> Option<&str> {
    const FENCE: &str = "```json";
    let start = raw.find(FENCE)? + FENCE.len();
    let rest = &raw[start..];
    Some(rest.find("```").map_or(rest, |end| &rest[..end]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Message exceeds buffer size")]
    MessageTooLarge,
    #[error("Serialization failed")]
    SerializationError,
    #[error("Missing field '{0}'")]
    MissingField(&'static str),
    #[error("Invalid value for field '{0}'")]
    InvalidField(&'static str),
}

/// Newline-delimited JSON framing with a bounded encode buffer. One codec per
/// connection.
#[derive(Debug, Default)]
pub struct MessageCodec {
    buffer: MessageBuffer,
    encoded: u64,
    decoded: u64,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `value` as one JSON line (trailing newline included).
    pub fn encode<T: Serialize>(&mut self, value: &T) -> Result<&str, ProtocolError> {
        self.buffer.clear();

        // Writes past capacity fail with an I/O error instead of growing
        serde_json::to_writer(&mut self.buffer, value).map_err(|e| {
            if e.is_io() {
                ProtocolError::MessageTooLarge
            } else {
                ProtocolError::SerializationError
            }
        })?;
        self.buffer.try_push(b'\n').map_err(|_| ProtocolError::MessageTooLarge)?;
        self.encoded += 1;

        std::str::from_utf8(&self.buffer).map_err(|_| ProtocolError::SerializationError)
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&mut self, line: &str) -> Result<T, ProtocolError> {
        let line = line.trim();
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        let value = serde_json::from_str(line).map_err(|_| ProtocolError::InvalidJson)?;
        self.decoded += 1;
        Ok(value)
    }

    pub fn encoded_count(&self) -> u64 {
        self.encoded
    }

    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }
}

/// Encode a telemetry message as one owned JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(value).map_err(|_| ProtocolError::SerializationError)?;
    if line.len() + 1 > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge);
    }
    line.push('\n');
    Ok(line)
}
