use serde::{Deserialize, Serialize};

const MAX_AGE_YEARS: u32 = 120;
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FitnessLevel {
    Low,
    #[default]
    Average,
    High,
}

/// Demographics of one monitored subject. Fixed for a session; replaced only
/// through an explicit reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub subject_id: String,
    pub age: u32,
    pub gender: Gender,
    pub weight_kg: f64,
    pub height_cm: f64,
    #[serde(default)]
    pub fitness_level: FitnessLevel,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid profile for '{subject_id}': {reason}")]
pub struct InvalidProfile {
    pub subject_id: String,
    pub reason: &'static str,
}

impl SubjectProfile {
    pub fn new(
        subject_id: impl Into<String>,
        age: u32,
        gender: Gender,
        weight_kg: f64,
        height_cm: f64,
        fitness_level: FitnessLevel,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            age,
            gender,
            weight_kg,
            height_cm,
            fitness_level,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidProfile> {
        let reject = |reason| {
            Err(InvalidProfile {
                subject_id: self.subject_id.clone(),
                reason,
            })
        };

        if self.subject_id.is_empty() {
            return reject("subject id is empty");
        }
        if !(self.weight_kg.is_finite() && self.weight_kg > 0.0) {
            return reject("weight must be positive");
        }
        if !(self.height_cm.is_finite() && self.height_cm > 0.0) {
            return reject("height must be positive");
        }
        if self.age == 0 || self.age >= MAX_AGE_YEARS {
            return reject("age out of range");
        }
        if self.bmr_kcal_day() <= 0.0 {
            return reject("basal metabolic rate is not positive");
        }
        Ok(())
    }

    /// Harris-Benedict basal metabolic rate, kcal per day.
    pub fn bmr_kcal_day(&self) -> f64 {
        let age = f64::from(self.age);
        match self.gender {
            Gender::Male => 88.362 + 13.397 * self.weight_kg + 4.799 * self.height_cm - 5.677 * age,
            Gender::Female => 447.593 + 9.247 * self.weight_kg + 3.098 * self.height_cm - 4.330 * age,
        }
    }

    pub fn bmr_kcal_per_second(&self) -> f64 {
        self.bmr_kcal_day() / SECONDS_PER_DAY
    }

    /// Age-predicted maximum heart rate.
    pub fn max_heart_rate(&self) -> f64 {
        220.0 - f64::from(self.age)
    }

    /// Offset scale used by personalization: zero at age 30.
    pub fn age_factor(&self) -> f64 {
        (f64::from(self.age) - 30.0) / 30.0
    }
}

impl Default for SubjectProfile {
    fn default() -> Self {
        Self::new("USER001", 30, Gender::Male, 70.0, 170.0, FitnessLevel::Average)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bmr_matches_harris_benedict() {
        let male = SubjectProfile::new("M1", 55, Gender::Male, 85.0, 175.0, FitnessLevel::Average);
        let expected = 88.362 + 13.397 * 85.0 + 4.799 * 175.0 - 5.677 * 55.0;
        assert!((male.bmr_kcal_day() - expected).abs() < 1e-9);

        let female = SubjectProfile::new("F1", 34, Gender::Female, 62.0, 168.0, FitnessLevel::Average);
        let expected = 447.593 + 9.247 * 62.0 + 3.098 * 168.0 - 4.330 * 34.0;
        assert!((female.bmr_kcal_day() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_profile_validation() {
        assert!(SubjectProfile::default().validate().is_ok());

        let mut profile = SubjectProfile::default();
        profile.weight_kg = 0.0;
        assert_eq!(profile.validate().unwrap_err().reason, "weight must be positive");

        let mut profile = SubjectProfile::default();
        profile.height_cm = -170.0;
        assert!(profile.validate().is_err());

        let mut profile = SubjectProfile::default();
        profile.age = 0;
        assert!(profile.validate().is_err());

        let mut profile = SubjectProfile::default();
        profile.weight_kg = f64::NAN;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_profile_wire_form() {
        let json = r#"{"subject_id":"ATHLETE_001","age":28,"gender":"M","weight_kg":78,"height_cm":182,"fitness_level":"high"}"#;
        let profile: SubjectProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.gender, Gender::Male);
        assert_eq!(profile.fitness_level, FitnessLevel::High);

        // Fitness level is optional and defaults to average
        let json = r#"{"subject_id":"OFFICE_001","age":34,"gender":"F","weight_kg":62,"height_cm":168}"#;
        let profile: SubjectProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.fitness_level, FitnessLevel::Average);
    }
}
