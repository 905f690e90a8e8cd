//! # LifeLink
//!
//! Per-subject physiological telemetry simulation with a resilient delivery
//! path from producer to aggregator and live alert fan-out to consumers.
//!
//! ## Features
//!
//! - **Activity-driven vitals**: seven activity profiles drive smoothed,
//!   bounded vital signs with circadian and personal adjustments
//! - **Deterministic ticks**: every random draw comes from an injected RNG
//! - **Actor per subject**: a subject's state has exactly one writer
//! - **Resilient relay**: fixed-backoff reconnection with at-most-once delivery
//! - **Alert fan-out**: threshold alerts pushed to the subject's live consumer
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{FixedOffset, TimeZone};
//! use lifelink::{Activity, SubjectProfile, SubjectSimulator};
//!
//! let now = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
//! let mut subject = SubjectSimulator::new(Default::default(), SubjectProfile::default(), Some(7), now).unwrap();
//!
//! subject.set_activity(Activity::Running);
//! let reading = subject.tick(1, now).unwrap();
//! assert_eq!(reading.activity, Activity::Running);
//! ```
//!
//! ## Architecture
//!
//! - [`activity`] - Activity enum and per-activity target bands
//! - [`profile`] - Subject demographics and derived constants
//! - [`vitals`] - Smoothed state, bounds and the smoothing step
//! - [`generator`] - The tick function and per-subject simulator
//! - [`protocol`] - Wire messages and the line codec
//! - [`producer`] - Subject actors ticked on a cadence
//! - [`relay`] - Reconnecting producer-to-aggregator link
//! - [`aggregator`] - Alert evaluation and the consumer registry
//! - [`collaborators`] - Directory, notification, archive and risk interfaces
//! - [`config`] - JSON configuration

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod activity;
pub mod aggregator;
pub mod collaborators;
pub mod config;
pub mod generator;
pub mod producer;
pub mod profile;
pub mod protocol;
pub mod relay;
pub mod vitals;

// Re-export main public types for convenience
pub use activity::{Activity, ActivityProfile, UnknownActivity};
pub use aggregator::{Aggregator, ConsumerRegistry, Delivery};
pub use config::LifelinkConfig;
pub use generator::{SignalGenerator, SimulationError, SubjectSimulator};
pub use producer::{ProducerError, TelemetryProducer};
pub use profile::{FitnessLevel, Gender, SubjectProfile};
pub use protocol::{AlertMessage, TelemetryMessage};
pub use relay::{LinkError, RelayLink, TcpConnector, TelemetrySink};
pub use vitals::VitalsState;
