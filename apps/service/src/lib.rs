//! Hawk monitoring engine.
//!
//! Probes HTTP monitors, folds each result into a threshold-based aggregate
//! status, and drives incident creation/resolution plus Slack notifications
//! from the status transitions. Web and API layers call into
//! [`MonitoringService`] and [`DueCheckScheduler`]; storage sits behind the
//! [`Repository`] trait.

pub mod config;
pub mod database;
pub mod error;
pub mod incidents;
pub mod monitoring;
pub mod notifications;
pub mod pool;
pub mod validation;

pub use database::{InMemoryRepository, LibsqlRepository, Repository};
pub use error::EngineError;
pub use incidents::{IncidentCoordinator, IncidentReport};
pub use monitoring::{
    CheckInterval, CheckOutcome, CheckResult, DueCheckScheduler, HttpProber, MonitoringService,
    Prober, StatusEvaluator,
};
pub use notifications::{Notifier, SlackWebhookTransport};
