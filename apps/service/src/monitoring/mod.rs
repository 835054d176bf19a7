//! Monitoring engine: probing, status evaluation, and due-check scheduling

pub mod checker;
pub mod evaluator;
pub mod interval;
pub mod lease;
pub mod scheduler;
pub mod service;
pub mod types;

pub use checker::{HttpProber, Prober};
pub use evaluator::{Evaluation, StatusEvaluator, Transition};
pub use interval::CheckInterval;
pub use lease::{MonitorLease, MonitorLeases};
pub use scheduler::{BatchReport, DueCheckScheduler};
pub use service::{CheckOutcome, DueCheck, MonitoringService, SkipReason};
pub use types::{CheckResult, CheckStatus, MonitorStatus};
