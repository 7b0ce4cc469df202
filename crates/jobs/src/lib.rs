//! Scheduled work for Brandcast: the daily visual job queue, the generation
//! backend client, and notification scheduling/delivery.
//!
//! Everything here runs off durable rows. The api crate triggers ticks via
//! the batch endpoint; the worker binary triggers them on a cron. Both paths
//! share the same conditional-update state machine, so concurrent ticks are
//! safe.

pub mod daily;
pub mod error;
pub mod generate;
pub mod notify;
pub mod runner;

pub use daily::ensure_daily_jobs;
pub use error::{JobsError, JobsResult};
pub use generate::{derive_prompt, pick_angle, GenerationClient, GenerationConfig};
pub use notify::{DeliveryConfig, NotificationScheduler, MESSAGE_TYPE_CONVERSION};
pub use runner::{JobRunner, TickSummary};
