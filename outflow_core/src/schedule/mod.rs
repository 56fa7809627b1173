//! Cron parsing for sync schedules.

pub mod cron;

pub use cron::CronExpr;
