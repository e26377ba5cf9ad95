//! Run creation shared by the HTTP surface and the crontab schedules

mod run;

pub use run::{RunError, RunService};
