pub mod config;
pub mod detect;
pub mod grading;
pub mod queue;
pub mod registry;
pub mod report;
pub mod sandbox;
pub mod submission;
pub mod worker;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
