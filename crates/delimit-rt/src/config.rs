// SPDX-License-Identifier: (MIT OR Apache-2.0)

/// Settings shared by both schedulers.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Label attached to log records from this instance.
    pub name: String,
    /// Turn a panic inside a routine step into `Error::Panicked` instead
    /// of unwinding through the scheduler.
    pub catch_panics: bool,
}

impl SchedulerConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "delimit".to_string(),
            catch_panics: true,
        }
    }
}
