//! Runtime tuning knobs.

use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

/// Settings for [`crate::runtime::handle::spawn_cart`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How long a removed line stays available to undo.
    pub undo_window: Duration,
    /// Capacity of the command channel into the writer task.
    pub command_queue_bound: usize,
    /// Capacity of the write queue into the persistence worker.
    pub persist_queue_bound: usize,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            undo_window: Duration::from_secs(10),
            command_queue_bound: 256,
            persist_queue_bound: 64,
            event_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `CARTSTORE_*` environment variables.
    ///
    /// Missing or malformed values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            undo_window: Duration::from_millis(try_load(
                "CARTSTORE_UNDO_WINDOW_MS",
                defaults.undo_window.as_millis() as u64,
            )),
            command_queue_bound: try_load(
                "CARTSTORE_COMMAND_QUEUE_BOUND",
                defaults.command_queue_bound,
            )
            .max(1),
            persist_queue_bound: try_load(
                "CARTSTORE_PERSIST_QUEUE_BOUND",
                defaults.persist_queue_bound,
            )
            .max(1),
            event_capacity: try_load("CARTSTORE_EVENT_CAPACITY", defaults.event_capacity).max(1),
        }
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = env::var(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}
