use once_cell::sync::Lazy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Reads `key` from the environment and parses it, falling back to `default`
/// when the variable is unset or malformed.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok()).unwrap_or(default)
}

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: quizbot.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "quizbot.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: quizbot.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "quizbot.log".to_string()));

/// Directory holding `<category>.json` quiz catalogs
/// Read from QUIZ_DIR environment variable
/// Default: quizzes
pub static QUIZ_DIR: Lazy<String> = Lazy::new(|| env::var("QUIZ_DIR").unwrap_or_else(|_| "quizzes".to_string()));

/// Category assigned to chats that never picked one
pub static DEFAULT_CATEGORY: Lazy<String> =
    Lazy::new(|| env::var("DEFAULT_CATEGORY").unwrap_or_else(|_| "general".to_string()));

/// Port for the Prometheus/health HTTP server. 0 disables it.
pub static METRICS_PORT: Lazy<u16> = Lazy::new(|| env_or("METRICS_PORT", 9090));

/// Bot API client settings
pub mod network {
    use super::{env_or, Duration, Lazy};

    /// Must exceed the long-polling timeout or getUpdates calls are cut short
    pub static REQUEST_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| env_or("REQUEST_TIMEOUT_SECS", 60));

    pub fn timeout() -> Duration {
        Duration::from_secs(*REQUEST_TIMEOUT_SECS)
    }
}

/// Admin configuration
pub mod admin {
    use once_cell::sync::Lazy;
    use std::env;

    pub(crate) fn parse_admin_ids(raw: &str) -> Vec<i64> {
        raw.split([',', ' ', '\n', '\t'])
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    }

    /// Admin user IDs (comma-separated)
    /// Read from ADMIN_IDS environment variable
    pub static ADMIN_IDS: Lazy<Vec<i64>> = Lazy::new(|| {
        env::var("ADMIN_IDS")
            .ok()
            .map(|raw| parse_admin_ids(&raw))
            .unwrap_or_default()
    });
}

/// Task queue and worker pool configuration
pub mod queue {
    use super::{env_or, Duration, Lazy};

    /// Number of concurrent quiz deliveries
    pub static MAX_WORKERS: Lazy<usize> = Lazy::new(|| env_or("MAX_WORKERS", 4));

    /// Queue length at which new tasks are rejected
    pub static QUEUE_SOFT_CAP: Lazy<usize> = Lazy::new(|| env_or("QUEUE_SOFT_CAP", 1000));

    /// How long the dispatcher blocks on an empty queue before re-checking health
    pub const DEQUEUE_TIMEOUT_MS: u64 = 1000;

    /// Bounded wait for in-flight deliveries on shutdown
    pub const STOP_GRACE_SECS: u64 = 30;

    pub fn dequeue_timeout() -> Duration {
        Duration::from_millis(DEQUEUE_TIMEOUT_MS)
    }

    pub fn stop_grace() -> Duration {
        Duration::from_secs(STOP_GRACE_SECS)
    }
}

/// Per-chat daily delivery caps
pub mod limits {
    use super::{env_or, Lazy};

    /// Daily cap for private chats
    pub static DAILY_LIMIT_PRIVATE: Lazy<u32> = Lazy::new(|| env_or("DAILY_LIMIT_PRIVATE", 100));

    /// Daily cap for groups and supergroups
    pub static DAILY_LIMIT_GROUP: Lazy<u32> = Lazy::new(|| env_or("DAILY_LIMIT_GROUP", 100));
}

/// Recurring quiz schedule
pub mod schedule {
    pub const DEFAULT_INTERVAL_SECS: u64 = 30;
    pub const MIN_INTERVAL_SECS: u64 = 10;
}

/// Delivery retry policy
pub mod retry {
    use super::Duration;

    pub const MAX_RETRIES: u32 = 3;
    pub const INITIAL_DELAY_SECS: u64 = 1;
    pub const MAX_DELAY_SECS: u64 = 30;

    pub fn initial_delay() -> Duration {
        Duration::from_secs(INITIAL_DELAY_SECS)
    }

    pub fn max_delay() -> Duration {
        Duration::from_secs(MAX_DELAY_SECS)
    }
}

/// Batch size and rate limit levels shared by the worker pool and broadcasts
pub mod throttle {
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    pub const WARNING_MIN_BATCH_SIZE: usize = 50;
    pub const MIN_BATCH_SIZE: usize = 25;

    /// Sends per second
    pub const DEFAULT_RATE_LIMIT: u32 = 30;
    pub const WARNING_MIN_RATE_LIMIT: u32 = 20;
    pub const CPU_WARNING_MIN_RATE_LIMIT: u32 = 15;
    pub const MIN_RATE_LIMIT: u32 = 10;

    /// Amount the rate limit drops per warning pass
    pub const RATE_STEP: u32 = 5;
}

/// Resource monitor thresholds and timings
pub mod monitor {
    use super::{env_or, Duration, Lazy};

    pub static MEMORY_WARNING_MB: Lazy<u64> = Lazy::new(|| env_or("MEMORY_WARNING_MB", 6000));
    pub static MEMORY_CRITICAL_MB: Lazy<u64> = Lazy::new(|| env_or("MEMORY_CRITICAL_MB", 7000));
    pub static MEMORY_EMERGENCY_MB: Lazy<u64> = Lazy::new(|| env_or("MEMORY_EMERGENCY_MB", 7500));
    pub static CPU_WARNING_PERCENT: Lazy<f32> = Lazy::new(|| env_or("CPU_WARNING_PERCENT", 70.0));
    pub static CPU_CRITICAL_PERCENT: Lazy<f32> = Lazy::new(|| env_or("CPU_CRITICAL_PERCENT", 85.0));

    pub const CHECK_INTERVAL_SECS: u64 = 30;
    /// Wait after a failed sampling pass
    pub const ERROR_BACKOFF_SECS: u64 = 60;
    pub const CLEANUP_INTERVAL_SECS: u64 = 300;
    pub const HISTORY_SIZE: usize = 100;
    /// Threads and descriptors listed per emergency snapshot
    pub const DIAGNOSTIC_LIST_LIMIT: usize = 64;

    pub const MEMORY_CRITICAL_COOLDOWN_SECS: u64 = 60;
    pub const CPU_CRITICAL_COOLDOWN_SECS: u64 = 30;
    pub const EMERGENCY_HALT_SECS: u64 = 120;

    /// Relaxation requires memory below warning minus this share of it
    pub const HYSTERESIS_RATIO: f64 = 0.10;
    /// CPU relaxation margin in percentage points
    pub const CPU_HYSTERESIS_PERCENT: f32 = 5.0;

    pub fn check_interval() -> Duration {
        Duration::from_secs(CHECK_INTERVAL_SECS)
    }

    pub fn error_backoff() -> Duration {
        Duration::from_secs(ERROR_BACKOFF_SECS)
    }

    pub fn cleanup_interval() -> Duration {
        Duration::from_secs(CLEANUP_INTERVAL_SECS)
    }
}

/// Broadcast fan-out
pub mod broadcast {
    use super::Duration;

    /// Concurrent sends within one batch
    pub const MAX_WORKERS: usize = 10;
    pub const BATCH_PAUSE_MS: u64 = 1000;

    pub fn batch_pause() -> Duration {
        Duration::from_millis(BATCH_PAUSE_MS)
    }
}
