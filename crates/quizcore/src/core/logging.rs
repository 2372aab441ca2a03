//! Logger initialization and startup diagnostics

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the effective dispatch and throttling configuration at startup
pub fn log_startup_configuration() {
    log::info!("Quiz bot configuration:");
    log::info!("  database:       {}", *config::DATABASE_PATH);
    log::info!("  quiz dir:       {}", *config::QUIZ_DIR);
    log::info!("  category:       {}", *config::DEFAULT_CATEGORY);
    log::info!(
        "  workers:        {} (queue soft cap {})",
        *config::queue::MAX_WORKERS,
        *config::queue::QUEUE_SOFT_CAP
    );
    log::info!(
        "  daily caps:     private {} / group {}",
        *config::limits::DAILY_LIMIT_PRIVATE,
        *config::limits::DAILY_LIMIT_GROUP
    );
    log::info!(
        "  memory tiers:   {}MB / {}MB / {}MB",
        *config::monitor::MEMORY_WARNING_MB,
        *config::monitor::MEMORY_CRITICAL_MB,
        *config::monitor::MEMORY_EMERGENCY_MB
    );
    log::info!(
        "  cpu tiers:      {}% / {}%",
        *config::monitor::CPU_WARNING_PERCENT,
        *config::monitor::CPU_CRITICAL_PERCENT
    );
    if config::admin::ADMIN_IDS.is_empty() {
        log::warn!("ADMIN_IDS is empty, admin commands are disabled");
    }
}
