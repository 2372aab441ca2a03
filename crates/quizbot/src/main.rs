use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;

use quizbot::cli::{check_catalogs, Cli, Commands};
use quizbot::telegram::{create_bot, schema, setup_bot_commands, HandlerDeps, TelegramMessenger};
use quizcore::broadcast::{BroadcastConfig, BroadcastManager};
use quizcore::core::metrics_server::start_metrics_server;
use quizcore::core::{config, init_logger, logging, Metrics};
use quizcore::monitor::{MonitorConfig, ResourceMonitor, SysinfoSampler};
use quizcore::quiz::{DailyLimits, FileQuizCatalog, QuizDelivery, Throttle, WorkerPool, WorkerPoolConfig};
use quizcore::scheduler::QuizScheduler;
use quizcore::storage::{create_pool, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env before any config static is read
    let _ = dotenv();

    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Run) | None => run_bot().await,
        Some(Commands::CheckCatalog { dir }) => run_check_catalog(&dir),
        Some(Commands::Migrate) => run_migrate(),
    }
}

fn run_check_catalog(dir: &std::path::Path) -> Result<()> {
    let summaries = check_catalogs(dir)?;
    if summaries.is_empty() {
        println!("No catalogs found in {}", dir.display());
        return Ok(());
    }

    let mut total = 0;
    for summary in &summaries {
        println!("{:<24} {:>6} questions", summary.category, summary.questions);
        total += summary.questions;
    }
    println!("{} categories, {} questions", summaries.len(), total);

    let empty: Vec<&str> = summaries
        .iter()
        .filter(|summary| summary.questions == 0)
        .map(|summary| summary.category.as_str())
        .collect();
    if !empty.is_empty() {
        return Err(anyhow::anyhow!("categories without valid questions: {}", empty.join(", ")));
    }
    Ok(())
}

fn run_migrate() -> Result<()> {
    // Opening the pool applies every pending migration
    create_pool(&config::DATABASE_PATH)?;
    log::info!("Database at {} is up to date", *config::DATABASE_PATH);
    Ok(())
}

async fn run_bot() -> Result<()> {
    logging::log_startup_configuration();

    let metrics = Arc::new(Metrics::new()?);
    let store = Arc::new(SqliteStore::open(&config::DATABASE_PATH)?);
    let catalog = Arc::new(FileQuizCatalog::new(config::QUIZ_DIR.as_str()));
    match catalog.categories() {
        Ok(categories) => log::info!("Quiz categories: {}", categories.join(", ")),
        Err(e) => log::warn!("Cannot list quiz directory {}: {}", *config::QUIZ_DIR, e),
    }

    let bot = create_bot()?;
    let me = bot.get_me().await?;
    log::info!("Logged in as @{}", me.username());
    let messenger = Arc::new(TelegramMessenger::new(bot.clone(), me.id));

    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to publish bot commands: {}", e);
    }

    let delivery = QuizDelivery::new(store.clone(), catalog.clone(), messenger.clone(), DailyLimits::from_env());
    let pool = WorkerPool::new(WorkerPoolConfig::default(), delivery, Arc::clone(&metrics));
    pool.start();

    let broadcast = BroadcastManager::new(
        BroadcastConfig::default(),
        store.clone(),
        messenger.clone(),
        Arc::clone(&metrics),
    );

    let targets: Vec<Arc<dyn Throttle>> = vec![
        pool.clone() as Arc<dyn Throttle>,
        broadcast.clone() as Arc<dyn Throttle>,
    ];
    let monitor = ResourceMonitor::new(
        MonitorConfig::default(),
        Arc::new(SysinfoSampler::new()?),
        targets,
        Arc::clone(&metrics),
    )?;
    monitor.start();

    let scheduler = QuizScheduler::new(pool.clone(), store.clone(), messenger);
    scheduler.reseed()?;

    let shutdown = CancellationToken::new();
    let metrics_task = if *config::METRICS_PORT != 0 {
        let metrics = Arc::clone(&metrics);
        let pool = pool.clone();
        let token = shutdown.child_token();
        Some(tokio::spawn(async move {
            if let Err(e) = start_metrics_server(*config::METRICS_PORT, metrics, pool, token).await {
                log::error!("Metrics server failed: {}", e);
            }
        }))
    } else {
        log::info!("METRICS_PORT is 0, metrics server disabled");
        None
    };

    let deps = HandlerDeps {
        store,
        catalog,
        pool: pool.clone(),
        scheduler: scheduler.clone(),
        broadcast,
        monitor: monitor.clone(),
        admin_ids: Arc::new(config::admin::ADMIN_IDS.clone()),
    };

    log::info!("Ready to receive updates");
    Dispatcher::builder(bot, schema(deps))
        .default_handler(|_| async {})
        .error_handler(LoggingErrorHandler::with_custom_text("An error in a quiz handler"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    log::info!("Dispatcher stopped, shutting down");

    // Schedules first so no new tasks arrive while the pool winds down
    scheduler.shutdown().await;
    monitor.stop().await;
    pool.stop().await;
    shutdown.cancel();
    if let Some(task) = metrics_task {
        if let Err(e) = task.await {
            log::error!("Metrics server task ended abnormally: {}", e);
        }
    }

    log::info!("Quiz bot stopped");
    Ok(())
}
