use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use quizcore::quiz::catalog::{FileQuizCatalog, QuizCatalog};
use quizcore::AppResult;

#[derive(Parser)]
#[command(name = "quizbot")]
#[command(author, version, about = "Telegram bot that runs scheduled quizzes in groups and private chats", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (default)
    Run,

    /// Validate quiz catalogs and print question counts
    CheckCatalog {
        /// Directory holding <category>.json files
        dir: PathBuf,
    },

    /// Apply pending database migrations and exit
    Migrate,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Question count for one catalog file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSummary {
    pub category: String,
    pub questions: usize,
}

/// Loads every catalog under `dir`. Invalid entries are skipped (and logged)
/// by the loader, so the counts reflect what the bot would actually send.
pub fn check_catalogs(dir: &Path) -> AppResult<Vec<CatalogSummary>> {
    let catalog = FileQuizCatalog::new(dir);
    let mut summaries = Vec::new();
    for category in catalog.categories()? {
        let questions = catalog.get_questions(&category)?.len();
        summaries.push(CatalogSummary { category, questions });
    }
    Ok(summaries)
}
