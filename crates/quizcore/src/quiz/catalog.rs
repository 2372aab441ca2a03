//! Quiz catalogs: one JSON file per category.
//!
//! ```json
//! [
//!   { "id": "geo-1", "question": "Capital of Peru?", "options": ["Lima", "Quito"], "answer": 0 },
//!   { "question": "2 + 2?", "options": ["3", "4", "5"], "answer": 1 }
//! ]
//! ```
//!
//! Entries without an `id` get `<category>-<index>`.

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::{AppError, AppResult};

/// Telegram accepts 2 to 10 poll options.
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;

/// One quiz question as sent in a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: u8,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    id: Option<String>,
    question: String,
    options: Vec<String>,
    answer: usize,
}

impl RawQuestion {
    fn validate(self, category: &str, index: usize) -> Result<Question, String> {
        let text = self.question.trim();
        if text.is_empty() {
            return Err("empty question text".to_string());
        }
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&self.options.len()) {
            return Err(format!("{} options, expected {}..={}", self.options.len(), MIN_OPTIONS, MAX_OPTIONS));
        }
        if self.answer >= self.options.len() {
            return Err(format!("answer index {} out of range", self.answer));
        }
        let correct_option = u8::try_from(self.answer).map_err(|_| "answer index too large".to_string())?;

        Ok(Question {
            id: self.id.unwrap_or_else(|| format!("{}-{}", category, index)),
            text: text.to_string(),
            options: self.options,
            correct_option,
        })
    }
}

/// Parses a catalog document, skipping invalid entries with a warning.
pub fn parse_catalog(category: &str, json: &str) -> AppResult<Vec<Question>> {
    let raw: Vec<RawQuestion> = serde_json::from_str(json)?;
    let mut questions = Vec::with_capacity(raw.len());
    for (index, entry) in raw.into_iter().enumerate() {
        match entry.validate(category, index) {
            Ok(question) => questions.push(question),
            Err(reason) => log::warn!("Skipping question #{} in '{}': {}", index, category, reason),
        }
    }
    Ok(questions)
}

/// Read-only source of quiz questions.
pub trait QuizCatalog: Send + Sync {
    fn get_questions(&self, category: &str) -> AppResult<Arc<Vec<Question>>>;

    /// Drops any cached catalogs.
    fn clear_cache(&self) {}
}

/// Loads `<dir>/<category>.json` on first use and caches the parsed result.
pub struct FileQuizCatalog {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Vec<Question>>>>,
}

impl FileQuizCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, category: &str) -> AppResult<PathBuf> {
        let valid = !category.is_empty()
            && category
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AppError::Validation(format!("invalid category name '{}'", category)));
        }
        Ok(self.dir.join(format!("{}.json", category)))
    }

    /// Category names available on disk, sorted.
    pub fn categories(&self) -> AppResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn cached_categories(&self) -> usize {
        self.cache.read().len()
    }
}

impl QuizCatalog for FileQuizCatalog {
    fn get_questions(&self, category: &str) -> AppResult<Arc<Vec<Question>>> {
        if let Some(questions) = self.cache.read().get(category) {
            return Ok(Arc::clone(questions));
        }

        let path = self.path_for(category)?;
        let questions = match std::fs::read_to_string(&path) {
            Ok(json) => parse_catalog(category, &json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("No quiz catalog at {}", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let questions = Arc::new(questions);
        self.cache
            .write()
            .insert(category.to_string(), Arc::clone(&questions));
        Ok(questions)
    }

    fn clear_cache(&self) {
        let mut cache = self.cache.write();
        if !cache.is_empty() {
            log::info!("Dropping {} cached quiz catalog(s)", cache.len());
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"[
        {"id": "a", "question": "First?", "options": ["x", "y"], "answer": 1},
        {"question": "  Second?  ", "options": ["x", "y", "z"], "answer": 0},
        {"question": "Broken", "options": ["only"], "answer": 0},
        {"question": "Out of range", "options": ["x", "y"], "answer": 5}
    ]"#;

    #[test]
    fn test_parse_skips_invalid_entries() {
        let questions = parse_catalog("general", SAMPLE).unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].id, "a");
        assert_eq!(questions[0].correct_option, 1);
        assert_eq!(questions[1].id, "general-1");
        assert_eq!(questions[1].text, "Second?");
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(matches!(parse_catalog("general", "{"), Err(AppError::Json(_))));
    }

    #[test]
    fn test_file_catalog_caches_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("general.json"), SAMPLE).unwrap();
        let catalog = FileQuizCatalog::new(dir.path());

        assert_eq!(catalog.get_questions("general").unwrap().len(), 2);
        assert_eq!(catalog.cached_categories(), 1);

        // Served from cache even after the file changes
        std::fs::write(dir.path().join("general.json"), "[]").unwrap();
        assert_eq!(catalog.get_questions("general").unwrap().len(), 2);

        catalog.clear_cache();
        assert_eq!(catalog.cached_categories(), 0);
        assert!(catalog.get_questions("general").unwrap().is_empty());
    }

    #[test]
    fn test_missing_category_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileQuizCatalog::new(dir.path());
        assert!(catalog.get_questions("history").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileQuizCatalog::new(dir.path());
        assert!(catalog.get_questions("../secrets").is_err());
    }

    #[test]
    fn test_lists_categories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("science.json"), "[]").unwrap();
        std::fs::write(dir.path().join("general.json"), "[]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let catalog = FileQuizCatalog::new(dir.path());
        assert_eq!(catalog.categories().unwrap(), vec!["general", "science"]);
    }
}
