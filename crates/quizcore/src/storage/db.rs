use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::collections::HashSet;

use super::migrations::run_migrations;
use super::{
    ChatState, ChatStateStore, DailyCountStore, LeaderboardStore, PollLedger, PollRecord, QuizAttempt, ScoreEntry,
    ServedStore,
};
use crate::core::error::{AppError, AppResult};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a pool with up to 10 connections and applies pending migrations.
///
/// # Example
///
/// ```no_run
/// use quizcore::storage::create_pool;
///
/// let pool = create_pool("quizbot.sqlite")?;
/// # Ok::<(), quizcore::AppError>(())
/// ```
pub fn create_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder().max_size(10).build(manager)?;

    let mut conn = pool.get()?;
    run_migrations(&mut conn)?;

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// SQLite-backed implementation of every store trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn open(database_path: &str) -> AppResult<Self> {
        Ok(Self::new(create_pool(database_path)?))
    }

    fn conn(&self) -> AppResult<DbConnection> {
        Ok(get_connection(&self.pool)?)
    }
}

impl ChatStateStore for SqliteStore {
    fn get_chat_state(&self, chat_id: i64) -> AppResult<Option<ChatState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT active, paused, interval_seconds, category, used_question_ids
                 FROM chat_state WHERE chat_id = ?1",
                [chat_id],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((active, paused, interval, category, used_json)) = row else {
            return Ok(None);
        };

        let used_question_ids: HashSet<String> = serde_json::from_str(&used_json)?;
        let interval_seconds = u64::try_from(interval)
            .map_err(|_| AppError::Validation(format!("negative interval stored for chat {}", chat_id)))?;

        Ok(Some(ChatState {
            active,
            paused,
            interval_seconds,
            category,
            used_question_ids,
        }))
    }

    fn put_chat_state(&self, chat_id: i64, state: &ChatState) -> AppResult<()> {
        let mut used: Vec<&String> = state.used_question_ids.iter().collect();
        used.sort();
        let used_json = serde_json::to_string(&used)?;
        let interval = i64::try_from(state.interval_seconds).unwrap_or(i64::MAX);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO chat_state (chat_id, active, paused, interval_seconds, category, used_question_ids, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP)
             ON CONFLICT(chat_id) DO UPDATE SET
                active = excluded.active,
                paused = excluded.paused,
                interval_seconds = excluded.interval_seconds,
                category = excluded.category,
                used_question_ids = excluded.used_question_ids,
                updated_at = CURRENT_TIMESTAMP",
            params![chat_id, state.active, state.paused, interval, state.category, used_json],
        )?;
        Ok(())
    }

    fn list_active(&self) -> AppResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT chat_id FROM chat_state WHERE active = 1 ORDER BY chat_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

impl DailyCountStore for SqliteStore {
    fn daily_count(&self, chat_id: i64, date: NaiveDate) -> AppResult<u32> {
        let conn = self.conn()?;
        let sent: Option<u32> = conn
            .query_row(
                "SELECT sent FROM daily_counts WHERE chat_id = ?1 AND day = ?2",
                params![chat_id, day_key(date)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(sent.unwrap_or(0))
    }

    fn increment_and_get(&self, chat_id: i64, date: NaiveDate) -> AppResult<u32> {
        let conn = self.conn()?;
        let sent = conn.query_row(
            "INSERT INTO daily_counts (chat_id, day, sent) VALUES (?1, ?2, 1)
             ON CONFLICT(chat_id, day) DO UPDATE SET sent = sent + 1
             RETURNING sent",
            params![chat_id, day_key(date)],
            |row| row.get(0),
        )?;
        Ok(sent)
    }

    fn mark_limit_notified(&self, chat_id: i64, date: NaiveDate) -> AppResult<bool> {
        let conn = self.conn()?;
        let day = day_key(date);
        conn.execute(
            "INSERT OR IGNORE INTO daily_counts (chat_id, day, sent, limit_notified) VALUES (?1, ?2, 0, 0)",
            params![chat_id, day],
        )?;
        let changed = conn.execute(
            "UPDATE daily_counts SET limit_notified = 1
             WHERE chat_id = ?1 AND day = ?2 AND limit_notified = 0",
            params![chat_id, day],
        )?;
        Ok(changed == 1)
    }
}

impl PollLedger for SqliteStore {
    fn record_poll(&self, record: &PollRecord) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO polls (poll_id, chat_id, message_id, question_id, correct_option)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.poll_id,
                record.chat_id,
                record.message_id,
                record.question_id,
                record.correct_option
            ],
        )?;
        Ok(())
    }

    fn find_poll(&self, poll_id: &str) -> AppResult<Option<PollRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT poll_id, chat_id, message_id, question_id, correct_option FROM polls WHERE poll_id = ?1",
                [poll_id],
                |row| {
                    Ok(PollRecord {
                        poll_id: row.get(0)?,
                        chat_id: row.get(1)?,
                        message_id: row.get(2)?,
                        question_id: row.get(3)?,
                        correct_option: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

impl ServedStore for SqliteStore {
    fn add_served_chat(&self, chat_id: i64) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute("INSERT OR IGNORE INTO served_chats (chat_id) VALUES (?1)", [chat_id])?;
        Ok(())
    }

    fn add_served_user(&self, user_id: i64) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute("INSERT OR IGNORE INTO served_users (user_id) VALUES (?1)", [user_id])?;
        Ok(())
    }

    fn served_chats(&self) -> AppResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT chat_id FROM served_chats ORDER BY added_at, chat_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn served_users(&self) -> AppResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT user_id FROM served_users ORDER BY added_at, user_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

impl LeaderboardStore for SqliteStore {
    fn add_score(&self, user_id: i64, display_name: &str, points: i64) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scores (user_id, display_name, score, first_seen)
             VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(first_seen), 0) + 1 FROM scores))
             ON CONFLICT(user_id) DO UPDATE SET
                score = score + excluded.score,
                display_name = excluded.display_name",
            params![user_id, display_name, points],
        )?;
        Ok(())
    }

    fn all_scores(&self) -> AppResult<Vec<ScoreEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT user_id, display_name, score FROM scores ORDER BY score DESC, first_seen")?;
        let scores = stmt
            .query_map([], |row| {
                Ok(ScoreEntry {
                    user_id: row.get(0)?,
                    display_name: row.get(1)?,
                    score: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(scores)
    }

    fn record_attempt(&self, attempt: &QuizAttempt) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO attempts (user_id, poll_id, correct, points, answered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                attempt.user_id,
                attempt.poll_id,
                attempt.correct,
                attempt.points,
                attempt.answered_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn attempts_for(&self, user_id: i64) -> AppResult<Vec<QuizAttempt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, poll_id, correct, points, answered_at FROM attempts
             WHERE user_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user_id, poll_id, correct, points, answered_at)| {
                let answered_at = DateTime::parse_from_rfc3339(&answered_at)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| AppError::Validation(format!("bad attempt timestamp {}: {}", answered_at, e)))?;
                Ok(QuizAttempt {
                    user_id,
                    poll_id,
                    correct,
                    points,
                    answered_at,
                })
            })
            .collect()
    }

    fn has_answered(&self, user_id: i64, poll_id: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attempts WHERE user_id = ?1 AND poll_id = ?2",
            params![user_id, poll_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
