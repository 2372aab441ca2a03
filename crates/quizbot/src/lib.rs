//! Telegram front end for the quiz bot.
//!
//! Wires the teloxide dispatcher to the `quizcore` dispatch engine: commands
//! control per-chat schedules, poll answers feed the leaderboard, and admins
//! get pool statistics, resource reports and broadcasts.

pub mod cli;
pub mod telegram;
