//! Version check state that survives reloads within one tab session.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use crate::cache::{parse_datetime, SqliteStorage};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
  /// Version baked into the most recently loaded page
  pub local_version: Option<String>,
  /// Server version the user dismissed and has not picked up yet
  pub pending_version: Option<String>,
  pub last_check_at: Option<DateTime<Utc>>,
}

pub trait SessionStore: Send + Sync + 'static {
  /// State for `session`, empty if nothing was saved yet.
  fn load(&self, session: &str) -> Result<SessionState>;

  fn save(&self, session: &str, state: &SessionState) -> Result<()>;
}

impl SessionStore for SqliteStorage {
  fn load(&self, session: &str) -> Result<SessionState> {
    let conn = self.lock()?;
    let row: Option<(Option<String>, Option<String>, Option<String>)> = conn
      .query_row(
        "SELECT local_version, pending_version, last_check_at FROM session_state
         WHERE session_id = ?",
        params![session],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load session {}: {}", session, e))?;

    match row {
      Some((local_version, pending_version, last_check_at)) => Ok(SessionState {
        local_version,
        pending_version,
        last_check_at: last_check_at.as_deref().map(parse_datetime).transpose()?,
      }),
      None => Ok(SessionState::default()),
    }
  }

  fn save(&self, session: &str, state: &SessionState) -> Result<()> {
    let last_check_at = state
      .last_check_at
      .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string());

    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO session_state
           (session_id, local_version, pending_version, last_check_at, updated_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![
          session,
          state.local_version,
          state.pending_version,
          last_check_at
        ],
      )
      .map_err(|e| eyre!("Failed to save session {}: {}", session, e))?;

    Ok(())
  }
}
