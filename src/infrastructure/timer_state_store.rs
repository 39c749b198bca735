use crate::domain::models::{TaskKey, TimerState};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub trait TimerStateStore: Send + Sync {
    fn load(&self, key: &TaskKey) -> Result<Option<TimerState>, InfraError>;
    fn save(&self, key: &TaskKey, state: &TimerState) -> Result<(), InfraError>;
}

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteTimerStateStore {
    db_path: PathBuf,
}

impl SqliteTimerStateStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl TimerStateStore for SqliteTimerStateStore {
    fn load(&self, key: &TaskKey) -> Result<Option<TimerState>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(bool, Option<String>, f64, f64)> = connection
            .query_row(
                "SELECT is_running, session_start, accumulated_seconds, last_session_seconds
                 FROM timer_state WHERE state_key = ?1",
                params![key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((is_running, session_start_raw, accumulated_seconds, last_session_seconds)) = row
        else {
            return Ok(None);
        };

        let session_start = session_start_raw
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|error| InfraError::CorruptState {
                        key: key.to_string(),
                        reason: format!("invalid session_start '{raw}': {error}"),
                    })
            })
            .transpose()?;

        let state = TimerState {
            is_running,
            session_start,
            accumulated_seconds,
            last_session_seconds,
        };
        if !state.is_consistent() {
            return Err(InfraError::CorruptState {
                key: key.to_string(),
                reason: "running flag and session start disagree".to_string(),
            });
        }
        Ok(Some(state))
    }

    fn save(&self, key: &TaskKey, state: &TimerState) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO timer_state
               (state_key, is_running, session_start, accumulated_seconds, last_session_seconds, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(state_key) DO UPDATE SET
               is_running = excluded.is_running,
               session_start = excluded.session_start,
               accumulated_seconds = excluded.accumulated_seconds,
               last_session_seconds = excluded.last_session_seconds,
               updated_at = excluded.updated_at",
            params![
                key.as_str(),
                state.is_running,
                state.session_start.map(|value| value.to_rfc3339()),
                state.accumulated_seconds,
                state.last_session_seconds,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTimerStateStore {
    states: Mutex<HashMap<TaskKey, TimerState>>,
}

impl TimerStateStore for InMemoryTimerStateStore {
    fn load(&self, key: &TaskKey) -> Result<Option<TimerState>, InfraError> {
        let states = self
            .states
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("timer state lock poisoned: {error}")))?;
        Ok(states.get(key).cloned())
    }

    fn save(&self, key: &TaskKey, state: &TimerState) -> Result<(), InfraError> {
        let mut states = self
            .states
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("timer state lock poisoned: {error}")))?;
        states.insert(key.clone(), state.clone());
        Ok(())
    }
}
