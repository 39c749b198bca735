use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::timer_engine::{TimerContext, TimerEngine};
use crate::domain::clock::ClockSource;
use crate::domain::models::{Task, TaskKey};
use crate::domain::occurrence::{DayCalendar, OccurrenceCalculator};
use crate::domain::timer::TimerSnapshot;
use crate::infrastructure::activity_log::{ActivityLog, JsonLinesActivityLog};
use crate::infrastructure::config::{read_remote_settings, read_tick_interval, read_timezone};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_time_sync::{
    OfflineRemoteTimeSync, ReqwestRemoteTimeSync, RemoteTimeSync,
};
use crate::infrastructure::timer_state_store::SqliteTimerStateStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

type Engine = TimerEngine<SqliteTimerStateStore, dyn RemoteTimeSync>;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    log: Arc<dyn ActivityLog>,
    calculator: OccurrenceCalculator,
    timers: TimerContext<SqliteTimerStateStore, dyn RemoteTimeSync>,
    runtime: Mutex<RuntimeState>,
}

#[derive(Default)]
struct RuntimeState {
    engines: HashMap<TaskKey, Engine>,
}

impl AppState {
    /// Bootstraps the workspace and wires the remote store named in
    /// `config/app.json`, or an offline stand-in when none is configured.
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings = read_remote_settings(&bootstrap.config_dir)?;
        let remote: Arc<dyn RemoteTimeSync> = match settings.base_url.as_deref() {
            Some(base_url) => Arc::new(ReqwestRemoteTimeSync::new(base_url, settings.auth_token)?),
            None => Arc::new(OfflineRemoteTimeSync),
        };
        Self::from_bootstrap(bootstrap, remote)
    }

    pub fn with_remote(
        workspace_root: PathBuf,
        remote: Arc<dyn RemoteTimeSync>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Self::from_bootstrap(bootstrap, remote)
    }

    fn from_bootstrap(
        bootstrap: BootstrapResult,
        remote: Arc<dyn RemoteTimeSync>,
    ) -> Result<Self, InfraError> {
        let zone = read_timezone(&bootstrap.config_dir)?;
        let tick_interval = read_tick_interval(&bootstrap.config_dir)?;
        let log: Arc<dyn ActivityLog> = Arc::new(JsonLinesActivityLog::new(&bootstrap.logs_dir));
        let store = Arc::new(SqliteTimerStateStore::new(&bootstrap.database_path));
        let timers = TimerContext::new(store, remote, Arc::clone(&log))
            .with_tick_interval(tick_interval);

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            log,
            calculator: OccurrenceCalculator::new(DayCalendar::new(zone)),
            timers,
            runtime: Mutex::new(RuntimeState::default()),
        })
    }

    /// Applies to timers opened afterwards.
    pub fn with_now_provider(mut self, now_provider: ClockSource) -> Self {
        self.timers = self.timers.with_now_provider(now_provider);
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn calculator(&self) -> OccurrenceCalculator {
        self.calculator
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.log.info(command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.log.error(command, message);
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimerTickResponse {
    pub task_key: String,
    pub snapshot: TimerSnapshot,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DayBadgeResponse {
    pub date: String,
    pub count: usize,
}

/// Opening the same task twice hands back the session already in memory.
pub fn open_task_detail(state: &AppState, task: &Task) -> Result<TimerSnapshot, InfraError> {
    require_non_empty(&task.id, "task.id")?;
    require_non_empty(&task.title, "task.title")?;

    let key = task.key();
    let mut runtime = lock_runtime(state)?;
    if let Some(engine) = runtime.engines.get(&key) {
        return Ok(engine.snapshot());
    }

    let engine = TimerEngine::load(task, state.timers.clone());
    let snapshot = engine.snapshot();
    runtime.engines.insert(key.clone(), engine);
    state.log_info(
        "open_task_detail",
        &format!("opened key={key} phase={}", snapshot.phase.as_str()),
    );
    Ok(snapshot)
}

pub fn start_timer(state: &AppState, task: &Task) -> Result<TimerSnapshot, InfraError> {
    with_engine(state, task, |engine| engine.start())
}

pub fn stop_timer(state: &AppState, task: &Task) -> Result<TimerSnapshot, InfraError> {
    with_engine(state, task, |engine| engine.stop())
}

pub fn timer_snapshot(state: &AppState, task: &Task) -> Result<TimerSnapshot, InfraError> {
    with_engine(state, task, |engine| engine.snapshot())
}

pub fn subscribe_timer(
    state: &AppState,
    task: &Task,
) -> Result<watch::Receiver<TimerSnapshot>, InfraError> {
    with_engine(state, task, |engine| engine.subscribe())
}

/// Driven by the host event loop once per tick interval.
pub fn tick_timers(state: &AppState) -> Result<Vec<TimerTickResponse>, InfraError> {
    let mut runtime = lock_runtime(state)?;
    let mut ticks = runtime
        .engines
        .iter_mut()
        .map(|(key, engine)| TimerTickResponse {
            task_key: key.to_string(),
            snapshot: engine.tick(),
        })
        .collect::<Vec<_>>();
    ticks.sort_by(|left, right| left.task_key.cmp(&right.task_key));
    Ok(ticks)
}

pub async fn close_task_detail(state: &AppState, task: &Task) -> Result<TimerSnapshot, InfraError> {
    let key = task.key();
    let engine = lock_runtime(state)?
        .engines
        .remove(&key)
        .ok_or_else(|| InfraError::NotFound(format!("no open timer for key={key}")))?;

    let snapshot = engine.close().await;
    state.log_info(
        "close_task_detail",
        &format!("closed key={key} total_seconds={:.3}", snapshot.total_seconds),
    );
    Ok(snapshot)
}

/// Closes every open detail view, e.g. on shutdown.
pub async fn close_all_timers(state: &AppState) -> Result<Vec<TimerTickResponse>, InfraError> {
    let engines = {
        let mut runtime = lock_runtime(state)?;
        runtime.engines.drain().collect::<Vec<_>>()
    };

    let mut closed = Vec::with_capacity(engines.len());
    for (key, engine) in engines {
        closed.push(TimerTickResponse {
            task_key: key.to_string(),
            snapshot: engine.close().await,
        });
    }
    closed.sort_by(|left, right| left.task_key.cmp(&right.task_key));
    state.log_info("close_all_timers", &format!("closed count={}", closed.len()));
    Ok(closed)
}

/// `date` is either `YYYY-MM-DD` (a day in the reference zone) or an RFC 3339
/// instant.
pub fn tasks_on_date(state: &AppState, tasks: &[Task], date: &str) -> Result<Vec<Task>, InfraError> {
    let day = parse_day_input(state, date, "date")?;
    Ok(tasks
        .iter()
        .filter(|task| state.calculator.occurs_on_day(task, day))
        .cloned()
        .collect())
}

/// Per-day task counts for one calendar month given as `YYYY-MM`.
pub fn calendar_badges(
    state: &AppState,
    tasks: &[Task],
    month: &str,
) -> Result<Vec<DayBadgeResponse>, InfraError> {
    let (first, last) = month_bounds(month)?;
    Ok(state
        .calculator
        .occurrence_counts(tasks, first, last)
        .into_iter()
        .map(|(day, count)| DayBadgeResponse {
            date: day.format("%Y-%m-%d").to_string(),
            count,
        })
        .collect())
}

fn with_engine<T>(
    state: &AppState,
    task: &Task,
    action: impl FnOnce(&mut Engine) -> T,
) -> Result<T, InfraError> {
    let key = task.key();
    let mut runtime = lock_runtime(state)?;
    let engine = runtime
        .engines
        .get_mut(&key)
        .ok_or_else(|| InfraError::NotFound(format!("no open timer for key={key}")))?;
    Ok(action(engine))
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("runtime lock poisoned: {error}")))
}

fn require_non_empty(value: &str, field_name: &str) -> Result<(), InfraError> {
    if value.trim().is_empty() {
        return Err(InfraError::InvalidInput(format!("{field_name} must not be empty")));
    }
    Ok(())
}

fn parse_day_input(state: &AppState, value: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    let value = value.trim();
    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(day);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|instant| state.calculator.calendar().day_of(instant.with_timezone(&Utc)))
        .map_err(|_| {
            InfraError::InvalidInput(format!(
                "{field_name} must be YYYY-MM-DD or RFC3339: {value}"
            ))
        })
}

fn month_bounds(month: &str) -> Result<(NaiveDate, NaiveDate), InfraError> {
    let month = month.trim();
    let first = NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
        .map_err(|_| InfraError::InvalidInput(format!("month must be YYYY-MM: {month}")))?;
    let next_month = first
        .checked_add_months(chrono::Months::new(1))
        .ok_or_else(|| InfraError::InvalidInput(format!("month out of range: {month}")))?;
    Ok((first, next_month - Duration::days(1)))
}
