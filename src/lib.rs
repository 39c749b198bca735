pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{bootstrap_workspace, BootstrapResult};
pub use application::commands::{
    calendar_badges, close_all_timers, close_task_detail, open_task_detail, start_timer,
    stop_timer, subscribe_timer, tasks_on_date, tick_timers, timer_snapshot, AppState,
    DayBadgeResponse, TimerTickResponse,
};
pub use application::timer_engine::{TimerContext, TimerEngine, TimerEvent};
pub use domain::clock::{system_clock, ClockSource, ManualClock};
pub use domain::models::{RecurrencePattern, Task, TaskIdentity, TaskKey, TimerState};
pub use domain::occurrence::{DayCalendar, OccurrenceCalculator};
pub use domain::timer::{format_elapsed, TimerPhase, TimerSession, TimerSnapshot};
pub use infrastructure::activity_log::{ActivityLog, InMemoryActivityLog, JsonLinesActivityLog};
pub use infrastructure::error::InfraError;
pub use infrastructure::remote_time_sync::{
    OfflineRemoteTimeSync, RemoteTimeSync, ReqwestRemoteTimeSync,
};
pub use infrastructure::timer_state_store::{
    InMemoryTimerStateStore, SqliteTimerStateStore, TimerStateStore,
};
