pub mod activity_log;
pub mod config;
pub mod error;
pub mod remote_time_sync;
pub mod timer_state_store;
