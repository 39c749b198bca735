use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

pub type ClockSource = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> ClockSource {
    Arc::new(Utc::now)
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut guard) => *guard = instant,
            Err(poisoned) => *poisoned.into_inner() = instant,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.set(self.now() + by);
    }

    pub fn source(&self) -> ClockSource {
        let clock = self.clone();
        Arc::new(move || clock.now())
    }
}
