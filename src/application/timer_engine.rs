use crate::domain::clock::{system_clock, ClockSource};
use crate::domain::models::{Task, TaskIdentity, TaskKey, TimerState};
use crate::domain::timer::{TimerSession, TimerSnapshot};
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_time_sync::RemoteTimeSync;
use crate::infrastructure::timer_state_store::TimerStateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

type BaselineReceiver = oneshot::Receiver<Result<f64, InfraError>>;

/// Collaborators shared by every timer engine of one app instance.
pub struct TimerContext<S, R>
where
    S: TimerStateStore + 'static,
    R: RemoteTimeSync + ?Sized + 'static,
{
    store: Arc<S>,
    remote: Arc<R>,
    log: Arc<dyn ActivityLog>,
    now_provider: ClockSource,
    tick_interval: Duration,
}

impl<S, R> Clone for TimerContext<S, R>
where
    S: TimerStateStore + 'static,
    R: RemoteTimeSync + ?Sized + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            remote: Arc::clone(&self.remote),
            log: Arc::clone(&self.log),
            now_provider: Arc::clone(&self.now_provider),
            tick_interval: self.tick_interval,
        }
    }
}

impl<S, R> TimerContext<S, R>
where
    S: TimerStateStore + 'static,
    R: RemoteTimeSync + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, remote: Arc<R>, log: Arc<dyn ActivityLog>) -> Self {
        Self {
            store,
            remote,
            log,
            now_provider: system_clock(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_now_provider(mut self, now_provider: ClockSource) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    /// The one-second display refresh while a session runs.
    Ticked(TimerSnapshot),
    /// The remote total arrived (`replaced`) or failed to arrive.
    BaselineResolved { replaced: bool, snapshot: TimerSnapshot },
    /// Nothing left to wait for: idle and no fetch in flight.
    Idle,
}

/// Timer for one open task-detail view.
///
/// The engine is owned by a single caller and never shared across threads:
/// remote fetch results come back over a channel and are applied on the
/// owner's next `tick` or `next_event`, so the baseline is only ever mutated
/// from here. Remote writes go through a single writer task in commit order;
/// `close` waits for it to drain. Outside a tokio runtime the engine runs on
/// local state alone.
pub struct TimerEngine<S, R>
where
    S: TimerStateStore + 'static,
    R: RemoteTimeSync + ?Sized + 'static,
{
    context: TimerContext<S, R>,
    key: TaskKey,
    identity: TaskIdentity,
    session: TimerSession,
    pending_baseline: Option<BaselineReceiver>,
    remote_writer: Option<mpsc::UnboundedSender<f64>>,
    remote_writes: JoinSet<()>,
    snapshot_tx: watch::Sender<TimerSnapshot>,
}

impl<S, R> TimerEngine<S, R>
where
    S: TimerStateStore + 'static,
    R: RemoteTimeSync + ?Sized + 'static,
{
    /// Seeds the session from local state (else the task's logged total),
    /// resumes a session that was running when the process died, and starts
    /// fetching the remote total in the background.
    pub fn load(task: &Task, context: TimerContext<S, R>) -> Self {
        let key = task.key();
        let identity = task.identity();
        let session = match Self::read_local_state(&context, &key) {
            Some(state) => TimerSession::from_state(state),
            None => TimerSession::from_baseline(usable_seconds(task.total_time_logged)),
        };

        let now = (context.now_provider)();
        if let Some(started) = session.state().session_start {
            context.log.info(
                "timer.load",
                &format!("resumed running session key={key} started_at={}", started.to_rfc3339()),
            );
        }

        let pending_baseline = match Handle::try_current() {
            Ok(handle) => {
                let (baseline_tx, baseline_rx) = oneshot::channel();
                let remote = Arc::clone(&context.remote);
                let fetch_identity = identity.clone();
                handle.spawn(async move {
                    let result = remote.fetch_task_total_time(&fetch_identity).await;
                    let _ = baseline_tx.send(result);
                });
                Some(baseline_rx)
            }
            Err(_) => {
                context.log.warn(
                    "timer.load",
                    &format!("no async runtime, skipping remote fetch key={key}"),
                );
                None
            }
        };

        let (snapshot_tx, _) = watch::channel(session.snapshot(now));
        Self {
            context,
            key,
            identity,
            session,
            pending_baseline,
            remote_writer: None,
            remote_writes: JoinSet::new(),
            snapshot_tx,
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn session(&self) -> &TimerSession {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn has_pending_fetch(&self) -> bool {
        self.pending_baseline.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.session.snapshot(self.now())
    }

    /// No-op while a session is already running.
    pub fn start(&mut self) -> TimerSnapshot {
        let now = self.now();
        if self.session.start(now) {
            self.persist("start");
            self.context.log.info(
                "timer.start",
                &format!("started key={} at={}", self.key, now.to_rfc3339()),
            );
        }
        self.publish()
    }

    /// Commits the running session locally and pushes the new total to the
    /// remote store without waiting for it. No-op while idle. A remote total
    /// still in flight is dropped: it predates the committed session.
    pub fn stop(&mut self) -> TimerSnapshot {
        let now = self.now();
        if let Some(session_seconds) = self.session.stop(now) {
            if self.pending_baseline.take().is_some() {
                self.context.log.info(
                    "timer.remote_fetch",
                    &format!("discarding remote total superseded by stop key={}", self.key),
                );
            }
            self.persist("stop");
            let total_seconds = self.session.state().accumulated_seconds;
            self.context.log.info(
                "timer.stop",
                &format!(
                    "stopped key={} session_seconds={session_seconds:.3} total_seconds={total_seconds:.3}",
                    self.key
                ),
            );
            self.queue_remote_write(total_seconds);
        }
        self.publish()
    }

    /// Display refresh. Applies a remote total that has already arrived but
    /// never folds elapsed time into the baseline.
    pub fn tick(&mut self) -> TimerSnapshot {
        if let Some(mut receiver) = self.pending_baseline.take() {
            match receiver.try_recv() {
                Ok(result) => {
                    self.apply_remote_total(result);
                }
                Err(oneshot::error::TryRecvError::Empty) => {
                    self.pending_baseline = Some(receiver);
                }
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.context.log.warn(
                        "timer.remote_fetch",
                        &format!("fetch task ended without a result key={}", self.key),
                    );
                }
            }
        }
        while self.remote_writes.try_join_next().is_some() {}
        self.publish()
    }

    /// Waits for whatever the view should react to next: the remote total
    /// arriving, or the next tick while running.
    pub async fn next_event(&mut self) -> TimerEvent {
        let running = self.session.is_running();
        let Some(mut receiver) = self.pending_baseline.take() else {
            if !running {
                return TimerEvent::Idle;
            }
            tokio::time::sleep(self.context.tick_interval).await;
            return TimerEvent::Ticked(self.tick());
        };

        if !running {
            let result = (&mut receiver).await;
            return self.resolve_baseline(result);
        }

        let tick_interval = self.context.tick_interval;
        let fetched = tokio::select! {
            result = &mut receiver => Some(result),
            _ = tokio::time::sleep(tick_interval) => None,
        };
        match fetched {
            Some(result) => self.resolve_baseline(result),
            None => {
                self.pending_baseline = Some(receiver);
                TimerEvent::Ticked(self.tick())
            }
        }
    }

    /// Waits for every remote write queued so far. A later `stop` starts a
    /// fresh writer.
    pub async fn settle_remote_writes(&mut self) {
        self.remote_writer = None;
        while let Some(joined) = self.remote_writes.join_next().await {
            if let Err(error) = joined {
                self.context.log.error(
                    "timer.remote_write",
                    &format!("write task failed key={}: {error}", self.key),
                );
            }
        }
    }

    /// Closing the view commits a running session like `stop`, flushes local
    /// state, and waits for outstanding remote writes.
    pub async fn close(mut self) -> TimerSnapshot {
        let snapshot = if self.session.is_running() {
            self.stop()
        } else {
            self.persist("close");
            self.publish()
        };
        self.pending_baseline = None;
        self.settle_remote_writes().await;
        self.context
            .log
            .info("timer.close", &format!("closed key={}", self.key));
        snapshot
    }

    fn read_local_state(context: &TimerContext<S, R>, key: &TaskKey) -> Option<TimerState> {
        match context.store.load(key) {
            Ok(Some(state)) if state.is_consistent() => Some(state),
            Ok(Some(_)) => {
                context.log.warn(
                    "timer.load",
                    &format!("discarding inconsistent local state key={key}"),
                );
                None
            }
            Ok(None) => None,
            Err(error) => {
                context.log.warn(
                    "timer.load",
                    &format!("ignoring unreadable local state key={key}: {error}"),
                );
                None
            }
        }
    }

    fn resolve_baseline(
        &mut self,
        result: Result<Result<f64, InfraError>, oneshot::error::RecvError>,
    ) -> TimerEvent {
        let replaced = match result {
            Ok(fetched) => self.apply_remote_total(fetched),
            Err(_) => {
                self.context.log.warn(
                    "timer.remote_fetch",
                    &format!("fetch task ended without a result key={}", self.key),
                );
                false
            }
        };
        TimerEvent::BaselineResolved {
            replaced,
            snapshot: self.publish(),
        }
    }

    fn apply_remote_total(&mut self, fetched: Result<f64, InfraError>) -> bool {
        match fetched {
            Ok(total) if total.is_finite() && total >= 0.0 => {
                let local = self.session.state().accumulated_seconds;
                if total != local {
                    self.session.replace_baseline(total);
                    self.persist("reconcile");
                    self.context.log.info(
                        "timer.reconcile",
                        &format!(
                            "remote total replaced local baseline key={} local={local:.3} remote={total:.3}",
                            self.key
                        ),
                    );
                }
                true
            }
            Ok(total) => {
                self.context.log.warn(
                    "timer.remote_fetch",
                    &format!("ignoring unusable remote total key={} total={total}", self.key),
                );
                false
            }
            Err(error) => {
                self.context.log.error(
                    "timer.remote_fetch",
                    &format!("keeping local baseline key={}: {error}", self.key),
                );
                false
            }
        }
    }

    fn queue_remote_write(&mut self, total_seconds: f64) {
        if self.remote_writer.is_none() {
            let Ok(handle) = Handle::try_current() else {
                self.context.log.warn(
                    "timer.remote_write",
                    &format!(
                        "no async runtime, remote total not sent key={} total={total_seconds:.3}",
                        self.key
                    ),
                );
                return;
            };
            let (writer_tx, writer_rx) = mpsc::unbounded_channel();
            self.remote_writes.spawn_on(
                write_totals_in_order(
                    Arc::clone(&self.context.remote),
                    Arc::clone(&self.context.log),
                    self.identity.clone(),
                    self.key.clone(),
                    writer_rx,
                ),
                &handle,
            );
            self.remote_writer = Some(writer_tx);
        }

        let queued = self
            .remote_writer
            .as_ref()
            .is_some_and(|writer| writer.send(total_seconds).is_ok());
        if !queued {
            self.remote_writer = None;
            self.context.log.error(
                "timer.remote_write",
                &format!(
                    "remote writer stopped, total not sent key={} total={total_seconds:.3}",
                    self.key
                ),
            );
        }
    }

    fn persist(&self, reason: &str) {
        if let Err(error) = self.context.store.save(&self.key, self.session.state()) {
            self.context.log.error(
                "timer.persist",
                &format!("local save failed key={} reason={reason}: {error}", self.key),
            );
        }
    }

    fn publish(&self) -> TimerSnapshot {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_replace(snapshot.clone());
        snapshot
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        (self.context.now_provider)()
    }
}

impl<S, R> Drop for TimerEngine<S, R>
where
    S: TimerStateStore + 'static,
    R: RemoteTimeSync + ?Sized + 'static,
{
    fn drop(&mut self) {
        // Writes already handed to the runtime outlive the view.
        self.remote_writes.detach_all();
    }
}

/// Sends totals one at a time in commit order. When several are queued only
/// the newest is sent.
async fn write_totals_in_order<R>(
    remote: Arc<R>,
    log: Arc<dyn ActivityLog>,
    identity: TaskIdentity,
    key: TaskKey,
    mut totals: mpsc::UnboundedReceiver<f64>,
) where
    R: RemoteTimeSync + ?Sized + 'static,
{
    while let Some(mut total_seconds) = totals.recv().await {
        while let Ok(newer) = totals.try_recv() {
            total_seconds = newer;
        }
        if let Err(error) = remote.update_task_total_time(&identity, total_seconds).await {
            log.error(
                "timer.remote_write",
                &format!("remote total not saved key={key} total={total_seconds:.3}: {error}"),
            );
        }
    }
}

fn usable_seconds(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::models::RecurrencePattern;
    use crate::domain::timer::TimerPhase;
    use crate::infrastructure::activity_log::{InMemoryActivityLog, LogLevel};
    use crate::infrastructure::timer_state_store::InMemoryTimerStateStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    #[derive(Debug, Clone)]
    enum FakeFetch {
        Total(f64),
        LastWritten,
        Missing,
        NetworkError,
    }

    struct FakeRemoteTimeSync {
        fetch: Mutex<FakeFetch>,
        fail_writes: bool,
        gate: Option<Arc<Notify>>,
        slow_first_write: Option<Duration>,
        first_write_done: AtomicBool,
        writes: Mutex<Vec<(TaskIdentity, f64)>>,
    }

    impl FakeRemoteTimeSync {
        fn returning(fetch: FakeFetch) -> Self {
            Self {
                fetch: Mutex::new(fetch),
                fail_writes: false,
                gate: None,
                slow_first_write: None,
                first_write_done: AtomicBool::new(false),
                writes: Mutex::new(Vec::new()),
            }
        }

        fn failing_writes(mut self) -> Self {
            self.fail_writes = true;
            self
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn slow_first_write(mut self, delay: Duration) -> Self {
            self.slow_first_write = Some(delay);
            self
        }

        fn writes(&self) -> Vec<(TaskIdentity, f64)> {
            self.writes.lock().expect("writes lock poisoned").clone()
        }
    }

    #[async_trait]
    impl RemoteTimeSync for FakeRemoteTimeSync {
        async fn fetch_task_total_time(&self, task: &TaskIdentity) -> Result<f64, InfraError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let fetch = self.fetch.lock().expect("fetch lock poisoned").clone();
            match fetch {
                FakeFetch::Total(total) => Ok(total),
                FakeFetch::LastWritten => self
                    .writes()
                    .last()
                    .map(|(_, total)| *total)
                    .ok_or_else(|| InfraError::NotFound(format!("task {}", task.task_id))),
                FakeFetch::Missing => Err(InfraError::NotFound(format!("task {}", task.task_id))),
                FakeFetch::NetworkError => {
                    Err(InfraError::Remote("network error while fetching task time".to_string()))
                }
            }
        }

        async fn update_task_total_time(
            &self,
            task: &TaskIdentity,
            total_seconds: f64,
        ) -> Result<(), InfraError> {
            if self.fail_writes {
                return Err(InfraError::Remote("remote store error: http 503".to_string()));
            }
            if !self.first_write_done.swap(true, Ordering::SeqCst) {
                if let Some(delay) = self.slow_first_write {
                    tokio::time::sleep(delay).await;
                }
            }
            self.writes
                .lock()
                .expect("writes lock poisoned")
                .push((task.clone(), total_seconds));
            Ok(())
        }
    }

    struct BrokenStore;

    impl TimerStateStore for BrokenStore {
        fn load(&self, key: &TaskKey) -> Result<Option<TimerState>, InfraError> {
            Err(InfraError::CorruptState {
                key: key.to_string(),
                reason: "garbled".to_string(),
            })
        }

        fn save(&self, _key: &TaskKey, _state: &TimerState) -> Result<(), InfraError> {
            Ok(())
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_task() -> Task {
        Task::recurring(
            "tsk-1",
            "Weekly report",
            fixed_time("2024-01-01T09:00:00Z"),
            RecurrencePattern::Weekly,
        )
        .with_project("prj-1")
        .with_total_time_logged(100.0)
    }

    struct Harness {
        clock: ManualClock,
        store: Arc<InMemoryTimerStateStore>,
        remote: Arc<FakeRemoteTimeSync>,
        log: Arc<InMemoryActivityLog>,
    }

    impl Harness {
        fn new(remote: FakeRemoteTimeSync) -> Self {
            Self {
                clock: ManualClock::new(fixed_time("2024-01-08T09:00:00Z")),
                store: Arc::new(InMemoryTimerStateStore::default()),
                remote: Arc::new(remote),
                log: Arc::new(InMemoryActivityLog::default()),
            }
        }

        fn context(&self) -> TimerContext<InMemoryTimerStateStore, FakeRemoteTimeSync> {
            TimerContext::new(
                Arc::clone(&self.store),
                Arc::clone(&self.remote),
                self.log.clone() as Arc<dyn ActivityLog>,
            )
            .with_now_provider(self.clock.source())
            .with_tick_interval(Duration::from_millis(10))
        }

        fn load(&self, task: &Task) -> TimerEngine<InMemoryTimerStateStore, FakeRemoteTimeSync> {
            TimerEngine::load(task, self.context())
        }

        fn stored(&self, task: &Task) -> Option<TimerState> {
            self.store.load(&task.key()).expect("store load")
        }
    }

    async fn drain_fetch<S, R>(engine: &mut TimerEngine<S, R>) -> TimerEvent
    where
        S: TimerStateStore + 'static,
        R: RemoteTimeSync + ?Sized + 'static,
    {
        engine.next_event().await
    }

    #[tokio::test]
    async fn load_seeds_from_task_total_when_nothing_is_stored() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Missing));
        let task = sample_task();
        let engine = harness.load(&task);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, TimerPhase::Idle);
        assert_eq!(snapshot.accumulated_seconds, 100.0);
        assert_eq!(snapshot.display, "00:01:40");
        assert!(engine.has_pending_fetch());
    }

    #[tokio::test]
    async fn start_twice_keeps_one_session() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Missing));
        let task = sample_task();
        let mut engine = harness.load(&task);

        let first = engine.start();
        harness.clock.advance(ChronoDuration::seconds(3));
        let second = engine.start();

        assert_eq!(first.session_start, second.session_start);
        assert_eq!(second.accumulated_seconds, 100.0);
        assert_eq!(second.total_seconds, 103.0);
        let starts = harness
            .log
            .records()
            .into_iter()
            .filter(|record| record.source == "timer.start")
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn five_second_session_is_committed_and_survives_reload() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Missing));
        let task = sample_task();
        let mut engine = harness.load(&task);

        engine.start();
        for _ in 0..5 {
            harness.clock.advance(ChronoDuration::seconds(1));
            let ticked = engine.tick();
            assert_eq!(ticked.accumulated_seconds, 100.0);
        }
        let stopped = engine.stop();

        assert_eq!(stopped.phase, TimerPhase::Idle);
        assert_eq!(stopped.last_session_seconds, 5.0);
        assert_eq!(stopped.accumulated_seconds, 105.0);
        assert_eq!(stopped.display, "00:01:45");

        engine.settle_remote_writes().await;
        assert_eq!(harness.remote.writes(), vec![(task.identity(), 105.0)]);

        let reloaded = harness.load(&task);
        assert_eq!(reloaded.snapshot().accumulated_seconds, 105.0);
        assert_eq!(reloaded.snapshot().last_session_seconds, 5.0);
    }

    #[tokio::test]
    async fn stop_while_idle_does_nothing() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Missing));
        let task = sample_task();
        let mut engine = harness.load(&task);

        let snapshot = engine.stop();
        engine.settle_remote_writes().await;

        assert_eq!(snapshot.accumulated_seconds, 100.0);
        assert!(harness.remote.writes().is_empty());
        assert_eq!(harness.stored(&task), None);
    }

    #[tokio::test]
    async fn running_session_survives_restart_and_keeps_counting() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Missing));
        let task = sample_task();
        let t0 = harness.clock.now();

        {
            let mut engine = harness.load(&task);
            engine.start();
        }
        assert!(harness.stored(&task).expect("state persisted").is_running);

        harness.clock.advance(ChronoDuration::seconds(300));
        let mut engine = harness.load(&task);
        let snapshot = engine.tick();

        assert_eq!(snapshot.phase, TimerPhase::Running);
        assert_eq!(snapshot.session_start, Some(t0.to_rfc3339()));
        assert_eq!(snapshot.total_seconds, 400.0);
        assert_eq!(snapshot.display, "00:06:40");
    }

    #[tokio::test]
    async fn remote_total_replaces_local_baseline() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Total(120.0)));
        let task = sample_task();
        harness
            .store
            .save(&task.key(), &TimerState::idle(90.0))
            .expect("seed local state");

        let mut engine = harness.load(&task);
        assert_eq!(engine.snapshot().total_seconds, 90.0);

        match drain_fetch(&mut engine).await {
            TimerEvent::BaselineResolved { replaced, snapshot } => {
                assert!(replaced);
                assert_eq!(snapshot.total_seconds, 120.0);
                assert_eq!(snapshot.display, "00:02:00");
            }
            other => panic!("expected baseline resolution, got {other:?}"),
        }
        assert_eq!(
            harness.stored(&task).expect("persisted").accumulated_seconds,
            120.0
        );
        assert_eq!(engine.next_event().await, TimerEvent::Idle);
    }

    #[tokio::test]
    async fn remote_total_may_also_shrink_the_baseline() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Total(30.0)));
        let task = sample_task();
        let mut engine = harness.load(&task);

        drain_fetch(&mut engine).await;
        assert_eq!(engine.snapshot().accumulated_seconds, 30.0);
    }

    #[tokio::test]
    async fn late_fetch_lands_under_a_running_session() {
        let gate = Arc::new(Notify::new());
        let harness = Harness::new(
            FakeRemoteTimeSync::returning(FakeFetch::Total(500.0)).gated(Arc::clone(&gate)),
        );
        let task = sample_task();
        let mut engine = harness.load(&task);
        let mut display = engine.subscribe();

        engine.start();
        harness.clock.advance(ChronoDuration::seconds(2));
        assert_eq!(engine.tick().total_seconds, 102.0);

        gate.notify_one();
        let resolved = loop {
            match engine.next_event().await {
                TimerEvent::BaselineResolved { snapshot, .. } => break snapshot,
                TimerEvent::Ticked(_) => continue,
                TimerEvent::Idle => panic!("fetch should still be pending"),
            }
        };

        assert_eq!(resolved.phase, TimerPhase::Running);
        assert_eq!(resolved.accumulated_seconds, 500.0);
        assert_eq!(resolved.total_seconds, 502.0);
        assert_eq!(display.borrow_and_update().display, "00:08:22");
    }

    #[tokio::test]
    async fn fetch_failure_keeps_local_baseline_and_is_logged() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::NetworkError));
        let task = sample_task();
        harness
            .store
            .save(&task.key(), &TimerState::idle(90.0))
            .expect("seed local state");
        let mut engine = harness.load(&task);

        match drain_fetch(&mut engine).await {
            TimerEvent::BaselineResolved { replaced, snapshot } => {
                assert!(!replaced);
                assert_eq!(snapshot.total_seconds, 90.0);
            }
            other => panic!("expected baseline resolution, got {other:?}"),
        }
        let errors = harness.log.records_at(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, "timer.remote_fetch");
    }

    #[tokio::test]
    async fn failed_remote_write_leaves_local_state_correct() {
        let harness = Harness::new(
            FakeRemoteTimeSync::returning(FakeFetch::Missing).failing_writes(),
        );
        let task = sample_task();
        let mut engine = harness.load(&task);

        engine.start();
        harness.clock.advance(ChronoDuration::seconds(40));
        engine.stop();
        engine.settle_remote_writes().await;

        assert_eq!(
            harness.stored(&task).expect("persisted").accumulated_seconds,
            140.0
        );
        assert!(
            harness
                .log
                .records_at(LogLevel::Error)
                .iter()
                .any(|record| record.source == "timer.remote_write")
        );
    }

    #[tokio::test]
    async fn close_commits_running_session_and_flushes_remote_write() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Missing));
        let task = sample_task();
        let mut engine = harness.load(&task);

        engine.start();
        harness.clock.advance(ChronoDuration::seconds(61));
        let closed = engine.close().await;

        assert_eq!(closed.phase, TimerPhase::Idle);
        assert_eq!(closed.last_session_seconds, 61.0);
        let stored = harness.stored(&task).expect("persisted");
        assert!(!stored.is_running);
        assert_eq!(stored.accumulated_seconds, 161.0);
        assert_eq!(harness.remote.writes(), vec![(task.identity(), 161.0)]);
    }

    #[tokio::test]
    async fn unreadable_local_state_falls_back_to_task_total() {
        let log = Arc::new(InMemoryActivityLog::default());
        let context = TimerContext::new(
            Arc::new(BrokenStore),
            Arc::new(FakeRemoteTimeSync::returning(FakeFetch::Missing)),
            log.clone() as Arc<dyn ActivityLog>,
        )
        .with_now_provider(ManualClock::new(fixed_time("2024-01-08T09:00:00Z")).source());
        let engine = TimerEngine::load(&sample_task(), context);

        assert_eq!(engine.snapshot().accumulated_seconds, 100.0);
        assert_eq!(log.records_at(LogLevel::Warn).len(), 1);
    }

    #[tokio::test]
    async fn running_engine_ticks_through_next_event() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Missing));
        let task = sample_task();
        let mut engine = harness.load(&task);
        drain_fetch(&mut engine).await;

        engine.start();
        harness.clock.advance(ChronoDuration::seconds(1));
        match engine.next_event().await {
            TimerEvent::Ticked(snapshot) => assert_eq!(snapshot.total_seconds, 101.0),
            other => panic!("expected tick, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_first_write_cannot_overwrite_a_newer_total() {
        let harness = Harness::new(
            FakeRemoteTimeSync::returning(FakeFetch::LastWritten)
                .slow_first_write(Duration::from_millis(100)),
        );
        let task = sample_task();
        let mut engine = harness.load(&task);
        drain_fetch(&mut engine).await;

        engine.start();
        harness.clock.advance(ChronoDuration::seconds(5));
        engine.stop();
        tokio::task::yield_now().await;

        engine.start();
        harness.clock.advance(ChronoDuration::seconds(10));
        let stopped = engine.stop();
        engine.settle_remote_writes().await;

        assert_eq!(stopped.accumulated_seconds, 115.0);
        let written = harness
            .remote
            .writes()
            .into_iter()
            .map(|(_, total)| total)
            .collect::<Vec<_>>();
        assert_eq!(written.last(), Some(&115.0));
        assert!(written.windows(2).all(|pair| pair[0] <= pair[1]));

        let mut reloaded = harness.load(&task);
        drain_fetch(&mut reloaded).await;
        assert_eq!(reloaded.snapshot().accumulated_seconds, 115.0);
    }

    #[tokio::test]
    async fn stop_discards_a_remote_total_still_in_flight() {
        let gate = Arc::new(Notify::new());
        let harness = Harness::new(
            FakeRemoteTimeSync::returning(FakeFetch::Total(500.0)).gated(Arc::clone(&gate)),
        );
        let task = sample_task();
        let mut engine = harness.load(&task);

        engine.start();
        harness.clock.advance(ChronoDuration::seconds(20));
        engine.stop();
        assert!(!engine.has_pending_fetch());

        gate.notify_one();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.next_event().await, TimerEvent::Idle);
        assert_eq!(engine.tick().accumulated_seconds, 120.0);
        assert_eq!(
            harness.stored(&task).expect("persisted").accumulated_seconds,
            120.0
        );
    }

    #[test]
    fn engine_runs_on_local_state_without_a_runtime() {
        let harness = Harness::new(FakeRemoteTimeSync::returning(FakeFetch::Total(500.0)));
        let task = sample_task();
        let mut engine = harness.load(&task);

        assert!(!engine.has_pending_fetch());
        engine.start();
        harness.clock.advance(ChronoDuration::seconds(7));
        let stopped = engine.stop();

        assert_eq!(stopped.accumulated_seconds, 107.0);
        assert_eq!(
            harness.stored(&task).expect("persisted").accumulated_seconds,
            107.0
        );
        assert!(harness.remote.writes().is_empty());
        let sources = harness
            .log
            .records_at(LogLevel::Warn)
            .into_iter()
            .map(|record| record.source)
            .collect::<Vec<_>>();
        assert_eq!(sources, vec!["timer.load", "timer.remote_write"]);
    }
}
