//! Virtual user (VU) scheduling for test execution.
//!
//! [`VirtualUserScheduler`] spawns one tokio task per virtual user. Start times
//! are spread evenly over the ramp-up window (user `i` starts at
//! `i * ramp_up / users`), and every user loops invoking the [`Operation`],
//! recording a [`Sample`] per call, then pausing for the think time.
//!
//! Stopping is cooperative: the shared [`CancellationToken`] is checked between
//! iterations and during pauses, never during an operation, so in-flight work
//! always completes and is recorded.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::loadtest::error::LoadTestError;
use crate::loadtest::metrics::{MetricsRecorder, Sample};
use crate::loadtest::operation::Operation;

/// Atomic counter tracking the number of currently running virtual users.
///
/// Lightweight wrapper around `Arc<AtomicU32>` for clone-friendly sharing
/// across VU tasks and the scheduler.
#[derive(Clone, Debug)]
pub struct ActiveVuCounter(Arc<AtomicU32>);

impl ActiveVuCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0)))
    }

    /// Increments the active VU count by one.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the active VU count by one.
    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current number of active VUs.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for ActiveVuCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a virtual user within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VuState {
    /// Waiting for its start offset.
    Pending,
    /// Invoking the operation.
    Running,
    /// Exited after observing the stop signal.
    Stopped,
}

/// One simulated client, owned by the scheduler for a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualUser {
    /// Zero-based user index.
    pub id: u32,
    /// Delay after run start before the first invocation.
    pub start_offset: Duration,
    /// Current lifecycle state.
    pub state: VuState,
    /// Completed invocations.
    pub iterations: u64,
}

impl VirtualUser {
    fn new(id: u32, start_offset: Duration) -> Self {
        Self {
            id,
            start_offset,
            state: VuState::Pending,
            iterations: 0,
        }
    }

    /// Returns `true` if the user invoked the operation at least once.
    pub fn started(&self) -> bool {
        self.iterations > 0
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Spawns and stops the virtual users of a single run.
///
/// Every sample goes into the recorder handed to [`new`](Self::new); the
/// scheduler never creates or clears recorders itself.
pub struct VirtualUserScheduler {
    operation: Arc<dyn Operation>,
    recorder: Arc<MetricsRecorder>,
    users: u32,
    ramp_up: Duration,
    think_time: Duration,
}

impl VirtualUserScheduler {
    /// Creates a scheduler for `users` virtual users with no ramp-up and no
    /// think time.
    pub fn new(operation: Arc<dyn Operation>, recorder: Arc<MetricsRecorder>, users: u32) -> Self {
        Self {
            operation,
            recorder,
            users,
            ramp_up: Duration::ZERO,
            think_time: Duration::ZERO,
        }
    }

    /// Sets the window over which user start times are spread.
    pub fn with_ramp_up(mut self, ramp_up: Duration) -> Self {
        self.ramp_up = ramp_up;
        self
    }

    /// Sets the pause between a user's invocations.
    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    /// Returns the configured number of users.
    pub fn users(&self) -> u32 {
        self.users
    }

    /// Returns the ramp-up window.
    pub fn ramp_up(&self) -> Duration {
        self.ramp_up
    }

    /// Returns the think time.
    pub fn think_time(&self) -> Duration {
        self.think_time
    }

    /// Start offset of user `id`: `id * ramp_up / users`.
    ///
    /// Computed in nanoseconds so no ramp-up window can overflow.
    pub fn start_offset(&self, id: u32) -> Duration {
        if self.users == 0 {
            return Duration::ZERO;
        }
        let nanos = self.ramp_up.as_nanos() * u128::from(id) / u128::from(self.users);
        let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
        // Remainder of a division by 1e9 always fits.
        Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
    }

    /// Spawns all virtual users and returns a handle to the running set.
    ///
    /// Users stop when `cancel` fires. Must be called inside a tokio runtime.
    pub fn start(&self, cancel: CancellationToken) -> Result<ScheduledRun, LoadTestError> {
        if self.users == 0 {
            return Err(LoadTestError::validation(
                "scheduler needs at least one virtual user",
            ));
        }

        let active = ActiveVuCounter::new();
        let mut workers = JoinSet::new();
        let started_at = Instant::now();

        for id in 0..self.users {
            let vu = VirtualUser::new(id, self.start_offset(id));
            workers.spawn(vu_loop(
                vu,
                self.operation.clone(),
                self.recorder.clone(),
                self.think_time,
                cancel.clone(),
                active.clone(),
            ));
        }

        tracing::debug!(
            users = self.users,
            ramp_up_ms = self.ramp_up.as_millis() as u64,
            think_time_ms = self.think_time.as_millis() as u64,
            "virtual users spawned"
        );

        Ok(ScheduledRun {
            workers,
            cancel,
            active,
            started_at,
            finished: Vec::with_capacity(self.users as usize),
            fault: None,
        })
    }

    /// Runs for `duration`, then stops and waits for in-flight work to finish.
    pub async fn run_for(&self, duration: Duration) -> Result<RunOutcome, LoadTestError> {
        let mut run = self.start(CancellationToken::new())?;
        let deadline = run.deadline_after(duration)?;
        run.wait_until(deadline).await;
        run.stop();
        run.join().await
    }

    /// Runs until `cancel` fires, then waits for in-flight work to finish.
    pub async fn run_until(&self, cancel: CancellationToken) -> Result<RunOutcome, LoadTestError> {
        let mut run = self.start(cancel)?;
        run.wait_for_stop().await;
        run.join().await
    }
}

/// Why [`ScheduledRun::wait_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The deadline passed.
    DeadlineReached,
    /// The stop signal fired first.
    Stopped,
    /// A user task failed; the other users have been told to stop.
    Faulted,
}

/// Handle to a set of running virtual users.
pub struct ScheduledRun {
    workers: JoinSet<VirtualUser>,
    cancel: CancellationToken,
    active: ActiveVuCounter,
    started_at: Instant,
    finished: Vec<VirtualUser>,
    fault: Option<LoadTestError>,
}

impl ScheduledRun {
    /// When the users were spawned.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Number of users currently past their start offset and not yet stopped.
    pub fn active_users(&self) -> u32 {
        self.active.get()
    }

    /// Fires the shared stop signal. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once a user task has failed.
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// `started_at + after`, or a validation error if that instant is not
    /// representable.
    pub fn deadline_after(&self, after: Duration) -> Result<Instant, LoadTestError> {
        self.started_at.checked_add(after).ok_or_else(|| {
            LoadTestError::validation(format!("run length of {after:?} is too long"))
        })
    }

    /// Waits for `deadline` or the stop signal, returning early if a user
    /// task fails.
    ///
    /// Does not stop the users on its own, except after a failure.
    pub async fn wait_until(&mut self, deadline: Instant) -> WaitOutcome {
        self.watch(Some(deadline)).await
    }

    /// Waits for the stop signal, returning early if a user task fails.
    pub async fn wait_for_stop(&mut self) -> WaitOutcome {
        self.watch(None).await
    }

    async fn watch(&mut self, deadline: Option<Instant>) -> WaitOutcome {
        let sleep = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
        tokio::pin!(sleep);

        loop {
            if self.is_faulted() {
                return WaitOutcome::Faulted;
            }
            let joined = tokio::select! {
                _ = &mut sleep, if deadline.is_some() => return WaitOutcome::DeadlineReached,
                _ = self.cancel.cancelled() => return WaitOutcome::Stopped,
                Some(joined) = self.workers.join_next() => joined,
            };
            self.absorb(joined);
        }
    }

    fn absorb(&mut self, joined: Result<VirtualUser, JoinError>) {
        match joined {
            Ok(vu) => self.finished.push(vu),
            Err(err) => {
                tracing::error!(error = %err, "virtual user task failed");
                self.cancel.cancel();
                self.fault.get_or_insert_with(|| {
                    LoadTestError::engine(format!("virtual user task failed: {err}"))
                });
            },
        }
    }

    /// Waits for every user to exit.
    ///
    /// Does not stop the users by itself; call [`stop`](Self::stop) first or
    /// cancel the token passed to [`VirtualUserScheduler::start`]. A panicked
    /// user task stops the remaining users and surfaces as
    /// [`LoadTestError::EngineFault`] once all of them have exited.
    pub async fn join(mut self) -> Result<RunOutcome, LoadTestError> {
        while let Some(joined) = self.workers.join_next().await {
            self.absorb(joined);
        }

        if let Some(err) = self.fault {
            return Err(err);
        }

        let mut users = self.finished;
        users.sort_by_key(|vu| vu.id);
        Ok(RunOutcome {
            users,
            elapsed: self.started_at.elapsed(),
        })
    }
}

/// Final state of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Every virtual user, ordered by id.
    pub users: Vec<VirtualUser>,
    /// Time from spawn until the last user exited.
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Total invocations across all users.
    pub fn total_iterations(&self) -> u64 {
        self.users.iter().map(|vu| vu.iterations).sum()
    }

    /// Number of users that invoked the operation at least once.
    pub fn started_users(&self) -> usize {
        self.users.iter().filter(|vu| vu.started()).count()
    }
}

/// Main virtual user task loop.
///
/// Each VU:
/// 1. Waits for its start offset (exits immediately if stopped first).
/// 2. Loops: invoke, record a [`Sample`], pause for `think_time`.
/// 3. Checks the stop signal before each invocation and during the pause.
///
/// The `active` counter is incremented when the user starts running and
/// decremented when it exits the loop.
async fn vu_loop(
    mut vu: VirtualUser,
    operation: Arc<dyn Operation>,
    recorder: Arc<MetricsRecorder>,
    think_time: Duration,
    cancel: CancellationToken,
    active: ActiveVuCounter,
) -> VirtualUser {
    if !vu.start_offset.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(vu.start_offset) => {}
            _ = cancel.cancelled() => {
                vu.state = VuState::Stopped;
                return vu;
            }
        }
    }

    vu.state = VuState::Running;
    active.increment();

    while !cancel.is_cancelled() {
        let start = Instant::now();
        let outcome = operation.execute().await;
        let duration = start.elapsed();

        if let Err(ref err) = outcome {
            tracing::trace!(vu = vu.id, error = %err, "operation failed");
        }
        recorder.record(Sample::from_outcome(duration, &outcome));
        vu.iterations += 1;

        if think_time.is_zero() {
            // Keep a tight loop from starving the other users.
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(think_time) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    active.decrement();
    vu.state = VuState::Stopped;
    vu
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::error::OperationError;
    use std::sync::atomic::AtomicU64;

    fn sleeping_op(ms: u64) -> Arc<dyn Operation> {
        Arc::new(move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<(), OperationError>(())
        })
    }

    #[test]
    fn test_active_vu_counter_increment_decrement() {
        let counter = ActiveVuCounter::new();
        assert_eq!(counter.get(), 0);

        counter.increment();
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 3);

        counter.decrement();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_start_offsets_spread_evenly() {
        let scheduler = VirtualUserScheduler::new(
            sleeping_op(1),
            Arc::new(MetricsRecorder::new()),
            4,
        )
        .with_ramp_up(Duration::from_secs(2));

        let offsets: Vec<_> = (0..4).map(|i| scheduler.start_offset(i)).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1500),
            ]
        );
    }

    #[test]
    fn test_no_ramp_up_starts_everyone_at_zero() {
        let scheduler =
            VirtualUserScheduler::new(sleeping_op(1), Arc::new(MetricsRecorder::new()), 3);
        assert!((0..3).all(|i| scheduler.start_offset(i).is_zero()));
    }

    #[test]
    fn test_start_offsets_never_overflow() {
        let scheduler = VirtualUserScheduler::new(
            sleeping_op(1),
            Arc::new(MetricsRecorder::new()),
            3,
        )
        .with_ramp_up(Duration::from_secs(u64::MAX));

        assert_eq!(scheduler.start_offset(0), Duration::ZERO);
        assert_eq!(scheduler.start_offset(1).as_secs(), u64::MAX / 3);
        assert!(scheduler.start_offset(2) < Duration::from_secs(u64::MAX));
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_is_rejected() {
        let scheduler =
            VirtualUserScheduler::new(sleeping_op(1), Arc::new(MetricsRecorder::new()), 1);
        let run = scheduler.start(CancellationToken::new()).unwrap();

        let err = run.deadline_after(Duration::MAX).unwrap_err();
        assert!(err.is_configuration_error());

        run.stop();
        run.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_users_is_rejected() {
        let scheduler =
            VirtualUserScheduler::new(sleeping_op(1), Arc::new(MetricsRecorder::new()), 0);
        let err = scheduler.start(CancellationToken::new()).err().unwrap();
        assert!(err.is_configuration_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_for_records_every_iteration() {
        let recorder = Arc::new(MetricsRecorder::new());
        let scheduler = VirtualUserScheduler::new(sleeping_op(50), recorder.clone(), 3)
            .with_think_time(Duration::from_millis(50));

        let outcome = scheduler.run_for(Duration::from_secs(1)).await.unwrap();

        assert_eq!(outcome.users.len(), 3);
        assert!(outcome.users.iter().all(|vu| vu.state == VuState::Stopped));
        assert_eq!(outcome.total_iterations(), recorder.len() as u64);
        // 1000ms / (50ms + 50ms) = 10 iterations per user.
        for vu in &outcome.users {
            assert!((9..=11).contains(&vu.iterations), "vu {vu:?}");
        }
        assert!(outcome.elapsed >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_operation_finishes_after_stop() {
        let recorder = Arc::new(MetricsRecorder::new());
        let scheduler = VirtualUserScheduler::new(sleeping_op(400), recorder.clone(), 1);

        let outcome = scheduler.run_for(Duration::from_millis(500)).await.unwrap();

        // Second call started at 400ms and completes at 800ms despite the stop.
        assert_eq!(recorder.len(), 2);
        assert!(outcome.elapsed >= Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_users_past_the_run_never_start() {
        let recorder = Arc::new(MetricsRecorder::new());
        let scheduler = VirtualUserScheduler::new(sleeping_op(10), recorder, 4)
            .with_ramp_up(Duration::from_secs(4))
            .with_think_time(Duration::from_millis(10));

        let outcome = scheduler.run_for(Duration::from_millis(1500)).await.unwrap();

        // Offsets are 0s, 1s, 2s, 3s; only the first two begin.
        assert_eq!(outcome.started_users(), 2);
        assert!(!outcome.users[2].started());
        assert!(!outcome.users[3].started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded_not_propagated() {
        let recorder = Arc::new(MetricsRecorder::new());
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let op: Arc<dyn Operation> = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if n % 2 == 0 {
                    Err(OperationError::failed("odd one out"))
                } else {
                    Ok(())
                }
            }
        });

        let scheduler = VirtualUserScheduler::new(op, recorder.clone(), 2);
        scheduler.run_for(Duration::from_millis(200)).await.unwrap();

        let snap = recorder.snapshot();
        assert!(snap.total() > 0);
        assert!(snap.error_count > 0);
        assert!(snap.success_count() > 0);
        assert!(snap.check_consistency().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_external_signal() {
        let recorder = Arc::new(MetricsRecorder::new());
        let scheduler = VirtualUserScheduler::new(sleeping_op(20), recorder.clone(), 2);
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.cancel();
        });

        let outcome = scheduler.run_until(cancel).await.unwrap();
        assert!(outcome.elapsed >= Duration::from_millis(300));
        assert!(recorder.len() >= 2 * 14);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_users_tracks_ramp_up() {
        let recorder = Arc::new(MetricsRecorder::new());
        let scheduler = VirtualUserScheduler::new(sleeping_op(10), recorder, 2)
            .with_ramp_up(Duration::from_secs(2))
            .with_think_time(Duration::from_millis(10));
        let run = scheduler.start(CancellationToken::new()).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(run.active_users(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(run.active_users(), 2);

        run.stop();
        let outcome = run.join().await.unwrap();
        assert_eq!(outcome.started_users(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_operation_is_engine_fault() {
        let op: Arc<dyn Operation> = Arc::new(|| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if true {
                panic!("bug in the harness");
            }
            Ok::<(), OperationError>(())
        });
        let scheduler = VirtualUserScheduler::new(op, Arc::new(MetricsRecorder::new()), 2);

        let err = scheduler
            .run_for(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadTestError::EngineFault { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_panic_ends_long_run_promptly() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let op: Arc<dyn Operation> = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if n == 3 {
                    panic!("bug in the harness");
                }
                Ok::<(), OperationError>(())
            }
        });
        let recorder = Arc::new(MetricsRecorder::new());
        let scheduler = VirtualUserScheduler::new(op, recorder, 2);
        let mut run = scheduler.start(CancellationToken::new()).unwrap();
        let deadline = run.deadline_after(Duration::from_secs(3600)).unwrap();

        assert_eq!(run.wait_until(deadline).await, WaitOutcome::Faulted);
        assert!(run.started_at().elapsed() < Duration::from_secs(1));

        let err = run.join().await.unwrap_err();
        assert!(matches!(err, LoadTestError::EngineFault { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_reports_stop_signal() {
        let scheduler =
            VirtualUserScheduler::new(sleeping_op(10), Arc::new(MetricsRecorder::new()), 2);
        let cancel = CancellationToken::new();
        let mut run = scheduler.start(cancel.clone()).unwrap();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let deadline = run.deadline_after(Duration::from_secs(60)).unwrap();
        assert_eq!(run.wait_until(deadline).await, WaitOutcome::Stopped);
        let outcome = run.join().await.unwrap();
        assert!(outcome.elapsed < Duration::from_secs(1));
    }
}
