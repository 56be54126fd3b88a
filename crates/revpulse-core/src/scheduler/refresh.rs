//! The refresh loop and its per-cycle tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::SnapshotCache;
use crate::models::Record;
use crate::sink::{BatchPersister, RetryPolicy, SaveOutcome};
use crate::source::{FetchQuery, RecordSource};

use super::clock::{next_aligned, Clock, SystemClock};
use super::{ErrorOrigin, RefreshEvent, SchedulerSettings, SchedulerState};

/// Shortest period the timer accepts
const MIN_INTERVAL: Duration = Duration::from_secs(1);

enum Command {
    TriggerNow,
}

/// Periodic fetch-cache-persist driver
pub struct RefreshScheduler {
    settings: SchedulerSettings,
    source: Arc<dyn RecordSource>,
    persister: BatchPersister,
    cache: Option<SnapshotCache>,
    clock: Arc<dyn Clock>,
}

impl RefreshScheduler {
    /// Create a scheduler using the system clock and no snapshot cache
    ///
    /// Intervals shorter than one second are raised to one second.
    pub fn new(
        mut settings: SchedulerSettings,
        source: Arc<dyn RecordSource>,
        persister: BatchPersister,
    ) -> Self {
        if settings.interval < MIN_INTERVAL {
            warn!(interval = ?settings.interval, "Refresh interval too short, clamping");
            settings.interval = MIN_INTERVAL;
        }
        Self {
            settings,
            source,
            persister,
            cache: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Cache every fetched batch as last-known-good
    #[must_use]
    pub fn with_cache(mut self, cache: SnapshotCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the wall clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the timer loop.
    ///
    /// Must be called inside a tokio runtime. Dropping the handle without
    /// calling [`SchedulerHandle::stop`] also ends the loop.
    pub fn start(self) -> (SchedulerHandle, mpsc::UnboundedReceiver<RefreshEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(self.settings.command_buffer.max(1));
        let shutdown = CancellationToken::new();
        let busy = Arc::new(AtomicBool::new(false));

        let shared = Arc::new(Shared {
            settings: self.settings,
            source: self.source,
            persister: self.persister,
            cache: self.cache,
            clock: self.clock,
            busy: Arc::clone(&busy),
            pending: Mutex::new(Vec::new()),
            events: event_tx,
        });

        let task = tokio::spawn(run_loop(shared, command_rx, shutdown.clone()));

        let handle = SchedulerHandle {
            commands: command_tx,
            shutdown,
            busy,
            task: Mutex::new(Some(task)),
        };
        (handle, event_rx)
    }
}

/// Control surface of a started scheduler
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    busy: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerHandle {
    /// Request an immediate cycle.
    ///
    /// Returns `false` if the request could not be queued. A queued request
    /// is still skipped if a fetch is in flight when it is handled.
    pub fn trigger_now(&self) -> bool {
        match self.commands.try_send(Command::TriggerNow) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Could not queue manual refresh");
                false
            }
        }
    }

    /// Whether a fetch is in flight
    pub fn state(&self) -> SchedulerState {
        if self.busy.load(Ordering::Acquire) {
            SchedulerState::Fetching
        } else {
            SchedulerState::Idle
        }
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel the timer and any in-flight cycle, then wait for the loop to
    /// exit. Results arriving after this are discarded.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Scheduler loop ended abnormally");
            }
        }
    }
}

struct Shared {
    settings: SchedulerSettings,
    source: Arc<dyn RecordSource>,
    persister: BatchPersister,
    cache: Option<SnapshotCache>,
    clock: Arc<dyn Clock>,
    busy: Arc<AtomicBool>,
    /// Records of failed chunks awaiting the next cycle
    pending: Mutex<Vec<Record>>,
    events: mpsc::UnboundedSender<RefreshEvent>,
}

/// Clears the busy flag when the fetch phase ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    mut commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
) {
    let interval = shared.settings.interval;
    let now = shared.clock.now();
    let first_run = if shared.settings.align_to_hour {
        next_aligned(now, shared.settings.timezone)
    } else {
        now
    };
    let delay = (first_run - now).to_std().unwrap_or_default();

    let mut ticker = interval_at(Instant::now() + delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let step = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::hours(1));
    let mut next_run = first_run;

    info!(first_run = %first_run, interval = ?interval, "Refresh scheduler started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = ticker.tick() => {
                next_run += step;
                shared.dispatch(next_run, &shutdown, "timer");
            }

            command = commands.recv() => match command {
                Some(Command::TriggerNow) => shared.dispatch(next_run, &shutdown, "manual"),
                None => {
                    debug!("Scheduler handle dropped");
                    shutdown.cancel();
                    break;
                }
            },
        }
    }

    info!("Refresh scheduler stopped");
}

impl Shared {
    /// Start a cycle unless a fetch is already in flight
    fn dispatch(
        self: &Arc<Self>,
        next_run: DateTime<Utc>,
        shutdown: &CancellationToken,
        trigger: &'static str,
    ) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(trigger, "Fetch already in flight, skipping cycle");
            return;
        }

        let cycle_id = Uuid::now_v7();
        let span = info_span!("refresh_cycle", %cycle_id, trigger);
        let token = shutdown.child_token();
        let shared = Arc::clone(self);

        tokio::spawn(async move { shared.run_cycle(next_run, token).await }.instrument(span));
    }

    async fn run_cycle(&self, next_run: DateTime<Utc>, token: CancellationToken) {
        let guard = BusyGuard(&self.busy);
        counter!("revpulse_cycles_total").increment(1);

        self.emit(&token, RefreshEvent::IntervalTriggered { next_run });
        self.emit(&token, RefreshEvent::FetchStarted);

        let query = FetchQuery::for_instant(
            self.settings.access_token.clone(),
            self.clock.now(),
            self.settings.timezone,
        );

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Fetch cancelled");
                return;
            }
            result = self.source.fetch(&query) => result,
        };
        drop(guard);

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                counter!("revpulse_fetch_failures_total").increment(1);
                warn!(source = self.source.name(), error = %e, "Fetch failed");
                self.emit(
                    &token,
                    RefreshEvent::Error {
                        origin: ErrorOrigin::Fetch,
                        message: e.user_message(),
                    },
                );
                return;
            }
        };

        info!(
            source = self.source.name(),
            count = records.len(),
            date = %query.date,
            "Fetched batch"
        );

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(&records) {
                warn!(error = %e, "Failed to cache snapshot");
            }
        }

        self.emit(
            &token,
            RefreshEvent::FetchCompleted {
                records: records.clone(),
                fetched_at: self.clock.now(),
            },
        );

        self.persist(records, &token).await;
    }

    async fn persist(&self, records: Vec<Record>, token: &CancellationToken) {
        let batch = match self.settings.retry {
            RetryPolicy::None => records,
            RetryPolicy::NextCycle => {
                let mut batch = std::mem::take(&mut *self.pending.lock());
                if !batch.is_empty() {
                    info!(count = batch.len(), "Retrying records from a failed save");
                }
                batch.extend(records);
                batch
            }
        };

        let events = self.events.clone();
        let progress_token = token.clone();
        let save = self.persister.save(&batch, move |progress| {
            if !progress_token.is_cancelled() {
                let _ = events.send(RefreshEvent::SaveProgress(progress.clone()));
            }
        });

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Save cancelled");
                return;
            }
            outcome = save => outcome,
        };

        counter!("revpulse_records_persisted_total").increment(outcome.persisted());

        match outcome {
            SaveOutcome::Completed { persisted, message, .. } => {
                self.emit(token, RefreshEvent::SaveCompleted { persisted, message });
            }
            SaveOutcome::Failed {
                chunk,
                persisted,
                message,
                unsaved,
            } => {
                counter!("revpulse_save_failures_total").increment(1);
                warn!(chunk, persisted, unsaved = unsaved.len(), "Save failed");
                if self.settings.retry == RetryPolicy::NextCycle {
                    self.pending.lock().extend(unsaved);
                }
                self.emit(
                    token,
                    RefreshEvent::Error {
                        origin: ErrorOrigin::Persist,
                        message,
                    },
                );
            }
        }
    }

    /// Send an event unless the cycle was cancelled
    fn emit(&self, token: &CancellationToken, event: RefreshEvent) {
        if token.is_cancelled() {
            return;
        }
        // the receiver going away is not an error for the scheduler
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySnapshotStore;
    use crate::error::{Error, Result};
    use crate::scheduler::InstantClock;
    use crate::sink::{PersistenceSink, SinkResponse};
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Reply {
        Rows(usize),
        Fail(&'static str),
    }

    #[derive(Default)]
    struct ScriptedSource {
        replies: Mutex<VecDeque<Reply>>,
        delay: Duration,
        calls: AtomicUsize,
        last_query: Mutex<Option<FetchQuery>>,
    }

    impl ScriptedSource {
        fn new(replies: &[Reply], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().copied().collect()),
                delay,
                ..Default::default()
            })
        }
    }

    #[async_trait::async_trait]
    impl RecordSource for ScriptedSource {
        async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Record>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock() = Some(query.clone());
            let reply = self.replies.lock().pop_front().unwrap_or(Reply::Rows(1));
            tokio::time::sleep(self.delay).await;
            match reply {
                Reply::Rows(n) => Ok(rows(n)),
                Reply::Fail(message) => Err(Error::fetch(message)),
            }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        sizes: Mutex<Vec<usize>>,
        fail_first: bool,
    }

    #[async_trait::async_trait]
    impl PersistenceSink for CountingSink {
        async fn submit(&self, records: &[Record]) -> Result<SinkResponse> {
            let first = {
                let mut sizes = self.sizes.lock();
                sizes.push(records.len());
                sizes.len() == 1
            };
            if self.fail_first && first {
                return Err(Error::persist("store down"));
            }
            Ok(SinkResponse::default())
        }
    }

    fn rows(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new().with("tkid", i as i64)).collect()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn settings(retry: RetryPolicy) -> SchedulerSettings {
        SchedulerSettings {
            access_token: "token".into(),
            timezone: Tz::UTC,
            retry,
            ..Default::default()
        }
    }

    fn scheduler(
        source: Arc<ScriptedSource>,
        sink: Arc<CountingSink>,
        retry: RetryPolicy,
        start: DateTime<Utc>,
    ) -> RefreshScheduler {
        RefreshScheduler::new(settings(retry), source, BatchPersister::new(sink, 100))
            .with_clock(Arc::new(InstantClock::starting_at(start)))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<RefreshEvent>) -> RefreshEvent {
        rx.recv().await.expect("scheduler event")
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_waits_for_next_hour() {
        let source = ScriptedSource::new(&[Reply::Rows(2), Reply::Rows(3)], Duration::ZERO);
        let sink = Arc::new(CountingSink::default());
        let started = Instant::now();
        let (handle, mut rx) =
            scheduler(source.clone(), sink.clone(), RetryPolicy::None, at(14, 17)).start();

        assert_eq!(next(&mut rx).await, RefreshEvent::IntervalTriggered { next_run: at(16, 0) });
        assert_eq!(started.elapsed(), Duration::from_secs(43 * 60));
        assert_eq!(next(&mut rx).await, RefreshEvent::FetchStarted);
        match next(&mut rx).await {
            RefreshEvent::FetchCompleted { records, fetched_at } => {
                assert_eq!(records.len(), 2);
                assert_eq!(fetched_at, at(15, 0));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            next(&mut rx).await,
            RefreshEvent::SaveCompleted {
                persisted: 2,
                message: "Saved successfully".into()
            }
        );
        assert_eq!(source.last_query.lock().clone().unwrap().date, "03/01/2025");

        assert_eq!(next(&mut rx).await, RefreshEvent::IntervalTriggered { next_run: at(17, 0) });
        assert_eq!(started.elapsed(), Duration::from_secs(103 * 60));

        handle.stop().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_holds_while_cycles_take_40_minutes() {
        let source = ScriptedSource::new(&[], Duration::from_secs(40 * 60));
        let sink = Arc::new(CountingSink::default());
        let started = Instant::now();
        let (handle, mut rx) =
            scheduler(source.clone(), sink, RetryPolicy::None, at(14, 17)).start();

        let mut ticks = Vec::new();
        let mut fetched = Vec::new();
        while fetched.len() < 3 {
            match next(&mut rx).await {
                RefreshEvent::IntervalTriggered { next_run } => {
                    ticks.push((started.elapsed().as_secs() / 60, next_run));
                }
                RefreshEvent::FetchCompleted { fetched_at, .. } => fetched.push(fetched_at),
                _ => {}
            }
        }

        assert_eq!(ticks, vec![(43, at(16, 0)), (103, at(17, 0)), (163, at(18, 0))]);
        assert_eq!(fetched, vec![at(15, 40), at(16, 40), at(17, 40)]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let source = ScriptedSource::new(&[], Duration::ZERO);
        let sink = Arc::new(CountingSink::default());
        let zero = SchedulerSettings {
            interval: Duration::ZERO,
            align_to_hour: false,
            ..settings(RetryPolicy::None)
        };
        let refresh = RefreshScheduler::new(zero, source, BatchPersister::new(sink, 100))
            .with_clock(Arc::new(InstantClock::starting_at(at(14, 17))));
        assert_eq!(refresh.settings.interval, MIN_INTERVAL);

        let started = Instant::now();
        let (handle, mut rx) = refresh.start();
        let mut ticks = 0;
        while ticks < 2 {
            if let RefreshEvent::IntervalTriggered { .. } = next(&mut rx).await {
                ticks += 1;
            }
        }

        assert_eq!(started.elapsed(), MIN_INTERVAL);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_the_hour_runs_once_immediately() {
        let source = ScriptedSource::new(&[], Duration::ZERO);
        let sink = Arc::new(CountingSink::default());
        let started = Instant::now();
        let (handle, mut rx) =
            scheduler(source.clone(), sink, RetryPolicy::None, at(15, 0)).start();

        assert_eq!(next(&mut rx).await, RefreshEvent::IntervalTriggered { next_run: at(16, 0) });
        assert_eq!(started.elapsed(), Duration::ZERO);
        for _ in 0..3 {
            next(&mut rx).await;
        }

        assert_eq!(next(&mut rx).await, RefreshEvent::IntervalTriggered { next_run: at(17, 0) });
        assert_eq!(started.elapsed(), Duration::from_secs(60 * 60));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_while_busy_is_skipped() {
        let source = ScriptedSource::new(&[], Duration::from_secs(600));
        let sink = Arc::new(CountingSink::default());
        let (handle, mut rx) =
            scheduler(source.clone(), sink, RetryPolicy::None, at(14, 17)).start();

        assert!(handle.trigger_now());
        assert!(handle.trigger_now());

        assert_eq!(next(&mut rx).await, RefreshEvent::IntervalTriggered { next_run: at(15, 0) });
        assert_eq!(next(&mut rx).await, RefreshEvent::FetchStarted);
        assert_eq!(handle.state(), SchedulerState::Fetching);
        assert!(matches!(next(&mut rx).await, RefreshEvent::FetchCompleted { .. }));
        assert!(matches!(next(&mut rx).await, RefreshEvent::SaveCompleted { .. }));

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), SchedulerState::Idle);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_fetch() {
        let source = ScriptedSource::new(&[], Duration::from_secs(600));
        let sink = Arc::new(CountingSink::default());
        let (handle, mut rx) =
            scheduler(source.clone(), sink.clone(), RetryPolicy::None, at(14, 17)).start();

        handle.trigger_now();
        assert!(matches!(next(&mut rx).await, RefreshEvent::IntervalTriggered { .. }));
        assert_eq!(next(&mut rx).await, RefreshEvent::FetchStarted);

        handle.stop().await;
        assert!(handle.is_stopped());

        // every sender is gone once the cancelled cycle unwinds
        assert_eq!(rx.recv().await, None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(sink.sizes.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_is_reported_and_next_cycle_runs() {
        let replies = [Reply::Fail("Invalid access token"), Reply::Rows(1)];
        let source = ScriptedSource::new(&replies, Duration::ZERO);
        let sink = Arc::new(CountingSink::default());
        let (handle, mut rx) =
            scheduler(source.clone(), sink.clone(), RetryPolicy::None, at(14, 17)).start();

        handle.trigger_now();
        next(&mut rx).await;
        next(&mut rx).await;
        assert_eq!(
            next(&mut rx).await,
            RefreshEvent::Error {
                origin: ErrorOrigin::Fetch,
                message: "Invalid access token".into()
            }
        );
        assert!(sink.sizes.lock().is_empty());

        handle.trigger_now();
        next(&mut rx).await;
        next(&mut rx).await;
        assert!(matches!(next(&mut rx).await, RefreshEvent::FetchCompleted { .. }));
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunked_save_reports_progress_and_caches_snapshot() {
        let source = ScriptedSource::new(&[Reply::Rows(250)], Duration::ZERO);
        let sink = Arc::new(CountingSink::default());
        let cache = SnapshotCache::new(Arc::new(MemorySnapshotStore::new()), "hourlyReports");
        let (handle, mut rx) = scheduler(source, sink.clone(), RetryPolicy::None, at(14, 17))
            .with_cache(cache.clone())
            .start();

        handle.trigger_now();
        next(&mut rx).await;
        next(&mut rx).await;
        assert!(matches!(next(&mut rx).await, RefreshEvent::FetchCompleted { .. }));
        assert_eq!(cache.load().unwrap().unwrap().records.len(), 250);

        let mut progress = Vec::new();
        loop {
            match next(&mut rx).await {
                RefreshEvent::SaveProgress(p) => {
                    progress.push((p.chunk, p.total_chunks, p.inserted))
                }
                RefreshEvent::SaveCompleted { persisted, message } => {
                    assert_eq!(persisted, 250);
                    assert_eq!(message, "Saved 250 records in 3 batches");
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(progress, vec![(1, 3, 100), (2, 3, 200), (3, 3, 250)]);
        assert_eq!(*sink.sizes.lock(), vec![100, 100, 50]);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_cycle_policy_retries_unsaved_records() {
        let source = ScriptedSource::new(&[Reply::Rows(3), Reply::Rows(2)], Duration::ZERO);
        let sink = Arc::new(CountingSink {
            fail_first: true,
            ..Default::default()
        });
        let (handle, mut rx) =
            scheduler(source, sink.clone(), RetryPolicy::NextCycle, at(14, 17)).start();

        handle.trigger_now();
        for _ in 0..3 {
            next(&mut rx).await;
        }
        assert_eq!(
            next(&mut rx).await,
            RefreshEvent::Error {
                origin: ErrorOrigin::Persist,
                message: "store down".into()
            }
        );

        handle.trigger_now();
        for _ in 0..3 {
            next(&mut rx).await;
        }
        assert!(matches!(next(&mut rx).await, RefreshEvent::SaveCompleted { persisted: 5, .. }));
        assert_eq!(*sink.sizes.lock(), vec![3, 5]);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_drops_unsaved_records() {
        let source = ScriptedSource::new(&[Reply::Rows(3), Reply::Rows(2)], Duration::ZERO);
        let sink = Arc::new(CountingSink {
            fail_first: true,
            ..Default::default()
        });
        let (handle, mut rx) =
            scheduler(source, sink.clone(), RetryPolicy::None, at(14, 17)).start();

        handle.trigger_now();
        for _ in 0..4 {
            next(&mut rx).await;
        }
        handle.trigger_now();
        for _ in 0..4 {
            next(&mut rx).await;
        }
        assert_eq!(*sink.sizes.lock(), vec![3, 2]);
        handle.stop().await;
    }
}
