/// Process-wide counters for provisioning runs, logged as one snapshot per run.
pub mod provision_counters {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing::info;

    static CONNECT_RETRIES: AtomicUsize = AtomicUsize::new(0);
    static LOCK_ACQUIRED: AtomicUsize = AtomicUsize::new(0);
    static LOCK_ACQUIRE_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);
    static LOCK_BACKOFF_EVENTS: AtomicUsize = AtomicUsize::new(0);
    static LOCK_ACQUIRE_TIMEOUTS: AtomicUsize = AtomicUsize::new(0);
    static RUNS_COMPLETED: AtomicUsize = AtomicUsize::new(0);
    static RUNS_CANCELLED: AtomicUsize = AtomicUsize::new(0);
    static BODY_TIMEOUTS: AtomicUsize = AtomicUsize::new(0);
    static OBJECTS_FAILED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Snapshot {
        pub connect_retries: usize,
        pub lock_acquired: usize,
        pub lock_acquire_attempts: usize,
        pub lock_backoff_events: usize,
        pub lock_acquire_timeouts: usize,
        pub runs_completed: usize,
        pub runs_cancelled: usize,
        pub body_timeouts: usize,
        pub objects_failed: usize,
    }

    pub fn connect_retry() {
        CONNECT_RETRIES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lock_acquired() {
        LOCK_ACQUIRED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_lock_acquire_attempts(n: usize) {
        LOCK_ACQUIRE_ATTEMPTS.fetch_add(n, Ordering::Relaxed);
    }

    pub fn lock_backoff_event() {
        LOCK_BACKOFF_EVENTS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lock_acquire_timeout() {
        LOCK_ACQUIRE_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_completed() {
        RUNS_COMPLETED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_cancelled() {
        RUNS_CANCELLED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn body_timeout() {
        BODY_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_objects_failed(n: usize) {
        OBJECTS_FAILED.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot() -> Snapshot {
        Snapshot {
            connect_retries: CONNECT_RETRIES.load(Ordering::Relaxed),
            lock_acquired: LOCK_ACQUIRED.load(Ordering::Relaxed),
            lock_acquire_attempts: LOCK_ACQUIRE_ATTEMPTS.load(Ordering::Relaxed),
            lock_backoff_events: LOCK_BACKOFF_EVENTS.load(Ordering::Relaxed),
            lock_acquire_timeouts: LOCK_ACQUIRE_TIMEOUTS.load(Ordering::Relaxed),
            runs_completed: RUNS_COMPLETED.load(Ordering::Relaxed),
            runs_cancelled: RUNS_CANCELLED.load(Ordering::Relaxed),
            body_timeouts: BODY_TIMEOUTS.load(Ordering::Relaxed),
            objects_failed: OBJECTS_FAILED.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot(label: &str) {
        let s = snapshot();
        info!(
            label = label,
            connect_retries = s.connect_retries,
            lock_acquired = s.lock_acquired,
            lock_acquire_attempts = s.lock_acquire_attempts,
            lock_backoff_events = s.lock_backoff_events,
            lock_acquire_timeouts = s.lock_acquire_timeouts,
            runs_completed = s.runs_completed,
            runs_cancelled = s.runs_cancelled,
            body_timeouts = s.body_timeouts,
            objects_failed = s.objects_failed,
            "provision_counters"
        );
    }
}
